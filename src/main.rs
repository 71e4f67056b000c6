// ABOUTME: Main entry point for the switchboard streaming gateway
// ABOUTME: Initializes logging and config, then runs the HTTP server or the chat REPL

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use switchboard::{app, config::Config, repl, server, ToolRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(author, version, about = "Multi-conversation streaming gateway for an agent backend", long_about = None)]
struct Cli {
    /// Path to config.toml (otherwise searched in the usual locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Chat with the backend from the terminal
    Chat,
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,switchboard=info,tower_http=info".into());
    // stderr keeps the chat REPL's stdout clean
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log panics before they take the process down
    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!(panic = %panic_info, "Switchboard panicked");
        eprintln!("\nPANIC: {}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging();

    let config = Config::load_from(cli.config.as_deref())?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        backend = %config.backend.backend_type(),
        "Configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let metrics = server::install_metrics()?;
            let tools = ToolRegistry::with_defaults();
            let gateway = app::build_gateway(&config, &tools, true)?;
            let state = server::AppState {
                gateway,
                tools,
                metrics: Some(metrics),
            };
            let router = server::router(state, config.server.static_dir.as_deref());
            server::serve(&config.bind_address(), router).await
        }
        Commands::Chat => {
            // No HTTP server here, so the CLI backend gets no tool endpoint
            let gateway = app::build_gateway(&config, &ToolRegistry::with_defaults(), false)?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            repl::run(&gateway, stdin, &mut stdout).await
        }
    }
}
