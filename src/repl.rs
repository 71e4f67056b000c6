// ABOUTME: Interactive chat REPL driving an in-process gateway.
// ABOUTME: Streams deltas as they arrive; /new, /session, /help and /quit manage the conversation.

use anyhow::Result;
use futures_util::StreamExt;
use std::io::Write;
use switchboard_core::{Frame, Gateway};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

fn paint(color: &str, text: &str) -> String {
    let code = match color {
        "green" => "\x1b[32m",
        "yellow" => "\x1b[33m",
        "cyan" => "\x1b[36m",
        "red" => "\x1b[31m",
        "dim" => "\x1b[2m",
        "bold" => "\x1b[1m",
        _ => "",
    };
    format!("{}{}\x1b[0m", code, text)
}

fn print_help(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", paint("bold", "Commands:"))?;
    writeln!(out, "  /new      - Start a new conversation")?;
    writeln!(out, "  /session  - Show current conversation ID")?;
    writeln!(out, "  /quit     - Exit the REPL")?;
    writeln!(out, "  /help     - Show this help")?;
    writeln!(out)?;
    writeln!(out, "Type anything else to send it to the assistant.")?;
    writeln!(out)
}

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    New,
    Session,
    Help,
    Message(&'a str),
    Blank,
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Blank,
        "/quit" | "/exit" | "/q" => Input::Quit,
        "/new" => Input::New,
        "/session" => Input::Session,
        "/help" | "/?" => Input::Help,
        text => Input::Message(text),
    }
}

/// Run one turn, writing deltas as they arrive
async fn run_turn(
    gateway: &Gateway,
    conversation: &str,
    text: &str,
    out: &mut impl Write,
) -> std::io::Result<()> {
    let mut stream = match gateway.submit_turn(conversation, text).await {
        Ok(stream) => stream,
        Err(e) => {
            writeln!(out, "{}", paint("red", &format!("Error: {}", e.client_message())))?;
            return Ok(());
        }
    };

    while let Some(frame) = stream.next().await {
        match frame {
            Frame::Delta { content } => {
                write!(out, "{}", content)?;
                out.flush()?;
            }
            Frame::Done => writeln!(out)?,
            Frame::Error { message } => {
                writeln!(out, "{}", paint("red", &format!("\n[Error] {}", message)))?;
            }
        }
    }
    Ok(())
}

/// Read lines from `input` until EOF or /quit
pub async fn run<R, W>(gateway: &Gateway, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "{}", paint("bold", "switchboard chat"))?;
    writeln!(out, "Opening conversation...")?;
    let mut conversation = gateway.open_conversation(None).await?;
    writeln!(out, "{}", paint("green", &format!("Conversation: {}", conversation)))?;
    print_help(out)?;

    let mut lines = input.lines();
    loop {
        write!(out, "{}", paint("bold", ">>> "))?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            Input::Blank => continue,
            Input::Quit => {
                writeln!(out, "{}", paint("dim", "Goodbye!"))?;
                break;
            }
            Input::New => match gateway.open_conversation(None).await {
                Ok(id) => {
                    conversation = id;
                    writeln!(out, "{}", paint("green", &format!("New conversation: {}", conversation)))?;
                }
                Err(e) => writeln!(out, "{}", paint("red", &format!("Error: {}", e)))?,
            },
            Input::Session => writeln!(out, "Current conversation: {}", conversation)?,
            Input::Help => print_help(out)?,
            Input::Message(text) => {
                writeln!(out)?;
                run_turn(gateway, &conversation, text, out).await?;
                writeln!(out)?;
            }
        }
    }

    tracing::info!(conversation = %conversation, "Chat session ended");
    Ok(())
}
