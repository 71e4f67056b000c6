// ABOUTME: End-to-end gateway behavior against the scripted mock backend.
// ABOUTME: Covers single construction, busy rejection, disconnect, timeout and cross-conversation isolation.

use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use switchboard_agent::backends::mock::{MockBackend, MockState, MockStep};
use switchboard_agent::{AgentEvent, ErrorCode, ToolRegistry};
use switchboard_core::{Frame, FrameStream, Gateway, GatewayConfig, GatewayError};

fn gateway(mock: MockBackend, config: GatewayConfig) -> (Gateway, MockState) {
    let state = mock.state();
    (Gateway::new(mock.into_handle(), config), state)
}

async fn collect(stream: FrameStream) -> Vec<Frame> {
    stream.collect().await
}

async fn wait_until_idle(gateway: &Gateway, id: &str) -> bool {
    for _ in 0..50 {
        if !gateway.conversation_info(id).unwrap().busy {
            return true;
        }
        tokio::task::yield_now().await;
    }
    false
}

#[tokio::test]
async fn test_hello_scenario_streams_deltas_then_done() {
    let mock = MockBackend::new()
        .on_prompt("hello")
        .respond_deltas(&["Hi", " there"]);
    let (gateway, _) = gateway(mock, GatewayConfig::default());

    let id = gateway.open_conversation(None).await.unwrap();
    let stream = gateway.submit_turn(&id, "hello").await.unwrap();

    assert_eq!(
        collect(stream).await,
        vec![Frame::delta("Hi"), Frame::delta(" there"), Frame::Done]
    );
}

#[tokio::test]
async fn test_open_conversation_generates_uuid_and_accepts_valid_ids() {
    let (gateway, state) = gateway(MockBackend::new(), GatewayConfig::default());

    let generated = gateway.open_conversation(None).await.unwrap();
    assert!(uuid::Uuid::parse_str(&generated).is_ok());

    let chosen = gateway
        .open_conversation(Some("team:alpha-1".to_string()))
        .await
        .unwrap();
    assert_eq!(chosen, "team:alpha-1");

    // Reopening is idempotent
    gateway
        .open_conversation(Some("team:alpha-1".to_string()))
        .await
        .unwrap();
    assert_eq!(state.sessions_created(), 2);
    assert_eq!(gateway.stats().conversations, 2);

    let err = gateway
        .open_conversation(Some("not valid!".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_concurrent_open_constructs_one_backend_session() {
    let mock = MockBackend::new().with_session_delay(Duration::from_millis(20));
    let (gateway, state) = gateway(mock, GatewayConfig::default());
    let gateway = Arc::new(gateway);

    let opens = (0..10).map(|_| {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.open_conversation(Some("same".to_string())).await })
    });
    for result in futures_util::future::join_all(opens).await {
        assert_eq!(result.unwrap().unwrap(), "same");
    }

    assert_eq!(state.sessions_created(), 1);
}

#[tokio::test]
async fn test_concurrent_implicit_turns_construct_one_backend_session() {
    let mock = MockBackend::new().with_session_delay(Duration::from_millis(20));
    let (gateway, state) = gateway(mock, GatewayConfig::default());
    let gateway = Arc::new(gateway);

    let turns = (0..4).map(|_| {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.submit_turn("fresh", "hi").await.is_ok() })
    });
    let accepted = futures_util::future::join_all(turns)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();

    assert!(accepted >= 1);
    assert_eq!(state.sessions_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_turn_while_busy_is_rejected_and_first_is_unaffected() {
    let mock = MockBackend::new()
        .on_prompt("first")
        .paced(Duration::from_millis(100))
        .respond_deltas(&["one", "two", "three"]);
    let (gateway, state) = gateway(mock, GatewayConfig::default());
    let id = gateway.open_conversation(None).await.unwrap();

    let first = gateway.submit_turn(&id, "first").await.unwrap();
    let err = gateway.submit_turn(&id, "second").await.unwrap_err();
    assert_eq!(err, GatewayError::ConversationBusy(id.clone()));

    assert_eq!(
        collect(first).await,
        vec![
            Frame::delta("one"),
            Frame::delta("two"),
            Frame::delta("three"),
            Frame::Done
        ]
    );
    // The rejected utterance never reached the backend
    assert_eq!(state.total_prompts(), 1);
}

#[tokio::test]
async fn test_gate_is_free_as_soon_as_terminal_frame_arrives() {
    let mock = MockBackend::new()
        .on_prompt("a")
        .respond_deltas(&["x"])
        .on_prompt("b")
        .respond_error(ErrorCode::BackendError, "nope");
    let (gateway, _) = gateway(mock, GatewayConfig::default());
    let id = gateway.open_conversation(None).await.unwrap();

    for utterance in ["a", "b"] {
        let mut stream = gateway.submit_turn(&id, utterance).await.unwrap();
        loop {
            let frame = stream.recv().await.unwrap();
            if frame.is_terminal() {
                break;
            }
        }
        let info = gateway.conversation_info(&id).unwrap();
        assert!(!info.busy, "gate still held after terminal frame");
        assert_eq!(gateway.stats().bound_sinks, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_releases_gate_and_backend_turn_still_completes() {
    let mock = MockBackend::new()
        .on_prompt("long")
        .paced(Duration::from_secs(1))
        .respond_deltas(&["a", "b", "c"]);
    let (gateway, state) = gateway(mock, GatewayConfig::default());
    let id = gateway.open_conversation(None).await.unwrap();

    let mut stream = gateway.submit_turn(&id, "long").await.unwrap();
    assert_eq!(stream.recv().await, Some(Frame::delta("a")));
    drop(stream);

    assert!(wait_until_idle(&gateway, &id).await);
    assert_eq!(gateway.stats().bound_sinks, 0);

    // Let the backend finish the abandoned turn; it is not cancelled
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(state.completed_prompts(), 1);
    assert_eq!(state.cancellations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_on_disconnect_cancels_backend_turn() {
    let mock = MockBackend::new()
        .on_prompt("long")
        .paced(Duration::from_secs(1))
        .respond_deltas(&["a", "b", "c"]);
    let config = GatewayConfig::default().with_cancel_on_disconnect(true);
    let (gateway, state) = gateway(mock, config);
    let id = gateway.open_conversation(None).await.unwrap();

    let mut stream = gateway.submit_turn(&id, "long").await.unwrap();
    assert_eq!(stream.recv().await, Some(Frame::delta("a")));
    drop(stream);
    assert!(wait_until_idle(&gateway, &id).await);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(state.cancellations(), 1);
    assert_eq!(state.completed_prompts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_yields_one_error_frame_and_conversation_is_reusable() {
    let mock = MockBackend::new()
        .on_prompt("slow")
        .stall_after(&["partial"], Duration::from_secs(60))
        .on_prompt("quick")
        .respond_deltas(&["ok"]);
    let config = GatewayConfig::default().with_turn_timeout(Duration::from_secs(5));
    let (gateway, _) = gateway(mock, config);
    let id = gateway.open_conversation(None).await.unwrap();

    let frames = collect(gateway.submit_turn(&id, "slow").await.unwrap()).await;
    assert_eq!(
        frames,
        vec![
            Frame::delta("partial"),
            Frame::error("turn timed out after 5s")
        ]
    );
    assert!(!frames.contains(&Frame::Done));

    let frames = collect(gateway.submit_turn(&id, "quick").await.unwrap()).await;
    assert_eq!(frames, vec![Frame::delta("ok"), Frame::Done]);
}

#[tokio::test(start_paused = true)]
async fn test_unread_stream_does_not_wedge_conversation_after_timeout() {
    let mock = MockBackend::new()
        .on_prompt("flood")
        .stall_after(&["a", "b", "c"], Duration::from_secs(60))
        .on_prompt("again")
        .respond_deltas(&["fresh"]);
    let config = GatewayConfig {
        sink_capacity: 1,
        ..GatewayConfig::default().with_turn_timeout(Duration::from_secs(5))
    };
    let (gateway, _) = gateway(mock, config);
    let id = gateway.open_conversation(None).await.unwrap();

    // Held open but never read, so the single slot fills up
    let mut stalled = gateway.submit_turn(&id, "flood").await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(wait_until_idle(&gateway, &id).await);

    let frames = collect(gateway.submit_turn(&id, "again").await.unwrap()).await;
    assert_eq!(frames, vec![Frame::delta("fresh"), Frame::Done]);

    // The stalled client still gets a well-formed ending once it reads
    assert_eq!(stalled.recv().await, Some(Frame::delta("a")));
    assert_eq!(
        stalled.recv().await,
        Some(Frame::error("turn timed out after 5s"))
    );
    assert_eq!(stalled.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_late_deltas_from_timed_out_turn_do_not_leak_into_next_turn() {
    let mock = MockBackend::new()
        .on_prompt("first")
        .respond_script(vec![
            MockStep::Sleep(Duration::from_secs(6)),
            MockStep::Emit(AgentEvent::Text("stale".into())),
            MockStep::Emit(AgentEvent::Result {
                text: "stale".into(),
                usage: None,
                metadata: json!({}),
            }),
        ])
        .on_prompt("second")
        .respond_script(vec![
            MockStep::Sleep(Duration::from_secs(3)),
            MockStep::Emit(AgentEvent::Text("fresh".into())),
            MockStep::Emit(AgentEvent::Result {
                text: "fresh".into(),
                usage: None,
                metadata: json!({}),
            }),
        ]);
    let config = GatewayConfig::default().with_turn_timeout(Duration::from_secs(5));
    let (gateway, _) = gateway(mock, config);
    let id = gateway.open_conversation(None).await.unwrap();

    let frames = collect(gateway.submit_turn(&id, "first").await.unwrap()).await;
    assert_eq!(frames, vec![Frame::error("turn timed out after 5s")]);

    // The first turn's "stale" arrives one second into this turn
    let frames = collect(gateway.submit_turn(&id, "second").await.unwrap()).await;
    assert_eq!(frames, vec![Frame::delta("fresh"), Frame::Done]);
}

#[tokio::test(start_paused = true)]
async fn test_deltas_never_cross_conversations() {
    let mock = MockBackend::new()
        .on_prompt("from-a")
        .paced(Duration::from_millis(10))
        .respond_deltas(&["a1", "a2", "a3"])
        .on_prompt("from-b")
        .paced(Duration::from_millis(15))
        .respond_deltas(&["b1", "b2", "b3"]);
    let (gateway, _) = gateway(mock, GatewayConfig::default());
    let a = gateway.open_conversation(None).await.unwrap();
    let b = gateway.open_conversation(None).await.unwrap();

    let stream_a = gateway.submit_turn(&a, "from-a").await.unwrap();
    let stream_b = gateway.submit_turn(&b, "from-b").await.unwrap();
    let (frames_a, frames_b) = tokio::join!(collect(stream_a), collect(stream_b));

    assert_eq!(
        frames_a,
        vec![
            Frame::delta("a1"),
            Frame::delta("a2"),
            Frame::delta("a3"),
            Frame::Done
        ]
    );
    assert_eq!(
        frames_b,
        vec![
            Frame::delta("b1"),
            Frame::delta("b2"),
            Frame::delta("b3"),
            Frame::Done
        ]
    );
}

#[tokio::test]
async fn test_back_to_back_turns_reuse_backend_session() {
    let mock = MockBackend::new()
        .on_prompt("my name is Sam")
        .respond_deltas(&["Noted."])
        .on_prompt("what is my name")
        .respond_deltas(&["Sam."]);
    let (gateway, state) = gateway(mock, GatewayConfig::default());
    let id = gateway.open_conversation(None).await.unwrap();

    collect(gateway.submit_turn(&id, "my name is Sam").await.unwrap()).await;
    collect(gateway.submit_turn(&id, "what is my name").await.unwrap()).await;

    let info = gateway.conversation_info(&id).unwrap();
    assert_eq!(info.turns, 2);
    assert_eq!(state.sessions_created(), 1);
    assert_eq!(
        state.prompts(&info.backend_session),
        vec!["my name is Sam", "what is my name"]
    );
}

#[tokio::test]
async fn test_backend_error_becomes_error_frame() {
    let mock = MockBackend::new()
        .on_prompt("explode")
        .respond_error(ErrorCode::RateLimited, "Too many requests");
    let (gateway, _) = gateway(mock, GatewayConfig::default());
    let id = gateway.open_conversation(None).await.unwrap();

    let frames = collect(gateway.submit_turn(&id, "explode").await.unwrap()).await;
    assert_eq!(frames, vec![Frame::error("Too many requests")]);
}

#[tokio::test]
async fn test_non_streaming_result_is_delivered_as_one_delta() {
    let mock = MockBackend::new()
        .on_prompt("ping")
        .respond_text("pong");
    let (gateway, _) = gateway(mock, GatewayConfig::default());
    let id = gateway.open_conversation(None).await.unwrap();

    let frames = collect(gateway.submit_turn(&id, "ping").await.unwrap()).await;
    assert_eq!(frames, vec![Frame::delta("pong"), Frame::Done]);
}

#[tokio::test]
async fn test_tool_calls_do_not_produce_frames() {
    let mock = MockBackend::new()
        .with_tools(ToolRegistry::with_defaults())
        .on_prompt("list")
        .respond_script(vec![
            MockStep::CallTool {
                name: "list_tasks".into(),
                args: json!({"status": "pending"}),
            },
            MockStep::Emit(AgentEvent::Text("One pending task.".into())),
            MockStep::Emit(AgentEvent::Result {
                text: "One pending task.".into(),
                usage: None,
                metadata: json!({}),
            }),
        ]);
    let (gateway, _) = gateway(mock, GatewayConfig::default());
    let id = gateway.open_conversation(None).await.unwrap();

    let frames = collect(gateway.submit_turn(&id, "list my tasks").await.unwrap()).await;
    assert_eq!(frames, vec![Frame::delta("One pending task."), Frame::Done]);
}

#[tokio::test]
async fn test_pre_stream_failures() {
    let mock = MockBackend::new().fail_next_sessions(1);
    let (gateway, state) = gateway(mock, GatewayConfig::default());

    let err = gateway.submit_turn("c1", "").await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest(_)));

    let huge = "x".repeat(GatewayConfig::default().max_utterance_bytes + 1);
    let err = gateway.submit_turn("c1", &huge).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest(_)));

    let err = gateway.submit_turn("c1", "hi").await.unwrap_err();
    assert!(matches!(err, GatewayError::BackendUnavailable(_)));
    assert!(gateway.conversation_info("c1").is_none());

    // The failed construction is retried from scratch
    let frames = collect(gateway.submit_turn("c1", "hi").await.unwrap()).await;
    assert_eq!(frames.last(), Some(&Frame::Done));
    assert_eq!(state.sessions_created(), 1);
}

#[tokio::test]
async fn test_unknown_conversation_when_implicit_open_disabled() {
    let config = GatewayConfig::default().with_implicit_open(false);
    let (gateway, state) = gateway(MockBackend::new(), config);

    let err = gateway.submit_turn("never-opened", "hi").await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::UnknownConversation("never-opened".to_string())
    );
    assert_eq!(state.sessions_created(), 0);

    let id = gateway.open_conversation(None).await.unwrap();
    assert!(gateway.submit_turn(&id, "hi").await.is_ok());
}

#[tokio::test]
async fn test_stats_track_conversations_and_turns() {
    let mock = MockBackend::new()
        .on_prompt("wait")
        .after(Duration::from_millis(50))
        .respond_text("done");
    let (gateway, _) = gateway(mock, GatewayConfig::default());
    let id = gateway.open_conversation(None).await.unwrap();
    gateway.open_conversation(None).await.unwrap();

    let stream = gateway.submit_turn(&id, "wait").await.unwrap();
    let stats = gateway.stats();
    assert_eq!(stats.conversations, 2);
    assert_eq!(stats.active_turns, 1);
    assert_eq!(stats.bound_sinks, 1);

    collect(stream).await;
    let stats = gateway.stats();
    assert_eq!(stats.active_turns, 0);
    assert_eq!(stats.bound_sinks, 0);
}
