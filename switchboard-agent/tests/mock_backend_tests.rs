use serde_json::json;
use std::time::Duration;
use switchboard_agent::backends::mock::{MockBackend, MockStep};
use switchboard_agent::{AgentEvent, ErrorCode, SessionOptions, ToolRegistry};

async fn collect(mut receiver: switchboard_agent::EventReceiver) -> Vec<AgentEvent> {
    let mut events = vec![];
    while let Some(e) = receiver.recv().await {
        events.push(e);
    }
    events
}

#[tokio::test]
async fn test_mock_backend_returns_configured_text_response() {
    let handle = MockBackend::new()
        .on_prompt("hello")
        .respond_text("Hi there!")
        .into_handle();
    let session_id = handle.new_session(&SessionOptions::default()).await.unwrap();

    let mut receiver = handle.prompt(&session_id, "hello").await.unwrap();
    match receiver.recv().await.unwrap() {
        AgentEvent::Result { text, .. } => assert_eq!(text, "Hi there!"),
        other => panic!("Expected Result event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_respond_deltas_streams_then_concatenates() {
    let handle = MockBackend::new()
        .on_prompt("greet")
        .respond_deltas(&["Hel", "lo"])
        .into_handle();
    let session_id = handle.new_session(&SessionOptions::default()).await.unwrap();

    let events = collect(handle.prompt(&session_id, "greet me").await.unwrap()).await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], AgentEvent::Text("Hel".into()));
    assert_eq!(events[1], AgentEvent::Text("lo".into()));
    assert!(matches!(&events[2], AgentEvent::Result { text, .. } if text == "Hello"));
}

#[tokio::test]
async fn test_mock_backend_error_response() {
    let handle = MockBackend::new()
        .on_prompt("fail")
        .respond_error(ErrorCode::RateLimited, "Too many requests")
        .into_handle();
    let session_id = handle.new_session(&SessionOptions::default()).await.unwrap();

    let events = collect(handle.prompt(&session_id, "fail").await.unwrap()).await;
    assert!(matches!(
        &events[0],
        AgentEvent::Error { code: ErrorCode::RateLimited, message, .. } if message == "Too many requests"
    ));
}

#[tokio::test]
async fn test_expectations_are_consumed_in_order() {
    let handle = MockBackend::new()
        .on_prompt("q")
        .respond_text("first")
        .on_prompt("q")
        .respond_text("second")
        .into_handle();
    let session_id = handle.new_session(&SessionOptions::default()).await.unwrap();

    for expected in ["first", "second"] {
        let events = collect(handle.prompt(&session_id, "q").await.unwrap()).await;
        assert!(matches!(&events[0], AgentEvent::Result { text, .. } if text == expected));
    }
}

#[tokio::test]
async fn test_non_front_expectation_still_matches() {
    let handle = MockBackend::new()
        .on_prompt("alpha")
        .respond_text("A")
        .on_prompt("beta")
        .respond_text("B")
        .into_handle();
    let session_id = handle.new_session(&SessionOptions::default()).await.unwrap();

    let events = collect(handle.prompt(&session_id, "beta").await.unwrap()).await;
    assert!(matches!(&events[0], AgentEvent::Result { text, .. } if text == "B"));
    let events = collect(handle.prompt(&session_id, "alpha").await.unwrap()).await;
    assert!(matches!(&events[0], AgentEvent::Result { text, .. } if text == "A"));
}

#[tokio::test]
async fn test_state_records_sessions_and_prompts() {
    let mock = MockBackend::new();
    let state = mock.state();
    let handle = mock.into_handle();

    let options = SessionOptions::default().with_model("test-model");
    let a = handle.new_session(&options).await.unwrap();
    let b = handle.new_session(&SessionOptions::default()).await.unwrap();
    assert_ne!(a, b);

    collect(handle.prompt(&a, "one").await.unwrap()).await;
    collect(handle.prompt(&a, "two").await.unwrap()).await;
    collect(handle.prompt(&b, "three").await.unwrap()).await;

    assert_eq!(state.sessions_created(), 2);
    assert_eq!(state.prompts(&a), vec!["one", "two"]);
    assert_eq!(state.total_prompts(), 3);
    assert_eq!(state.completed_prompts(), 3);
    assert_eq!(
        state.session_options(&a).unwrap().model.as_deref(),
        Some("test-model")
    );
}

#[tokio::test]
async fn test_fail_next_sessions() {
    let handle = MockBackend::new().fail_next_sessions(1).into_handle();

    assert!(handle.new_session(&SessionOptions::default()).await.is_err());
    assert!(handle.new_session(&SessionOptions::default()).await.is_ok());
}

#[tokio::test]
async fn test_call_tool_step_runs_registry_tool() {
    let handle = MockBackend::new()
        .with_tools(ToolRegistry::with_defaults())
        .on_prompt("task")
        .respond_script(vec![
            MockStep::CallTool {
                name: "perform_task".into(),
                args: json!({"taskName": "Backup", "instructions": "Copy files"}),
            },
            MockStep::Emit(AgentEvent::Text("Done.".into())),
        ])
        .into_handle();
    let session_id = handle.new_session(&SessionOptions::default()).await.unwrap();

    let events = collect(handle.prompt(&session_id, "task please").await.unwrap()).await;
    assert!(matches!(&events[0], AgentEvent::ToolStart { name, .. } if name == "perform_task"));
    match &events[1] {
        AgentEvent::ToolEnd { output, success, .. } => {
            assert!(success);
            assert_eq!(output["status"], "completed");
            assert_eq!(output["priority"], "medium");
        }
        other => panic!("Expected ToolEnd, got {:?}", other),
    }
    assert_eq!(events[2], AgentEvent::Text("Done.".into()));
}

#[tokio::test]
async fn test_call_tool_with_invalid_args_reports_failure() {
    let handle = MockBackend::new()
        .with_tools(ToolRegistry::with_defaults())
        .on_prompt("bad")
        .respond_script(vec![MockStep::CallTool {
            name: "perform_task".into(),
            args: json!({"instructions": "no name"}),
        }])
        .into_handle();
    let session_id = handle.new_session(&SessionOptions::default()).await.unwrap();

    let events = collect(handle.prompt(&session_id, "bad").await.unwrap()).await;
    match &events[1] {
        AgentEvent::ToolEnd { output, success, .. } => {
            assert!(!success);
            assert!(output["error"].as_str().unwrap().contains("taskName"));
        }
        other => panic!("Expected ToolEnd, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_a_paced_script() {
    let mock = MockBackend::new()
        .on_prompt("long")
        .paced(Duration::from_secs(1))
        .respond_deltas(&["a", "b", "c", "d"]);
    let state = mock.state();
    let handle = mock.into_handle();
    let session_id = handle.new_session(&SessionOptions::default()).await.unwrap();

    let mut receiver = handle.prompt(&session_id, "long").await.unwrap();
    assert_eq!(receiver.recv().await.unwrap(), AgentEvent::Text("a".into()));
    handle.cancel(&session_id).await.unwrap();

    let rest = collect(receiver).await;
    assert!(matches!(
        rest.last().unwrap(),
        AgentEvent::Error { code: ErrorCode::Cancelled, .. }
    ));
    assert_eq!(state.cancellations(), 1);
    assert_eq!(state.completed_prompts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_prompt_does_not_block_other_sessions() {
    let handle = MockBackend::new()
        .on_prompt("slow")
        .after(Duration::from_secs(60))
        .respond_text("late")
        .on_prompt("fast")
        .respond_text("quick")
        .into_handle();
    let slow = handle.new_session(&SessionOptions::default()).await.unwrap();
    let fast = handle.new_session(&SessionOptions::default()).await.unwrap();

    let _slow_rx = handle.prompt(&slow, "slow").await.unwrap();
    let events = tokio::time::timeout(
        Duration::from_secs(1),
        collect(handle.prompt(&fast, "fast").await.unwrap()),
    )
    .await
    .expect("fast prompt should not wait behind the slow one");
    assert!(matches!(&events[0], AgentEvent::Result { text, .. } if text == "quick"));
}
