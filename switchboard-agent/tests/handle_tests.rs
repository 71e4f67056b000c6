use switchboard_agent::handle::{AgentHandle, EventReceiver};
use switchboard_agent::{AgentEvent, SessionOptions};
use tokio::sync::mpsc;

fn assert_send<T: Send>() {}
fn assert_sync<T: Sync>() {}

#[test]
fn test_agent_handle_is_send_sync() {
    assert_send::<AgentHandle>();
    assert_sync::<AgentHandle>();
}

#[test]
fn test_event_receiver_is_send() {
    assert_send::<EventReceiver>();
}

#[tokio::test]
async fn test_event_receiver_receives_events() {
    let (tx, rx) = mpsc::channel(32);
    let mut receiver = EventReceiver::new(rx);

    tx.send(AgentEvent::Text("hello".to_string())).await.unwrap();
    tx.send(AgentEvent::Text("world".to_string())).await.unwrap();
    drop(tx);

    let event1 = receiver.recv().await.unwrap();
    assert!(matches!(event1, AgentEvent::Text(s) if s == "hello"));

    let event2 = receiver.recv().await.unwrap();
    assert!(matches!(event2, AgentEvent::Text(s) if s == "world"));

    assert!(receiver.recv().await.is_none());
}

#[tokio::test]
async fn test_handle_errors_when_worker_is_gone() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let handle = AgentHandle::new(tx, "gone");

    let err = handle
        .new_session(&SessionOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Backend worker closed"));
    assert!(handle.prompt("s", "hi").await.is_err());
    assert!(handle.cancel("s").await.is_err());
}
