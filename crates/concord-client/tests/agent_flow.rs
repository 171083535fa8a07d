//! Agent client against a real hub: connect, broadcast, and brain-state
//! recovery across a simulated crash.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;

use concord_server::api::api_router;
use concord_server::config::ServerConfig;
use concord_server::hub::stream_router;
use concord_server::state::AppState;
use concord_store::agents::new_profile;
use concord_store::Database;

use concord_client::{AgentClient, AgentEvent, ClientConfig};

/// Boot a hub with agents 10 and 11 registered; returns the two base
/// addresses.
async fn start_hub() -> (SocketAddr, SocketAddr) {
    let db = Database::open_in_memory().unwrap();
    db.create_agent(&new_profile(10, "analyst", "ana", "apollo"))
        .unwrap();
    db.create_agent(&new_profile(11, "builder", "bob", "apollo"))
        .unwrap();

    let state = AppState::new(db, ServerConfig::default());

    let stream_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stream_addr = stream_listener.local_addr().unwrap();
    let api_addr = api_listener.local_addr().unwrap();

    let stream_app =
        stream_router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();
    let api_app = api_router(state).into_make_service_with_connect_info::<SocketAddr>();

    tokio::spawn(async move {
        axum::serve(stream_listener, stream_app).await.unwrap();
    });
    tokio::spawn(async move {
        axum::serve(api_listener, api_app).await.unwrap();
    });

    (stream_addr, api_addr)
}

fn client_config(
    ai_id: i64,
    name: &str,
    stream_addr: SocketAddr,
    api_addr: SocketAddr,
    data_dir: &std::path::Path,
) -> ClientConfig {
    ClientConfig::new(ai_id, name, name)
        .with_api_base(&format!("http://{api_addr}"))
        .with_stream_url(&format!("ws://{stream_addr}/ws"))
        .with_data_dir(data_dir.join(ai_id.to_string()))
}

async fn wait_for<F>(events: &mut tokio::sync::broadcast::Receiver<AgentEvent>, mut pred: F) -> AgentEvent
where
    F: FnMut(&AgentEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_clients_exchange_an_insight() {
    let (stream_addr, api_addr) = start_hub().await;
    let dir = tempfile::tempdir().unwrap();

    let client_a = AgentClient::new(client_config(10, "analyst", stream_addr, api_addr, dir.path()))
        .unwrap();
    let client_b = AgentClient::new(client_config(11, "builder", stream_addr, api_addr, dir.path()))
        .unwrap();

    let mut events_a = client_a.subscribe();
    let mut events_b = client_b.subscribe();
    let sender_a = client_a.sender();
    let shutdown_a = client_a.shutdown_handle();
    let shutdown_b = client_b.shutdown_handle();

    let task_a = tokio::spawn(client_a.run());
    let task_b = tokio::spawn(client_b.run());

    wait_for(&mut events_a, |e| matches!(e, AgentEvent::Connected { .. })).await;
    wait_for(&mut events_b, |e| matches!(e, AgentEvent::Connected { .. })).await;

    sender_a
        .send(concord_shared::Frame::Insight {
            ai_id: concord_shared::types::AgentId(10),
            content: json!("found the root cause"),
            metadata: Some(json!({"confidence": "high"})),
            conversation_id: None,
        })
        .await
        .unwrap();

    let event = wait_for(&mut events_b, |e| matches!(e, AgentEvent::NewMessage { .. })).await;
    match event {
        AgentEvent::NewMessage {
            sender_id,
            content,
            metadata,
            message_type,
            ..
        } => {
            assert_eq!(sender_id, concord_shared::types::AgentId(10));
            assert_eq!(content, "found the root cause");
            assert_eq!(metadata, json!({"confidence": "high"}));
            assert_eq!(message_type, concord_shared::types::MessageType::Insight);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let _ = shutdown_a.send(());
    let _ = shutdown_b.send(());
    task_a.await.unwrap().unwrap();
    task_b.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn brain_state_survives_a_crash_and_restart() {
    let (stream_addr, api_addr) = start_hub().await;
    let dir = tempfile::tempdir().unwrap();
    let config = client_config(10, "analyst", stream_addr, api_addr, dir.path());

    // First life: connect, checkpoint meaningful work, shut down.
    {
        let client = AgentClient::new(config.clone()).unwrap();
        let mut events = client.subscribe();
        let brain = client.brain();
        let shutdown = client.shutdown_handle();
        let task = tokio::spawn(client.run());

        wait_for(&mut events, |e| matches!(e, AgentEvent::Connected { .. })).await;

        brain
            .lock()
            .save_with(|s| {
                s.current_task = "T1".into();
                s.cycle_count = 5;
            })
            .unwrap();

        let _ = shutdown.send(());
        task.await.unwrap().unwrap();
    }

    // Second life: the client resumes with the checkpointed task and a
    // cycle count at least as high.
    {
        let client = AgentClient::new(config).unwrap();
        let mut events = client.subscribe();
        let brain = client.brain();
        let shutdown = client.shutdown_handle();
        let task = tokio::spawn(client.run());

        wait_for(&mut events, |e| matches!(e, AgentEvent::Connected { .. })).await;

        {
            let brain = brain.lock();
            assert_eq!(brain.state().current_task, "T1");
            assert!(brain.state().cycle_count >= 5);
        }

        let _ = shutdown.send(());
        task.await.unwrap().unwrap();
    }
}
