//! Flag server over a real local socket.

use std::sync::Arc;
use std::time::Duration;

use flagpipe::server::listener::spawn_flag_server;
use flagpipe::{AppError, FlagClient, GlobalConfig, ServerState};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::test_helpers::recording_callback;

fn unique_config() -> GlobalConfig {
    GlobalConfig {
        ipc_name: format!("flagpipe-test-{}", Uuid::new_v4().simple()),
        request_timeout_ms: 2_000,
        ..GlobalConfig::default()
    }
}

#[tokio::test]
async fn clients_share_flags_through_the_socket() {
    let config = unique_config();
    let ct = CancellationToken::new();
    let server = spawn_flag_server(Arc::new(ServerState::new(config.clone())), ct.clone())
        .expect("server starts");

    let watcher = FlagClient::connect(&config).await.expect("watcher connects");
    let writer = FlagClient::connect(&config).await.expect("writer connects");
    let (callback, mut notifications) = recording_callback();

    watcher.subscribe_flag("flag1", callback).await.expect("subscribe");
    writer.set_flag("flag1", 1).await.expect("set");
    writer.change_flag("flag1", 2).await.expect("change");
    assert_eq!(watcher.get_flag_value("flag1").await.expect("get"), 2);

    let received = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .expect("notification within deadline")
        .expect("channel open");
    assert_eq!(received, ("flag1".to_owned(), 2));

    watcher.close().await.expect("close watcher");
    writer.close().await.expect("close writer");

    ct.cancel();
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server stops after cancellation")
        .expect("server task completes");
}

#[tokio::test]
async fn connect_without_server_is_not_connected() {
    let config = unique_config();
    let result = FlagClient::connect(&config).await;
    assert!(
        matches!(result, Err(AppError::NotConnected(_))),
        "expected NotConnected, got {result:?}"
    );
}
