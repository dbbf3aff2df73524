//! Connection loss on either side of the channel.

use std::time::Duration;

use flagpipe::AppError;

use super::test_helpers::{client_with_silent_peer, recording_callback, wait_until, TestServer};

const DETECT_WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn in_flight_request_fails_when_peer_closes() {
    let (client, mut peer) = client_with_silent_peer(5_000);

    let request = client.get_flag_value("flag1");
    let close_peer = async move {
        // Once the request frame is read the waiter is registered.
        let frame = peer.reader.read_frame().await.expect("read").expect("frame");
        assert_eq!(&frame[..], b"GET:flag1");
        drop(peer);
    };

    let (result, ()) = tokio::join!(request, close_peer);
    assert!(
        matches!(result, Err(AppError::NotConnected(_))),
        "expected NotConnected, got {result:?}"
    );
}

#[tokio::test]
async fn requests_after_disconnect_fail_immediately() {
    let (client, peer) = client_with_silent_peer(5_000);
    drop(peer);

    assert!(wait_until(DETECT_WAIT, || !client.is_connected()).await);
    assert!(matches!(
        client.set_flag("flag1", 1).await,
        Err(AppError::NotConnected(_))
    ));
}

#[tokio::test]
async fn server_shutdown_disconnects_clients() {
    let server = TestServer::new();
    let client = server.client();
    client.set_flag("flag1", 1).await.expect("set");

    server.ct.cancel();

    assert!(wait_until(DETECT_WAIT, || !client.is_connected()).await);
    assert!(matches!(
        client.get_flag_value("flag1").await,
        Err(AppError::NotConnected(_))
    ));
}

#[tokio::test]
async fn closed_client_is_dropped_from_subscriptions() {
    let server = TestServer::new();
    let watcher = server.client();
    let writer = server.client();
    let (callback, _notifications) = recording_callback();

    watcher.subscribe_flag("flag1", callback).await.expect("subscribe");
    assert_eq!(server.state.subscriptions.subscriber_count("flag1"), 1);

    watcher.close().await.expect("close");

    let subscriptions = std::sync::Arc::clone(&server.state.subscriptions);
    assert!(
        wait_until(DETECT_WAIT, || subscriptions.subscriber_count("flag1") == 0).await,
        "session end must remove its subscriptions"
    );
    writer.change_flag("flag1", 2).await.expect("change after watcher left");
}

#[tokio::test]
async fn server_ignores_garbage_and_keeps_serving() {
    let server = TestServer::new();
    let mut raw = server.raw_session(4096);

    raw.sender.send_frame(bytes::Bytes::from_static(&[0xff, 0xfe])).await.unwrap();
    raw.sender.send_text("PING:flag1").await.unwrap();
    raw.sender.send_text("GET:flag1").await.unwrap();

    let mut replies = Vec::new();
    for _ in 0..3 {
        let frame = raw.reader.read_frame().await.unwrap().expect("reply");
        replies.push(String::from_utf8(frame.to_vec()).unwrap());
    }
    assert_eq!(
        replies,
        vec![
            "ERROR:request is not valid utf-8".to_owned(),
            "ERROR:unknown command 'PING'".to_owned(),
            "ERROR:GET:flag1:flag flag1 not found".to_owned(),
        ]
    );
}

#[tokio::test]
async fn subscriber_that_stops_reading_does_not_stall_other_sessions() {
    let server = TestServer::new();
    let mut stalled = server.raw_session(256);
    let writer = server.client();

    stalled.sender.send_text("SUB:flag1").await.unwrap();
    let reply = stalled.reader.read_frame().await.unwrap().expect("SUB reply");
    assert_eq!(&reply[..], b"SUCCESS:SUB:flag1");
    // From here on the stalled connection never reads.

    for value in 0..=255u8 {
        writer
            .change_flag("flag1", value)
            .await
            .unwrap_or_else(|err| panic!("CHANGE {value} must not block: {err}"));
    }
    assert!(
        matches!(
            writer.get_flag_value("other").await,
            Err(AppError::Command(ref msg)) if msg.contains("not found")
        ),
        "unrelated requests on the writing connection stay responsive"
    );

    let subscriptions = std::sync::Arc::clone(&server.state.subscriptions);
    assert!(
        wait_until(DETECT_WAIT, || subscriptions.subscriber_count("flag1") == 0).await,
        "lagging subscriber must be dropped"
    );

    // The lagging connection is closed once its buffered frames are read.
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(Some(_)) = stalled.reader.read_frame().await {}
    })
    .await;
    assert!(drained.is_ok(), "lagging connection must be closed by the server");
}
