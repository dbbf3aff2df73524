//! Unit tests for the framed channel over in-memory duplex streams.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use flagpipe::ipc::channel::{decode_text, FrameReader, FramedChannel};
use flagpipe::{AppError, GlobalConfig};

#[tokio::test]
async fn frames_arrive_in_order_on_the_peer() {
    let config = GlobalConfig::default();
    let (local, remote) = tokio::io::duplex(1024);
    let channel = FramedChannel::open(local, &config);
    let mut peer = FramedChannel::open(remote, &config);

    channel.sender.send_text("SET:flag1:1").await.unwrap();
    channel.sender.send_text("GET:flag1").await.unwrap();

    let first = peer.reader.read_frame().await.unwrap().unwrap();
    let second = peer.reader.read_frame().await.unwrap().unwrap();
    assert_eq!(&first[..], b"SET:flag1:1");
    assert_eq!(&second[..], b"GET:flag1");
}

#[tokio::test]
async fn dropping_every_sender_closes_the_peer() {
    let config = GlobalConfig::default();
    let (local, remote) = tokio::io::duplex(1024);
    let channel = FramedChannel::open(local, &config);
    let mut peer = FramedChannel::open(remote, &config);

    channel.sender.send_text("REMOVE:flag1").await.unwrap();
    drop(channel.sender);
    channel
        .writer
        .await
        .expect("writer task must not panic")
        .expect("writer must shut down cleanly");

    let frame = peer.reader.read_frame().await.unwrap();
    assert_eq!(frame.as_deref(), Some(&b"REMOVE:flag1"[..]), "queued frame must be flushed");
    assert!(
        peer.reader.read_frame().await.unwrap().is_none(),
        "peer must observe closure after the queue drains"
    );
}

#[tokio::test]
async fn zero_length_frame_signals_closure() {
    let (mut raw, remote) = tokio::io::duplex(64);
    let mut reader = FrameReader::new(remote, 1024);

    raw.write_all(&0u32.to_le_bytes()).await.unwrap();
    raw.write_all(&3u32.to_le_bytes()).await.unwrap();
    raw.write_all(b"SUB").await.unwrap();

    assert!(
        reader.read_frame().await.unwrap().is_none(),
        "an empty frame must read as closed, not as a payload"
    );
}

#[tokio::test]
async fn truncated_frame_at_eof_signals_closure() {
    let (mut raw, remote) = tokio::io::duplex(64);
    let mut reader = FrameReader::new(remote, 1024);

    raw.write_all(&10u32.to_le_bytes()).await.unwrap();
    raw.write_all(b"GET").await.unwrap();
    drop(raw);

    assert!(reader.read_frame().await.unwrap().is_none());
}

#[tokio::test]
async fn oversized_inbound_frame_is_a_protocol_error() {
    let (mut raw, remote) = tokio::io::duplex(64);
    let mut reader = FrameReader::new(remote, 8);

    raw.write_all(&1000u32.to_le_bytes()).await.unwrap();

    let result = reader.read_frame().await;
    assert!(matches!(result, Err(AppError::Protocol(_))), "got {result:?}");
}

#[tokio::test]
async fn concurrent_senders_never_interleave_frames() {
    let config = GlobalConfig::default();
    let (local, remote) = tokio::io::duplex(256);
    let channel = FramedChannel::open(local, &config);
    let mut peer = FramedChannel::open(remote, &config);

    let mut producers = Vec::new();
    for producer in 0..8u8 {
        let sender = channel.sender.clone();
        producers.push(tokio::spawn(async move {
            for seq in 0..50u32 {
                let payload = format!("{producer}:{seq}:{}", "x".repeat(100));
                sender.send_frame(Bytes::from(payload)).await.unwrap();
            }
        }));
    }
    drop(channel.sender);

    let mut next_seq: HashMap<u8, u32> = HashMap::new();
    for _ in 0..400 {
        let frame = peer.reader.read_frame().await.unwrap().unwrap();
        let text = decode_text(&frame).unwrap();
        let mut parts = text.splitn(3, ':');
        let producer: u8 = parts.next().unwrap().parse().unwrap();
        let seq: u32 = parts.next().unwrap().parse().unwrap();
        assert_eq!(parts.next().unwrap(), "x".repeat(100), "frame body corrupted");

        let expected = next_seq.entry(producer).or_insert(0);
        assert_eq!(seq, *expected, "frames from one producer must stay ordered");
        *expected += 1;
    }

    for producer in producers {
        producer.await.unwrap();
    }
    assert!(peer.reader.read_frame().await.unwrap().is_none());
}

#[tokio::test]
async fn send_after_writer_stops_reports_not_connected() {
    let config = GlobalConfig::default();
    let (local, remote) = tokio::io::duplex(64);
    let channel = FramedChannel::open(local, &config);
    let sender = channel.sender.clone();
    drop(remote);

    // The first write to a dropped peer fails and stops the writer.
    let _ = sender.send_text("GET:a").await;
    let _ = channel.writer.await;

    let result = sender.send_text("GET:b").await;
    assert!(matches!(result, Err(AppError::NotConnected(_))), "got {result:?}");
    assert!(sender.is_closed());
}

#[test]
fn decode_text_trims_trailing_nul_padding() {
    assert_eq!(decode_text(b"NOTIFY:flag1:2\0\0\0").unwrap(), "NOTIFY:flag1:2");
}

#[test]
fn decode_text_rejects_invalid_utf8() {
    assert!(matches!(
        decode_text(&[0x47, 0xff, 0xfe]),
        Err(AppError::Protocol(_))
    ));
}

#[tokio::test]
async fn try_send_reports_full_queue_without_waiting() {
    let config = GlobalConfig {
        outbound_queue_depth: 1,
        ..GlobalConfig::default()
    };
    let (local, _remote) = tokio::io::duplex(1024);
    let channel = FramedChannel::open(local, &config);

    channel.sender.try_send_text("NOTIFY:flag1:1").unwrap();
    assert!(
        matches!(
            channel.sender.try_send_text("NOTIFY:flag1:2"),
            Err(AppError::Ipc(_))
        ),
        "second frame must not fit a queue of depth 1 before the writer runs"
    );
}

#[tokio::test]
async fn try_send_after_writer_stops_is_not_connected() {
    let config = GlobalConfig::default();
    let (local, _remote) = tokio::io::duplex(1024);
    let channel = FramedChannel::open(local, &config);

    channel.writer.abort();
    let _ = channel.writer.await;

    assert!(matches!(
        channel.sender.try_send_text("NOTIFY:flag1:1"),
        Err(AppError::NotConnected(_))
    ));
}
