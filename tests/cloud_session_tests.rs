use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use voxstream::protocol::binary::{self, flags, Compression, MessageType, Serialization};
use voxstream::protocol::gzip;
use voxstream::protocol::messages::ResultMessage;
use voxstream::{
    CloudSession, CloudSessionConfig, SessionEvent, SpeechSession, TranscriptAccumulator,
};

fn parse_result(json: &str) -> ResultMessage {
    serde_json::from_str(json).unwrap()
}

#[test]
fn test_definite_segment_confirms_and_pins_prefix() {
    let mut acc = TranscriptAccumulator::new();

    // A settled segment confirms on its own
    let first = acc.merge_result(&parse_result(
        r#"{"text":"A","utterances":[{"text":"A","definite":true}]}"#,
    ));
    assert_eq!(first.as_deref(), Some("A"));
    assert_eq!(acc.confirmed(), "A");

    // A provisional follow-up displays after the confirmed prefix
    let second = acc.merge_result(&parse_result(
        r#"{"text":"B","utterances":[{"text":"B","definite":false}]}"#,
    ));
    assert_eq!(second.as_deref(), Some("AB"));
    assert_eq!(acc.confirmed(), "A");
    assert_eq!(acc.final_text(), "AB");
}

#[test]
fn test_multiple_definite_segments_confirm_in_arrival_order() {
    let mut acc = TranscriptAccumulator::new();

    let update = acc.merge_result(&parse_result(
        r#"{"text":"","utterances":[{"text":"one ","definite":true},{"text":"two","definite":true}]}"#,
    ));
    assert_eq!(update.as_deref(), Some("one two"));
    assert_eq!(acc.confirmed(), "one two");
}

#[test]
fn test_duplicate_hypothesis_not_re_emitted() {
    let mut acc = TranscriptAccumulator::new();

    assert_eq!(acc.merge_hypothesis("hel").as_deref(), Some("hel"));
    assert_eq!(acc.merge_hypothesis("hel"), None);
    assert_eq!(acc.merge_hypothesis("hello").as_deref(), Some("hello"));
}

// --- mock server plumbing ---

async fn bind_cloud() -> (TcpListener, CloudSessionConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = CloudSessionConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..CloudSessionConfig::default()
    };
    (listener, config)
}

/// Read client frames until the end-of-stream sentinel (or EOF) arrives.
async fn read_until_end(stream: &mut TcpStream) -> Vec<binary::ClientFrame> {
    let mut buf = Vec::new();
    let mut frames = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match binary::decode_client_frame(&buf) {
            Ok(Some((frame, consumed))) => {
                buf.drain(..consumed);
                let end = frame.is_end_of_stream();
                frames.push(frame);
                if end {
                    return frames;
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => panic!("server saw malformed client frame: {e}"),
        }
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return frames;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn result_frame(sequence: u32, json: &str) -> Vec<u8> {
    let body = gzip::compress(json.as_bytes()).unwrap();
    binary::encode_server_result(
        0,
        Serialization::Json,
        Compression::Gzip,
        Some(sequence),
        &body,
    )
}

fn final_frame(sequence: u32, json: &str) -> Vec<u8> {
    let body = gzip::compress(json.as_bytes()).unwrap();
    binary::encode_server_result(
        flags::IS_LAST,
        Serialization::Json,
        Compression::Gzip,
        Some(sequence),
        &body,
    )
}

async fn collect_events(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
    })
    .await
    .expect("session did not reach a terminal state in time");
    events
}

// --- session behavior against a live socket ---

#[tokio::test]
async fn test_streams_config_then_audio_in_feed_order() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let frames = read_until_end(&mut stream).await;
        stream
            .write_all(&final_frame(1, r#"{"text":"ok"}"#))
            .await
            .unwrap();
        frames
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;

    session.feed(vec![1, 1, 1]);
    session.feed(vec![2, 2]);
    session.feed(Vec::new()); // ignored, produces no frame
    session.end();

    let events = collect_events(&mut events_rx).await;
    let frames = server.await?;

    assert_eq!(frames.len(), 4); // config, two audio chunks, end sentinel

    assert_eq!(frames[0].message_type, MessageType::ClientConfig);
    let config_json = gzip::decompress(&frames[0].payload)?;
    let parsed: serde_json::Value = serde_json::from_slice(&config_json)?;
    assert_eq!(parsed["audio"]["format"], "pcm");
    assert_eq!(parsed["audio"]["rate"], 16000);
    assert!(parsed["request"]["session_id"].is_string());
    // The default empty boost list stays off the wire entirely
    assert!(parsed["request"].get("boost_words").is_none());

    assert_eq!(frames[1].message_type, MessageType::ClientAudio);
    assert_eq!(gzip::decompress(&frames[1].payload)?, vec![1, 1, 1]);
    assert_eq!(gzip::decompress(&frames[2].payload)?, vec![2, 2]);
    assert!(frames[3].is_end_of_stream());

    assert_eq!(
        events,
        vec![SessionEvent::Final {
            text: "ok".to_string()
        }]
    );

    let stats = session.stats();
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.bytes_sent, 5);
    assert_eq!(stats.results_received, 1);
    assert!(!session.is_active());
    Ok(())
}

#[tokio::test]
async fn test_boost_words_flow_into_the_config_frame() -> Result<()> {
    let (listener, config) = bind_cloud().await;
    let config = CloudSessionConfig {
        boost_words: vec!["hippocampus".to_string(), "amygdala".to_string()],
        ..config
    };

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let frames = read_until_end(&mut stream).await;
        stream
            .write_all(&final_frame(1, r#"{"text":"ok"}"#))
            .await
            .unwrap();
        frames
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.end();

    let _ = collect_events(&mut events_rx).await;
    let frames = server.await?;

    assert_eq!(frames[0].message_type, MessageType::ClientConfig);
    let config_json = gzip::decompress(&frames[0].payload)?;
    let parsed: serde_json::Value = serde_json::from_slice(&config_json)?;
    assert_eq!(
        parsed["request"]["boost_words"],
        serde_json::json!(["hippocampus", "amygdala"])
    );
    Ok(())
}

#[tokio::test]
async fn test_partials_arrive_in_order_before_final() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_until_end(&mut stream).await;
        stream
            .write_all(&result_frame(1, r#"{"text":"hel"}"#))
            .await
            .unwrap();
        stream
            .write_all(&result_frame(2, r#"{"text":"hello"}"#))
            .await
            .unwrap();
        stream
            .write_all(&final_frame(3, r#"{"text":"hello world"}"#))
            .await
            .unwrap();
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![0; 320]);
    session.end();

    let events = collect_events(&mut events_rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Partial {
                text: "hel".to_string()
            },
            SessionEvent::Partial {
                text: "hello".to_string()
            },
            SessionEvent::Final {
                text: "hello world".to_string()
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_definite_segments_confirm_over_the_wire() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_until_end(&mut stream).await;
        stream
            .write_all(&result_frame(
                1,
                r#"{"text":"A","utterances":[{"text":"A","definite":true}]}"#,
            ))
            .await
            .unwrap();
        stream
            .write_all(&result_frame(
                2,
                r#"{"text":"B","utterances":[{"text":"B","definite":false}]}"#,
            ))
            .await
            .unwrap();
        // The final's text covers only the still-unsettled tail
        stream
            .write_all(&final_frame(3, r#"{"text":"B"}"#))
            .await
            .unwrap();
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![0; 320]);
    session.end();

    let events = collect_events(&mut events_rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Partial {
                text: "A".to_string()
            },
            SessionEvent::Partial {
                text: "AB".to_string()
            },
            SessionEvent::Final {
                text: "AB".to_string()
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_repeated_text_emits_once_but_final_always_fires() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_until_end(&mut stream).await;
        stream
            .write_all(&result_frame(1, r#"{"text":"same"}"#))
            .await
            .unwrap();
        stream
            .write_all(&result_frame(2, r#"{"text":"same"}"#))
            .await
            .unwrap();
        stream
            .write_all(&final_frame(3, r#"{"text":"same"}"#))
            .await
            .unwrap();
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![0; 320]);
    session.end();

    let events = collect_events(&mut events_rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Partial {
                text: "same".to_string()
            },
            SessionEvent::Final {
                text: "same".to_string()
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_negative_sequence_finalizes_the_session() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_until_end(&mut stream).await;
        stream
            .write_all(&result_frame(1, r#"{"text":"almost"}"#))
            .await
            .unwrap();
        // Some servers mark the final with a negated sequence instead of
        // the is-last flag
        let body = gzip::compress(br#"{"text":"almost there"}"#).unwrap();
        let negative_final = binary::encode_server_result(
            flags::NEGATIVE_SEQUENCE,
            Serialization::Json,
            Compression::Gzip,
            Some(2),
            &body,
        );
        stream.write_all(&negative_final).await.unwrap();
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![0; 320]);
    session.end();

    let events = collect_events(&mut events_rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Partial {
                text: "almost".to_string()
            },
            SessionEvent::Final {
                text: "almost there".to_string()
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_final_payload_uses_accumulated_text() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_until_end(&mut stream).await;
        stream
            .write_all(&result_frame(1, r#"{"text":"hello"}"#))
            .await
            .unwrap();
        let empty_final = binary::encode_server_result(
            flags::IS_LAST,
            Serialization::Json,
            Compression::None,
            None,
            &[],
        );
        stream.write_all(&empty_final).await.unwrap();
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![0; 320]);
    session.end();

    let events = collect_events(&mut events_rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Partial {
                text: "hello".to_string()
            },
            SessionEvent::Final {
                text: "hello".to_string()
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_clean_close_finalizes_with_accumulated_text() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_until_end(&mut stream).await;
        stream
            .write_all(&result_frame(1, r#"{"text":"half done"}"#))
            .await
            .unwrap();
        // Close without ever sending a final marker
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![0; 320]);
    session.end();

    let events = collect_events(&mut events_rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Partial {
                text: "half done".to_string()
            },
            SessionEvent::Final {
                text: "half done".to_string()
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_server_error_frame_fails_the_session() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_until_end(&mut stream).await;
        stream
            .write_all(&binary::encode_server_error(503, "backend unavailable", None))
            .await
            .unwrap();
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![0; 320]);
    session.end();

    let events = collect_events(&mut events_rx).await;
    assert_eq!(
        events,
        vec![SessionEvent::Error {
            message: "Server error 503: backend unavailable".to_string()
        }]
    );
    assert!(!session.is_active());
    Ok(())
}

#[tokio::test]
async fn test_corrupt_result_payload_is_dropped_not_fatal() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_until_end(&mut stream).await;
        // Claims gzip but is not
        let corrupt = binary::encode_server_result(
            0,
            Serialization::Json,
            Compression::Gzip,
            Some(1),
            b"not gzip",
        );
        stream.write_all(&corrupt).await.unwrap();
        stream
            .write_all(&result_frame(2, r#"{"text":"recovered"}"#))
            .await
            .unwrap();
        stream
            .write_all(&final_frame(3, r#"{"text":"recovered"}"#))
            .await
            .unwrap();
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![0; 320]);
    session.end();

    let events = collect_events(&mut events_rx).await;
    assert_eq!(
        events,
        vec![
            SessionEvent::Partial {
                text: "recovered".to_string()
            },
            SessionEvent::Final {
                text: "recovered".to_string()
            },
        ]
    );

    // Every decoded result frame counts, dropped payload or not
    assert_eq!(session.stats().results_received, 3);
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_fails_the_session() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_until_end(&mut stream).await;
        stream
            .write_all(&result_frame(1, r#"{"text":"ok"}"#))
            .await
            .unwrap();
        stream.write_all(&[0xff; 8]).await.unwrap();
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![0; 320]);
    session.end();

    let events = collect_events(&mut events_rx).await;
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        SessionEvent::Partial {
            text: "ok".to_string()
        }
    );
    match &events[1] {
        SessionEvent::Error { message } => {
            assert!(
                message.starts_with("Malformed server frame"),
                "unexpected error message: {message}"
            );
        }
        other => panic!("expected a terminal error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_connection_refused_reports_single_error() -> Result<()> {
    // Bind then drop to get a port with nothing listening
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let mut session = CloudSession::new(CloudSessionConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..CloudSessionConfig::default()
    });
    let mut events_rx = session.start().await?;
    session.feed(vec![0; 320]); // buffered, then discarded with the failure

    let events = collect_events(&mut events_rx).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        SessionEvent::Error { message } => {
            assert!(
                message.contains("Failed to connect"),
                "unexpected error message: {message}"
            );
        }
        other => panic!("expected a terminal error, got {:?}", other),
    }
    assert!(!session.is_active());
    Ok(())
}

#[tokio::test]
async fn test_cancel_suppresses_all_events() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // Hold the connection and wait for the client to drop it
        let mut sink = [0u8; 1024];
        loop {
            match stream.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![9; 160]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.cancel();

    let events = collect_events(&mut events_rx).await;
    assert!(events.is_empty(), "cancel must suppress every event");
    assert!(!session.is_active());

    // Everything after cancel is a no-op
    session.feed(vec![1]);
    session.end();
    session.cancel();

    // The transport should be torn down promptly
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server never saw the connection close")?;
    Ok(())
}

#[tokio::test]
async fn test_feed_after_end_sends_nothing() -> Result<()> {
    let (listener, config) = bind_cloud().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let frames = read_until_end(&mut stream).await;

        // Nothing may follow the end sentinel
        let mut byte = [0u8; 1];
        let extra = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut byte)).await;
        assert!(
            matches!(extra, Err(_) | Ok(Ok(0))),
            "client sent data after end-of-stream"
        );

        stream
            .write_all(&final_frame(1, r#"{"text":"done"}"#))
            .await
            .unwrap();
        frames
    });

    let mut session = CloudSession::new(config);
    let mut events_rx = session.start().await?;
    session.feed(vec![4, 4]);
    session.end();
    session.feed(vec![5, 5, 5]); // ignored

    let events = collect_events(&mut events_rx).await;
    let frames = server.await?;

    assert_eq!(frames.len(), 3); // config, one audio chunk, end sentinel
    assert!(frames[2].is_end_of_stream());
    assert_eq!(
        events,
        vec![SessionEvent::Final {
            text: "done".to_string()
        }]
    );
    assert_eq!(session.stats().frames_sent, 1);
    Ok(())
}

#[tokio::test]
async fn test_second_start_is_rejected() -> Result<()> {
    let (_listener, config) = bind_cloud().await;

    let mut session = CloudSession::new(config);
    let _events_rx = session.start().await?;
    assert!(session.start().await.is_err());
    Ok(())
}

#[test]
fn test_feed_and_end_before_start_are_noops() {
    let mut session = CloudSession::new(CloudSessionConfig::default());

    session.feed(vec![1, 2]);
    session.end();

    assert!(!session.is_active());
    let stats = session.stats();
    assert_eq!(stats.backend, "cloud");
    assert_eq!(stats.frames_sent, 0);
    assert!(stats.started_at.is_none());
}
