//! The two byte pumps of a streaming connection.
//!
//! Both pumps are generic over the socket halves so they can be driven by
//! in-memory streams in tests. They always finish with an error describing
//! why they stopped; [`StreamError::is_expected`] separates normal endings
//! from failures.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use protocol::{InboundFrame, OutboundFrame, ProtocolError, OUTPUT_CHUNK_SIZE};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::error::StreamError;
use crate::session::Session;

/// Write half of a connection, shared by both pumps and the controller.
pub type SharedSink<Si> = Arc<Mutex<Si>>;

/// Sends one message to the client.
pub async fn send<Si>(sink: &Mutex<Si>, message: Message) -> Result<(), StreamError>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    sink.lock()
        .await
        .send(message)
        .await
        .map_err(|e| StreamError::Transport(e.to_string()))
}

/// Client to session: decodes frames and applies them.
pub async fn inbound<St, E, Si>(
    session: Arc<Session>,
    mut stream: St,
    sink: SharedSink<Si>,
    cancel: CancellationToken,
) -> Result<(), StreamError>
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let exit = session.exit_signal();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            next = stream.next() => next,
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(_))) => {
                return Err(ProtocolError::UnsupportedMessage("binary").into());
            }
            Some(Ok(Message::Close(_))) => return Err(StreamError::Closed),
            // Control frames are answered by the WebSocket layer.
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Err(e)) => {
                tracing::debug!(session_id = %session.id(), error = %e, "Socket read failed");
                return Err(StreamError::EndOfStream);
            }
            None => return Err(StreamError::EndOfStream),
        };

        match InboundFrame::decode(text.as_bytes())? {
            InboundFrame::Input(data) => {
                if data.is_empty() {
                    continue;
                }
                let written = tokio::select! {
                    _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                    written = session.write_all(&data) => written,
                };
                if let Err(e) = written {
                    if exit.has_fired() {
                        tracing::debug!(session_id = %session.id(), error = %e, "Input dropped after process exit");
                    } else {
                        tracing::warn!(session_id = %session.id(), error = %e, "Failed to write input");
                    }
                }
            }
            InboundFrame::ResizeTerminal(size) => {
                session
                    .resize(size.width, size.height)
                    .map_err(StreamError::Resize)?;
            }
            InboundFrame::Ping => {
                send(&sink, Message::Text(OutboundFrame::Pong.encode())).await?;
            }
        }
    }
}

/// Session to client: reads output and sends it as Output frames.
///
/// Sends a final Closed frame however it stops.
pub async fn outbound<Si>(
    session: Arc<Session>,
    sink: SharedSink<Si>,
    cancel: CancellationToken,
) -> Result<(), StreamError>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let exit = session.exit_signal();
    let mut buf = vec![0u8; OUTPUT_CHUNK_SIZE];

    let result = loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break Err(StreamError::Cancelled),
            read = session.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => break Err(StreamError::ProcessExit),
            Ok(n) => n,
            Err(_) if exit.has_fired() => break Err(StreamError::ProcessExit),
            Err(e) => break Err(StreamError::Session(e)),
        };

        let frame = OutboundFrame::Output(buf[..n].to_vec()).encode();
        if let Err(e) = send(&sink, Message::Text(frame)).await {
            break Err(e);
        }
    };

    if let Err(e) = send(&sink, Message::Text(OutboundFrame::Closed.encode())).await {
        tracing::debug!(session_id = %session.id(), error = %e, "Failed to send closed frame");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::MockBackend;
    use crate::session::SessionError;
    use futures_util::stream;
    use std::sync::atomic::Ordering;
    use std::convert::Infallible;
    use std::time::Duration;

    fn session() -> Arc<Session> {
        Arc::new(Session::new("pump".to_string(), Box::new(MockBackend::new())))
    }

    fn sink() -> SharedSink<Vec<Message>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn text(s: &str) -> Result<Message, Infallible> {
        Ok(Message::Text(s.to_string()))
    }

    #[tokio::test]
    async fn test_inbound_applies_frames() {
        let session = session();
        let sink = sink();
        let messages = stream::iter(vec![
            text("1hello"),
            text("1"),
            text(r#"2{"width":100,"height":30}"#),
            text("3"),
        ]);

        let result = inbound(
            Arc::clone(&session),
            messages,
            Arc::clone(&sink),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(StreamError::EndOfStream)));

        let mut buf = [0u8; 16];
        let n = session.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(session.window_size().unwrap(), (100, 30));
        assert_eq!(*sink.lock().await, vec![Message::Text("2pong".to_string())]);
    }

    #[tokio::test]
    async fn test_inbound_close_frame() {
        let messages = stream::iter(vec![Ok::<_, Infallible>(Message::Close(None))]);
        let result = inbound(session(), messages, sink(), CancellationToken::new()).await;
        assert!(matches!(result, Err(StreamError::Closed)));
    }

    #[tokio::test]
    async fn test_inbound_protocol_errors() {
        for bad in [text("9x"), text(""), text("2{nope"), Ok(Message::Binary(vec![1]))] {
            let result = inbound(session(), stream::iter(vec![bad]), sink(), CancellationToken::new()).await;
            match result {
                Err(e @ StreamError::Protocol(_)) => assert!(!e.is_expected()),
                other => panic!("expected protocol error, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_inbound_read_error_is_end_of_stream() {
        let messages = stream::iter(vec![Err::<Message, _>("connection reset")]);
        let result = inbound(session(), messages, sink(), CancellationToken::new()).await;
        assert!(matches!(result, Err(StreamError::EndOfStream)));
    }

    #[tokio::test]
    async fn test_inbound_write_failure_keeps_pumping() {
        let session = session();
        session.close().await.unwrap();
        let sink = sink();

        let messages = stream::iter(vec![text("1lost"), text("3")]);
        let result = inbound(session, messages, Arc::clone(&sink), CancellationToken::new()).await;
        assert!(matches!(result, Err(StreamError::EndOfStream)));
        assert_eq!(sink.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_inbound_resize_failure_ends_pump() {
        let backend = MockBackend::new();
        backend.reject_resize.store(true, Ordering::SeqCst);
        let session = Arc::new(Session::new("pump".to_string(), Box::new(backend)));
        let sink = sink();

        let messages = stream::iter(vec![text(r#"2{"width":80,"height":24}"#), text("3")]);
        let result = inbound(session, messages, Arc::clone(&sink), CancellationToken::new()).await;

        match result {
            Err(e @ StreamError::Resize(SessionError::ResizeFailed(_))) => {
                assert!(!e.is_expected());
                assert_eq!(e.to_string(), "failed to resize terminal: rejected");
            }
            other => panic!("expected resize failure, got {other:?}"),
        }
        // The ping after the failed resize is never answered.
        assert!(sink.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let messages = stream::pending::<Result<Message, Infallible>>();
        let result = inbound(session(), messages, sink(), cancel).await;
        assert!(matches!(result, Err(StreamError::Cancelled)));
    }

    #[tokio::test]
    async fn test_outbound_forwards_output_then_closed() {
        let session = session();
        let sink = sink();
        session.write_all(b"hi").await.unwrap();

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(outbound(Arc::clone(&session), Arc::clone(&sink), cancel.clone()));

        tokio::time::timeout(Duration::from_secs(1), async {
            while sink.lock().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("output should be forwarded");

        cancel.cancel();
        let result = pump.await.unwrap();
        assert!(matches!(result, Err(StreamError::Cancelled)));

        let sent = sink.lock().await.clone();
        assert_eq!(
            sent,
            vec![
                Message::Text("1aGk=".to_string()),
                Message::Text("3session closed".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_outbound_process_exit() {
        let session = session();
        let sink = sink();
        let pump = tokio::spawn(outbound(
            Arc::clone(&session),
            Arc::clone(&sink),
            CancellationToken::new(),
        ));

        session.close().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), pump)
            .await
            .expect("pump should stop on exit")
            .unwrap();
        assert!(matches!(result, Err(StreamError::ProcessExit)));
        assert_eq!(
            *sink.lock().await,
            vec![Message::Text("3session closed".to_string())]
        );
    }

    #[tokio::test]
    async fn test_outbound_chunks_large_output() {
        let session = session();
        let sink = sink();
        let payload = vec![b'x'; OUTPUT_CHUNK_SIZE + 10];
        session.write_all(&payload).await.unwrap();

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(outbound(Arc::clone(&session), Arc::clone(&sink), cancel.clone()));

        tokio::time::timeout(Duration::from_secs(1), async {
            while sink.lock().await.len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both chunks should be forwarded");
        cancel.cancel();
        pump.await.unwrap().unwrap_err();

        let sent = sink.lock().await.clone();
        let sizes: Vec<usize> = sent[..2]
            .iter()
            .map(|m| match m {
                Message::Text(t) => match OutboundFrame::decode(t).unwrap() {
                    OutboundFrame::Output(data) => data.len(),
                    other => panic!("unexpected frame {other:?}"),
                },
                other => panic!("unexpected message {other:?}"),
            })
            .collect();
        assert_eq!(sizes, vec![OUTPUT_CHUNK_SIZE, 10]);
    }
}
