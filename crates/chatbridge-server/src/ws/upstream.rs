//! Upstream gateway connector.
//!
//! Each connect attempt runs as its own task with its own event channel, so
//! a stale attempt can never leak events into a later one. The task emits
//! exactly one terminal event and then exits: [`UpstreamEvent::Error`] when
//! the handshake never completes, [`UpstreamEvent::Closed`] for anything
//! that ends an open connection — a close frame, a torn TCP stream, a
//! failed write. The gateway going away mid-session is a disconnect to the
//! client no matter how the transport happened to report it.

use std::time::Duration;

use chatbridge_core::error::BridgeError;
use chatbridge_core::frame::Frame;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Channel capacity for frames and events. Relay frames already queue in
/// the state machine while upstream is down; this only smooths bursts.
const CHANNEL_CAPACITY: usize = 256;

/// What the connector task observed, delivered to the session driver.
#[derive(Debug)]
pub enum UpstreamEvent {
    /// The handshake completed; the connection is relaying.
    Open,
    /// A frame arrived from the gateway.
    Frame(Frame),
    /// An open connection ended, cleanly or not. Terminal.
    Closed,
    /// The connect attempt failed before the connection opened. Terminal.
    Error(BridgeError),
}

/// Writer half of a live connect attempt.
#[derive(Debug)]
pub struct UpstreamHandle {
    frame_tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

impl UpstreamHandle {
    /// Queue a frame for the gateway. When the connector task has already
    /// exited the frame is handed back so the caller can requeue it; the
    /// task's terminal event reports why it went away.
    pub async fn send(&self, frame: Frame) -> Result<(), Frame> {
        self.frame_tx.send(frame).await.map_err(|e| e.0)
    }

    /// Tear the connection down. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Start a connect attempt against `url`.
///
/// Returns a writer handle plus the attempt's private event stream. The
/// task is also cancelled whenever `parent` is, so sessions dying in a
/// server shutdown take their upstream connections with them.
pub fn spawn(
    url: String,
    handshake_timeout: Duration,
    parent: &CancellationToken,
) -> (UpstreamHandle, mpsc::Receiver<UpstreamEvent>) {
    let cancel = parent.child_token();
    let (frame_tx, frame_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let task_cancel = cancel.clone();
    let _ = tokio::spawn(run(url, handshake_timeout, task_cancel, frame_rx, event_tx));
    (UpstreamHandle { frame_tx, cancel }, event_rx)
}

async fn run(
    url: String,
    handshake_timeout: Duration,
    cancel: CancellationToken,
    mut frame_rx: mpsc::Receiver<Frame>,
    event_tx: mpsc::Sender<UpstreamEvent>,
) {
    let connected = tokio::select! {
        () = cancel.cancelled() => return,
        result = tokio::time::timeout(handshake_timeout, connect_async(&url)) => result,
    };
    let ws = match connected {
        Err(_elapsed) => {
            let _ = event_tx
                .send(UpstreamEvent::Error(BridgeError::HandshakeTimeout {
                    url,
                    timeout_ms: u64::try_from(handshake_timeout.as_millis()).unwrap_or(u64::MAX),
                }))
                .await;
            return;
        }
        Ok(Err(e)) => {
            let _ = event_tx
                .send(UpstreamEvent::Error(BridgeError::UpstreamUnreachable {
                    url,
                    reason: e.to_string(),
                }))
                .await;
            return;
        }
        Ok(Ok((ws, _response))) => ws,
    };
    debug!(%url, "upstream handshake complete");
    let _ = event_tx.send(UpstreamEvent::Open).await;

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.close().await;
                return;
            }
            outbound = frame_rx.recv() => match outbound {
                Some(frame) => {
                    if let Err(e) = sink.send(to_ws_message(frame)).await {
                        debug!(error = %e, "upstream write failed");
                        let _ = event_tx.send(UpstreamEvent::Closed).await;
                        return;
                    }
                }
                // Writer handle dropped; the session is gone.
                None => {
                    let _ = sink.close().await;
                    return;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => {
                    let _ = event_tx.send(UpstreamEvent::Closed).await;
                    return;
                }
                Some(Ok(msg)) => {
                    if let Some(frame) = from_ws_message(msg) {
                        let _ = event_tx.send(UpstreamEvent::Frame(frame)).await;
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "upstream stream error");
                    let _ = event_tx.send(UpstreamEvent::Closed).await;
                    return;
                }
            },
        }
    }
}

fn to_ws_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(t) => Message::Text(t.into()),
        Frame::Binary(b) => Message::Binary(b.into()),
    }
}

fn from_ws_message(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(t) => Some(Frame::Text(t.as_str().to_owned())),
        Message::Binary(b) => Some(Frame::Binary(b.to_vec())),
        // Control frames are the transport's business.
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    async fn spawn_echo_gateway() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let _ = tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_text() || msg.is_binary() {
                            if ws.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn open_then_echo() {
        let addr = spawn_echo_gateway().await;
        let root = CancellationToken::new();
        let (handle, mut events) =
            spawn(format!("ws://{addr}/"), Duration::from_secs(2), &root);

        assert!(matches!(events.recv().await, Some(UpstreamEvent::Open)));
        assert!(handle.send(Frame::Text("ping".into())).await.is_ok());
        match events.recv().await {
            Some(UpstreamEvent::Frame(Frame::Text(t))) => assert_eq!(t, "ping"),
            other => panic!("expected echoed frame, got {other:?}"),
        }
        handle.close();
    }

    #[tokio::test]
    async fn binary_frames_round_trip() {
        let addr = spawn_echo_gateway().await;
        let root = CancellationToken::new();
        let (handle, mut events) =
            spawn(format!("ws://{addr}/"), Duration::from_secs(2), &root);

        assert!(matches!(events.recv().await, Some(UpstreamEvent::Open)));
        assert!(handle.send(Frame::Binary(vec![1, 2, 3])).await.is_ok());
        match events.recv().await {
            Some(UpstreamEvent::Frame(Frame::Binary(b))) => assert_eq!(b, vec![1, 2, 3]),
            other => panic!("expected echoed frame, got {other:?}"),
        }
        handle.close();
    }

    #[tokio::test]
    async fn unreachable_gateway_emits_error() {
        let root = CancellationToken::new();
        let (_handle, mut events) = spawn(
            "ws://127.0.0.1:1/".to_owned(),
            Duration::from_secs(2),
            &root,
        );
        match events.recv().await {
            Some(UpstreamEvent::Error(BridgeError::UpstreamUnreachable { .. })) => {}
            other => panic!("expected unreachable error, got {other:?}"),
        }
        // Terminal: the channel closes afterwards.
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn stalled_handshake_times_out() {
        // Accepts TCP but never answers the WebSocket handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(stream);
        });

        let root = CancellationToken::new();
        let (_handle, mut events) =
            spawn(format!("ws://{addr}/"), Duration::from_millis(100), &root);
        match events.recv().await {
            Some(UpstreamEvent::Error(BridgeError::HandshakeTimeout { timeout_ms, .. })) => {
                assert_eq!(timeout_ms, 100);
            }
            other => panic!("expected handshake timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn orderly_close_emits_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let root = CancellationToken::new();
        let (_handle, mut events) =
            spawn(format!("ws://{addr}/"), Duration::from_secs(2), &root);
        assert!(matches!(events.recv().await, Some(UpstreamEvent::Open)));
        match events.recv().await {
            Some(UpstreamEvent::Closed) => {}
            other => panic!("expected closed event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn abrupt_drop_emits_closed() {
        // Completes the handshake, then tears the TCP stream down with no
        // close frame.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _ = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);
        });

        let root = CancellationToken::new();
        let (_handle, mut events) =
            spawn(format!("ws://{addr}/"), Duration::from_secs(2), &root);
        assert!(matches!(events.recv().await, Some(UpstreamEvent::Open)));
        match events.recv().await {
            Some(UpstreamEvent::Closed) => {}
            other => panic!("expected closed event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_after_exit_returns_the_frame() {
        let addr = spawn_echo_gateway().await;
        let root = CancellationToken::new();
        let (handle, mut events) =
            spawn(format!("ws://{addr}/"), Duration::from_secs(2), &root);
        assert!(matches!(events.recv().await, Some(UpstreamEvent::Open)));
        handle.close();
        assert!(events.recv().await.is_none());
        match handle.send(Frame::Text("stranded".into())).await {
            Err(Frame::Text(t)) => assert_eq!(t, "stranded"),
            other => panic!("expected the frame back, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_cancels_the_task() {
        let addr = spawn_echo_gateway().await;
        let root = CancellationToken::new();
        let (handle, mut events) =
            spawn(format!("ws://{addr}/"), Duration::from_secs(2), &root);
        assert!(matches!(events.recv().await, Some(UpstreamEvent::Open)));
        handle.close();
        // No terminal event on deliberate teardown; the channel just closes.
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let addr = spawn_echo_gateway().await;
        let root = CancellationToken::new();
        let (_handle, mut events) =
            spawn(format!("ws://{addr}/"), Duration::from_secs(2), &root);
        assert!(matches!(events.recv().await, Some(UpstreamEvent::Open)));
        root.cancel();
        assert!(events.recv().await.is_none());
    }
}
