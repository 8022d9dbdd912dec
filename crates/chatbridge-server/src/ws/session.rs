//! Per-client bridge session driver.
//!
//! Owns one client WebSocket plus whatever upstream connection currently
//! backs it, and feeds everything it observes through the
//! [`BridgeMachine`]. The machine decides; this module performs.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chatbridge_core::config::BridgeConfig;
use chatbridge_core::frame::Frame;
use chatbridge_core::machine::{Action, BridgeMachine};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::upstream::{UpstreamEvent, UpstreamHandle};
use crate::metrics::{
    FRAMES_CLIENT_TO_UPSTREAM_TOTAL, FRAMES_UPSTREAM_TO_CLIENT_TOTAL, PENDING_FLUSH_FRAMES,
    STATUS_NOTIFICATIONS_TOTAL, UPSTREAM_CONNECTS_TOTAL, UPSTREAM_RECONNECTS_TOTAL,
};

/// What a client frame means to the session loop.
enum Inbound {
    Frame(Frame),
    Close,
    Ignore,
}

fn classify(msg: WsMessage) -> Inbound {
    match msg {
        WsMessage::Text(t) => Inbound::Frame(Frame::Text(t.as_str().to_owned())),
        WsMessage::Binary(b) => Inbound::Frame(Frame::Binary(b.to_vec())),
        WsMessage::Close(_) => Inbound::Close,
        WsMessage::Ping(_) | WsMessage::Pong(_) => Inbound::Ignore,
    }
}

fn to_client_message(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(t) => WsMessage::Text(t.into()),
        Frame::Binary(b) => WsMessage::Binary(b.into()),
    }
}

/// One loop turn's resolved input, extracted from the select so the
/// handlers below can freely mutate the session state.
enum Tick {
    Client(Option<Result<WsMessage, axum::Error>>),
    Upstream(Option<UpstreamEvent>),
    Timer,
    Shutdown,
}

async fn recv_event(rx: &mut Option<mpsc::Receiver<UpstreamEvent>>) -> Option<UpstreamEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drive one client's bridge session to completion.
///
/// Returns when the client disconnects or the server shuts down. Upstream
/// failures never end the session; they feed the reconnect schedule.
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn run_bridge_session(
    socket: WebSocket,
    client_id: String,
    config: Arc<BridgeConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut machine, initial) = BridgeMachine::accept();
    let mut upstream: Option<UpstreamHandle> = None;
    let mut events_rx: Option<mpsc::Receiver<UpstreamEvent>> = None;
    let mut reconnect_at: Option<Instant> = None;
    debug!("bridge session started");

    let mut client_ok = apply_actions(
        initial,
        &mut machine,
        &mut ws_tx,
        &mut upstream,
        &mut events_rx,
        &mut reconnect_at,
        &config,
        &shutdown,
    )
    .await;

    while client_ok {
        let deadline = reconnect_at.unwrap_or_else(Instant::now);
        let tick = tokio::select! {
            inbound = ws_rx.next() => Tick::Client(inbound),
            event = recv_event(&mut events_rx) => Tick::Upstream(event),
            () = sleep_until(deadline), if reconnect_at.is_some() => Tick::Timer,
            () = shutdown.cancelled() => Tick::Shutdown,
        };
        let actions = match tick {
            Tick::Client(Some(Ok(msg))) => match classify(msg) {
                Inbound::Frame(frame) => machine.on_client_frame(frame),
                Inbound::Close => break,
                Inbound::Ignore => continue,
            },
            Tick::Client(Some(Err(e))) => {
                debug!(error = %e, "client socket error");
                break;
            }
            Tick::Client(None) => break,
            Tick::Upstream(Some(UpstreamEvent::Open)) => {
                let flushed = u32::try_from(machine.pending_len()).unwrap_or(u32::MAX);
                histogram!(PENDING_FLUSH_FRAMES).record(f64::from(flushed));
                machine.on_upstream_open()
            }
            Tick::Upstream(Some(UpstreamEvent::Frame(frame))) => machine.on_upstream_frame(frame),
            Tick::Upstream(Some(UpstreamEvent::Closed)) | Tick::Upstream(None) => {
                upstream = None;
                events_rx = None;
                machine.on_upstream_closed()
            }
            Tick::Upstream(Some(UpstreamEvent::Error(e))) => {
                upstream = None;
                events_rx = None;
                warn!(error = %e, "upstream failure");
                machine.on_upstream_error(e.to_string())
            }
            Tick::Timer => {
                reconnect_at = None;
                counter!(UPSTREAM_RECONNECTS_TOTAL).increment(1);
                machine.on_reconnect_elapsed()
            }
            Tick::Shutdown => break,
        };
        client_ok = apply_actions(
            actions,
            &mut machine,
            &mut ws_tx,
            &mut upstream,
            &mut events_rx,
            &mut reconnect_at,
            &config,
            &shutdown,
        )
        .await;
    }

    let teardown = machine.on_client_closed();
    let _ = apply_actions(
        teardown,
        &mut machine,
        &mut ws_tx,
        &mut upstream,
        &mut events_rx,
        &mut reconnect_at,
        &config,
        &shutdown,
    )
    .await;
    debug!("bridge session ended");
}

/// Perform the machine's actions in order. Returns `false` once the client
/// socket rejects a write, which ends the session.
async fn apply_actions(
    actions: Vec<Action>,
    machine: &mut BridgeMachine,
    ws_tx: &mut SplitSink<WebSocket, WsMessage>,
    upstream: &mut Option<UpstreamHandle>,
    events_rx: &mut Option<mpsc::Receiver<UpstreamEvent>>,
    reconnect_at: &mut Option<Instant>,
    config: &BridgeConfig,
    shutdown: &CancellationToken,
) -> bool {
    for action in actions {
        match action {
            Action::ConnectUpstream => {
                counter!(UPSTREAM_CONNECTS_TOTAL).increment(1);
                let (handle, rx) = super::upstream::spawn(
                    config.upstream_ws_url(),
                    config.handshake_timeout(),
                    shutdown,
                );
                *upstream = Some(handle);
                *events_rx = Some(rx);
            }
            Action::ForwardToUpstream(frame) => match upstream {
                Some(handle) => match handle.send(frame).await {
                    Ok(()) => {
                        counter!(FRAMES_CLIENT_TO_UPSTREAM_TOTAL).increment(1);
                    }
                    // Connector already exited; its terminal event on the
                    // event channel moves the machine along, and the frame
                    // waits for the next flush.
                    Err(frame) => {
                        debug!("upstream writer gone, frame requeued");
                        machine.requeue_unsent(frame);
                    }
                },
                None => machine.requeue_unsent(frame),
            },
            Action::RelayToClient(frame) => {
                counter!(FRAMES_UPSTREAM_TO_CLIENT_TOTAL).increment(1);
                if ws_tx.send(to_client_message(frame)).await.is_err() {
                    return false;
                }
            }
            Action::NotifyClient(notification) => {
                counter!(STATUS_NOTIFICATIONS_TOTAL, "state" => notification.state.to_string())
                    .increment(1);
                if let Some(frame) = notification.to_frame() {
                    if ws_tx.send(to_client_message(frame)).await.is_err() {
                        return false;
                    }
                }
            }
            Action::ScheduleReconnect => {
                *reconnect_at = Some(Instant::now() + config.reconnect_delay());
            }
            Action::CancelReconnect => {
                *reconnect_at = None;
            }
            Action::CloseUpstream => {
                if let Some(handle) = upstream.take() {
                    handle.close();
                }
                *events_rx = None;
            }
        }
    }
    true
}
