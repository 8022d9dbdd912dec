//! Per-client relay and reconnect state machine.
//!
//! [`BridgeMachine`] is pure and synchronous: the session driver feeds it
//! observed events (client frames, upstream lifecycle, timer expiry) and it
//! returns the [`Action`]s to perform. All ordering and buffering decisions
//! live here so they can be tested without sockets or timers.

use std::collections::VecDeque;

use crate::frame::Frame;
use crate::status::StatusNotification;

/// Lifecycle of one client's bridge session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    /// An upstream connect attempt is in flight; client frames buffer.
    AwaitingUpstream,
    /// Upstream is open; frames relay in both directions.
    Relaying,
    /// Upstream is down; a reconnect timer is pending and client frames
    /// buffer.
    Reconnecting,
    /// The client went away. Terminal; every input is ignored.
    Terminated,
}

/// Side effect the driver must perform, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Start a fresh upstream connect attempt.
    ConnectUpstream,
    /// Send a frame to the upstream connection.
    ForwardToUpstream(Frame),
    /// Send a relayed frame to the client.
    RelayToClient(Frame),
    /// Send a synthetic status frame to the client.
    NotifyClient(StatusNotification),
    /// Arm the fixed-delay reconnect timer.
    ScheduleReconnect,
    /// Disarm any pending reconnect timer.
    CancelReconnect,
    /// Tear down the upstream connection if one exists.
    CloseUpstream,
}

/// The bridge state machine for a single client connection.
///
/// Invariants maintained here:
/// - Client frames are never dropped or reordered: frames that arrive while
///   upstream is down queue in FIFO order and flush, still in order, before
///   any frame that arrives after the connection opens.
/// - At most one connect attempt is in flight at a time.
/// - Status notifications go to the client only; they are never forwarded
///   upstream and never pass through the pending queue.
/// - After [`BridgeMachine::on_client_closed`] the machine emits nothing.
#[derive(Debug)]
pub struct BridgeMachine {
    state: BridgeState,
    pending: VecDeque<Frame>,
}

impl BridgeMachine {
    /// Accept a new client connection. Immediately dials upstream.
    #[must_use]
    pub fn accept() -> (Self, Vec<Action>) {
        let machine = Self {
            state: BridgeState::AwaitingUpstream,
            pending: VecDeque::new(),
        };
        (machine, vec![Action::ConnectUpstream])
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Number of client frames waiting for upstream to come up.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// A frame arrived from the client.
    pub fn on_client_frame(&mut self, frame: Frame) -> Vec<Action> {
        match self.state {
            BridgeState::Relaying => vec![Action::ForwardToUpstream(frame)],
            BridgeState::AwaitingUpstream | BridgeState::Reconnecting => {
                self.pending.push_back(frame);
                Vec::new()
            }
            BridgeState::Terminated => Vec::new(),
        }
    }

    /// The upstream handshake completed.
    ///
    /// Notifies the client first, then flushes the pending queue in arrival
    /// order, so buffered frames always precede live ones on the wire.
    pub fn on_upstream_open(&mut self) -> Vec<Action> {
        if self.state != BridgeState::AwaitingUpstream {
            return Vec::new();
        }
        self.state = BridgeState::Relaying;
        let mut actions = vec![Action::NotifyClient(StatusNotification::connected())];
        actions.extend(self.pending.drain(..).map(Action::ForwardToUpstream));
        actions
    }

    /// The upstream connection closed in an orderly fashion.
    pub fn on_upstream_closed(&mut self) -> Vec<Action> {
        match self.state {
            BridgeState::AwaitingUpstream | BridgeState::Relaying => {
                self.state = BridgeState::Reconnecting;
                vec![
                    Action::NotifyClient(StatusNotification::disconnected()),
                    Action::ScheduleReconnect,
                ]
            }
            BridgeState::Reconnecting | BridgeState::Terminated => Vec::new(),
        }
    }

    /// A connect attempt failed or an open connection hit an error.
    ///
    /// A late error arriving while already reconnecting is reported to
    /// the client but does not re-arm the timer; the existing schedule
    /// stands.
    pub fn on_upstream_error(&mut self, detail: impl Into<String>) -> Vec<Action> {
        match self.state {
            BridgeState::AwaitingUpstream | BridgeState::Relaying => {
                self.state = BridgeState::Reconnecting;
                vec![
                    Action::NotifyClient(StatusNotification::error(detail)),
                    Action::ScheduleReconnect,
                ]
            }
            BridgeState::Reconnecting => {
                vec![Action::NotifyClient(StatusNotification::error(detail))]
            }
            BridgeState::Terminated => Vec::new(),
        }
    }

    /// The fixed reconnect delay elapsed.
    pub fn on_reconnect_elapsed(&mut self) -> Vec<Action> {
        if self.state != BridgeState::Reconnecting {
            return Vec::new();
        }
        self.state = BridgeState::AwaitingUpstream;
        vec![Action::ConnectUpstream]
    }

    /// A frame arrived from the upstream connection.
    pub fn on_upstream_frame(&mut self, frame: Frame) -> Vec<Action> {
        if self.state == BridgeState::Terminated {
            return Vec::new();
        }
        vec![Action::RelayToClient(frame)]
    }

    /// Return a frame the driver could not hand to the transport.
    ///
    /// Requeued frames wait for the next flush. Ordering holds because the
    /// queue is always empty when relaying begins, so a failed forward has
    /// nothing older to cut in front of; callers requeue multiple failures
    /// in the order they were emitted.
    pub fn requeue_unsent(&mut self, frame: Frame) {
        if self.state == BridgeState::Terminated {
            return;
        }
        self.pending.push_back(frame);
    }

    /// The client connection closed. Terminal: cancels everything and
    /// discards the pending queue.
    pub fn on_client_closed(&mut self) -> Vec<Action> {
        if self.state == BridgeState::Terminated {
            return Vec::new();
        }
        self.state = BridgeState::Terminated;
        self.pending.clear();
        vec![Action::CloseUpstream, Action::CancelReconnect]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_owned())
    }

    fn forwarded(actions: &[Action]) -> Vec<Frame> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::ForwardToUpstream(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn accept_dials_upstream() {
        let (machine, actions) = BridgeMachine::accept();
        assert_eq!(machine.state(), BridgeState::AwaitingUpstream);
        assert_eq!(actions, vec![Action::ConnectUpstream]);
    }

    #[test]
    fn frames_buffer_while_awaiting() {
        let (mut machine, _) = BridgeMachine::accept();
        assert!(machine.on_client_frame(text("a")).is_empty());
        assert!(machine.on_client_frame(text("b")).is_empty());
        assert_eq!(machine.pending_len(), 2);
    }

    #[test]
    fn open_notifies_then_flushes_in_order() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_client_frame(text("first"));
        let _ = machine.on_client_frame(text("second"));
        let actions = machine.on_upstream_open();
        assert_eq!(machine.state(), BridgeState::Relaying);
        assert!(matches!(actions[0], Action::NotifyClient(ref n) if n.state == crate::status::UpstreamStatus::Connected));
        assert_eq!(forwarded(&actions), vec![text("first"), text("second")]);
        assert_eq!(machine.pending_len(), 0);
    }

    #[test]
    fn relaying_forwards_directly() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_upstream_open();
        let actions = machine.on_client_frame(text("live"));
        assert_eq!(actions, vec![Action::ForwardToUpstream(text("live"))]);
        assert_eq!(machine.pending_len(), 0);
    }

    #[test]
    fn upstream_frame_relays_to_client() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_upstream_open();
        let actions = machine.on_upstream_frame(text("reply"));
        assert_eq!(actions, vec![Action::RelayToClient(text("reply"))]);
    }

    #[test]
    fn close_schedules_reconnect_once() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_upstream_open();
        let actions = machine.on_upstream_closed();
        assert_eq!(machine.state(), BridgeState::Reconnecting);
        assert!(matches!(actions[0], Action::NotifyClient(ref n) if n.state == crate::status::UpstreamStatus::Disconnected));
        assert_eq!(actions[1], Action::ScheduleReconnect);
        // A second close while already reconnecting is a no-op.
        assert!(machine.on_upstream_closed().is_empty());
    }

    #[test]
    fn error_while_relaying_schedules_reconnect() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_upstream_open();
        let actions = machine.on_upstream_error("broken pipe");
        assert_eq!(machine.state(), BridgeState::Reconnecting);
        assert!(matches!(actions[0], Action::NotifyClient(ref n) if n.message == "broken pipe"));
        assert_eq!(actions[1], Action::ScheduleReconnect);
    }

    #[test]
    fn failed_attempt_notifies_without_rescheduling() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_upstream_error("connection refused");
        assert_eq!(machine.state(), BridgeState::Reconnecting);
        // A second failure report while already reconnecting notifies only.
        let actions = machine.on_upstream_error("connection refused");
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::NotifyClient(_)));
    }

    #[test]
    fn reconnect_timer_redials() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_upstream_error("refused");
        let actions = machine.on_reconnect_elapsed();
        assert_eq!(machine.state(), BridgeState::AwaitingUpstream);
        assert_eq!(actions, vec![Action::ConnectUpstream]);
    }

    #[test]
    fn timer_outside_reconnecting_is_ignored() {
        let (mut machine, _) = BridgeMachine::accept();
        assert!(machine.on_reconnect_elapsed().is_empty());
        let _ = machine.on_upstream_open();
        assert!(machine.on_reconnect_elapsed().is_empty());
    }

    #[test]
    fn frames_buffer_across_outage_and_flush_in_order() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_upstream_open();
        let _ = machine.on_upstream_closed();
        let _ = machine.on_client_frame(text("q1"));
        let _ = machine.on_client_frame(text("q2"));
        let _ = machine.on_reconnect_elapsed();
        let _ = machine.on_client_frame(text("q3"));
        let actions = machine.on_upstream_open();
        assert_eq!(forwarded(&actions), vec![text("q1"), text("q2"), text("q3")]);
    }

    #[test]
    fn repeated_failures_keep_retrying() {
        let (mut machine, _) = BridgeMachine::accept();
        let mut connects = 1; // the initial dial from accept()
        for _ in 0..5 {
            let _ = machine.on_upstream_error("refused");
            let actions = machine.on_reconnect_elapsed();
            connects += actions
                .iter()
                .filter(|a| **a == Action::ConnectUpstream)
                .count();
        }
        assert_eq!(connects, 6);
    }

    #[test]
    fn unsent_frames_requeue_and_flush_in_order() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_upstream_open();
        let actions = machine.on_client_frame(text("lost1"));
        assert_eq!(actions, vec![Action::ForwardToUpstream(text("lost1"))]);
        // The transport rejected both forwards; they come back in order.
        machine.requeue_unsent(text("lost1"));
        machine.requeue_unsent(text("lost2"));
        let _ = machine.on_upstream_closed();
        let _ = machine.on_client_frame(text("later"));
        let _ = machine.on_reconnect_elapsed();
        let actions = machine.on_upstream_open();
        assert_eq!(
            forwarded(&actions),
            vec![text("lost1"), text("lost2"), text("later")]
        );
    }

    #[test]
    fn requeue_after_termination_is_dropped() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_client_closed();
        machine.requeue_unsent(text("too-late"));
        assert_eq!(machine.pending_len(), 0);
    }

    #[test]
    fn client_close_cancels_everything() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_client_frame(text("stranded"));
        let actions = machine.on_client_closed();
        assert_eq!(machine.state(), BridgeState::Terminated);
        assert_eq!(actions, vec![Action::CloseUpstream, Action::CancelReconnect]);
        assert_eq!(machine.pending_len(), 0);
    }

    #[test]
    fn terminated_ignores_all_inputs() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_client_closed();
        assert!(machine.on_client_frame(text("x")).is_empty());
        assert!(machine.on_upstream_open().is_empty());
        assert!(machine.on_upstream_closed().is_empty());
        assert!(machine.on_upstream_error("x").is_empty());
        assert!(machine.on_reconnect_elapsed().is_empty());
        assert!(machine.on_upstream_frame(text("x")).is_empty());
        assert!(machine.on_client_closed().is_empty());
    }

    #[test]
    fn stale_open_after_reconnect_scheduled_is_ignored() {
        let (mut machine, _) = BridgeMachine::accept();
        let _ = machine.on_upstream_error("refused");
        // Open can only follow a connect attempt in flight.
        assert!(machine.on_upstream_open().is_empty());
        assert_eq!(machine.state(), BridgeState::Reconnecting);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Op {
            ClientFrame(String),
            UpstreamOpen,
            UpstreamClosed,
            UpstreamError,
            ReconnectElapsed,
            UpstreamFrame(String),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                "[a-z]{1,8}".prop_map(Op::ClientFrame),
                Just(Op::UpstreamOpen),
                Just(Op::UpstreamClosed),
                Just(Op::UpstreamError),
                Just(Op::ReconnectElapsed),
                "[a-z]{1,8}".prop_map(Op::UpstreamFrame),
            ]
        }

        proptest! {
            /// Whatever the event order, frames forwarded upstream are an
            /// in-order prefix of the frames the client sent: nothing is
            /// dropped mid-queue, duplicated, or reordered.
            #[test]
            fn forwarding_preserves_client_order(ops in proptest::collection::vec(op_strategy(), 0..64)) {
                let (mut machine, _) = BridgeMachine::accept();
                let mut sent = Vec::new();
                let mut forwarded_frames = Vec::new();
                for op in ops {
                    let actions = match op {
                        Op::ClientFrame(s) => {
                            sent.push(text(&s));
                            machine.on_client_frame(text(&s))
                        }
                        Op::UpstreamOpen => machine.on_upstream_open(),
                        Op::UpstreamClosed => machine.on_upstream_closed(),
                        Op::UpstreamError => machine.on_upstream_error("fault"),
                        Op::ReconnectElapsed => machine.on_reconnect_elapsed(),
                        Op::UpstreamFrame(s) => machine.on_upstream_frame(text(&s)),
                    };
                    forwarded_frames.extend(forwarded(&actions));
                }
                // Anything still pending would flush next open, so the
                // forwarded sequence plus the queue must equal all input.
                forwarded_frames.extend(machine.pending.iter().cloned());
                prop_assert_eq!(forwarded_frames, sent);
            }

            /// Once the client closes, no further actions are ever emitted.
            #[test]
            fn terminated_is_silent(ops in proptest::collection::vec(op_strategy(), 0..32)) {
                let (mut machine, _) = BridgeMachine::accept();
                let _ = machine.on_client_closed();
                for op in ops {
                    let actions = match op {
                        Op::ClientFrame(s) => machine.on_client_frame(text(&s)),
                        Op::UpstreamOpen => machine.on_upstream_open(),
                        Op::UpstreamClosed => machine.on_upstream_closed(),
                        Op::UpstreamError => machine.on_upstream_error("fault"),
                        Op::ReconnectElapsed => machine.on_reconnect_elapsed(),
                        Op::UpstreamFrame(s) => machine.on_upstream_frame(text(&s)),
                    };
                    prop_assert!(actions.is_empty());
                }
            }
        }
    }
}
