//! Session supervisor (spec §4.3): drives one peripheral's lifecycle
//! through connect → subscribe/handshake → listen, enforcing timeouts and
//! retrying everything short of external cancellation.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use codec::{DecodeOutcome, FrameBody, GestureState, HandshakeTimes, PacketType, ReassemblyBuffer, FRAME_LEN};

use crate::batcher::BatcherHandle;
use crate::ble::{BleCentral, BleEvent, BleSession};
use crate::config::{
    PeripheralConfig, CONNECT_TO, DIAL_RETRY_DELAY, HANDSHAKE_BYTES, LIVENESS_CHECK, LIVENESS_TO,
};
use crate::model::Packet;

/// Current lifecycle status (spec §3). Transitions are a subsequence of
/// NotConnected → NotHandshaked → Transmitting within one session (P3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    NotConnected,
    NotHandshaked,
    Transmitting,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::NotConnected => "NotConnected",
            SessionStatus::NotHandshaked => "NotHandshaked",
            SessionStatus::Transmitting => "Transmitting",
        };
        f.write_str(s)
    }
}

/// Read-only copy of the fields the fleet controller and status reporter
/// need (spec §3/§9: "copy on read", never a reference into supervisor
/// state). `handshake_received_at_ms` is `0` until the first Ack, matching
/// the wire representation the time-sync reply uses (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub handshake_sent_at_ms: i64,
    pub handshake_received_at_ms: i64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::NotConnected,
            handshake_sent_at_ms: 0,
            handshake_received_at_ms: 0,
        }
    }
}

/// Counters that are not already owned by [`codec::GestureState`] (spec
/// §3's gesture counters live there instead, since gesture derivation is
/// what maintains them).
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub received: u64,
    pub imm_success: u64,
    pub invalid_type: u64,
    pub incorrect_length: u64,
    pub reconciled: u64,
}

/// Outcome of handling one notification, used to drive the listen loop.
enum Flow {
    Continue,
    /// A non-Ack frame arrived before the handshake completed.
    HandshakeFailed,
}

/// Per-peripheral mutable session state, owned exclusively by its
/// supervisor (spec §3).
struct SessionState {
    status: SessionStatus,
    handshake: HandshakeTimes,
    last_packet_received_at: i64,
    stats: SessionStats,
    gesture: GestureState,
    reassembly: ReassemblyBuffer,
}

impl SessionState {
    fn new() -> Self {
        Self {
            status: SessionStatus::NotConnected,
            handshake: HandshakeTimes::default(),
            last_packet_received_at: now_ms(),
            stats: SessionStats::default(),
            gesture: GestureState::new(),
            reassembly: ReassemblyBuffer::new(),
        }
    }

    /// Teardown to NotConnected clears session-scoped buffers (spec §4.2:
    /// "the slot is cleared on any status regression to NotConnected").
    fn teardown(&mut self) {
        self.status = SessionStatus::NotConnected;
        self.handshake = HandshakeTimes::default();
        self.reassembly.clear();
        self.gesture = GestureState::new();
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Space-separated hex bytes, for `trace`-level logging of rejected frames.
fn format_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x} ")).collect::<String>().trim_end().to_string()
}

/// Drives one peripheral end to end. Holds no state of its own beyond
/// wiring; all mutable session state lives in [`SessionState`], scoped to
/// one connect-to-teardown interval.
pub struct Supervisor {
    pub peripheral: PeripheralConfig,
    pub radio: crate::radio::RadioToken,
    pub ble: Arc<dyn BleCentral>,
    pub batcher: BatcherHandle,
    pub status_tx: watch::Sender<SessionSnapshot>,
}

impl Supervisor {
    /// Run until `cancel` fires. Returns once the supervisor has exited
    /// cleanly (external cancellation only — every other failure retries
    /// forever, per spec §4.3/§7).
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let exited_externally = self.connect_and_run(&cancel).await;
            if exited_externally {
                return;
            }
        }
    }

    /// One full connect→listen→teardown cycle. Returns `true` if the
    /// supervisor should exit entirely (external cancellation).
    async fn connect_and_run(&self, cancel: &CancellationToken) -> bool {
        let mut state = SessionState::new();
        self.publish(&state);

        let mut session = match self.connect(cancel).await {
            ConnectOutcome::Connected(session) => session,
            ConnectOutcome::ExternalCancel => return true,
            ConnectOutcome::Retry => return false,
        };

        state.status = SessionStatus::NotHandshaked;
        state.last_packet_received_at = now_ms();

        if let Err(e) = session.subscribe().await {
            warn!(peripheral = %self.peripheral.name, error = %e, "subscribe failed, retrying");
            return false;
        }

        if let Err(e) = session.write_without_response(&HANDSHAKE_BYTES).await {
            warn!(peripheral = %self.peripheral.name, error = %e, "handshake write failed, retrying");
            return false;
        }
        state.handshake.sent_at_ms = now_ms();
        self.publish(&state);

        let exited_externally = self.listen(&mut session, &mut state, cancel).await;
        session.unsubscribe().await;
        state.teardown();
        self.publish(&state);

        info!(
            peripheral = %self.peripheral.name,
            received = state.stats.received,
            imm_success = state.stats.imm_success,
            invalid_type = state.stats.invalid_type,
            incorrect_length = state.stats.incorrect_length,
            reconciled = state.stats.reconciled,
            "session ended"
        );

        exited_externally
    }

    async fn connect(&self, cancel: &CancellationToken) -> ConnectOutcome {
        loop {
            if cancel.is_cancelled() {
                return ConnectOutcome::ExternalCancel;
            }

            let permit = self.radio.acquire().await;
            let dial = self.ble.dial(&self.peripheral.address, CONNECT_TO).await;
            drop(permit);

            match dial {
                Ok(session) => return ConnectOutcome::Connected(session),
                Err(e) => {
                    debug!(peripheral = %self.peripheral.name, error = %e, "dial failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(DIAL_RETRY_DELAY) => {}
                        _ = cancel.cancelled() => return ConnectOutcome::ExternalCancel,
                    }
                    return ConnectOutcome::Retry;
                }
            }
        }
    }

    /// Returns `true` if cancellation was external (caller should exit the
    /// supervisor entirely rather than reconnect).
    async fn listen(
        &self,
        session: &mut Box<dyn BleSession>,
        state: &mut SessionState,
        cancel: &CancellationToken,
    ) -> bool {
        let mut liveness_ticker = tokio::time::interval(LIVENESS_CHECK);
        let mut establish_ticker = tokio::time::interval(CONNECT_TO);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    return true;
                }

                event = session.next_event() => {
                    match event {
                        Some(BleEvent::Notification(bytes)) => {
                            match self.handle_notification(state, bytes) {
                                Flow::Continue => {
                                    self.publish(state);
                                }
                                Flow::HandshakeFailed => {
                                    debug!(peripheral = %self.peripheral.name, "non-Ack before Ack, cancelling session");
                                    return false;
                                }
                            }
                        }
                        Some(BleEvent::Disconnected) | None => {
                            debug!(peripheral = %self.peripheral.name, "peripheral disconnected");
                            return false;
                        }
                    }
                }

                _ = liveness_ticker.tick() => {
                    if state.status == SessionStatus::Transmitting {
                        let elapsed = now_ms() - state.last_packet_received_at;
                        if elapsed >= LIVENESS_TO.as_millis() as i64 {
                            debug!(peripheral = %self.peripheral.name, "liveness timeout");
                            return false;
                        }
                    }
                }

                _ = establish_ticker.tick() => {
                    if state.status == SessionStatus::NotHandshaked {
                        let elapsed = now_ms() - state.last_packet_received_at;
                        if elapsed >= CONNECT_TO.as_millis() as i64 {
                            debug!(peripheral = %self.peripheral.name, "handshake timeout");
                            return false;
                        }
                    }
                }
            }
        }
    }

    fn handle_notification(&self, state: &mut SessionState, bytes: Vec<u8>) -> Flow {
        let now = now_ms();
        state.stats.received += 1;
        state.last_packet_received_at = now;

        if bytes.len() == FRAME_LEN {
            let outcome =
                codec::decode_bytes(&bytes, &state.handshake, &mut state.gesture, now).expect("length checked");
            if outcome.kind == PacketType::Invalid {
                trace!(peripheral = %self.peripheral.name, frame = %format_hex(&bytes), "rejected frame");
            }
            self.apply_outcome(state, outcome, true, now)
        } else {
            state.stats.incorrect_length += 1;
            match state.reassembly.push(bytes, &state.handshake, &mut state.gesture, now) {
                codec::ReassemblyOutcome::Buffered | codec::ReassemblyOutcome::Replaced => Flow::Continue,
                codec::ReassemblyOutcome::Emitted(outcome) => {
                    state.stats.reconciled += 1;
                    self.apply_outcome(state, outcome, false, now)
                }
            }
        }
    }

    fn apply_outcome(&self, state: &mut SessionState, outcome: DecodeOutcome, direct: bool, now: i64) -> Flow {
        match outcome.kind {
            PacketType::Invalid => {
                state.stats.invalid_type += 1;
                Flow::Continue
            }
            PacketType::Ack => {
                if direct {
                    state.stats.imm_success += 1;
                }
                if outcome.first_ack {
                    state.handshake.received_at_ms = Some(now);
                }
                if state.status == SessionStatus::NotHandshaked {
                    state.status = SessionStatus::Transmitting;
                }
                Flow::Continue
            }
            PacketType::Liveness => {
                if direct {
                    state.stats.imm_success += 1;
                }
                Flow::Continue
            }
            PacketType::Imu | PacketType::Emg => {
                if direct {
                    state.stats.imm_success += 1;
                }
                if state.status == SessionStatus::NotHandshaked {
                    return Flow::HandshakeFailed;
                }
                if state.status == SessionStatus::Transmitting {
                    let bluno = self.peripheral.num;
                    let packet = match outcome.body {
                        FrameBody::Imu(fields) => Some(Packet::from_imu(outcome.timestamp_ms, bluno, outcome.movement, fields)),
                        FrameBody::Emg(fields) => Some(Packet::from_emg(outcome.timestamp_ms, bluno, fields)),
                        FrameBody::None => None,
                    };
                    if let Some(packet) = packet {
                        self.batcher.enqueue(packet);
                    }
                }
                Flow::Continue
            }
        }
    }

    fn publish(&self, state: &SessionState) {
        let snapshot = SessionSnapshot {
            status: state.status,
            handshake_sent_at_ms: state.handshake.sent_at_ms,
            handshake_received_at_ms: state.handshake.received_at_ms.unwrap_or(0),
        };
        let _ = self.status_tx.send(snapshot);
    }
}

enum ConnectOutcome {
    Connected(Box<dyn BleSession>),
    Retry,
    ExternalCancel,
}

/// Channel pair handed to the status reporter and fleet controller (spec
/// §4.6, §4.7): read-only, never dereferences supervisor-private state
/// directly (spec §9).
pub fn status_channel() -> (watch::Sender<SessionSnapshot>, watch::Receiver<SessionSnapshot>) {
    watch::channel(SessionSnapshot::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::mock::MockSession;
    use crate::error::ConcentratorError;
    use std::time::Duration as StdDuration;
    use tokio::sync::{mpsc, Mutex};

    struct MockCentral {
        events_rx: Mutex<Option<mpsc::UnboundedReceiver<BleEvent>>>,
        writes_tx: mpsc::UnboundedSender<Vec<u8>>,
    }

    #[async_trait::async_trait]
    impl BleCentral for MockCentral {
        async fn dial(&self, _address: &str, _timeout: StdDuration) -> Result<Box<dyn BleSession>, ConcentratorError> {
            let events = self
                .events_rx
                .lock()
                .await
                .take()
                .expect("single dial expected in this test");
            Ok(Box::new(MockSession {
                events,
                writes: self.writes_tx.clone(),
                subscribed: false,
            }))
        }
    }

    fn sample_peripheral() -> PeripheralConfig {
        PeripheralConfig {
            address: "00:00:00:00:00:01".into(),
            name: "test".into(),
            num: 1,
            username: "alice".into(),
        }
    }

    #[test]
    fn status_starts_not_connected() {
        let state = SessionState::new();
        assert_eq!(state.status, SessionStatus::NotConnected);
    }

    #[tokio::test]
    async fn writes_handshake_bytes_after_connecting() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (writes_tx, mut writes_rx) = mpsc::unbounded_channel();
        let central = Arc::new(MockCentral {
            events_rx: Mutex::new(Some(events_rx)),
            writes_tx,
        });
        let (status_tx, mut status_rx) = status_channel();
        let (batcher_handle, batcher) = crate::batcher::OutboundBatcher::new();
        let (batch_tx, _batch_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            peripheral: sample_peripheral(),
            radio: crate::radio::RadioToken::new(),
            ble: central,
            batcher: batcher_handle,
            status_tx,
        };

        tokio::spawn(batcher.run(batch_tx, cancel.clone()));
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        let written = writes_rx.recv().await.expect("handshake bytes expected");
        assert_eq!(written, HANDSHAKE_BYTES.to_vec());
        assert_eq!(status_rx.borrow_and_update().status, SessionStatus::NotHandshaked);

        cancel.cancel();
        drop(events_tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_timeout_exits_listen_without_flushing_a_partial_batch() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (writes_tx, _writes_rx) = mpsc::unbounded_channel();
        let mut session: Box<dyn BleSession> = Box::new(MockSession {
            events: events_rx,
            writes: writes_tx,
            subscribed: true,
        });

        let (status_tx, _status_rx) = status_channel();
        let (batcher_handle, batcher) = crate::batcher::OutboundBatcher::new();
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(batcher.run(batch_tx, cancel.clone()));

        let supervisor = Supervisor {
            peripheral: sample_peripheral(),
            radio: crate::radio::RadioToken::new(),
            ble: Arc::new(MockCentral {
                events_rx: Mutex::new(None),
                writes_tx: mpsc::unbounded_channel().0,
            }),
            batcher: batcher_handle,
            status_tx,
        };

        // A session that has been Transmitting but has gone quiet since
        // before the window opened; the first liveness tick should end it.
        let mut state = SessionState::new();
        state.status = SessionStatus::Transmitting;
        state.last_packet_received_at = now_ms() - (LIVENESS_TO.as_millis() as i64 + 100);

        let exited_externally = supervisor.listen(&mut session, &mut state, &cancel).await;

        assert!(!exited_externally);
        assert!(batch_rx.try_recv().is_err(), "no packets should have been enqueued");

        cancel.cancel();
        drop(events_tx);
    }
}
