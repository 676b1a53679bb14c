//! Fleet controller (spec §4.6, §9): owns the Waiting/Running lifecycle and
//! the cancellation-scope tree that the session supervisors, batcher and
//! status reporter all live under.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::batcher::OutboundBatcher;
use crate::ble::BleCentral;
use crate::config::FleetConfig;
use crate::model::{Packet, TimestampEntry};
use crate::radio::RadioToken;
use crate::session::{status_channel, SessionSnapshot, Supervisor};

/// Lifecycle state (spec §4.6): `Waiting` holds no live supervisors;
/// `Running` owns one cancellation scope for the whole fleet.
enum RunState {
    Waiting,
    Running {
        scope: CancellationToken,
        tasks: Vec<tokio::task::JoinHandle<()>>,
    },
}

/// Drives the fleet between Waiting and Running in response to inbound
/// commands, and answers time-sync requests.
pub struct FleetController {
    config: FleetConfig,
    ble: Arc<dyn BleCentral>,
    radio: RadioToken,
    root_cancel: CancellationToken,
    state: RunState,
    status_rx_by_num: HashMap<u8, watch::Receiver<SessionSnapshot>>,
}

impl FleetController {
    pub fn new(config: FleetConfig, ble: Arc<dyn BleCentral>, root_cancel: CancellationToken) -> Self {
        Self {
            config,
            ble,
            radio: RadioToken::new(),
            root_cancel,
            state: RunState::Waiting,
            status_rx_by_num: HashMap::new(),
        }
    }

    /// Send decoded-packet batches out over this channel; wired to the
    /// upstream link by the caller.
    pub async fn resume(&mut self, batches_out: mpsc::UnboundedSender<Vec<Packet>>) {
        if matches!(self.state, RunState::Running { .. }) {
            info!("resume received while already running, ignored");
            return;
        }

        let scope = self.root_cancel.child_token();
        let mut tasks = Vec::with_capacity(self.config.peripherals.len() + 1);

        let (batcher_handle, batcher) = OutboundBatcher::new();
        tasks.push(tokio::spawn(batcher.run(batches_out, scope.clone())));

        self.status_rx_by_num.clear();
        for peripheral in &self.config.peripherals {
            let (status_tx, status_rx) = status_channel();
            self.status_rx_by_num.insert(peripheral.num, status_rx);

            let supervisor = Supervisor {
                peripheral: peripheral.clone(),
                radio: self.radio.clone(),
                ble: self.ble.clone(),
                batcher: batcher_handle.clone(),
                status_tx,
            };
            tasks.push(tokio::spawn(supervisor.run(scope.clone())));
        }

        info!(peripherals = self.config.peripherals.len(), "fleet resumed");
        self.state = RunState::Running { scope, tasks };
    }

    /// Cancel every supervisor and the batcher, and wait for them to exit.
    /// Per spec §9, this is the only place the fleet's cancellation scope
    /// is dropped; a fresh one is created on the next `resume`.
    pub async fn pause(&mut self) {
        let previous = std::mem::replace(&mut self.state, RunState::Waiting);
        if let RunState::Running { scope, tasks } = previous {
            scope.cancel();
            for task in tasks {
                let _ = task.await;
            }
            info!("fleet paused");
        }
        self.status_rx_by_num.clear();
    }

    /// Compute a time-sync reply for every time-sync-eligible peripheral
    /// (spec §4.6: `num <= 3`, EMG devices excluded), from each
    /// peripheral's own `handshake_sent_at`/`handshake_received_at`.
    pub fn time_sync_reply(&self, t_one: u64) -> Vec<TimestampEntry> {
        let now = chrono::Utc::now().timestamp_millis();
        self.config
            .peripherals
            .iter()
            .filter(|p| p.eligible_for_time_sync())
            .map(|p| {
                let snapshot = self.status_rx_by_num.get(&p.num).map(|rx| *rx.borrow()).unwrap_or_default();
                let (t_two, t_three) = if snapshot.handshake_received_at_ms == 0 {
                    (snapshot.handshake_sent_at_ms, 0)
                } else {
                    let d = now - snapshot.handshake_received_at_ms;
                    (snapshot.handshake_sent_at_ms + d, snapshot.handshake_received_at_ms + d)
                };
                TimestampEntry {
                    t_one,
                    num: p.num,
                    t_two,
                    t_three,
                }
            })
            .collect()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running { .. })
    }

    /// Snapshot of every peripheral's status channel, for the status
    /// reporter (spec §4.7). Empty while `Waiting`.
    pub fn status_receivers(&self) -> Vec<(u8, String, watch::Receiver<SessionSnapshot>)> {
        self.config
            .peripherals
            .iter()
            .filter_map(|p| {
                self.status_rx_by_num
                    .get(&p.num)
                    .map(|rx| (p.num, p.name.clone(), rx.clone()))
            })
            .collect()
    }
}
