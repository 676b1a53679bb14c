//! Status reporter (spec §4.7): a read-only periodic printer of each
//! peripheral's current lifecycle status. Never touches supervisor-private
//! state directly — it only ever reads the `watch` channels published by
//! each supervisor (spec §9).

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::STATUS_INTERVAL;
use crate::fleet::FleetController;

/// Runs until `cancel` fires, printing one line per peripheral every
/// `STATUS_INTERVAL`. While the fleet is `Waiting` there is nothing to
/// print and the tick is a no-op. Plain-text only: coloured terminal
/// reporting is out of scope.
pub async fn run(fleet: Arc<Mutex<FleetController>>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let receivers = fleet.lock().await.status_receivers();
                for (num, name, rx) in receivers {
                    let status = rx.borrow().status;
                    println!("bluno {num} ({name}): {status}");
                    debug!(bluno = num, peripheral = %name, status = ?status, "status tick");
                }
            }
        }
    }
}
