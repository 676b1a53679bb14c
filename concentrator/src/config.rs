//! Fleet inventory and protocol timing constants (spec §2-§6).
//!
//! Loading the fleet inventory from *somewhere* is in scope (the session
//! pipeline needs peripheral identities to exist), but the inventory
//! component itself — discovery, persistence, a management UI — is
//! explicitly out of scope (spec §1). This module is the minimal stand-in:
//! a flat JSON file of preconfigured addresses.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConcentratorError;

/// Radio dial timeout (spec §4.3, §5).
pub const CONNECT_TO: Duration = Duration::from_millis(1_500);
/// Liveness timeout: no packets for this long while Transmitting triggers
/// teardown.
pub const LIVENESS_TO: Duration = Duration::from_millis(2_000);
/// Liveness ticker period.
pub const LIVENESS_CHECK: Duration = Duration::from_millis(40);
/// Sleep between failed dial attempts, for radio fairness.
pub const DIAL_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Outbound batcher flush period.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(5);
/// Outbound batch size.
pub const BATCH_SIZE: usize = 4;
/// Status reporter period.
pub const STATUS_INTERVAL: Duration = Duration::from_millis(2_500);
/// Maximum peripheral `num` eligible for time-sync (EMG devices excluded).
pub const TIME_SYNC_MAX_NUM: u8 = 3;

/// Handshake byte sequence written without response (spec §4.3, §6).
pub const HANDSHAKE_BYTES: [u8; 3] = [0x41, 0x0D, 0x0A];

/// Short UUIDs for the single known service/characteristic (spec §6).
pub const SERVICE_UUID_SHORT: u16 = 0xdfb0;
pub const NOTIFY_CHARACTERISTIC_UUID_SHORT: u16 = 0xdfb1;
pub const CLIENT_CONFIG_DESCRIPTOR_UUID_SHORT: u16 = 0x2902;

/// One entry in the fleet inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeripheralConfig {
    /// Stable BLE address, e.g. `"80:30:DC:E9:1C:34"`.
    pub address: String,
    pub name: String,
    /// Ordinal number, `n in [1..N]`.
    pub num: u8,
    pub username: String,
}

impl PeripheralConfig {
    /// EMG devices are excluded from time-sync (spec §4.6).
    pub fn eligible_for_time_sync(&self) -> bool {
        self.num <= TIME_SYNC_MAX_NUM
    }
}

/// The full fleet inventory, loaded once at start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub peripherals: Vec<PeripheralConfig>,
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self, ConcentratorError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConcentratorError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        let config: FleetConfig = serde_json::from_str(&text)?;
        Ok(config)
    }
}
