//! BLE interface (spec §6, §9 "global mutable state"). The BLE driver/stack
//! itself is out of scope (spec §1); this module is the sanctioned contact
//! point the session supervisor (C3) talks to, modeled as two small traits
//! so the supervisor's state machine is testable without real hardware.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ConcentratorError;

/// One event surfaced by an active session's notification stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    /// One GATT notification payload (may be short/long per spec §4.2).
    Notification(Vec<u8>),
    /// The peripheral disconnected.
    Disconnected,
}

/// A live connection to one peripheral, from subscribe through teardown.
#[async_trait]
pub trait BleSession: Send {
    /// Discover the known service/characteristic, attach the `0x2902`
    /// client-config descriptor, and subscribe to notifications.
    async fn subscribe(&mut self) -> Result<(), ConcentratorError>;

    /// Write without response (used for the handshake byte sequence).
    async fn write_without_response(&mut self, data: &[u8]) -> Result<(), ConcentratorError>;

    /// Await the next notification or disconnect notice. Returns `None`
    /// when the session handle itself has been torn down.
    async fn next_event(&mut self) -> Option<BleEvent>;

    /// Unsubscribe and release the underlying connection.
    async fn unsubscribe(&mut self);
}

/// The process-wide BLE controller capability (spec §9: "model it as a
/// capability handed down from `main`, not as ambient state").
#[async_trait]
pub trait BleCentral: Send + Sync {
    async fn dial(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Box<dyn BleSession>, ConcentratorError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use tokio::sync::mpsc;

    /// A fully in-memory [`BleSession`] for exercising the session FSM
    /// without a real radio.
    pub struct MockSession {
        pub events: mpsc::UnboundedReceiver<BleEvent>,
        pub writes: mpsc::UnboundedSender<Vec<u8>>,
        pub subscribed: bool,
    }

    #[async_trait]
    impl BleSession for MockSession {
        async fn subscribe(&mut self) -> Result<(), ConcentratorError> {
            self.subscribed = true;
            Ok(())
        }

        async fn write_without_response(&mut self, data: &[u8]) -> Result<(), ConcentratorError> {
            let _ = self.writes.send(data.to_vec());
            Ok(())
        }

        async fn next_event(&mut self) -> Option<BleEvent> {
            self.events.recv().await
        }

        async fn unsubscribe(&mut self) {
            self.subscribed = false;
        }
    }
}
