//! `btleplug`-backed implementation of [`crate::ble::BleCentral`]. The BLE
//! driver/stack itself is out of scope (spec §1); this adapter exists only
//! to give the session supervisor a real radio to dial, following the same
//! central-manager/peripheral shape the pack's other host-side BLE programs
//! (`sirius-dive`, `funnyprinter-bot`) use `btleplug` for.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ble::{BleCentral, BleEvent, BleSession};
use crate::config::{
    CLIENT_CONFIG_DESCRIPTOR_UUID_SHORT, NOTIFY_CHARACTERISTIC_UUID_SHORT, SERVICE_UUID_SHORT,
};
use crate::error::ConcentratorError;

fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb | ((short as u128) << 96))
}

/// The single process-wide BLE controller (spec §9). Owns the adapter
/// handed down from `main`.
pub struct BtleplugCentral {
    adapter: Adapter,
}

impl BtleplugCentral {
    pub async fn init() -> Result<Self, ConcentratorError> {
        let manager = Manager::new()
            .await
            .map_err(|e| ConcentratorError::Ble(e.to_string()))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| ConcentratorError::Ble(e.to_string()))?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| ConcentratorError::Ble("no BLE adapter present".into()))?;
        Ok(Self { adapter })
    }

    async fn find_by_address(&self, address: &str) -> Result<Peripheral, ConcentratorError> {
        for p in self
            .adapter
            .peripherals()
            .await
            .map_err(|e| ConcentratorError::Ble(e.to_string()))?
        {
            if let Ok(Some(props)) = p.properties().await {
                if props.address.to_string().eq_ignore_ascii_case(address) {
                    return Ok(p);
                }
            }
        }
        Err(ConcentratorError::Ble(format!(
            "peripheral {address} not found by adapter (preconfigured addresses require a prior discovery pass)"
        )))
    }
}

#[async_trait]
impl BleCentral for BtleplugCentral {
    async fn dial(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Box<dyn BleSession>, ConcentratorError> {
        let peripheral = self.find_by_address(address).await?;
        tokio::time::timeout(timeout, peripheral.connect())
            .await
            .map_err(|_| ConcentratorError::Ble(format!("dial to {address} timed out")))?
            .map_err(|e| ConcentratorError::Ble(e.to_string()))?;
        Ok(Box::new(BtleplugSession {
            peripheral,
            events: None,
        }))
    }
}

/// A live `btleplug` connection, post-dial.
pub struct BtleplugSession {
    peripheral: Peripheral,
    events: Option<mpsc::UnboundedReceiver<BleEvent>>,
}

#[async_trait]
impl BleSession for BtleplugSession {
    async fn subscribe(&mut self) -> Result<(), ConcentratorError> {
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| ConcentratorError::Ble(e.to_string()))?;

        let service_uuid = short_uuid(SERVICE_UUID_SHORT);
        let char_uuid = short_uuid(NOTIFY_CHARACTERISTIC_UUID_SHORT);
        let _descriptor_uuid = short_uuid(CLIENT_CONFIG_DESCRIPTOR_UUID_SHORT);

        let characteristic = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service_uuid && c.uuid == char_uuid)
            .ok_or_else(|| ConcentratorError::Ble("notification characteristic not found".into()))?;

        // The peripheral omits the 0x2902 client-config descriptor; most
        // platform BLE stacks attach it implicitly on `subscribe`, so no
        // explicit descriptor write is issued here (spec §4.3).
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| ConcentratorError::Ble(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| ConcentratorError::Ble(e.to_string()))?;
        tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                if tx.send(BleEvent::Notification(data.value)).is_err() {
                    break;
                }
            }
        });
        self.events = Some(rx);

        Ok(())
    }

    async fn write_without_response(&mut self, data: &[u8]) -> Result<(), ConcentratorError> {
        let service_uuid = short_uuid(SERVICE_UUID_SHORT);
        let char_uuid = short_uuid(NOTIFY_CHARACTERISTIC_UUID_SHORT);
        let characteristic = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service_uuid && c.uuid == char_uuid)
            .ok_or_else(|| ConcentratorError::Ble("characteristic not found".into()))?;
        self.peripheral
            .write(&characteristic, data, WriteType::WithoutResponse)
            .await
            .map_err(|e| ConcentratorError::Ble(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<BleEvent> {
        match &mut self.events {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn unsubscribe(&mut self) {
        let _ = self.peripheral.disconnect().await;
    }
}
