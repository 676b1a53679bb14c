//! Outbound batcher (spec §4.5): a one-slot hand-off channel drained
//! continuously into a bounded FIFO, flushed in whole-`BATCH_SIZE` units on
//! a timer.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{BATCH_SIZE, FLUSH_INTERVAL};
use crate::model::Packet;

/// Handle held by session supervisors to enqueue decoded packets.
/// Non-blocking from the caller's perspective: the drainer task keeps the
/// channel empty.
#[derive(Clone)]
pub struct BatcherHandle {
    tx: mpsc::UnboundedSender<Packet>,
}

impl BatcherHandle {
    /// Enqueue one packet. Only Transmitting-state IMU/EMG packets should
    /// ever reach this call site — Ack/Liveness/Invalid frames are filtered
    /// by the session supervisor before this point (spec §4.5).
    pub fn enqueue(&self, packet: Packet) {
        if self.tx.send(packet).is_err() {
            warn!("batcher enqueue after drainer shutdown, packet dropped");
        }
    }
}

/// Runs the drain + flush loop. Returns the flushed batches over `out`, one
/// `Vec<Packet>` of exactly `BATCH_SIZE` elements per flush.
pub struct OutboundBatcher {
    rx: mpsc::UnboundedReceiver<Packet>,
    queue: VecDeque<Packet>,
}

impl OutboundBatcher {
    pub fn new() -> (BatcherHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            BatcherHandle { tx },
            Self {
                rx,
                queue: VecDeque::new(),
            },
        )
    }

    /// Drive the batcher until cancelled, sending full batches to `out`.
    pub async fn run(mut self, out: mpsc::UnboundedSender<Vec<Packet>>, cancel: tokio_util::sync::CancellationToken) {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("outbound batcher cancelled, {} packets still queued", self.queue.len());
                    return;
                }
                maybe = self.rx.recv() => {
                    match maybe {
                        Some(packet) => self.queue.push_back(packet),
                        None => return,
                    }
                }
                _ = ticker.tick() => {
                    while self.queue.len() >= BATCH_SIZE {
                        let batch: Vec<Packet> = self.queue.drain(..BATCH_SIZE).collect();
                        if out.send(batch).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::ImuFields;

    fn sample_packet(bluno: u8) -> Packet {
        Packet::from_imu(0, bluno, 0, ImuFields::default())
    }

    #[tokio::test]
    async fn flushes_exactly_batch_size_and_waits_for_the_rest() {
        let (handle, batcher) = OutboundBatcher::new();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let cancel = tokio_util::sync::CancellationToken::new();

        let cancel_clone = cancel.clone();
        let task = tokio::spawn(batcher.run(out_tx, cancel_clone));

        for i in 0..(BATCH_SIZE as u8 + 1) {
            handle.enqueue(sample_packet(i));
        }

        let batch = out_rx.recv().await.unwrap();
        assert_eq!(batch.len(), BATCH_SIZE);

        // The remaining packet should not be flushed on its own.
        tokio::time::sleep(FLUSH_INTERVAL * 3).await;
        assert!(out_rx.try_recv().is_err());

        cancel.cancel();
        task.await.unwrap();
    }
}
