//! Reassembly buffer (spec §4.2): a per-peripheral single-slot LIFO that
//! joins a truncated notification with its successor.

use crate::frame::{decode_bytes, HandshakeTimes, FRAME_LEN};
use crate::gesture::GestureState;
use crate::packet::{DecodeOutcome, PacketType};

/// Outcome of pushing one wrong-length fragment into the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ReassemblyOutcome {
    /// The slot was empty; `curr` is now held, nothing emitted.
    Buffered,
    /// The slot held a fragment but `prev ++ curr` did not reconcile into a
    /// valid frame; the slot now holds `curr`, `prev` is discarded.
    Replaced,
    /// `prev ++ curr` reconciled into a valid frame, which is emitted. The
    /// slot is now empty.
    Emitted(DecodeOutcome),
}

/// Best-effort single-slot fragment buffer. False positives are accepted:
/// the checksum gate and the symbol space mostly eliminate them.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    slot: Option<Vec<u8>>,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// Cleared on any status regression to NotConnected.
    pub fn clear(&mut self) {
        self.slot = None;
    }

    pub fn is_occupied(&self) -> bool {
        self.slot.is_some()
    }

    /// Push one fragment of unexpected length (`curr.len() != FRAME_LEN`).
    /// The caller is responsible for only calling this on short/long
    /// notifications and for counting `incorrect_length` once per call.
    pub fn push(
        &mut self,
        curr: Vec<u8>,
        handshake: &HandshakeTimes,
        gesture: &mut GestureState,
        now_ms: i64,
    ) -> ReassemblyOutcome {
        match self.slot.take() {
            Some(prev) => {
                let mut combined = prev;
                combined.extend_from_slice(&curr);

                if combined.len() == FRAME_LEN {
                    // decode_bytes cannot fail length-wise here; any
                    // malformed-content classification is Invalid.
                    let outcome = decode_bytes(&combined, handshake, gesture, now_ms)
                        .expect("combined length checked above");
                    if outcome.kind != PacketType::Invalid {
                        return ReassemblyOutcome::Emitted(outcome);
                    }
                }

                self.slot = Some(curr);
                ReassemblyOutcome::Replaced
            }
            None => {
                self.slot = Some(curr);
                ReassemblyOutcome::Buffered
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::STAGE_ONE_KEY;
    use aes::cipher::{generic_array::GenericArray, Block, BlockEncrypt, KeyInit};
    use aes::Aes128;

    const ACK_SYMBOL: u8 = 0xF3;

    fn build_frame(type_symbol: u8) -> [u8; FRAME_LEN] {
        let mut plain = [0u8; 16];
        plain[0] = type_symbol;

        let cipher = Aes128::new(GenericArray::from_slice(&STAGE_ONE_KEY));
        let mut block: Block<Aes128> = GenericArray::clone_from_slice(&plain);
        cipher.encrypt_block(&mut block);

        let mut raw = [0u8; FRAME_LEN];
        raw[0..16].copy_from_slice(&block);

        let mut x = 0u8;
        for &b in &raw[0..18] {
            x ^= b;
        }
        raw[18] = x;
        raw
    }

    #[test]
    fn reassembly_completeness() {
        let raw = build_frame(ACK_SYMBOL);
        let (a, b) = raw.split_at(9);

        let mut buf = ReassemblyBuffer::new();
        let handshake = HandshakeTimes::default();
        let mut gesture = GestureState::new();

        let first = buf.push(a.to_vec(), &handshake, &mut gesture, 0);
        assert_eq!(first, ReassemblyOutcome::Buffered);

        let second = buf.push(b.to_vec(), &handshake, &mut gesture, 0);
        match second {
            ReassemblyOutcome::Emitted(out) => assert_eq!(out.kind, PacketType::Ack),
            other => panic!("expected Emitted, got {other:?}"),
        }
        assert!(!buf.is_occupied());

        // A third fragment afterward must not re-emit the same packet.
        let third = buf.push(vec![0u8; 5], &handshake, &mut gesture, 0);
        assert_eq!(third, ReassemblyOutcome::Buffered);
    }

    #[test]
    fn non_reconciling_fragment_replaces_slot() {
        let mut buf = ReassemblyBuffer::new();
        let handshake = HandshakeTimes::default();
        let mut gesture = GestureState::new();

        buf.push(vec![1, 2, 3], &handshake, &mut gesture, 0);
        let outcome = buf.push(vec![9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9, 9], &handshake, &mut gesture, 0);
        assert_eq!(outcome, ReassemblyOutcome::Replaced);
        assert!(buf.is_occupied());
    }

    #[test]
    fn clear_empties_slot() {
        let mut buf = ReassemblyBuffer::new();
        let handshake = HandshakeTimes::default();
        let mut gesture = GestureState::new();
        buf.push(vec![1, 2, 3], &handshake, &mut gesture, 0);
        assert!(buf.is_occupied());
        buf.clear();
        assert!(!buf.is_occupied());
    }
}
