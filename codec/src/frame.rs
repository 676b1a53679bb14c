//! Frame codec (spec §4.1): checksum, AES-ECB decrypt, type discrimination,
//! field extraction, timestamp reconstruction and gesture derivation for one
//! 19-byte frame.

use aes::cipher::{generic_array::GenericArray, Block, BlockDecrypt, KeyInit};
use aes::Aes128;

use crate::error::DecoderError;
use crate::gesture::GestureState;
use crate::packet::{DecodeOutcome, EmgFields, FrameBody, ImuFields, PacketType};

/// Fixed frame size in bytes.
pub const FRAME_LEN: usize = 19;

/// Stage-one AES-128 key used to decrypt bytes 0..15 of every frame.
pub const STAGE_ONE_KEY: [u8; 16] = [
    0x2A, 0x46, 0x2D, 0x4A, 0x61, 0x4E, 0x64, 0x52, 0x67, 0x55, 0x6A, 0x58, 0x6E, 0x32, 0x72, 0x35,
];

/// Second AES-128 key the protocol's key material defines alongside
/// [`STAGE_ONE_KEY`], with a documented offset of 2. No byte range in the
/// frame layout calls for a second decrypt pass, so this crate keeps the
/// constants for fidelity but never applies them — see DESIGN.md.
#[allow(dead_code)]
pub const STAGE_TWO_KEY: [u8; 16] = [
    0x7A, 0x24, 0x43, 0x26, 0x46, 0x29, 0x4A, 0x40, 0x4E, 0x63, 0x52, 0x66, 0x55, 0x6A, 0x57, 0x6E,
];
#[allow(dead_code)]
pub const STAGE_TWO_OFFSET: usize = 2;

const ACK_SYMBOL: u8 = 0xF3;
const IMU_SYMBOL: u8 = 0x49;
const EMG_SYMBOL: u8 = 0x45;
const LIVENESS_SYMBOL: u8 = 0x4C;

/// Handshake timestamps (monotonic-as-UNIX-epoch-ms) used to reconstruct
/// each frame's absolute timestamp. Owned by the session, not the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandshakeTimes {
    pub sent_at_ms: i64,
    pub received_at_ms: Option<i64>,
}

/// XOR of bytes 0..17 (18 bytes), compared against byte 18.
fn checksum_ok(raw: &[u8; FRAME_LEN]) -> bool {
    let mut x = 0u8;
    for &b in &raw[0..18] {
        x ^= b;
    }
    x == raw[18]
}

/// Decrypts bytes 0..15 in place with the stage-one key; bytes 16..18 are
/// left untouched by the caller.
fn decrypt_stage_one(block: &mut [u8; 16]) {
    let cipher = Aes128::new(GenericArray::from_slice(&STAGE_ONE_KEY));
    let mut ga: Block<Aes128> = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut ga);
    block.copy_from_slice(&ga);
}

fn read_i16_le(b: &[u8], off: usize) -> i16 {
    i16::from_le_bytes([b[off], b[off + 1]])
}

fn read_f32_le(b: &[u8], off: usize) -> f32 {
    f32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn read_ts_offset(b: &[u8]) -> u32 {
    // 3 bytes little-endian, high byte implicitly 0.
    u32::from(b[1]) | (u32::from(b[2]) << 8) | (u32::from(b[3]) << 16)
}

fn reconstruct_timestamp(handshake: &HandshakeTimes, ts_offset: u32) -> i64 {
    let delay = match handshake.received_at_ms {
        Some(recv) => (recv - handshake.sent_at_ms) / 2,
        None => 0,
    };
    handshake.sent_at_ms + delay + i64::from(ts_offset)
}

/// Decode exactly one 19-byte frame. Never returns an error for malformed
/// *content* (bad checksum, unknown type symbol) — those classify as
/// [`PacketType::Invalid`] per the protocol's own validation order. Errors
/// are reserved for inputs that violate the codec's own preconditions.
pub fn decode_frame(
    raw: &[u8; FRAME_LEN],
    handshake: &HandshakeTimes,
    gesture: &mut GestureState,
    now_ms: i64,
) -> DecodeOutcome {
    let invalid = || DecodeOutcome {
        kind: PacketType::Invalid,
        timestamp_ms: now_ms,
        movement: 0,
        body: FrameBody::None,
        first_ack: false,
    };

    if !checksum_ok(raw) {
        return invalid();
    }

    let mut block: [u8; 16] = raw[0..16].try_into().expect("slice is 16 bytes");
    decrypt_stage_one(&mut block);

    let mut decrypted = [0u8; FRAME_LEN];
    decrypted[0..16].copy_from_slice(&block);
    decrypted[16..19].copy_from_slice(&raw[16..19]);

    let type_symbol = decrypted[0];
    let kind = match type_symbol {
        ACK_SYMBOL => PacketType::Ack,
        EMG_SYMBOL => PacketType::Emg,
        IMU_SYMBOL => PacketType::Imu,
        LIVENESS_SYMBOL => PacketType::Liveness,
        _ => PacketType::Invalid,
    };

    if kind == PacketType::Invalid {
        return invalid();
    }

    let ts_offset = read_ts_offset(&decrypted);
    let timestamp_ms = reconstruct_timestamp(handshake, ts_offset);

    match kind {
        PacketType::Ack => DecodeOutcome {
            kind,
            timestamp_ms,
            movement: 0,
            body: FrameBody::None,
            first_ack: handshake.received_at_ms.is_none(),
        },
        PacketType::Liveness => {
            gesture.reset_directional();
            DecodeOutcome {
                kind,
                timestamp_ms,
                movement: 0,
                body: FrameBody::None,
                first_ack: false,
            }
        }
        PacketType::Imu => {
            let fields = ImuFields {
                x: read_i16_le(&decrypted, 4),
                y: read_i16_le(&decrypted, 6),
                z: read_i16_le(&decrypted, 8),
                pitch: read_i16_le(&decrypted, 10),
                roll: read_i16_le(&decrypted, 12),
                yaw: read_i16_le(&decrypted, 14),
            };
            let movement = gesture.derive(fields.pitch, fields.roll, fields.yaw, now_ms);
            DecodeOutcome {
                kind,
                timestamp_ms,
                movement,
                body: FrameBody::Imu(fields),
                first_ack: false,
            }
        }
        PacketType::Emg => {
            // Reserved byte 16 carries the muscle-sensor presence flag.
            let muscle_sensor = decrypted[16] != 0;
            let fields = EmgFields {
                muscle_sensor,
                mav: read_f32_le(&decrypted, 4),
                rms: read_f32_le(&decrypted, 8),
                mnf: read_f32_le(&decrypted, 12),
            };
            DecodeOutcome {
                kind,
                timestamp_ms,
                movement: 0,
                body: FrameBody::Emg(fields),
                first_ack: false,
            }
        }
        PacketType::Invalid => unreachable!("filtered above"),
    }
}

/// Decode a variable-length slice, validating it is exactly [`FRAME_LEN`]
/// bytes before delegating to [`decode_frame`]. Used for full (unfragmented)
/// notifications; short/long notifications go through
/// [`crate::reassembly::ReassemblyBuffer`] instead.
pub fn decode_bytes(
    raw: &[u8],
    handshake: &HandshakeTimes,
    gesture: &mut GestureState,
    now_ms: i64,
) -> Result<DecodeOutcome, DecoderError> {
    let arr: [u8; FRAME_LEN] = raw.try_into().map_err(|_| DecoderError::WrongLength {
        expected: FRAME_LEN,
        actual: raw.len(),
    })?;
    Ok(decode_frame(&arr, handshake, gesture, now_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt_stage_one(block: &mut [u8; 16]) {
        use aes::cipher::BlockEncrypt;
        let cipher = Aes128::new(GenericArray::from_slice(&STAGE_ONE_KEY));
        let mut ga: Block<Aes128> = GenericArray::clone_from_slice(block);
        cipher.encrypt_block(&mut ga);
        block.copy_from_slice(&ga);
    }

    fn build_frame(type_symbol: u8, ts_offset: u32, payload: [u8; 12], reserved: [u8; 2]) -> [u8; FRAME_LEN] {
        let mut plain = [0u8; 16];
        plain[0] = type_symbol;
        plain[1] = (ts_offset & 0xFF) as u8;
        plain[2] = ((ts_offset >> 8) & 0xFF) as u8;
        plain[3] = ((ts_offset >> 16) & 0xFF) as u8;
        plain[4..16].copy_from_slice(&payload);

        let mut block = plain;
        encrypt_stage_one(&mut block);

        let mut raw = [0u8; FRAME_LEN];
        raw[0..16].copy_from_slice(&block);
        raw[16..18].copy_from_slice(&reserved);

        let mut x = 0u8;
        for &b in &raw[0..18] {
            x ^= b;
        }
        raw[18] = x;
        raw
    }

    #[test]
    fn checksum_gate_rejects_tampered_frame() {
        let mut raw = build_frame(ACK_SYMBOL, 0, [0; 12], [0; 2]);
        raw[18] ^= 0xFF;
        let handshake = HandshakeTimes::default();
        let mut gesture = GestureState::new();
        let out = decode_frame(&raw, &handshake, &mut gesture, 0);
        assert_eq!(out.kind, PacketType::Invalid);
    }

    #[test]
    fn ack_before_handshake_flags_first_ack() {
        let raw = build_frame(ACK_SYMBOL, 0, [0; 12], [0; 2]);
        let handshake = HandshakeTimes {
            sent_at_ms: 1_000,
            received_at_ms: None,
        };
        let mut gesture = GestureState::new();
        let out = decode_frame(&raw, &handshake, &mut gesture, 1_050);
        assert_eq!(out.kind, PacketType::Ack);
        assert!(out.first_ack);
    }

    #[test]
    fn imu_timestamp_uses_handshake_midpoint() {
        let raw = build_frame(IMU_SYMBOL, 100, [0; 12], [0; 2]);
        let handshake = HandshakeTimes {
            sent_at_ms: 1_000,
            received_at_ms: Some(1_040),
        };
        let mut gesture = GestureState::new();
        let out = decode_frame(&raw, &handshake, &mut gesture, 5_000);
        // delta = (1040-1000)/2 = 20; ts = 1000 + 20 + 100 = 1120
        assert_eq!(out.timestamp_ms, 1_120);
    }

    #[test]
    fn timestamp_monotonic_for_increasing_offsets() {
        let handshake = HandshakeTimes {
            sent_at_ms: 0,
            received_at_ms: Some(10),
        };
        let mut gesture = GestureState::new();
        let p = decode_frame(&build_frame(IMU_SYMBOL, 5, [0; 12], [0; 2]), &handshake, &mut gesture, 0);
        let q = decode_frame(&build_frame(IMU_SYMBOL, 9, [0; 12], [0; 2]), &handshake, &mut gesture, 0);
        assert!(p.timestamp_ms <= q.timestamp_ms);
    }

    #[test]
    fn unknown_type_symbol_is_invalid() {
        let raw = build_frame(0x00, 0, [0; 12], [0; 2]);
        let handshake = HandshakeTimes::default();
        let mut gesture = GestureState::new();
        let out = decode_frame(&raw, &handshake, &mut gesture, 0);
        assert_eq!(out.kind, PacketType::Invalid);
    }

    #[test]
    fn emg_fields_decode_when_muscle_sensor_flag_set() {
        let mut payload = [0u8; 12];
        payload[0..4].copy_from_slice(&1.5f32.to_le_bytes());
        payload[4..8].copy_from_slice(&2.5f32.to_le_bytes());
        payload[8..12].copy_from_slice(&3.5f32.to_le_bytes());
        let raw = build_frame(EMG_SYMBOL, 0, payload, [1, 0]);
        let handshake = HandshakeTimes::default();
        let mut gesture = GestureState::new();
        let out = decode_frame(&raw, &handshake, &mut gesture, 0);
        match out.body {
            FrameBody::Emg(f) => {
                assert!(f.muscle_sensor);
                assert_eq!(f.mav, 1.5);
                assert_eq!(f.rms, 2.5);
                assert_eq!(f.mnf, 3.5);
            }
            _ => panic!("expected EMG body"),
        }
    }

    #[test]
    fn decode_bytes_rejects_wrong_length() {
        let handshake = HandshakeTimes::default();
        let mut gesture = GestureState::new();
        let err = decode_bytes(&[0u8; 10], &handshake, &mut gesture, 0).unwrap_err();
        assert_eq!(
            err,
            DecoderError::WrongLength {
                expected: FRAME_LEN,
                actual: 10
            }
        );
    }
}
