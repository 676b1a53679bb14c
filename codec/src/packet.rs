//! Decoded frame types. A closed set of variants (Ack/IMU/EMG/Liveness/Invalid)
//! is modelled as a tagged union rather than an open trait object, per the
//! protocol's fixed type-symbol space.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The type symbol carried in byte 0 of a decrypted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PacketType {
    Ack,
    Imu,
    Emg,
    Liveness,
    Invalid,
}

/// IMU payload fields, offsets 4/6/8/10/12/14, signed int16 little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImuFields {
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub pitch: i16,
    pub roll: i16,
    pub yaw: i16,
}

/// EMG payload fields, f32 little-endian at offsets 4/8/12.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmgFields {
    pub muscle_sensor: bool,
    pub mav: f32,
    pub rms: f32,
    pub mnf: f32,
}

/// Type-dependent payload of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FrameBody {
    None,
    Imu(ImuFields),
    Emg(EmgFields),
}

/// The result of decoding exactly one 19-byte frame (or one reconciled
/// pair). `timestamp_ms` and `movement` are well-defined for every variant
/// but only meaningful for `Imu`/`Emg` — Ack/Liveness/Invalid frames are
/// never forwarded upstream, so callers should not rely on them for those
/// kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodeOutcome {
    pub kind: PacketType,
    pub timestamp_ms: i64,
    pub movement: i8,
    pub body: FrameBody,
    /// True when this is an Ack received before handshake completion — the
    /// caller must record `handshake_received_at = now` when this is set.
    pub first_ack: bool,
}
