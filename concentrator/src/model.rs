//! Wire types shared between the batcher, fleet controller, and upstream
//! link (spec §6). Kept separate from `upstream.rs` so the batcher doesn't
//! need to depend on the socket-handling module.

use serde::{Deserialize, Serialize};

/// One decoded IMU/EMG packet, ready for upstream delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub unix_timestamp_milliseconds: i64,
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub pitch: i16,
    pub roll: i16,
    pub yaw: i16,
    pub bluno: u8,
    pub movement: i8,
    pub muscle_sensor: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_absolute_value: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_mean_square: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_frequency: Option<f32>,
}

impl Packet {
    pub fn from_imu(
        timestamp_ms: i64,
        bluno: u8,
        movement: i8,
        fields: codec::ImuFields,
    ) -> Self {
        Packet {
            unix_timestamp_milliseconds: timestamp_ms,
            x: fields.x,
            y: fields.y,
            z: fields.z,
            pitch: fields.pitch,
            roll: fields.roll,
            yaw: fields.yaw,
            bluno,
            movement,
            muscle_sensor: false,
            mean_absolute_value: None,
            root_mean_square: None,
            mean_frequency: None,
        }
    }

    pub fn from_emg(timestamp_ms: i64, bluno: u8, fields: codec::EmgFields) -> Self {
        Packet {
            unix_timestamp_milliseconds: timestamp_ms,
            x: 0,
            y: 0,
            z: 0,
            pitch: 0,
            roll: 0,
            yaw: 0,
            bluno,
            movement: 0,
            muscle_sensor: fields.muscle_sensor,
            mean_absolute_value: fields.muscle_sensor.then_some(fields.mav),
            root_mean_square: fields.muscle_sensor.then_some(fields.rms),
            mean_frequency: fields.muscle_sensor.then_some(fields.mnf),
        }
    }
}

/// One entry of a time-sync reply (spec §4.6, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampEntry {
    pub t_one: u64,
    pub num: u8,
    pub t_two: i64,
    pub t_three: i64,
}

/// One entry of the start-up bluno/username mapping (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlunoMappingEntry {
    pub num: u8,
    pub username: String,
}

/// The three outbound data-socket message shapes (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataMessage {
    Packets { packets: Vec<Packet> },
    Timestamps { timestamps: Vec<TimestampEntry> },
    BlunoMapping { bluno_mapping: Vec<BlunoMappingEntry> },
}

/// The one inbound notif-socket message shape (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub cmd: CommandKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t_one: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Resume,
    Pause,
    TimeSync,
}
