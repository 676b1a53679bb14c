//! A sans-I/O decoder for the Bluno wearable BLE frame protocol.
//!
//! This crate is deliberately ignorant of BLE, sockets, and async
//! runtimes: it decodes byte slices into [`packet::DecodeOutcome`] values
//! and tracks the small amount of state (gesture counters, the reassembly
//! slot) that the protocol itself requires. Everything else — sessions,
//! radios, batching, upstream delivery — lives in the `concentrator` binary
//! crate that drives this one.

pub mod error;
pub mod frame;
pub mod gesture;
pub mod packet;
pub mod reassembly;

pub use error::DecoderError;
pub use frame::{decode_bytes, decode_frame, HandshakeTimes, FRAME_LEN, STAGE_ONE_KEY};
pub use gesture::GestureState;
pub use packet::{DecodeOutcome, EmgFields, FrameBody, ImuFields, PacketType};
pub use reassembly::{ReassemblyBuffer, ReassemblyOutcome};
