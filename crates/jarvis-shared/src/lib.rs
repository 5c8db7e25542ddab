//! # jarvis-shared
//!
//! Types shared by the Jarvis gateway crates: the JSON command protocol
//! spoken on the command channel, the push frames emitted on the telemetry
//! and wake-word channels, and the settings document models.

pub mod constants;
pub mod error;
pub mod events;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
