//! Error types for the decoding and transport layers

use thiserror::Error;

use crate::types::SensorId;

/// Packet-level failures.
///
/// These are always recovered locally: the packet is dropped, a warning is
/// logged and processing continues with the next notification.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("unknown packet status byte {0}")]
    UnknownStatus(u8),

    #[error("packet is neither binary nor valid UTF-8")]
    InvalidUtf8,

    #[error("malformed legacy packet: {0}")]
    Json(String),

    #[error("{sensor} orientation magnitude {magnitude:.3} outside tolerance")]
    InvalidQuaternion { sensor: SensorId, magnitude: f32 },
}

/// Device and connection failures, surfaced to state subscribers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no device was selected")]
    DeviceNotSelected,

    #[error("permission to access the device was denied")]
    PermissionDenied,

    #[error("select a device before connecting")]
    NoDevice,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("reconnection failed after {attempts} attempts; reconnect manually")]
    ReconnectionFailed { attempts: u32 },

    /// A disconnect or newer connect superseded the attempt before the link opened
    #[error("connection attempt was cancelled")]
    Cancelled,
}
