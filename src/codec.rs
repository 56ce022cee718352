//! Wire decoding for sensor array notifications
//!
//! Two formats arrive on the same characteristic:
//!
//! - A fixed 94-byte little-endian binary layout (current firmware)
//! - A UTF-8 JSON object (legacy firmware)
//!
//! ```text
//! offset  size  field
//!      0     4  timestamp (u32)
//!      4    16  pelvis quaternion (w, x, y, z as f32)
//!     20    16  right thigh quaternion
//!     36    16  right shin quaternion
//!     52    16  left thigh quaternion
//!     68    16  left shin quaternion
//!     84     4  left heel load (f32, 0-100)
//!     88     4  right heel load (f32, 0-100)
//!     92     1  battery (u8, 0-100)
//!     93     1  status (0=ok, 1=warning, 2=error)
//! ```
//!
//! The format is chosen by length alone: exactly [`BINARY_PACKET_LEN`] bytes
//! is binary, anything else is treated as JSON. There is no version or magic
//! byte, so a future layout that also totals 94 bytes would be misread as
//! this one. The wire format is left as the devices send it.
//!
//! # Example
//! ```
//! use knee_rehab_core::{SensorPacket, codec};
//!
//! let packet = SensorPacket::identity(42);
//! let bytes = codec::encode_binary(&packet);
//! assert_eq!(codec::decode(&bytes).unwrap(), packet);
//!
//! let legacy = br#"{"timestamp": 42, "sens1": "1,0,0,0", "sens2": "1,0,0,0",
//!     "sens3": "1,0,0,0", "sens4": "1,0,0,0", "sens5": "1,0,0,0",
//!     "battery": 100, "status": "ok"}"#;
//! assert_eq!(codec::decode(legacy).unwrap(), packet);
//! ```

use nalgebra::Quaternion;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::types::{PacketStatus, SENSOR_COUNT, SensorPacket};

/// Size of a binary packet in bytes
pub const BINARY_PACKET_LEN: usize = 94;

const ORIENTATION_OFFSET: usize = 4;
const QUATERNION_LEN: usize = 16;
const LEFT_HEEL_OFFSET: usize = 84;
const RIGHT_HEEL_OFFSET: usize = 88;
const BATTERY_OFFSET: usize = 92;
const STATUS_OFFSET: usize = 93;

/// Decode one transport notification
pub fn decode(bytes: &[u8]) -> Result<SensorPacket, ProtocolError> {
    if bytes.len() == BINARY_PACKET_LEN {
        decode_binary(bytes)
    } else {
        decode_legacy(bytes)
    }
}

/// Decode the fixed binary layout; `bytes` must be exactly 94 bytes long
fn decode_binary(bytes: &[u8]) -> Result<SensorPacket, ProtocolError> {
    let status = PacketStatus::from_u8(bytes[STATUS_OFFSET])
        .ok_or(ProtocolError::UnknownStatus(bytes[STATUS_OFFSET]))?;

    let mut orientations = [Quaternion::identity(); SENSOR_COUNT];
    for (index, orientation) in orientations.iter_mut().enumerate() {
        let base = ORIENTATION_OFFSET + index * QUATERNION_LEN;
        *orientation = Quaternion::new(
            read_f32(bytes, base),
            read_f32(bytes, base + 4),
            read_f32(bytes, base + 8),
            read_f32(bytes, base + 12),
        );
    }

    Ok(SensorPacket {
        timestamp: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        orientations,
        left_heel: read_f32(bytes, LEFT_HEEL_OFFSET),
        right_heel: read_f32(bytes, RIGHT_HEEL_OFFSET),
        battery: bytes[BATTERY_OFFSET],
        status,
    })
}

/// Encode a packet into the binary layout
pub fn encode_binary(packet: &SensorPacket) -> [u8; BINARY_PACKET_LEN] {
    let mut buf = [0u8; BINARY_PACKET_LEN];
    buf[0..4].copy_from_slice(&packet.timestamp.to_le_bytes());

    for (index, q) in packet.orientations.iter().enumerate() {
        let base = ORIENTATION_OFFSET + index * QUATERNION_LEN;
        write_f32(&mut buf, base, q.w);
        write_f32(&mut buf, base + 4, q.i);
        write_f32(&mut buf, base + 8, q.j);
        write_f32(&mut buf, base + 12, q.k);
    }

    write_f32(&mut buf, LEFT_HEEL_OFFSET, packet.left_heel);
    write_f32(&mut buf, RIGHT_HEEL_OFFSET, packet.right_heel);
    buf[BATTERY_OFFSET] = packet.battery;
    buf[STATUS_OFFSET] = packet.status.as_u8();
    buf
}

#[inline]
fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[inline]
fn write_f32(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Legacy firmware schema. Heel loads are not part of it and decode as zero.
#[derive(Deserialize)]
struct LegacyPacket {
    #[serde(default)]
    timestamp: f64,
    sens1: Value,
    sens2: Value,
    sens3: Value,
    sens4: Value,
    sens5: Value,
    #[serde(default)]
    battery: f64,
    #[serde(default)]
    status: Value,
}

fn decode_legacy(bytes: &[u8]) -> Result<SensorPacket, ProtocolError> {
    let text = core::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    let legacy: LegacyPacket =
        serde_json::from_str(text).map_err(|e| ProtocolError::Json(e.to_string()))?;

    let orientations = [
        &legacy.sens1,
        &legacy.sens2,
        &legacy.sens3,
        &legacy.sens4,
        &legacy.sens5,
    ]
    .map(parse_legacy_quaternion);

    Ok(SensorPacket {
        // Millisecond clocks wider than 32 bits wrap
        timestamp: (legacy.timestamp.max(0.0) as u64) as u32,
        orientations,
        left_heel: 0.0,
        right_heel: 0.0,
        battery: legacy.battery.clamp(0.0, 100.0) as u8,
        status: parse_legacy_status(&legacy.status)?,
    })
}

/// Accepts `{"qw":..,"qx":..,"qy":..,"qz":..}` or `"qw,qx,qy,qz"`.
/// Anything that does not yield four numbers becomes the identity.
fn parse_legacy_quaternion(value: &Value) -> Quaternion<f32> {
    let components = match value {
        Value::Object(map) => ["qw", "qx", "qy", "qz"]
            .iter()
            .map(|key| map.get(*key).and_then(number_from_value))
            .collect::<Option<Vec<f32>>>(),
        Value::String(text) => text
            .split(',')
            .map(|part| part.trim().parse::<f32>().ok())
            .collect::<Option<Vec<f32>>>(),
        _ => None,
    };

    match components.as_deref() {
        Some(&[w, x, y, z]) if [w, x, y, z].iter().all(|c| c.is_finite()) => {
            Quaternion::new(w, x, y, z)
        }
        _ => Quaternion::identity(),
    }
}

fn number_from_value(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
}

fn parse_legacy_status(value: &Value) -> Result<PacketStatus, ProtocolError> {
    match value {
        Value::Null => Ok(PacketStatus::Ok),
        Value::Number(n) => n
            .as_u64()
            .and_then(|code| u8::try_from(code).ok())
            .and_then(PacketStatus::from_u8)
            .ok_or_else(|| ProtocolError::Json(format!("unknown status {n}"))),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "ok" => Ok(PacketStatus::Ok),
            "warning" => Ok(PacketStatus::Warning),
            "error" => Ok(PacketStatus::Error),
            other => Err(ProtocolError::Json(format!("unknown status {other:?}"))),
        },
        other => Err(ProtocolError::Json(format!("unknown status {other}"))),
    }
}
