//! Core sensor types and tunable settings

use core::fmt;

use nalgebra::Quaternion;
use serde::{Deserialize, Serialize};

/// Number of orientation sensors worn on the body
pub const SENSOR_COUNT: usize = 5;

/// Identity of one of the five body-worn orientation sensors.
///
/// The set is closed: packets always carry exactly one reading per variant,
/// stored in a fixed-size array indexed by [`SensorId::index`].
///
/// # Example
/// ```
/// use knee_rehab_core::SensorId;
///
/// assert_eq!(SensorId::ALL.len(), 5);
/// assert_eq!(SensorId::RightShin.index(), 2);
/// assert_eq!(SensorId::LeftThigh.to_string(), "left_thigh");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorId {
    /// Lower back, used for step detection
    Pelvis,
    RightThigh,
    RightShin,
    LeftThigh,
    LeftShin,
}

impl SensorId {
    /// All sensors in wire order
    pub const ALL: [SensorId; SENSOR_COUNT] = [
        SensorId::Pelvis,
        SensorId::RightThigh,
        SensorId::RightShin,
        SensorId::LeftThigh,
        SensorId::LeftShin,
    ];

    /// Position of this sensor in packet arrays and on the wire
    pub const fn index(self) -> usize {
        match self {
            SensorId::Pelvis => 0,
            SensorId::RightThigh => 1,
            SensorId::RightShin => 2,
            SensorId::LeftThigh => 3,
            SensorId::LeftShin => 4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            SensorId::Pelvis => "pelvis",
            SensorId::RightThigh => "right_thigh",
            SensorId::RightShin => "right_shin",
            SensorId::LeftThigh => "left_thigh",
            SensorId::LeftShin => "left_shin",
        }
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Body side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Thigh and shin sensors for this leg
    pub const fn leg(self) -> (SensorId, SensorId) {
        match self {
            Side::Left => (SensorId::LeftThigh, SensorId::LeftShin),
            Side::Right => (SensorId::RightThigh, SensorId::RightShin),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// Device-reported health flag carried in every packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketStatus {
    #[default]
    Ok,
    Warning,
    Error,
}

impl PacketStatus {
    /// Decode the wire status byte (0=ok, 1=warning, 2=error)
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketStatus::Ok),
            1 => Some(PacketStatus::Warning),
            2 => Some(PacketStatus::Error),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            PacketStatus::Ok => 0,
            PacketStatus::Warning => 1,
            PacketStatus::Error => 2,
        }
    }
}

/// One orientation tagged with the sensor that produced it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub sensor: SensorId,
    /// Raw orientation (w, x, y, z); expected to be close to unit length
    pub orientation: Quaternion<f32>,
}

/// A fully decoded notification from the sensor array.
///
/// Immutable after decode; processing stages return new packets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorPacket {
    /// Device timestamp as sent on the wire
    pub timestamp: u32,
    /// Orientations indexed by [`SensorId::index`]
    pub orientations: [Quaternion<f32>; SENSOR_COUNT],
    /// Left heel load, 0-100
    pub left_heel: f32,
    /// Right heel load, 0-100
    pub right_heel: f32,
    /// Battery level, 0-100
    pub battery: u8,
    pub status: PacketStatus,
}

impl SensorPacket {
    /// Packet with every sensor at the identity orientation and no heel load
    pub fn identity(timestamp: u32) -> Self {
        Self {
            timestamp,
            orientations: [Quaternion::identity(); SENSOR_COUNT],
            left_heel: 0.0,
            right_heel: 0.0,
            battery: 100,
            status: PacketStatus::Ok,
        }
    }

    pub fn orientation(&self, sensor: SensorId) -> Quaternion<f32> {
        self.orientations[sensor.index()]
    }

    pub fn reading(&self, sensor: SensorId) -> SensorReading {
        SensorReading {
            sensor,
            orientation: self.orientation(sensor),
        }
    }

    /// All five readings in wire order
    pub fn readings(&self) -> impl Iterator<Item = SensorReading> + '_ {
        SensorId::ALL.into_iter().map(move |sensor| self.reading(sensor))
    }

    /// Copy of this packet with one orientation replaced
    pub fn with_orientation(mut self, sensor: SensorId, orientation: Quaternion<f32>) -> Self {
        self.orientations[sensor.index()] = orientation;
        self
    }
}

/// Orientation processor settings
///
/// # Example
/// ```
/// use knee_rehab_core::ProcessorSettings;
///
/// let settings = ProcessorSettings {
///     smoothing_window: 3,
///     ..Default::default()
/// };
/// assert_eq!(settings.magnitude_tolerance, 0.1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// Capacity of the per-sensor smoothing FIFO
    pub smoothing_window: usize,
    /// Allowed deviation of a quaternion magnitude from 1.0
    pub magnitude_tolerance: f32,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            magnitude_tolerance: 0.1,
        }
    }
}

/// Gait analysis settings
///
/// Holds the step detector's pitch threshold, the heel-load smoothing window
/// and the diagnosis threshold table. Angles are in degrees unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitSettings {
    /// Allowed deviation of a quaternion magnitude from 1.0
    pub magnitude_tolerance: f32,
    /// Minimum rising pelvis pitch change between samples to count a step, radians
    pub step_pitch_delta: f32,
    /// Trailing moving-average window for heel-load channels
    pub weight_window: usize,
    /// Range of motion below this is limited
    pub rom_limit: f32,
    pub rom_moderate: f32,
    pub rom_severe: f32,
    /// ROM difference between legs above this is asymmetric
    pub asymmetry_limit: f32,
    pub asymmetry_moderate: f32,
    /// Off-plane thigh rotation standard deviation above this is unstable, radians
    pub instability_limit: f32,
    pub instability_moderate: f32,
    /// Left/right load share difference above this is imbalanced, percent
    pub imbalance_limit: f32,
    pub imbalance_moderate: f32,
}

impl Default for GaitSettings {
    fn default() -> Self {
        Self {
            magnitude_tolerance: 0.1,
            step_pitch_delta: 0.15,
            weight_window: 5,
            rom_limit: 50.0,
            rom_moderate: 45.0,
            rom_severe: 40.0,
            asymmetry_limit: 10.0,
            asymmetry_moderate: 15.0,
            instability_limit: 0.25,
            instability_moderate: 0.375,
            imbalance_limit: 15.0,
            imbalance_moderate: 25.0,
        }
    }
}

/// Reconnection backoff settings
///
/// Delay before retry `n` (0-based) is `min(base_delay_ms * 2^n, max_delay_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Retries before giving up and reporting a terminal failure
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            max_attempts: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_indices_match_wire_order() {
        for (position, sensor) in SensorId::ALL.iter().enumerate() {
            assert_eq!(sensor.index(), position);
        }
    }

    #[test]
    fn test_status_byte_mapping() {
        for status in [PacketStatus::Ok, PacketStatus::Warning, PacketStatus::Error] {
            assert_eq!(PacketStatus::from_u8(status.as_u8()), Some(status));
        }
        assert_eq!(PacketStatus::from_u8(3), None);
    }

    #[test]
    fn test_with_orientation_leaves_other_sensors() {
        let q = Quaternion::new(0.0, 1.0, 0.0, 0.0);
        let packet = SensorPacket::identity(7).with_orientation(SensorId::LeftShin, q);

        assert_eq!(packet.orientation(SensorId::LeftShin), q);
        assert_eq!(packet.orientation(SensorId::Pelvis), Quaternion::identity());
        assert_eq!(packet.readings().count(), SENSOR_COUNT);
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: ReconnectSettings = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.base_delay_ms, 1000);
        assert_eq!(settings.max_delay_ms, 10_000);
    }
}
