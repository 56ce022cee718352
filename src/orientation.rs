//! Per-sensor calibration and orientation smoothing
//!
//! Calibration captures a single packet as the body's reference pose; every
//! later reading is expressed relative to it as `offset⁻¹ ⊗ reading`.
//! Smoothing keeps a short FIFO of recent orientations per sensor and blends
//! them with an incrementally weighted shortest-path slerp.
//!
//! # Example
//! ```
//! use knee_rehab_core::{OrientationProcessor, SensorPacket};
//!
//! let mut processor = OrientationProcessor::new();
//! let packet = SensorPacket::identity(0);
//!
//! assert!(processor.is_valid_packet(&packet));
//! processor.calibrate(&packet);
//! let processed = processor.process(&packet, true);
//! assert_eq!(processed.timestamp, packet.timestamp);
//! ```

use std::collections::VecDeque;

use log::info;
use nalgebra::{Quaternion, UnitQuaternion};

use crate::error::ProtocolError;
use crate::math::{QuaternionExt, to_unit};
use crate::types::{ProcessorSettings, SENSOR_COUNT, SensorId, SensorPacket};

/// Check that every orientation in the packet is within `tolerance` of unit length
///
/// # Returns
/// The first offending sensor as a [`ProtocolError::InvalidQuaternion`]
pub fn validate_packet(packet: &SensorPacket, tolerance: f32) -> Result<(), ProtocolError> {
    for reading in packet.readings() {
        let magnitude = reading.orientation.norm();
        // NaN magnitudes fail this comparison and are rejected
        if (magnitude - 1.0).abs() <= tolerance {
            continue;
        }
        return Err(ProtocolError::InvalidQuaternion {
            sensor: reading.sensor,
            magnitude,
        });
    }
    Ok(())
}

/// Calibration and smoothing state for the five body sensors
#[derive(Debug, Clone)]
pub struct OrientationProcessor {
    settings: ProcessorSettings,
    /// Reference pose, replaced wholesale on each calibration
    offsets: Option<[UnitQuaternion<f32>; SENSOR_COUNT]>,
    /// Recent orientations per sensor, oldest first
    windows: [VecDeque<UnitQuaternion<f32>>; SENSOR_COUNT],
}

impl OrientationProcessor {
    /// Create a processor with default settings
    pub fn new() -> Self {
        Self::with_settings(ProcessorSettings::default())
    }

    pub fn with_settings(settings: ProcessorSettings) -> Self {
        let capacity = settings.smoothing_window.max(1);
        Self {
            settings,
            offsets: None,
            windows: core::array::from_fn(|_| VecDeque::with_capacity(capacity)),
        }
    }

    pub fn settings(&self) -> ProcessorSettings {
        self.settings
    }

    /// Capture the packet's five orientations as the new reference pose
    ///
    /// This is a single-sample capture, so noise at the calibration instant
    /// carries into every corrected reading. No validation is performed.
    pub fn calibrate(&mut self, packet: &SensorPacket) {
        self.offsets = Some(packet.orientations.map(|q| to_unit(&q)));
        info!("calibrated orientation offsets at timestamp {}", packet.timestamp);
    }

    pub fn clear_calibration(&mut self) {
        self.offsets = None;
    }

    pub fn is_calibrated(&self) -> bool {
        self.offsets.is_some()
    }

    /// Drop calibration and smoothing history, as on disconnect
    pub fn reset(&mut self) {
        self.clear_calibration();
        for window in &mut self.windows {
            window.clear();
        }
    }

    /// Express `reading` relative to the calibrated pose of `sensor`
    ///
    /// Returns the reading unchanged when no calibration exists.
    pub fn apply_calibration(&self, reading: Quaternion<f32>, sensor: SensorId) -> Quaternion<f32> {
        match &self.offsets {
            Some(offsets) => offsets[sensor.index()].inverse().into_inner() * reading,
            None => reading,
        }
    }

    /// Push `reading` into the sensor's window and return the blended orientation
    pub fn smooth(&mut self, reading: Quaternion<f32>, sensor: SensorId) -> Quaternion<f32> {
        let capacity = self.settings.smoothing_window.max(1);
        let window = &mut self.windows[sensor.index()];

        window.push_back(to_unit(&reading));
        while window.len() > capacity {
            window.pop_front();
        }

        blend(window).into_inner()
    }

    /// Current blended orientation for `sensor` without pushing a new sample
    pub fn smoothed(&self, sensor: SensorId) -> Quaternion<f32> {
        blend(&self.windows[sensor.index()]).into_inner()
    }

    pub fn is_valid_packet(&self, packet: &SensorPacket) -> bool {
        validate_packet(packet, self.settings.magnitude_tolerance).is_ok()
    }

    /// Apply calibration and, optionally, smoothing to all five orientations
    ///
    /// Returns a new packet; the input is left untouched.
    pub fn process(&mut self, packet: &SensorPacket, smoothing: bool) -> SensorPacket {
        let mut processed = *packet;
        for sensor in SensorId::ALL {
            let calibrated = self.apply_calibration(packet.orientation(sensor), sensor);
            processed.orientations[sensor.index()] = if smoothing {
                self.smooth(calibrated, sensor)
            } else {
                calibrated
            };
        }
        processed
    }
}

impl Default for OrientationProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Incrementally weighted mean: sample `i` is blended in with weight `1/(i+1)`
fn blend(window: &VecDeque<UnitQuaternion<f32>>) -> UnitQuaternion<f32> {
    let mut samples = window.iter();
    let Some(first) = samples.next() else {
        return UnitQuaternion::identity();
    };

    samples
        .enumerate()
        .fold(*first, |result, (offset, sample)| {
            let position = offset + 1;
            result.slerp_shortest(sample, 1.0 / (position as f32 + 1.0))
        })
}
