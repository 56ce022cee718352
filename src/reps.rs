//! Hysteresis repetition counter for live exercise sets
//!
//! Two thresholds derived from the exercise's target angle bracket the
//! motion. The detector flips to [`RepState::Flexed`] once the joint angle
//! rises above the upper threshold and counts a repetition when it falls
//! back below the lower one. Noise around either threshold alone cannot
//! complete a repetition.
//!
//! # Example
//! ```
//! use knee_rehab_core::RepetitionDetector;
//!
//! let mut detector = RepetitionDetector::new(60.0);
//! let completed: Vec<bool> = [10.0, 95.0, 15.0]
//!     .into_iter()
//!     .map(|angle| detector.feed(angle))
//!     .collect();
//!
//! assert_eq!(completed, [false, false, true]);
//! assert_eq!(detector.rep_count(), 1);
//! ```

use log::debug;
use serde::Serialize;

/// Phase of the current repetition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepState {
    #[default]
    Extended,
    Flexed,
}

/// Lower and upper switching angles in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RepThresholds {
    /// Falling below this while flexed completes a repetition
    pub flexed: f32,
    /// Rising above this while extended starts a repetition
    pub extended: f32,
}

impl RepThresholds {
    /// `flexed = target × 0.3`, `extended = min(target + 30, target × 1.5)`
    pub fn for_target(target_angle: f32) -> Self {
        Self {
            flexed: target_angle * 0.3,
            extended: (target_angle + 30.0).min(target_angle * 1.5),
        }
    }
}

/// Counts repetitions of one exercise from a stream of joint angles
#[derive(Debug, Clone)]
pub struct RepetitionDetector {
    target_angle: f32,
    thresholds: RepThresholds,
    state: RepState,
    reps: u32,
}

impl RepetitionDetector {
    /// Create a detector for an exercise with the given target joint angle in degrees
    pub fn new(target_angle: f32) -> Self {
        Self {
            target_angle,
            thresholds: RepThresholds::for_target(target_angle),
            state: RepState::Extended,
            reps: 0,
        }
    }

    /// Feed one joint angle; returns `true` when it completes a repetition
    pub fn feed(&mut self, angle: f32) -> bool {
        match self.state {
            RepState::Extended if angle > self.thresholds.extended => {
                self.state = RepState::Flexed;
                false
            }
            RepState::Flexed if angle < self.thresholds.flexed => {
                self.state = RepState::Extended;
                self.reps += 1;
                debug!("repetition {} completed at {angle:.1}°", self.reps);
                true
            }
            _ => false,
        }
    }

    /// Start a new set: back to extended, repetition count kept
    pub fn reset(&mut self) {
        self.state = RepState::Extended;
    }

    /// Clear the repetition count as well as the phase
    pub fn reset_count(&mut self) {
        self.reset();
        self.reps = 0;
    }

    pub fn rep_count(&self) -> u32 {
        self.reps
    }

    pub fn state(&self) -> RepState {
        self.state
    }

    pub fn thresholds(&self) -> RepThresholds {
        self.thresholds
    }

    pub fn target_angle(&self) -> f32 {
        self.target_angle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(detector: &mut RepetitionDetector, angles: &[f32]) -> Vec<bool> {
        angles.iter().map(|&angle| detector.feed(angle)).collect()
    }

    #[test]
    fn test_threshold_derivation() {
        let t = RepThresholds::for_target(90.0);
        assert!((t.flexed - 27.0).abs() < 1e-4);
        assert!((t.extended - 120.0).abs() < 1e-4);

        let t = RepThresholds::for_target(60.0);
        assert!((t.flexed - 18.0).abs() < 1e-4);
        assert!((t.extended - 90.0).abs() < 1e-4);

        // target × 1.5 wins for small targets
        let t = RepThresholds::for_target(40.0);
        assert!((t.extended - 60.0).abs() < 1e-4);
    }

    #[test]
    fn test_no_rep_without_crossing_upper_threshold() {
        let mut detector = RepetitionDetector::new(90.0);
        let completed = feed_all(&mut detector, &[10.0, 95.0, 100.0, 20.0, 10.0]);

        assert!(completed.iter().all(|&c| !c));
        assert_eq!(detector.rep_count(), 0);
        assert_eq!(detector.state(), RepState::Extended);
    }

    #[test]
    fn test_single_rep_on_final_sample() {
        let mut detector = RepetitionDetector::new(60.0);
        let completed = feed_all(&mut detector, &[10.0, 95.0, 15.0]);

        assert_eq!(completed, vec![false, false, true]);
        assert_eq!(detector.rep_count(), 1);
    }

    #[test]
    fn test_noise_between_thresholds_does_not_double_count() {
        let mut detector = RepetitionDetector::new(60.0);
        let completed = feed_all(
            &mut detector,
            &[95.0, 85.0, 92.0, 60.0, 91.0, 30.0, 19.0, 17.0, 25.0, 16.0],
        );

        assert_eq!(completed.iter().filter(|&&c| c).count(), 1);
        assert!(completed[7]);
        assert_eq!(detector.rep_count(), 1);
    }

    #[test]
    fn test_reset_keeps_count() {
        let mut detector = RepetitionDetector::new(60.0);
        feed_all(&mut detector, &[95.0, 10.0, 95.0]);
        assert_eq!(detector.state(), RepState::Flexed);

        detector.reset();
        assert_eq!(detector.state(), RepState::Extended);
        assert_eq!(detector.rep_count(), 1);

        // Falling below the lower threshold after reset is not a repetition
        assert!(!detector.feed(5.0));

        detector.reset_count();
        assert_eq!(detector.rep_count(), 0);
    }
}
