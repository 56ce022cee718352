//! Gait test analysis
//!
//! A [`GaitAnalyzer`] accumulates one walking test's processed packets, counts
//! steps as they arrive, and on [`GaitAnalyzer::analyze`] turns the session
//! into metrics, threshold-based diagnoses and a prioritized exercise list.
//!
//! # Example
//! ```
//! use knee_rehab_core::{GaitAnalyzer, OverallStatus, SensorPacket};
//!
//! let mut analyzer = GaitAnalyzer::new();
//! for t in 0..20 {
//!     analyzer.collect_gait_data(&SensorPacket::identity(t));
//! }
//!
//! let report = analyzer.analyze();
//! assert_eq!(report.metrics.sample_count, 20);
//! // A motionless session has no knee range of motion at all
//! assert_eq!(report.overall_status, OverallStatus::NeedsAttention);
//! ```

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::kinematics::knee_angle;
use crate::math::{QuaternionExt, to_unit};
use crate::orientation::validate_packet;
use crate::types::{GaitSettings, SensorId, SensorPacket, Side};

/// Heel-load pair recorded per packet
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightSample {
    pub left: f32,
    pub right: f32,
}

/// Per-leg range of motion in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RangeOfMotion {
    pub right: f32,
    pub left: f32,
}

/// Difference between the legs' ranges of motion
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Asymmetry {
    /// `|right ROM - left ROM|` in degrees
    pub score: f32,
    /// Mean knee angle over the session, degrees
    pub right_mean_angle: f32,
    pub left_mean_angle: f32,
}

/// Share of total heel load carried by each side
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeightDistribution {
    pub left_percent: f32,
    pub right_percent: f32,
    /// `|left_percent - right_percent|`
    pub score: f32,
}

impl WeightDistribution {
    /// Side carrying more load, if any
    pub fn heavier_side(&self) -> Option<Side> {
        if self.left_percent > self.right_percent {
            Some(Side::Left)
        } else if self.right_percent > self.left_percent {
            Some(Side::Right)
        } else {
            None
        }
    }
}

impl Default for WeightDistribution {
    fn default() -> Self {
        Self {
            left_percent: 50.0,
            right_percent: 50.0,
            score: 0.0,
        }
    }
}

/// Everything the diagnosis table looks at
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GaitMetrics {
    pub range_of_motion: RangeOfMotion,
    pub asymmetry: Asymmetry,
    /// Standard deviation of off-sagittal thigh rotation, radians
    pub lateral_stability: f32,
    pub weight_distribution: WeightDistribution,
    pub step_count: u32,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosisKind {
    LimitedRom { side: Side },
    AsymmetricGait,
    UnstableKnee,
    WeightImbalance { side: Side },
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaitDiagnosis {
    pub kind: DiagnosisKind,
    pub severity: Severity,
    pub explanation: String,
}

/// Ordered so that `High > Medium > Low`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Exercises the coach can recommend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseId {
    HeelSlides,
    ShortArcQuads,
    StraightLegRaises,
    QuadSets,
    HamstringCurls,
}

impl ExerciseId {
    /// Stable identifier shared with the exercise library
    pub const fn id(self) -> &'static str {
        match self {
            ExerciseId::HeelSlides => "heel_slides",
            ExerciseId::ShortArcQuads => "short_arc_quads",
            ExerciseId::StraightLegRaises => "straight_leg_raises",
            ExerciseId::QuadSets => "quad_sets",
            ExerciseId::HamstringCurls => "hamstring_curls",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            ExerciseId::HeelSlides => "Heel Slides",
            ExerciseId::ShortArcQuads => "Short Arc Quads",
            ExerciseId::StraightLegRaises => "Straight Leg Raises",
            ExerciseId::QuadSets => "Quad Sets",
            ExerciseId::HamstringCurls => "Hamstring Curls",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendedExercise {
    pub exercise: ExerciseId,
    pub name: &'static str,
    pub reason: &'static str,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Good,
    Fair,
    NeedsAttention,
}

impl OverallStatus {
    /// `NeedsAttention` on any severe finding, `Fair` on any moderate one
    pub fn from_diagnoses(diagnoses: &[GaitDiagnosis]) -> Self {
        let worst = diagnoses.iter().map(|d| d.severity).max();
        match worst {
            Some(Severity::Severe) => OverallStatus::NeedsAttention,
            Some(Severity::Moderate) => OverallStatus::Fair,
            _ => OverallStatus::Good,
        }
    }
}

/// Final result of one gait test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaitReport {
    pub started_at: DateTime<Utc>,
    pub metrics: GaitMetrics,
    pub diagnoses: Vec<GaitDiagnosis>,
    pub recommendations: Vec<RecommendedExercise>,
    pub overall_status: OverallStatus,
}

/// Candidate exercises for each finding, in table order
fn exercise_candidates(kind: DiagnosisKind) -> &'static [(ExerciseId, Priority, &'static str)] {
    match kind {
        DiagnosisKind::LimitedRom { .. } => &[
            (
                ExerciseId::HeelSlides,
                Priority::High,
                "Gently works the knee through a larger bending range.",
            ),
            (
                ExerciseId::ShortArcQuads,
                Priority::High,
                "Builds end-range extension strength to recover full straightening.",
            ),
        ],
        DiagnosisKind::AsymmetricGait => &[
            (
                ExerciseId::StraightLegRaises,
                Priority::Medium,
                "Strengthens the weaker leg to even out stride mechanics.",
            ),
            (
                ExerciseId::QuadSets,
                Priority::Medium,
                "Activates the quadriceps to balance knee control between legs.",
            ),
        ],
        DiagnosisKind::UnstableKnee => &[
            (
                ExerciseId::HamstringCurls,
                Priority::High,
                "Strengthens the hamstrings that stabilize the knee from behind.",
            ),
            (
                ExerciseId::QuadSets,
                Priority::Medium,
                "Improves quadriceps control for steadier knee tracking.",
            ),
        ],
        DiagnosisKind::WeightImbalance { .. } => &[
            (
                ExerciseId::StraightLegRaises,
                Priority::High,
                "Builds strength so the lighter leg can accept more load.",
            ),
            (
                ExerciseId::HeelSlides,
                Priority::Medium,
                "Restores comfortable motion that encourages loading the leg.",
            ),
        ],
        DiagnosisKind::Normal => &[],
    }
}

/// Map diagnoses to exercises, merged by exercise and sorted by priority
///
/// When two findings recommend the same exercise, the later finding's
/// priority and reason replace the earlier ones, even if that lowers the
/// priority. Ties keep first-recommended order.
pub fn recommend_exercises(diagnoses: &[GaitDiagnosis]) -> Vec<RecommendedExercise> {
    let mut merged: Vec<RecommendedExercise> = Vec::new();

    for diagnosis in diagnoses {
        for &(exercise, priority, reason) in exercise_candidates(diagnosis.kind) {
            let recommendation = RecommendedExercise {
                exercise,
                name: exercise.display_name(),
                reason,
                priority,
            };
            match merged.iter_mut().find(|r| r.exercise == exercise) {
                Some(existing) => *existing = recommendation,
                None => merged.push(recommendation),
            }
        }
    }

    merged.sort_by(|a, b| b.priority.cmp(&a.priority));
    merged
}

/// Collects one gait test and produces its report
#[derive(Debug, Clone)]
pub struct GaitAnalyzer {
    settings: GaitSettings,
    history: Vec<SensorPacket>,
    weight_history: Vec<WeightSample>,
    step_count: u32,
    previous_pitch: f32,
    started_at: DateTime<Utc>,
}

impl GaitAnalyzer {
    pub fn new() -> Self {
        Self::with_settings(GaitSettings::default())
    }

    pub fn with_settings(settings: GaitSettings) -> Self {
        Self {
            settings,
            history: Vec::new(),
            weight_history: Vec::new(),
            step_count: 0,
            previous_pitch: 0.0,
            started_at: Utc::now(),
        }
    }

    pub fn settings(&self) -> GaitSettings {
        self.settings
    }

    /// Begin a new session
    pub fn reset(&mut self) {
        self.history.clear();
        self.weight_history.clear();
        self.step_count = 0;
        self.previous_pitch = 0.0;
        self.started_at = Utc::now();
    }

    /// Add one processed packet to the session
    ///
    /// Packets failing magnitude validation are ignored.
    ///
    /// # Returns
    /// The step count after this packet
    pub fn collect_gait_data(&mut self, packet: &SensorPacket) -> u32 {
        if let Err(e) = validate_packet(packet, self.settings.magnitude_tolerance) {
            warn!("ignoring gait sample {}: {e}", packet.timestamp);
            return self.step_count;
        }

        self.history.push(*packet);
        self.weight_history.push(WeightSample {
            left: packet.left_heel,
            right: packet.right_heel,
        });

        // Rising edges of pelvis pitch mark footfalls
        let pitch = to_unit(&packet.orientation(SensorId::Pelvis)).euler_xyz().x;
        if self.history.len() >= 2
            && (pitch - self.previous_pitch).abs() > self.settings.step_pitch_delta
            && pitch > self.previous_pitch
        {
            self.step_count += 1;
            debug!("step {} at timestamp {}", self.step_count, packet.timestamp);
        }
        self.previous_pitch = pitch;

        self.step_count
    }

    /// Number of samples collected this session
    pub fn data_count(&self) -> usize {
        self.history.len()
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Knee angles over the session for one leg
    fn knee_angles(&self, side: Side) -> impl Iterator<Item = f32> + '_ {
        self.history.iter().map(move |packet| knee_angle(packet, side))
    }

    /// Max minus min knee angle per leg; zero for an empty session
    pub fn analyze_range_of_motion(&self) -> RangeOfMotion {
        let rom = |side| {
            let (min, max) = self
                .knee_angles(side)
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), angle| {
                    (min.min(angle), max.max(angle))
                });
            if max >= min { max - min } else { 0.0 }
        };

        RangeOfMotion {
            right: rom(Side::Right),
            left: rom(Side::Left),
        }
    }

    /// ROM difference between legs, with per-leg mean knee angle
    ///
    /// Comparing ranges rather than instantaneous angles keeps the score
    /// independent of any constant calibration offset.
    pub fn analyze_asymmetry(&self) -> Asymmetry {
        let rom = self.analyze_range_of_motion();
        Asymmetry {
            score: (rom.right - rom.left).abs(),
            right_mean_angle: mean(self.knee_angles(Side::Right)),
            left_mean_angle: mean(self.knee_angles(Side::Left)),
        }
    }

    /// Pooled standard deviation of both thighs' off-sagittal rotation
    ///
    /// Each sample contributes `sqrt(y² + z²)` of each thigh's Euler angles.
    pub fn analyze_lateral_stability(&self) -> f32 {
        let off_plane: Vec<f32> = self
            .history
            .iter()
            .flat_map(|packet| {
                [SensorId::RightThigh, SensorId::LeftThigh].map(|s| packet.orientation(s))
            })
            .map(|q| {
                let euler = to_unit(&q).euler_xyz();
                (euler.y * euler.y + euler.z * euler.z).sqrt()
            })
            .collect();

        std_dev(&off_plane)
    }

    /// Share of heel load per side after trailing moving-average smoothing
    pub fn analyze_weight_distribution(&self) -> WeightDistribution {
        if self.weight_history.is_empty() {
            return WeightDistribution::default();
        }

        let window = self.settings.weight_window.max(1);
        let left: Vec<f32> = self.weight_history.iter().map(|w| w.left).collect();
        let right: Vec<f32> = self.weight_history.iter().map(|w| w.right).collect();

        let left_mean = mean(moving_average(&left, window).into_iter());
        let right_mean = mean(moving_average(&right, window).into_iter());
        let total = left_mean + right_mean;
        if total <= 0.0 {
            return WeightDistribution::default();
        }

        let left_percent = left_mean / total * 100.0;
        let right_percent = right_mean / total * 100.0;
        WeightDistribution {
            left_percent,
            right_percent,
            score: (left_percent - right_percent).abs(),
        }
    }

    /// Collect every metric for the current session
    pub fn metrics(&self) -> GaitMetrics {
        GaitMetrics {
            range_of_motion: self.analyze_range_of_motion(),
            asymmetry: self.analyze_asymmetry(),
            lateral_stability: self.analyze_lateral_stability(),
            weight_distribution: self.analyze_weight_distribution(),
            step_count: self.step_count,
            sample_count: self.history.len(),
        }
    }

    /// Apply the threshold table to `metrics`
    ///
    /// Always returns at least one diagnosis; a single `Normal` entry when
    /// nothing else triggers.
    pub fn generate_diagnosis(&self, metrics: &GaitMetrics) -> Vec<GaitDiagnosis> {
        let s = &self.settings;
        let mut diagnoses = Vec::new();

        for (side, rom) in [
            (Side::Right, metrics.range_of_motion.right),
            (Side::Left, metrics.range_of_motion.left),
        ] {
            if rom < s.rom_limit {
                let severity = if rom < s.rom_severe {
                    Severity::Severe
                } else if rom < s.rom_moderate {
                    Severity::Moderate
                } else {
                    Severity::Mild
                };
                diagnoses.push(GaitDiagnosis {
                    kind: DiagnosisKind::LimitedRom { side },
                    severity,
                    explanation: format!(
                        "The {side} knee moved through {rom:.1}° while walking; \
                         at least {:.0}° is expected.",
                        s.rom_limit
                    ),
                });
            }
        }

        let asymmetry = metrics.asymmetry.score;
        if asymmetry > s.asymmetry_limit {
            diagnoses.push(GaitDiagnosis {
                kind: DiagnosisKind::AsymmetricGait,
                severity: if asymmetry > s.asymmetry_moderate {
                    Severity::Moderate
                } else {
                    Severity::Mild
                },
                explanation: format!(
                    "The knees' ranges of motion differ by {asymmetry:.1}°, \
                     so the legs are moving unevenly."
                ),
            });
        }

        let instability = metrics.lateral_stability;
        if instability > s.instability_limit {
            diagnoses.push(GaitDiagnosis {
                kind: DiagnosisKind::UnstableKnee,
                severity: if instability > s.instability_moderate {
                    Severity::Moderate
                } else {
                    Severity::Mild
                },
                explanation: format!(
                    "Sideways thigh rotation varies by {:.1}°, \
                     a sign of poorly controlled knee tracking.",
                    instability.to_degrees()
                ),
            });
        }

        let weight = metrics.weight_distribution;
        if weight.score > s.imbalance_limit {
            let side = weight.heavier_side().unwrap_or(Side::Left);
            let share = match side {
                Side::Left => weight.left_percent,
                Side::Right => weight.right_percent,
            };
            diagnoses.push(GaitDiagnosis {
                kind: DiagnosisKind::WeightImbalance { side },
                severity: if weight.score > s.imbalance_moderate {
                    Severity::Moderate
                } else {
                    Severity::Mild
                },
                explanation: format!("The {side} heel carried {share:.0}% of your weight."),
            });
        }

        if diagnoses.is_empty() {
            diagnoses.push(GaitDiagnosis {
                kind: DiagnosisKind::Normal,
                severity: Severity::Normal,
                explanation: "Your gait is within normal ranges.".to_string(),
            });
        }

        diagnoses
    }

    /// Finish the session and build its report
    pub fn analyze(&self) -> GaitReport {
        let metrics = self.metrics();
        let diagnoses = self.generate_diagnosis(&metrics);
        let recommendations = recommend_exercises(&diagnoses);
        let overall_status = OverallStatus::from_diagnoses(&diagnoses);

        info!(
            "gait analysis: {} samples, {} steps, {} findings, status {:?}",
            metrics.sample_count,
            metrics.step_count,
            diagnoses.len(),
            overall_status
        );

        GaitReport {
            started_at: self.started_at,
            metrics,
            diagnoses,
            recommendations,
            overall_status,
        }
    }
}

impl Default for GaitAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = values.fold((0.0f32, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f32 }
}

/// Population standard deviation
fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values.iter().copied());
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

/// Trailing moving average; the first samples average whatever is available
fn moving_average(values: &[f32], window: usize) -> Vec<f32> {
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            mean(values[start..=i].iter().copied())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Quaternion, UnitQuaternion, Vector3};

    fn rotation_x(radians: f32) -> Quaternion<f32> {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), radians).into_inner()
    }

    fn metrics_with(right_rom: f32, left_rom: f32) -> GaitMetrics {
        GaitMetrics {
            range_of_motion: RangeOfMotion {
                right: right_rom,
                left: left_rom,
            },
            asymmetry: Asymmetry {
                score: (right_rom - left_rom).abs(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn diagnosis(kind: DiagnosisKind, severity: Severity) -> GaitDiagnosis {
        GaitDiagnosis {
            kind,
            severity,
            explanation: String::new(),
        }
    }

    #[test]
    fn test_moving_average_warm_up() {
        let smoothed = moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 5);
        assert_eq!(smoothed, vec![1.0, 1.5, 2.0, 2.5, 3.0, 4.0]);
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&[]), 0.0);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_steps_count_rising_edges_only() {
        let mut analyzer = GaitAnalyzer::new();
        let pitches = [0.0, 0.3, 0.0, 0.3, 0.35, 0.0, 0.1, 0.3];
        let mut counts = Vec::new();
        for (t, pitch) in pitches.iter().enumerate() {
            let packet = SensorPacket::identity(t as u32)
                .with_orientation(SensorId::Pelvis, rotation_x(*pitch));
            counts.push(analyzer.collect_gait_data(&packet));
        }

        // 0→0.3 twice; 0.1→0.3 is a rise of only 0.2 but still above 0.15
        assert_eq!(counts, vec![0, 1, 1, 2, 2, 2, 2, 3]);
    }

    #[test]
    fn test_first_sample_never_counts() {
        let mut analyzer = GaitAnalyzer::new();
        let packet = SensorPacket::identity(0).with_orientation(SensorId::Pelvis, rotation_x(0.5));
        assert_eq!(analyzer.collect_gait_data(&packet), 0);
    }

    #[test]
    fn test_invalid_packets_are_ignored() {
        let mut analyzer = GaitAnalyzer::new();
        analyzer.collect_gait_data(&SensorPacket::identity(0));

        let broken = SensorPacket::identity(1)
            .with_orientation(SensorId::Pelvis, Quaternion::new(3.0, 0.0, 0.0, 0.0));
        assert_eq!(analyzer.collect_gait_data(&broken), 0);
        assert_eq!(analyzer.data_count(), 1);
    }

    #[test]
    fn test_range_of_motion_and_asymmetry() {
        let mut analyzer = GaitAnalyzer::new();
        for degrees in [10.0f32, 70.0, 40.0] {
            let packet = SensorPacket::identity(0)
                .with_orientation(SensorId::RightShin, rotation_x(degrees.to_radians()))
                .with_orientation(SensorId::LeftShin, rotation_x((degrees / 2.0).to_radians()));
            analyzer.collect_gait_data(&packet);
        }

        let rom = analyzer.analyze_range_of_motion();
        assert!((rom.right - 60.0).abs() < 1e-3);
        assert!((rom.left - 30.0).abs() < 1e-3);

        let asymmetry = analyzer.analyze_asymmetry();
        assert!((asymmetry.score - 30.0).abs() < 1e-3);
        assert!((asymmetry.right_mean_angle - 40.0).abs() < 1e-3);
        assert!((asymmetry.left_mean_angle - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_lateral_stability_pools_both_thighs() {
        let mut analyzer = GaitAnalyzer::new();
        assert_eq!(analyzer.analyze_lateral_stability(), 0.0);

        let yaw = |radians: f32| {
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), radians).into_inner()
        };
        let packet = SensorPacket::identity(0)
            .with_orientation(SensorId::RightThigh, yaw(0.2))
            .with_orientation(SensorId::LeftThigh, yaw(0.6));
        analyzer.collect_gait_data(&packet);

        // Population {0.2, 0.6} has standard deviation 0.2
        assert!((analyzer.analyze_lateral_stability() - 0.2).abs() < 1e-4);
    }

    #[test]
    fn test_weight_distribution() {
        let mut analyzer = GaitAnalyzer::new();
        assert_eq!(analyzer.analyze_weight_distribution(), WeightDistribution::default());

        for _ in 0..10 {
            let mut packet = SensorPacket::identity(0);
            packet.left_heel = 30.0;
            packet.right_heel = 70.0;
            analyzer.collect_gait_data(&packet);
        }

        let weight = analyzer.analyze_weight_distribution();
        assert!((weight.left_percent - 30.0).abs() < 1e-3);
        assert!((weight.right_percent - 70.0).abs() < 1e-3);
        assert!((weight.score - 40.0).abs() < 1e-3);
        assert_eq!(weight.heavier_side(), Some(Side::Right));
    }

    #[test]
    fn test_limited_rom_severity_from_roms() {
        let analyzer = GaitAnalyzer::new();
        let diagnoses = analyzer.generate_diagnosis(&metrics_with(39.0, 70.0));

        assert_eq!(diagnoses[0].kind, DiagnosisKind::LimitedRom { side: Side::Right });
        assert_eq!(diagnoses[0].severity, Severity::Severe);
        assert!(
            !diagnoses
                .iter()
                .any(|d| d.kind == DiagnosisKind::LimitedRom { side: Side::Left })
        );
        // 31° ROM difference
        let asym = diagnoses
            .iter()
            .find(|d| d.kind == DiagnosisKind::AsymmetricGait)
            .unwrap();
        assert_eq!(asym.severity, Severity::Moderate);
    }

    #[test]
    fn test_severity_bands() {
        let analyzer = GaitAnalyzer::new();
        let severity_for =
            |rom: f32| analyzer.generate_diagnosis(&metrics_with(rom, rom))[0].severity;
        assert_eq!(severity_for(42.0), Severity::Moderate);
        assert_eq!(severity_for(47.0), Severity::Mild);

        let mut metrics = metrics_with(60.0, 60.0);
        metrics.lateral_stability = 0.3;
        metrics.weight_distribution = WeightDistribution {
            left_percent: 64.0,
            right_percent: 36.0,
            score: 28.0,
        };
        let diagnoses = analyzer.generate_diagnosis(&metrics);
        assert_eq!(diagnoses.len(), 2);
        assert_eq!(diagnoses[0].kind, DiagnosisKind::UnstableKnee);
        assert_eq!(diagnoses[0].severity, Severity::Mild);
        assert_eq!(diagnoses[1].kind, DiagnosisKind::WeightImbalance { side: Side::Left });
        assert_eq!(diagnoses[1].severity, Severity::Moderate);
    }

    #[test]
    fn test_normal_when_nothing_triggers() {
        let analyzer = GaitAnalyzer::new();
        let diagnoses = analyzer.generate_diagnosis(&metrics_with(60.0, 62.0));

        assert_eq!(diagnoses.len(), 1);
        assert_eq!(diagnoses[0].kind, DiagnosisKind::Normal);
        assert!(recommend_exercises(&diagnoses).is_empty());
        assert_eq!(OverallStatus::from_diagnoses(&diagnoses), OverallStatus::Good);
    }

    #[test]
    fn test_recommendations_merge_last_write_wins() {
        let diagnoses = [
            diagnosis(DiagnosisKind::UnstableKnee, Severity::Mild),
            diagnosis(DiagnosisKind::AsymmetricGait, Severity::Mild),
            diagnosis(DiagnosisKind::WeightImbalance { side: Side::Right }, Severity::Mild),
        ];
        let recommendations = recommend_exercises(&diagnoses);
        let ids: Vec<ExerciseId> = recommendations.iter().map(|r| r.exercise).collect();

        assert_eq!(
            ids,
            vec![
                ExerciseId::HamstringCurls,
                ExerciseId::StraightLegRaises,
                ExerciseId::QuadSets,
                ExerciseId::HeelSlides,
            ]
        );
        // Straight leg raises: medium from asymmetry, then high from imbalance
        assert_eq!(recommendations[1].priority, Priority::High);
        assert_eq!(recommendations[2].priority, Priority::Medium);
    }

    #[test]
    fn test_overall_status() {
        let fair = [
            diagnosis(DiagnosisKind::AsymmetricGait, Severity::Moderate),
            diagnosis(DiagnosisKind::UnstableKnee, Severity::Mild),
        ];
        assert_eq!(OverallStatus::from_diagnoses(&fair), OverallStatus::Fair);

        let severe = [diagnosis(DiagnosisKind::LimitedRom { side: Side::Left }, Severity::Severe)];
        assert_eq!(OverallStatus::from_diagnoses(&severe), OverallStatus::NeedsAttention);
    }

    #[test]
    fn test_reset_starts_new_session() {
        let mut analyzer = GaitAnalyzer::new();
        analyzer.collect_gait_data(&SensorPacket::identity(0));
        let tipped = SensorPacket::identity(1).with_orientation(SensorId::Pelvis, rotation_x(0.3));
        analyzer.collect_gait_data(&tipped);
        assert_eq!(analyzer.step_count(), 1);

        analyzer.reset();
        assert_eq!(analyzer.data_count(), 0);
        assert_eq!(analyzer.step_count(), 0);
        assert_eq!(analyzer.analyze_weight_distribution(), WeightDistribution::default());
    }
}
