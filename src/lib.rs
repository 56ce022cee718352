//! Knee rehab core - sensor pipeline for knee rehabilitation coaching
//!
//! Turns the notification stream of a five-node wearable orientation sensor
//! array into joint angles, step counts, gait diagnoses, exercise
//! recommendations and live repetition counts.
//!
//! # Pipeline
//!
//! - [`codec`] decodes 94-byte binary or legacy JSON notifications into [`SensorPacket`]s
//! - [`ConnectionManager`] owns the device link, reconnects with backoff and publishes state
//! - [`OrientationProcessor`] applies calibration offsets and smooths each sensor
//! - [`joint_angle`] and [`LegAngles`] derive knee and hip angles
//! - [`GaitAnalyzer`] turns a walking test into a [`GaitReport`]
//! - [`RepetitionDetector`] counts repetitions during a live exercise
//!
//! Everything except the connection manager is synchronous and allocation-light,
//! so it can run directly inside the data callback.
//!
//! # Quick Start
//!
//! ```rust
//! use knee_rehab_core::{
//!     GaitAnalyzer, LegAngles, OrientationProcessor, RepetitionDetector, SensorPacket, Side,
//!     codec,
//! };
//!
//! let mut processor = OrientationProcessor::new();
//! let mut gait = GaitAnalyzer::new();
//! let mut reps = RepetitionDetector::new(60.0);
//!
//! // Bytes as delivered by the sensor array
//! let bytes = codec::encode_binary(&SensorPacket::identity(0));
//! let packet = codec::decode(&bytes).expect("valid packet");
//!
//! // The first packet of a session defines the reference pose
//! processor.calibrate(&packet);
//! let processed = processor.process(&packet, true);
//!
//! gait.collect_gait_data(&processed);
//! let angles = LegAngles::from_packet(&processed);
//! reps.feed(angles.knee(Side::Right));
//!
//! let report = gait.analyze();
//! println!("{}", serde_json::to_string_pretty(&report).unwrap());
//! ```

pub mod codec;
mod error;
mod gait;
mod kinematics;
mod math;
mod orientation;
mod reps;
mod transport;
mod types;

pub use error::{ProtocolError, TransportError};
pub use gait::{
    Asymmetry, DiagnosisKind, ExerciseId, GaitAnalyzer, GaitDiagnosis, GaitMetrics, GaitReport,
    OverallStatus, Priority, RangeOfMotion, RecommendedExercise, Severity, WeightDistribution,
    WeightSample, recommend_exercises,
};
pub use kinematics::{LegAngles, hip_angle, joint_angle, knee_angle};
pub use math::{DEG_TO_RAD, QuaternionExt, RAD_TO_DEG, to_unit};
pub use orientation::{OrientationProcessor, validate_packet};
pub use reps::{RepState, RepThresholds, RepetitionDetector};
pub use transport::{
    ConnectionManager, ConnectionState, ConnectionStatus, DeviceInfo, LinkEvent, ReconnectPolicy,
    SensorLink, Subscription,
};
pub use types::*;
