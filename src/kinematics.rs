//! Joint angles from parent/child segment orientations
//!
//! The joint angle is the largest single-axis rotation of the child segment
//! relative to its parent, taken from an intrinsic X-Y-Z Euler decomposition.
//! Sensor straps do not reliably align any one axis with flexion, so the
//! dominant axis stands in for it. This approximates flexion/extension; it is
//! not a single-axis biomechanical model and mixes in abduction or rotation
//! when those dominate.

use nalgebra::Quaternion;
use serde::Serialize;

use crate::math::{QuaternionExt, RAD_TO_DEG, to_unit};
use crate::types::{SensorId, SensorPacket, Side};

/// Joint angle in degrees between a parent and child orientation
///
/// # Example
/// ```
/// use nalgebra::{Quaternion, UnitQuaternion, Vector3};
/// use knee_rehab_core::joint_angle;
///
/// let thigh = Quaternion::identity();
/// let shin = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 90f32.to_radians()).into_inner();
///
/// assert!((joint_angle(&thigh, &shin) - 90.0).abs() < 1e-3);
/// assert!(joint_angle(&shin, &shin).abs() < 1e-3);
/// ```
pub fn joint_angle(parent: &Quaternion<f32>, child: &Quaternion<f32>) -> f32 {
    let relative = to_unit(parent).inverse() * to_unit(child);
    let euler = relative.euler_xyz();

    euler.x.abs().max(euler.y.abs()).max(euler.z.abs()) * RAD_TO_DEG
}

/// Knee angle (thigh to shin) for one leg
pub fn knee_angle(packet: &SensorPacket, side: Side) -> f32 {
    let (thigh, shin) = side.leg();
    joint_angle(&packet.orientation(thigh), &packet.orientation(shin))
}

/// Hip angle (pelvis to thigh) for one leg
pub fn hip_angle(packet: &SensorPacket, side: Side) -> f32 {
    let (thigh, _) = side.leg();
    joint_angle(&packet.orientation(SensorId::Pelvis), &packet.orientation(thigh))
}

/// All lower-limb joint angles of one packet, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LegAngles {
    pub right_knee: f32,
    pub left_knee: f32,
    pub right_hip: f32,
    pub left_hip: f32,
}

impl LegAngles {
    pub fn from_packet(packet: &SensorPacket) -> Self {
        Self {
            right_knee: knee_angle(packet, Side::Right),
            left_knee: knee_angle(packet, Side::Left),
            right_hip: hip_angle(packet, Side::Right),
            left_hip: hip_angle(packet, Side::Left),
        }
    }

    pub fn knee(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.left_knee,
            Side::Right => self.right_knee,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector3};

    fn rotation(axis: nalgebra::Unit<Vector3<f32>>, degrees: f32) -> Quaternion<f32> {
        UnitQuaternion::from_axis_angle(&axis, degrees.to_radians()).into_inner()
    }

    #[test]
    fn test_identical_orientations_give_zero() {
        let orientations = [
            Quaternion::identity(),
            rotation(Vector3::x_axis(), 37.0),
            UnitQuaternion::from_euler_angles(0.4, -1.1, 2.0).into_inner(),
        ];
        for q in orientations {
            assert!(joint_angle(&q, &q).abs() < 1e-3);
        }
    }

    #[test]
    fn test_quarter_turn_about_x() {
        let angle = joint_angle(&Quaternion::identity(), &rotation(Vector3::x_axis(), 90.0));
        assert!((angle - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_angle_is_relative_to_parent() {
        let thigh = rotation(Vector3::z_axis(), 45.0);
        let shin = UnitQuaternion::from_quaternion(thigh)
            * UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 30f32.to_radians());

        let angle = joint_angle(&thigh, &shin.into_inner());
        assert!((angle - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_dominant_axis_is_reported() {
        let child = rotation(Vector3::y_axis(), -25.0);
        let angle = joint_angle(&Quaternion::identity(), &child);
        assert!((angle - 25.0).abs() < 1e-3);
    }

    #[test]
    fn test_sign_of_quaternion_does_not_matter() {
        let child = rotation(Vector3::x_axis(), 60.0);
        let angle = joint_angle(&Quaternion::identity(), &-child);
        assert!((angle - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_leg_angles_pairings() {
        let packet = SensorPacket::identity(0)
            .with_orientation(SensorId::RightShin, rotation(Vector3::x_axis(), 50.0))
            .with_orientation(SensorId::LeftThigh, rotation(Vector3::x_axis(), 20.0));

        let angles = LegAngles::from_packet(&packet);
        assert!((angles.right_knee - 50.0).abs() < 1e-3);
        assert!(angles.right_hip.abs() < 1e-3);
        assert!((angles.left_knee - 20.0).abs() < 1e-3);
        assert!((angles.left_hip - 20.0).abs() < 1e-3);
        assert_eq!(angles.knee(Side::Right), angles.right_knee);
    }
}
