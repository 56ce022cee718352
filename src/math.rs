//! Quaternion utilities and nalgebra extensions

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Mathematical constants
pub const DEG_TO_RAD: f32 = core::f32::consts::PI / 180.0;
pub const RAD_TO_DEG: f32 = 180.0 / core::f32::consts::PI;

/// Above this cosine, slerp degenerates to normalized lerp
const SLERP_DOT_THRESHOLD: f32 = 0.9995;

/// Gimbal-lock cutoff for the X-Y-Z decomposition
const GIMBAL_THRESHOLD: f32 = 0.999_999_9;

/// Normalize a raw orientation, falling back to identity for degenerate input
pub fn to_unit(q: &Quaternion<f32>) -> UnitQuaternion<f32> {
    UnitQuaternion::try_new(*q, f32::EPSILON).unwrap_or_else(UnitQuaternion::identity)
}

/// Extension trait for UnitQuaternion operations
pub trait QuaternionExt {
    /// Intrinsic X-Y-Z Euler angles in radians
    ///
    /// The rotation is decomposed as `Rx(x) * Ry(y) * Rz(z)`. Near gimbal lock
    /// (|y| at 90°) the Z angle is folded into X and reported as zero.
    fn euler_xyz(&self) -> Vector3<f32>;

    /// Spherical interpolation toward `other` along the shorter arc
    ///
    /// `other` is negated first when the two quaternions lie in opposite
    /// hemispheres, so `q` and `-q` blend as the same orientation.
    fn slerp_shortest(&self, other: &UnitQuaternion<f32>, t: f32) -> UnitQuaternion<f32>;
}

impl QuaternionExt for UnitQuaternion<f32> {
    fn euler_xyz(&self) -> Vector3<f32> {
        let q = self.quaternion();
        let (w, x, y, z) = (q.w, q.i, q.j, q.k);

        // Rotation matrix elements used by the decomposition
        let m11 = 1.0 - 2.0 * (y * y + z * z);
        let m12 = 2.0 * (x * y - w * z);
        let m13 = 2.0 * (x * z + w * y);
        let m22 = 1.0 - 2.0 * (x * x + z * z);
        let m23 = 2.0 * (y * z - w * x);
        let m32 = 2.0 * (y * z + w * x);
        let m33 = 1.0 - 2.0 * (x * x + y * y);

        let pitch = m13.clamp(-1.0, 1.0).asin();
        if m13.abs() < GIMBAL_THRESHOLD {
            Vector3::new((-m23).atan2(m33), pitch, (-m12).atan2(m11))
        } else {
            Vector3::new(m32.atan2(m22), pitch, 0.0)
        }
    }

    fn slerp_shortest(&self, other: &UnitQuaternion<f32>, t: f32) -> UnitQuaternion<f32> {
        let a = *self.quaternion();
        let mut b = *other.quaternion();

        let mut dot = a.coords.dot(&b.coords);
        if dot < 0.0 {
            b = -b;
            dot = -dot;
        }

        if dot > SLERP_DOT_THRESHOLD {
            return UnitQuaternion::from_quaternion(a * (1.0 - t) + b * t);
        }

        let theta_0 = dot.acos();
        let theta = theta_0 * t;
        let sin_theta_0 = theta_0.sin();
        let s0 = (theta_0 - theta).sin() / sin_theta_0;
        let s1 = theta.sin() / sin_theta_0;

        UnitQuaternion::from_quaternion(a * s0 + b * s1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euler_xyz_single_axes() {
        let rx = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.5);
        let ry = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), -0.4);
        let rz = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 1.2);

        assert!((rx.euler_xyz() - Vector3::new(0.5, 0.0, 0.0)).norm() < 1e-5);
        assert!((ry.euler_xyz() - Vector3::new(0.0, -0.4, 0.0)).norm() < 1e-5);
        assert!((rz.euler_xyz() - Vector3::new(0.0, 0.0, 1.2)).norm() < 1e-5);
    }

    #[test]
    fn test_euler_xyz_composed_order() {
        let (x, y, z) = (0.3, 0.2, -0.6);
        let q = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), x)
            * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), y)
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), z);

        let euler = q.euler_xyz();
        assert!((euler - Vector3::new(x, y, z)).norm() < 1e-5);
    }

    #[test]
    fn test_slerp_endpoints_and_midpoint() {
        let a = UnitQuaternion::identity();
        let b = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 1.0);

        assert!(a.slerp_shortest(&b, 0.0).angle_to(&a) < 1e-5);
        assert!(a.slerp_shortest(&b, 1.0).angle_to(&b) < 1e-5);

        let mid = a.slerp_shortest(&b, 0.5);
        assert!((mid.angle() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_slerp_handles_double_cover() {
        let a = UnitQuaternion::identity();
        let b = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.4);
        let b_negated = UnitQuaternion::new_unchecked(-b.into_inner());

        let direct = a.slerp_shortest(&b, 0.5);
        let flipped = a.slerp_shortest(&b_negated, 0.5);

        assert!(direct.angle_to(&flipped) < 1e-5);
        assert!((direct.angle() - 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_to_unit_falls_back_to_identity() {
        let degenerate = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(to_unit(&degenerate), UnitQuaternion::identity());

        let scaled = Quaternion::new(2.0, 0.0, 0.0, 0.0);
        assert!((to_unit(&scaled).quaternion().norm() - 1.0).abs() < 1e-6);
    }
}
