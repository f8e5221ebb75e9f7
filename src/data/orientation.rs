//! Orientation math.
//!
//! Quaternion and vector types plus the pure helpers that turn a glove's
//! orientation into Euler angles, a gravity estimate and linear acceleration.

use std::f32::consts::PI;
use std::ops::Sub;

/// Unit quaternion describing orientation (scalar first).
///
/// Values are used as received or fused; this layer never renormalizes them.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quaternion {
    /// Scalar component.
    pub w: f32,
    /// X vector component.
    pub x: f32,
    /// Y vector component.
    pub y: f32,
    /// Z vector component.
    pub z: f32,
}

impl Quaternion {
    /// The identity rotation.
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 0.0);

    /// Create a quaternion from its components.
    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Components as `[w, x, y, z]`.
    pub fn to_array(self) -> [f32; 4] {
        [self.w, self.x, self.y, self.z]
    }

    /// Build from `[w, x, y, z]`.
    pub fn from_array(q: [f32; 4]) -> Self {
        Self::new(q[0], q[1], q[2], q[3])
    }

    /// Euler angles of this orientation. See [`to_euler`].
    pub fn to_euler(&self) -> Vector3 {
        to_euler(self)
    }

    /// Gravity direction for this orientation. See [`gravity`].
    pub fn gravity(&self) -> Vector3 {
        gravity(self)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Three-component vector.
///
/// Used for acceleration (g), gravity, linear acceleration, compass readings
/// and Euler angles (`x` = roll, `y` = pitch, `z` = yaw).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vector3 {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
}

impl Vector3 {
    /// The zero vector.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Create a vector from its components.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Components as `[x, y, z]`.
    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Convert each component from radians to degrees.
    ///
    /// Intended for display; stored state stays in radians.
    pub fn to_degrees(self) -> Self {
        let scale = 180.0 / PI;
        Self::new(self.x * scale, self.y * scale, self.z * scale)
    }

    /// Roll angle when this vector holds Euler angles.
    pub fn roll(&self) -> f32 {
        self.x
    }

    /// Pitch angle when this vector holds Euler angles.
    pub fn pitch(&self) -> f32 {
        self.y
    }

    /// Yaw angle when this vector holds Euler angles.
    pub fn yaw(&self) -> f32 {
        self.z
    }
}

impl Sub for Vector3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Convert a quaternion to roll/pitch/yaw in radians.
///
/// - roll: tilt left/right, about the X axis
/// - pitch: nose up/down, about the Y axis
/// - yaw: about the Z axis
///
/// The pitch argument is clamped to `[-1, 1]` before `asin`, so rounding
/// overshoot at the poles yields ±π/2 instead of NaN.
pub fn to_euler(q: &Quaternion) -> Vector3 {
    let roll = (2.0 * (q.w * q.x + q.y * q.z)).atan2(1.0 - 2.0 * (q.x * q.x + q.y * q.y));
    let pitch = (2.0 * (q.w * q.y - q.z * q.x)).clamp(-1.0, 1.0).asin();
    let yaw = (2.0 * (q.w * q.z + q.x * q.y)).atan2(1.0 - 2.0 * (q.y * q.y + q.z * q.z));

    Vector3::new(roll, pitch, yaw)
}

/// Estimate the gravity direction from orientation alone.
pub fn gravity(q: &Quaternion) -> Vector3 {
    Vector3::new(
        2.0 * (q.x * q.z - q.w * q.y),
        2.0 * (q.w * q.x + q.y * q.z),
        q.w * q.w - q.x * q.x - q.y * q.y + q.z * q.z,
    )
}

/// Remove gravity from a raw acceleration sample.
#[inline]
pub fn linear_acceleration(raw: Vector3, gravity: Vector3) -> Vector3 {
    raw - gravity
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPSILON: f32 = 1e-5;

    fn assert_vec_eq(actual: Vector3, expected: Vector3) {
        assert!(
            (actual.x - expected.x).abs() < EPSILON
                && (actual.y - expected.y).abs() < EPSILON
                && (actual.z - expected.z).abs() < EPSILON,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn test_identity_euler_is_zero() {
        assert_vec_eq(Quaternion::IDENTITY.to_euler(), Vector3::ZERO);
    }

    #[test]
    fn test_gravity_identity_points_up() {
        assert_eq!(gravity(&Quaternion::IDENTITY), Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_euler_single_axis_rotations() {
        let half = std::f32::consts::FRAC_PI_4;

        // 90 degrees about X
        let q = Quaternion::new(half.cos(), half.sin(), 0.0, 0.0);
        assert_vec_eq(to_euler(&q), Vector3::new(PI / 2.0, 0.0, 0.0));

        // 90 degrees about Z
        let q = Quaternion::new(half.cos(), 0.0, 0.0, half.sin());
        assert_vec_eq(to_euler(&q), Vector3::new(0.0, 0.0, PI / 2.0));
    }

    #[test]
    fn test_euler_pole_is_clamped() {
        // Exactly at the pole with a slight overshoot from rounding
        let s = std::f32::consts::FRAC_1_SQRT_2 + 1e-6;
        let q = Quaternion::new(s, 0.0, s, 0.0);
        let euler = to_euler(&q);
        assert!(!euler.y.is_nan());
        assert!((euler.y - PI / 2.0).abs() < 1e-3);

        let q = Quaternion::new(0.0, 0.0, 1.0, 0.0);
        let euler = to_euler(&q);
        assert!(!euler.x.is_nan() && !euler.y.is_nan() && !euler.z.is_nan());

        let q = Quaternion::new(s, 0.0, -s, 0.0);
        assert!((to_euler(&q).y + PI / 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_to_degrees() {
        let v = Vector3::new(PI, PI / 2.0, -PI).to_degrees();
        assert!((v.x - 180.0).abs() < 1e-3);
        assert!((v.y - 90.0).abs() < 1e-3);
        assert!((v.z + 180.0).abs() < 1e-3);
    }

    #[test]
    fn test_linear_acceleration_at_rest() {
        let raw = Vector3::new(0.0, 0.0, 1.0);
        let linear = linear_acceleration(raw, gravity(&Quaternion::IDENTITY));
        assert_vec_eq(linear, Vector3::ZERO);
    }

    fn unit_quaternion() -> impl Strategy<Value = Quaternion> {
        (
            -1.0f32..1.0,
            -1.0f32..1.0,
            -1.0f32..1.0,
            -1.0f32..1.0,
        )
            .prop_filter("non-degenerate", |(w, x, y, z)| {
                (w * w + x * x + y * y + z * z).sqrt() > 1e-3
            })
            .prop_map(|(w, x, y, z)| {
                let n = (w * w + x * x + y * y + z * z).sqrt();
                Quaternion::new(w / n, x / n, y / n, z / n)
            })
    }

    proptest! {
        #[test]
        fn prop_euler_never_nan(q in unit_quaternion()) {
            let e = to_euler(&q);
            prop_assert!(!e.x.is_nan() && !e.y.is_nan() && !e.z.is_nan());
        }

        #[test]
        fn prop_euler_never_nan_with_zero_scalar(x in -1.0f32..1.0, y in -1.0f32..1.0, z in -1.0f32..1.0) {
            let n = (x * x + y * y + z * z).sqrt();
            prop_assume!(n > 1e-3);
            let e = to_euler(&Quaternion::new(0.0, x / n, y / n, z / n));
            prop_assert!(!e.x.is_nan() && !e.y.is_nan() && !e.z.is_nan());
        }

        #[test]
        fn prop_linear_acceleration_is_subtraction(
            q in unit_quaternion(),
            ax in -4.0f32..4.0,
            ay in -4.0f32..4.0,
            az in -4.0f32..4.0,
        ) {
            let a = Vector3::new(ax, ay, az);
            let g = gravity(&q);
            let linear = linear_acceleration(a, g);
            prop_assert_eq!(linear, Vector3::new(ax - g.x, ay - g.y, az - g.z));
        }
    }
}
