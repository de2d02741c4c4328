//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! Every operation on [`Vec2`] returns a new value; nothing mutates in place.
//!
//! Orientation convention: positive angles are counter-clockwise. [`Vec2::rotate`]
//! and [`Vec2::cross`] both follow it, so a positive torque turns a body (and
//! every vector rotated with it) counter-clockwise.

use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Undefined vector arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("cannot normalize a zero-length vector")]
    ZeroLength,
}

/// 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Per-component product `(a.x*b.x, a.y*b.y)`.
    pub fn component_mul(self, rhs: Self) -> Self {
        Self::new(self.x * rhs.x, self.y * rhs.y)
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y
    }

    /// Scalar 2D cross product `a.x*b.y - b.x*a.y`.
    ///
    /// Positive when `rhs` lies counter-clockwise of `self`.
    pub fn cross(self, rhs: Self) -> f64 {
        self.x * rhs.y - rhs.x * self.y
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k)
    }

    pub fn len_sq(self) -> f64 {
        self.dot(self)
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Unit vector with the same direction.
    pub fn normalize(self) -> Result<Self, MathError> {
        let len = self.length();
        if len == 0.0 {
            return Err(MathError::ZeroLength);
        }
        Ok(Self::new(self.x / len, self.y / len))
    }

    /// Rotates counter-clockwise by `radians` (clockwise for negative values).
    pub fn rotate(self, radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    pub fn lerp(self, to: Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(self.x + (to.x - self.x) * t, self.y + (to.y - self.y) * t)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Component-wise comparison within `eps`.
    pub fn approx_eq(self, rhs: Self, eps: f64) -> bool {
        (self.x - rhs.x).abs() <= eps && (self.y - rhs.y).abs() <= eps
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Self;
    fn mul(self, k: f64) -> Self {
        self.scale(k)
    }
}

impl Neg for Vec2 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::{FRAC_PI_2, PI};

    const EPS: f64 = 1e-9;

    #[test]
    fn basic_arithmetic() {
        let a = Vec2::new(1.0, 2.0);
        let b = Vec2::new(3.0, -4.0);
        assert_eq!(a + b, Vec2::new(4.0, -2.0));
        assert_eq!(a - b, Vec2::new(-2.0, 6.0));
        assert_eq!(a.component_mul(b), Vec2::new(3.0, -8.0));
        assert_eq!(a.dot(b), -5.0);
        assert_eq!(a * 2.0, Vec2::new(2.0, 4.0));
        assert_eq!(-a, Vec2::new(-1.0, -2.0));
    }

    #[test]
    fn cross_sign_follows_counter_clockwise() {
        let x = Vec2::new(1.0, 0.0);
        let y = Vec2::new(0.0, 1.0);
        assert_eq!(x.cross(y), 1.0);
        assert_eq!(y.cross(x), -1.0);
        assert_eq!(Vec2::new(2.0, 0.0).cross(Vec2::new(1000.0, -100.0)), -200.0);
    }

    #[test]
    fn rotate_quarter_turn_is_counter_clockwise() {
        let r = Vec2::new(1.0, 0.0).rotate(FRAC_PI_2);
        assert!(r.approx_eq(Vec2::new(0.0, 1.0), EPS));
        let r = Vec2::new(1.0, 0.0).rotate(-FRAC_PI_2);
        assert!(r.approx_eq(Vec2::new(0.0, -1.0), EPS));
    }

    #[test]
    fn rotate_by_zero_is_identity() {
        let v = Vec2::new(3.5, -7.25);
        assert_eq!(v.rotate(0.0), v);
    }

    #[test]
    fn rotate_is_reversible_for_any_angle() {
        let mut rng = StdRng::seed_from_u64(0x6ca5);
        for _ in 0..1000 {
            let v = Vec2::new(rng.gen_range(-1e3..1e3), rng.gen_range(-1e3..1e3));
            let theta = rng.gen_range(-4.0 * PI..4.0 * PI);
            let back = v.rotate(theta).rotate(-theta);
            assert!(back.approx_eq(v, 1e-9 * (1.0 + v.length())), "{v:?} θ={theta}");
            // Length is preserved regardless of the sign of θ.
            assert!((v.rotate(theta).length() - v.length()).abs() < 1e-9 * (1.0 + v.length()));
        }
    }

    #[test]
    fn rotate_is_continuous_across_zero() {
        let v = Vec2::new(2.0, 1.0);
        let tiny = 1e-12;
        assert!(v.rotate(tiny).approx_eq(v.rotate(-tiny), 1e-10));
    }

    #[test]
    fn normalize_zero_is_an_error() {
        assert_eq!(Vec2::ZERO.normalize(), Err(MathError::ZeroLength));
        let n = Vec2::new(3.0, 4.0).normalize().unwrap();
        assert!(n.approx_eq(Vec2::new(0.6, 0.8), EPS));
    }

    #[test]
    fn vec2_lerp_midpoint() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(2.0, 4.0);
        assert_eq!(a.lerp(b, 0.5), Vec2::new(1.0, 2.0));
    }
}
