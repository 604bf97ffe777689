use crate::traits::Scalar;
use num_traits::{One, Zero};
use std::ops::{Add, Mul, Neg, Sub};

/// First-order forward-mode number `val + eps·ε` with `ε² = 0`.
///
/// Evaluating an expression at `Dual::variable(θ)` carries the value in
/// `val` and the derivative with respect to θ in `eps`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }

    /// Seed for differentiating with respect to `val`.
    pub fn variable(val: f64) -> Self {
        Self::new(val, 1.0)
    }

    /// Applies a scalar function with value `f(val)` and slope `f'(val)`.
    fn chain(self, value: f64, slope: f64) -> Self {
        Self::new(value, self.eps * slope)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::constant(0.0)
    }

    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Add for Dual {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl Mul for Dual {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Neg for Dual {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Scalar for Dual {
    fn from_f64(value: f64) -> Self {
        Self::constant(value)
    }

    fn sin_cos(self) -> (Self, Self) {
        let (s, c) = self.val.sin_cos();
        (self.chain(s, c), self.chain(c, -s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_rule_carries_infinitesimal() {
        let x = Dual::variable(3.0);
        let y = x * x - Dual::from_f64(1.0);
        assert_eq!(y.val, 8.0);
        assert_eq!(y.eps, 6.0);
    }

    #[test]
    fn sin_cos_derivatives() {
        let theta = 0.7;
        let (s, c) = Dual::variable(theta).sin_cos();
        assert!((s.val - theta.sin()).abs() < 1e-15);
        assert!((s.eps - theta.cos()).abs() < 1e-15);
        assert!((c.val - theta.cos()).abs() < 1e-15);
        assert!((c.eps + theta.sin()).abs() < 1e-15);
    }

    #[test]
    fn constants_have_no_tangent() {
        let (s, c) = Dual::constant(1.2).sin_cos();
        assert_eq!(s.eps, 0.0);
        assert_eq!(c.eps, 0.0);
        assert!(Dual::zero().is_zero());
    }
}
