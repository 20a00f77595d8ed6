//! Floating-point sample type used inside the engine

use rustfft::FftNum;
use std::fmt::{Debug, Display};
use std::ops::{AddAssign, MulAssign, SubAssign};

use crate::error::EngineError;

/// Internal arithmetic precision of a filter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// 32-bit float
    #[default]
    Single,
    /// 64-bit float
    Double,
}

impl Precision {
    /// Map a real size in bytes (4 or 8) to a precision
    pub fn from_realsize(realsize: usize) -> Result<Self, EngineError> {
        match realsize {
            4 => Ok(Precision::Single),
            8 => Ok(Precision::Double),
            other => Err(EngineError::InvalidPrecision(other)),
        }
    }

    /// Size of one real value in bytes
    pub fn realsize(self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

/// Real number type the transform and convolution kernels are generic over.
///
/// Implemented for `f32` and `f64` only; both instantiations are monomorphized
/// so the kernels compile to the same code as hand-written per-type loops.
pub trait Real:
    FftNum + Default + PartialOrd + Display + AddAssign + SubAssign + MulAssign
{
    const ZERO: Self;
    const ONE: Self;
    const HALF: Self;
    const PRECISION: Precision;

    fn of(value: f64) -> Self;
    fn as_f64(self) -> f64;
    fn finite(self) -> bool;
    /// Truncate toward zero, saturating at the `i32` range
    fn trunc_i32(self) -> i32;
}

impl Real for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const HALF: Self = 0.5;
    const PRECISION: Precision = Precision::Single;

    #[inline(always)]
    fn of(value: f64) -> Self {
        value as f32
    }

    #[inline(always)]
    fn as_f64(self) -> f64 {
        self as f64
    }

    #[inline(always)]
    fn finite(self) -> bool {
        self.is_finite()
    }

    #[inline(always)]
    fn trunc_i32(self) -> i32 {
        self as i32
    }
}

impl Real for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const HALF: Self = 0.5;
    const PRECISION: Precision = Precision::Double;

    #[inline(always)]
    fn of(value: f64) -> Self {
        value
    }

    #[inline(always)]
    fn as_f64(self) -> f64 {
        self
    }

    #[inline(always)]
    fn finite(self) -> bool {
        self.is_finite()
    }

    #[inline(always)]
    fn trunc_i32(self) -> i32 {
        self as i32
    }
}

/// Smallest power of two that is at least `n`, never below 2
pub fn next_power_of_two(n: usize) -> usize {
    let mut p = 2;
    while p < n {
        p <<= 1;
    }
    p
}

/// Smallest multiple of `multiple` that is at least `n`
pub fn next_multiple(n: usize, multiple: usize) -> usize {
    if multiple == 0 {
        return n;
    }
    n.div_ceil(multiple) * multiple
}

/// Base-2 logarithm of a power of two, `None` otherwise
pub fn log2_exact(n: usize) -> Option<u32> {
    if n.is_power_of_two() {
        Some(n.trailing_zeros())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_from_realsize() {
        assert_eq!(Precision::from_realsize(4).unwrap(), Precision::Single);
        assert_eq!(Precision::from_realsize(8).unwrap(), Precision::Double);
        assert!(Precision::from_realsize(2).is_err());
    }

    #[test]
    fn test_next_power_of_two() {
        assert_eq!(next_power_of_two(0), 2);
        assert_eq!(next_power_of_two(3), 4);
        assert_eq!(next_power_of_two(1024), 1024);
        assert_eq!(next_power_of_two(1025), 2048);
    }

    #[test]
    fn test_next_multiple() {
        assert_eq!(next_multiple(1000, 256), 1024);
        assert_eq!(next_multiple(1024, 256), 1024);
        assert_eq!(next_multiple(1, 64), 64);
    }

    #[test]
    fn test_trunc_saturates() {
        assert_eq!(3.9f32.trunc_i32(), 3);
        assert_eq!((-3.9f64).trunc_i32(), -3);
        assert_eq!(1e12f64.trunc_i32(), i32::MAX);
    }
}
