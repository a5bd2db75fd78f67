//! Double-double simulation time.
//!
//! Simulation time accumulates as a two-component sum `hi + lo` to prevent
//! catastrophic cancellation over millions of collisional timesteps.
//! All arithmetic uses error-free transformations (two-sum), so adding a
//! superstep length to the clock loses no information beyond the pair's
//! combined 106-bit significand.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::{Add, AddAssign, Neg, Sub};

/// Error-free sum of two doubles: returns `(s, e)` with `s = fl(a + b)`
/// and `a + b = s + e` exactly (Knuth).
#[inline]
fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let v = s - a;
    let e = (a - (s - v)) + (b - v);
    (s, e)
}

/// Error-free sum assuming `|a| >= |b|` (Dekker).
#[inline]
fn quick_two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let e = b - (s - a);
    (s, e)
}

/// A normalized double-double scalar: `value = hi + lo` with
/// `hi = fl(hi + lo)`.
///
/// Used as the simulation time coordinate. Comparisons are exact on the
/// full two-component value, which is what makes earliest-event selection
/// across chunks deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DFloat {
    hi: f64,
    lo: f64,
}

impl DFloat {
    /// Zero time.
    pub const ZERO: DFloat = DFloat { hi: 0.0, lo: 0.0 };

    /// Builds a normalized value from two arbitrary components.
    pub fn from_parts(hi: f64, lo: f64) -> Self {
        let (s, e) = two_sum(hi, lo);
        Self { hi: s, lo: e }
    }

    /// High (leading) component.
    #[inline]
    pub fn hi(self) -> f64 {
        self.hi
    }

    /// Low (trailing) component.
    #[inline]
    pub fn lo(self) -> f64 {
        self.lo
    }

    /// Rounds to the nearest double. For a normalized value this is `hi`.
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.hi
    }

    /// True if both components are finite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.hi.is_finite() && self.lo.is_finite()
    }

    /// Compensated difference rounded to a double.
    ///
    /// `a.diff_f64(b)` is the correctly-compensated `a - b`; use this for
    /// time offsets relative to a superstep origin, where naive `hi - hi`
    /// would drop the trailing components.
    #[inline]
    pub fn diff_f64(self, other: DFloat) -> f64 {
        let d = self - other;
        d.hi + d.lo
    }
}

impl From<f64> for DFloat {
    #[inline]
    fn from(x: f64) -> Self {
        Self { hi: x, lo: 0.0 }
    }
}

impl Add<f64> for DFloat {
    type Output = DFloat;

    #[inline]
    fn add(self, rhs: f64) -> DFloat {
        let (s, e) = two_sum(self.hi, rhs);
        let (hi, lo) = quick_two_sum(s, e + self.lo);
        DFloat { hi, lo }
    }
}

impl AddAssign<f64> for DFloat {
    #[inline]
    fn add_assign(&mut self, rhs: f64) {
        *self = *self + rhs;
    }
}

impl Add<DFloat> for DFloat {
    type Output = DFloat;

    #[inline]
    fn add(self, rhs: DFloat) -> DFloat {
        let (s, e) = two_sum(self.hi, rhs.hi);
        let (hi, lo) = quick_two_sum(s, e + self.lo + rhs.lo);
        DFloat { hi, lo }
    }
}

impl Neg for DFloat {
    type Output = DFloat;

    #[inline]
    fn neg(self) -> DFloat {
        DFloat {
            hi: -self.hi,
            lo: -self.lo,
        }
    }
}

impl Sub<DFloat> for DFloat {
    type Output = DFloat;

    #[inline]
    fn sub(self, rhs: DFloat) -> DFloat {
        self + (-rhs)
    }
}

impl Sub<f64> for DFloat {
    type Output = DFloat;

    #[inline]
    fn sub(self, rhs: f64) -> DFloat {
        self + (-rhs)
    }
}

impl PartialOrd for DFloat {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        // Normalized components compare lexicographically.
        match self.hi.partial_cmp(&other.hi) {
            Some(Ordering::Equal) => self.lo.partial_cmp(&other.lo),
            ord => ord,
        }
    }
}

impl PartialEq<f64> for DFloat {
    #[inline]
    fn eq(&self, other: &f64) -> bool {
        self.hi == *other && self.lo == 0.0
    }
}

impl PartialOrd<f64> for DFloat {
    #[inline]
    fn partial_cmp(&self, other: &f64) -> Option<Ordering> {
        self.partial_cmp(&DFloat::from(*other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulation_beats_naive_sum() {
        // 10 million additions of a step that is not representable exactly.
        let step = 0.1_f64;
        let n = 10_000_000_u64;

        let mut t = DFloat::ZERO;
        let mut naive = 0.0_f64;
        for _ in 0..n {
            t += step;
            naive += step;
        }

        let exact = n as f64 * step;
        let dd_err = (t.to_f64() - exact).abs();
        let naive_err = (naive - exact).abs();
        assert!(dd_err < naive_err / 1e3, "dd {dd_err} naive {naive_err}");
    }

    #[test]
    fn normalization_invariant() {
        let t = DFloat::from_parts(1e30, 1.0);
        assert_eq!(t.to_f64(), 1e30 + 1.0);
        let u = DFloat::from(1.0) + 1e-30;
        assert_eq!(u.hi(), 1.0);
        assert_eq!(u.lo(), 1e-30);
    }

    #[test]
    fn ordering_sees_trailing_component() {
        let a = DFloat::from(1.0) + 1e-30;
        let b = DFloat::from(1.0);
        assert!(a > b);
        assert!(b < a);
        assert!(a > 0.5);
    }

    #[test]
    fn compensated_difference() {
        let a = DFloat::from(1.0) + 1e-20;
        let b = DFloat::from(1.0);
        assert_eq!(a.diff_f64(b), 1e-20);
    }

    #[test]
    fn sub_roundtrip() {
        let t0 = DFloat::from(12.5);
        let t1 = t0 + 0.25 + 0.25;
        assert_eq!((t1 - t0).to_f64(), 0.5);
    }
}
