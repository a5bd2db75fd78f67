//! Real-root isolation by sign-variation bisection
//! (Vincent–Collins–Akritas).
//!
//! Operates on polynomials rescaled to the unit interval. The working list
//! holds translated/rescaled copies borrowed from a [`PolyCache`]; every
//! exit path returns them through the guard drops.

use crate::cache::PolyCache;
use crate::dense::{eval, rescale_half_in_place, shift_by_one};

/// Result of an isolation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolOutcome {
    /// All real roots in `(0, 1)` are covered by the returned intervals.
    Complete,
    /// The bisection hit its depth bound; the caller must treat the whole
    /// query as inconclusive and skip this subinterval (non-fatal).
    DepthExceeded,
}

/// Counts strict sign changes in a coefficient sequence, ignoring zeros
/// (Descartes's rule of signs).
pub fn sign_changes(c: &[f64]) -> u32 {
    let mut count = 0;
    let mut prev = 0.0_f64;
    for &ck in c {
        if ck == 0.0 {
            continue;
        }
        if prev != 0.0 && (ck < 0.0) != (prev < 0.0) {
            count += 1;
        }
        prev = ck;
    }
    count
}

/// Reverse-translate-and-count: bounds the number of roots of `c` in the
/// open unit interval.
///
/// Writes into `out` the composition `(x+1)^n · c(1/(x+1))` (coefficient
/// reversal followed by a unit Taylor shift) and returns its Descartes
/// count together with the value `c(1)`. The endpoint value is an
/// auxiliary sign confirmation only, never an authoritative root test.
pub fn rtscc(out: &mut [f64], c: &[f64]) -> (u32, f64) {
    debug_assert_eq!(out.len(), c.len());
    for (o, ck) in out.iter_mut().zip(c.iter().rev()) {
        *o = *ck;
    }
    shift_by_one(out);
    (sign_changes(out), out[0])
}

/// Isolates the real roots of `c` (given on `[0, 1]`) into disjoint
/// intervals appended to `isol`.
///
/// The bisection depth is bounded by `2·deg + 20`; past that the
/// polynomial is presumed ill-conditioned (e.g. a near-double root below
/// rounding noise) and the run reports [`IsolOutcome::DepthExceeded`].
pub fn isolate_roots(cache: &PolyCache, c: &[f64], isol: &mut Vec<(f64, f64)>) -> IsolOutcome {
    let n = c.len();
    if n == 0 {
        return IsolOutcome::Complete;
    }
    let max_depth = 2 * (n as u32 - 1) + 20;

    let mut wlist: Vec<(f64, f64, u32, _)> = vec![(0.0, 1.0, 0, cache.acquire_copy(c))];

    while let Some((lo, hi, depth, q)) = wlist.pop() {
        let nsc = {
            let mut tr = cache.acquire(n);
            let (nsc, _pt1) = rtscc(&mut tr, &q);
            nsc
        };

        match nsc {
            0 => continue,
            1 => {
                isol.push((lo, hi));
                continue;
            }
            _ => {}
        }

        if depth >= max_depth {
            return IsolOutcome::DepthExceeded;
        }

        let mid = 0.5 * (lo + hi);

        // Lower half: q(x/2). Upper half: q((x+1)/2).
        let mut qlo = cache.acquire_copy(&q);
        drop(q);
        rescale_half_in_place(&mut qlo);
        let mut qhi = cache.acquire_copy(&qlo);
        shift_by_one(&mut qhi);

        if qhi[0] == 0.0 {
            // Exact root at the split point.
            isol.push((mid, mid));
        }

        wlist.push((lo, mid, depth + 1, qlo));
        wlist.push((mid, hi, depth + 1, qhi));
    }

    IsolOutcome::Complete
}

/// Refines an isolating interval to a single root.
///
/// Eight bisection steps followed by one Newton polish guarded to stay
/// inside the interval.
pub fn refine_root(c: &[f64], mut lo: f64, mut hi: f64) -> f64 {
    if lo == hi {
        return lo;
    }
    let flo = eval(c, lo);
    if flo == 0.0 {
        return lo;
    }
    let lo_negative = flo < 0.0;

    for _ in 0..8 {
        let mid = 0.5 * (lo + hi);
        let fm = eval(c, mid);
        if fm == 0.0 {
            return mid;
        }
        if (fm < 0.0) == lo_negative {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let x = 0.5 * (lo + hi);
    let fx = eval(c, x);
    let dfx: f64 = c
        .iter()
        .enumerate()
        .skip(1)
        .rev()
        .fold(0.0, |acc, (k, &ck)| acc.mul_add(x, ck * k as f64));
    if dfx != 0.0 {
        let polished = x - fx / dfx;
        if polished > lo && polished < hi {
            return polished;
        }
    }
    x
}
