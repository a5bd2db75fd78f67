//! Axis-aligned bounding boxes over chunk intervals.
//!
//! Boxes carry four lanes: x, y, z and the radial distance from the
//! origin. All bounds are conservative: polynomial enclosures are computed
//! in f64, inflated by the particle's effective radius, and rounded
//! outward when narrowed to f32 storage.

use std::sync::atomic::{AtomicU32, Ordering};

use kessler_prop::{var, StepData};
use kessler_types::{constants::AABB_DIM, DFloat};

use kessler_poly::dense::{enclosure, translate_in_place};

/// Rounds an f64 lower bound down to the nearest not-greater f32.
#[inline]
fn round_down(x: f64) -> f32 {
    let f = x as f32;
    if f as f64 > x {
        f32::from_bits(if f > 0.0 {
            f.to_bits() - 1
        } else {
            f.to_bits() + 1
        })
    } else {
        f
    }
}

/// Rounds an f64 upper bound up to the nearest not-smaller f32.
#[inline]
fn round_up(x: f64) -> f32 {
    let f = x as f32;
    if (f as f64) < x {
        f32::from_bits(if f >= 0.0 {
            f.to_bits() + 1
        } else {
            f.to_bits() - 1
        })
    } else {
        f
    }
}

/// A four-lane AABB (x, y, z, radial distance).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub lb: [f32; AABB_DIM],
    pub ub: [f32; AABB_DIM],
}

impl Aabb {
    /// The empty box: overlaps nothing, identity for `union`. Used as the
    /// disabled-particle marker.
    pub const EMPTY: Aabb = Aabb {
        lb: [f32::INFINITY; AABB_DIM],
        ub: [f32::NEG_INFINITY; AABB_DIM],
    };

    /// True for the disabled/uncovered marker.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lb[0] > self.ub[0]
    }

    /// Closed-inequality overlap test over all four lanes.
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        for lane in 0..AABB_DIM {
            if self.lb[lane] > other.ub[lane] || self.ub[lane] < other.lb[lane] {
                return false;
            }
        }
        true
    }

    /// Elementwise union.
    #[inline]
    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut lb = [0.0_f32; AABB_DIM];
        let mut ub = [0.0_f32; AABB_DIM];
        for lane in 0..AABB_DIM {
            lb[lane] = self.lb[lane].min(other.lb[lane]);
            ub[lane] = self.ub[lane].max(other.ub[lane]);
        }
        Aabb { lb, ub }
    }

    /// Lane center, used for Morton quantization.
    #[inline]
    pub fn center(&self, lane: usize) -> f32 {
        0.5 * (self.lb[lane] + self.ub[lane])
    }
}

/// Distance from the origin to the interval `[lb, ub]` along one axis.
#[inline]
fn axis_origin_distance(lb: f64, ub: f64) -> f64 {
    lb.max(-ub).max(0.0)
}

/// Computes one particle's conservative AABB over one chunk.
///
/// `chunk_begin`/`chunk_end` are relative to the superstep begin. The box
/// is the union of the per-substep polynomial enclosures over the
/// substeps' intersections with the chunk, inflated by `inflate`
/// (`max(radius, conj_thresh / 2)`). Returns [`Aabb::EMPTY`] when the
/// particle's trajectory does not cover any part of the chunk, or when an
/// enclosure comes out non-finite.
pub fn particle_chunk_aabb(
    sd: &StepData,
    t_begin: DFloat,
    chunk_begin: f64,
    chunk_end: f64,
    inflate: f64,
    scratch: &mut Vec<f64>,
) -> Aabb {
    let mut lb = [f64::INFINITY; AABB_DIM];
    let mut ub = [f64::NEG_INFINITY; AABB_DIM];
    let mut covered = false;

    let mut prev_end = 0.0_f64;
    for k in 0..sd.n_substeps() {
        let sub_end = sd.tcoords[k].diff_f64(t_begin);
        let lo = prev_end.max(chunk_begin);
        let hi = sub_end.min(chunk_end);
        if hi < lo {
            prev_end = sub_end;
            if prev_end >= chunk_end {
                break;
            }
            continue;
        }
        covered = true;

        // Offset of the clipped interval inside the substep.
        let tau0 = lo - prev_end;
        let h = hi - lo;

        // x, y, z lanes.
        let mut xyz_enc = [(0.0_f64, 0.0_f64); 3];
        for (axis, enc) in xyz_enc.iter_mut().enumerate() {
            let row = sd.var_row(k, axis);
            scratch.clear();
            scratch.extend_from_slice(row);
            translate_in_place(scratch, tau0);
            *enc = enclosure(scratch, h);
            lb[axis] = lb[axis].min(enc.0);
            ub[axis] = ub[axis].max(enc.1);
        }

        // Radial lane: enclosure of the r row when finite, otherwise a
        // bound derived from the position enclosures.
        let r_row = sd.var_row(k, var::R);
        let r_enc = if r_row.iter().all(|c| c.is_finite()) {
            scratch.clear();
            scratch.extend_from_slice(r_row);
            translate_in_place(scratch, tau0);
            enclosure(scratch, h)
        } else {
            let mut lo2 = 0.0;
            let mut hi2 = 0.0;
            for enc in &xyz_enc {
                let d = axis_origin_distance(enc.0, enc.1);
                lo2 += d * d;
                let m = enc.0.abs().max(enc.1.abs());
                hi2 += m * m;
            }
            (lo2.sqrt(), hi2.sqrt())
        };
        lb[3] = lb[3].min(r_enc.0);
        ub[3] = ub[3].max(r_enc.1);

        prev_end = sub_end;
        if prev_end >= chunk_end {
            break;
        }
    }

    if !covered {
        return Aabb::EMPTY;
    }

    let mut out = Aabb::EMPTY;
    for lane in 0..AABB_DIM {
        let l = lb[lane] - inflate;
        let u = ub[lane] + inflate;
        if !l.is_finite() || !u.is_finite() {
            return Aabb::EMPTY;
        }
        out.lb[lane] = round_down(l);
        out.ub[lane] = round_up(u);
    }
    out
}

/// Order-preserving key mapping for f32 atomic min/max: flips the sign bit
/// for positives and all bits for negatives, making integer comparison
/// agree with float comparison.
#[inline]
fn float_key(x: f32) -> u32 {
    let b = x.to_bits();
    if b >> 31 == 1 {
        !b
    } else {
        b ^ 0x8000_0000
    }
}

#[inline]
fn key_float(k: u32) -> f32 {
    if k >> 31 == 1 {
        f32::from_bits(k ^ 0x8000_0000)
    } else {
        f32::from_bits(!k)
    }
}

/// The per-chunk global AABB, reduced with lock-free atomic min/max.
///
/// Cells are `AtomicU32` (naturally aligned for lock-free access) holding
/// order-preserving integer keys of the f32 bounds.
pub struct GlobalAabb {
    lb: [AtomicU32; AABB_DIM],
    ub: [AtomicU32; AABB_DIM],
}

impl GlobalAabb {
    /// Starts from the empty box.
    pub fn new() -> Self {
        Self {
            lb: std::array::from_fn(|_| AtomicU32::new(float_key(f32::INFINITY))),
            ub: std::array::from_fn(|_| AtomicU32::new(float_key(f32::NEG_INFINITY))),
        }
    }

    /// Includes one particle box. Empty boxes are absorbed for free since
    /// their bounds are the reduction identities.
    pub fn include(&self, aabb: &Aabb) {
        for lane in 0..AABB_DIM {
            self.lb[lane].fetch_min(float_key(aabb.lb[lane]), Ordering::Relaxed);
            self.ub[lane].fetch_max(float_key(aabb.ub[lane]), Ordering::Relaxed);
        }
    }

    /// Reads the reduced box after the write phase has joined.
    pub fn snapshot(&self) -> Aabb {
        let mut out = Aabb::EMPTY;
        for lane in 0..AABB_DIM {
            out.lb[lane] = key_float(self.lb[lane].load(Ordering::Relaxed));
            out.ub[lane] = key_float(self.ub[lane].load(Ordering::Relaxed));
        }
        out
    }
}

impl Default for GlobalAabb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_is_closed() {
        let a = Aabb {
            lb: [0.0; 4],
            ub: [1.0; 4],
        };
        let b = Aabb {
            lb: [1.0, 0.0, 0.0, 0.0],
            ub: [2.0, 1.0, 1.0, 1.0],
        };
        assert!(a.overlaps(&b));
    }

    #[test]
    fn empty_box_overlaps_nothing() {
        let a = Aabb {
            lb: [-1e10; 4],
            ub: [1e10; 4],
        };
        assert!(!Aabb::EMPTY.overlaps(&a));
        assert!(!a.overlaps(&Aabb::EMPTY));
    }

    #[test]
    fn union_with_empty_is_identity() {
        let a = Aabb {
            lb: [0.0; 4],
            ub: [1.0; 4],
        };
        assert_eq!(a.union(&Aabb::EMPTY), a);
    }

    #[test]
    fn float_key_preserves_order() {
        let values = [-1e30_f32, -2.5, -0.0, 0.0, 1e-20, 3.5, 1e30];
        for w in values.windows(2) {
            assert!(float_key(w[0]) <= float_key(w[1]));
            assert_eq!(key_float(float_key(w[0])), w[0]);
        }
    }

    #[test]
    fn global_reduction_from_threads() {
        use std::sync::Arc;
        let g = Arc::new(GlobalAabb::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let g = Arc::clone(&g);
                std::thread::spawn(move || {
                    let v = t as f32;
                    g.include(&Aabb {
                        lb: [-v; 4],
                        ub: [v; 4],
                    });
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = g.snapshot();
        assert_eq!(snap.lb[0], -3.0);
        assert_eq!(snap.ub[0], 3.0);
    }

    #[test]
    fn rounding_is_outward() {
        let x = 0.1_f64;
        assert!((round_down(x) as f64) <= x);
        assert!((round_up(x) as f64) >= x);
        let y = -0.1_f64;
        assert!((round_down(y) as f64) <= y);
        assert!((round_up(y) as f64) >= y);
    }
}
