//! Morton (Z-order) keys and the sort permutation.
//!
//! Box centers are quantized to 21 bits per axis against the per-chunk
//! global AABB and bit-interleaved into a 64-bit key. The global box must
//! be computed before any quantization starts, otherwise parallel
//! reductions would make the permutation non-deterministic.

use rayon::prelude::*;

use crate::aabb::Aabb;

/// Quantization resolution per axis.
const MORTON_BITS: u32 = 21;
const MORTON_MAX: u64 = (1 << MORTON_BITS) - 1;

/// Key assigned to disabled particles; sorts to the end.
pub const DISABLED_CODE: u64 = u64::MAX;

/// Spreads the low 21 bits of `v`, leaving two zero bits after each.
#[inline]
pub fn expand_bits_3(mut v: u64) -> u64 {
    v &= MORTON_MAX;
    v = (v | (v << 32)) & 0x001F_0000_0000_FFFF;
    v = (v | (v << 16)) & 0x001F_0000_FF00_00FF;
    v = (v | (v << 8)) & 0x100F_00F0_0F00_F00F;
    v = (v | (v << 4)) & 0x10C3_0C30_C30C_30C3;
    v = (v | (v << 2)) & 0x1249_2492_4924_9249;
    v
}

/// Interleaves three 21-bit coordinates into a 63-bit Morton code.
#[inline]
pub fn morton_encode(x: u64, y: u64, z: u64) -> u64 {
    (expand_bits_3(x) << 2) | (expand_bits_3(y) << 1) | expand_bits_3(z)
}

/// Quantizes one coordinate into `[0, 2^21)` within the global extent.
#[inline]
fn quantize(c: f32, lo: f32, hi: f32) -> u64 {
    if hi <= lo {
        return 0;
    }
    let t = ((c - lo) / (hi - lo)).clamp(0.0, 1.0) as f64;
    ((t * (1u64 << MORTON_BITS) as f64) as u64).min(MORTON_MAX)
}

/// Computes the Morton code of every particle box against the global box.
/// Disabled (empty) boxes get [`DISABLED_CODE`].
pub fn morton_codes(aabbs: &[Aabb], global: &Aabb, out: &mut Vec<u64>) {
    out.clear();
    out.extend(aabbs.iter().map(|bb| {
        if bb.is_empty() {
            DISABLED_CODE
        } else {
            morton_encode(
                quantize(bb.center(0), global.lb[0], global.ub[0]),
                quantize(bb.center(1), global.lb[1], global.ub[1]),
                quantize(bb.center(2), global.lb[2], global.ub[2]),
            )
        }
    }));
}

/// Argsort of the Morton codes, tie-broken by particle index so the
/// permutation is deterministic.
pub fn sort_indices(mcodes: &[u64], vidx: &mut Vec<u32>) {
    vidx.clear();
    vidx.extend(0..mcodes.len() as u32);
    vidx.par_sort_unstable_by_key(|&i| (mcodes[i as usize], i));
}

/// Builds the sorted views `srt_aabbs[k] = aabbs[vidx[k]]` and
/// `srt_mcodes[k] = mcodes[vidx[k]]`.
pub fn apply_permutation(
    vidx: &[u32],
    aabbs: &[Aabb],
    mcodes: &[u64],
    srt_aabbs: &mut Vec<Aabb>,
    srt_mcodes: &mut Vec<u64>,
) {
    srt_aabbs.clear();
    srt_mcodes.clear();
    srt_aabbs.extend(vidx.iter().map(|&i| aabbs[i as usize]));
    srt_mcodes.extend(vidx.iter().map(|&i| mcodes[i as usize]));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_bits_small_values() {
        assert_eq!(expand_bits_3(0), 0);
        assert_eq!(expand_bits_3(1), 1);
        assert_eq!(expand_bits_3(0b11), 0b1001);
        assert_eq!(expand_bits_3(0b111), 0b1001001);
    }

    #[test]
    fn encode_separates_axes() {
        let cx = morton_encode(1, 0, 0);
        let cy = morton_encode(0, 1, 0);
        let cz = morton_encode(0, 0, 1);
        assert_eq!(cz, 1);
        assert_eq!(cy, 2);
        assert_eq!(cx, 4);
    }

    #[test]
    fn nearby_centers_get_nearby_codes() {
        let a = morton_encode(100, 100, 100);
        let b = morton_encode(101, 100, 100);
        let c = morton_encode(1000, 1000, 1000);
        assert!((a ^ b).leading_zeros() > (a ^ c).leading_zeros());
    }

    #[test]
    fn disabled_sorts_last_with_index_tie_break() {
        let boxed = |v: f32| Aabb {
            lb: [v; 4],
            ub: [v; 4],
        };
        let aabbs = [boxed(0.0), Aabb::EMPTY, boxed(0.0), boxed(10.0)];
        let global = aabbs
            .iter()
            .fold(Aabb::EMPTY, |acc, bb| acc.union(bb));

        let mut codes = Vec::new();
        morton_codes(&aabbs, &global, &mut codes);
        assert_eq!(codes[1], DISABLED_CODE);

        let mut vidx = Vec::new();
        sort_indices(&codes, &mut vidx);
        // Equal codes tie-break by index; the disabled particle is last.
        assert_eq!(vidx, vec![0, 2, 3, 1]);
    }

    #[test]
    fn permutation_is_consistent() {
        let boxed = |v: f32| Aabb {
            lb: [v; 4],
            ub: [v + 1.0; 4],
        };
        let aabbs = [boxed(5.0), boxed(0.0), boxed(2.0)];
        let global = aabbs.iter().fold(Aabb::EMPTY, |acc, bb| acc.union(bb));

        let mut codes = Vec::new();
        morton_codes(&aabbs, &global, &mut codes);
        let mut vidx = Vec::new();
        sort_indices(&codes, &mut vidx);

        let (mut srt_a, mut srt_m) = (Vec::new(), Vec::new());
        apply_permutation(&vidx, &aabbs, &codes, &mut srt_a, &mut srt_m);

        for k in 0..3 {
            assert_eq!(srt_a[k], aabbs[vidx[k] as usize]);
            assert_eq!(srt_m[k], codes[vidx[k] as usize]);
        }
        assert!(srt_m.windows(2).all(|w| w[0] <= w[1]));
    }
}
