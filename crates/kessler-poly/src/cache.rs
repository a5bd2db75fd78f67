//! Pooled polynomial scratch buffers.
//!
//! Root isolation churns through short-lived coefficient vectors (one per
//! working-list entry). Borrowing them from a cache keeps the narrow phase
//! allocation-free in steady state. The guard returns the buffer on drop,
//! so every exit path of the isolation loop gives buffers back.

use kessler_types::{Pool, PoolGuard};

/// Scoped handle to a cached coefficient buffer.
pub type PolyGuard<'a> = PoolGuard<'a, Vec<f64>>;

/// A cache of polynomial coefficient buffers.
///
/// Must be constructed before — and therefore outlive — any working list
/// holding guards into it; the borrow checker enforces the destruction
/// order that the narrow phase relies on.
#[derive(Default)]
pub struct PolyCache {
    inner: Pool<Vec<f64>>,
}

impl PolyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self { inner: Pool::new() }
    }

    /// Acquires a zeroed buffer of length `len`.
    pub fn acquire(&self, len: usize) -> PolyGuard<'_> {
        let mut g = self.inner.acquire_with(Vec::new);
        g.clear();
        g.resize(len, 0.0);
        g
    }

    /// Acquires a buffer initialized as a copy of `src`.
    pub fn acquire_copy(&self, src: &[f64]) -> PolyGuard<'_> {
        let mut g = self.inner.acquire_with(Vec::new);
        g.clear();
        g.extend_from_slice(src);
        g
    }

    /// Number of idle buffers currently cached.
    pub fn idle_count(&self) -> usize {
        self.inner.idle_count()
    }
}
