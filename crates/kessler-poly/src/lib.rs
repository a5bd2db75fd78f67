//! # kessler-poly
//!
//! Dense polynomial arithmetic on coefficient arrays (lowest order first)
//! and real-root isolation, as used by the narrow-phase collision pipeline:
//!
//! - Horner evaluation (plain and compensated),
//! - Taylor shift and interval rescaling,
//! - squared-distance polynomial construction,
//! - conservative enclosures over an interval (Cauchy-style bound),
//! - Vincent–Collins–Akritas sign-variation bisection,
//! - a pooled scratch-buffer cache with scoped handles.

pub mod cache;
pub mod dense;
pub mod isolate;

pub use cache::{PolyCache, PolyGuard};
pub use dense::{enclosure, eval, eval_compensated, fex_check};
pub use isolate::{isolate_roots, refine_root, IsolOutcome};

// Re-export the canonical vector type for downstream crates.
pub use glam::DVec3;
