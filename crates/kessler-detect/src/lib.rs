//! # kessler-detect
//!
//! Collision and conjunction detection over dense Taylor output.
//!
//! The pipeline runs once per chunk (collisional timestep):
//! 1. **AABBs** — conservative per-particle boxes over the chunk
//!    ([`aabb`])
//! 2. **Morton** — Z-order keys of the box centers, sorted ([`morton`])
//! 3. **BVH** — level-wise tree over the sorted boxes ([`bvh`])
//! 4. **Broad phase** — candidate pair enumeration ([`broad`])
//! 5. **Narrow phase** — polynomial root isolation on the squared
//!    distance ([`narrow`])

pub mod aabb;
pub mod broad;
pub mod bvh;
pub mod morton;
pub mod narrow;

pub use aabb::{particle_chunk_aabb, Aabb, GlobalAabb};
pub use broad::{broad_phase, BpScratch};
pub use bvh::{BvhNode, BvhTree};
pub use morton::{apply_permutation, morton_codes, morton_encode, sort_indices};
pub use narrow::{narrow_phase, Collision, Conjunction, NpParams, NpWorkspace};
