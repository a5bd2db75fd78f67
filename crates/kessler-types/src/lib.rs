//! # kessler-types
//!
//! Shared types, error types, the double-double time scalar, and the
//! concurrent object pool used by the kessler simulation engine.
//!
//! This crate has zero domain logic — it defines the vocabulary
//! that all other kessler crates share.

pub mod constants;
pub mod dfloat;
pub mod error;
pub mod pool;

pub use dfloat::DFloat;
pub use error::{KesslerError, KesslerResult};
pub use pool::{Pool, PoolGuard};
