//! Simulation-wide constants and defaults.

/// Number of scalars per particle in the state vector:
/// `(x, y, z, vx, vy, vz, radius)`.
pub const STATE_DIM: usize = 7;

/// Number of lanes in an axis-aligned bounding box: x, y, z plus the
/// radial-distance lane.
pub const AABB_DIM: usize = 4;

/// Default collisional timestep.
pub const DEFAULT_CT: f64 = 1.0;

/// Default number of collisional timesteps per superstep.
pub const DEFAULT_N_PAR_CT: u32 = 1;

/// Minimum number of particles per parallel task. Below this, stages
/// run serially to keep per-task overhead negligible.
pub const MIN_PARTICLES_PER_TASK: usize = 512;
