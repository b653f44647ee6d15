//! Simulation Settings
//!
//! Per-world configuration: fixed timestep, gravity, solver iteration
//! counts, execution mode, step callbacks, the collision gate and the
//! networking role. Servers replicate the solver-relevant subset to
//! clients through the `ServerSettings` packet so both sides integrate
//! with the same parameters.

use crate::math::{Scalar, Vector3, GRAVITY_EARTH};
use crate::registry::{Entity, Registry};

/// How the stepper schedules island work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Everything runs on the calling thread, islands in deterministic
    /// order.
    #[default]
    Sequential,
    /// Islands run on affinity worker threads; the coordinator merges
    /// their deltas.
    Asynchronous,
}

/// Called at the start and end of every fixed step.
pub type StepCallbackFn = fn(&mut Registry, Scalar);

/// Gate deciding whether a pair of bodies may collide.
pub type ShouldCollideFn = fn(&Registry, Entity, Entity) -> bool;

/// Client-side networking parameters.
#[derive(Clone, Copy, Debug)]
pub struct ClientNetworkSettings {
    /// Outbound snapshot rate in Hz.
    pub snapshot_rate: Scalar,
    /// Smoothed round-trip time to the server, seconds.
    pub round_trip_time: Scalar,
    /// Whether delayed snapshots are extrapolated to the present.
    pub extrapolation_enabled: bool,
    /// Wall-clock budget for one extrapolation job, milliseconds.
    pub extrapolation_budget_ms: u64,
    /// Maximum age of retained action history entries, seconds.
    pub action_history_max_age: Scalar,
    /// How often clock-sync exchanges run, seconds.
    pub clock_sync_interval: Scalar,
}

impl Default for ClientNetworkSettings {
    fn default() -> Self {
        Self {
            snapshot_rate: 30.0,
            round_trip_time: 0.1,
            extrapolation_enabled: true,
            extrapolation_budget_ms: 100,
            action_history_max_age: 1.0,
            clock_sync_interval: 1.0,
        }
    }
}

/// Server-side networking parameters.
#[derive(Clone, Copy, Debug)]
pub struct ServerNetworkSettings {
    /// Delay applied to client input playout, seconds.
    pub playout_delay: Scalar,
    /// Whether clients get authority over their whole physical
    /// neighborhood instead of input-only replication.
    pub allow_full_ownership: bool,
    /// Outbound snapshot rate in Hz.
    pub snapshot_rate: Scalar,
}

impl Default for ServerNetworkSettings {
    fn default() -> Self {
        Self {
            playout_delay: 0.1,
            allow_full_ownership: true,
            snapshot_rate: 20.0,
        }
    }
}

/// Networking role of this world.
#[derive(Clone, Copy, Debug, Default)]
pub enum NetworkSettings {
    /// No networking.
    #[default]
    None,
    /// Client role.
    Client(ClientNetworkSettings),
    /// Server role.
    Server(ServerNetworkSettings),
}

/// World configuration.
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// Fixed simulation timestep, seconds.
    pub fixed_dt: Scalar,
    /// Whether stepping is suspended.
    pub paused: bool,
    /// Default gravity applied to new dynamic bodies.
    pub gravity: Vector3,
    /// Velocity (impulse) solver iterations per step.
    pub num_solver_velocity_iterations: u32,
    /// Position (non-linear Gauss-Seidel) iterations per step.
    pub num_solver_position_iterations: u32,
    /// Outer restitution pre-pass iterations.
    pub num_restitution_iterations: u32,
    /// Inner relaxations per contact row in the restitution pass.
    pub num_individual_restitution_iterations: u32,
    /// Scheduling mode.
    pub execution_mode: ExecutionMode,
    /// Worker threads used in asynchronous mode.
    pub num_worker_threads: usize,
    /// Called before each fixed step.
    pub pre_step_callback: Option<StepCallbackFn>,
    /// Called after each fixed step.
    pub post_step_callback: Option<StepCallbackFn>,
    /// Pair collision gate.
    pub should_collide: ShouldCollideFn,
    /// Networking role.
    pub network: NetworkSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            paused: false,
            gravity: GRAVITY_EARTH,
            num_solver_velocity_iterations: 8,
            num_solver_position_iterations: 3,
            num_restitution_iterations: 8,
            num_individual_restitution_iterations: 3,
            execution_mode: ExecutionMode::Sequential,
            num_worker_threads: 4,
            pre_step_callback: None,
            post_step_callback: None,
            should_collide: crate::broadphase::should_collide_default,
            network: NetworkSettings::None,
        }
    }
}
