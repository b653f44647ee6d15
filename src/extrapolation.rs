//! Extrapolation Worker
//!
//! Re-simulates from an authoritative past state to the present on a
//! dedicated thread. The client hands over the delayed server snapshot,
//! the full component state of every entity reachable from it, and the
//! recorded input history; the worker rebuilds a scratch registry, steps
//! it forward with inputs applied at their original timestamps, and
//! returns the resulting body state for the client to apply exactly like
//! a snap.
//!
//! Jobs carry a wall-clock budget. When it runs out mid-simulation the
//! worker stops where it is and flags `terminated_early`; the client then
//! falls back to snapping to the raw snapshot.

use crate::entity_map::EntityMap;
use crate::input_history::InputHistory;
use crate::material::MaterialMixTable;
use crate::math::Scalar;
use crate::pool::{
    apply_pools, export_pools, finalize_imported, ComponentPool, RegistrySnapshot,
    BODY_STATE_INDICES,
};
use crate::registry::Entity;
use crate::settings::{ExecutionMode, NetworkSettings, Settings};
use crate::stepper::SimState;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// One extrapolation job.
pub struct ExtrapolationRequest {
    /// Simulation time the snapshot represents.
    pub start_time: Scalar,
    /// Time to simulate up to (the client's present).
    pub target_time: Scalar,
    /// The authoritative snapshot, client handle space.
    pub snapshot: RegistrySnapshot,
    /// Working set: every entity reachable from the snapshot plus statics.
    pub entities: Vec<Entity>,
    /// Full component state of the working set.
    pub pools: Vec<ComponentPool>,
    /// Entities owned by the local client.
    pub owned_entities: Vec<Entity>,
    /// Recorded inputs to replay.
    pub input_history: InputHistory,
    /// Simulation parameters, as replicated from the server.
    pub settings: Settings,
    /// Wall-clock budget in milliseconds.
    pub budget_ms: u64,
}

/// Outcome of an extrapolation job.
pub struct ExtrapolationResult {
    /// Whether the wall-clock budget ran out before reaching the target.
    pub terminated_early: bool,
    /// Entities covered by the result, client handle space.
    pub entities: Vec<Entity>,
    /// Body state pools at `timestamp`, client handle space.
    pub pools: Vec<ComponentPool>,
    /// Simulation time actually reached.
    pub timestamp: Scalar,
}

/// Handle to the extrapolation thread.
pub struct ExtrapolationWorker {
    sender: Sender<ExtrapolationRequest>,
    receiver: Receiver<ExtrapolationResult>,
    join: Option<JoinHandle<()>>,
}

impl ExtrapolationWorker {
    /// Spawn the worker thread.
    pub fn spawn(material_table: Arc<RwLock<MaterialMixTable>>) -> Self {
        let (to_worker, inbox) = unbounded::<ExtrapolationRequest>();
        let (outbox, from_worker) = unbounded::<ExtrapolationResult>();
        let join = std::thread::spawn(move || {
            while let Ok(request) = inbox.recv() {
                let result = run_extrapolation(request, &material_table);
                if outbox.send(result).is_err() {
                    break;
                }
            }
        });
        Self {
            sender: to_worker,
            receiver: from_worker,
            join: Some(join),
        }
    }

    /// Enqueue a job.
    pub fn request(&self, request: ExtrapolationRequest) {
        let _ = self.sender.send(request);
    }

    /// Poll for a finished job without blocking.
    pub fn try_result(&self) -> Option<ExtrapolationResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for ExtrapolationWorker {
    fn drop(&mut self) {
        // Dropping the sender ends the worker loop.
        let (dead_sender, _) = unbounded();
        self.sender = dead_sender;
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_extrapolation(
    mut request: ExtrapolationRequest,
    material_table: &Arc<RwLock<MaterialMixTable>>,
) -> ExtrapolationResult {
    let started = Instant::now();
    let mut settings = request.settings;
    settings.execution_mode = ExecutionMode::Sequential;
    settings.network = NetworkSettings::None;
    let mut state = SimState::new(settings, material_table.clone());

    // Rebuild the working set in a scratch registry.
    let mut map = EntityMap::new();
    for &remote in &request.entities {
        let local = state.registry.create();
        map.insert(remote, local);
    }
    for pool in &mut request.pools {
        pool.map_entities(&map);
    }
    apply_pools(&mut state.registry, &request.pools);
    let locals: Vec<Entity> = request.entities.iter().filter_map(|&e| map.at_remote(e)).collect();
    finalize_imported(&mut state.registry, &mut state.graph, &locals, false);

    // Authoritative snapshot state overrides the mirrored state.
    request.snapshot.map_entities(&map);
    apply_pools(&mut state.registry, &request.snapshot.pools);

    // Remap recorded inputs into the scratch space.
    let mut history = request.input_history;
    remap_history(&mut history, &map);

    state.sim_time = request.start_time;
    let dt = state.settings.fixed_dt;
    let mut terminated_early = false;

    while state.sim_time + dt <= request.target_time {
        if started.elapsed().as_millis() as u64 > request.budget_ms {
            terminated_early = true;
            log::warn!(
                "extrapolation exceeded its {} ms budget at t={}",
                request.budget_ms,
                state.sim_time
            );
            break;
        }
        history.apply_at(&mut state.registry, state.sim_time);
        state.step(dt);
    }

    // Export the resulting body state back in client handles.
    let dynamic: Vec<Entity> = state.registry.dynamic_tag.entities().to_vec();
    let mut pools = export_pools(&state.registry, dynamic.iter().copied(), &BODY_STATE_INDICES);
    let inverse = map.inverted();
    pools.retain_mut(|pool| {
        pool.map_entities(&inverse);
        !pool.is_empty()
    });
    let entities: Vec<Entity> = dynamic.iter().filter_map(|&e| map.at_local(e)).collect();

    ExtrapolationResult {
        terminated_early,
        entities,
        pools,
        timestamp: state.sim_time,
    }
}

fn remap_history(history: &mut InputHistory, map: &EntityMap) {
    let mut remapped = InputHistory::new();
    for entry in history.range(Scalar::MIN, Scalar::MAX) {
        let inputs: Vec<_> = entry
            .inputs
            .iter()
            .filter_map(|(entity, input)| {
                map.at_remote(*entity).map(|local| (local, input.clone()))
            })
            .collect();
        remapped.emplace_values(inputs, entry.timestamp);
    }
    *history = remapped;
}
