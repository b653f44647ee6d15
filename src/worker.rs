//! Island Worker Threads
//!
//! Asynchronous execution: each worker thread owns a private registry
//! mirror and runs the full per-island step pipeline over the islands
//! assigned to it. The coordinator never shares memory with workers; all
//! exchange happens over per-worker single-producer single-consumer
//! channels carrying registry snapshots and deltas.
//!
//! Message flow per fixed step:
//!
//! 1. The coordinator syncs islands whose composition changed (entities
//!    entering, constraints added) as full snapshots, and forwards
//!    component updates for entities the application mutated.
//! 2. A step request fans out to every worker with work.
//! 3. Workers step their mirrors and reply with body-state deltas, which
//!    the coordinator merges back without blocking on slow islands.
//!
//! Islands keep their worker affinity until destroyed; merged islands
//! migrate member entities to the surviving island's worker. Migration
//! rebuilds that worker's manifold cache for the island, trading a warm
//! start for strict per-worker ownership of the broadphase tree.

use crate::entity_map::EntityMap;
use crate::island::IslandCoordinator;
use crate::material::MaterialMixTable;
use crate::math::Scalar;
use crate::pool::{
    apply_pools, export_pools, finalize_imported, ComponentPool, RegistrySnapshot,
    ALL_COMPONENT_INDICES, BODY_STATE_INDICES,
};
use crate::registry::Entity;
use crate::settings::{ExecutionMode, Settings};
use crate::stepper::SimState;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Coordinator-to-worker messages.
enum WorkerMessage {
    /// Entities entering or refreshing an island: full component snapshot
    /// in coordinator handle space.
    Sync {
        /// Snapshot of the island's working set.
        snapshot: RegistrySnapshot,
    },
    /// Component updates for entities the worker already mirrors.
    Update {
        /// Pools in coordinator handle space.
        pools: Vec<ComponentPool>,
    },
    /// Entities leaving this worker.
    Remove {
        /// Coordinator handles to drop.
        entities: Vec<Entity>,
    },
    /// Run one fixed step over everything this worker owns.
    Step {
        /// Step size.
        dt: Scalar,
    },
    /// Shut the worker down.
    Terminate,
}

/// Worker-to-coordinator messages.
enum WorkerOutput {
    /// One completed step: body-state pools in coordinator handle space.
    StepDone {
        /// Pose/velocity pools plus sleep state.
        pools: Vec<ComponentPool>,
        /// Entities that went to sleep this step.
        slept: Vec<Entity>,
        /// Entities that woke up this step.
        woke: Vec<Entity>,
    },
}

struct WorkerHandle {
    sender: Sender<WorkerMessage>,
    receiver: Receiver<WorkerOutput>,
    join: Option<JoinHandle<()>>,
    pending_steps: usize,
}

/// Pool of island worker threads plus the coordinator-side bookkeeping of
/// which island lives where.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    island_worker: HashMap<Entity, usize>,
    island_signature: HashMap<Entity, u64>,
    entity_worker: HashMap<Entity, usize>,
    next_worker: usize,
}

impl WorkerPool {
    /// Spawn `count` worker threads sharing the material table.
    pub fn spawn(
        count: usize,
        settings: Settings,
        material_table: Arc<RwLock<MaterialMixTable>>,
    ) -> Self {
        let count = count.max(1);
        let mut workers = Vec::with_capacity(count);
        for _ in 0..count {
            let (to_worker, from_coordinator) = unbounded::<WorkerMessage>();
            let (to_coordinator, from_worker) = unbounded::<WorkerOutput>();
            let mut worker_settings = settings;
            // Workers run their islands inline.
            worker_settings.execution_mode = ExecutionMode::Sequential;
            let table = material_table.clone();
            let join = std::thread::spawn(move || {
                worker_main(from_coordinator, to_coordinator, worker_settings, table);
            });
            workers.push(WorkerHandle {
                sender: to_worker,
                receiver: from_worker,
                join: Some(join),
                pending_steps: 0,
            });
        }
        Self {
            workers,
            island_worker: HashMap::new(),
            island_signature: HashMap::new(),
            entity_worker: HashMap::new(),
            next_worker: 0,
        }
    }

    /// Merge any completed worker output into the coordinator registry
    /// without blocking.
    pub fn drain(&mut self, state: &mut SimState) {
        for worker in &mut self.workers {
            while let Ok(output) = worker.receiver.try_recv() {
                worker.pending_steps = worker.pending_steps.saturating_sub(1);
                Self::apply_output(state, output);
            }
        }
    }

    /// Block until every outstanding step has reported back.
    pub fn drain_blocking(&mut self, state: &mut SimState) {
        for worker in &mut self.workers {
            while worker.pending_steps > 0 {
                match worker.receiver.recv() {
                    Ok(output) => {
                        worker.pending_steps -= 1;
                        Self::apply_output(state, output);
                    }
                    Err(_) => break,
                }
            }
        }
    }

    fn apply_output(state: &mut SimState, output: WorkerOutput) {
        match output {
            WorkerOutput::StepDone { pools, slept, woke } => {
                apply_pools(&mut state.registry, &pools);
                for entity in slept {
                    if state.registry.is_valid(entity) {
                        state
                            .registry
                            .sleeping_tag
                            .insert_silent(entity, crate::registry::Tag);
                    }
                }
                for entity in woke {
                    state.registry.sleeping_tag.remove(entity);
                }
            }
        }
    }

    /// Dispatch one fixed step: maintain islands on the coordinator, sync
    /// changed islands to their workers, forward user mutations, then fan
    /// out step requests.
    pub fn dispatch(&mut self, state: &mut SimState, dt: Scalar) {
        // Island maintenance runs on the coordinator thread only; the
        // coordinator broadphase exists to merge islands when their bodies
        // approach, narrowphase happens in the workers.
        state
            .coordinator
            .refresh(&mut state.registry, &state.graph, state.sim_time);
        let events = state.broadphase.update(
            &mut state.registry,
            &mut state.graph,
            &state.settings.should_collide,
        );
        for &manifold_entity in &events.created_manifolds {
            if let Some(manifold) = state.registry.manifold.get(manifold_entity).copied() {
                state
                    .coordinator
                    .on_edge_created(&mut state.registry, manifold.body);
            }
        }
        for &(_, bodies) in &events.destroyed_manifolds {
            state.coordinator.on_edge_removed(&mut state.registry, bodies);
        }
        state
            .coordinator
            .refresh(&mut state.registry, &state.graph, state.sim_time);

        // Forward application-side writes to the owning workers.
        self.forward_user_updates(state);
        if matches!(
            state.settings.network,
            crate::settings::NetworkSettings::None
        ) {
            state.registry.clear_modification_events();
        }

        // Sync islands whose composition changed since their last sync.
        let islands = IslandCoordinator::islands_in_order(&state.registry);
        let mut live: HashMap<Entity, ()> = HashMap::new();
        for island_entity in islands {
            live.insert(island_entity, ());
            self.sync_island(state, island_entity);
        }

        // Drop bookkeeping of islands that no longer exist.
        self.island_worker.retain(|island, _| live.contains_key(island));
        self.island_signature
            .retain(|island, _| live.contains_key(island));

        for worker in &mut self.workers {
            if worker.pending_steps == 0 {
                let _ = worker.sender.send(WorkerMessage::Step { dt });
                worker.pending_steps += 1;
            } else {
                // A slow island: skip this step request rather than let the
                // queue grow without bound; the island resumes next update.
                log::debug!("worker still stepping, skipping dispatch");
            }
        }
    }

    fn forward_user_updates(&mut self, state: &mut SimState) {
        let mut changed: Vec<Entity> = Vec::new();
        changed.extend(state.registry.position.take_events());
        changed.extend(state.registry.orientation.take_events());
        changed.extend(state.registry.linvel.take_events());
        changed.extend(state.registry.angvel.take_events());
        changed.extend(state.registry.linacc.take_events());
        changed.sort_unstable();
        changed.dedup();
        if changed.is_empty() {
            return;
        }

        let mut per_worker: HashMap<usize, Vec<Entity>> = HashMap::new();
        for entity in changed {
            if let Some(&worker) = self.entity_worker.get(&entity) {
                per_worker.entry(worker).or_default().push(entity);
            }
        }
        for (worker, entities) in per_worker {
            let pools = export_pools(
                &state.registry,
                entities.iter().copied(),
                &BODY_STATE_INDICES,
            );
            if !pools.is_empty() {
                let _ = self.workers[worker].sender.send(WorkerMessage::Update { pools });
            }
        }
    }

    /// Working set of an island: its members, every constraint among them,
    /// and all non-connecting bodies (copied into every touching island).
    fn island_working_set(state: &SimState, island_entity: Entity) -> Vec<Entity> {
        let mut entities = Vec::new();
        if let Some(island) = state.registry.island.get(island_entity) {
            entities.extend(island.entities.iter().copied());
        }
        let (constraints, _) =
            crate::island::collect_island_edges(&state.registry, &state.graph, island_entity);
        entities.extend(constraints);
        for &entity in state.registry.static_tag.entities() {
            entities.push(entity);
        }
        for &entity in state.registry.kinematic_tag.entities() {
            entities.push(entity);
        }
        entities.sort_unstable();
        entities.dedup();
        entities
    }

    fn sync_island(&mut self, state: &mut SimState, island_entity: Entity) {
        let entities = Self::island_working_set(state, island_entity);

        let mut hasher = DefaultHasher::new();
        entities.hash(&mut hasher);
        let signature = hasher.finish();
        let worker = match self.island_worker.get(&island_entity) {
            Some(&worker) => worker,
            None => {
                let worker = self.next_worker % self.workers.len();
                self.next_worker += 1;
                self.island_worker.insert(island_entity, worker);
                worker
            }
        };

        if self.island_signature.get(&island_entity) == Some(&signature) {
            return;
        }
        self.island_signature.insert(island_entity, signature);

        // Entities that migrated to this worker leave their old one.
        let mut removals: HashMap<usize, Vec<Entity>> = HashMap::new();
        for &entity in &entities {
            if let Some(&old) = self.entity_worker.get(&entity) {
                if old != worker && !state.registry.static_tag.contains(entity)
                    && !state.registry.kinematic_tag.contains(entity)
                {
                    removals.entry(old).or_default().push(entity);
                }
            }
            self.entity_worker.insert(entity, worker);
        }
        for (old, entities) in removals {
            let _ = self.workers[old]
                .sender
                .send(WorkerMessage::Remove { entities });
        }

        let snapshot = RegistrySnapshot {
            timestamp: state.sim_time,
            entities: entities.clone(),
            pools: export_pools(&state.registry, entities, &ALL_COMPONENT_INDICES),
        };
        let _ = self.workers[worker]
            .sender
            .send(WorkerMessage::Sync { snapshot });
    }

    /// Terminate and join all workers.
    pub fn shutdown(mut self) {
        for worker in &self.workers {
            let _ = worker.sender.send(WorkerMessage::Terminate);
        }
        for worker in &mut self.workers {
            if let Some(join) = worker.join.take() {
                let _ = join.join();
            }
        }
    }
}

/// Worker thread body: a private sequential simulation over mirrored
/// entities, driven entirely by messages.
fn worker_main(
    inbox: Receiver<WorkerMessage>,
    outbox: Sender<WorkerOutput>,
    settings: Settings,
    material_table: Arc<RwLock<MaterialMixTable>>,
) {
    let mut state = SimState::new(settings, material_table);
    // Coordinator handle -> worker handle.
    let mut map = EntityMap::new();

    while let Ok(message) = inbox.recv() {
        match message {
            WorkerMessage::Sync { mut snapshot } => {
                // Create local twins for unknown entities, then remap and
                // apply the pools.
                let mut created = Vec::new();
                for &remote in &snapshot.entities {
                    if !map.contains_remote(remote) {
                        let local = state.registry.create();
                        map.insert(remote, local);
                        created.push(local);
                    }
                }
                snapshot.map_entities(&map);
                apply_pools(&mut state.registry, &snapshot.pools);
                let locals: Vec<Entity> = snapshot.entities.clone();
                finalize_imported(&mut state.registry, &mut state.graph, &locals, false);
                state.registry.clear_modification_events();
                let _ = created;
            }
            WorkerMessage::Update { mut pools } => {
                for pool in &mut pools {
                    pool.map_entities(&map);
                }
                let touched: Vec<Entity> = pools.iter().flat_map(|p| p.entities()).collect();
                apply_pools(&mut state.registry, &pools);
                for entity in touched {
                    crate::island::wake_touching(&mut state.registry, &state.graph, entity);
                }
                state.registry.clear_modification_events();
            }
            WorkerMessage::Remove { entities } => {
                for remote in entities {
                    if let Some(local) = map.at_remote(remote) {
                        if let Some(node) = state.registry.graph_node.get(local).copied() {
                            state.graph.remove_node(node.node_index);
                        }
                        state.registry.destroy(local);
                        map.erase_remote(remote);
                    }
                }
            }
            WorkerMessage::Step { dt } => {
                let slept_before: Vec<Entity> = state.registry.sleeping_tag.entities().to_vec();
                state.step(dt);

                // Report dynamic body state back in coordinator handles.
                let dynamic: Vec<Entity> = state.registry.dynamic_tag.entities().to_vec();
                let mut pools =
                    export_pools(&state.registry, dynamic.iter().copied(), &BODY_STATE_INDICES);
                let inverse = map.inverted();
                pools.retain_mut(|pool| {
                    pool.map_entities(&inverse);
                    !pool.is_empty()
                });

                let slept_after: Vec<Entity> = state.registry.sleeping_tag.entities().to_vec();
                let to_remote = |locals: &[Entity], other: &[Entity]| -> Vec<Entity> {
                    locals
                        .iter()
                        .filter(|e| !other.contains(e))
                        .filter_map(|&e| map.at_local(e))
                        .collect()
                };
                let slept = to_remote(&slept_after, &slept_before);
                let woke = to_remote(&slept_before, &slept_after);

                let _ = outbox.send(WorkerOutput::StepDone { pools, slept, woke });
            }
            WorkerMessage::Terminate => break,
        }
    }
}
