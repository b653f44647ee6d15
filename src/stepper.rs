//! Simulation Stepper
//!
//! Orchestrates one fixed step: broadphase, island maintenance,
//! narrowphase and manifold merging, gravity, the constraint solver
//! pipeline, integration, contact retirement, sleep evaluation and
//! kinematic cleanup. [`PhysicsWorld`] wraps it all behind a fixed-dt
//! accumulator:
//!
//! ```text
//! accumulator += real_dt
//! while accumulator >= fixed_dt { step(fixed_dt); accumulator -= fixed_dt }
//! present_time = elapsed - accumulator
//! ```
//!
//! In sequential mode islands are stepped on the calling thread in
//! deterministic order (by island entity handle). In asynchronous mode the
//! same per-island pipeline runs on worker threads and [`PhysicsWorld::update`]
//! drains their results without blocking on any single island.

use crate::broadphase::Broadphase;
use crate::collide::{collide, CollisionContext, CollisionResult};
use crate::constraint::{destroy_constraint, make_constraint, ConstraintKind};
use crate::error::PhysicsError;
use crate::graph::EntityGraph;
use crate::island::{collect_island_edges, IslandCoordinator};
use crate::manifold::{
    merge_collision_result, retire_contact_points, update_contact_distances,
    CONTACT_BREAKING_THRESHOLD,
};
use crate::material::MaterialMixTable;
use crate::math::{integrate, rotate_inertia_inv, Scalar, Vector3};
use crate::registry::{Entity, Registry};
use crate::rigidbody::{
    batch_rigidbodies, clear_kinematic_velocities, make_rigidbody, RigidBodyDef,
};
use crate::row::SolverBodies;
use crate::settings::{ExecutionMode, Settings};
use crate::solver;
use crate::worker::WorkerPool;
use parking_lot::RwLock;
use std::sync::Arc;

/// Separation distance used by narrowphase when gathering candidates, so
/// points appear slightly before contact and survive small gaps.
const COLLISION_THRESHOLD: Scalar = CONTACT_BREAKING_THRESHOLD * 2.0;

/// Everything one simulation thread owns: the registry and the systems
/// that iterate it. Both the main world and each island worker hold one.
pub(crate) struct SimState {
    /// Component store.
    pub registry: Registry,
    /// Body/constraint adjacency.
    pub graph: EntityGraph,
    /// Spatial index and pair bookkeeping.
    pub broadphase: Broadphase,
    /// Island partition and sleep state.
    pub coordinator: IslandCoordinator,
    /// Shared read-mostly material pair table.
    pub material_table: Arc<RwLock<MaterialMixTable>>,
    /// World configuration.
    pub settings: Settings,
    /// Simulation time, advanced by `fixed_dt` per step.
    pub sim_time: Scalar,
}

impl SimState {
    pub(crate) fn new(settings: Settings, material_table: Arc<RwLock<MaterialMixTable>>) -> Self {
        Self {
            registry: Registry::new(),
            graph: EntityGraph::new(),
            broadphase: Broadphase::new(),
            coordinator: IslandCoordinator::new(),
            material_table,
            settings,
            sim_time: 0.0,
        }
    }

    /// Run one fixed step over every island in this state.
    pub(crate) fn step(&mut self, dt: Scalar) {
        if let Some(callback) = self.settings.pre_step_callback {
            callback(&mut self.registry, dt);
        }

        // Islands must reflect current connectivity before dispatch.
        self.coordinator.refresh(&mut self.registry, &self.graph, self.sim_time);

        // Broadphase: AABB refresh, pair events, manifold lifecycle.
        let events =
            self.broadphase
                .update(&mut self.registry, &mut self.graph, &self.settings.should_collide);
        for &manifold_entity in &events.created_manifolds {
            if let Some(manifold) = self.registry.manifold.get(manifold_entity).copied() {
                self.coordinator.on_edge_created(&mut self.registry, manifold.body);
            }
        }
        for &(_, bodies) in &events.destroyed_manifolds {
            self.coordinator.on_edge_removed(&mut self.registry, bodies);
        }
        self.coordinator.refresh(&mut self.registry, &self.graph, self.sim_time);

        // Narrowphase and manifold merge.
        self.run_narrowphase();

        // Persistent accelerations (gravity lives in `linacc`).
        let dynamic: Vec<Entity> = self.registry.dynamic_tag.entities().to_vec();
        for entity in &dynamic {
            let entity = *entity;
            if self.registry.is_sleeping(entity) || self.registry.disabled_tag.contains(entity) {
                continue;
            }
            if let Some(&acc) = self.registry.linacc.get(entity) {
                if let Some(linvel) = self.registry.linvel.get_mut(entity) {
                    *linvel += acc * dt;
                }
            }
        }

        // Velocity solve per island, deterministic order.
        let islands = IslandCoordinator::islands_in_order(&self.registry);
        let mut island_edges = Vec::with_capacity(islands.len());
        for &island_entity in &islands {
            if self.registry.sleeping_tag.contains(island_entity) {
                island_edges.push(None);
                continue;
            }
            let edges = collect_island_edges(&self.registry, &self.graph, island_entity);
            island_edges.push(Some(edges));
        }

        for (island_idx, island_entity) in islands.iter().enumerate() {
            let Some((constraints, manifolds)) = &island_edges[island_idx] else {
                continue;
            };
            // Restitution runs on transient rows first; the main rows are
            // then prepared against the post-bounce velocities.
            solver::solve_restitution(
                &mut self.registry,
                manifolds,
                self.settings.num_restitution_iterations,
                self.settings.num_individual_restitution_iterations,
            );
            let mut bodies = SolverBodies::default();
            let mut rows = solver::prepare_rows(
                &mut self.registry,
                &mut bodies,
                constraints,
                manifolds,
                dt,
            );
            solver::warm_start(&rows, &mut bodies);
            solver::solve_velocity(
                &mut rows,
                &mut bodies,
                self.settings.num_solver_velocity_iterations,
            );
            bodies.store(&mut self.registry);
            solver::store_impulses(&mut self.registry, &rows);

            if let Some(island) = self.registry.island.get_mut(*island_entity) {
                island.timestamp = self.sim_time;
            }
        }

        // Integrate.
        for entity in &dynamic {
            let entity = *entity;
            if self.registry.is_sleeping(entity) || self.registry.disabled_tag.contains(entity) {
                continue;
            }
            let linvel = self.registry.linvel.get(entity).copied().unwrap_or_default();
            let angvel = self.registry.angvel.get(entity).copied().unwrap_or_default();
            if let Some(position) = self.registry.position.get_mut(entity) {
                *position += linvel * dt;
            }
            if let Some(&orn) = self.registry.orientation.get(entity) {
                let new_orn = integrate(orn, angvel, dt);
                self.registry.orientation.insert_silent(entity, new_orn);
                if let Some(&inertia_inv) = self.registry.inertia_inv.get(entity) {
                    self.registry
                        .inertia_world_inv
                        .insert_silent(entity, rotate_inertia_inv(&inertia_inv, new_orn));
                }
            }
        }
        // Kinematic bodies integrate too (their velocities are derived from
        // teleport targets).
        let kinematic: Vec<Entity> = self.registry.kinematic_tag.entities().to_vec();
        for entity in kinematic {
            let linvel = self.registry.linvel.get(entity).copied().unwrap_or_default();
            let angvel = self.registry.angvel.get(entity).copied().unwrap_or_default();
            if linvel != Vector3::ZERO {
                if let Some(position) = self.registry.position.get_mut(entity) {
                    *position += linvel * dt;
                }
            }
            if angvel != Vector3::ZERO {
                if let Some(&orn) = self.registry.orientation.get(entity) {
                    self.registry
                        .orientation
                        .insert_silent(entity, integrate(orn, angvel, dt));
                }
            }
        }

        // Position solve per island.
        for (island_idx, _) in islands.iter().enumerate() {
            let Some((constraints, manifolds)) = &island_edges[island_idx] else {
                continue;
            };
            solver::solve_position(
                &mut self.registry,
                constraints,
                manifolds,
                self.settings.num_solver_position_iterations,
            );
        }

        // Contact retirement.
        update_contact_distances(&mut self.registry);
        let manifold_entities: Vec<Entity> = self.registry.manifold.entities().to_vec();
        for manifold_entity in manifold_entities {
            retire_contact_points(&mut self.registry, manifold_entity);
        }

        // Sleep bookkeeping and kinematic velocity reset.
        self.coordinator.evaluate_sleep(&mut self.registry, dt);
        clear_kinematic_velocities(&mut self.registry);

        if let Some(callback) = self.settings.post_step_callback {
            callback(&mut self.registry, dt);
        }

        // Without a network exporter draining them, write-event logs would
        // only grow.
        if matches!(self.settings.network, crate::settings::NetworkSettings::None) {
            self.registry.clear_modification_events();
        }
        self.sim_time += dt;
    }

    fn run_narrowphase(&mut self) {
        let manifold_entities: Vec<Entity> = self.registry.manifold.entities().to_vec();
        let threshold_inset = Vector3::splat(-CONTACT_BREAKING_THRESHOLD);

        for manifold_entity in manifold_entities {
            let Some(manifold) = self.registry.manifold.get(manifold_entity).copied() else {
                continue;
            };
            let [body_a, body_b] = manifold.body;
            if self.registry.is_sleeping(body_a) && self.registry.is_sleeping(body_b) {
                continue;
            }
            let (Some(&aabb_a), Some(&aabb_b)) = (
                self.registry.aabb.get(body_a),
                self.registry.aabb.get(body_b),
            ) else {
                continue;
            };
            // Points only need recomputing while the insetted boxes overlap;
            // otherwise the retirement pass will clean up what remains.
            if !aabb_a.inset(threshold_inset).intersects(&aabb_b) {
                continue;
            }
            let (Some(shape_a), Some(shape_b)) = (
                self.registry.shape.get(body_a),
                self.registry.shape.get(body_b),
            ) else {
                continue;
            };
            let (Some(&orn_a), Some(&orn_b)) = (
                self.registry.orientation.get(body_a),
                self.registry.orientation.get(body_b),
            ) else {
                continue;
            };

            let ctx = CollisionContext {
                origin_a: self.registry.body_origin(body_a),
                orn_a,
                aabb_a,
                origin_b: self.registry.body_origin(body_b),
                orn_b,
                aabb_b,
                threshold: COLLISION_THRESHOLD,
            };
            let result: CollisionResult = collide(shape_a, shape_b, &ctx);
            let table = self.material_table.clone();
            let table = table.read();
            merge_collision_result(&mut self.registry, &table, manifold_entity, &result);
        }
    }
}

/// The physics world: a registry plus every system that runs over it,
/// stepped on a fixed timestep with a residual accumulator.
pub struct PhysicsWorld {
    pub(crate) state: SimState,
    accumulator: Scalar,
    elapsed: Scalar,
    present_time: Scalar,
    workers: Option<WorkerPool>,
}

impl PhysicsWorld {
    /// Create a world with the given settings.
    pub fn new(settings: Settings) -> Self {
        let material_table = Arc::new(RwLock::new(MaterialMixTable::new()));
        let workers = match settings.execution_mode {
            ExecutionMode::Sequential => None,
            ExecutionMode::Asynchronous => Some(WorkerPool::spawn(
                settings.num_worker_threads,
                settings,
                material_table.clone(),
            )),
        };
        Self {
            state: SimState::new(settings, material_table),
            accumulator: 0.0,
            elapsed: 0.0,
            present_time: 0.0,
            workers,
        }
    }

    /// The component registry.
    pub fn registry(&self) -> &Registry {
        &self.state.registry
    }

    /// Mutable access to the component registry.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.state.registry
    }

    /// The entity graph.
    pub fn graph(&self) -> &EntityGraph {
        &self.state.graph
    }

    /// World settings.
    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }

    /// Mutable world settings.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.state.settings
    }

    /// Shared material mix table.
    pub fn material_table(&self) -> &Arc<RwLock<MaterialMixTable>> {
        &self.state.material_table
    }

    /// Simulation time advanced so far.
    pub fn sim_time(&self) -> Scalar {
        self.state.sim_time
    }

    /// Time the presentation systems should display.
    pub fn present_time(&self) -> Scalar {
        self.present_time
    }

    /// Advance by wall-clock `real_dt`, running as many fixed steps as the
    /// accumulator allows.
    pub fn update(&mut self, real_dt: Scalar) {
        self.elapsed += real_dt;
        if self.state.settings.paused {
            self.present_time = self.elapsed - self.accumulator;
            return;
        }
        self.accumulator += real_dt;
        let fixed_dt = self.state.settings.fixed_dt;

        match self.state.settings.execution_mode {
            ExecutionMode::Sequential => {
                while self.accumulator >= fixed_dt {
                    self.state.step(fixed_dt);
                    self.accumulator -= fixed_dt;
                }
            }
            ExecutionMode::Asynchronous => {
                let workers = self.workers.as_mut().expect("async mode has workers");
                // Drain completed island steps without blocking, then
                // dispatch the next batch.
                workers.drain(&mut self.state);
                while self.accumulator >= fixed_dt {
                    workers.dispatch(&mut self.state, fixed_dt);
                    self.state.sim_time += fixed_dt;
                    self.accumulator -= fixed_dt;
                }
            }
        }
        self.present_time = self.elapsed - self.accumulator;
    }

    /// Run exactly one fixed step, regardless of the accumulator.
    pub fn step(&mut self) {
        let fixed_dt = self.state.settings.fixed_dt;
        match self.state.settings.execution_mode {
            ExecutionMode::Sequential => self.state.step(fixed_dt),
            ExecutionMode::Asynchronous => {
                let workers = self.workers.as_mut().expect("async mode has workers");
                workers.dispatch(&mut self.state, fixed_dt);
                workers.drain_blocking(&mut self.state);
                self.state.sim_time += fixed_dt;
            }
        }
    }

    /// Create a rigid body.
    pub fn make_rigidbody(&mut self, def: &RigidBodyDef) -> Result<Entity, PhysicsError> {
        let mut def = def.clone();
        if def.gravity.is_none() {
            def.gravity = Some(self.state.settings.gravity);
        }
        make_rigidbody(&mut self.state.registry, &mut self.state.graph, &def)
    }

    /// Create several bodies sharing one initial island.
    pub fn batch_rigidbodies(
        &mut self,
        defs: &[RigidBodyDef],
    ) -> Result<Vec<Entity>, PhysicsError> {
        let mut defs = defs.to_vec();
        for def in &mut defs {
            if def.gravity.is_none() {
                def.gravity = Some(self.state.settings.gravity);
            }
        }
        batch_rigidbodies(&mut self.state.registry, &mut self.state.graph, &defs)
    }

    /// Add a constraint between two bodies, merging their islands.
    pub fn add_constraint(
        &mut self,
        body_a: Entity,
        body_b: Entity,
        kind: ConstraintKind,
    ) -> Entity {
        let entity = make_constraint(
            &mut self.state.registry,
            &mut self.state.graph,
            body_a,
            body_b,
            kind,
        );
        self.state
            .coordinator
            .on_edge_created(&mut self.state.registry, [body_a, body_b]);
        entity
    }

    /// Remove a constraint, marking its island for split detection.
    pub fn remove_constraint(&mut self, entity: Entity) {
        let Some(con) = self.state.registry.constraint.get(entity).copied() else {
            return;
        };
        destroy_constraint(&mut self.state.registry, &mut self.state.graph, entity);
        self.state
            .coordinator
            .on_edge_removed(&mut self.state.registry, con.body);
    }

    /// Wake the islands touching an entity.
    pub fn wake(&mut self, entity: Entity) {
        crate::island::wake_touching(&mut self.state.registry, &self.state.graph, entity);
    }
}

impl Drop for PhysicsWorld {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown();
        }
    }
}
