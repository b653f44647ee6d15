//! Atoll Physics: Island-Partitioned Rigid-Body Engine
//!
//! A data-oriented 3D rigid-body physics engine for real-time simulation
//! of interacting bodies with contacts, constraints and networked state
//! synchronization. Entities carry composable component records in a
//! central registry; all behavior lives in systems iterating them.
//!
//! # Features
//!
//! - **Islands**: the entity graph is partitioned into independent
//!   simulation units that sleep, wake and (in asynchronous mode) run on
//!   affinity worker threads exchanging registry deltas with the
//!   coordinator
//! - **Persistent manifolds**: narrowphase candidates merge into cached
//!   contact points that carry warm-start impulses, per-feature materials
//!   and normal attachment across frames
//! - **Sequential-impulse solver**: projected Gauss-Seidel velocity
//!   iterations with a restitution pre-pass, plus a non-linear
//!   Gauss-Seidel position pass
//! - **Client/server reconciliation**: snapshot pools with stable
//!   component indices, ownership-based filtering, clock sync and
//!   extrapolation-based catch-up after delayed authoritative state
//!
//! # Example
//!
//! ```rust
//! use atoll_physics::{PhysicsWorld, RigidBodyDef, Settings, Shape, Vector3};
//!
//! let mut world = PhysicsWorld::new(Settings::default());
//!
//! let body = world
//!     .make_rigidbody(&RigidBodyDef {
//!         position: Vector3::new(0.0, 10.0, 0.0),
//!         shape: Some(Shape::Sphere { radius: 0.5 }),
//!         ..Default::default()
//!     })
//!     .unwrap();
//!
//! // Advance with a fixed timestep accumulator.
//! world.update(1.0 / 60.0);
//! assert!(world.registry().position.get(body).is_some());
//! ```
//!
//! # Modules
//!
//! - [`math`]: vectors, quaternions, 3x3 matrices, `plane_space`, `skew`
//! - [`registry`]: entity handles and sparse-set component storage
//! - [`graph`]: body/constraint adjacency defining islands
//! - [`shapes`] / [`collide`]: closed shape set and pairwise narrowphase
//! - [`broadphase`]: fat-AABB tree and manifold lifecycle
//! - [`manifold`]: persistent contact point cache
//! - [`material`]: surface materials and pair mixing
//! - [`constraint`] / [`row`] / [`solver`]: constraint kinds, solver rows
//!   and the velocity/position solver pipeline
//! - [`island`]: island partitioning, merging, splitting, sleeping
//! - [`stepper`] / [`worker`]: fixed-step orchestration, sequential and
//!   asynchronous
//! - [`rigidbody`]: body factory and mutation helpers
//! - [`presentation`]: interpolated render transforms with discontinuity
//!   blending
//! - [`packet`] / [`pool`] / [`entity_map`]: wire-neutral snapshot
//!   encoding
//! - [`client`] / [`server`] / [`extrapolation`]: networked state
//!   reconciliation
//! - [`clock_sync`] / [`input_history`]: time alignment and input replay

#![warn(missing_docs)]

pub mod broadphase;
pub mod client;
pub mod clock_sync;
pub mod collide;
pub mod components;
pub mod constraint;
pub mod entity_map;
pub mod error;
pub mod extrapolation;
pub mod graph;
pub mod input_history;
pub mod island;
pub mod manifold;
pub mod material;
pub mod math;
pub mod packet;
pub mod pool;
pub mod presentation;
pub mod registry;
pub mod rigidbody;
pub mod row;
pub mod server;
pub mod settings;
pub mod shapes;
pub mod solver;
pub mod stepper;
pub mod worker;

// Re-export commonly used types
pub use broadphase::{should_collide_default, Broadphase};
pub use client::{client_owns_entity, client_receive_packet, update_network_client, ClientContext};
pub use clock_sync::ClockSync;
pub use collide::{
    collide, CollisionContext, CollisionFeature, CollisionPoint, CollisionResult,
    ContactNormalAttachment, TriangleFeature,
};
pub use components::{
    ActionHistory, CollisionFilter, Discontinuity, EntityOwner, GraphEdge, GraphNode,
    NetworkInput,
};
pub use constraint::{
    make_constraint, Constraint, ConstraintKind, DistanceConstraint, GenericConstraint,
    HingeConstraint, PointConstraint, SoftDistanceConstraint,
};
pub use entity_map::EntityMap;
pub use error::PhysicsError;
pub use extrapolation::{ExtrapolationRequest, ExtrapolationResult, ExtrapolationWorker};
pub use graph::EntityGraph;
pub use input_history::InputHistory;
pub use island::{wake_entity, wake_island, wake_touching, Island, IslandCoordinator};
pub use manifold::{
    ContactManifold, ContactPoint, CONTACT_BREAKING_THRESHOLD, CONTACT_CACHING_THRESHOLD,
    MAX_CONTACTS,
};
pub use material::{Material, MaterialMixTable, MixedMaterial};
pub use math::{plane_space, skew, Matrix3, Quaternion, Scalar, Vector3, GRAVITY_EARTH};
pub use packet::{Packet, ServerSettingsPacket};
pub use pool::{ComponentPool, RegistrySnapshot};
pub use presentation::{snap_presentation, update_presentation};
pub use registry::{Entity, Registry};
pub use rigidbody::{
    batch_rigidbodies, clear_kinematic_velocities, make_rigidbody, rigidbody_apply_impulse,
    rigidbody_set_mass, rigidbody_update_inertia, update_kinematic_orientation,
    update_kinematic_position, validate_rigidbody, RigidBodyDef, RigidBodyKind,
};
pub use server::{
    connect_client, disconnect_client, is_fully_owned_by_client, server_receive_packet,
    update_network_server, ClientId, ServerContext,
};
pub use settings::{
    ClientNetworkSettings, ExecutionMode, NetworkSettings, ServerNetworkSettings, Settings,
};
pub use shapes::{Aabb, Shape, TriMesh, Triangle};
pub use stepper::PhysicsWorld;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collide::ContactNormalAttachment;
    pub use crate::components::{CollisionFilter, NetworkInput};
    pub use crate::constraint::{
        ConstraintKind, DistanceConstraint, HingeConstraint, PointConstraint,
        SoftDistanceConstraint,
    };
    pub use crate::error::PhysicsError;
    pub use crate::manifold::{ContactManifold, ContactPoint, MAX_CONTACTS};
    pub use crate::material::{Material, MaterialMixTable};
    pub use crate::math::{Matrix3, Quaternion, Scalar, Vector3};
    pub use crate::packet::Packet;
    pub use crate::registry::{Entity, Registry};
    pub use crate::rigidbody::{RigidBodyDef, RigidBodyKind};
    pub use crate::settings::{ExecutionMode, NetworkSettings, Settings};
    pub use crate::shapes::{Aabb, Shape};
    pub use crate::stepper::PhysicsWorld;
}

#[cfg(test)]
mod compile_smoke_tests {
    //! Verify that core types from the prelude and key modules are
    //! accessible. These tests catch accidental breakage of public
    //! re-exports.

    use super::prelude::*;

    #[test]
    fn test_prelude_types_accessible() {
        let _ = Vector3::ZERO;
        let _ = Quaternion::IDENTITY;
        let _ = Matrix3::IDENTITY;
        let _ = Settings::default();
        let _ = RigidBodyDef::default();
        let _ = Entity::null();
    }

    #[test]
    fn test_error_type_accessible() {
        let e = PhysicsError::InvalidConfiguration {
            reason: "fixed_dt must be positive",
        };
        let _ = format!("{e}");
    }

    #[test]
    fn test_world_constructible() {
        let world = PhysicsWorld::new(Settings::default());
        assert_eq!(world.registry().manifold.len(), 0);
    }
}
