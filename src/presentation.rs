//! Presentation State
//!
//! Computes `present_position`/`present_orientation` for rendering:
//! the simulated transform extrapolated by the residual time between the
//! last completed fixed step and the render clock, blended with the
//! accumulated discontinuity offsets so authoritative corrections fade in
//! smoothly instead of popping.

use crate::math::{integrate, Scalar};
use crate::registry::{Entity, Registry};

/// Fraction of the discontinuity offsets blended away per second.
const DISCONTINUITY_DECAY_RATE: Scalar = 4.0;

/// Refresh presentation transforms.
///
/// `sim_time` is the time of the last completed step, `time` the render
/// clock, `dt` the wall-clock delta since the previous call (drives
/// discontinuity decay).
pub fn update_presentation(registry: &mut Registry, sim_time: Scalar, time: Scalar, dt: Scalar) {
    let lead = (time - sim_time).max(0.0);
    let entities: Vec<Entity> = registry.present_position.entities().to_vec();

    for entity in entities {
        let (Some(&position), Some(&orientation)) = (
            registry.position.get(entity),
            registry.orientation.get(entity),
        ) else {
            continue;
        };
        let linvel = registry.linvel.get(entity).copied().unwrap_or_default();
        let angvel = registry.angvel.get(entity).copied().unwrap_or_default();

        let mut present_pos = position + linvel * lead;
        let mut present_orn = integrate(orientation, angvel, lead);

        if let Some(discontinuity) = registry.discontinuity.get_mut(entity) {
            present_pos += discontinuity.position_offset;
            present_orn = discontinuity.orientation_offset.mul(present_orn).normalize();
            discontinuity.decay((DISCONTINUITY_DECAY_RATE * dt).clamp(0.0, 1.0));
        }

        registry.present_position.insert_silent(entity, present_pos);
        registry
            .present_orientation
            .insert_silent(entity, present_orn);
    }
}

/// Snap presentation state to the simulated transforms, clearing any
/// pending discontinuities.
pub fn snap_presentation(registry: &mut Registry) {
    let entities: Vec<Entity> = registry.present_position.entities().to_vec();
    for entity in entities {
        if let Some(&position) = registry.position.get(entity) {
            registry.present_position.insert_silent(entity, position);
        }
        if let Some(&orientation) = registry.orientation.get(entity) {
            registry
                .present_orientation
                .insert_silent(entity, orientation);
        }
        if let Some(discontinuity) = registry.discontinuity.get_mut(entity) {
            discontinuity.decay(1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Discontinuity;
    use crate::math::{Quaternion, Vector3};
    use approx::assert_relative_eq;

    fn presented_body(registry: &mut Registry) -> Entity {
        let e = registry.create();
        registry.position.insert(e, Vector3::new(1.0, 0.0, 0.0));
        registry.orientation.insert(e, Quaternion::IDENTITY);
        registry.linvel.insert(e, Vector3::new(2.0, 0.0, 0.0));
        registry.angvel.insert(e, Vector3::ZERO);
        registry.present_position.insert(e, Vector3::ZERO);
        registry.present_orientation.insert(e, Quaternion::IDENTITY);
        registry.discontinuity.insert(e, Discontinuity::default());
        e
    }

    #[test]
    fn test_presentation_extrapolates_by_residual_time() {
        let mut registry = Registry::new();
        let e = presented_body(&mut registry);

        // Render clock is half a step ahead of the simulation.
        update_presentation(&mut registry, 1.0, 1.05, 1.0 / 60.0);
        let present = registry.present_position.get(e).unwrap();
        assert_relative_eq!(present.x, 1.0 + 2.0 * 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_discontinuity_offset_applied_and_decays() {
        let mut registry = Registry::new();
        let e = presented_body(&mut registry);
        registry.discontinuity.get_mut(e).unwrap().position_offset = Vector3::new(0.5, 0.0, 0.0);

        update_presentation(&mut registry, 1.0, 1.0, 0.0);
        let present = registry.present_position.get(e).unwrap();
        assert_relative_eq!(present.x, 1.5, epsilon = 1e-9);

        // Repeated updates with time passing blend the offset away.
        for _ in 0..240 {
            update_presentation(&mut registry, 1.0, 1.0, 1.0 / 60.0);
        }
        let offset = registry.discontinuity.get(e).unwrap().position_offset;
        assert!(offset.length() < 1e-3);
    }

    #[test]
    fn test_snap_presentation_clears_offsets() {
        let mut registry = Registry::new();
        let e = presented_body(&mut registry);
        registry.discontinuity.get_mut(e).unwrap().position_offset = Vector3::UNIT_X;

        snap_presentation(&mut registry);
        assert_relative_eq!(
            registry.present_position.get(e).unwrap().x,
            1.0,
            epsilon = 1e-12
        );
        assert!(registry
            .discontinuity
            .get(e)
            .unwrap()
            .position_offset
            .length()
            < 1e-9);
    }
}
