//! Condition Tracker — per-entity scalar afflictions.
//!
//! Environmental contamination (spore exposure, miasma, rot) accumulates
//! as a severity scalar per entity. Severity grows by a per-environment
//! rate each elapsed turn and, once past the damage threshold, each tick
//! *emits* a [`DamageEvent`] proportional to the overshoot. The engine
//! never applies damage itself; the health subsystem outside the core
//! owns the consequence.
//!
//! Severity is monotonically non-decreasing between cures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::ExposureConfig;
use crate::error::{EchoError, Result};
use crate::types::{DamageEvent, EntityId};

/// One entity's ongoing exposure episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureState {
    /// Accumulated severity, clamped at the configured ceiling.
    pub severity: f32,
    /// Severity gained per elapsed turn for this episode.
    pub rate_per_turn: f32,
}

/// Tracks severity scalars for every entity under exposure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionTracker {
    states: BTreeMap<EntityId, ExposureState>,
}

impl ConditionTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add severity to an entity, beginning an episode at the default
    /// environment rate if none is active. Returns the new severity.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::InvalidArgument`] for negative deltas:
    /// severity only ever decreases through [`Self::cure`].
    pub fn apply_exposure(
        &mut self,
        entity: &EntityId,
        severity_delta: f32,
        config: &ExposureConfig,
    ) -> Result<f32> {
        self.apply_exposure_at_rate(entity, severity_delta, config.rate_per_turn, config)
    }

    /// Like [`Self::apply_exposure`] but ticks at the rate configured for
    /// `environment` (falling back to the default rate when the tag has
    /// no override).
    ///
    /// # Errors
    /// Same as [`Self::apply_exposure`].
    pub fn apply_exposure_in(
        &mut self,
        entity: &EntityId,
        severity_delta: f32,
        environment: &str,
        config: &ExposureConfig,
    ) -> Result<f32> {
        let rate = config
            .environment_rates
            .get(environment)
            .copied()
            .unwrap_or(config.rate_per_turn);
        self.apply_exposure_at_rate(entity, severity_delta, rate, config)
    }

    fn apply_exposure_at_rate(
        &mut self,
        entity: &EntityId,
        severity_delta: f32,
        rate: f32,
        config: &ExposureConfig,
    ) -> Result<f32> {
        if severity_delta < 0.0 {
            return Err(EchoError::InvalidArgument(format!(
                "exposure delta must be non-negative, got {severity_delta}"
            )));
        }
        let state = self.states.entry(entity.clone()).or_insert(ExposureState {
            severity: 0.0,
            rate_per_turn: rate,
        });
        state.severity = (state.severity + severity_delta).min(config.severity_ceiling);
        debug!(%entity, severity = state.severity, "Exposure applied");
        Ok(state.severity)
    }

    /// Advance one entity's exposure by `elapsed_turns`.
    ///
    /// Emits a [`DamageEvent`] of `floor((severity − threshold) × rate)`
    /// once severity exceeds the damage threshold; exactly at the
    /// threshold the damage is zero and nothing is emitted.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::UnknownEntity`] when the entity has no
    /// exposure episode.
    pub fn tick(
        &mut self,
        entity: &EntityId,
        elapsed_turns: u64,
        config: &ExposureConfig,
    ) -> Result<Option<DamageEvent>> {
        let state = self
            .states
            .get_mut(entity)
            .ok_or_else(|| EchoError::UnknownEntity(entity.clone()))?;

        state.severity = (state.severity + state.rate_per_turn * elapsed_turns as f32)
            .min(config.severity_ceiling);

        Ok(Self::damage_for(entity, state.severity, config))
    }

    /// Advance every active exposure episode (the engine's turn pipeline).
    pub fn tick_all(&mut self, elapsed_turns: u64, config: &ExposureConfig) -> Vec<DamageEvent> {
        let mut events = Vec::new();
        for (entity, state) in &mut self.states {
            state.severity = (state.severity + state.rate_per_turn * elapsed_turns as f32)
                .min(config.severity_ceiling);
            if let Some(event) = Self::damage_for(entity, state.severity, config) {
                events.push(event);
            }
        }
        events
    }

    fn damage_for(entity: &EntityId, severity: f32, config: &ExposureConfig) -> Option<DamageEvent> {
        if severity <= config.damage_threshold {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let amount = ((severity - config.damage_threshold) * config.damage_rate).floor() as u32;
        if amount == 0 {
            return None;
        }
        Some(DamageEvent {
            entity: entity.clone(),
            amount,
            severity,
        })
    }

    /// Current severity; entities with no episode read 0.
    #[must_use]
    pub fn severity_of(&self, entity: &EntityId) -> f32 {
        self.states.get(entity).map_or(0.0, |s| s.severity)
    }

    /// Reset an entity's severity to zero, ending the exposure episode
    /// and cancelling pending damage. Returns `true` if anything was
    /// actually cured; curing at zero severity is a no-op.
    pub fn cure(&mut self, entity: &EntityId) -> bool {
        match self.states.remove(entity) {
            Some(state) if state.severity > 0.0 => {
                debug!(%entity, "Exposure cured");
                true
            }
            _ => false,
        }
    }

    /// Entities currently under exposure.
    pub fn exposed(&self) -> impl Iterator<Item = &EntityId> {
        self.states.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExposureConfig {
        ExposureConfig::default() // rate 5/turn, threshold 20, damage rate 1
    }

    #[test]
    fn severity_at_threshold_emits_no_damage() {
        let cfg = config();
        let mut tracker = ConditionTracker::new();
        let hero = EntityId::new("hero");
        tracker.apply_exposure(&hero, 0.0, &cfg).expect("begin");

        // 4 turns at 5/turn reaches exactly the threshold of 20.
        for _ in 0..4 {
            let damage = tracker.tick(&hero, 1, &cfg).expect("tick");
            assert!(damage.is_none(), "no damage at or under the threshold");
        }
        assert!((tracker.severity_of(&hero) - 20.0).abs() < f32::EPSILON);

        // The next tick is over the threshold: (25 - 20) * 1 = 5 damage.
        let damage = tracker.tick(&hero, 1, &cfg).expect("tick").expect("damage");
        assert_eq!(damage.amount, 5);
    }

    #[test]
    fn severity_clamps_at_ceiling() {
        let cfg = config();
        let mut tracker = ConditionTracker::new();
        let hero = EntityId::new("hero");
        tracker.apply_exposure(&hero, 500.0, &cfg).expect("apply");
        assert!((tracker.severity_of(&hero) - cfg.severity_ceiling).abs() < f32::EPSILON);
    }

    #[test]
    fn cure_resets_and_is_noop_at_zero() {
        let cfg = config();
        let mut tracker = ConditionTracker::new();
        let hero = EntityId::new("hero");

        tracker.apply_exposure(&hero, 30.0, &cfg).expect("apply");
        assert!(tracker.cure(&hero));
        assert!((tracker.severity_of(&hero)).abs() < f32::EPSILON);
        assert!(!tracker.cure(&hero), "second cure on zero severity is a no-op");
    }

    #[test]
    fn negative_delta_rejected() {
        let cfg = config();
        let mut tracker = ConditionTracker::new();
        let err = tracker
            .apply_exposure(&EntityId::new("hero"), -1.0, &cfg)
            .expect_err("must reject");
        assert!(matches!(err, EchoError::InvalidArgument(_)));
    }

    #[test]
    fn environment_rate_override() {
        let mut cfg = config();
        cfg.environment_rates.insert("spore-depths".to_string(), 10.0);

        let mut tracker = ConditionTracker::new();
        let hero = EntityId::new("hero");
        tracker
            .apply_exposure_in(&hero, 0.0, "spore-depths", &cfg)
            .expect("begin");
        tracker.tick(&hero, 2, &cfg).expect("tick");
        assert!((tracker.severity_of(&hero) - 20.0).abs() < f32::EPSILON);
    }

    #[test]
    fn tick_unknown_entity_errors() {
        let cfg = config();
        let mut tracker = ConditionTracker::new();
        let err = tracker
            .tick(&EntityId::new("ghost"), 1, &cfg)
            .expect_err("must reject");
        assert!(matches!(err, EchoError::UnknownEntity(_)));
    }
}
