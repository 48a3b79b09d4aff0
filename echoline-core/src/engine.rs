//! The engine facade — one owner for every subsystem.
//!
//! [`NarrativeEngine`] wires the clock, condition tracker, trust ledger,
//! commitment tracker, companion registry, and world flags into a single
//! turn-driven state machine. Subsystems emit pending [`TrustChange`]s;
//! only the engine records them, so the ledger stays the single source of
//! truth and replays deterministically.
//!
//! Turn pipeline (fixed order, per [`NarrativeEngine::advance_turn`]):
//!
//! 1. exposure episodes tick and emit damage events
//! 2. overdue commitments expire and their penalties are recorded
//! 3. co-located companions advance their acclimation windows

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::clock::WorldClock;
use crate::commitment::{Commitment, CommitmentStatus, CommitmentTracker};
use crate::companion::{Admission, CompanionRegistry, CompanionState, ConflictRule};
use crate::condition::ConditionTracker;
use crate::config::EngineConfig;
use crate::error::{EchoError, Result};
use crate::flags::WorldFlags;
use crate::ledger::TrustLedger;
use crate::resolution::{self, EndingTier, ResolutionInput};
use crate::risk::{self, RiskAction, RiskOutcome};
use crate::types::{
    CommitmentId, CompanionId, DamageEvent, EntityId, EntityState, LocationId, TrustChange,
    TrustDelta,
};

/// Everything that happened during one call to
/// [`NarrativeEngine::advance_turn`].
#[derive(Debug, Clone, Default)]
pub struct TurnReport {
    /// Turn the world is now at.
    pub turn: u64,
    /// Damage emitted by exposure ticks, for the caller's health system.
    pub damage: Vec<DamageEvent>,
    /// Commitments that expired this advance.
    pub expired: Vec<CommitmentId>,
    /// Trust deltas recorded this advance (expiry penalties).
    pub trust_changes: Vec<TrustChange>,
    /// Companion pairs whose coexistence became permanent this advance.
    pub newly_acclimated: Vec<(CompanionId, CompanionId)>,
}

/// The narrative consequence engine. Single-threaded, turn-driven.
#[derive(Debug, Clone)]
pub struct NarrativeEngine {
    config: EngineConfig,
    clock: WorldClock,
    conditions: ConditionTracker,
    ledger: TrustLedger,
    commitments: CommitmentTracker,
    companions: CompanionRegistry,
    flags: WorldFlags,
    entity_states: BTreeMap<EntityId, EntityState>,
    fragments_collected: u32,
    player_location: LocationId,
}

impl NarrativeEngine {
    /// Fresh engine at turn zero with the player at `start_location`.
    #[must_use]
    pub fn new(config: EngineConfig, start_location: LocationId) -> Self {
        info!(start = %start_location, "Narrative engine initialized");
        Self {
            config,
            clock: WorldClock::new(),
            conditions: ConditionTracker::new(),
            ledger: TrustLedger::new(),
            commitments: CommitmentTracker::new(),
            companions: CompanionRegistry::new(),
            flags: WorldFlags::new(),
            entity_states: BTreeMap::new(),
            fragments_collected: 0,
            player_location: start_location,
        }
    }

    /// Current turn.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Where the player currently is.
    #[must_use]
    pub fn player_location(&self) -> &LocationId {
        &self.player_location
    }

    // -----------------------------------------------------------------------
    // Turn pipeline
    // -----------------------------------------------------------------------

    /// Advance the world by `n` turns and run the consequence pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::InvalidArgument`] when `n` is zero. Internal
    /// ledger writes cannot fail here: every recorded amount comes from
    /// finite config values.
    pub fn advance_turn(&mut self, n: u64) -> Result<TurnReport> {
        let turn = self.clock.advance(n)?;

        let damage = self.conditions.tick_all(n, &self.config.exposure);

        let (expired, trust_changes) =
            self.commitments
                .check_all(turn, &self.flags, &self.config.commitments)?;
        for change in &trust_changes {
            self.ledger.apply(change, turn)?;
        }

        let following = self.companions.following();
        let newly_acclimated =
            self.companions
                .tick_acclimation(&following, n, &self.config.companions);

        debug!(
            turn,
            damage = damage.len(),
            expired = expired.len(),
            "Turn advanced"
        );
        Ok(TurnReport {
            turn,
            damage,
            expired,
            trust_changes,
            newly_acclimated,
        })
    }

    // -----------------------------------------------------------------------
    // Trust
    // -----------------------------------------------------------------------

    /// Record a trust delta at the current turn and return the new value.
    ///
    /// # Errors
    /// Rejects non-finite amounts.
    pub fn record_trust(
        &mut self,
        owner: &EntityId,
        amount: f64,
        cause: impl Into<String>,
    ) -> Result<f64> {
        self.ledger
            .record_delta(owner, amount, cause, self.clock.now())
    }

    /// Current trust value for an owner; unknown owners read 0.
    #[must_use]
    pub fn trust_of(&self, owner: &EntityId) -> f64 {
        self.ledger.value_of(owner)
    }

    /// Full trust history for an owner.
    #[must_use]
    pub fn trust_history(&self, owner: &EntityId) -> &[TrustDelta] {
        self.ledger.history_of(owner)
    }

    /// Read access to the whole ledger for threshold queries.
    #[must_use]
    pub fn ledger(&self) -> &TrustLedger {
        &self.ledger
    }

    // -----------------------------------------------------------------------
    // Commitments
    // -----------------------------------------------------------------------

    /// Make a promise to a beneficiary. The deadline is
    /// `base_deadline + hope_bonus` turns from now, fixed forever.
    ///
    /// # Errors
    /// See [`CommitmentTracker::create`].
    pub fn promise(
        &mut self,
        beneficiary: EntityId,
        base_deadline: u64,
        hope_bonus: u64,
    ) -> Result<CommitmentId> {
        self.commitments
            .create(beneficiary, base_deadline, hope_bonus, self.clock.now())
    }

    /// Fulfill an active commitment and record the bonuses.
    ///
    /// # Errors
    /// See [`CommitmentTracker::fulfill`].
    pub fn fulfill(&mut self, id: CommitmentId) -> Result<Vec<TrustChange>> {
        let now = self.clock.now();
        let changes = self
            .commitments
            .fulfill(id, now, &self.config.commitments)?;
        for change in &changes {
            self.ledger.apply(change, now)?;
        }
        Ok(changes)
    }

    /// Force an expiry check on one commitment and record any penalties.
    ///
    /// # Errors
    /// See [`CommitmentTracker::check_expiry`].
    pub fn check_expiry(&mut self, id: CommitmentId) -> Result<Vec<TrustChange>> {
        let now = self.clock.now();
        let changes =
            self.commitments
                .check_expiry(id, now, &self.flags, &self.config.commitments)?;
        for change in &changes {
            self.ledger.apply(change, now)?;
        }
        Ok(changes)
    }

    /// Status of a commitment; `None` for unknown ids.
    #[must_use]
    pub fn commitment_status(&self, id: CommitmentId) -> Option<CommitmentStatus> {
        self.commitments.status_of(id)
    }

    /// Full record for a commitment.
    #[must_use]
    pub fn commitment(&self, id: CommitmentId) -> Option<&Commitment> {
        self.commitments.get(id)
    }

    // -----------------------------------------------------------------------
    // Conditions
    // -----------------------------------------------------------------------

    /// Expose an entity, beginning an episode at the default rate.
    ///
    /// # Errors
    /// Rejects negative deltas.
    pub fn apply_exposure(&mut self, entity: &EntityId, severity_delta: f32) -> Result<f32> {
        self.conditions
            .apply_exposure(entity, severity_delta, &self.config.exposure)
    }

    /// Expose an entity at the rate configured for `environment`.
    ///
    /// # Errors
    /// Rejects negative deltas.
    pub fn apply_exposure_in(
        &mut self,
        entity: &EntityId,
        severity_delta: f32,
        environment: &str,
    ) -> Result<f32> {
        self.conditions
            .apply_exposure_in(entity, severity_delta, environment, &self.config.exposure)
    }

    /// Current exposure severity; entities with no episode read 0.
    #[must_use]
    pub fn severity_of(&self, entity: &EntityId) -> f32 {
        self.conditions.severity_of(entity)
    }

    /// End an entity's exposure episode. Returns whether anything was cured.
    pub fn cure(&mut self, entity: &EntityId) -> bool {
        self.conditions.cure(entity)
    }

    // -----------------------------------------------------------------------
    // Companions
    // -----------------------------------------------------------------------

    /// Register a companion as following, with hazard-tolerance tags.
    ///
    /// # Errors
    /// See [`CompanionRegistry::register`].
    pub fn register_companion(
        &mut self,
        id: CompanionId,
        capabilities: impl IntoIterator<Item = String>,
    ) -> Result<()> {
        self.companions.register(id, capabilities)
    }

    /// Install an authored conflict rule between two companions.
    pub fn add_conflict(&mut self, rule: ConflictRule) {
        self.companions.add_conflict(rule);
    }

    /// Move the player to `to`, checking every following companion
    /// against the destination's hazard tags. Companions missing a
    /// tolerance are parked at the departure location; the player always
    /// arrives. Returns each companion's admission result.
    ///
    /// # Errors
    ///
    /// Propagates registry failures from the admission check.
    pub fn move_player(
        &mut self,
        to: LocationId,
        hazard_tags: &BTreeSet<String>,
    ) -> Result<Vec<(CompanionId, Admission)>> {
        let last_safe = self.player_location.clone();
        let mut results = Vec::new();
        for id in self.companions.following() {
            let admission = self.companions.attempt_entry(&id, hazard_tags, &last_safe)?;
            results.push((id, admission));
        }
        debug!(from = %last_safe, to = %to, "Player moved");
        self.player_location = to;
        Ok(results)
    }

    /// Park a following companion at the player's current location.
    ///
    /// # Errors
    /// See [`CompanionRegistry::dismiss`].
    pub fn dismiss_companion(&mut self, id: &CompanionId) -> Result<()> {
        let here = self.player_location.clone();
        self.companions.dismiss(id, &here)
    }

    /// Recall a companion waiting at the player's current location.
    ///
    /// # Errors
    /// See [`CompanionRegistry::recall`].
    pub fn recall_companion(&mut self, id: &CompanionId) -> Result<()> {
        let here = self.player_location.clone();
        self.companions.recall(id, &here)
    }

    /// Permanently release a companion. Terminal.
    ///
    /// # Errors
    /// See [`CompanionRegistry::release`].
    pub fn release_companion(&mut self, id: &CompanionId) -> Result<()> {
        self.companions.release(id)
    }

    /// Attempt the one-time reconciliation for a conflicting pair against
    /// the current ledger and world flags.
    ///
    /// # Errors
    /// See [`CompanionRegistry::resolve_conflict`].
    pub fn resolve_conflict(&mut self, a: &CompanionId, b: &CompanionId) -> Result<bool> {
        self.companions
            .resolve_conflict(a, b, &self.ledger, &self.flags)
    }

    /// Current state of a companion.
    ///
    /// # Errors
    /// Unknown ids error.
    pub fn companion_state(&self, id: &CompanionId) -> Result<&CompanionState> {
        self.companions.state_of(id)
    }

    /// Whether a pair's coexistence is permanent.
    #[must_use]
    pub fn is_acclimated(&self, a: &CompanionId, b: &CompanionId) -> bool {
        self.companions.is_acclimated(a, b)
    }

    // -----------------------------------------------------------------------
    // Risk
    // -----------------------------------------------------------------------

    /// Resolve a risky action with the caller's RNG, recording its trust
    /// consequences and setting its world flags.
    ///
    /// # Errors
    ///
    /// Rejects risk percentages over 100. Recorded amounts come from the
    /// action's authored deltas; non-finite amounts are rejected by the
    /// ledger before anything is written.
    pub fn resolve_risk<R: Rng + ?Sized>(
        &mut self,
        action: &RiskAction,
        rng: &mut R,
    ) -> Result<RiskOutcome> {
        let outcome = risk::resolve(action, rng)?;
        let now = self.clock.now();
        for change in &outcome.applied {
            self.ledger.apply(change, now)?;
        }
        for flag in &outcome.flags_set {
            self.flags.set(flag.clone(), true);
        }
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Flags, entity states, fragments
    // -----------------------------------------------------------------------

    /// Set a world flag.
    pub fn set_flag(&mut self, name: impl Into<String>, value: bool) {
        self.flags.set(name, value);
    }

    /// Read a world flag; unknown flags are `false`.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.flags.is_set(name)
    }

    /// Set an entity's narrative state.
    pub fn set_entity_state(&mut self, entity: EntityId, state: EntityState) {
        debug!(%entity, ?state, "Entity state changed");
        self.entity_states.insert(entity, state);
    }

    /// An entity's narrative state; unknown entities are healthy.
    #[must_use]
    pub fn entity_state(&self, entity: &EntityId) -> EntityState {
        self.entity_states.get(entity).copied().unwrap_or_default()
    }

    /// Collect one ritual fragment; returns the new count.
    pub fn collect_fragment(&mut self) -> u32 {
        self.fragments_collected += 1;
        info!(count = self.fragments_collected, "Fragment collected");
        self.fragments_collected
    }

    /// Fragments collected so far.
    #[must_use]
    pub fn fragments_collected(&self) -> u32 {
        self.fragments_collected
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Compute the ending tier for the current world state. Pure read.
    #[must_use]
    pub fn aggregate_ending(&self) -> EndingTier {
        resolution::aggregate(
            &ResolutionInput {
                echo_trust: self.ledger.value_of(&EntityId::echo()),
                fragments_collected: self.fragments_collected,
                unresolved_abandonments: self.commitments.unresolved_abandonments(),
            },
            &self.config.resolution,
        )
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Capture the full engine state for persistence.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            turn: self.clock.now(),
            conditions: self.conditions.clone(),
            ledger: self.ledger.clone(),
            commitments: self.commitments.clone(),
            companions: self.companions.clone(),
            flags: self.flags.clone(),
            entity_states: self.entity_states.clone(),
            fragments_collected: self.fragments_collected,
            player_location: self.player_location.clone(),
        }
    }

    /// Rebuild an engine from a snapshot. The restored engine is
    /// indistinguishable from the one that produced the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::Serialization`] if the snapshot's ledger
    /// violates the value-equals-sum-of-history invariant (a corrupted or
    /// hand-edited save).
    pub fn restore(snapshot: EngineSnapshot, config: EngineConfig) -> Result<Self> {
        if !snapshot.ledger.is_consistent() {
            return Err(EchoError::Serialization(
                "ledger values do not match their histories".to_string(),
            ));
        }
        info!(turn = snapshot.turn, "Engine restored from snapshot");
        Ok(Self {
            config,
            clock: WorldClock::at(snapshot.turn),
            conditions: snapshot.conditions,
            ledger: snapshot.ledger,
            commitments: snapshot.commitments,
            companions: snapshot.companions,
            flags: snapshot.flags,
            entity_states: snapshot.entity_states,
            fragments_collected: snapshot.fragments_collected,
            player_location: snapshot.player_location,
        })
    }
}

/// Serializable capture of the complete engine state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// World clock position.
    pub turn: u64,
    /// Active exposure episodes.
    pub conditions: ConditionTracker,
    /// The full trust ledger, values and histories.
    pub ledger: TrustLedger,
    /// Every commitment, active and archived.
    pub commitments: CommitmentTracker,
    /// Companions, conflicts, and acclimation progress.
    pub companions: CompanionRegistry,
    /// World flags.
    pub flags: WorldFlags,
    /// Narrative entity states.
    pub entity_states: BTreeMap<EntityId, EntityState>,
    /// Ritual fragments collected.
    pub fragments_collected: u32,
    /// Where the player stands.
    pub player_location: LocationId,
}
