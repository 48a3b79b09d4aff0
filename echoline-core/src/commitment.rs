//! Commitment Tracker — time-bound promises with partial credit.
//!
//! A commitment is a promise to a beneficiary with a deadline measured in
//! turns, fixed at creation (base + hope bonus, never recomputed). It
//! transitions status exactly once: `Active → Fulfilled` or
//! `Active → Abandoned`, both terminal. Resolved commitments are archived
//! read-only so later expiries can evaluate partial-credit rules against
//! what was fulfilled during their window.
//!
//! Expiry is checked by the caller (`check_expiry`) rather than by an
//! internal timer: the engine stays single-threaded and the caller decides
//! when to re-evaluate, matching the turn-driven model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::CommitmentConfig;
use crate::error::{EchoError, Result};
use crate::flags::WorldFlags;
use crate::types::{CommitmentId, EntityId, TrustChange};

/// Lifecycle status of a commitment. Terminal states absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentStatus {
    /// Open promise, deadline running.
    Active,
    /// Kept in time. Terminal.
    Fulfilled,
    /// Expired unkept. Terminal.
    Abandoned,
}

impl CommitmentStatus {
    /// Whether this status permits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Fulfilled | Self::Abandoned)
    }
}

/// A promise made to a beneficiary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    /// Tracker-sequential identifier.
    pub id: CommitmentId,
    /// Who the promise was made to.
    pub beneficiary: EntityId,
    /// Turn the promise was made.
    pub created_at_turn: u64,
    /// Base deadline + hope bonus, immutable after creation.
    pub deadline_turns: u64,
    /// Current lifecycle status.
    pub status: CommitmentStatus,
    /// Turn the commitment reached a terminal status, if it has.
    pub resolved_at_turn: Option<u64>,
}

impl Commitment {
    /// Whether the deadline has passed as of `current_turn`.
    #[must_use]
    pub fn is_expired_at(&self, current_turn: u64) -> bool {
        current_turn.saturating_sub(self.created_at_turn) >= self.deadline_turns
    }
}

/// A mitigating condition evaluated at abandonment time.
///
/// Rules are plain data so they live in config and survive snapshots.
/// A rule matches when its required world flag (if any) is set and at
/// least `min_fulfilled_in_window` other commitments were fulfilled
/// between the expiring commitment's creation and its expiry. Matching
/// rules grant their multiplier; the smallest matching multiplier wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialCreditRule {
    /// Stable identifier for authoring and logs.
    pub id: String,
    /// World flag that must be set for the rule to apply.
    #[serde(default)]
    pub requires_flag: Option<String>,
    /// Minimum count of commitments fulfilled inside the window.
    #[serde(default)]
    pub min_fulfilled_in_window: u32,
    /// Penalty multiplier in (0, 1]; 0.5 halves the penalty.
    pub multiplier: f64,
}

/// Tracks every commitment ever made, active and archived.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitmentTracker {
    commitments: BTreeMap<CommitmentId, Commitment>,
    next_id: u64,
}

impl CommitmentTracker {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new promise.
    ///
    /// The deadline is `base_deadline + hope_bonus`, fixed forever.
    ///
    /// # Errors
    ///
    /// - [`EchoError::InvalidArgument`] when `base_deadline` is zero.
    /// - [`EchoError::DuplicateCommitment`] when the beneficiary already
    ///   has an active commitment; it must fulfill or expire first.
    pub fn create(
        &mut self,
        beneficiary: EntityId,
        base_deadline: u64,
        hope_bonus: u64,
        now: u64,
    ) -> Result<CommitmentId> {
        if base_deadline == 0 {
            return Err(EchoError::InvalidArgument(
                "commitment base deadline must be positive".to_string(),
            ));
        }
        if self
            .commitments
            .values()
            .any(|c| c.status == CommitmentStatus::Active && c.beneficiary == beneficiary)
        {
            return Err(EchoError::DuplicateCommitment { beneficiary });
        }

        let id = CommitmentId(self.next_id);
        self.next_id += 1;
        let deadline_turns = base_deadline + hope_bonus;
        debug!(%id, %beneficiary, deadline_turns, now, "Commitment created");
        self.commitments.insert(
            id,
            Commitment {
                id,
                beneficiary,
                created_at_turn: now,
                deadline_turns,
                status: CommitmentStatus::Active,
                resolved_at_turn: None,
            },
        );
        Ok(id)
    }

    /// Fulfill an active commitment.
    ///
    /// Returns the positive trust changes to record: base + fulfillment
    /// bonus on the beneficiary, and the smaller fixed bonus on the Echo.
    ///
    /// # Errors
    ///
    /// - [`EchoError::UnknownCommitment`] for unknown ids.
    /// - [`EchoError::InvalidTransition`] when the commitment is terminal.
    pub fn fulfill(
        &mut self,
        id: CommitmentId,
        now: u64,
        config: &CommitmentConfig,
    ) -> Result<Vec<TrustChange>> {
        let commitment = self
            .commitments
            .get_mut(&id)
            .ok_or(EchoError::UnknownCommitment(id))?;
        if commitment.status.is_terminal() {
            return Err(EchoError::InvalidTransition {
                reason: format!("{id} is already {:?}", commitment.status),
            });
        }

        commitment.status = CommitmentStatus::Fulfilled;
        commitment.resolved_at_turn = Some(now);
        debug!(%id, beneficiary = %commitment.beneficiary, now, "Commitment fulfilled");

        Ok(vec![
            TrustChange::new(
                commitment.beneficiary.clone(),
                config.base_bonus + config.fulfillment_bonus,
                format!("fulfilled-{id}"),
            ),
            TrustChange::new(EntityId::echo(), config.echo_bonus, format!("fulfilled-{id}")),
        ])
    }

    /// Expire an active commitment whose deadline has passed.
    ///
    /// Computes the penalty: base penalty × the partial-credit multiplier
    /// for the current world-flag snapshot and the commitments fulfilled
    /// during this commitment's window. Idempotent: calling again after
    /// abandonment (or on a fulfilled commitment, or before the deadline)
    /// returns no deltas.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::UnknownCommitment`] for unknown ids.
    pub fn check_expiry(
        &mut self,
        id: CommitmentId,
        current_turn: u64,
        flags: &WorldFlags,
        config: &CommitmentConfig,
    ) -> Result<Vec<TrustChange>> {
        let commitment = self
            .commitments
            .get(&id)
            .ok_or(EchoError::UnknownCommitment(id))?;

        if commitment.status != CommitmentStatus::Active
            || !commitment.is_expired_at(current_turn)
        {
            return Ok(Vec::new());
        }

        let window_start = commitment.created_at_turn;
        let beneficiary = commitment.beneficiary.clone();
        let fulfilled_in_window = self.fulfilled_in_window(window_start, current_turn);
        let multiplier =
            partial_credit_multiplier(&config.partial_credit, flags, fulfilled_in_window);

        let commitment = self
            .commitments
            .get_mut(&id)
            .ok_or(EchoError::UnknownCommitment(id))?;
        commitment.status = CommitmentStatus::Abandoned;
        commitment.resolved_at_turn = Some(current_turn);
        debug!(%id, %beneficiary, current_turn, multiplier, "Commitment abandoned");

        Ok(vec![
            TrustChange::new(
                beneficiary,
                -(config.base_penalty * multiplier),
                format!("abandoned-{id}"),
            ),
            TrustChange::new(
                EntityId::echo(),
                -(config.echo_penalty * multiplier),
                format!("abandoned-{id}"),
            ),
        ])
    }

    /// Expire every overdue active commitment (the engine's turn pipeline).
    ///
    /// Returns the ids that expired and the penalty deltas to record.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::UnknownCommitment`] if a due id vanishes
    /// between collection and expiry.
    pub fn check_all(
        &mut self,
        current_turn: u64,
        flags: &WorldFlags,
        config: &CommitmentConfig,
    ) -> Result<(Vec<CommitmentId>, Vec<TrustChange>)> {
        let due: Vec<CommitmentId> = self
            .commitments
            .values()
            .filter(|c| c.status == CommitmentStatus::Active && c.is_expired_at(current_turn))
            .map(|c| c.id)
            .collect();

        let mut changes = Vec::new();
        for id in &due {
            let mut deltas = self.check_expiry(*id, current_turn, flags, config)?;
            changes.append(&mut deltas);
        }
        Ok((due, changes))
    }

    /// Count of commitments fulfilled with a resolution turn inside
    /// `[window_start, window_end]`.
    #[must_use]
    pub fn fulfilled_in_window(&self, window_start: u64, window_end: u64) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let count = self
            .commitments
            .values()
            .filter(|c| c.status == CommitmentStatus::Fulfilled)
            .filter(|c| {
                c.resolved_at_turn
                    .is_some_and(|t| t >= window_start && t <= window_end)
            })
            .count() as u32;
        count
    }

    /// Status query; `None` for unknown ids.
    #[must_use]
    pub fn status_of(&self, id: CommitmentId) -> Option<CommitmentStatus> {
        self.commitments.get(&id).map(|c| c.status)
    }

    /// Full record for a commitment.
    #[must_use]
    pub fn get(&self, id: CommitmentId) -> Option<&Commitment> {
        self.commitments.get(&id)
    }

    /// The beneficiary's active commitment, if any.
    #[must_use]
    pub fn active_for(&self, beneficiary: &EntityId) -> Option<&Commitment> {
        self.commitments
            .values()
            .find(|c| c.status == CommitmentStatus::Active && &c.beneficiary == beneficiary)
    }

    /// How many commitments ended abandoned.
    #[must_use]
    pub fn unresolved_abandonments(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        let count = self
            .commitments
            .values()
            .filter(|c| c.status == CommitmentStatus::Abandoned)
            .count() as u32;
        count
    }

    /// All commitments, active and archived.
    pub fn iter(&self) -> impl Iterator<Item = &Commitment> {
        self.commitments.values()
    }
}

/// Evaluate partial-credit rules against the world-flag snapshot and the
/// fulfilled-in-window count. The smallest matching multiplier wins;
/// no match means full penalty (1.0). Multipliers are clamped into (0, 1].
#[must_use]
pub fn partial_credit_multiplier(
    rules: &[PartialCreditRule],
    flags: &WorldFlags,
    fulfilled_in_window: u32,
) -> f64 {
    rules
        .iter()
        .filter(|rule| {
            rule.requires_flag
                .as_deref()
                .is_none_or(|flag| flags.is_set(flag))
                && fulfilled_in_window >= rule.min_fulfilled_in_window
        })
        .map(|rule| rule.multiplier.clamp(f64::MIN_POSITIVE, 1.0))
        .fold(1.0, f64::min)
}
