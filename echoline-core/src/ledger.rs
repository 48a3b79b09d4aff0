//! Trust Ledger — append-only per-owner relationship values.
//!
//! Every relationship scalar in the story (per-NPC trust, the Echo's
//! meta-trust, town reputation) is an account here: a current value plus
//! the full ordered history of signed deltas that produced it. Replaying
//! the same delta sequence from an empty ledger always reproduces the
//! same values and history, which is what makes save/resume and testing
//! possible. No operation ever mutates a past entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{EchoError, Result};
use crate::types::{EntityId, ThresholdDirection, TrustChange, TrustDelta};

/// One owner's trust value and its full provenance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustAccount {
    /// Current value; always the sum of `history` amounts.
    pub value: f64,
    /// Ordered history of signed deltas with cause tags.
    pub history: Vec<TrustDelta>,
}

/// The ledger: named scalar relationship values with threshold queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustLedger {
    accounts: BTreeMap<EntityId, TrustAccount>,
}

impl TrustLedger {
    /// Empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta to an owner's history and return the new value.
    ///
    /// Unknown owners get an account created on first write.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::InvalidArgument`] for non-finite amounts;
    /// admitting NaN would break the total ordering the ending-tier
    /// aggregator relies on.
    pub fn record_delta(
        &mut self,
        owner: &EntityId,
        amount: f64,
        cause: impl Into<String>,
        turn: u64,
    ) -> Result<f64> {
        if !amount.is_finite() {
            return Err(EchoError::InvalidArgument(format!(
                "trust delta for {owner} must be finite, got {amount}"
            )));
        }
        let cause = cause.into();
        let account = self.accounts.entry(owner.clone()).or_default();
        account.value += amount;
        account.history.push(TrustDelta {
            amount,
            cause: cause.clone(),
            turn,
        });
        debug!(%owner, amount, cause = %cause, turn, value = account.value, "Trust delta recorded");
        Ok(account.value)
    }

    /// Apply a pending [`TrustChange`] emitted by a subsystem.
    ///
    /// # Errors
    /// Same as [`Self::record_delta`].
    pub fn apply(&mut self, change: &TrustChange, turn: u64) -> Result<f64> {
        self.record_delta(&change.owner, change.amount, change.cause.clone(), turn)
    }

    /// Current value; unknown owners are 0. Pure read.
    #[must_use]
    pub fn value_of(&self, owner: &EntityId) -> f64 {
        self.accounts.get(owner).map_or(0.0, |a| a.value)
    }

    /// Pure threshold query used by unlock logic outside the core.
    #[must_use]
    pub fn threshold_crossed(
        &self,
        owner: &EntityId,
        threshold: f64,
        direction: ThresholdDirection,
    ) -> bool {
        let value = self.value_of(owner);
        match direction {
            ThresholdDirection::Above => value >= threshold,
            ThresholdDirection::Below => value <= threshold,
        }
    }

    /// Full delta history for an owner; empty for unknown owners.
    #[must_use]
    pub fn history_of(&self, owner: &EntityId) -> &[TrustDelta] {
        self.accounts.get(owner).map_or(&[], |a| a.history.as_slice())
    }

    /// All owners with an account.
    pub fn owners(&self) -> impl Iterator<Item = &EntityId> {
        self.accounts.keys()
    }

    /// Verify the replay invariant: every value equals the sum of its
    /// history. Used when restoring snapshots.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.accounts.values().all(|account| {
            let sum: f64 = account.history.iter().map(|d| d.amount).sum();
            (sum - account.value).abs() < 1e-9
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_owner_reads_zero() {
        let ledger = TrustLedger::new();
        assert!((ledger.value_of(&EntityId::new("stranger"))).abs() < f64::EPSILON);
        assert!(ledger.history_of(&EntityId::new("stranger")).is_empty());
    }

    #[test]
    fn value_is_sum_of_history() {
        let mut ledger = TrustLedger::new();
        let owner = EntityId::new("mirren");
        ledger.record_delta(&owner, 2.0, "helped", 1).expect("record");
        ledger.record_delta(&owner, -0.5, "late", 4).expect("record");
        assert!((ledger.value_of(&owner) - 1.5).abs() < 1e-12);
        assert_eq!(ledger.history_of(&owner).len(), 2);
        assert!(ledger.is_consistent());
    }

    #[test]
    fn replay_reproduces_final_state() {
        let script = [
            ("echo", 1.0, "kept-word", 3),
            ("mirren", 2.5, "rescued", 5),
            ("echo", -1.0, "broken-promise", 9),
            ("town", 0.25, "paid-debt", 9),
        ];

        let mut a = TrustLedger::new();
        let mut b = TrustLedger::new();
        for ledger in [&mut a, &mut b] {
            for (owner, amount, cause, turn) in &script {
                ledger
                    .record_delta(&EntityId::new(*owner), *amount, *cause, *turn)
                    .expect("record");
            }
        }

        for (owner, ..) in &script {
            let id = EntityId::new(*owner);
            assert!((a.value_of(&id) - b.value_of(&id)).abs() < f64::EPSILON);
            assert_eq!(a.history_of(&id), b.history_of(&id));
        }
    }

    #[test]
    fn threshold_queries() {
        let mut ledger = TrustLedger::new();
        let echo = EntityId::echo();
        ledger.record_delta(&echo, -3.0, "risk", 1).expect("record");

        assert!(ledger.threshold_crossed(&echo, -3.0, ThresholdDirection::Below));
        assert!(ledger.threshold_crossed(&echo, -2.0, ThresholdDirection::Below));
        assert!(!ledger.threshold_crossed(&echo, -4.0, ThresholdDirection::Below));
        assert!(ledger.threshold_crossed(&echo, -3.0, ThresholdDirection::Above));
        assert!(!ledger.threshold_crossed(&echo, 0.0, ThresholdDirection::Above));
    }

    #[test]
    fn non_finite_delta_rejected() {
        let mut ledger = TrustLedger::new();
        let err = ledger
            .record_delta(&EntityId::echo(), f64::NAN, "bad", 1)
            .expect_err("must reject");
        assert!(matches!(err, EchoError::InvalidArgument(_)));
        assert!(ledger.history_of(&EntityId::echo()).is_empty());
    }
}
