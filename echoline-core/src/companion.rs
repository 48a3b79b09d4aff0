//! Companion & Admission System.
//!
//! Followers carry a set of hazard-tolerance tags. When the player moves,
//! each following companion is checked against the destination's hazard
//! tags: a companion missing any required tolerance is parked at the last
//! safe location rather than blocking the player. Recall and dismissal
//! are explicit; no state ever changes silently.
//!
//! Two extra coexistence mechanisms live here:
//!
//! - **Conflicts**: authored pairs that refuse to follow together until a
//!   one-time reconciliation succeeds (trust thresholds on both parties
//!   plus a qualifying world condition). Once resolved, a conflict never
//!   re-triggers, even if trust later drops.
//! - **Acclimation**: non-conflicting pairs need a bounded window of
//!   consecutive co-located turns before coexistence is permanent;
//!   separation resets a non-permanent counter.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::CompanionConfig;
use crate::error::{EchoError, Result};
use crate::flags::WorldFlags;
use crate::ledger::TrustLedger;
use crate::types::{CompanionId, LocationId, ThresholdDirection};

/// Where a companion stands relative to the party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanionState {
    /// Travelling with the player.
    Following,
    /// Parked at a location — either admission failed there, or the
    /// player dismissed them there.
    Waiting(LocationId),
    /// Permanently released from service. Terminal.
    Dismissed,
}

/// A follower and their environmental tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Companion {
    /// Stable identifier.
    pub id: CompanionId,
    /// Hazard tags this companion tolerates.
    pub capabilities: BTreeSet<String>,
    /// Current party state.
    pub state: CompanionState,
}

/// Outcome of an admission check. Never blocks the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The companion enters with the player.
    Admitted,
    /// The companion was parked; the location is where they wait.
    Parked(LocationId),
}

/// An authored incompatibility between two companions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRule {
    /// One party.
    pub a: CompanionId,
    /// The other party.
    pub b: CompanionId,
    /// Trust the first party must hold for reconciliation.
    pub required_trust_a: f64,
    /// Trust the second party must hold for reconciliation.
    pub required_trust_b: f64,
    /// World flag standing in for the qualifying location condition.
    #[serde(default)]
    pub qualifying_flag: Option<String>,
    /// Sticky: set once by a successful reconciliation.
    #[serde(default)]
    pub resolved: bool,
}

impl ConflictRule {
    fn involves(&self, x: &CompanionId, y: &CompanionId) -> bool {
        (&self.a == x && &self.b == y) || (&self.a == y && &self.b == x)
    }
}

/// Acclimation progress for one unordered pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcclimationState {
    /// First party (lexicographically smaller id).
    pub a: CompanionId,
    /// Second party.
    pub b: CompanionId,
    /// Consecutive co-located turns so far.
    pub consecutive_turns: u32,
    /// Once set, the counter is irrelevant forever.
    pub permanent: bool,
}

/// Registry of companions, conflicts, and acclimation windows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanionRegistry {
    companions: BTreeMap<CompanionId, Companion>,
    conflicts: Vec<ConflictRule>,
    acclimation: Vec<AcclimationState>,
}

impl CompanionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a companion as Following.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::ConflictUnresolved`] if joining would co-locate
    /// an unresolved conflicting pair.
    pub fn register(
        &mut self,
        id: CompanionId,
        capabilities: impl IntoIterator<Item = String>,
    ) -> Result<()> {
        self.check_conflicts(&id)?;
        debug!(companion = %id, "Companion registered");
        self.companions.insert(
            id.clone(),
            Companion {
                id,
                capabilities: capabilities.into_iter().collect(),
                state: CompanionState::Following,
            },
        );
        Ok(())
    }

    /// Install an authored conflict rule.
    pub fn add_conflict(&mut self, rule: ConflictRule) {
        self.conflicts.push(rule);
    }

    /// Current state of a companion.
    ///
    /// # Errors
    /// Returns [`EchoError::UnknownCompanion`] for unknown ids.
    pub fn state_of(&self, id: &CompanionId) -> Result<&CompanionState> {
        self.companions
            .get(id)
            .map(|c| &c.state)
            .ok_or_else(|| EchoError::UnknownCompanion(id.clone()))
    }

    /// Companions currently Following.
    #[must_use]
    pub fn following(&self) -> Vec<CompanionId> {
        self.companions
            .values()
            .filter(|c| c.state == CompanionState::Following)
            .map(|c| c.id.clone())
            .collect()
    }

    /// Check one following companion against a destination's hazard tags.
    ///
    /// Admission succeeds iff every hazard tag is covered by the
    /// companion's tolerances (an empty tag set always admits). On
    /// failure the companion becomes `Waiting(last_safe)`; the player is
    /// never blocked.
    ///
    /// # Errors
    ///
    /// - [`EchoError::UnknownCompanion`] for unknown ids.
    /// - [`EchoError::InvalidTransition`] when the companion is not
    ///   Following (parked or released companions do not travel).
    pub fn attempt_entry(
        &mut self,
        id: &CompanionId,
        hazard_tags: &BTreeSet<String>,
        last_safe: &LocationId,
    ) -> Result<Admission> {
        let companion = self
            .companions
            .get_mut(id)
            .ok_or_else(|| EchoError::UnknownCompanion(id.clone()))?;
        if companion.state != CompanionState::Following {
            return Err(EchoError::InvalidTransition {
                reason: format!("{id} is not following and cannot attempt entry"),
            });
        }

        let tolerated = hazard_tags
            .iter()
            .all(|tag| companion.capabilities.contains(tag));
        if tolerated {
            Ok(Admission::Admitted)
        } else {
            companion.state = CompanionState::Waiting(last_safe.clone());
            debug!(companion = %id, at = %last_safe, "Companion parked at capability boundary");
            Ok(Admission::Parked(last_safe.clone()))
        }
    }

    /// Bring a waiting companion back into the party.
    ///
    /// Valid only when the companion is `Waiting(at)` — the caller
    /// resolves reachability and passes the waiting location.
    ///
    /// # Errors
    ///
    /// - [`EchoError::UnknownCompanion`] for unknown ids.
    /// - [`EchoError::InvalidTransition`] when not waiting there.
    /// - [`EchoError::ConflictUnresolved`] if rejoining would co-locate
    ///   an unresolved conflicting pair.
    pub fn recall(&mut self, id: &CompanionId, at: &LocationId) -> Result<()> {
        {
            let companion = self
                .companions
                .get(id)
                .ok_or_else(|| EchoError::UnknownCompanion(id.clone()))?;
            match &companion.state {
                CompanionState::Waiting(loc) if loc == at => {}
                other => {
                    return Err(EchoError::InvalidTransition {
                        reason: format!("{id} cannot be recalled from state {other:?} at {at}"),
                    });
                }
            }
        }
        self.check_conflicts(id)?;

        if let Some(companion) = self.companions.get_mut(id) {
            companion.state = CompanionState::Following;
            debug!(companion = %id, "Companion recalled");
        }
        Ok(())
    }

    /// Voluntarily park a following companion at the current location.
    ///
    /// Always legal from Following, even where admission would succeed.
    ///
    /// # Errors
    ///
    /// - [`EchoError::UnknownCompanion`] for unknown ids.
    /// - [`EchoError::InvalidTransition`] when not Following.
    pub fn dismiss(&mut self, id: &CompanionId, here: &LocationId) -> Result<()> {
        let companion = self
            .companions
            .get_mut(id)
            .ok_or_else(|| EchoError::UnknownCompanion(id.clone()))?;
        if companion.state != CompanionState::Following {
            return Err(EchoError::InvalidTransition {
                reason: format!("{id} is not following and cannot be dismissed"),
            });
        }
        companion.state = CompanionState::Waiting(here.clone());
        debug!(companion = %id, at = %here, "Companion dismissed");
        Ok(())
    }

    /// Permanently release a companion from service. Terminal.
    ///
    /// # Errors
    ///
    /// - [`EchoError::UnknownCompanion`] for unknown ids.
    /// - [`EchoError::InvalidTransition`] when already released.
    pub fn release(&mut self, id: &CompanionId) -> Result<()> {
        let companion = self
            .companions
            .get_mut(id)
            .ok_or_else(|| EchoError::UnknownCompanion(id.clone()))?;
        if companion.state == CompanionState::Dismissed {
            return Err(EchoError::InvalidTransition {
                reason: format!("{id} was already released"),
            });
        }
        companion.state = CompanionState::Dismissed;
        debug!(companion = %id, "Companion released");
        Ok(())
    }

    /// Attempt the one-time reconciliation for a conflicting pair.
    ///
    /// Succeeds (returns `Ok(true)`) only if both trust thresholds are met
    /// at the moment of the call and the qualifying condition holds, after
    /// which the conflict is permanently resolved — later trust drops
    /// never re-trigger it. Returns `Ok(false)` when conditions are not
    /// met; already-resolved pairs return `Ok(true)`.
    ///
    /// # Errors
    ///
    /// Returns [`EchoError::InvalidArgument`] when no conflict rule exists
    /// for the pair.
    pub fn resolve_conflict(
        &mut self,
        a: &CompanionId,
        b: &CompanionId,
        ledger: &TrustLedger,
        flags: &WorldFlags,
    ) -> Result<bool> {
        let rule = self
            .conflicts
            .iter_mut()
            .find(|r| r.involves(a, b))
            .ok_or_else(|| {
                EchoError::InvalidArgument(format!("no conflict rule between {a} and {b}"))
            })?;

        if rule.resolved {
            return Ok(true);
        }

        let a_met = ledger.threshold_crossed(
            &rule.a.as_entity(),
            rule.required_trust_a,
            ThresholdDirection::Above,
        );
        let b_met = ledger.threshold_crossed(
            &rule.b.as_entity(),
            rule.required_trust_b,
            ThresholdDirection::Above,
        );
        let place_ok = rule
            .qualifying_flag
            .as_deref()
            .is_none_or(|flag| flags.is_set(flag));

        if a_met && b_met && place_ok {
            rule.resolved = true;
            debug!(a = %rule.a, b = %rule.b, "Conflict resolved");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Whether an unresolved conflict exists between the pair.
    #[must_use]
    pub fn conflict_unresolved(&self, a: &CompanionId, b: &CompanionId) -> bool {
        self.conflicts
            .iter()
            .any(|r| r.involves(a, b) && !r.resolved)
    }

    /// Reject any unresolved conflict between `id` and a Following companion.
    fn check_conflicts(&self, id: &CompanionId) -> Result<()> {
        for other in self.following() {
            if &other != id && self.conflict_unresolved(id, &other) {
                return Err(EchoError::ConflictUnresolved {
                    a: id.clone(),
                    b: other,
                });
            }
        }
        Ok(())
    }

    /// Advance acclimation windows by `elapsed_turns`.
    ///
    /// `colocated` is the set of companions that travelled together for
    /// the whole span. Every non-conflicting pair within it gains that
    /// many consecutive turns; reaching the threshold marks the pair
    /// permanent. Every tracked pair *not* fully present is interrupted:
    /// a non-permanent counter resets to zero. Returns pairs that became
    /// permanent during this advance.
    pub fn tick_acclimation(
        &mut self,
        colocated: &[CompanionId],
        elapsed_turns: u64,
        config: &CompanionConfig,
    ) -> Vec<(CompanionId, CompanionId)> {
        // Ensure a tracked entry for every co-located non-conflicting pair.
        for (i, a) in colocated.iter().enumerate() {
            for b in &colocated[i + 1..] {
                if self.conflicts.iter().any(|r| r.involves(a, b)) {
                    continue; // conflicting pairs reconcile, they don't acclimate
                }
                let (lo, hi) = ordered(a, b);
                if !self
                    .acclimation
                    .iter()
                    .any(|s| s.a == lo && s.b == hi)
                {
                    self.acclimation.push(AcclimationState {
                        a: lo,
                        b: hi,
                        consecutive_turns: 0,
                        permanent: false,
                    });
                }
            }
        }

        let gained = u32::try_from(elapsed_turns).unwrap_or(u32::MAX);
        let mut newly_permanent = Vec::new();
        for state in &mut self.acclimation {
            if state.permanent {
                continue;
            }
            let both_present =
                colocated.contains(&state.a) && colocated.contains(&state.b);
            if both_present {
                state.consecutive_turns = state.consecutive_turns.saturating_add(gained);
                if state.consecutive_turns >= config.acclimation_threshold {
                    state.permanent = true;
                    debug!(a = %state.a, b = %state.b, "Coexistence now permanent");
                    newly_permanent.push((state.a.clone(), state.b.clone()));
                }
            } else {
                // Interruption: acclimation does not persist across separations.
                state.consecutive_turns = 0;
            }
        }
        newly_permanent
    }

    /// Whether a pair's coexistence has been marked permanent.
    #[must_use]
    pub fn is_acclimated(&self, a: &CompanionId, b: &CompanionId) -> bool {
        let (lo, hi) = ordered(a, b);
        self.acclimation
            .iter()
            .any(|s| s.a == lo && s.b == hi && s.permanent)
    }
}

fn ordered(a: &CompanionId, b: &CompanionId) -> (CompanionId, CompanionId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}
