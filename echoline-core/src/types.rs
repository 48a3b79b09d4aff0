//! Core type definitions for the consequence engine.
//!
//! Identifiers are content-stable strings rather than random UUIDs:
//! the deterministic-replay guarantee requires that the same authored
//! scenario produces byte-identical ids on every run.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Unique identifier for any entity (NPC, creature, faction) that can hold
/// trust or act as a commitment beneficiary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Create an entity id from a stable content identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The distinguished meta-narrator owner.
    ///
    /// The Echo's trust value is the single controlling input to
    /// ending-tier selection.
    #[must_use]
    pub fn echo() -> Self {
        Self("echo".to_string())
    }

    /// Conventional owner for town/faction reputation.
    #[must_use]
    pub fn town() -> Self {
        Self("town".to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a companion (a follower entity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanionId(pub String);

impl CompanionId {
    /// Create a companion id from a stable content identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The trust-ledger owner corresponding to this companion.
    #[must_use]
    pub fn as_entity(&self) -> EntityId {
        EntityId(self.0.clone())
    }
}

impl fmt::Display for CompanionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CompanionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a location. The engine never owns the map; it
/// only remembers where companions were parked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub String);

impl LocationId {
    /// Create a location id from a stable content identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LocationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a commitment, sequential within its tracker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CommitmentId(pub u64);

impl fmt::Display for CommitmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "commitment#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Ledger primitives
// ---------------------------------------------------------------------------

/// A single signed entry in an owner's trust history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustDelta {
    /// Signed amount added to the owner's value.
    pub amount: f64,
    /// Why this delta happened (e.g. `"commitment-fulfilled#3"`).
    pub cause: String,
    /// Turn at which the delta was recorded.
    pub turn: u64,
}

/// A pending trust change emitted by a subsystem, to be recorded by the
/// engine. Subsystems never write to the ledger directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustChange {
    /// Which owner's value to adjust.
    pub owner: EntityId,
    /// Signed amount.
    pub amount: f64,
    /// Cause tag carried into the ledger history.
    pub cause: String,
}

impl TrustChange {
    /// Convenience constructor.
    #[must_use]
    pub fn new(owner: EntityId, amount: f64, cause: impl Into<String>) -> Self {
        Self {
            owner,
            amount,
            cause: cause.into(),
        }
    }
}

/// Which side of a threshold a query is asking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdDirection {
    /// Value at or above the threshold.
    Above,
    /// Value at or below the threshold.
    Below,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Damage produced by an exposure tick. The engine only ever *emits*
/// damage; applying it is the health subsystem's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageEvent {
    /// Who takes the damage.
    pub entity: EntityId,
    /// Whole points of damage (rounded down).
    pub amount: u32,
    /// Severity at the time the damage was emitted.
    pub severity: f32,
}

// ---------------------------------------------------------------------------
// Entity narrative state
// ---------------------------------------------------------------------------

/// Generic narrative state for an entity.
///
/// The many bespoke per-NPC transitions (infected→cured, hostile→grateful,
/// injured→recovering) share this one tagged type so the commitment and
/// trust machinery stays uniform across beneficiaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EntityState {
    /// No ongoing narrative condition.
    #[default]
    Healthy,
    /// Under an active affliction.
    Infected,
    /// Affliction lifted by a cure.
    Cured,
    /// Actively opposed to the player.
    Hostile,
    /// Won over by player action.
    Grateful,
    /// Physically hurt.
    Injured,
    /// On the mend.
    Recovering,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_owner_is_stable() {
        assert_eq!(EntityId::echo(), EntityId::new("echo"));
        assert_eq!(EntityId::echo().to_string(), "echo");
    }

    #[test]
    fn companion_maps_to_same_ledger_owner() {
        let c = CompanionId::new("mirren");
        assert_eq!(c.as_entity(), EntityId::new("mirren"));
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = EntityId::new("fungal-warden");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"fungal-warden\"");
    }
}
