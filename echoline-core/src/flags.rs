//! World flags — the narrative's ad hoc boolean gates.
//!
//! One explicit map owned by the engine instance, never process-wide
//! state. Partial-credit rules and conflict resolution read it; risk
//! consequences and the caller write it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named boolean flags, absent means `false`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldFlags(BTreeMap<String, bool>);

impl WorldFlags {
    /// Empty flag map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag.
    pub fn set(&mut self, name: impl Into<String>, value: bool) {
        self.0.insert(name.into(), value);
    }

    /// Read a flag; unknown flags are `false`.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    /// Iterate over all explicitly-set flags.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
