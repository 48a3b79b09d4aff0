//! Configuration for the consequence engine.
//!
//! Maps directly to `echoline.toml`. Every knob has a serde default so a
//! partial file (or an empty one) still yields a playable tuning.

use serde::{Deserialize, Serialize};

use crate::commitment::PartialCreditRule;

/// Top-level engine configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Condition-tracker tuning.
    #[serde(default)]
    pub exposure: ExposureConfig,
    /// Commitment bonuses, penalties, and partial-credit rules.
    #[serde(default)]
    pub commitments: CommitmentConfig,
    /// Companion acclimation tuning.
    #[serde(default)]
    pub companions: CompanionConfig,
    /// Ending-tier bands and fragment requirements.
    #[serde(default)]
    pub resolution: ResolutionConfig,
    /// Persistence / save settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`crate::EchoError::Config`] if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::EchoError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Condition-tracker (environmental affliction) tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Default severity gained per turn while under exposure.
    #[serde(default = "default_5_0")]
    pub rate_per_turn: f32,
    /// Hard ceiling severity is clamped at.
    #[serde(default = "default_100_0")]
    pub severity_ceiling: f32,
    /// Severity above which damage starts being emitted.
    #[serde(default = "default_20_0")]
    pub damage_threshold: f32,
    /// Damage points per severity point over the threshold.
    #[serde(default = "default_1_0")]
    pub damage_rate: f32,
    /// Per-environment overrides of `rate_per_turn`, keyed by hazard tag.
    #[serde(default)]
    pub environment_rates: std::collections::BTreeMap<String, f32>,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            rate_per_turn: 5.0,
            severity_ceiling: 100.0,
            damage_threshold: 20.0,
            damage_rate: 1.0,
            environment_rates: std::collections::BTreeMap::new(),
        }
    }
}

/// Commitment bonuses and penalties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentConfig {
    /// Trust granted to the beneficiary for any fulfillment.
    #[serde(default = "default_2_0_f64")]
    pub base_bonus: f64,
    /// Extra trust granted on top of the base for fulfillment.
    #[serde(default = "default_1_0_f64")]
    pub fulfillment_bonus: f64,
    /// Smaller fixed bonus recorded on the Echo for every fulfillment.
    #[serde(default = "default_0_5_f64")]
    pub echo_bonus: f64,
    /// Base penalty on the beneficiary when a commitment expires.
    #[serde(default = "default_1_0_f64")]
    pub base_penalty: f64,
    /// Base penalty on the Echo when a commitment expires.
    #[serde(default = "default_1_0_f64")]
    pub echo_penalty: f64,
    /// Partial-credit rules evaluated at abandonment time.
    #[serde(default)]
    pub partial_credit: Vec<PartialCreditRule>,
}

impl Default for CommitmentConfig {
    fn default() -> Self {
        Self {
            base_bonus: 2.0,
            fulfillment_bonus: 1.0,
            echo_bonus: 0.5,
            base_penalty: 1.0,
            echo_penalty: 1.0,
            partial_credit: Vec::new(),
        }
    }
}

/// Companion coexistence tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    /// Consecutive co-located turns before a non-conflicting pair is
    /// permanently acclimated.
    #[serde(default = "default_5_u32")]
    pub acclimation_threshold: u32,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            acclimation_threshold: 5,
        }
    }
}

/// Ending-tier bands over the Echo's trust value.
///
/// Bands are half-open and ordered; the aggregator is monotonic in the
/// Echo value by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Echo trust strictly below this yields the refuses-manifestation tier.
    #[serde(default = "default_neg_5_0_f64")]
    pub refused_below: f64,
    /// Echo trust in `[refused_below, pyrrhic_below)` yields the pyrrhic tier.
    #[serde(default = "default_0_0_f64")]
    pub pyrrhic_below: f64,
    /// Echo trust at or above this qualifies for full transformation.
    #[serde(default = "default_5_0_f64")]
    pub full_at: f64,
    /// Fragments the player must have collected for the top tier.
    #[serde(default = "default_3_u32")]
    pub required_fragments: u32,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            refused_below: -5.0,
            pyrrhic_below: 0.0,
            full_at: 5.0,
            required_fragments: 3,
        }
    }
}

/// Persistence / save configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Number of save backups to keep.
    #[serde(default = "default_3_u32")]
    pub backup_count: u32,
    /// Detect save corruption via checksums.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            backup_count: 3,
            checksum_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_1_0() -> f32 { 1.0 }
fn default_5_0() -> f32 { 5.0 }
fn default_20_0() -> f32 { 20.0 }
fn default_100_0() -> f32 { 100.0 }
fn default_0_0_f64() -> f64 { 0.0 }
fn default_0_5_f64() -> f64 { 0.5 }
fn default_1_0_f64() -> f64 { 1.0 }
fn default_2_0_f64() -> f64 { 2.0 }
fn default_5_0_f64() -> f64 { 5.0 }
fn default_neg_5_0_f64() -> f64 { -5.0 }
fn default_3_u32() -> u32 { 3 }
fn default_5_u32() -> u32 { 5 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = EngineConfig::from_toml("").expect("parse");
        assert!((config.exposure.rate_per_turn - 5.0).abs() < f32::EPSILON);
        assert!((config.resolution.refused_below - -5.0).abs() < f64::EPSILON);
        assert_eq!(config.companions.acclimation_threshold, 5);
        assert!(config.persistence.checksum_enabled);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let toml = r#"
            [resolution]
            required_fragments = 7

            [[commitments.partial_credit]]
            id = "spared-the-grove"
            requires_flag = "grove_intact"
            multiplier = 0.5
        "#;
        let config = EngineConfig::from_toml(toml).expect("parse");
        assert_eq!(config.resolution.required_fragments, 7);
        assert!((config.resolution.full_at - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.commitments.partial_credit.len(), 1);
        assert_eq!(
            config.commitments.partial_credit[0].requires_flag.as_deref(),
            Some("grove_intact")
        );
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = EngineConfig::from_toml("not = [valid").expect_err("must fail");
        assert!(matches!(err, crate::EchoError::Config(_)));
    }
}
