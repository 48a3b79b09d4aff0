//! Ending-Tier Aggregator.
//!
//! A pure function from the final world state to one of four ordered
//! ending tiers. The Echo's meta-trust value selects a band; the top
//! band additionally requires every ritual fragment collected and no
//! unresolved abandoned commitments, otherwise it degrades to Hollow.
//! Total over all inputs: the ledger rejects non-finite deltas, so the
//! Echo value compared here is always a real number.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ResolutionConfig;

/// The four ending tiers, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EndingTier {
    /// The Echo refuses to manifest at all.
    RefusedManifestation,
    /// The ritual completes at a cost that hollows the victory.
    Pyrrhic,
    /// The ritual completes but the Echo remains a stranger.
    Hollow,
    /// Full transformation: trust, fragments, and a clean ledger.
    FullTransformation,
}

/// Inputs the aggregator reads. All gathered by the engine; the
/// aggregator itself performs no lookups and no mutation.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionInput {
    /// The Echo's meta-trust value at the end of play.
    pub echo_trust: f64,
    /// Ritual fragments collected.
    pub fragments_collected: u32,
    /// Commitments that expired and were never made good.
    pub unresolved_abandonments: u32,
}

/// Map the final world state to an ending tier.
///
/// Monotonic in `echo_trust`: raising the Echo value never lowers the
/// tier. The full-transformation band degrades to [`EndingTier::Hollow`]
/// unless all required fragments are held and no abandonment is
/// outstanding.
#[must_use]
pub fn aggregate(input: &ResolutionInput, config: &ResolutionConfig) -> EndingTier {
    let tier = if input.echo_trust < config.refused_below {
        EndingTier::RefusedManifestation
    } else if input.echo_trust < config.pyrrhic_below {
        EndingTier::Pyrrhic
    } else if input.echo_trust < config.full_at {
        EndingTier::Hollow
    } else if input.fragments_collected >= config.required_fragments
        && input.unresolved_abandonments == 0
    {
        EndingTier::FullTransformation
    } else {
        EndingTier::Hollow
    };
    debug!(
        echo_trust = input.echo_trust,
        fragments = input.fragments_collected,
        abandonments = input.unresolved_abandonments,
        ?tier,
        "Ending aggregated"
    );
    tier
}
