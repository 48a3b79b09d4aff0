//! # Echoline Core Library
//!
//! Game-agnostic narrative consequence engine for turn-based story
//! simulations.
//!
//! A [`NarrativeEngine`] owns the bookkeeping a consequence-driven story
//! needs to stay honest across a whole playthrough:
//!
//! - **World Clock** — monotonic turn counter everything else reads
//! - **Condition Tracker** — per-entity afflictions that tick into damage
//! - **Trust Ledger** — append-only per-owner relationship deltas
//! - **Commitment Tracker** — time-bound promises with partial credit
//! - **Companions** — hazard-gated admission, conflicts, acclimation
//! - **Risk Resolver** — discovery rolls with branching consequences
//! - **Resolution Aggregator** — final ending-tier selection
//!
//! ## Determinism Contract
//!
//! The engine is single-threaded and turn-driven. Replaying the same
//! ordered sequence of operations from an empty engine always reproduces
//! the same ledger history, commitment outcomes, and ending tier. All
//! randomness is injected by the caller.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod commitment;
pub mod companion;
pub mod condition;
pub mod config;
pub mod engine;
pub mod error;
pub mod flags;
pub mod ledger;
pub mod persistence;
pub mod resolution;
pub mod risk;
pub mod types;

pub use config::EngineConfig;
pub use engine::{EngineSnapshot, NarrativeEngine};
pub use error::EchoError;
pub use types::*;
