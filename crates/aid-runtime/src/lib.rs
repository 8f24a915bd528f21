#![deny(warnings)]

//! Runtime for the aid matching engine.
//!
//! [`Engine`] owns the published world snapshot, the scorer and the heatmap
//! cache, and serves recommendations, heatmaps and markers to concurrent
//! readers. [`ChangeFeedDispatcher`] keeps it current from storage change
//! events and tells subscribers what went stale.

pub mod change;
pub mod config;
pub mod dispatcher;
pub mod engine;

pub use aid_match::Cancellation;
pub use aid_store::{ChangeEvent, ChangeKind, ChangeType, EntitySource};
pub use change::{EntityChange, Impact, StaleRegion};
pub use config::EngineConfig;
pub use dispatcher::{ChangeFeedDispatcher, DispatchStats, Notification, NotificationSink};
pub use engine::{Engine, EngineStats};

use aid_core::ValidationError;
use aid_match::MatchError;
use aid_scoring::ScoringError;
use thiserror::Error;

/// Errors surfaced by the engine and dispatcher.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    /// Storage could not be read.
    #[error("entity source: {0:#}")]
    Source(anyhow::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}
