//! Carelog Insight - behavioral-pattern correlation and detection engine
//!
//! Turns streams of daily health and behavior observations into
//! statistically grounded, confidence-scored findings: per-child baselines,
//! lagged Pearson correlations promoted into durable patterns, synchronous
//! write-time detection, anonymized cohort matching, and an adaptive alert
//! layer that tunes its own generation thresholds from feedback.
//!
//! ## Modules
//!
//! - **baseline**: per-child, per-metric mean/spread estimation
//! - **correlation**: lagged factor-pair discovery and pattern promotion
//! - **realtime**: synchronous evaluation of each new observation
//! - **cohort**: anonymized population matching
//! - **alerts**: adaptive alert generation and feedback ingestion
//! - **validation**: implicit and explicit clinical validation tracking

pub mod alerts;
pub mod baseline;
pub mod cohort;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod realtime;
pub mod stats;
pub mod store;
pub mod types;
pub mod validation;

pub use config::EngineConfig;
pub use engine::InsightEngine;
pub use error::InsightError;

// Collaborator seams
pub use store::{AlertSink, ChildDirectory, InsightStore, LogDataProvider, MemoryStore};

// Core data model exports
pub use types::{
    Alert, Baseline, CohortMatchResult, CorrelationFinding, CorrelationRequest, DataPoint,
    DateRange, Detection, DetectionResult, Observation, Pattern, RequestStatus, Severity,
};

/// Engine version embedded in alert payload provenance
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
