//! Baseline estimation
//!
//! Computes per-child, per-metric statistical baselines (mean and
//! Bessel-corrected standard deviation) over a trailing window of
//! observations. Baselines give the realtime detector a notion of "normal"
//! for each metric so that meaningful deviation can be scored.

use crate::config::EngineConfig;
use crate::error::InsightError;
use crate::stats;
use crate::store::{InsightStore, LogDataProvider};
use crate::types::{Baseline, DateRange};
use chrono::{Duration, Utc};
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

/// Recomputes baselines for every observed metric with enough samples.
pub struct BaselineEstimator {
    provider: Arc<dyn LogDataProvider>,
    store: Arc<dyn InsightStore>,
    config: EngineConfig,
}

impl BaselineEstimator {
    pub fn new(
        provider: Arc<dyn LogDataProvider>,
        store: Arc<dyn InsightStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    /// Recompute baselines for `child_id` over the trailing window.
    ///
    /// Metrics with fewer than the configured minimum number of samples are
    /// skipped silently; a thin series means "no baseline yet", not an error.
    /// Returns the number of baselines written.
    pub fn calculate_baselines(&self, child_id: Uuid) -> Result<usize, InsightError> {
        let range = DateRange::trailing_days(self.config.baseline_window_days);
        let series_by_metric = self.provider.factor_series(child_id, &range)?;

        let now = Utc::now();
        let mut written = 0;

        for (metric_name, points) in &series_by_metric {
            if points.len() < self.config.min_sample_size {
                debug!(
                    "skipping baseline for {metric_name}: {} of {} samples",
                    points.len(),
                    self.config.min_sample_size
                );
                continue;
            }

            let values: Vec<f64> = points.iter().map(|p| p.value).collect();
            let baseline = Baseline {
                id: Uuid::new_v4(),
                child_id,
                metric_name: metric_name.clone(),
                mean: stats::mean(&values),
                std_dev: stats::sample_std_dev(&values),
                sample_size: values.len(),
                calculated_at: now,
                valid_until: now + Duration::days(self.config.baseline_validity_days),
            };

            // Upsert: an existing (child, metric) row is overwritten in
            // place and keeps its identity
            self.store.upsert_baseline(baseline)?;
            written += 1;
        }

        Ok(written)
    }
}
