//! Cohort matching
//!
//! Scores a child's profile against population cohorts using weighted
//! partial credit and surfaces cohort-level patterns without exposing any
//! identity: membership is recorded only as a one-way salted hash of the
//! child id.

use crate::config::EngineConfig;
use crate::error::InsightError;
use crate::store::{ChildDirectory, InsightStore};
use crate::types::{ChildProfile, Cohort, CohortCriteria, CohortMatchResult};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Weight of the age criterion in match scoring
const AGE_WEIGHT: f64 = 40.0;
/// Weight of the gender criterion
const GENDER_WEIGHT: f64 = 20.0;
/// Weight of the condition-overlap criterion
const CONDITION_WEIGHT: f64 = 40.0;
/// Years outside the age band that still earn half credit
const AGE_GRACE_YEARS: u32 = 2;

/// Matches child profiles against cohort criteria.
pub struct CohortMatcher {
    store: Arc<dyn InsightStore>,
    directory: Arc<dyn ChildDirectory>,
    config: EngineConfig,
}

impl CohortMatcher {
    pub fn new(
        store: Arc<dyn InsightStore>,
        directory: Arc<dyn ChildDirectory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    /// Score a profile against cohort criteria with weighted partial credit.
    ///
    /// Criteria the cohort leaves unspecified are skipped on both sides of
    /// the fraction, not penalized. A cohort with no criteria at all matches
    /// everyone with score 1.0.
    pub fn match_score(profile: &ChildProfile, criteria: &CohortCriteria) -> f64 {
        if criteria.is_empty() {
            return 1.0;
        }

        let mut matched = 0.0;
        let mut total = 0.0;

        if let Some((min_age, max_age)) = criteria.age_range {
            total += AGE_WEIGHT;
            let age = profile.age_years(Utc::now().date_naive());
            if age >= min_age && age <= max_age {
                matched += AGE_WEIGHT;
            } else {
                let distance = if age < min_age {
                    min_age - age
                } else {
                    age - max_age
                };
                if distance <= AGE_GRACE_YEARS {
                    matched += AGE_WEIGHT / 2.0;
                }
            }
        }

        if let Some(gender) = &criteria.gender {
            total += GENDER_WEIGHT;
            if profile.gender.eq_ignore_ascii_case(gender) {
                matched += GENDER_WEIGHT;
            }
        }

        if !criteria.conditions.is_empty() {
            total += CONDITION_WEIGHT;
            let overlap = criteria
                .conditions
                .iter()
                .filter(|required| {
                    profile
                        .conditions
                        .iter()
                        .any(|c| c.eq_ignore_ascii_case(required))
                })
                .count();
            matched += CONDITION_WEIGHT * overlap as f64 / criteria.conditions.len() as f64;
        }

        matched / total
    }

    /// Cohorts whose criteria the child matches, best first. Matches below
    /// the result floor are dropped entirely.
    pub fn find_matching_cohorts(
        &self,
        child_id: Uuid,
    ) -> Result<Vec<CohortMatchResult>, InsightError> {
        let profile = self.directory.child_profile(child_id)?;

        let mut results = Vec::new();
        for cohort in self.store.cohorts()? {
            let score = Self::match_score(&profile, &cohort.criteria);
            if score < self.config.cohort_result_floor {
                continue;
            }
            let patterns = self.store.cohort_patterns(cohort.id)?;
            results.push(CohortMatchResult {
                cohort,
                match_score: score,
                patterns,
            });
        }

        results.sort_by(|a, b| {
            b.match_score
                .partial_cmp(&a.match_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }

    /// Join a cohort anonymously. Requires the join threshold; stores only
    /// the salted membership hash, never the child id. Returns the hash.
    pub fn join_cohort(&self, child_id: Uuid, cohort_id: Uuid) -> Result<String, InsightError> {
        let profile = self.directory.child_profile(child_id)?;
        let cohort = self
            .store
            .cohorts()?
            .into_iter()
            .find(|c| c.id == cohort_id)
            .ok_or_else(|| InsightError::NotFound(format!("cohort {cohort_id}")))?;

        let score = Self::match_score(&profile, &cohort.criteria);
        if score < self.config.cohort_join_threshold {
            return Err(InsightError::InvalidRequest(format!(
                "match score {score:.2} is below the join threshold"
            )));
        }

        let hash = self.member_hash(child_id);
        self.store.insert_cohort_membership(cohort_id, &hash)?;
        Ok(hash)
    }

    /// One-way salted membership hash
    fn member_hash(&self, child_id: Uuid) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.cohort_salt.as_bytes());
        hasher.update(child_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Convenience accessor for scoring an arbitrary cohort
    pub fn score_against(&self, child_id: Uuid, cohort: &Cohort) -> Result<f64, InsightError> {
        let profile = self.directory.child_profile(child_id)?;
        Ok(Self::match_score(&profile, &cohort.criteria))
    }
}
