//! # Candidate Selection
//! Promotes the accessible top slice of the pool to the ready-to-post list.
//!
//! Each pass folds the previous candidates back into the pool first, so the
//! list is always re-derived from current priorities and expiry.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::time::Duration;

use crate::assess::{AccessibilityAssessor, Assessment};
use crate::item::{Accessibility, Item};
use crate::state::PosterState;
use crate::with_deadline;

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSelector {
    pub max_candidates: usize,
    pub high_boost: f64,
    pub medium_boost: f64,
    pub assess_timeout: Duration,
}

impl Default for CandidateSelector {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            high_boost: 0.2,
            medium_boost: 0.0,
            assess_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectionReport {
    pub promoted: usize,
    pub examined: usize,
    pub assessed: usize,
    pub blacklisted: usize,
    /// Left pooled because the assessor could not give an answer.
    pub unresolved: usize,
    pub expired: usize,
}

impl CandidateSelector {
    /// Ordering key for candidates; never written back to `priority`.
    pub fn effective_priority(&self, item: &Item) -> f64 {
        let boost = match item.accessibility {
            Accessibility::High => self.high_boost,
            Accessibility::Medium => self.medium_boost,
            _ => 0.0,
        };
        item.priority * (1.0 + boost)
    }

    pub async fn update(
        &self,
        state: &mut PosterState,
        assessor: &dyn AccessibilityAssessor,
        now: DateTime<Utc>,
    ) -> SelectionReport {
        let mut report = SelectionReport::default();

        let previous = std::mem::take(&mut state.candidates);
        state.pool.absorb(previous);
        report.expired = state.pool.cleanup(now);

        let window = self.max_candidates.saturating_mul(2);
        let ids: Vec<String> = state
            .pool
            .all()
            .iter()
            .filter(|it| {
                !state.blacklist.contains(&it.id) && !state.counters.posted_all.contains(&it.id)
            })
            .take(window)
            .map(|it| it.id.clone())
            .collect();

        let mut picked: Vec<String> = Vec::new();
        for id in ids {
            if picked.len() >= self.max_candidates {
                break;
            }
            report.examined += 1;
            let Some(current) = state.pool.all().iter().find(|it| it.id == id).cloned() else {
                continue;
            };

            let rating = match current.accessibility {
                Accessibility::Unrated if !assessor.enabled() => Accessibility::Medium,
                Accessibility::Unrated => {
                    report.assessed += 1;
                    let answer =
                        with_deadline(self.assess_timeout, "assess", assessor.assess(&current))
                            .await;
                    match answer {
                        Ok(a @ (Assessment::Low | Assessment::Medium | Assessment::High)) => {
                            a.as_accessibility().unwrap_or(Accessibility::Unrated)
                        }
                        Ok(Assessment::Unknown) => {
                            tracing::info!(target: "poster", %id, assessor = assessor.name(), "accessibility unknown; left pooled");
                            report.unresolved += 1;
                            continue;
                        }
                        Err(e) => {
                            counter!("poster_assess_errors_total").increment(1);
                            tracing::warn!(target: "poster", %id, error = %e, "accessibility check failed; left pooled");
                            report.unresolved += 1;
                            continue;
                        }
                    }
                }
                other => other,
            };

            if let Some(it) = state.pool.get_mut(&id) {
                it.accessibility = rating;
            }
            if rating.is_promotable() {
                picked.push(id);
            } else {
                state.blacklist_id(&id);
                report.blacklisted += 1;
                tracing::info!(target: "poster", %id, "rated low; blacklisted");
            }
        }

        let mut promoted = state.pool.take(&picked);
        promoted.sort_by(|a, b| self.effective_priority(b).total_cmp(&self.effective_priority(a)));
        report.promoted = promoted.len();
        state.candidates = promoted;
        report
    }
}
