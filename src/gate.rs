//! # Posting Gate
//! One post at a time, shared by the scheduled and manual paths.
//!
//! The gate mutex is always taken before the state mutex. `attempt` takes a
//! [`GateToken`] so it cannot run without the gate held.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::compose::{ContentGenerator, TemplateGenerator};
use crate::notify::{ChannelResolver, Publisher};
use crate::state::{PostCounters, PosterState};
use crate::with_deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostingPolicy {
    pub daily_quota: usize,
    pub min_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Blocked {
    /// Poster has no target channel or was switched off.
    Disabled,
    NoCandidates,
    QuotaReached { posted: usize, quota: usize },
    TooSoon { next_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PostOutcome {
    Posted { id: String, channel: String },
    Blocked(Blocked),
    Failed { id: String, reason: String },
}

impl PostOutcome {
    pub fn is_posted(&self) -> bool {
        matches!(self, PostOutcome::Posted { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            PostOutcome::Posted { .. } => "posted",
            PostOutcome::Blocked(_) => "blocked",
            PostOutcome::Failed { .. } => "failed",
        }
    }
}

/// Everything needed to turn a candidate into a sent message.
pub struct Delivery<'a> {
    pub channel_alias: &'a str,
    pub resolver: &'a dyn ChannelResolver,
    pub generator: &'a dyn ContentGenerator,
    pub publisher: &'a dyn Publisher,
    pub call_timeout: std::time::Duration,
}

#[derive(Default)]
pub struct PostingGate {
    lock: Mutex<()>,
}

/// Proof that the posting gate is held.
pub struct GateToken<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl PostingGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> GateToken<'_> {
        GateToken {
            _guard: self.lock.lock().await,
        }
    }

    /// True while some post attempt holds the gate.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// Quota and spacing checks. `force` skips spacing only.
pub fn check(
    counters: &PostCounters,
    candidates: usize,
    policy: &PostingPolicy,
    now: DateTime<Utc>,
    force: bool,
) -> Result<(), Blocked> {
    if candidates == 0 {
        return Err(Blocked::NoCandidates);
    }
    let posted = counters.posted_today.len();
    if posted >= policy.daily_quota {
        return Err(Blocked::QuotaReached {
            posted,
            quota: policy.daily_quota,
        });
    }
    if !force {
        if let Some(last) = counters.last_posting {
            // past the end of the calendar means never
            let next_at = last
                .checked_add_signed(policy.min_interval)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            if now < next_at {
                return Err(Blocked::TooSoon { next_at });
            }
        }
    }
    Ok(())
}

/// Try to publish the top candidate. Counters change only on success; a failed
/// item goes back to the front of the candidate list.
pub async fn attempt(
    _token: &GateToken<'_>,
    state: &mut PosterState,
    policy: &PostingPolicy,
    delivery: &Delivery<'_>,
    force: bool,
    now: DateTime<Utc>,
) -> PostOutcome {
    if state.counters.roll_day(now) {
        tracing::info!(target: "poster", date = %now.date_naive(), "daily counters reset");
    }
    if let Err(blocked) = check(&state.counters, state.candidates.len(), policy, now, force) {
        tracing::debug!(target: "poster", ?blocked, "post blocked");
        let out = PostOutcome::Blocked(blocked);
        counter!("poster_post_attempts_total", "result" => out.label()).increment(1);
        return out;
    }

    let item = state.candidates.remove(0);
    let id = item.id.clone();

    let result: anyhow::Result<String> = async {
        let channel = with_deadline(
            delivery.call_timeout,
            "resolve channel",
            delivery.resolver.resolve(delivery.channel_alias),
        )
        .await?;
        let message = match with_deadline(
            delivery.call_timeout,
            "render",
            delivery.generator.render(&item),
        )
        .await
        {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(target: "poster", %id, error = %e, generator = delivery.generator.name(), "render failed; using template");
                TemplateGenerator.render(&item).await?
            }
        };
        with_deadline(
            delivery.call_timeout,
            "publish",
            delivery.publisher.publish(&channel, &message),
        )
        .await?;
        Ok(channel.alias)
    }
    .await;

    let out = match result {
        Ok(channel) => {
            state.counters.record_post(&id, now);
            state.counters.remember_title(&item.title);
            tracing::info!(
                target: "poster",
                %id,
                %channel,
                posted_today = state.counters.posted_today.len(),
                quota = policy.daily_quota,
                "posted"
            );
            PostOutcome::Posted { id, channel }
        }
        Err(e) => {
            tracing::warn!(target: "poster", %id, error = %e, "post failed; requeued");
            state.candidates.insert(0, item);
            PostOutcome::Failed {
                id,
                reason: e.to_string(),
            }
        }
    };
    counter!("poster_post_attempts_total", "result" => out.label()).increment(1);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;
    use crate::notify::{DryRunPublisher, LoopbackChannels};
    use crate::pool::PoolLimits;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap()
    }

    fn policy() -> PostingPolicy {
        PostingPolicy {
            daily_quota: 2,
            min_interval: Duration::hours(4),
        }
    }

    fn state_with(ids: &[&str]) -> PosterState {
        let mut st = PosterState::new(PoolLimits::default(), now());
        st.candidates = ids.iter().map(|id| Item::new(id, id, now())).collect();
        st
    }

    #[test]
    fn check_orders_reasons() {
        let mut c = PostCounters::new(now().date_naive());
        assert_eq!(check(&c, 0, &policy(), now(), false), Err(Blocked::NoCandidates));
        c.record_post("a", now());
        assert_eq!(
            check(&c, 1, &policy(), now() + Duration::hours(1), false),
            Err(Blocked::TooSoon {
                next_at: now() + Duration::hours(4)
            })
        );
        assert_eq!(check(&c, 1, &policy(), now() + Duration::hours(1), true), Ok(()));
        c.record_post("b", now());
        assert!(matches!(
            check(&c, 1, &policy(), now() + Duration::hours(9), true),
            Err(Blocked::QuotaReached { posted: 2, quota: 2 })
        ));
    }

    #[test]
    fn spacing_past_the_calendar_end_blocks_without_panicking() {
        let mut c = PostCounters::new(now().date_naive());
        c.record_post("a", DateTime::<Utc>::MAX_UTC - Duration::days(1));
        let long = PostingPolicy {
            daily_quota: 5,
            min_interval: Duration::days(365),
        };
        assert_eq!(
            check(&c, 1, &long, now(), false),
            Err(Blocked::TooSoon {
                next_at: DateTime::<Utc>::MAX_UTC
            })
        );
        assert_eq!(check(&c, 1, &long, now(), true), Ok(()));
    }

    #[tokio::test]
    async fn failure_requeues_front_and_keeps_counters() {
        let gate = PostingGate::new();
        let publisher = DryRunPublisher::new();
        publisher.fail_next(1);
        let d = Delivery {
            channel_alias: "papers",
            resolver: &LoopbackChannels,
            generator: &TemplateGenerator,
            publisher: &publisher,
            call_timeout: std::time::Duration::from_secs(1),
        };
        let mut st = state_with(&["1", "2"]);

        let token = gate.lock().await;
        assert!(gate.is_busy());
        let out = attempt(&token, &mut st, &policy(), &d, false, now()).await;
        assert!(matches!(out, PostOutcome::Failed { ref id, .. } if id == "1"));
        assert_eq!(st.candidates[0].id, "1");
        assert_eq!(st.counters.posted_total, 0);

        let out = attempt(&token, &mut st, &policy(), &d, false, now()).await;
        assert_eq!(
            out,
            PostOutcome::Posted {
                id: "1".into(),
                channel: "papers".into()
            }
        );
        assert_eq!(st.candidates.len(), 1);
        assert!(st.counters.posted_all.contains("1"));
        assert_eq!(st.counters.last_posting, Some(now()));
        assert!(st.counters.has_posted_title("1"));
        assert!(!st.counters.has_posted_title("2"));
        assert_eq!(publisher.sent().len(), 1);
    }

    #[tokio::test]
    async fn new_utc_day_unblocks_quota() {
        let gate = PostingGate::new();
        let publisher = DryRunPublisher::new();
        let d = Delivery {
            channel_alias: "papers",
            resolver: &LoopbackChannels,
            generator: &TemplateGenerator,
            publisher: &publisher,
            call_timeout: std::time::Duration::from_secs(1),
        };
        let mut st = state_with(&["x"]);
        st.counters.record_post("a", now() - Duration::hours(5));
        st.counters.record_post("b", now() - Duration::hours(5));
        let token = gate.lock().await;
        assert!(matches!(
            attempt(&token, &mut st, &policy(), &d, false, now()).await,
            PostOutcome::Blocked(Blocked::QuotaReached { .. })
        ));
        let tomorrow = now() + Duration::hours(13);
        assert!(attempt(&token, &mut st, &policy(), &d, false, tomorrow).await.is_posted());
        assert_eq!(st.counters.posted_today, vec!["x".to_string()]);
    }
}
