//! Scheduler-owned mutable state: pool, candidates, blacklist and post counters.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeSet, VecDeque};

use crate::item::{Item, Lifecycle};
use crate::pool::{title_key, MergeReport, PoolLimits, RetentionPool};

/// How many posted titles are kept for near-duplicate checks.
pub const POSTED_TITLES_KEPT: usize = 500;

/// Post bookkeeping. `posted_all` is the permanent dedup set.
#[derive(Debug, Clone, PartialEq)]
pub struct PostCounters {
    pub posted_total: u64,
    pub posted_today: Vec<String>,
    pub posted_all: BTreeSet<String>,
    /// Normalized titles of the most recent posts, oldest first.
    pub posted_titles: VecDeque<String>,
    pub last_posting: Option<DateTime<Utc>>,
    pub last_reset: NaiveDate,
}

impl PostCounters {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            posted_total: 0,
            posted_today: Vec::new(),
            posted_all: BTreeSet::new(),
            posted_titles: VecDeque::new(),
            last_posting: None,
            last_reset: today,
        }
    }

    /// Reset the daily list when the UTC date moved on. Returns true if it reset.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if self.last_reset != today {
            self.reset_daily(now);
            true
        } else {
            false
        }
    }

    /// Clear today's list regardless of date. The permanent set is untouched.
    pub fn reset_daily(&mut self, now: DateTime<Utc>) {
        self.posted_today.clear();
        self.last_reset = now.date_naive();
    }

    pub fn record_post(&mut self, id: &str, now: DateTime<Utc>) {
        self.posted_all.insert(id.to_string());
        self.posted_today.push(id.to_string());
        self.posted_total = self.posted_total.saturating_add(1);
        self.last_posting = Some(now);
    }

    pub fn remember_title(&mut self, title: &str) {
        self.posted_titles.push_back(title_key(title));
        while self.posted_titles.len() > POSTED_TITLES_KEPT {
            self.posted_titles.pop_front();
        }
    }

    pub fn has_posted_title(&self, title: &str) -> bool {
        let key = title_key(title);
        self.posted_titles.iter().any(|t| *t == key)
    }
}

#[derive(Debug, Clone)]
pub struct PosterState {
    pub pool: RetentionPool,
    pub candidates: Vec<Item>,
    pub blacklist: BTreeSet<String>,
    pub counters: PostCounters,
    pub last_discovery: Option<DateTime<Utc>>,
}

impl PosterState {
    pub fn new(limits: PoolLimits, now: DateTime<Utc>) -> Self {
        Self {
            pool: RetentionPool::new(limits),
            candidates: Vec::new(),
            blacklist: BTreeSet::new(),
            counters: PostCounters::new(now.date_naive()),
            last_discovery: None,
        }
    }

    pub fn is_candidate(&self, id: &str) -> bool {
        self.candidates.iter().any(|c| c.id == id)
    }

    /// True when the id lives anywhere outside the pool.
    pub fn is_known_outside_pool(&self, id: &str) -> bool {
        self.counters.posted_all.contains(id) || self.blacklist.contains(id) || self.is_candidate(id)
    }

    pub fn lifecycle(&self, id: &str) -> Lifecycle {
        if self.counters.posted_all.contains(id) {
            Lifecycle::Posted
        } else if self.blacklist.contains(id) {
            Lifecycle::Blacklisted
        } else if self.is_candidate(id) {
            Lifecycle::Candidate
        } else if self.pool.contains(id) {
            Lifecycle::Pooled
        } else {
            Lifecycle::Unknown
        }
    }

    /// Merge scored discoveries into the pool, excluding ids tracked elsewhere
    /// and titles close to a current candidate or a recent post.
    pub fn merge_discovered(&mut self, items: Vec<Item>) -> MergeReport {
        let PosterState {
            pool,
            candidates,
            blacklist,
            counters,
            ..
        } = self;
        let known_titles: Vec<String> = candidates
            .iter()
            .map(|c| title_key(&c.title))
            .chain(counters.posted_titles.iter().cloned())
            .collect();
        pool.merge_with_titles(
            items,
            |id| {
                counters.posted_all.contains(id)
                    || blacklist.contains(id)
                    || candidates.iter().any(|c| c.id == id)
            },
            &known_titles,
        )
    }

    /// Move an id into the blacklist from wherever it currently sits.
    /// Posted ids are left alone; they are already terminal.
    pub fn blacklist_id(&mut self, id: &str) -> bool {
        if self.counters.posted_all.contains(id) {
            return false;
        }
        self.candidates.retain(|c| c.id != id);
        self.pool.remove(id);
        self.blacklist.insert(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 23, 0, 0).unwrap()
    }

    #[test]
    fn day_rollover_resets_only_daily_list() {
        let mut c = PostCounters::new(now().date_naive());
        c.record_post("a", now());
        assert!(!c.roll_day(now() + Duration::minutes(30)));
        assert_eq!(c.posted_today.len(), 1);

        assert!(c.roll_day(now() + Duration::hours(2)));
        assert!(c.posted_today.is_empty());
        assert!(c.posted_all.contains("a"));
        assert_eq!(c.posted_total, 1);
    }

    #[test]
    fn lifecycle_follows_containers() {
        let mut st = PosterState::new(PoolLimits::default(), now());
        let item = Item::new("1", "one", now());
        st.pool.merge(vec![item.clone()], |_| false);
        assert_eq!(st.lifecycle("1"), Lifecycle::Pooled);

        let promoted = st.pool.take(&["1".to_string()]);
        st.candidates = promoted;
        assert_eq!(st.lifecycle("1"), Lifecycle::Candidate);
        assert!(!st.pool.contains("1"));

        assert!(st.blacklist_id("1"));
        assert_eq!(st.lifecycle("1"), Lifecycle::Blacklisted);
        assert!(st.candidates.is_empty());
        assert_eq!(st.lifecycle("nope"), Lifecycle::Unknown);
    }

    #[test]
    fn merge_discovered_skips_tracked_ids() {
        let mut st = PosterState::new(PoolLimits::default(), now());
        st.counters.record_post("p", now());
        st.blacklist.insert("b".into());
        st.candidates.push(Item::new("c", "candidate paper", now()));
        let rep = st.merge_discovered(vec![
            Item::new("p", "posted paper", now()),
            Item::new("b", "banned paper", now()),
            Item::new("c", "candidate again", now()),
            Item::new("n", "new paper", now()),
        ]);
        assert_eq!(rep.added, 1);
        assert_eq!(rep.rejected_known, 3);
        assert_eq!(st.lifecycle("n"), Lifecycle::Pooled);
    }

    #[test]
    fn retitled_copies_of_tracked_papers_are_rejected() {
        let mut st = PosterState::new(PoolLimits::default(), now());
        st.counters.record_post("p", now());
        st.counters
            .remember_title("Scaling Laws for Sparse Mixture of Experts Models");
        st.candidates.push(Item::new(
            "c",
            "Diffusion Policies for Robotic Manipulation at Scale",
            now(),
        ));
        let rep = st.merge_discovered(vec![
            Item::new("p2", "Scaling  laws for sparse mixture of experts models", now()),
            Item::new("c2", "Diffusion Policies for Robotic Manipulation at Scale.", now()),
            Item::new("n", "An Unrelated Survey of Graph Transformers", now()),
        ]);
        assert_eq!(rep.added, 1);
        assert_eq!(rep.rejected_duplicate, 2);
        assert_eq!(st.lifecycle("p2"), Lifecycle::Unknown);
        assert_eq!(st.lifecycle("c2"), Lifecycle::Unknown);
        assert_eq!(st.lifecycle("n"), Lifecycle::Pooled);
    }

    #[test]
    fn posted_titles_are_bounded() {
        let mut c = PostCounters::new(now().date_naive());
        for i in 0..POSTED_TITLES_KEPT + 3 {
            c.remember_title(&format!("title {i}"));
        }
        assert_eq!(c.posted_titles.len(), POSTED_TITLES_KEPT);
        assert!(!c.has_posted_title("title 0"));
        assert!(c.has_posted_title(&format!("TITLE  {}", POSTED_TITLES_KEPT + 2)));
    }

    #[test]
    fn posted_ids_cannot_be_blacklisted() {
        let mut st = PosterState::new(PoolLimits::default(), now());
        st.counters.record_post("p", now());
        assert!(!st.blacklist_id("p"));
        assert_eq!(st.lifecycle("p"), Lifecycle::Posted);
    }
}
