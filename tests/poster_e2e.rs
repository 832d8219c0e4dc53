// tests/poster_e2e.rs
//
// End-to-end runs of the AutoPoster against in-memory collaborators:
// discovery → pool → candidates → gated posting → snapshot/restore.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use paper_autoposter::assess::{Assessment, ScriptedAssessor};
use paper_autoposter::config::Tunables;
use paper_autoposter::ingest::providers::arxiv::ArxivFeed;
use paper_autoposter::store::MemoryStore;
use paper_autoposter::{AutoPoster, Blocked, Collaborators, PostOutcome, Trigger};

use common::{config, paper, t0, Build, FixedEnricher};

#[tokio::test]
async fn popularity_ten_scores_221_and_ranks_first() {
    let now = t0();
    let h = Build::new(vec![
        paper("hot", 48, now),
        paper("warm", 0, now),
        paper("cold", 1, now),
    ])
    .enricher(FixedEnricher::new(&[("hot", 10.0), ("warm", 3.0)]))
    .finish(now);

    let rep = h.poster.discover(now).await;
    assert_eq!(rep.fetched, 3);
    assert_eq!(rep.merge.added, 3);

    let cands = h.poster.candidates().await;
    assert_eq!(cands[0].id, "hot");
    // (10+1)² + 100 bonus + zero recency at exactly 48h, no category, no engagement
    assert!((cands[0].priority - 221.0).abs() < 1e-9, "got {}", cands[0].priority);
    assert!((cands[1].priority - 41.0).abs() < 1e-9, "warm: (3+1)² + 25");
}

#[tokio::test]
async fn restart_restores_state_without_reposting() {
    let now = t0();
    let store = Arc::new(MemoryStore::new());
    let items = vec![paper("a", 2, now), paper("b", 3, now)];
    let scores: &[(&str, f64)] = &[("a", 50.0), ("b", 5.0)];

    let first = Build::new(items.clone())
        .enricher(FixedEnricher::new(scores))
        .store(store.clone())
        .finish(now);
    first.poster.discover(now).await;
    let out = first.poster.post_next(Trigger::Scheduled, false, now).await;
    assert!(matches!(out, PostOutcome::Posted { ref id, .. } if id == "a"));
    drop(first);

    let later = now + Duration::hours(1);
    let second = Build::new(items)
        .enricher(FixedEnricher::new(scores))
        .store(store.clone())
        .finish(later);
    assert!(second.poster.restore(later).await.unwrap());

    let status = second.poster.status(later).await;
    assert_eq!(status.posted_total, 1);
    assert_eq!(status.posted_today, 1);
    assert_eq!(status.last_posting, Some(now));

    // the feed still lists "a"; it must not come back
    let rep = second.poster.discover(later).await;
    assert_eq!(rep.fresh, 0);
    assert!(second.poster.pool(200).await.iter().all(|it| it.id != "a"));
    assert!(second.poster.candidates().await.iter().all(|c| c.id != "a"));

    // spacing survives the restart too
    assert!(matches!(
        second.poster.post_next(Trigger::Scheduled, false, later).await,
        PostOutcome::Blocked(Blocked::TooSoon { .. })
    ));
    let out = second
        .poster
        .post_next(Trigger::Scheduled, false, now + Duration::hours(5))
        .await;
    assert!(matches!(out, PostOutcome::Posted { ref id, .. } if id == "b"));
    assert!(store.save_count() >= 4);
}

#[tokio::test]
async fn quota_of_n_allows_exactly_n_posts() {
    let now = t0();
    let items = (0..5).map(|i| paper(&format!("q{i}"), i, now)).collect();
    let h = Build::new(items)
        .tunables(Tunables {
            daily_quota: 3,
            posting_interval_mins: 0,
            ..Tunables::default()
        })
        .finish(now);
    h.poster.discover(now).await;

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(h.poster.post_next(Trigger::Manual, false, now).await);
    }
    assert_eq!(outcomes.iter().filter(|o| o.is_posted()).count(), 3);
    assert_eq!(
        outcomes[3],
        PostOutcome::Blocked(Blocked::QuotaReached { posted: 3, quota: 3 })
    );
    assert_eq!(h.publisher.sent().len(), 3);

    // force skips spacing, never the quota
    assert!(matches!(
        h.poster.post_next(Trigger::Manual, true, now).await,
        PostOutcome::Blocked(Blocked::QuotaReached { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_posts_allow_at_most_one_success() {
    let now = t0();
    let items = (0..6).map(|i| paper(&format!("c{i}"), i, now)).collect();
    let h = Build::new(items).finish(now);
    h.poster.discover(now).await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let poster = h.poster.clone();
        let trigger = if i % 2 == 0 { Trigger::Manual } else { Trigger::Scheduled };
        tasks.push(tokio::spawn(async move { poster.post_next(trigger, false, now).await }));
    }
    let mut posted = 0;
    for t in tasks {
        match t.await.unwrap() {
            PostOutcome::Posted { .. } => posted += 1,
            PostOutcome::Blocked(Blocked::TooSoon { .. }) => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(posted, 1);
    assert_eq!(h.publisher.sent().len(), 1);
}

#[tokio::test]
async fn low_rated_items_are_blacklisted_for_good() {
    let now = t0();
    let h = Build::new(vec![paper("good", 1, now), paper("bad", 1, now)])
        .enricher(FixedEnricher::new(&[("bad", 40.0), ("good", 2.0)]))
        .assessor(ScriptedAssessor::new(Some(Assessment::High)).with("bad", Some(Assessment::Low)))
        .finish(now);

    h.poster.discover(now).await;
    let ids: Vec<String> = h.poster.candidates().await.into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["good".to_string()]);
    assert_eq!(h.poster.status(now).await.blacklisted, 1);

    h.poster.discover(now + Duration::hours(2)).await;
    assert!(h.poster.pool(200).await.iter().all(|it| it.id != "bad"));
    assert!(h.poster.candidates().await.iter().all(|c| c.id != "bad"));
    assert_eq!(h.poster.status(now).await.blacklisted, 1);
}

#[tokio::test]
async fn a_day_of_cycles_posts_each_id_once_within_quota() {
    let now = t0();
    let items = (0..8).map(|i| paper(&format!("d{i}"), i, now)).collect();
    let h = Build::new(items).finish(now);

    let mut posted: Vec<(chrono::DateTime<chrono::Utc>, String)> = Vec::new();
    for k in 0..48 {
        let at = now + Duration::minutes(30 * k);
        if let PostOutcome::Posted { id, .. } = h.poster.run_cycle(at).await.post {
            posted.push((at, id));
        }
    }

    let unique: HashSet<&String> = posted.iter().map(|(_, id)| id).collect();
    assert_eq!(unique.len(), posted.len(), "an id was posted twice: {posted:?}");
    for pair in posted.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::hours(4));
    }
    let per_day = posted
        .iter()
        .filter(|(at, _)| at.date_naive() == now.date_naive())
        .count();
    assert!(per_day <= 5);
    assert!(!posted.is_empty());
}

#[tokio::test]
async fn failed_publish_requeues_and_keeps_counters() {
    let now = t0();
    let h = Build::new(vec![paper("x", 1, now), paper("y", 2, now)]).finish(now);
    h.poster.discover(now).await;

    h.publisher.fail_next(1);
    let out = h.poster.post_next(Trigger::Manual, false, now).await;
    assert!(matches!(out, PostOutcome::Failed { ref id, .. } if id == "x"));
    assert_eq!(h.poster.candidates().await[0].id, "x");
    assert_eq!(h.poster.status(now).await.posted_total, 0);

    let out = h.poster.post_next(Trigger::Manual, false, now).await;
    assert!(matches!(out, PostOutcome::Posted { ref id, .. } if id == "x"));
}

#[tokio::test]
async fn no_target_channel_disables_the_poster() {
    let now = t0();
    let mut cfg = config(Tunables::default());
    cfg.target_channel = None;
    let poster = Arc::new(AutoPoster::new(cfg, Collaborators::offline(), now));

    let finished = tokio::time::timeout(std::time::Duration::from_secs(1), poster.clone().run()).await;
    assert!(finished.is_ok(), "run() should return immediately");
    assert_eq!(
        poster.post_next(Trigger::Manual, true, now).await,
        PostOutcome::Blocked(Blocked::Disabled)
    );
}

#[tokio::test]
async fn arxiv_fixture_flows_into_candidates() {
    let now = t0();
    let mut c = Collaborators::offline();
    c.feed = Arc::new(ArxivFeed::from_fixture(include_str!("fixtures/arxiv_atom.xml")));
    let poster = AutoPoster::new(config(Tunables::default()), c, now);

    let rep = poster.discover(now).await;
    // one entry is malformed, one predates the three-day lookback
    assert_eq!(rep.fetched, 2);
    let ids: Vec<String> = poster.candidates().await.into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["2506.01001".to_string(), "2506.01002".to_string()]);
}

#[tokio::test]
async fn retitled_copy_of_posted_paper_is_not_posted_again() {
    let now = t0();
    let mut original = paper("2506.00001", 1, now);
    original.title = "Scaling Laws for Sparse Mixture of Experts Models".into();
    let h = Build::new(vec![original]).finish(now);
    h.poster.discover(now).await;
    assert!(h.poster.post_next(Trigger::Manual, false, now).await.is_posted());

    // same paper resurfaces under a new id with cosmetic title changes
    let mut copy = paper("2506.09999", 1, now);
    copy.title = "Scaling laws for sparse  Mixture-of-Experts models".into();
    let mut unrelated = paper("2506.05555", 1, now);
    unrelated.title = "A Survey of Retrieval Augmented Generation".into();
    h.feed.set(vec![copy, unrelated]);

    let later = now + Duration::hours(5);
    let rep = h.poster.discover(later).await;
    assert_eq!(rep.fresh, 2);
    assert_eq!(rep.merge.rejected_duplicate, 1);
    assert_eq!(rep.merge.added, 1);

    let out = h.poster.post_next(Trigger::Manual, false, later).await;
    assert!(matches!(out, PostOutcome::Posted { ref id, .. } if id == "2506.05555"));
    assert_eq!(
        h.poster.post_next(Trigger::Manual, true, later).await,
        PostOutcome::Blocked(Blocked::NoCandidates)
    );
}

#[tokio::test]
async fn retitled_copy_of_a_candidate_stays_out_of_the_pool() {
    let now = t0();
    let mut first = paper("2506.10001", 1, now);
    first.title = "Diffusion Policies for Robotic Manipulation at Scale".into();
    let h = Build::new(vec![first]).finish(now);
    h.poster.discover(now).await;
    assert_eq!(h.poster.candidates().await.len(), 1);

    let mut copy = paper("2506.10002", 1, now);
    copy.title = "Diffusion policies for robotic manipulation at scale.".into();
    h.feed.set(vec![copy]);
    let rep = h.poster.discover(now + Duration::hours(1)).await;
    assert_eq!(rep.merge.rejected_duplicate, 1);
    assert_eq!(h.poster.candidates().await.len(), 1);
    assert!(h.poster.pool(200).await.is_empty());
}

#[tokio::test]
async fn unanswered_enrichment_is_retried_next_discovery() {
    let now = t0();
    let h = Build::new(vec![paper("a", 1, now), paper("b", 1, now)])
        .tunables(Tunables {
            max_candidates: 1,
            ..Tunables::default()
        })
        .enricher(FixedEnricher::new(&[("a", 5.0), ("b", 3.0)]).failing_once(&["b"]))
        .finish(now);

    h.poster.discover(now).await;
    let pooled = h.poster.pool(200).await;
    assert_eq!(pooled.len(), 1);
    assert_eq!(pooled[0].id, "b");
    assert_eq!(pooled[0].enriched_at, None);
    assert_eq!(pooled[0].popularity, None);

    // ten minutes on, nothing is due by age; only the failed lookup is
    let later = now + Duration::minutes(10);
    let rep = h.poster.discover(later).await;
    assert_eq!(rep.refreshed, 1);
    let b = h
        .poster
        .pool(200)
        .await
        .into_iter()
        .find(|it| it.id == "b")
        .expect("b still pooled");
    assert_eq!(b.popularity, Some(3.0));
    assert_eq!(b.enriched_at, Some(later));
}

#[tokio::test]
async fn restart_with_a_smaller_candidate_cap_spills_into_the_pool() {
    let now = t0();
    let store = Arc::new(MemoryStore::new());
    let items: Vec<_> = (0..8).map(|i| paper(&format!("r{i}"), i, now)).collect();

    let first = Build::new(items.clone()).store(store.clone()).finish(now);
    first.poster.discover(now).await;
    assert_eq!(first.poster.candidates().await.len(), 5);
    drop(first);

    let second = Build::new(items)
        .tunables(Tunables {
            max_candidates: 2,
            ..Tunables::default()
        })
        .store(store)
        .finish(now);
    assert!(second.poster.restore(now).await.unwrap());

    let status = second.poster.status(now).await;
    assert_eq!(status.candidates, 2);
    assert_eq!(status.pool_size, 6);
    let kept: Vec<String> = second.poster.candidates().await.into_iter().map(|c| c.id).collect();
    assert_eq!(kept, vec!["r0".to_string(), "r1".to_string()]);
}
