use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};

use ratelog::clock::ManualClock;
use ratelog::ratelimit::{
    GuardConfig, LimitSpec, RateLimitGuard, RateLimitHeaders, RateLimitKey, RateLimiterBackend,
    SlidingWindowLimiter, HEADER_RETRY_AFTER,
};
use ratelog::store::{BatchAtomicity, InMemoryStore};

fn key(s: &str) -> RateLimitKey {
    RateLimitKey::try_from(s).unwrap()
}

fn build(store: InMemoryStore, clock: &ManualClock) -> SlidingWindowLimiter<InMemoryStore> {
    SlidingWindowLimiter::new(store).with_clock(Arc::new(clock.clone()))
}

#[tokio::test]
async fn test_sliding_window_admits_as_old_entries_age_out() {
    let clock = ManualClock::at_epoch_secs(1_700_000_000);
    let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
    let limiter = build(store, &clock);
    let spec = LimitSpec::new(2, Duration::from_secs(10)).unwrap();
    let k = key("ip:198.51.100.4");

    // t=0, t=5: fill the window.
    assert!(limiter.check(&k, &spec).await.unwrap().allowed);
    clock.advance(Duration::from_secs(5));
    assert!(limiter.check(&k, &spec).await.unwrap().allowed);

    // t=6: denied, and the denial is logged.
    clock.advance(Duration::from_secs(1));
    assert!(!limiter.check(&k, &spec).await.unwrap().allowed);

    // t=11: t=0 aged out, but t=5 and t=6 remain.
    clock.advance(Duration::from_secs(5));
    let decision = limiter.check(&k, &spec).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.count, 3);

    // t=22: everything before t=12 is gone.
    clock.advance(Duration::from_secs(11));
    let decision = limiter.check(&k, &spec).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 1);
}

#[tokio::test]
async fn test_limiters_sharing_a_store_share_limits() {
    let clock = ManualClock::at_epoch_secs(1_700_000_000);
    let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
    let first = build(store.clone(), &clock);
    let second = build(store, &clock);
    let spec = LimitSpec::new(3, Duration::from_secs(60)).unwrap();
    let k = key("token:shared");

    assert!(first.check(&k, &spec).await.unwrap().allowed);
    assert!(second.check(&k, &spec).await.unwrap().allowed);
    assert!(first.check(&k, &spec).await.unwrap().allowed);

    let decision = second.check(&k, &spec).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.count, 4);
}

#[tokio::test]
async fn test_transactional_store_admits_exactly_limit() {
    let store = InMemoryStore::new();
    let limiter = Arc::new(SlidingWindowLimiter::new(store));
    let spec = LimitSpec::new(5, Duration::from_secs(60)).unwrap();
    let k = key("concurrent:tx");

    let checks = (0..20).map(|_| {
        let limiter = limiter.clone();
        let k = k.clone();
        async move { limiter.check(&k, &spec).await }
    });
    let results = join_all(checks).await;

    let admitted = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|d| d.allowed)
        .count();
    assert_eq!(admitted, 5);
}

#[tokio::test]
async fn test_pipelined_store_stays_within_race_bound() {
    let store = InMemoryStore::new().pipelined();
    let limiter = Arc::new(SlidingWindowLimiter::new(store));
    assert_eq!(limiter.atomicity(), BatchAtomicity::Pipelined);

    let spec = LimitSpec::new(5, Duration::from_secs(60)).unwrap();
    let k = key("concurrent:pipe");
    let in_flight = 20;

    let checks = (0..in_flight).map(|_| {
        let limiter = limiter.clone();
        let k = k.clone();
        async move { limiter.check(&k, &spec).await }
    });
    let decisions: Vec<_> = join_all(checks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let admitted = decisions.iter().filter(|d| d.allowed).count() as u64;
    assert!(admitted <= spec.limit() + in_flight);
    // Each check counts its own entry, so interleaving can only over-count.
    assert!(admitted <= spec.limit());
    assert!(decisions.iter().all(|d| d.remaining <= spec.limit()));
    assert_eq!(limiter.store().entries("concurrent:pipe").len(), in_flight as usize);
}

#[tokio::test]
async fn test_outage_then_recovery() {
    let store = InMemoryStore::new();
    let limiter = SlidingWindowLimiter::new(store);
    let spec = LimitSpec::new(5, Duration::from_secs(60)).unwrap();
    let k = key("flaky");

    limiter.store().set_unavailable(true);
    let err = assert_err!(limiter.check(&k, &spec).await);
    assert!(err.is_store_failure());

    limiter.store().set_unavailable(false);
    let decision = assert_ok!(limiter.check(&k, &spec).await);
    assert_eq!(decision.count, 1);
}

#[tokio::test]
async fn test_backend_trait_object() {
    let backend: Arc<dyn RateLimiterBackend> = Arc::new(SlidingWindowLimiter::new(InMemoryStore::new()));
    let spec = LimitSpec::new(1, Duration::from_secs(60)).unwrap();
    let k = key("dyn");

    assert!(backend.check(&k, &spec).await.unwrap().allowed);

    let decision = backend
        .check_within(&k, &spec, Duration::from_secs(1))
        .await
        .unwrap();
    let headers = RateLimitHeaders::from_decision(&decision, &spec);
    assert!(headers
        .header_pairs()
        .iter()
        .any(|(name, value)| *name == HEADER_RETRY_AFTER && value == "60"));
}

#[tokio::test]
async fn test_guard_end_to_end() {
    let clock = ManualClock::at_epoch_secs(1_700_000_000);
    let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
    let limiter = Arc::new(build(store, &clock));
    let guard = RateLimitGuard::new(
        limiter.clone(),
        GuardConfig::new(LimitSpec::new(2, Duration::from_secs(60)).unwrap()),
    );

    assert!(guard.evaluate("ip:203.0.113.7").await.should_proceed());
    assert!(guard.evaluate("ip:203.0.113.7").await.should_proceed());
    assert!(!guard.evaluate("ip:203.0.113.7").await.should_proceed());

    clock.advance(Duration::from_secs(61));
    let outcome = guard.evaluate("ip:203.0.113.7").await;
    assert!(outcome.should_proceed());
    assert_eq!(outcome.headers().unwrap().remaining, 1);
}
