use super::*;
use chrono::Duration as ChronoDuration;

/// Panics inside the spawned run task.
struct PanickingFetcher;

#[async_trait]
impl Fetcher for PanickingFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<FetchResult, FetchError> {
        panic!("fetcher blew up on {url}");
    }
}

#[tokio::test]
async fn test_unit_runs_once_per_interval() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert(scraper_record(1, 1.0));
    let fetcher = StaticFetcher::new(200, WIDGETS_PAGE);
    let registry = registry(store.clone(), fetcher.clone(), 2);

    let t0 = Utc::now();
    let first = registry.tick_at(t0).await;
    assert_eq!(first.reconcile.added, vec![1]);
    assert!(first.dispatched.is_empty());

    let mut run_times = Vec::new();
    for minutes in (5..=185).step_by(5) {
        let now = t0 + ChronoDuration::minutes(minutes);
        if !registry.tick_at(now).await.dispatched.is_empty() {
            run_times.push(now);
        }
        registry.wait_for_runs().await;
    }

    assert_eq!(run_times.len(), 3);
    for pair in run_times.windows(2) {
        assert!(pair[1] - pair[0] >= ChronoDuration::hours(1));
    }
    assert_eq!(fetcher.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_disabling_removes_unit_and_stops_runs() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert(scraper_record(1, 1.0));
    store.insert(scraper_record(2, 1.0));
    let fetcher = StaticFetcher::new(200, WIDGETS_PAGE);
    let registry = registry(store.clone(), fetcher.clone(), 2);

    let t0 = Utc::now();
    registry.tick_at(t0).await;

    let report = registry.tick_at(t0 + ChronoDuration::hours(1)).await;
    assert_eq!(report.dispatched, vec![1, 2]);
    assert_eq!(registry.wait_for_runs().await, 4);

    store.set_enabled(1, false);

    let report = registry.tick_at(t0 + ChronoDuration::hours(3)).await;
    assert_eq!(report.reconcile.removed, vec![1]);
    assert_eq!(report.dispatched, vec![2]);
    registry.wait_for_runs().await;

    assert!(!registry.contains(1).await);
    let runs_for_first = store
        .calls_for(1)
        .into_iter()
        .filter(|call| matches!(call, StoreCall::LogTask { task: TaskName::ScraperRun, .. }))
        .count();
    assert_eq!(runs_for_first, 1);
    assert_eq!(fetcher.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_reconcile_twice_changes_nothing() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert(scraper_record(3, 1.0));
    store.insert(scraper_record(5, 0.5));
    let registry = registry(store.clone(), StaticFetcher::new(200, WIDGETS_PAGE), 1);

    let first = registry.reconcile().await;
    assert_eq!(first.added, vec![3, 5]);

    let second = registry.reconcile().await;
    assert!(second.is_unchanged());
    assert!(second.rejected.is_empty());
    assert_eq!(registry.unit_ids().await, vec![3, 5]);
    Ok(())
}

#[tokio::test]
async fn test_deleted_scraper_is_dropped() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert(scraper_record(8, 1.0));
    let registry = registry(store.clone(), StaticFetcher::new(200, WIDGETS_PAGE), 1);
    registry.reconcile().await;

    store.delete(8);

    assert_eq!(registry.reconcile().await.removed, vec![8]);
    assert!(registry.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_timeout_is_contained_to_one_run_log() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert(scraper_record(4, 1.0));
    let fetcher = TimeoutFetcher::new();
    let registry = registry(store.clone(), fetcher.clone(), 1);

    let t0 = Utc::now();
    registry.tick_at(t0).await;
    registry.tick_at(t0 + ChronoDuration::hours(1)).await;
    assert_eq!(registry.wait_for_runs().await, 0);

    assert_eq!(
        store.calls_for(4),
        vec![StoreCall::LogTask {
            scraper_id: 4,
            task: TaskName::ScraperRun,
            status: TaskStatus::Timeout,
        }]
    );

    let unit = registry.get(4).await.expect("unit is registered");
    assert!(!unit.snapshot().await.due);

    // Cool-down holds even though the run failed.
    let report = registry.tick_at(t0 + ChronoDuration::minutes(90)).await;
    assert!(report.dispatched.is_empty());
    assert_eq!(fetcher.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_raw_data_precedes_run_log() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert(scraper_record(6, 1.0));
    let registry = registry(store.clone(), StaticFetcher::new(200, WIDGETS_PAGE), 1);

    let t0 = Utc::now();
    registry.tick_at(t0).await;
    registry.tick_at(t0 + ChronoDuration::hours(1)).await;
    registry.wait_for_runs().await;

    let calls = store.calls_for(6);
    let raw = calls
        .iter()
        .position(|call| matches!(call, StoreCall::SaveRawData { .. }))
        .expect("raw data saved");
    let run = calls
        .iter()
        .position(|call| matches!(call, StoreCall::LogTask { task: TaskName::ScraperRun, .. }))
        .expect("run logged");

    assert!(raw < run);
    assert_eq!(run, calls.len() - 1);
    assert!(calls.contains(&StoreCall::SaveLastRun {
        scraper_id: 6,
        status_code: 200
    }));
    Ok(())
}

#[tokio::test]
async fn test_in_flight_run_is_not_dispatched_again() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert(scraper_record(1, 1.0));
    let fetcher = StaticFetcher::with_delay(200, WIDGETS_PAGE, Duration::from_millis(200));
    let registry = registry(store.clone(), fetcher.clone(), 2);

    let t0 = Utc::now();
    registry.tick_at(t0).await;
    assert_eq!(registry.tick_at(t0 + ChronoDuration::hours(1)).await.dispatched, vec![1]);

    // Far enough ahead to be due again, but the first run has not finished.
    let report = registry.tick_at(t0 + ChronoDuration::hours(5)).await;
    assert!(report.dispatched.is_empty());
    assert_eq!(registry.stats().await.running_runs, 1);

    assert_eq!(registry.wait_for_runs().await, 2);
    assert_eq!(fetcher.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_runs_are_capped() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    for id in 1..=4 {
        store.insert(scraper_record(id, 1.0));
    }
    let fetcher = StaticFetcher::with_delay(200, WIDGETS_PAGE, Duration::from_millis(50));
    let registry = registry(store.clone(), fetcher.clone(), 2);

    let t0 = Utc::now();
    registry.tick_at(t0).await;
    let report = registry.tick_at(t0 + ChronoDuration::hours(1)).await;
    assert_eq!(report.dispatched, vec![1, 2, 3, 4]);

    assert_eq!(registry.wait_for_runs().await, 8);
    assert_eq!(fetcher.calls(), 4);
    assert!(fetcher.max_in_flight() <= 2);

    let stats = registry.stats().await;
    assert_eq!(stats.completed_runs, 4);
    assert_eq!(stats.items_found, 8);
    assert_eq!(stats.running_runs, 0);
    Ok(())
}

#[tokio::test]
async fn test_removal_does_not_abort_in_flight_run() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert(scraper_record(2, 1.0));
    let fetcher = StaticFetcher::with_delay(200, WIDGETS_PAGE, Duration::from_millis(100));
    let registry = registry(store.clone(), fetcher.clone(), 1);

    let t0 = Utc::now();
    registry.tick_at(t0).await;
    registry.tick_at(t0 + ChronoDuration::hours(1)).await;

    store.set_enabled(2, false);
    assert_eq!(registry.reconcile().await.removed, vec![2]);

    assert_eq!(registry.wait_for_runs().await, 2);
    assert_eq!(store.items_for(2).len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_invalid_scraper_rejected_without_affecting_others() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert(scraper_record(1, 1.0));
    let mut broken = scraper_record(2, 1.0);
    broken.rules = widget_rules("not a url");
    store.insert(broken);
    let registry = registry(store.clone(), StaticFetcher::new(200, WIDGETS_PAGE), 1);

    let report = registry.reconcile().await;
    assert_eq!(report.added, vec![1]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, 2);

    // Startup treats the same rejection as fatal.
    let fresh = super::registry(store.clone(), StaticFetcher::new(200, WIDGETS_PAGE), 1);
    let err = fresh.load_initial().await.unwrap_err();
    assert!(err.to_string().contains("invalid url"));
    Ok(())
}

#[tokio::test]
async fn test_panicked_run_is_reaped_on_next_tick() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.insert(scraper_record(7, 1.0));
    let registry = registry(store.clone(), Arc::new(PanickingFetcher), 1);

    let t0 = Utc::now();
    registry.tick_at(t0).await;
    assert_eq!(registry.tick_at(t0 + ChronoDuration::hours(1)).await.dispatched, vec![7]);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while registry.stats().await.running_runs > 0 {
        assert!(tokio::time::Instant::now() < deadline, "run task never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    registry.tick_at(t0 + ChronoDuration::minutes(70)).await;

    let stats = registry.stats().await;
    assert_eq!(stats.failed_runs, 1);
    assert_eq!(stats.completed_runs, 0);
    assert_eq!(registry.wait_for_runs().await, 0);
    assert_eq!(registry.stats().await.failed_runs, 1);
    Ok(())
}
