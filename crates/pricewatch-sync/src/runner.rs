use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pricewatch_adapters::SourceAdapter;
use pricewatch_core::{CandidateRecord, TaskDescriptor};
use pricewatch_storage::HttpFetcher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::reconcile::{ReconcileOutcome, Reconciler};

/// Courtesy pause before every page after the first.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(3);

/// What one cycle did. Logged at the end of the cycle; nothing reads it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub total_pages: Option<u32>,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub candidates: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub aborted: bool,
    pub cancelled: bool,
}

impl CycleSummary {
    fn start(source: &str) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            source: source.to_string(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            total_pages: None,
            pages_fetched: 0,
            pages_failed: 0,
            candidates: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            aborted: false,
            cancelled: false,
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns `false` when cancelled.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Periodic crawl of one source.
///
/// Each cycle fetches page 1, learns the item total from it, then walks pages
/// `2..=total_pages` in ascending order with a fixed delay before each. A failing
/// page is logged and skipped; only a failing first page aborts the cycle. After a
/// cycle the runner sleeps for the source interval and starts over.
pub struct TaskRunner {
    descriptor: TaskDescriptor,
    adapter: Box<dyn SourceAdapter>,
    http: Arc<HttpFetcher>,
    reconciler: Reconciler,
    page_delay: Duration,
}

impl TaskRunner {
    pub fn new(
        descriptor: TaskDescriptor,
        adapter: Box<dyn SourceAdapter>,
        http: Arc<HttpFetcher>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            descriptor,
            adapter,
            http,
            reconciler,
            page_delay: DEFAULT_PAGE_DELAY,
        }
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    /// Run cycles until `cancel` fires. Cancellation is observed between pages and
    /// during the interval sleep; an in-flight request is allowed to finish.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            source = %self.descriptor.name,
            kind = self.adapter.kind().as_str(),
            interval_secs = self.descriptor.interval_secs,
            page_size = self.descriptor.page_size,
            "task runner started"
        );

        loop {
            let summary = self.run_cycle(&cancel).await;
            if summary.cancelled || cancel.is_cancelled() {
                break;
            }

            debug!(
                source = %self.descriptor.name,
                sleep_secs = self.descriptor.interval_secs,
                "sleeping until next cycle"
            );
            if !pause(&cancel, self.descriptor.interval()).await {
                break;
            }
        }

        info!(source = %self.descriptor.name, "task runner stopped");
    }

    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleSummary {
        let mut summary = CycleSummary::start(&self.descriptor.name);
        let span = info_span!(
            "sync_cycle",
            source = %self.descriptor.name,
            cycle_id = %summary.cycle_id
        );

        async {
            let started = Instant::now();
            self.walk_pages(cancel, &mut summary).await;
            summary.elapsed = started.elapsed();

            if summary.aborted {
                warn!(elapsed_ms = summary.elapsed.as_millis() as u64, "cycle aborted");
            } else {
                info!(
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    total_pages = ?summary.total_pages,
                    pages_fetched = summary.pages_fetched,
                    pages_failed = summary.pages_failed,
                    candidates = summary.candidates,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    cancelled = summary.cancelled,
                    "cycle finished"
                );
            }
        }
        .instrument(span)
        .await;

        summary
    }

    async fn walk_pages(&self, cancel: &CancellationToken, summary: &mut CycleSummary) {
        let first = match self.adapter.first_page(&self.http, &self.descriptor).await {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(page = 1, error = %err, "first page failed");
                summary.pages_failed += 1;
                summary.aborted = true;
                return;
            }
        };
        summary.pages_fetched += 1;
        self.reconcile_page(1, &first.candidates, summary).await;

        let Some(total_count) = first.total_count else {
            debug!("item total unknown, stopping after first page");
            return;
        };
        let total_pages = self.descriptor.total_pages(total_count);
        summary.total_pages = Some(total_pages);
        debug!(total_count, total_pages, "planned pages");

        for page in 2..=total_pages {
            if !pause(cancel, self.page_delay).await {
                info!(page, "cancelled before page");
                summary.cancelled = true;
                return;
            }

            match self.adapter.page(&self.http, &self.descriptor, page).await {
                Ok(candidates) => {
                    summary.pages_fetched += 1;
                    self.reconcile_page(page, &candidates, summary).await;
                }
                Err(err) => {
                    warn!(page, error = %err, "page failed, continuing");
                    summary.pages_failed += 1;
                }
            }
        }
    }

    async fn reconcile_page(
        &self,
        page: u32,
        candidates: &[CandidateRecord],
        summary: &mut CycleSummary,
    ) {
        summary.candidates += candidates.len();
        for candidate in candidates {
            match self.reconciler.reconcile(candidate, &self.descriptor.name).await {
                Ok(ReconcileOutcome::Inserted) => summary.inserted += 1,
                Ok(ReconcileOutcome::Updated { .. }) => summary.updated += 1,
                Ok(ReconcileOutcome::Skipped) => summary.skipped += 1,
                Err(err) => {
                    warn!(page, url = %candidate.url, error = %err, "reconcile failed");
                    summary.failed += 1;
                }
            }
        }
        debug!(page, candidates = candidates.len(), "page reconciled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use pricewatch_core::PaginationPolicy;
    use pricewatch_storage::{CatalogStore, MemoryCatalogStore};

    use crate::test_support::{http, BrokenStore, ScriptedAdapter};

    fn paced_runner(
        adapter: ScriptedAdapter,
        pagination: PaginationPolicy,
        store: Arc<dyn CatalogStore>,
        page_delay: Duration,
    ) -> (TaskRunner, Arc<Mutex<Vec<u32>>>) {
        let requested = adapter.requested();
        let descriptor = TaskDescriptor::new("Scripted", 3600, 35).with_pagination(pagination);
        let runner = TaskRunner::new(descriptor, Box::new(adapter), http(), Reconciler::new(store))
            .with_page_delay(page_delay);
        (runner, requested)
    }

    fn runner(
        adapter: ScriptedAdapter,
        pagination: PaginationPolicy,
        store: Arc<dyn CatalogStore>,
    ) -> (TaskRunner, Arc<Mutex<Vec<u32>>>) {
        paced_runner(adapter, pagination, store, Duration::ZERO)
    }

    /// Pages requested so far, read once the paused clock reaches `start + secs`.
    async fn requested_at(
        start: tokio::time::Instant,
        secs: f64,
        requested: &Mutex<Vec<u32>>,
    ) -> Vec<u32> {
        tokio::time::sleep_until(start + Duration::from_secs_f64(secs)).await;
        requested.lock().unwrap().clone()
    }

    fn seventy_items() -> ScriptedAdapter {
        ScriptedAdapter::default()
            .with_page(1, Some(70), &["https://shop.example/p/1"])
            .with_page(2, Some(70), &["https://shop.example/p/2"])
    }

    #[tokio::test]
    async fn over_fetch_requests_trailing_page() {
        let store = Arc::new(MemoryCatalogStore::new());
        let (runner, requested) =
            runner(seventy_items(), PaginationPolicy::OverFetch, store.clone());

        let summary = runner.run_cycle(&CancellationToken::new()).await;
        assert_eq!(*requested.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(summary.total_pages, Some(3));
        assert_eq!(summary.pages_fetched, 3);
        assert_eq!(summary.inserted, 2);
        assert!(!summary.aborted);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn exact_pagination_stops_at_last_full_page() {
        let store = Arc::new(MemoryCatalogStore::new());
        let (runner, requested) = runner(seventy_items(), PaginationPolicy::Exact, store);

        let summary = runner.run_cycle(&CancellationToken::new()).await;
        assert_eq!(*requested.lock().unwrap(), vec![1, 2]);
        assert_eq!(summary.total_pages, Some(2));
    }

    #[tokio::test]
    async fn failing_middle_page_does_not_stop_the_cycle() {
        let adapter = ScriptedAdapter::default()
            .with_page(1, Some(140), &["https://shop.example/p/1"])
            .with_page(2, None, &["https://shop.example/p/2"])
            .with_page(3, None, &["https://shop.example/p/3"])
            .with_page(4, None, &["https://shop.example/p/4"])
            .with_page(5, None, &["https://shop.example/p/5"])
            .failing_on(3);
        let store = Arc::new(MemoryCatalogStore::new());
        let (runner, requested) = runner(adapter, PaginationPolicy::OverFetch, store.clone());

        let summary = runner.run_cycle(&CancellationToken::new()).await;
        assert_eq!(*requested.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(summary.pages_failed, 1);
        assert_eq!(summary.pages_fetched, 4);
        assert!(!summary.aborted);

        let urls: Vec<_> = store.snapshot().into_iter().map(|i| i.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://shop.example/p/1",
                "https://shop.example/p/2",
                "https://shop.example/p/4",
                "https://shop.example/p/5",
            ]
        );
    }

    #[tokio::test]
    async fn first_page_failure_aborts_cycle() {
        let adapter = seventy_items().failing_on(1);
        let store = Arc::new(MemoryCatalogStore::new());
        let (runner, requested) = runner(adapter, PaginationPolicy::OverFetch, store.clone());

        let summary = runner.run_cycle(&CancellationToken::new()).await;
        assert!(summary.aborted);
        assert_eq!(*requested.lock().unwrap(), vec![1]);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unknown_total_fetches_first_page_only() {
        let adapter = ScriptedAdapter::default()
            .with_page(1, None, &["https://shop.example/p/1", ""])
            .with_page(2, None, &["https://shop.example/p/2"]);
        let store = Arc::new(MemoryCatalogStore::new());
        let (runner, requested) = runner(adapter, PaginationPolicy::OverFetch, store.clone());

        let summary = runner.run_cycle(&CancellationToken::new()).await;
        assert_eq!(*requested.lock().unwrap(), vec![1]);
        assert_eq!(summary.total_pages, None);
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn store_errors_are_counted_per_candidate() {
        let (runner, requested) =
            runner(seventy_items(), PaginationPolicy::Exact, Arc::new(BrokenStore));

        let summary = runner.run_cycle(&CancellationToken::new()).await;
        assert_eq!(*requested.lock().unwrap(), vec![1, 2]);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.inserted, 0);
        assert!(!summary.aborted);
    }

    #[tokio::test]
    async fn cancelled_cycle_stops_before_next_page() {
        let store = Arc::new(MemoryCatalogStore::new());
        let (runner, requested) = runner(seventy_items(), PaginationPolicy::OverFetch, store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = runner.run_cycle(&cancel).await;
        assert!(summary.cancelled);
        assert_eq!(*requested.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn cancellation_interrupts_interval_sleep() {
        let store = Arc::new(MemoryCatalogStore::new());
        let (runner, requested) = runner(seventy_items(), PaginationPolicy::Exact, store.clone());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(runner.run(cancel.clone()));

        // First cycle finishes quickly; the runner then sleeps for an hour.
        tokio::time::timeout(Duration::from_secs(5), async {
            while store.len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("first cycle completes");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner stops promptly")
            .unwrap();
        assert_eq!(*requested.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn pages_wait_for_the_delay_and_cycles_repeat_after_interval() {
        let store = Arc::new(MemoryCatalogStore::new());
        let (runner, requested) = paced_runner(
            seventy_items(),
            PaginationPolicy::OverFetch,
            store.clone(),
            DEFAULT_PAGE_DELAY,
        );
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(runner.run(cancel.clone()));

        assert_eq!(requested_at(start, 2.9, &requested).await, vec![1]);
        assert_eq!(requested_at(start, 3.1, &requested).await, vec![1, 2]);
        assert_eq!(requested_at(start, 5.9, &requested).await, vec![1, 2]);
        assert_eq!(requested_at(start, 6.1, &requested).await, vec![1, 2, 3]);
        assert_eq!(requested_at(start, 3605.9, &requested).await, vec![1, 2, 3]);
        assert_eq!(requested_at(start, 3606.1, &requested).await, vec![1, 2, 3, 1]);
        assert_eq!(store.len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn partially_failed_cycle_still_waits_full_interval() {
        let store = Arc::new(MemoryCatalogStore::new());
        let (runner, requested) = paced_runner(
            seventy_items().failing_on(2),
            PaginationPolicy::OverFetch,
            store,
            DEFAULT_PAGE_DELAY,
        );
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(runner.run(cancel.clone()));

        assert_eq!(requested_at(start, 3.1, &requested).await, vec![1, 2]);
        assert_eq!(requested_at(start, 6.1, &requested).await, vec![1, 2, 3]);
        assert_eq!(requested_at(start, 3605.9, &requested).await, vec![1, 2, 3]);
        assert_eq!(requested_at(start, 3606.1, &requested).await, vec![1, 2, 3, 1]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_cycle_retries_after_interval() {
        let store = Arc::new(MemoryCatalogStore::new());
        let (runner, requested) = paced_runner(
            seventy_items().failing_on(1),
            PaginationPolicy::OverFetch,
            store.clone(),
            DEFAULT_PAGE_DELAY,
        );
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(runner.run(cancel.clone()));

        assert_eq!(requested_at(start, 3.1, &requested).await, vec![1]);
        assert_eq!(requested_at(start, 3599.9, &requested).await, vec![1]);
        assert_eq!(requested_at(start, 3600.1, &requested).await, vec![1, 1]);
        assert!(store.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
