//! Async driver for one paginated list.
//!
//! [`Pager`] owns a [`Collection`] and a [`PageSource`] and exposes the
//! scroll-to-end operation. The busy flag, cursor and generation all live in
//! the collection; this module adds the I/O, a fetch timeout, metrics and the
//! guarantee that a load future dropped mid-fetch releases the busy flag.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::collection::{Collection, FetchTicket, Keyed, LoadOutcome, LoadSkipped, Page};
use crate::config::ConfigError;
use crate::grouping::{group_runs, Group};
use crate::rpc::{FetchError, Filters, PageRequest};
use crate::{DEFAULT_FETCH_TIMEOUT_MS, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, MAX_TIMEOUT_MS};

/// The RPC side of a list: fetches one page for a request.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    type Item: Keyed + Send;

    async fn fetch(&self, request: &PageRequest) -> Result<Page<Self::Item>, FetchError>;
}

#[derive(Clone, Debug)]
pub struct PagerConfig {
    pub endpoint: String,
    pub page_limit: u32,
    pub fetch_timeout_ms: u64,
}

impl PagerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            page_limit: DEFAULT_PAGE_LIMIT,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                reason: "must not be empty".into(),
            });
        }
        if self.page_limit == 0 || self.page_limit > MAX_PAGE_LIMIT {
            return Err(ConfigError::Invalid {
                field: "page_limit",
                reason: format!("must be in 1..={MAX_PAGE_LIMIT}"),
            });
        }
        if self.fetch_timeout_ms == 0 || self.fetch_timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::Invalid {
                field: "fetch_timeout_ms",
                reason: format!("must be in 1..={MAX_TIMEOUT_MS}"),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct PagerMetrics {
    pub fetches_dispatched: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub guard_drops: AtomicU64,
    pub stale_responses: AtomicU64,
    pub items_merged: AtomicU64,
    pub duplicates_dropped: AtomicU64,
}

impl PagerMetrics {
    pub fn snapshot(&self) -> PagerMetricsSnapshot {
        PagerMetricsSnapshot {
            fetches_dispatched: self.fetches_dispatched.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            guard_drops: self.guard_drops.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
            items_merged: self.items_merged.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagerMetricsSnapshot {
    pub fetches_dispatched: u64,
    pub fetch_failures: u64,
    pub guard_drops: u64,
    pub stale_responses: u64,
    pub items_merged: u64,
    pub duplicates_dropped: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PagerSnapshot<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub next_page: u32,
    pub is_loading: bool,
    pub generation: u64,
}

struct PagerState<T: Keyed> {
    collection: Collection<T>,
    filters: Filters,
}

pub struct Pager<S: PageSource> {
    source: Arc<S>,
    config: PagerConfig,
    state: Mutex<PagerState<S::Item>>,
    metrics: Arc<PagerMetrics>,
}

impl<S: PageSource> Pager<S> {
    pub fn new(source: Arc<S>, config: PagerConfig, filters: Filters) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            state: Mutex::new(PagerState {
                collection: Collection::new(),
                filters,
            }),
            metrics: Arc::new(PagerMetrics::default()),
        })
    }

    pub fn metrics(&self) -> PagerMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn filters(&self) -> Filters {
        self.state().filters.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state().collection.is_busy()
    }

    /// Fetches the next page and merges it.
    ///
    /// A call made while another load is in flight, or after the last page,
    /// returns [`LoadOutcome::Skipped`] without touching the source.
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint))]
    pub async fn load_more(&self) -> LoadOutcome<FetchError> {
        let (ticket, request) = {
            let mut state = self.state();
            match state.collection.begin_load(self.config.page_limit) {
                Ok(ticket) => {
                    let request = PageRequest::new(&self.config.endpoint, ticket, &state.filters);
                    (ticket, request)
                }
                Err(skipped) => {
                    if skipped == LoadSkipped::Busy {
                        self.metrics.guard_drops.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!(reason = ?skipped, "load skipped");
                    return LoadOutcome::Skipped(skipped);
                }
            }
        };

        let mut in_flight = InFlight {
            state: &self.state,
            ticket: Some(ticket),
        };
        self.metrics.fetches_dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(page = ticket.page, generation = ticket.generation, "fetching page");

        let timeout_ms = self.config.fetch_timeout_ms;
        let result = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.source.fetch(&request),
        )
        .await
        .unwrap_or(Err(FetchError::Timeout { timeout_ms }));

        in_flight.disarm();
        let outcome = self.state().collection.complete(ticket, result);
        self.record(&ticket, &outcome);
        outcome
    }

    /// Empties the list, installs `filters` and invalidates any in-flight
    /// load. Returns the new generation.
    #[instrument(skip(self, filters), fields(endpoint = %self.config.endpoint))]
    pub fn reset(&self, filters: Filters) -> u64 {
        let mut state = self.state();
        state.collection.reset();
        state.filters = filters;
        debug!(generation = state.collection.generation(), "list reset");
        state.collection.generation()
    }

    /// Pull-to-refresh: reset with the current filters, then load page one.
    pub async fn refresh(&self) -> LoadOutcome<FetchError> {
        let filters = self.filters();
        self.reset(filters);
        self.load_more().await
    }

    /// Runs `key_of` over the current items.
    pub fn groups<K, F>(&self, key_of: F) -> Vec<Group<K>>
    where
        K: PartialEq,
        F: FnMut(&S::Item) -> K,
    {
        group_runs(self.state().collection.items(), key_of)
    }

    fn record(&self, ticket: &FetchTicket, outcome: &LoadOutcome<FetchError>) {
        match outcome {
            LoadOutcome::Merged {
                added,
                dropped,
                has_more,
            } => {
                self.metrics.items_merged.fetch_add(*added as u64, Ordering::Relaxed);
                self.metrics
                    .duplicates_dropped
                    .fetch_add(*dropped as u64, Ordering::Relaxed);
                debug!(page = ticket.page, added, dropped, has_more, "page merged");
            }
            LoadOutcome::Stale => {
                self.metrics.stale_responses.fetch_add(1, Ordering::Relaxed);
                debug!(
                    page = ticket.page,
                    generation = ticket.generation,
                    "discarding stale page"
                );
            }
            LoadOutcome::Failed { error, terminal } => {
                self.metrics.fetch_failures.fetch_add(1, Ordering::Relaxed);
                warn!(page = ticket.page, terminal, error = %error, "page fetch failed");
            }
            LoadOutcome::Skipped(_) => {}
        }
    }

    fn state(&self) -> MutexGuard<'_, PagerState<S::Item>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> Pager<S>
where
    S: PageSource,
    S::Item: Clone,
{
    pub fn snapshot(&self) -> PagerSnapshot<S::Item> {
        let state = self.state();
        PagerSnapshot {
            items: state.collection.items().to_vec(),
            has_more: state.collection.has_more(),
            next_page: state.collection.cursor(),
            is_loading: state.collection.is_busy(),
            generation: state.collection.generation(),
        }
    }
}

/// Releases the busy flag if the load future is dropped before completing.
struct InFlight<'a, T: Keyed> {
    state: &'a Mutex<PagerState<T>>,
    ticket: Option<FetchTicket>,
}

impl<T: Keyed> InFlight<'_, T> {
    fn disarm(&mut self) {
        self.ticket = None;
    }
}

impl<T: Keyed> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.collection.abandon(ticket);
            debug!(page = ticket.page, "load cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FIRST_PAGE;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::Notify;

    #[derive(Clone, Debug, PartialEq)]
    struct Installment {
        id: u32,
        status: &'static str,
    }

    impl Keyed for Installment {
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }
    }

    fn paid(id: u32) -> Installment {
        Installment { id, status: "paid" }
    }

    fn due(id: u32) -> Installment {
        Installment { id, status: "due" }
    }

    #[derive(Default)]
    struct FakeSource {
        pages: Vec<Vec<Installment>>,
        calls: AtomicUsize,
        requests: Mutex<Vec<PageRequest>>,
        fail: AtomicBool,
        gated: AtomicBool,
        gate: Notify,
    }

    impl FakeSource {
        fn with_pages(pages: Vec<Vec<Installment>>) -> Arc<Self> {
            Arc::new(Self {
                pages,
                ..Default::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn requested_pages(&self) -> Vec<u32> {
            self.requests.lock().unwrap().iter().map(|r| r.page).collect()
        }
    }

    #[async_trait::async_trait]
    impl PageSource for FakeSource {
        type Item = Installment;

        async fn fetch(&self, request: &PageRequest) -> Result<Page<Installment>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());

            if self.gated.load(Ordering::SeqCst) {
                self.gate.notified().await;
            } else {
                tokio::task::yield_now().await;
            }

            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::Network {
                    message: "connection refused".into(),
                });
            }

            let index = (request.page - FIRST_PAGE) as usize;
            let items = self.pages.get(index).cloned().unwrap_or_default();
            Ok(Page::new(items, request.limit))
        }
    }

    fn pager(source: Arc<FakeSource>) -> Pager<FakeSource> {
        let mut config = PagerConfig::new("loans/schedule");
        config.page_limit = 2;
        Pager::new(source, config, Filters::new()).unwrap()
    }

    fn ids(pager: &Pager<FakeSource>) -> Vec<u32> {
        pager.snapshot().items.iter().map(|i| i.id).collect()
    }

    #[tokio::test]
    async fn concurrent_loads_dispatch_one_fetch() {
        let source = FakeSource::with_pages(vec![vec![due(1), due(2)]]);
        let pager = pager(source.clone());

        let (first, second) = tokio::join!(pager.load_more(), pager.load_more());

        assert!(first.is_merged());
        assert_eq!(second, LoadOutcome::Skipped(LoadSkipped::Busy));
        assert_eq!(source.calls(), 1);
        assert_eq!(pager.metrics().guard_drops, 1);
    }

    #[tokio::test]
    async fn pages_accumulate_until_short_batch() {
        let source = FakeSource::with_pages(vec![
            vec![paid(1), paid(2)],
            vec![paid(2), due(3)],
            vec![due(4)],
        ]);
        let pager = pager(source.clone());

        for _ in 0..3 {
            assert!(pager.load_more().await.is_merged());
        }

        assert_eq!(ids(&pager), vec![1, 2, 3, 4]);
        assert_eq!(source.requested_pages(), vec![1, 2, 3]);
        assert!(!pager.snapshot().has_more);
        assert_eq!(
            pager.load_more().await,
            LoadOutcome::Skipped(LoadSkipped::Exhausted)
        );
        assert_eq!(source.calls(), 3);

        let metrics = pager.metrics();
        assert_eq!(metrics.items_merged, 4);
        assert_eq!(metrics.duplicates_dropped, 1);
    }

    #[tokio::test]
    async fn failed_page_is_retried_at_same_cursor() {
        let source = FakeSource::with_pages(vec![vec![due(1), due(2)], vec![due(3)]]);
        let pager = pager(source.clone());
        pager.load_more().await;

        source.fail.store(true, Ordering::SeqCst);
        let outcome = pager.load_more().await;
        assert!(matches!(
            outcome,
            LoadOutcome::Failed {
                terminal: false,
                ..
            }
        ));
        assert_eq!(ids(&pager), vec![1, 2]);
        assert!(!pager.is_loading());

        source.fail.store(false, Ordering::SeqCst);
        pager.load_more().await;
        assert_eq!(source.requested_pages(), vec![1, 2, 2]);
        assert_eq!(ids(&pager), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn first_page_failure_is_terminal() {
        let source = FakeSource::with_pages(vec![]);
        source.fail.store(true, Ordering::SeqCst);
        let pager = pager(source);

        assert!(matches!(
            pager.load_more().await,
            LoadOutcome::Failed { terminal: true, .. }
        ));
    }

    #[tokio::test]
    async fn reset_during_fetch_discards_response() {
        let source = FakeSource::with_pages(vec![vec![due(1), due(2)]]);
        source.gated.store(true, Ordering::SeqCst);
        let pager = pager(source.clone());

        let mut filters = Filters::new();
        filters.insert("branch".into(), "south".into());

        let (outcome, _) = tokio::join!(pager.load_more(), async {
            pager.reset(filters.clone());
            source.gate.notify_one();
        });

        assert_eq!(outcome, LoadOutcome::Stale);
        assert!(pager.snapshot().items.is_empty());
        assert!(!pager.is_loading());
        assert_eq!(pager.filters(), filters);
        assert_eq!(pager.metrics().stale_responses, 1);

        source.gated.store(false, Ordering::SeqCst);
        pager.load_more().await;
        let last = source.requests.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.filters, filters);
        assert_eq!(last.page, FIRST_PAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_load_releases_busy_flag() {
        let source = FakeSource::with_pages(vec![vec![due(1)]]);
        source.gated.store(true, Ordering::SeqCst);
        let pager = pager(source.clone());

        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), pager.load_more()).await;
        assert!(cancelled.is_err());
        assert!(!pager.is_loading());

        source.gated.store(false, Ordering::SeqCst);
        assert!(pager.load_more().await.is_merged());
        assert_eq!(ids(&pager), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_fetch_times_out() {
        let source = FakeSource::with_pages(vec![]);
        source.gated.store(true, Ordering::SeqCst);
        let mut config = PagerConfig::new("leads");
        config.fetch_timeout_ms = 100;
        let pager = Pager::new(source, config, Filters::new()).unwrap();

        match pager.load_more().await {
            LoadOutcome::Failed { error, terminal } => {
                assert_eq!(error, FetchError::Timeout { timeout_ms: 100 });
                assert!(terminal);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(!pager.is_loading());
    }

    #[tokio::test]
    async fn refresh_starts_over_from_first_page() {
        let source = FakeSource::with_pages(vec![vec![due(1), due(2)], vec![due(3)]]);
        let pager = pager(source.clone());
        pager.load_more().await;
        pager.load_more().await;

        assert!(pager.refresh().await.is_merged());
        assert_eq!(ids(&pager), vec![1, 2]);
        assert_eq!(source.requested_pages(), vec![1, 2, 1]);
    }

    #[tokio::test]
    async fn groups_follow_current_items() {
        let source = FakeSource::with_pages(vec![vec![paid(1), paid(2)], vec![due(3)]]);
        let pager = pager(source);
        pager.load_more().await;
        pager.load_more().await;

        let groups = pager.groups(|i| i.status);
        let summary: Vec<_> = groups.iter().map(|g| (g.key, g.count)).collect();
        assert_eq!(summary, vec![("paid", 2), ("due", 1)]);
    }

    #[test]
    fn config_validation() {
        assert!(PagerConfig::new("leads").validate().is_ok());
        assert!(PagerConfig::new(" ").validate().is_err());

        let mut config = PagerConfig::new("leads");
        config.page_limit = MAX_PAGE_LIMIT + 1;
        assert!(config.validate().is_err());

        let mut config = PagerConfig::new("leads");
        config.fetch_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
