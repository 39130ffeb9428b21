use super::compare::{self, TimeWindow};
use super::error::{AggregateError, StoreError};
use super::event::Event;
use super::metrics::{self, compute_metrics, MetricsResult, PageStats, ReferrerStats};
use super::sessions::group_by_session;
use super::timeseries::{visitor_timeseries, Granularity, TimeBucket};
use std::future::Future;
use std::sync::Arc;

/// Read access to stored events.
///
/// Implementations return every event of `site_id` whose `created_at` lies in
/// `window`, bounds inclusive, in any order. Retries are the store's concern.
pub trait EventStore: Send + Sync {
    fn fetch_events(
        &self,
        site_id: &str,
        window: TimeWindow,
    ) -> impl Future<Output = Result<Vec<Event>, StoreError>> + Send;
}

impl<S: EventStore> EventStore for Arc<S> {
    fn fetch_events(
        &self,
        site_id: &str,
        window: TimeWindow,
    ) -> impl Future<Output = Result<Vec<Event>, StoreError>> + Send {
        self.as_ref().fetch_events(site_id, window)
    }
}

/// Options for [`Aggregator::aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Also aggregate the preceding window and report percentage changes.
    pub include_changes: bool,
    /// Maximum length of the ranked lists.
    pub limit: usize,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            include_changes: false,
            limit: metrics::DEFAULT_LIMIT,
        }
    }
}

/// Entry point for dashboard metrics over an injected event store.
#[derive(Debug, Clone)]
pub struct Aggregator<S> {
    store: S,
}

impl<S: EventStore> Aggregator<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Consolidated metrics for `site_id` over `window`.
    ///
    /// A window without events yields a zero-valued result. Store failures are
    /// returned as [`AggregateError::FetchFailed`] without retrying.
    pub async fn aggregate(
        &self,
        site_id: &str,
        window: TimeWindow,
        options: AggregateOptions,
    ) -> Result<MetricsResult, AggregateError> {
        if options.include_changes {
            return compare::with_changes(&self.store, site_id, window, options.limit).await;
        }
        let events = self.fetch(site_id, window).await?;
        Ok(compute_metrics(&events, options.limit))
    }

    /// Visitors and pageviews bucketed over `window`.
    pub async fn timeseries(
        &self,
        site_id: &str,
        window: TimeWindow,
        granularity: Granularity,
    ) -> Result<Vec<TimeBucket>, AggregateError> {
        let events = self.fetch(site_id, window).await?;
        Ok(visitor_timeseries(&events, &window, granularity))
    }

    pub async fn top_pages(
        &self,
        site_id: &str,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<PageStats>, AggregateError> {
        let events = self.fetch(site_id, window).await?;
        Ok(metrics::top_pages(&group_by_session(&events), limit))
    }

    pub async fn top_referrers(
        &self,
        site_id: &str,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<ReferrerStats>, AggregateError> {
        let events = self.fetch(site_id, window).await?;
        Ok(metrics::top_referrers(&group_by_session(&events), limit))
    }

    async fn fetch(&self, site_id: &str, window: TimeWindow) -> Result<Vec<Event>, AggregateError> {
        let events = self
            .store
            .fetch_events(site_id, window)
            .await
            .map_err(AggregateError::FetchFailed)?;
        tracing::debug!(site_id, events = events.len(), "Fetched events");
        Ok(events)
    }
}
