//! Parallel series fetching
//!
//! Every metric reference expands to one single-series request per matching
//! tagset. [`ParallelFetcher::fetch_many`] fans the requests out, one task
//! each, gated by a process-wide ticket pool:
//!
//! ```text
//!   fetch_many(requests)
//!        │ spawn one task per request
//!        ▼
//!   ┌─────────┐   acquire ticket    ┌──────────────┐
//!   │ task i  │ ──────────────────▶ │ fetch_single │ ──▶ try_send((i, result))
//!   └─────────┘   or cancellation   └──────────────┘
//!        │
//!        ▼
//!   results land in pre-indexed slots; first error or cancellation wins
//! ```
//!
//! The result channel holds one message per request, so tasks never block
//! on delivery even after the caller has given up. A task that observes
//! cancellation before it holds a ticket never reaches the backend.

use crate::engine::traits::TimeseriesStorage;
use crate::error::{FetchError, FetchErrorKind, QueryError};
use crate::metrics;
use crate::types::{SampleMethod, TaggedMetric, Timerange, Timeseries};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::debug;

// =============================================================================
// Requests
// =============================================================================

/// One series to fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Metric and tagset identifying the series
    pub metric: TaggedMetric,
    /// How raw points fold into slots
    pub sample_method: SampleMethod,
    /// Window and resolution to sample at
    pub timerange: Timerange,
}

// =============================================================================
// Cancellation
// =============================================================================

/// Read side of a request's cancellation signal
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// True once the owner has cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the owner cancels; pending forever if it never does
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // The owner is gone without cancelling
                if *rx.borrow() {
                    return;
                }
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Write side of a cancellation signal
///
/// Dropping the owner cancels, so work spawned for a finished request
/// stops at its next cancellation point.
#[derive(Debug)]
pub struct CancellationOwner {
    tx: watch::Sender<bool>,
}

impl Default for CancellationOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationOwner {
    /// Fresh, uncancelled signal
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Read handle for tasks
    pub fn token(&self) -> Cancellation {
        Cancellation {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Drop for CancellationOwner {
    fn drop(&mut self) {
        self.cancel();
    }
}

// =============================================================================
// Fetch Quota
// =============================================================================

/// Per-request budget of single-series fetches
#[derive(Debug)]
pub struct FetchCounter {
    current: AtomicUsize,
    limit: usize,
}

impl FetchCounter {
    /// Counter allowing `limit` fetches in total
    pub fn new(limit: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            limit,
        }
    }

    /// Reserve `additional` fetches
    ///
    /// The reservation is recorded even when it fails, so every later
    /// reservation fails too.
    pub fn consume(&self, additional: usize) -> Result<(), QueryError> {
        let total = self.current.fetch_add(additional, Ordering::SeqCst) + additional;
        if total > self.limit {
            return Err(QueryError::FetchLimitExceeded {
                total,
                limit: self.limit,
                additional,
            });
        }
        Ok(())
    }

    /// Fetches reserved so far
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Configured limit
    pub fn limit(&self) -> usize {
        self.limit
    }
}

// =============================================================================
// Parallel Fetcher
// =============================================================================

/// Storage wrapper running single-series fetches under a ticket pool
pub struct ParallelFetcher {
    storage: Arc<dyn TimeseriesStorage>,
    tickets: Arc<Semaphore>,
}

impl std::fmt::Debug for ParallelFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelFetcher")
            .field("available_tickets", &self.tickets.available_permits())
            .finish()
    }
}

impl ParallelFetcher {
    /// Allow at most `concurrent_fetches` backend calls at once
    pub fn new(storage: Arc<dyn TimeseriesStorage>, concurrent_fetches: usize) -> Self {
        Self {
            storage,
            tickets: Arc::new(Semaphore::new(concurrent_fetches.max(1))),
        }
    }

    /// Underlying storage
    pub fn storage(&self) -> &Arc<dyn TimeseriesStorage> {
        &self.storage
    }

    /// Tickets not currently held
    pub fn available_tickets(&self) -> usize {
        self.tickets.available_permits()
    }

    /// Fetch every request concurrently, preserving request order
    pub async fn fetch_many(
        &self,
        requests: Vec<FetchRequest>,
        cancel: &Cancellation,
    ) -> Result<Vec<Timeseries>, FetchError> {
        let count = requests.len();
        if count == 0 {
            return Ok(Vec::new());
        }
        debug!(requests = count, "dispatching series fetches");

        let (tx, mut rx) = mpsc::channel(count);
        for (index, request) in requests.into_iter().enumerate() {
            let tx = tx.clone();
            let storage = Arc::clone(&self.storage);
            let tickets = Arc::clone(&self.tickets);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result = fetch_with_ticket(storage, tickets, request, cancel).await;
                let _ = tx.try_send((index, result));
            });
        }
        drop(tx);

        let mut slots: Vec<Option<Timeseries>> = vec![None; count];
        let mut received = 0;
        while received < count {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(FetchError::timeout("fetch cancelled before all series arrived"));
                },
                message = rx.recv() => match message {
                    Some((index, Ok(series))) => {
                        slots[index] = Some(series);
                        received += 1;
                    },
                    Some((_, Err(e))) => {
                        if cancel.is_cancelled() && !e.is_timeout() {
                            return Err(FetchError::timeout("fetch cancelled before all series arrived"));
                        }
                        return Err(e);
                    },
                    None => break,
                },
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| FetchError::io("fetch task ended without a result")))
            .collect()
    }
}

async fn fetch_with_ticket(
    storage: Arc<dyn TimeseriesStorage>,
    tickets: Arc<Semaphore>,
    request: FetchRequest,
    cancel: Cancellation,
) -> Result<Timeseries, FetchError> {
    let timeout = || FetchError::timeout("cancelled while waiting to fetch").with_metric(request.metric.clone());
    let _ticket = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(timeout()),
        ticket = tickets.acquire() => match ticket {
            Ok(ticket) => ticket,
            Err(_) => return Err(FetchError::io("ticket pool closed")),
        },
    };
    if cancel.is_cancelled() {
        return Err(timeout());
    }

    let result = storage.fetch_single(&request).await.and_then(|series| {
        let expected = request.timerange.slots();
        if series.values.len() == expected {
            Ok(series)
        } else {
            Err(FetchError::new(
                FetchErrorKind::InvalidSeries,
                format!("expected {} values but the backend returned {}", expected, series.values.len()),
            )
            .with_metric(request.metric.clone()))
        }
    });
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::SERIES_FETCHES.with_label_values(&[status]).inc();
    result
}
