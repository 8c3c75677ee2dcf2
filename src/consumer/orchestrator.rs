//! Polling orchestrator
//!
//! One cooperative control loop per process. A round visits every source in
//! registration order, one at a time:
//!
//! ```text
//! IDLE ─┬─> RATE_LIMITED (skip)
//!       ├─> LOCK_CONTENDED (skip)
//!       └─> FETCHING ─> PROCESSING ─> COMMITTED | FAILED ─> LOCK_RELEASED
//! ```
//!
//! Every path ends back in IDLE; a failed source carries nothing into the
//! next round except its unchanged cursor.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::clock::{Clock, SystemClock};
use super::error::ConsumerError;
use super::lock::{LockLease, LockService, DEFAULT_LOCK_TTL};
use super::rate_limit::RequestTimeStore;
use super::source::EventSource;
use super::storage::EventStorage;
use super::types::{BatchSummary, RoundReport, SourceOutcome};

/// Timing knobs for the polling loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Minimum time between fetch attempts for the same source
    pub min_request_interval: Duration,
    /// Lock lifetime; bounds how long a crashed holder blocks a (source, cursor) pair
    pub lock_ttl: Duration,
    /// Pause after each round
    pub round_delay: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            min_request_interval: Duration::from_millis(200),
            lock_ttl: DEFAULT_LOCK_TTL,
            round_delay: Duration::from_secs(1),
        }
    }
}

/// Lock key binding a source to the cursor value seen at acquisition time
pub fn lock_key(source_name: &str, cursor: i64) -> String {
    format!("{}:{}", source_name, cursor)
}

pub struct EventConsumer {
    sources: Vec<Arc<dyn EventSource>>,
    storage: Arc<dyn EventStorage>,
    locks: Arc<dyn LockService>,
    request_times: Arc<dyn RequestTimeStore>,
    clock: Arc<dyn Clock>,
    settings: ConsumerSettings,
    shutdown: CancellationToken,
}

impl EventConsumer {
    pub fn new(
        storage: Arc<dyn EventStorage>,
        locks: Arc<dyn LockService>,
        request_times: Arc<dyn RequestTimeStore>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            sources: Vec::new(),
            storage,
            locks,
            request_times,
            clock: Arc::new(SystemClock),
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn register_source(&mut self, source: Arc<dyn EventSource>) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[Arc<dyn EventSource>] {
        &self.sources
    }

    /// Cancel this token to stop `run` between sources or during the round delay
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Poll all sources until shutdown is requested
    ///
    /// Returns immediately if no sources are registered.
    pub async fn run(&self) {
        if self.sources.is_empty() {
            warn!("No event sources configured. Consumer will exit.");
            return;
        }

        info!("🚀 Starting event consumer with {} sources", self.sources.len());
        info!("   ├─ Min request interval: {:?}", self.settings.min_request_interval);
        info!("   ├─ Lock TTL: {:?}", self.settings.lock_ttl);
        info!("   └─ Round delay: {:?}", self.settings.round_delay);

        let mut rounds = 0u64;
        while !self.shutdown.is_cancelled() {
            let report = self.run_one_round().await;
            rounds += 1;

            if report.cancelled {
                break;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.round_delay) => {}
            }
        }

        info!("✅ Event consumer stopped after {} rounds", rounds);
    }

    /// Visit every registered source once
    ///
    /// Failures are contained per source; the report lists what happened to
    /// each one in registration order.
    pub async fn run_one_round(&self) -> RoundReport {
        let mut report = RoundReport::default();

        for source in &self.sources {
            if self.shutdown.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let outcome = self.poll_source(source).await;
            if outcome == SourceOutcome::Cancelled {
                report.cancelled = true;
            }
            report.outcomes.push((source.name().to_string(), outcome));

            if report.cancelled {
                break;
            }
        }

        report
    }

    async fn poll_source(&self, source: &Arc<dyn EventSource>) -> SourceOutcome {
        let source_name = source.name();
        let now = self.clock.now_millis();

        let last_request = match self.request_times.get_last_request_time(source_name).await {
            Ok(ts) => ts,
            Err(e) => return self.fail(source_name, ConsumerError::from(e)),
        };

        if now.saturating_sub(last_request) < duration_millis(self.settings.min_request_interval) {
            debug!("Skipping source {} due to rate limiting", source_name);
            return SourceOutcome::RateLimited;
        }

        let cursor = match self.storage.get_cursor(source_name).await {
            Ok(cursor) => cursor,
            Err(e) => return self.fail(source_name, ConsumerError::from(e)),
        };

        let lock_key = lock_key(source_name, cursor);
        let lease = match self.locks.acquire(&lock_key, self.settings.lock_ttl).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                debug!("Could not acquire lock for {}, skipping", lock_key);
                return SourceOutcome::LockContended { lock_key };
            }
            Err(e) => {
                warn!("⚠️  Lock backend unavailable for {}, skipping: {}", lock_key, e);
                return SourceOutcome::LockUnavailable {
                    lock_key,
                    reason: e.to_string(),
                };
            }
        };

        let outcome = self.process_claimed(source, cursor, now).await;
        self.release(&lease).await;
        outcome
    }

    /// Everything between acquiring and releasing the lock
    async fn process_claimed(
        &self,
        source: &Arc<dyn EventSource>,
        cursor: i64,
        now: i64,
    ) -> SourceOutcome {
        let source_name = source.name();

        // Counted before the fetch so a slow or failing source is still throttled
        if let Err(e) = self.request_times.update_last_request_time(source_name, now).await {
            return self.fail(source_name, ConsumerError::from(e));
        }

        // Own task per source: a panic inside fetch/store stays with this source
        let mut task = tokio::spawn(fetch_and_store(
            Arc::clone(source),
            Arc::clone(&self.storage),
            cursor,
        ));

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = self.shutdown.cancelled() => {
                warn!("⚠️  Shutdown requested while polling {}, abandoning fetch", source_name);
                // Abort only lands at the task's next yield; wait for it to
                // stop so no write outlives the lock
                task.abort();
                let _ = task.await;
                return SourceOutcome::Cancelled;
            }
        };

        match joined {
            Ok(Ok(summary)) => SourceOutcome::Committed(summary),
            Ok(Err(e)) => self.fail(source_name, e),
            Err(join_error) => self.fail(source_name, ConsumerError::Task(join_error.to_string())),
        }
    }

    async fn release(&self, lease: &LockLease) {
        match self.locks.release(lease).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("⚠️  Lock {} expired or changed hands before release", lease.key);
            }
            Err(e) => {
                error!("❌ Failed to release lock {}: {}", lease.key, e);
            }
        }
    }

    fn fail(&self, source_name: &str, error: ConsumerError) -> SourceOutcome {
        error!("❌ Error fetching events from {}: {}", source_name, error);
        SourceOutcome::Failed {
            error: error.to_string(),
        }
    }
}

/// Fetch after `cursor`, store the new events, then advance the cursor
///
/// Events with `id <= cursor` are dropped with a warning. The cursor is only
/// written when at least one newer event was stored.
async fn fetch_and_store(
    source: Arc<dyn EventSource>,
    storage: Arc<dyn EventStorage>,
    cursor: i64,
) -> Result<BatchSummary, ConsumerError> {
    let source_name = source.name();
    let events = source.fetch_events(cursor).await?;
    info!("Fetched {} events from {}", events.len(), source_name);

    let mut summary = BatchSummary {
        fetched: events.len(),
        cursor_before: cursor,
        cursor_after: cursor,
        ..BatchSummary::default()
    };

    let mut max_id = cursor;
    for event in &events {
        let event_id = event.id();
        if event_id <= cursor {
            warn!(
                "Skipping out-of-order or duplicate event ID: {} from {}",
                event_id, source_name
            );
            summary.dropped_ids.push(event_id);
            continue;
        }

        storage.store_event(event).await?;
        summary.stored += 1;
        max_id = max_id.max(event_id);
    }

    if max_id > cursor {
        storage.save_cursor(source_name, max_id).await?;
        summary.cursor_after = max_id;
    }

    Ok(summary)
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
