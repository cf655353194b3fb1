//! Sync engine
//!
//! One [`SyncEngine::tick`] reads the sessions past the sync cursor, uploads
//! them as a single batch and advances the cursor only once the collector has
//! acknowledged the request. Failures never escape a tick: they are logged and
//! reported, and the same range is retried on the next tick.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::SyncConfig;
use crate::credential::CredentialGate;
use crate::db::Database;
use crate::error::{Error, StoreError};
use crate::types::{BacklogState, PersistedSession};

use super::client::CollectorApi;
use super::payload::UploadForm;

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was already in flight
    Busy,
    /// No credential; nothing was sent
    NotConfigured,
    /// No sessions past the cursor
    NothingPending,
    /// The batch was a single idle session; it stays pending
    IdleSuppressed,
    /// The collector acknowledged the batch
    Uploaded {
        /// Sessions read from the log (idle included)
        batch_len: usize,
        /// Entries actually carried by the request
        sent: usize,
        /// Cursor after the upload
        cursor: i64,
    },
    /// The tick failed; the cursor is unchanged
    Failed { reason: String },
}

/// Result of [`SyncEngine::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub outcome: TickOutcome,
    /// Run another tick right away instead of waiting for the next period
    pub follow_up: bool,
}

impl TickReport {
    fn done(outcome: TickOutcome) -> Self {
        Self {
            outcome,
            follow_up: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, TickOutcome::Failed { .. })
    }
}

/// Sync statistics since the engine was created
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    /// Upload requests acknowledged by the collector
    pub batches_sent: usize,
    /// Activity entries carried by acknowledged requests
    pub entries_sent: usize,
    /// Ticks that ended in a failure
    pub failures: usize,
}

#[derive(Default)]
struct StatsCounters {
    batches_sent: AtomicUsize,
    entries_sent: AtomicUsize,
    failures: AtomicUsize,
}

/// Clears the in-flight flag when the tick ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine<A> {
    api: A,
    db: Arc<Database>,
    credentials: CredentialGate,
    service: String,
    max_batch: usize,
    max_follow_ups: u32,
    in_flight: AtomicBool,
    stats: StatsCounters,
}

impl<A: CollectorApi> SyncEngine<A> {
    pub fn new(api: A, db: Arc<Database>, service: impl Into<String>, config: &SyncConfig) -> Self {
        Self {
            api,
            credentials: CredentialGate::new(db.clone()),
            db,
            service: service.into(),
            max_batch: config.max_batch.max(1),
            max_follow_ups: config.max_follow_ups,
            in_flight: AtomicBool::new(false),
            stats: StatsCounters::default(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            batches_sent: self.stats.batches_sent.load(Ordering::Relaxed),
            entries_sent: self.stats.entries_sent.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    /// Run one sync attempt. At most one attempt is in flight per engine.
    pub async fn tick(&self) -> TickReport {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            tracing::debug!("Sync already in flight, skipping tick");
            return TickReport::done(TickOutcome::Busy);
        };

        let report = self.run_tick().await;
        if let TickOutcome::Failed { reason } = &report.outcome {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(reason = %reason, "Sync tick failed, batch stays pending");
        }
        report
    }

    async fn run_tick(&self) -> TickReport {
        let Some(token) = self.credentials.token() else {
            return TickReport::done(TickOutcome::NotConfigured);
        };

        let cursor = match self.db.sync_cursor() {
            Ok(cursor) => cursor,
            Err(e) => return failed(e),
        };
        let (batch, more) = match self.next_batch(cursor) {
            Ok(next) => next,
            Err(e) => return failed(Error::from(e)),
        };

        let Some(through) = batch.iter().map(|s| s.end_time).max() else {
            self.reset_backlog();
            return TickReport::done(TickOutcome::NothingPending);
        };
        if let [only] = batch.as_slice() {
            if only.is_idle() && !more {
                tracing::debug!(start = only.start_time, "Holding back lone idle session");
                return TickReport::done(TickOutcome::IdleSuppressed);
            }
        }

        let policy = match self.db.activity_policy() {
            Ok(policy) => policy,
            Err(e) => return failed(e),
        };
        let form = UploadForm::build(&token, &self.service, &batch, policy);

        tracing::info!(
            batch = batch.len(),
            entries = form.entry_count(),
            cursor,
            "Uploading activity batch"
        );

        if let Err(e) = self.api.upload_activities(&token, &form).await {
            return failed(e);
        }

        self.acknowledge(&batch, through, more, form.entry_count())
    }

    /// Read the next batch past `cursor`, and whether more sessions wait behind it
    /// (the batch counts as full).
    ///
    /// The cursor will move to the highest end time in the batch, so the batch
    /// never holds a session ending at or after the first row left behind.
    /// Equal end times come from zero-length sessions, lower ones from a clock
    /// that stepped back.
    fn next_batch(&self, cursor: i64) -> Result<(Vec<PersistedSession>, bool), StoreError> {
        let mut batch = self
            .db
            .sessions_since(cursor, self.max_batch.saturating_add(1))?;
        if batch.len() <= self.max_batch {
            return Ok((batch, false));
        }
        let Some(next) = batch.pop() else {
            return Ok((batch, false));
        };

        let before = batch.len();
        batch.retain(|s| s.end_time < next.end_time);
        if batch.len() < before {
            tracing::debug!(
                held = before - batch.len(),
                boundary = next.end_time,
                "Trimming batch at a shared end time"
            );
        }
        if batch.is_empty() {
            // The whole window ends at or after the next row: send that end time in one go
            batch = self.db.sessions_through(cursor, next.end_time)?;
        }
        Ok((batch, true))
    }

    /// Persist the effects of an acknowledged upload.
    fn acknowledge(&self, batch: &[PersistedSession], through: i64, full: bool, sent: usize) -> TickReport {
        self.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.stats.entries_sent.fetch_add(sent, Ordering::Relaxed);

        let cursor = match self.db.advance_sync_cursor(through) {
            Ok(cursor) => cursor,
            Err(e) => {
                // The collector has the batch; resending it later is a duplicate, not a loss
                return failed(e);
            }
        };

        let previous = self.db.backlog_state().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read backlog state");
            BacklogState::default()
        });
        let (backlog, follow_up) = next_backlog(previous, full, self.max_follow_ups);
        if let Err(e) = self.db.set_backlog_state(&backlog) {
            tracing::warn!(error = %e, "Failed to persist backlog state");
        }

        tracing::info!(
            batch = batch.len(),
            sent,
            cursor,
            full,
            follow_up,
            "Activity batch acknowledged"
        );

        TickReport {
            outcome: TickOutcome::Uploaded {
                batch_len: batch.len(),
                sent,
                cursor,
            },
            follow_up,
        }
    }

    fn reset_backlog(&self) {
        match self.db.backlog_state() {
            Ok(state) if state == BacklogState::default() => {}
            Ok(_) => {
                if let Err(e) = self.db.set_backlog_state(&BacklogState::default()) {
                    tracing::warn!(error = %e, "Failed to reset backlog state");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to read backlog state"),
        }
    }
}

/// Backlog state after a successful upload, and whether to follow up at once.
fn next_backlog(previous: BacklogState, full: bool, max_follow_ups: u32) -> (BacklogState, bool) {
    if !full {
        return (BacklogState::default(), false);
    }
    let count = previous.consecutive_full_batch_count.saturating_add(1);
    let state = BacklogState {
        last_batch_was_full: true,
        consecutive_full_batch_count: count,
    };
    (state, count <= max_follow_ups)
}

fn failed(error: Error) -> TickReport {
    TickReport::done(TickOutcome::Failed {
        reason: error.to_string(),
    })
}
