//! Session recorder
//!
//! Connects the [`SessionBuilder`] to the durable log. Finalized sessions that
//! fail to persist stay in an in-memory FIFO and are retried, in order, before
//! anything newer is written.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Notify;

use super::builder::SessionBuilder;
use crate::db::Database;
use crate::error::StoreError;
use crate::types::{RawEvent, Session};

/// What one recorder call did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    /// Session finalized by this call, if any
    pub finalized: Option<Session>,
    /// Sessions written to the log during this call (buffered ones included)
    pub persisted: usize,
    /// Sessions still waiting in memory after this call
    pub buffered: usize,
}

pub struct SessionRecorder {
    builder: SessionBuilder,
    db: Arc<Database>,
    pending: VecDeque<Session>,
    sync_trigger: Option<Arc<Notify>>,
}

impl SessionRecorder {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            builder: SessionBuilder::new(),
            db,
            pending: VecDeque::new(),
            sync_trigger: None,
        }
    }

    /// Request an on-demand sync whenever the user returns from idle.
    pub fn with_sync_trigger(mut self, trigger: Arc<Notify>) -> Self {
        self.sync_trigger = Some(trigger);
        self
    }

    pub fn current(&self) -> Option<&Session> {
        self.builder.current()
    }

    /// Sessions finalized but not yet persisted
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed one raw event through the builder and persist what it finalizes.
    pub fn observe(&mut self, event: &RawEvent) -> RecordOutcome {
        let finalized = self.builder.observe(event);
        self.record(finalized)
    }

    /// Tracking stopped: close the open session at `at` and persist it.
    pub fn stop(&mut self, at: i64) -> RecordOutcome {
        let finalized = self.builder.stop(at);
        self.record(finalized)
    }

    /// Retry buffered sessions; returns how many were written.
    pub fn flush_pending(&mut self) -> usize {
        let mut written = 0;

        while let Some(session) = self.pending.front() {
            match self.db.append_session(session) {
                Ok(id) => {
                    tracing::debug!(
                        id,
                        app = %session.application_name,
                        duration_ms = session.duration_ms().unwrap_or_default(),
                        "Session saved"
                    );
                    self.pending.pop_front();
                    written += 1;
                }
                Err(StoreError::InvalidSession(reason)) => {
                    // Retrying can never succeed; keep the queue moving
                    tracing::error!(
                        reason = %reason,
                        app = %session.application_name,
                        start = session.start_time,
                        "Discarding malformed session"
                    );
                    self.pending.pop_front();
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        buffered = self.pending.len(),
                        "Session log write failed, keeping sessions in memory"
                    );
                    break;
                }
            }
        }

        written
    }

    fn record(&mut self, finalized: Option<Session>) -> RecordOutcome {
        if let Some(session) = &finalized {
            self.pending.push_back(session.clone());
        }

        let persisted = self.flush_pending();

        if let (Some(session), Some(trigger)) = (&finalized, &self.sync_trigger) {
            if session.is_idle() {
                tracing::debug!("Returned from idle, requesting sync");
                // Only a sync loop waiting right now sees this; none is queued behind a running tick
                trigger.notify_waiters();
            }
        }

        RecordOutcome {
            finalized,
            persisted,
            buffered: self.pending.len(),
        }
    }
}
