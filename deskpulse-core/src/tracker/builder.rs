//! Focus-event coalescing
//!
//! Turns the stream of raw focus observations into finalized sessions. Only
//! one session is open at a time; it is closed by the next observation that
//! names a different `(application, window)` pair, or by [`SessionBuilder::stop`].

use crate::types::{RawEvent, Session};

/// Single-threaded state machine holding the currently open session.
#[derive(Debug, Default)]
pub struct SessionBuilder {
    current: Option<Session>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The open session, if tracking has started
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Feed one observation; returns the session it finalized, if any.
    ///
    /// The event's `observed_at` is the boundary: it ends the previous
    /// session and starts the next one.
    pub fn observe(&mut self, event: &RawEvent) -> Option<Session> {
        let Some(current) = self.current.as_mut() else {
            tracing::debug!(app = %event.application_name(), "First activity detected");
            self.current = Some(Session::open_from(event));
            return None;
        };

        if current.matches(event) {
            return None;
        }

        let mut finished = std::mem::replace(current, Session::open_from(event));
        // end >= start holds even if the source clock stepped backwards
        finished.end_time = Some(event.observed_at.max(finished.start_time));
        Some(finished)
    }

    /// Tracking stopped: finalize the open session at `at`.
    pub fn stop(&mut self, at: i64) -> Option<Session> {
        let mut finished = self.current.take()?;
        finished.end_time = Some(at.max(finished.start_time));
        Some(finished)
    }
}
