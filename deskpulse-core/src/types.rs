//! Core domain types for deskpulse
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **RawEvent** | One focus observation from the platform event source; never persisted |
//! | **Session** | A contiguous time range during which one application/window had focus |
//! | **Idle session** | A Session whose application name is [`IDLE_APP_NAME`] |
//! | **Cursor** | End time of the most recent server-acknowledged session |
//! | **Backlog** | Persisted sessions with `end_time > cursor` |
//!
//! All timestamps are milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};

/// Application name assigned to any session that carries extra info (URL/domain).
pub const INTERNET_APP_NAME: &str = "Internet";

/// Application name the event source uses for user inactivity.
pub const IDLE_APP_NAME: &str = "IDLE";

// ============================================
// Raw events
// ============================================

/// A focus-change observation emitted by the platform event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Executable/process name owning the focused window
    pub process_name: String,
    /// Title of the focused window
    #[serde(default)]
    pub window_title: String,
    /// Extra context, typically the URL of the active browser tab
    #[serde(default)]
    pub extra_info: String,
    /// When the source observed this focus state (ms epoch)
    pub observed_at: i64,
}

impl RawEvent {
    pub fn new(
        process_name: impl Into<String>,
        window_title: impl Into<String>,
        extra_info: impl Into<String>,
        observed_at: i64,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            window_title: window_title.into(),
            extra_info: extra_info.into(),
            observed_at,
        }
    }

    /// Application name after the browser override: anything carrying extra
    /// info is reported as [`INTERNET_APP_NAME`].
    pub fn application_name(&self) -> &str {
        if self.extra_info.is_empty() {
            &self.process_name
        } else {
            INTERNET_APP_NAME
        }
    }
}

// ============================================
// Sessions
// ============================================

/// A timed span of focus on one application/window.
///
/// A session is open while `end_time` is `None`; the builder finalizes it when
/// focus moves elsewhere or tracking stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub application_name: String,
    pub window_title: String,
    pub extra_info: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

impl Session {
    /// Open a session from a raw event, starting at the event's observation time.
    pub fn open_from(event: &RawEvent) -> Self {
        Self {
            application_name: event.application_name().to_string(),
            window_title: event.window_title.clone(),
            extra_info: event.extra_info.clone(),
            start_time: event.observed_at,
            end_time: None,
        }
    }

    /// Whether this session describes the same focus target as `event`.
    pub fn matches(&self, event: &RawEvent) -> bool {
        self.application_name == event.application_name() && self.window_title == event.window_title
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn is_idle(&self) -> bool {
        self.application_name == IDLE_APP_NAME
    }

    /// Duration in milliseconds, if finalized
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// A finalized session as stored in the append-only log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Auto-incremented local row id
    pub id: i64,
    pub application_name: String,
    pub window_title: String,
    pub extra_info: String,
    pub start_time: i64,
    pub end_time: i64,
}

impl PersistedSession {
    pub fn is_idle(&self) -> bool {
        self.application_name == IDLE_APP_NAME
    }

    /// Idle entries never leave the machine. The window check covers sources
    /// that flag idleness through the title instead of the process name.
    pub fn is_idle_entry(&self) -> bool {
        self.application_name == IDLE_APP_NAME || self.window_title == IDLE_APP_NAME
    }
}

// ============================================
// Sync state
// ============================================

/// Drives the immediate follow-up cadence while a backlog drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogState {
    /// The last successfully uploaded batch hit the batch cap
    pub last_batch_was_full: bool,
    /// Immediate follow-up ticks taken since the last non-full batch
    pub consecutive_full_batch_count: u32,
}

/// Remote account identifiers, persisted after an account fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIds {
    pub user_id: i64,
    pub root_group_id: i64,
    pub primary_group_id: i64,
}

/// Remote policy flags that shape the upload payload.
///
/// Evaluated at send time so a policy change applies to the next batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityPolicy {
    /// Send real application names (false: everything is "computer activity")
    pub collect_activity: bool,
    /// Send window titles and website domains
    pub collect_window_titles: bool,
}

impl Default for ActivityPolicy {
    fn default() -> Self {
        Self {
            collect_activity: true,
            collect_window_titles: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internet_override() {
        let event = RawEvent::new("firefox", "Docs", "https://docs.rs/serde", 1);
        assert_eq!(event.application_name(), INTERNET_APP_NAME);

        let event = RawEvent::new("firefox", "Docs", "", 1);
        assert_eq!(event.application_name(), "firefox");
    }

    #[test]
    fn test_session_matches_after_override() {
        let first = RawEvent::new("firefox", "Tab", "https://a.example", 1);
        let session = Session::open_from(&first);
        assert_eq!(session.application_name, INTERNET_APP_NAME);

        // A different browser on the same title still maps to "Internet"
        let other = RawEvent::new("chrome", "Tab", "https://b.example", 2);
        assert!(session.matches(&other));

        let retitled = RawEvent::new("chrome", "Other tab", "https://b.example", 3);
        assert!(!session.matches(&retitled));
    }

    #[test]
    fn test_raw_event_json_defaults() {
        let event: RawEvent =
            serde_json::from_str(r#"{"process_name":"code","observed_at":42}"#).unwrap();
        assert_eq!(event.window_title, "");
        assert_eq!(event.extra_info, "");
        assert_eq!(event.observed_at, 42);
    }

    #[test]
    fn test_idle_entry_detection() {
        let mut session = PersistedSession {
            id: 1,
            application_name: IDLE_APP_NAME.to_string(),
            window_title: String::new(),
            extra_info: String::new(),
            start_time: 0,
            end_time: 10,
        };
        assert!(session.is_idle());
        assert!(session.is_idle_entry());

        session.application_name = "explorer".to_string();
        session.window_title = IDLE_APP_NAME.to_string();
        assert!(!session.is_idle());
        assert!(session.is_idle_entry());
    }

    #[test]
    fn test_default_policy() {
        let policy = ActivityPolicy::default();
        assert!(policy.collect_activity);
        assert!(!policy.collect_window_titles);
    }
}
