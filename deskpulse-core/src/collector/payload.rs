//! Upload payload construction
//!
//! Turns a batch of persisted sessions into the URL-encoded form the activity
//! endpoint expects. Policy flags are applied here, at send time, so a policy
//! change affects the next unsynced batch without re-capturing anything.

use chrono::{Local, TimeZone};

use crate::format::{extract_domain, format_api_timestamp_in};
use crate::types::{ActivityPolicy, PersistedSession};

/// Sent instead of an empty application name.
pub const EMPTY_APP_PLACEHOLDER: &str = "explorer2";

/// Sent for every entry when the account disallows activity details.
pub const HIDDEN_ACTIVITY_NAME: &str = "computer activity";

/// Ordered form fields for one upload request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadForm {
    fields: Vec<(String, String)>,
    entries: usize,
}

impl UploadForm {
    /// Build the form with timestamps in local time.
    pub fn build(
        token: &str,
        service: &str,
        batch: &[PersistedSession],
        policy: ActivityPolicy,
    ) -> Self {
        Self::build_in(token, service, batch, policy, &Local)
    }

    /// Build the form with timestamps rendered in `tz`.
    ///
    /// Idle entries are left out; entry indices are contiguous over the
    /// entries that remain.
    pub fn build_in<Tz: TimeZone>(
        token: &str,
        service: &str,
        batch: &[PersistedSession],
        policy: ActivityPolicy,
        tz: &Tz,
    ) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let mut fields = vec![
            ("api_token".to_string(), token.to_string()),
            ("service".to_string(), service.to_string()),
        ];
        let mut entries = 0;

        for session in batch.iter().filter(|s| !s.is_idle_entry()) {
            let base = format!("computer_activities[{}]", entries);
            let mut push = |name: &str, value: String| {
                fields.push((format!("{}[{}]", base, name), value));
            };

            if policy.collect_activity {
                let app_name = if session.application_name.is_empty() {
                    EMPTY_APP_PLACEHOLDER.to_string()
                } else {
                    session.application_name.clone()
                };
                push("application_name", app_name);

                if policy.collect_window_titles {
                    push("window_title", session.window_title.clone());
                    if !session.extra_info.is_empty() {
                        push(
                            "website_domain",
                            extract_domain(&session.extra_info).unwrap_or_default(),
                        );
                    }
                } else {
                    push("window_title", String::new());
                }
            } else {
                push("application_name", HIDDEN_ACTIVITY_NAME.to_string());
                push("window_title", String::new());
            }

            push("start_time", format_api_timestamp_in(session.start_time, tz));
            push("end_time", format_api_timestamp_in(session.end_time, tz));
            entries += 1;
        }

        Self { fields, entries }
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Number of activity entries carried (idle entries excluded)
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    /// Value of the first field named `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}
