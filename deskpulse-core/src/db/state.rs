//! Typed access to process-wide durable state
//!
//! Everything that must survive a restart besides the session log itself:
//! the credential, the sync cursor, backlog bookkeeping, account identifiers
//! and remote policy values. Values are stored as text in `local_state`.

use super::repo::Database;
use crate::error::Result;
use crate::types::{AccountIds, ActivityPolicy, BacklogState};

pub const KEY_API_TOKEN: &str = "account.api_token";
pub const KEY_USER_ID: &str = "account.user_id";
pub const KEY_ROOT_GROUP_ID: &str = "account.root_group_id";
pub const KEY_PRIMARY_GROUP_ID: &str = "account.primary_group_id";
pub const KEY_LAST_SYNCED_END_TIME: &str = "sync.last_synced_end_time";
pub const KEY_LAST_BATCH_FULL: &str = "sync.last_batch_full";
pub const KEY_FOLLOW_UP_COUNT: &str = "sync.follow_up_count";

/// Namespace for remote policy values
pub const POLICY_PREFIX: &str = "policy.";

/// Policy: when true only "computer activity" is reported
pub const POLICY_DONT_COLLECT_ACTIVITY: &str = "dontCollectComputerActivity";
/// Policy: when true window titles and website domains are reported
pub const POLICY_COLLECT_WINDOW_TITLES: &str = "collectWindowTitles";

/// Parse a policy value the way the remote settings API encodes booleans.
pub fn parse_policy_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_i64(key: &str, value: Option<String>) -> Option<i64> {
    let value = value?;
    match value.trim().parse::<i64>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "Ignoring non-numeric state value");
            None
        }
    }
}

impl Database {
    // ============================================
    // Credential
    // ============================================

    /// Stored API token, if any (may be empty)
    pub fn api_token(&self) -> Result<Option<String>> {
        self.get_state(KEY_API_TOKEN)
    }

    pub fn set_api_token(&self, token: &str) -> Result<()> {
        self.set_state(KEY_API_TOKEN, token.trim())
    }

    pub fn clear_api_token(&self) -> Result<()> {
        self.delete_state(KEY_API_TOKEN)
    }

    // ============================================
    // Sync cursor
    // ============================================

    /// End time of the last acknowledged session (0 when nothing was synced)
    pub fn sync_cursor(&self) -> Result<i64> {
        Ok(parse_i64(KEY_LAST_SYNCED_END_TIME, self.get_state(KEY_LAST_SYNCED_END_TIME)?)
            .unwrap_or(0))
    }

    /// Move the cursor forward to `end_time`.
    ///
    /// The cursor never moves backwards; the stored value is returned.
    pub fn advance_sync_cursor(&self, end_time: i64) -> Result<i64> {
        let current = self.sync_cursor()?;
        if end_time <= current {
            return Ok(current);
        }
        self.set_state(KEY_LAST_SYNCED_END_TIME, &end_time.to_string())?;
        Ok(end_time)
    }

    // ============================================
    // Backlog
    // ============================================

    pub fn backlog_state(&self) -> Result<BacklogState> {
        let last_batch_was_full = self
            .get_state(KEY_LAST_BATCH_FULL)?
            .map(|v| parse_policy_bool(&v))
            .unwrap_or(false);
        let consecutive_full_batch_count =
            parse_i64(KEY_FOLLOW_UP_COUNT, self.get_state(KEY_FOLLOW_UP_COUNT)?)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0);
        Ok(BacklogState {
            last_batch_was_full,
            consecutive_full_batch_count,
        })
    }

    pub fn set_backlog_state(&self, state: &BacklogState) -> Result<()> {
        self.set_states(&[
            (KEY_LAST_BATCH_FULL, state.last_batch_was_full.to_string()),
            (
                KEY_FOLLOW_UP_COUNT,
                state.consecutive_full_batch_count.to_string(),
            ),
        ])
    }

    // ============================================
    // Account
    // ============================================

    /// Account identifiers, once an account fetch has succeeded
    pub fn account_ids(&self) -> Result<Option<AccountIds>> {
        let user_id = parse_i64(KEY_USER_ID, self.get_state(KEY_USER_ID)?);
        let root_group_id = parse_i64(KEY_ROOT_GROUP_ID, self.get_state(KEY_ROOT_GROUP_ID)?);
        let primary_group_id =
            parse_i64(KEY_PRIMARY_GROUP_ID, self.get_state(KEY_PRIMARY_GROUP_ID)?);

        Ok(match (user_id, root_group_id, primary_group_id) {
            (Some(user_id), Some(root_group_id), Some(primary_group_id)) => Some(AccountIds {
                user_id,
                root_group_id,
                primary_group_id,
            }),
            _ => None,
        })
    }

    pub fn set_account_ids(&self, ids: &AccountIds) -> Result<()> {
        self.set_states(&[
            (KEY_USER_ID, ids.user_id.to_string()),
            (KEY_ROOT_GROUP_ID, ids.root_group_id.to_string()),
            (KEY_PRIMARY_GROUP_ID, ids.primary_group_id.to_string()),
        ])
    }

    // ============================================
    // Policies
    // ============================================

    /// Raw policy value as received from the server
    pub fn policy(&self, name: &str) -> Result<Option<String>> {
        self.get_state(&format!("{}{}", POLICY_PREFIX, name))
    }

    pub fn set_policy(&self, name: &str, value: &str) -> Result<()> {
        self.set_state(&format!("{}{}", POLICY_PREFIX, name), value)
    }

    /// Store a whole policy response in one transaction
    pub fn set_policies(&self, policies: &[(String, String)]) -> Result<()> {
        let keys: Vec<String> = policies
            .iter()
            .map(|(name, _)| format!("{}{}", POLICY_PREFIX, name))
            .collect();
        let entries: Vec<(&str, String)> = keys
            .iter()
            .zip(policies)
            .map(|(key, (_, value))| (key.as_str(), value.clone()))
            .collect();
        self.set_states(&entries)
    }

    /// All stored policies as `(name, value)` pairs
    pub fn policies(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .states_with_prefix(POLICY_PREFIX)?
            .into_iter()
            .map(|(key, value)| (key[POLICY_PREFIX.len()..].to_string(), value))
            .collect())
    }

    /// Payload-shaping flags, read fresh at send time
    pub fn activity_policy(&self) -> Result<ActivityPolicy> {
        let dont_collect = self
            .policy(POLICY_DONT_COLLECT_ACTIVITY)?
            .map(|v| parse_policy_bool(&v))
            .unwrap_or(false);
        let collect_titles = self
            .policy(POLICY_COLLECT_WINDOW_TITLES)?
            .map(|v| parse_policy_bool(&v))
            .unwrap_or(false);
        Ok(ActivityPolicy {
            collect_activity: !dont_collect,
            collect_window_titles: collect_titles,
        })
    }
}
