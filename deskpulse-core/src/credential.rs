//! Credential gate
//!
//! Every network operation asks the gate for a token first. A missing or empty
//! token means "not configured yet": the caller skips its request quietly.

use std::sync::Arc;

use crate::db::Database;
use crate::logging::redact_token;

#[derive(Clone)]
pub struct CredentialGate {
    db: Arc<Database>,
}

impl CredentialGate {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Current token, re-read from durable state on every call so a login
    /// from another process takes effect on the next tick.
    pub fn token(&self) -> Option<String> {
        match self.db.api_token() {
            Ok(Some(token)) if !token.trim().is_empty() => Some(token),
            Ok(_) => {
                tracing::info!("No API token configured, skipping network work");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read API token");
                None
            }
        }
    }

    pub fn has_valid_credential(&self) -> bool {
        self.token().is_some()
    }

    /// Token suitable for log output
    pub fn describe(&self) -> String {
        match self.db.api_token() {
            Ok(Some(token)) if !token.trim().is_empty() => redact_token(&token),
            _ => "<not set>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> (CredentialGate, Arc<Database>) {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let db = Arc::new(db);
        (CredentialGate::new(db.clone()), db)
    }

    #[test]
    fn test_missing_token_is_not_valid() {
        let (gate, _db) = gate();
        assert!(!gate.has_valid_credential());
        assert_eq!(gate.describe(), "<not set>");
    }

    #[test]
    fn test_empty_token_is_not_valid() {
        let (gate, db) = gate();
        db.set_state(crate::db::state::KEY_API_TOKEN, "   ").unwrap();
        assert!(!gate.has_valid_credential());
    }

    #[test]
    fn test_token_changes_are_seen_immediately() {
        let (gate, db) = gate();
        db.set_api_token("secret-token-1234").unwrap();
        assert_eq!(gate.token().as_deref(), Some("secret-token-1234"));
        assert_eq!(gate.describe(), "****1234");

        db.clear_api_token().unwrap();
        assert!(!gate.has_valid_credential());
    }
}
