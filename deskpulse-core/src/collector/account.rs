//! Account and policy refresh
//!
//! Runs on the sync cadence, after the upload tick. Everything here is best
//! effort: a failed fetch keeps the previously stored values and never blocks
//! session upload.

use std::sync::Arc;

use crate::credential::CredentialGate;
use crate::db::Database;
use crate::types::AccountIds;

use super::client::{CollectorApi, POLICY_KEYS};

/// What one refresh did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AccountReport {
    /// False when no credential was configured and nothing was requested
    pub configured: bool,
    /// Identifiers fetched and stored this round
    pub account: Option<AccountIds>,
    /// Number of policy values stored this round
    pub policies: Option<usize>,
    /// Failures, already logged
    pub errors: Vec<String>,
}

pub struct AccountSync {
    db: Arc<Database>,
    credentials: CredentialGate,
}

impl AccountSync {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            credentials: CredentialGate::new(db.clone()),
            db,
        }
    }

    /// Fetch account identifiers, then the policy set for the primary group.
    pub async fn refresh<A: CollectorApi>(&self, api: &A) -> AccountReport {
        let Some(token) = self.credentials.token() else {
            return AccountReport::default();
        };
        let mut report = AccountReport {
            configured: true,
            ..Default::default()
        };

        match api.fetch_account(&token).await {
            Ok(ids) => match self.db.set_account_ids(&ids) {
                Ok(()) => {
                    tracing::debug!(
                        user_id = ids.user_id,
                        primary_group_id = ids.primary_group_id,
                        "Account identifiers updated"
                    );
                    report.account = Some(ids);
                }
                Err(e) => report.fail("store account", e),
            },
            Err(e) => report.fail("fetch account", e),
        }

        // Fall back to what an earlier round stored
        let primary_group_id = match report.account {
            Some(ids) => Some(ids.primary_group_id),
            None => self.db.account_ids().ok().flatten().map(|ids| ids.primary_group_id),
        };
        let Some(primary_group_id) = primary_group_id.filter(|id| *id > 0) else {
            tracing::debug!("No primary group yet, skipping policy fetch");
            return report;
        };

        match api.fetch_policies(&token, primary_group_id, POLICY_KEYS).await {
            Ok(policies) => match self.db.set_policies(&policies) {
                Ok(()) => {
                    tracing::debug!(count = policies.len(), "Policies updated");
                    report.policies = Some(policies.len());
                }
                Err(e) => report.fail("store policies", e),
            },
            Err(e) => report.fail("fetch policies", e),
        }

        report
    }
}

impl AccountReport {
    fn fail(&mut self, step: &str, error: crate::error::Error) {
        tracing::warn!(step, error = %error, "Account refresh step failed");
        self.errors.push(format!("{}: {}", step, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::payload::UploadForm;
    use crate::db::state::{POLICY_COLLECT_WINDOW_TITLES, POLICY_DONT_COLLECT_ACTIVITY};
    use crate::error::{Error, Result};
    use std::sync::Mutex;

    struct FakeApi {
        account: Result<AccountIds>,
        policies: Result<Vec<(String, String)>>,
        policy_requests: Mutex<Vec<(i64, usize)>>,
    }

    impl FakeApi {
        fn new(account: Result<AccountIds>, policies: Result<Vec<(String, String)>>) -> Self {
            Self {
                account,
                policies,
                policy_requests: Mutex::new(Vec::new()),
            }
        }
    }

    fn clone_result<T: Clone>(result: &Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(Error::PartialData(e.to_string())),
        }
    }

    impl CollectorApi for FakeApi {
        async fn upload_activities(&self, _token: &str, _form: &UploadForm) -> Result<()> {
            Ok(())
        }

        async fn fetch_account(&self, _token: &str) -> Result<AccountIds> {
            clone_result(&self.account)
        }

        async fn fetch_policies(
            &self,
            _token: &str,
            primary_group_id: i64,
            names: &[&str],
        ) -> Result<Vec<(String, String)>> {
            self.policy_requests
                .lock()
                .unwrap()
                .push((primary_group_id, names.len()));
            clone_result(&self.policies)
        }
    }

    fn ids() -> AccountIds {
        AccountIds {
            user_id: 7,
            root_group_id: 1,
            primary_group_id: 42,
        }
    }

    fn setup() -> (AccountSync, Arc<Database>) {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let db = Arc::new(db);
        db.set_api_token("token").unwrap();
        (AccountSync::new(db.clone()), db)
    }

    #[tokio::test]
    async fn test_refresh_stores_account_and_policies() {
        let (sync, db) = setup();
        let api = FakeApi::new(
            Ok(ids()),
            Ok(vec![
                (POLICY_COLLECT_WINDOW_TITLES.to_string(), "true".to_string()),
                ("idletime".to_string(), "300".to_string()),
            ]),
        );

        let report = sync.refresh(&api).await;
        assert!(report.configured);
        assert_eq!(report.account, Some(ids()));
        assert_eq!(report.policies, Some(2));
        assert!(report.errors.is_empty());

        assert_eq!(db.account_ids().unwrap(), Some(ids()));
        assert_eq!(db.policy("idletime").unwrap().as_deref(), Some("300"));
        assert!(db.activity_policy().unwrap().collect_window_titles);
        assert_eq!(*api.policy_requests.lock().unwrap(), vec![(42, POLICY_KEYS.len())]);
    }

    #[tokio::test]
    async fn test_not_configured_requests_nothing() {
        let (sync, db) = setup();
        db.clear_api_token().unwrap();
        let api = FakeApi::new(Ok(ids()), Ok(Vec::new()));

        let report = sync.refresh(&api).await;
        assert_eq!(report, AccountReport::default());
        assert_eq!(db.account_ids().unwrap(), None);
        assert!(api.policy_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_account_keeps_previous_state() {
        let (sync, db) = setup();
        db.set_account_ids(&ids()).unwrap();
        db.set_policy(POLICY_DONT_COLLECT_ACTIVITY, "1").unwrap();

        let api = FakeApi::new(
            Err(Error::PartialData("not json".to_string())),
            Err(Error::Protocol("500".to_string())),
        );
        let report = sync.refresh(&api).await;

        assert_eq!(report.errors.len(), 2);
        assert_eq!(db.account_ids().unwrap(), Some(ids()));
        assert!(!db.activity_policy().unwrap().collect_activity);
        // Stored ids still drive the policy request
        assert_eq!(api.policy_requests.lock().unwrap()[0].0, 42);
    }

    #[tokio::test]
    async fn test_policy_fetch_waits_for_primary_group() {
        let (sync, _db) = setup();
        let api = FakeApi::new(Err(Error::Transport("offline".to_string())), Ok(Vec::new()));

        let report = sync.refresh(&api).await;
        assert_eq!(report.policies, None);
        assert!(api.policy_requests.lock().unwrap().is_empty());
    }
}
