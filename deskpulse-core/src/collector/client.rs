//! HTTP client for the activity collector API
//!
//! Three calls: upload a batch of activities, fetch the account identifiers,
//! and fetch the account's policy settings. The sync engine talks to them
//! through [`CollectorApi`], so tests can stand in a fake collector.

use std::future::Future;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::logging::truncate_for_log;
use crate::types::AccountIds;

use super::payload::UploadForm;

/// Policy keys requested from the settings endpoint.
pub const POLICY_KEYS: &[&str] = &[
    "close_agent",
    "pause_tracking",
    "idletime",
    "logoffline",
    "logofflinemin",
    "offlineallow",
    "offlinecustom",
    "dontCollectComputerActivity",
    "collectWindowTitles",
    "logOnlyActivitiesWithTasks",
    "make_screenshots",
    "group_working_time_limit",
    "tt_window_on_no_task",
    "turnoff_tt_after",
];

/// Remote operations the sync layer depends on.
pub trait CollectorApi: Send + Sync {
    /// Deliver one batch. `Ok` only when the collector acknowledged it.
    fn upload_activities(
        &self,
        token: &str,
        form: &UploadForm,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Fetch the account identifiers for `token`.
    fn fetch_account(&self, token: &str) -> impl Future<Output = Result<AccountIds>> + Send;

    /// Fetch policy values as `(name, value)` pairs.
    fn fetch_policies(
        &self,
        token: &str,
        primary_group_id: i64,
        names: &[&str],
    ) -> impl Future<Output = Result<Vec<(String, String)>>> + Send;
}

/// reqwest-backed collector client
pub struct ActivityClient {
    http_client: reqwest::Client,
    base_url: String,
    service: String,
}

impl ActivityClient {
    /// Create a new client from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("deskpulse/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            service: config.service.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Service identifier sent alongside every request
    pub fn service(&self) -> &str {
        &self.service
    }

    fn upload_url(&self, token: &str) -> String {
        format!(
            "{}/activity/api_token/{}",
            self.base_url,
            urlencoding::encode(token)
        )
    }

    fn account_url(&self, token: &str) -> String {
        format!(
            "{}/user/api_token/{}/format/json",
            self.base_url,
            urlencoding::encode(token)
        )
    }

    fn policies_url(&self, token: &str, primary_group_id: i64) -> String {
        format!(
            "{}/group/{}/setting/api_token/{}/format/json/",
            self.base_url,
            primary_group_id,
            urlencoding::encode(token)
        )
    }

    /// Send a request and return `(status, body)`, mapping transport failures.
    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String)> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response: {}", e.without_url())))?;

        tracing::debug!(
            status = %status,
            body = %truncate_for_log(&body),
            "Collector response"
        );

        Ok((status, body))
    }
}

/// An upload counts as acknowledged only on a 2xx status with an empty body.
fn check_upload_response(status: StatusCode, body: &str) -> Result<()> {
    if !status.is_success() {
        return Err(Error::Protocol(format!(
            "API error ({}): {}",
            status,
            truncate_for_log(body)
        )));
    }
    // The collector rejects with a message in a 200 response
    if !body.trim().is_empty() {
        return Err(Error::Protocol(format!(
            "unexpected response body: {}",
            truncate_for_log(body)
        )));
    }
    Ok(())
}

impl CollectorApi for ActivityClient {
    async fn upload_activities(&self, token: &str, form: &UploadForm) -> Result<()> {
        tracing::debug!(
            entries = form.entry_count(),
            "POST activity batch"
        );

        let request = self.http_client.post(self.upload_url(token)).form(form.fields());
        let (status, body) = self.execute(request).await?;
        check_upload_response(status, &body)
    }

    async fn fetch_account(&self, token: &str) -> Result<AccountIds> {
        let (status, body) = self.execute(self.http_client.get(self.account_url(token))).await?;
        if !status.is_success() {
            return Err(Error::Protocol(format!(
                "API error ({}): {}",
                status,
                truncate_for_log(&body)
            )));
        }
        parse_account(&body)
    }

    async fn fetch_policies(
        &self,
        token: &str,
        primary_group_id: i64,
        names: &[&str],
    ) -> Result<Vec<(String, String)>> {
        let mut query: Vec<(&str, &str)> = vec![("api_token", token), ("service", &self.service)];
        query.extend(names.iter().map(|name| ("name[]", *name)));

        let request = self
            .http_client
            .get(self.policies_url(token, primary_group_id))
            .query(&query);
        let (status, body) = self.execute(request).await?;
        if !status.is_success() {
            return Err(Error::Protocol(format!(
                "API error ({}): {}",
                status,
                truncate_for_log(&body)
            )));
        }
        parse_policies(&body)
    }
}

/// Parse the account response. Ids may arrive as numbers or numeric strings.
pub fn parse_account(body: &str) -> Result<AccountIds> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| Error::PartialData(format!("account response is not JSON: {}", e)))?;
    let object = root
        .as_object()
        .ok_or_else(|| Error::PartialData("account response is not an object".to_string()))?;

    let id = |name: &str| -> Result<i64> {
        let parsed = match object.get(name) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| Error::PartialData(format!("account response lacks numeric {}", name)))
    };

    Ok(AccountIds {
        user_id: id("user_id")?,
        root_group_id: id("root_group_id")?,
        primary_group_id: id("primary_group_id")?,
    })
}

/// Parse the settings response: an array of `{name, value}` objects.
///
/// String values are kept verbatim; other JSON values keep their JSON text.
pub fn parse_policies(body: &str) -> Result<Vec<(String, String)>> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| Error::PartialData(format!("settings response is not JSON: {}", e)))?;
    let items = root
        .as_array()
        .ok_or_else(|| Error::PartialData("settings response is not an array".to_string()))?;

    let mut policies = Vec::with_capacity(items.len());
    for item in items {
        let Some(name) = item.get("name").and_then(Value::as_str) else {
            tracing::warn!(item = %item, "Skipping setting without a name");
            continue;
        };
        let value = match item.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        policies.push((name.to_string(), value));
    }
    Ok(policies)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ActivityClient {
        ActivityClient::new(&ApiConfig {
            base_url: "https://collector.example.com/api/".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_upload_acknowledged_by_empty_success() {
        assert!(check_upload_response(StatusCode::OK, "").is_ok());
        assert!(check_upload_response(StatusCode::NO_CONTENT, "  \n").is_ok());
    }

    #[test]
    fn test_upload_rejected_by_message_body() {
        let err = check_upload_response(StatusCode::OK, "Invalid token").unwrap_err();
        assert!(matches!(err, Error::Protocol(ref msg) if msg.contains("Invalid token")));
    }

    #[test]
    fn test_upload_rejected_by_error_status() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::NOT_FOUND,
            StatusCode::FOUND,
        ] {
            let err = check_upload_response(status, "").unwrap_err();
            assert!(matches!(err, Error::Protocol(ref msg) if msg.contains(status.as_str())));
        }
    }

    #[test]
    fn test_client_requires_valid_config() {
        let config = ApiConfig {
            base_url: String::new(),
            ..Default::default()
        };
        assert!(ActivityClient::new(&config).is_err());
    }

    #[test]
    fn test_urls_strip_trailing_slash_and_encode_token() {
        let client = client();
        assert_eq!(client.base_url(), "https://collector.example.com/api");
        assert_eq!(
            client.upload_url("a/b c"),
            "https://collector.example.com/api/activity/api_token/a%2Fb%20c"
        );
        assert_eq!(
            client.account_url("tok"),
            "https://collector.example.com/api/user/api_token/tok/format/json"
        );
        assert_eq!(
            client.policies_url("tok", 42),
            "https://collector.example.com/api/group/42/setting/api_token/tok/format/json/"
        );
    }

    #[test]
    fn test_parse_account_accepts_strings_and_numbers() {
        let ids = parse_account(r#"{"user_id":"7","root_group_id":1,"primary_group_id":" 42 "}"#)
            .unwrap();
        assert_eq!(
            ids,
            AccountIds {
                user_id: 7,
                root_group_id: 1,
                primary_group_id: 42,
            }
        );
    }

    #[test]
    fn test_parse_account_rejects_malformed_bodies() {
        assert!(matches!(parse_account("<html>"), Err(Error::PartialData(_))));
        assert!(matches!(parse_account("[]"), Err(Error::PartialData(_))));
        assert!(matches!(
            parse_account(r#"{"user_id":"x","root_group_id":1,"primary_group_id":2}"#),
            Err(Error::PartialData(_))
        ));
    }

    #[test]
    fn test_parse_policies() {
        let body = r#"[
            {"name":"idletime","value":"300"},
            {"name":"collectWindowTitles","value":true},
            {"name":"offlinecustom","value":["Meeting","Call"]},
            {"name":"make_screenshots","value":null},
            {"value":"orphan"}
        ]"#;
        let policies = parse_policies(body).unwrap();
        assert_eq!(
            policies,
            vec![
                ("idletime".to_string(), "300".to_string()),
                ("collectWindowTitles".to_string(), "true".to_string()),
                ("offlinecustom".to_string(), r#"["Meeting","Call"]"#.to_string()),
                ("make_screenshots".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_parse_policies_rejects_non_array() {
        assert!(matches!(
            parse_policies(r#"{"error":"denied"}"#),
            Err(Error::PartialData(_))
        ));
    }

    #[test]
    fn test_policy_keys_cover_payload_flags() {
        assert!(POLICY_KEYS.contains(&crate::db::state::POLICY_DONT_COLLECT_ACTIVITY));
        assert!(POLICY_KEYS.contains(&crate::db::state::POLICY_COLLECT_WINDOW_TITLES));
    }
}
