//! Formatting helpers for the collector wire format.

use chrono::{DateTime, Local, TimeZone, Utc};

/// Wire format for activity timestamps: ISO-8601 with a space separator.
pub const API_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a ms-epoch timestamp in local time as `YYYY-MM-DD HH:MM:SS`.
pub fn format_api_timestamp(ms: i64) -> String {
    format_api_timestamp_in(ms, &Local)
}

/// Format a ms-epoch timestamp in the given time zone.
pub fn format_api_timestamp_in<Tz: TimeZone>(ms: i64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let utc = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default();
    utc.with_timezone(tz)
        .format(API_TIMESTAMP_FORMAT)
        .to_string()
}

/// Extract the host from a URL-ish extra-info string.
///
/// Returns `None` when nothing host-like remains.
pub fn extract_domain(extra_info: &str) -> Option<String> {
    let trimmed = extra_info.trim();
    let without_scheme = match trimmed.find("://") {
        Some(idx) => &trimmed[idx + 3..],
        None => trimmed,
    };
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = match host_port.strip_prefix('[') {
        // IPv6 literal
        Some(rest) => rest.split(']').next().unwrap_or_default(),
        None => host_port.split(':').next().unwrap_or_default(),
    };

    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_api_timestamp_utc() {
        // 2021-03-04 05:06:07 UTC
        let ms = 1_614_834_367_000;
        assert_eq!(format_api_timestamp_in(ms, &Utc), "2021-03-04 05:06:07");
    }

    #[test]
    fn test_format_api_timestamp_drops_millis() {
        let ms = 1_614_834_367_999;
        assert_eq!(format_api_timestamp_in(ms, &Utc), "2021-03-04 05:06:07");
    }

    #[test]
    fn test_format_api_timestamp_fixed_offset() {
        let tz = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(
            format_api_timestamp_in(1_614_834_367_000, &tz),
            "2021-03-04 07:06:07"
        );
    }

    #[test]
    fn test_local_format_shape() {
        let formatted = format_api_timestamp(0);
        assert_eq!(formatted.len(), 19);
        assert_eq!(&formatted[10..11], " ");
        assert!(!formatted.contains('T'));
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://Docs.rs/serde/latest?x=1").as_deref(),
            Some("docs.rs")
        );
        assert_eq!(
            extract_domain("http://user:pw@example.com:8080/a").as_deref(),
            Some("example.com")
        );
        assert_eq!(extract_domain("github.com").as_deref(), Some("github.com"));
        assert_eq!(extract_domain("http://[::1]:3000/").as_deref(), Some("::1"));
        assert_eq!(extract_domain(""), None);
        assert_eq!(extract_domain("https:///path"), None);
    }
}
