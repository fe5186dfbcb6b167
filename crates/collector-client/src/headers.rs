//! Collector protocol headers.

use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use reqwest::header::HeaderMap;
use url::Url;

use crate::types::PollingHint;

pub const TRANSMISSION_TIME: &str = "x-ms-qps-transmission-time";
pub const INSTANCE_NAME: &str = "x-ms-qps-instance-name";
pub const MACHINE_NAME: &str = "x-ms-qps-machine-name";
pub const ROLE_NAME: &str = "x-ms-qps-role-name";
pub const STREAM_ID: &str = "x-ms-qps-stream-id";
pub const INVARIANT_VERSION: &str = "x-ms-qps-invariant-version";
pub const CONFIGURATION_ETAG: &str = "x-ms-qps-configuration-etag";
pub const AUTH_API_KEY: &str = "x-ms-qps-auth-api-key";
pub const SUBSCRIBED: &str = "x-ms-qps-subscribed";
pub const POLLING_INTERVAL_HINT: &str = "x-ms-qps-service-polling-interval-hint";
pub const ENDPOINT_REDIRECT: &str = "x-ms-qps-service-endpoint-redirect-v2";

/// Auth headers the collector hands out and expects back verbatim.
pub const AUTH_OPAQUE: [&str; 2] = ["x-ms-qps-auth-app-id", "x-ms-qps-auth-status"];

/// Data point layout version understood by the collector.
pub const CURRENT_INVARIANT_VERSION: u32 = 5;

/// 100ns ticks between 0001-01-01 and the unix epoch.
const TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;

/// Transmission time in 100ns ticks since 0001-01-01T00:00:00Z.
pub fn transmission_ticks(timestamp: DateTime<Utc>) -> i64 {
    TICKS_AT_UNIX_EPOCH + timestamp.timestamp_micros() * 10
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub fn parse_subscribed(headers: &HeaderMap) -> Option<bool> {
    let value = header_str(headers, SUBSCRIBED)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        other => {
            tracing::debug!(value = other, "Ignoring malformed subscribed header");
            None
        }
    }
}

pub fn parse_configuration_etag(headers: &HeaderMap) -> Option<String> {
    header_str(headers, CONFIGURATION_ETAG).map(str::to_string)
}

pub fn parse_polling_hint(headers: &HeaderMap) -> PollingHint {
    let Some(value) = header_str(headers, POLLING_INTERVAL_HINT) else {
        return PollingHint::Unchanged;
    };
    let value = value.trim();
    if value.is_empty() {
        return PollingHint::Cleared;
    }
    match value.parse::<u64>() {
        Ok(millis) => PollingHint::Set(Duration::from_millis(millis)),
        Err(e) => {
            tracing::debug!(value, error = %e, "Ignoring malformed polling interval hint");
            PollingHint::Unchanged
        }
    }
}

pub fn parse_endpoint_redirect(headers: &HeaderMap) -> Option<Url> {
    let value = header_str(headers, ENDPOINT_REDIRECT)?.trim();
    if value.is_empty() {
        return None;
    }
    // Url::parse only accepts absolute URIs, relative ones fail here.
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Some(url),
        Ok(url) => {
            tracing::debug!(redirect = %url, "Ignoring endpoint redirect with unsupported scheme");
            None
        }
        Err(e) => {
            tracing::debug!(value, error = %e, "Ignoring endpoint redirect that is not an absolute URI");
            None
        }
    }
}

pub fn opaque_auth_headers(headers: &HeaderMap) -> Vec<(&'static str, String)> {
    AUTH_OPAQUE
        .iter()
        .filter_map(|name| header_str(headers, name).map(|value| (*name, value.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;
    use similar_asserts::assert_eq;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn subscribed_header_is_tri_state() {
        assert_eq!(parse_subscribed(&headers(&[(SUBSCRIBED, "true")])), Some(true));
        assert_eq!(parse_subscribed(&headers(&[(SUBSCRIBED, "False")])), Some(false));
        assert_eq!(parse_subscribed(&headers(&[(SUBSCRIBED, "maybe")])), None);
        assert_eq!(parse_subscribed(&headers(&[])), None);
    }

    #[test]
    fn polling_hint_distinguishes_absent_empty_and_set() {
        assert_eq!(parse_polling_hint(&headers(&[])), PollingHint::Unchanged);
        assert_eq!(
            parse_polling_hint(&headers(&[(POLLING_INTERVAL_HINT, "")])),
            PollingHint::Cleared
        );
        assert_eq!(
            parse_polling_hint(&headers(&[(POLLING_INTERVAL_HINT, "2500")])),
            PollingHint::Set(Duration::from_millis(2500))
        );
        assert_eq!(
            parse_polling_hint(&headers(&[(POLLING_INTERVAL_HINT, "soon")])),
            PollingHint::Unchanged
        );
    }

    #[test]
    fn redirect_must_be_absolute() {
        let redirect = parse_endpoint_redirect(&headers(&[(
            ENDPOINT_REDIRECT,
            "https://westus.live.example.com/QuickPulseService.svc",
        )]));
        assert_eq!(
            redirect.map(|url| url.host_str().map(str::to_string)),
            Some(Some("westus.live.example.com".to_string()))
        );

        assert_eq!(
            parse_endpoint_redirect(&headers(&[(ENDPOINT_REDIRECT, "/relative/path")])),
            None
        );
        assert_eq!(
            parse_endpoint_redirect(&headers(&[(ENDPOINT_REDIRECT, "mailto:ops@example.com")])),
            None
        );
    }

    #[test]
    fn ticks_match_dotnet_epoch() {
        let epoch = DateTime::from_timestamp(0, 0).unwrap();
        assert_eq!(transmission_ticks(epoch), TICKS_AT_UNIX_EPOCH);

        let one_second_later = DateTime::from_timestamp(1, 0).unwrap();
        assert_eq!(
            transmission_ticks(one_second_later),
            TICKS_AT_UNIX_EPOCH + 10_000_000
        );
    }
}
