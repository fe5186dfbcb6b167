//! Outcome of one collector call.

use std::time::Duration;

use api_types::CollectionConfigurationInfo;
use url::Url;

/// Polling interval hint carried by a collector response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollingHint {
    /// Header absent or unparsable: keep whatever hint is in effect.
    #[default]
    Unchanged,
    /// Header present but empty: drop the hint.
    Cleared,
    Set(Duration),
}

/// What the collector said in response to a ping or a submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectorResponse {
    /// `Some(true)` means "subscribed" for a ping and "send more" for a
    /// submission. `None` when the header is missing or malformed.
    pub subscribed: Option<bool>,
    /// ETag announced by the collector.
    pub configuration_etag: Option<String>,
    /// Present only when subscribed and the ETag differs from the one sent.
    pub configuration: Option<CollectionConfigurationInfo>,
    pub polling_interval_hint: PollingHint,
    /// Present only when the header holds an absolute http(s) URI.
    pub endpoint_redirect: Option<Url>,
}
