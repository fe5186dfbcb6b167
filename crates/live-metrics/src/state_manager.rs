//! Idle/collecting state machine.
//!
//! While idle the agent pings the collector every few seconds. Once the
//! collector reports a subscriber the agent starts collecting and submits a
//! sample every second until the collector says nobody is watching anymore.
//! Calls that fail or come back without an answer are inconclusive: the state
//! stays as it is and, after long enough without a conclusive answer, the
//! cadence backs off.

use std::sync::Arc;
use std::time::Duration;

use api_types::CollectionConfigurationError;
use api_types::CollectionConfigurationErrorType;
use api_types::CollectionConfigurationInfo;
use chrono::DateTime;
use chrono::Utc;
use collector_client::CollectorResponse;
use collector_client::PollingHint;
use collector_client::ServiceClient;
use error_stack::Report;
use quota::Clock;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::error::ModuleError;
use crate::sample::DataSample;

/// Cadence of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    #[serde(with = "millis")]
    pub service_polling_interval: Duration,
    #[serde(with = "millis")]
    pub service_polling_backed_off_interval: Duration,
    /// Time without a conclusive ping before polling backs off.
    #[serde(with = "millis")]
    pub timeout_to_backoff: Duration,
    #[serde(with = "millis")]
    pub collection_interval: Duration,
    #[serde(with = "millis")]
    pub collection_backed_off_interval: Duration,
    /// Time without a conclusive submission before collection backs off.
    #[serde(with = "millis")]
    pub timeout_to_collection_backoff: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            service_polling_interval: Duration::from_secs(5),
            service_polling_backed_off_interval: Duration::from_secs(60),
            timeout_to_backoff: Duration::from_secs(60),
            collection_interval: Duration::from_secs(1),
            collection_backed_off_interval: Duration::from_secs(5),
            timeout_to_collection_backoff: Duration::from_secs(20),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Side effects the state machine drives.
pub trait CollectionActions: Send + Sync {
    /// Begin a collection with a fresh accumulator.
    fn start_collection(&self);

    fn stop_collection(&self);

    /// Close the current interval. Returns it together with any samples
    /// handed back earlier, oldest first.
    fn collect(&self) -> Vec<DataSample>;

    /// Keep samples a failed submission could not deliver.
    fn return_failed_samples(&self, samples: Vec<DataSample>);

    /// Compile and install a configuration, returning its compile errors.
    fn update_configuration(
        &self,
        info: &CollectionConfigurationInfo,
    ) -> Result<Vec<CollectionConfigurationError>, Report<ModuleError>>;

    fn update_endpoint(&self, endpoint: &Url);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Idle,
    Collecting,
}

pub struct CollectionStateManager {
    client: Arc<dyn ServiceClient>,
    clock: Arc<dyn Clock>,
    timings: Timings,
    actions: Arc<dyn CollectionActions>,
    instrumentation_key: String,
    auth_api_key: Option<String>,
    state: CollectionState,
    configuration_etag: String,
    polling_interval_hint: Option<Duration>,
    last_successful_ping: Option<DateTime<Utc>>,
    last_successful_submit: Option<DateTime<Utc>>,
    /// Compile errors of the current configuration, sent with the next submission.
    pending_errors: Vec<CollectionConfigurationError>,
}

impl std::fmt::Debug for CollectionStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStateManager")
            .field("state", &self.state)
            .field("configuration_etag", &self.configuration_etag)
            .field("polling_interval_hint", &self.polling_interval_hint)
            .field("pending_errors", &self.pending_errors.len())
            .finish_non_exhaustive()
    }
}

impl CollectionStateManager {
    pub fn new(
        client: Arc<dyn ServiceClient>,
        clock: Arc<dyn Clock>,
        timings: Timings,
        actions: Arc<dyn CollectionActions>,
        instrumentation_key: impl Into<String>,
        auth_api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            clock,
            timings,
            actions,
            instrumentation_key: instrumentation_key.into(),
            auth_api_key,
            state: CollectionState::Idle,
            configuration_etag: String::new(),
            polling_interval_hint: None,
            last_successful_ping: None,
            last_successful_submit: None,
            pending_errors: Vec::new(),
        }
    }

    pub fn state(&self) -> CollectionState {
        self.state
    }

    pub fn is_collecting(&self) -> bool {
        self.state == CollectionState::Collecting
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn configuration_etag(&self) -> &str {
        &self.configuration_etag
    }

    /// Run one tick and return how long to wait before the next one.
    pub fn update_state(&mut self) -> Duration {
        if self.instrumentation_key.is_empty() {
            return self.timings.service_polling_interval;
        }

        let now = self.clock.now();
        self.last_successful_ping.get_or_insert(now);
        self.last_successful_submit.get_or_insert(now);

        match self.state {
            CollectionState::Idle => self.ping(now),
            CollectionState::Collecting => self.submit(now),
        }
    }

    fn ping(&mut self, now: DateTime<Utc>) -> Duration {
        let response = match self.client.ping(
            &self.instrumentation_key,
            now,
            &self.configuration_etag,
            self.auth_api_key.as_deref(),
        ) {
            Ok(response) => response,
            Err(report) => {
                warn!(error = ?report, "Ping to the live metrics collector failed");
                return self.idle_interval(now);
            }
        };
        self.apply_server_hints(&response);

        match response.subscribed {
            Some(true) => {
                self.last_successful_ping = Some(now);
                self.apply_configuration(&response);
                self.actions.start_collection();
                self.state = CollectionState::Collecting;
                self.last_successful_submit = Some(now);
                info!(etag = %self.configuration_etag, "Collector subscribed, collecting");
                self.timings.collection_interval
            }
            Some(false) => {
                self.last_successful_ping = Some(now);
                debug!("Collector not subscribed");
                self.idle_interval(now)
            }
            None => {
                debug!("Inconclusive ping response");
                self.idle_interval(now)
            }
        }
    }

    fn submit(&mut self, now: DateTime<Utc>) -> Duration {
        let samples = self.actions.collect();
        let points = samples.iter().map(DataSample::to_data_point).collect();

        let response = match self.client.submit_samples(
            points,
            &self.instrumentation_key,
            &self.configuration_etag,
            self.auth_api_key.as_deref(),
            &self.pending_errors,
        ) {
            Ok(response) => Some(response),
            Err(report) => {
                warn!(error = ?report, "Submitting samples to the live metrics collector failed");
                None
            }
        };
        if let Some(response) = &response {
            self.apply_server_hints(response);
        }

        match response.as_ref().and_then(|response| response.subscribed) {
            Some(false) => {
                self.last_successful_submit = Some(now);
                self.last_successful_ping = Some(now);
                self.pending_errors.clear();
                self.actions.stop_collection();
                self.state = CollectionState::Idle;
                info!("Collector unsubscribed, collection stopped");
                self.idle_interval(now)
            }
            Some(true) => {
                self.last_successful_submit = Some(now);
                self.pending_errors.clear();
                if let Some(response) = &response {
                    self.apply_configuration(response);
                }
                self.collection_interval(now)
            }
            None => {
                debug!(samples = samples.len(), "Inconclusive submission, keeping samples");
                self.actions.return_failed_samples(samples);
                self.collection_interval(now)
            }
        }
    }

    fn apply_server_hints(&mut self, response: &CollectorResponse) {
        match response.polling_interval_hint {
            PollingHint::Unchanged => {}
            PollingHint::Cleared => self.polling_interval_hint = None,
            PollingHint::Set(hint) => self.polling_interval_hint = Some(hint),
        }

        if let Some(endpoint) = &response.endpoint_redirect {
            if *endpoint != self.client.current_endpoint() {
                info!(%endpoint, "Collector redirected the agent");
                self.client.set_endpoint(endpoint.clone());
                self.actions.update_endpoint(endpoint);
            }
        }
    }

    fn apply_configuration(&mut self, response: &CollectorResponse) {
        if response.subscribed != Some(true) {
            return;
        }
        let Some(info) = &response.configuration else {
            return;
        };
        let etag = response
            .configuration_etag
            .clone()
            .unwrap_or_else(|| info.etag.clone());
        if etag == self.configuration_etag {
            return;
        }

        self.pending_errors = match self.actions.update_configuration(info) {
            Ok(errors) => errors,
            Err(report) => {
                warn!(error = ?report, %etag, "Failed to apply collection configuration");
                vec![CollectionConfigurationError::new(
                    CollectionConfigurationErrorType::CollectionConfigurationFailureToCreateUnexpected,
                    report.current_context().to_string(),
                    format!("{report:?}"),
                    [("ETag", etag.clone())],
                )]
            }
        };
        info!(
            previous = %self.configuration_etag,
            %etag,
            errors = self.pending_errors.len(),
            "Collection configuration updated"
        );
        self.configuration_etag = etag;
    }

    fn idle_interval(&self, now: DateTime<Utc>) -> Duration {
        if backed_off(now, self.last_successful_ping, self.timings.timeout_to_backoff) {
            return self.timings.service_polling_backed_off_interval;
        }
        self.polling_interval_hint
            .unwrap_or(self.timings.service_polling_interval)
    }

    fn collection_interval(&self, now: DateTime<Utc>) -> Duration {
        if backed_off(
            now,
            self.last_successful_submit,
            self.timings.timeout_to_collection_backoff,
        ) {
            return self.timings.collection_backed_off_interval;
        }
        self.timings.collection_interval
    }
}

fn backed_off(now: DateTime<Utc>, last_success: Option<DateTime<Utc>>, threshold: Duration) -> bool {
    let Some(last_success) = last_success else {
        return false;
    };
    (now - last_success)
        .to_std()
        .is_ok_and(|elapsed| elapsed >= threshold)
}
