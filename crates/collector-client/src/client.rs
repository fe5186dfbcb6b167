//! Blocking collector client.
//!
//! Every call is a single POST with a fixed timeout. There is no retry here:
//! the collection state machine decides when to call again.

use std::sync::Mutex;
use std::sync::PoisonError;

use api_types::CollectionConfigurationError;
use api_types::CollectionConfigurationInfo;
use api_types::MonitoringDataPoint;
use chrono::DateTime;
use chrono::Utc;
use error_stack::report;
use error_stack::ResultExt;
use reqwest::blocking::Client as BlockingClient;
use reqwest::blocking::Response;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use crate::error::CommError;
use crate::error::CommResult;
use crate::headers;
use crate::types::CollectorResponse;
use crate::ClientConfig;

/// Wire protocol with the collector.
pub trait ServiceClient: Send + Sync {
    /// Endpoint the next call goes to.
    fn current_endpoint(&self) -> Url;

    /// Point later calls at a different collector, e.g. after a redirect.
    fn set_endpoint(&self, endpoint: Url);

    /// Ask whether anyone is watching.
    fn ping(
        &self,
        instrumentation_key: &str,
        timestamp: DateTime<Utc>,
        configuration_etag: &str,
        auth_api_key: Option<&str>,
    ) -> CommResult<CollectorResponse>;

    /// Send collected samples together with pending configuration errors.
    fn submit_samples(
        &self,
        points: Vec<MonitoringDataPoint>,
        instrumentation_key: &str,
        configuration_etag: &str,
        auth_api_key: Option<&str>,
        errors: &[CollectionConfigurationError],
    ) -> CommResult<CollectorResponse>;
}

#[derive(Debug)]
struct ClientState {
    endpoint: Url,
    /// Opaque auth headers from the last response that carried any.
    auth_opaque_headers: Vec<(&'static str, String)>,
}

/// [`ServiceClient`] backed by `reqwest::blocking`.
#[derive(Debug)]
pub struct BlockingServiceClient {
    config: ClientConfig,
    http: BlockingClient,
    state: Mutex<ClientState>,
}

impl BlockingServiceClient {
    /// create client
    pub fn new(config: ClientConfig) -> CommResult<Self> {
        let http = BlockingClient::builder()
            .timeout(config.request_timeout)
            .build()
            .change_context(CommError::Configuration {
                message: "Failed to create blocking HTTP client".into(),
            })?;

        info!(
            endpoint = %config.endpoint,
            stream_id = %config.stream_id,
            "Collector client created"
        );

        Ok(Self {
            state: Mutex::new(ClientState {
                endpoint: config.endpoint.clone(),
                auth_opaque_headers: Vec::new(),
            }),
            config,
            http,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stamp(&self, point: &mut MonitoringDataPoint, instrumentation_key: &str) {
        point.version.clone_from(&self.config.version);
        point.invariant_version = headers::CURRENT_INVARIANT_VERSION;
        point.instrumentation_key = instrumentation_key.to_string();
        point.role_name.clone_from(&self.config.role_name);
        point.instance.clone_from(&self.config.instance_name);
        point.stream_id.clone_from(&self.config.stream_id);
        point.machine_name.clone_from(&self.config.machine_name);
        point.is_web_app = self.config.is_web_app;
        point.processor_count = self.config.processor_count;
    }

    fn operation_url(&self, operation: &str, instrumentation_key: &str) -> CommResult<Url> {
        let mut url = self.current_endpoint();
        url.path_segments_mut()
            .map_err(|()| {
                report!(CommError::Configuration {
                    message: format!("Endpoint '{}' cannot carry a path", self.config.endpoint),
                })
            })?
            .pop_if_empty()
            .push(operation);
        url.query_pairs_mut().append_pair("ikey", instrumentation_key);
        Ok(url)
    }

    fn post<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        body: &B,
        instrumentation_key: &str,
        transmission_time: DateTime<Utc>,
        configuration_etag: &str,
        auth_api_key: Option<&str>,
    ) -> CommResult<CollectorResponse> {
        let url = self.operation_url(operation, instrumentation_key)?;
        let body = serde_json::to_vec(body).change_context(CommError::Serialization {
            message: format!("Failed to encode {operation} body"),
        })?;
        let auth_opaque_headers = self.lock_state().auth_opaque_headers.clone();

        let mut request = self
            .http
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .header(
                headers::TRANSMISSION_TIME,
                headers::transmission_ticks(transmission_time).to_string(),
            )
            .header(headers::INSTANCE_NAME, &self.config.instance_name)
            .header(headers::MACHINE_NAME, &self.config.machine_name)
            .header(headers::ROLE_NAME, &self.config.role_name)
            .header(headers::STREAM_ID, &self.config.stream_id)
            .header(
                headers::INVARIANT_VERSION,
                headers::CURRENT_INVARIANT_VERSION.to_string(),
            )
            .header(headers::CONFIGURATION_ETAG, configuration_etag);
        if let Some(key) = auth_api_key {
            request = request.header(headers::AUTH_API_KEY, key);
        }
        for (name, value) in &auth_opaque_headers {
            request = request.header(*name, value);
        }

        debug!(%url, operation, "Calling collector");
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                report!(CommError::Timeout {
                    seconds: self.config.request_timeout.as_secs(),
                })
            } else {
                report!(CommError::Network {
                    message: format!("{operation} request to collector failed"),
                })
                .attach_printable(e.to_string())
            }
        })?;

        self.read_response(response, configuration_etag)
    }

    fn read_response(
        &self,
        response: Response,
        request_etag: &str,
    ) -> CommResult<CollectorResponse> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(report!(CommError::Http {
                status: status.as_u16(),
                message: text,
            }));
        }

        let response_headers = response.headers().clone();
        let opaque = headers::opaque_auth_headers(&response_headers);
        if !opaque.is_empty() {
            self.lock_state().auth_opaque_headers = opaque;
        }

        let subscribed = headers::parse_subscribed(&response_headers);
        let configuration_etag = headers::parse_configuration_etag(&response_headers);

        let configuration = if subscribed == Some(true)
            && configuration_etag.as_deref() != Some(request_etag)
        {
            let body = response.text().change_context(CommError::Network {
                message: "Failed to read collector response body".into(),
            })?;
            parse_configuration(&body)
        } else {
            None
        };

        Ok(CollectorResponse {
            subscribed,
            configuration_etag,
            configuration,
            polling_interval_hint: headers::parse_polling_hint(&response_headers),
            endpoint_redirect: headers::parse_endpoint_redirect(&response_headers),
        })
    }
}

fn parse_configuration(body: &str) -> Option<CollectionConfigurationInfo> {
    if body.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(body) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(error = %e, "Ignoring unparsable collection configuration");
            None
        }
    }
}

impl ServiceClient for BlockingServiceClient {
    fn current_endpoint(&self) -> Url {
        self.lock_state().endpoint.clone()
    }

    fn set_endpoint(&self, endpoint: Url) {
        let mut state = self.lock_state();
        if state.endpoint != endpoint {
            info!(from = %state.endpoint, to = %endpoint, "Collector endpoint changed");
            state.endpoint = endpoint;
        }
    }

    fn ping(
        &self,
        instrumentation_key: &str,
        timestamp: DateTime<Utc>,
        configuration_etag: &str,
        auth_api_key: Option<&str>,
    ) -> CommResult<CollectorResponse> {
        let mut point = MonitoringDataPoint {
            timestamp,
            ..Default::default()
        };
        self.stamp(&mut point, instrumentation_key);

        self.post(
            "ping",
            &point,
            instrumentation_key,
            timestamp,
            configuration_etag,
            auth_api_key,
        )
    }

    fn submit_samples(
        &self,
        mut points: Vec<MonitoringDataPoint>,
        instrumentation_key: &str,
        configuration_etag: &str,
        auth_api_key: Option<&str>,
        errors: &[CollectionConfigurationError],
    ) -> CommResult<CollectorResponse> {
        for point in &mut points {
            self.stamp(point, instrumentation_key);
            point.collection_configuration_errors = errors.to_vec();
        }

        self.post(
            "post",
            &points,
            instrumentation_key,
            Utc::now(),
            configuration_etag,
            auth_api_key,
        )
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn client(endpoint: &str) -> BlockingServiceClient {
        let config = ClientConfig::new(endpoint)
            .unwrap()
            .with_instance_name("web-0")
            .with_role_name("checkout")
            .with_machine_name("host-a")
            .with_stream_id("stream-1");
        BlockingServiceClient::new(config).unwrap()
    }

    #[test]
    fn operation_url_appends_segment_and_ikey() {
        let client = client("https://collector.example.com/QuickPulseService.svc/");
        let url = client.operation_url("ping", "ikey-1").unwrap();
        assert_eq!(
            url.as_str(),
            "https://collector.example.com/QuickPulseService.svc/ping?ikey=ikey-1"
        );
    }

    #[test]
    fn unencodable_body_is_a_serialization_error() {
        let client = client("https://collector.example.com/QuickPulseService.svc");
        let body = std::collections::BTreeMap::from([((1, 2), "tuple keys are not JSON")]);

        let err = client
            .post("ping", &body, "ikey-1", Utc::now(), "", None)
            .unwrap_err();
        assert!(matches!(err.current_context(), CommError::Serialization { .. }));
    }

    #[test]
    fn set_endpoint_redirects_later_calls() {
        let client = client("https://collector.example.com/QuickPulseService.svc");
        client.set_endpoint(Url::parse("https://westus.example.com/QuickPulseService.svc").unwrap());

        let url = client.operation_url("post", "k").unwrap();
        assert_eq!(url.host_str(), Some("westus.example.com"));
        assert_eq!(url.path(), "/QuickPulseService.svc/post");
    }

    #[test]
    fn stamp_fills_identity() {
        let client = client("https://collector.example.com/");
        let mut point = MonitoringDataPoint::default();
        client.stamp(&mut point, "ikey-1");

        assert_eq!(point.instrumentation_key, "ikey-1");
        assert_eq!(point.instance, "web-0");
        assert_eq!(point.role_name, "checkout");
        assert_eq!(point.machine_name, "host-a");
        assert_eq!(point.stream_id, "stream-1");
        assert_eq!(point.invariant_version, headers::CURRENT_INVARIANT_VERSION);
        assert!(point.version.starts_with("rust-live-metrics:"));
    }

    #[test]
    fn garbage_configuration_body_is_ignored() {
        assert_eq!(parse_configuration("{not json"), None);
        assert_eq!(parse_configuration("  "), None);
        assert_eq!(
            parse_configuration(r#"{"ETag":"v1"}"#).map(|info| info.etag),
            Some("v1".to_string())
        );
    }
}
