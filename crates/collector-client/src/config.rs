//! client config
//!
//! Identity strings and transport settings of the collector client.

use std::time::Duration;

use error_stack::ResultExt;
use url::Url;

use crate::error::CommError;
use crate::error::CommResult;

/// Collector endpoint used until the collector redirects the agent.
pub const DEFAULT_ENDPOINT: &str = "https://rt.services.visualstudio.com/QuickPulseService.svc";

/// Collector client config.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// collector base url
    pub endpoint: Url,
    /// instance name reported to the collector
    pub instance_name: String,
    /// cloud role of the instrumented application
    pub role_name: String,
    /// machine the agent runs on
    pub machine_name: String,
    /// unique id of this agent instance, regenerated on every start
    pub stream_id: String,
    /// SDK version string
    pub version: String,
    pub is_web_app: bool,
    pub processor_count: u32,
    /// HTTP request timeout, applied to ping and submit alike
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// create new client config with default identity.
    pub fn new(endpoint: impl AsRef<str>) -> CommResult<Self> {
        let endpoint_str = endpoint.as_ref();
        let endpoint = Url::parse(endpoint_str).change_context(CommError::Configuration {
            message: format!("Invalid collector endpoint '{endpoint_str}'"),
        })?;

        let machine_name = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        Ok(Self {
            endpoint,
            instance_name: machine_name.clone(),
            role_name: String::new(),
            machine_name,
            stream_id: uuid::Uuid::new_v4().simple().to_string(),
            version: format!("rust-live-metrics:{}", env!("CARGO_PKG_VERSION")),
            is_web_app: false,
            processor_count: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            request_timeout: Duration::from_secs(3),
        })
    }

    /// create config pointing at [`DEFAULT_ENDPOINT`].
    pub fn with_default_endpoint() -> CommResult<Self> {
        Self::new(DEFAULT_ENDPOINT)
    }

    pub fn with_instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = instance_name.into();
        self
    }

    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = role_name.into();
        self
    }

    pub fn with_machine_name(mut self, machine_name: impl Into<String>) -> Self {
        self.machine_name = machine_name.into();
        self
    }

    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }

    pub fn with_web_app(mut self, is_web_app: bool) -> Self {
        self.is_web_app = is_web_app;
        self
    }

    /// set request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
