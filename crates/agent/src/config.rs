use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use collector_client::ClientConfig;
use collector_client::DEFAULT_ENDPOINT;
use live_metrics::ModuleConfig;
use live_metrics::QuotaDefaults;
use live_metrics::Timings;
use serde::Deserialize;
use serde::Serialize;

#[derive(Parser)]
#[command(about, long_about, version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Feed telemetry through the live metrics pipeline
    Run(RunArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    #[arg(
        long,
        env = "LIVE_METRICS_ENDPOINT",
        default_value = DEFAULT_ENDPOINT,
        help = "Live metrics collector endpoint"
    )]
    pub endpoint: String,

    #[arg(
        long,
        env = "APPINSIGHTS_INSTRUMENTATIONKEY",
        help = "Instrumentation key of the monitored application"
    )]
    pub instrumentation_key: String,

    #[arg(
        long,
        env = "LIVE_METRICS_AUTH_API_KEY",
        help = "API key authenticating the agent with the collector"
    )]
    pub auth_api_key: Option<String>,

    #[arg(long, env = "LIVE_METRICS_ROLE_NAME", help = "Role name reported to the collector")]
    pub role_name: Option<String>,

    #[arg(
        long,
        env = "LIVE_METRICS_INSTANCE_NAME",
        help = "Instance name reported to the collector, defaults to the host name"
    )]
    pub instance_name: Option<String>,

    #[arg(
        long,
        env = "LIVE_METRICS_MACHINE_NAME",
        help = "Machine name reported to the collector, defaults to the host name"
    )]
    pub machine_name: Option<String>,

    #[arg(
        long,
        env = "LIVE_METRICS_SETTINGS",
        value_hint = clap::ValueHint::FilePath,
        help = "YAML settings file with intervals, quotas and capture options"
    )]
    pub settings: Option<PathBuf>,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "NDJSON telemetry input, one item per line; stdin when omitted or '-'"
    )]
    pub input: Option<PathBuf>,

    #[arg(
        long,
        default_value = "5",
        help = "Seconds to keep reporting after the input ends"
    )]
    pub linger_secs: u64,

    #[arg(
        long,
        env = "LIVE_METRICS_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this file, rotated daily"
    )]
    pub log_file: Option<PathBuf>,
}

impl RunArgs {
    /// `None` when reading from stdin.
    pub fn input_path(&self) -> Option<&Path> {
        self.input
            .as_deref()
            .filter(|path| path.as_os_str() != "-")
    }

    pub fn client_config(&self, settings: &Settings) -> Result<ClientConfig> {
        let mut config = ClientConfig::new(&self.endpoint)
            .map_err(|e| anyhow::anyhow!("{e:?}"))
            .with_context(|| format!("invalid collector endpoint {}", self.endpoint))?
            .with_request_timeout(Duration::from_millis(settings.request_timeout_ms));
        if let Some(role_name) = &self.role_name {
            config = config.with_role_name(role_name);
        }
        if let Some(instance_name) = &self.instance_name {
            config = config.with_instance_name(instance_name);
        }
        if let Some(machine_name) = &self.machine_name {
            config = config.with_machine_name(machine_name);
        }
        Ok(config)
    }

    pub fn module_config(&self, settings: &Settings) -> ModuleConfig {
        let mut config = ModuleConfig::new(&self.instrumentation_key)
            .with_timings(settings.timings)
            .with_full_telemetry_items_disabled(settings.disable_full_telemetry_items)
            .with_max_stored_samples(settings.max_stored_samples)
            .with_quota_defaults(settings.quotas);
        if let Some(key) = &self.auth_api_key {
            config = config.with_auth_api_key(key);
        }
        config
    }
}

/// Contents of the `--settings` file. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Intervals in milliseconds.
    pub timings: Timings,
    /// Quotas used until the collector sends its own.
    pub quotas: QuotaDefaults,
    pub disable_full_telemetry_items: bool,
    pub max_stored_samples: usize,
    pub request_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timings: Timings::default(),
            quotas: QuotaDefaults::default(),
            disable_full_telemetry_items: false,
            max_stored_samples: live_metrics::module::DEFAULT_MAX_STORED_SAMPLES,
            request_timeout_ms: 3_000,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!("Loading settings from {:?}", path);
        let yaml_content = std::fs::read_to_string(path)
            .with_context(|| format!("read settings file {}", path.display()))?;
        let settings = serde_yaml::from_str(&yaml_content)
            .with_context(|| format!("parse settings file {}", path.display()))?;
        Ok(settings)
    }
}
