//! Composition root.
//!
//! [`LiveMetricsModule`] owns everything one agent instance needs: the
//! collector client, the accumulators, the compiled configuration, the
//! processors registered by the host pipelines and the single background
//! thread driving [`CollectionStateManager`].

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::thread;
use std::thread::JoinHandle;

use api_types::CollectionConfigurationError;
use api_types::CollectionConfigurationInfo;
use arc_swap::ArcSwap;
use collector_client::ServiceClient;
use error_stack::report;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;

use quota::Clock;

use crate::accumulator::AccumulatorManager;
use crate::collection_configuration::CollectionConfiguration;
use crate::collection_configuration::QuotaDefaults;
use crate::error::ModuleError;
use crate::processor::LiveMetricsProcessor;
use crate::processor::TelemetryProcessor;
use crate::sample::DataSample;
use crate::state_manager::CollectionActions;
use crate::state_manager::CollectionStateManager;
use crate::state_manager::Timings;
use crate::time_slot::CollectionTimeSlotManager;

/// Samples kept for resubmission after failed submissions.
pub const DEFAULT_MAX_STORED_SAMPLES: usize = 10;

/// Agent settings that do not come from the collector.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub instrumentation_key: String,
    pub auth_api_key: Option<String>,
    pub timings: Timings,
    /// Keep counting and computing metrics but never capture documents.
    pub disable_full_telemetry_items: bool,
    pub max_stored_samples: usize,
    pub quota_defaults: QuotaDefaults,
}

impl ModuleConfig {
    pub fn new(instrumentation_key: impl Into<String>) -> Self {
        Self {
            instrumentation_key: instrumentation_key.into(),
            auth_api_key: None,
            timings: Timings::default(),
            disable_full_telemetry_items: false,
            max_stored_samples: DEFAULT_MAX_STORED_SAMPLES,
            quota_defaults: QuotaDefaults::default(),
        }
    }

    pub fn with_auth_api_key(mut self, key: impl Into<String>) -> Self {
        self.auth_api_key = Some(key.into());
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_full_telemetry_items_disabled(mut self, disabled: bool) -> Self {
        self.disable_full_telemetry_items = disabled;
        self
    }

    pub fn with_max_stored_samples(mut self, max: usize) -> Self {
        self.max_stored_samples = max;
        self
    }

    pub fn with_quota_defaults(mut self, defaults: QuotaDefaults) -> Self {
        self.quota_defaults = defaults;
        self
    }
}

/// State shared between the module handle and the state thread.
struct ModuleActions {
    config: ModuleConfig,
    client: Arc<dyn ServiceClient>,
    clock: Arc<dyn Clock>,
    accumulators: Arc<AccumulatorManager>,
    configuration: ArcSwap<CollectionConfiguration>,
    processors: Mutex<Vec<Arc<LiveMetricsProcessor>>>,
    failed_samples: Mutex<VecDeque<DataSample>>,
    collecting: AtomicBool,
}

impl ModuleActions {
    fn processors(&self) -> Vec<Arc<LiveMetricsProcessor>> {
        self.processors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn start_processor(&self, processor: &LiveMetricsProcessor, endpoint: &Url) {
        if processor.is_collecting() {
            return;
        }
        let global_quota = self.configuration.load().global_quota();
        let started = processor
            .update_global_quota(global_quota)
            .and_then(|()| {
                processor.start_collection(
                    self.accumulators.clone(),
                    &self.config.instrumentation_key,
                    endpoint,
                    self.config.disable_full_telemetry_items,
                )
            });
        if let Err(report) = started {
            warn!(error = ?report, "Failed to start collection on a processor");
        }
    }
}

impl CollectionActions for ModuleActions {
    fn start_collection(&self) {
        // discard whatever was counted while nobody was watching
        self.accumulators
            .complete_current(self.configuration.load_full(), self.clock.now());
        self.collecting.store(true, Ordering::Release);

        let endpoint = self.client.current_endpoint();
        for processor in self.processors() {
            self.start_processor(&processor, &endpoint);
        }
    }

    fn stop_collection(&self) {
        self.collecting.store(false, Ordering::Release);
        for processor in self.processors() {
            if let Err(report) = processor.stop_collection() {
                debug!(error = ?report, "Processor was not collecting");
            }
        }
        self.failed_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn collect(&self) -> Vec<DataSample> {
        let now = self.clock.now();
        let completed = self
            .accumulators
            .complete_current(self.configuration.load_full(), now);
        let sample = DataSample::from_accumulator(&completed, now);

        let mut samples: Vec<_> = self
            .failed_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        samples.push(sample);
        samples
    }

    fn return_failed_samples(&self, samples: Vec<DataSample>) {
        let mut stored = self
            .failed_samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        stored.extend(samples);
        while stored.len() > self.config.max_stored_samples {
            stored.pop_front();
        }
    }

    fn update_configuration(
        &self,
        info: &CollectionConfigurationInfo,
    ) -> Result<Vec<CollectionConfigurationError>, Report<ModuleError>> {
        let previous = self.configuration.load_full();
        let (configuration, errors) = CollectionConfiguration::compile_with_defaults(
            info,
            self.clock.clone(),
            Some(&previous),
            &self.config.quota_defaults,
        );

        let global_quota = configuration.global_quota();
        global_quota
            .tracker(self.clock.clone(), None)
            .change_context(ModuleError::Configuration)
            .attach_printable_lazy(|| format!("etag: {}", info.etag))?;

        // takes effect for producers at the next accumulator swap
        self.configuration.store(Arc::new(configuration));
        for processor in self.processors() {
            processor
                .update_global_quota(global_quota)
                .change_context(ModuleError::Configuration)?;
        }
        Ok(errors)
    }

    fn update_endpoint(&self, endpoint: &Url) {
        for processor in self.processors() {
            processor.update_endpoint(endpoint);
        }
    }
}

/// Background thread looping the state machine.
struct StateThread {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

impl StateThread {
    fn spawn(mut manager: CollectionStateManager, clock: Arc<dyn Clock>) -> std::io::Result<Self> {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("live-metrics-state".into())
            .spawn(move || {
                debug!("Live metrics state thread started");
                let slots = CollectionTimeSlotManager;
                let (stopped, wake) = &*signal;

                loop {
                    let delay = manager.update_state();
                    let wait = if manager.is_collecting()
                        && delay == manager.timings().collection_interval
                    {
                        slots.collection_wait(clock.now(), delay)
                    } else {
                        delay
                    };

                    let guard = stopped.lock().unwrap_or_else(PoisonError::into_inner);
                    let (guard, _) = wake
                        .wait_timeout_while(guard, wait, |stopped| !*stopped)
                        .unwrap_or_else(PoisonError::into_inner);
                    if *guard {
                        break;
                    }
                }
                debug!("Live metrics state thread stopped");
            })?;

        Ok(Self { stop, handle })
    }

    /// Wake the thread and wait for it. An in-flight collector call finishes first.
    fn stop(self) {
        let (stopped, wake) = &*self.stop;
        *stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
        if self.handle.join().is_err() {
            warn!("Live metrics state thread panicked");
        }
    }
}

/// One live metrics agent.
pub struct LiveMetricsModule {
    actions: Arc<ModuleActions>,
    thread: Mutex<Option<StateThread>>,
}

impl std::fmt::Debug for LiveMetricsModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveMetricsModule")
            .field("config", &self.actions.config)
            .field("is_collecting", &self.is_collecting())
            .finish_non_exhaustive()
    }
}

impl LiveMetricsModule {
    pub fn new(config: ModuleConfig, client: Arc<dyn ServiceClient>, clock: Arc<dyn Clock>) -> Self {
        let configuration = Arc::new(CollectionConfiguration::empty_with_defaults(
            &config.quota_defaults,
        ));
        let accumulators = Arc::new(AccumulatorManager::new(configuration.clone(), clock.now()));
        Self {
            actions: Arc::new(ModuleActions {
                config,
                client,
                clock,
                accumulators,
                configuration: ArcSwap::new(configuration),
                processors: Mutex::new(Vec::new()),
                failed_samples: Mutex::new(VecDeque::new()),
                collecting: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Create a processor in front of `next`. Joins a running collection
    /// right away.
    pub fn register_processor(
        &self,
        next: Arc<dyn TelemetryProcessor>,
    ) -> Result<Arc<LiveMetricsProcessor>, Report<ModuleError>> {
        let processor = Arc::new(
            LiveMetricsProcessor::new(next, self.actions.clock.clone())
                .change_context(ModuleError::Configuration)?,
        );

        let mut processors = self
            .actions
            .processors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.actions.collecting.load(Ordering::Acquire) {
            self.actions
                .start_processor(&processor, &self.actions.client.current_endpoint());
        }
        processors.push(processor.clone());
        Ok(processor)
    }

    /// Start the background thread. Starting twice is a no-op.
    pub fn start(&self) -> Result<(), Report<ModuleError>> {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if thread.is_some() {
            return Ok(());
        }

        let config = &self.actions.config;
        let manager = CollectionStateManager::new(
            self.actions.client.clone(),
            self.actions.clock.clone(),
            config.timings,
            self.actions.clone(),
            config.instrumentation_key.clone(),
            config.auth_api_key.clone(),
        );
        let spawned = StateThread::spawn(manager, self.actions.clock.clone()).map_err(|err| {
            report!(ModuleError::Thread {
                message: err.to_string()
            })
        })?;
        *thread = Some(spawned);
        info!(endpoint = %self.actions.client.current_endpoint(), "Live metrics module started");
        Ok(())
    }

    pub fn is_collecting(&self) -> bool {
        self.actions.collecting.load(Ordering::Acquire)
    }

    /// Stop the background thread and any running collection. Producers
    /// already inside `process` finish normally.
    pub fn shutdown(&self) {
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(thread) = thread else {
            return;
        };
        thread.stop();
        if self.is_collecting() {
            self.actions.stop_collection();
        }
        info!("Live metrics module shut down");
    }
}

impl Drop for LiveMetricsModule {
    fn drop(&mut self) {
        self.shutdown();
    }
}
