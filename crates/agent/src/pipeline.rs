//! NDJSON telemetry input and the forwarding end of the pipeline.

use std::io::BufRead;
use std::io::Write;
use std::sync::Mutex;
use std::sync::PoisonError;

use anyhow::Context;
use anyhow::Result;
use live_metrics::Telemetry;
use live_metrics::TelemetryProcessor;

/// Last pipeline stage: writes every item as one JSON line.
pub struct JsonLinesForwarder<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesForwarder<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> TelemetryProcessor for JsonLinesForwarder<W> {
    fn process(&self, item: Telemetry) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let written = serde_json::to_writer(&mut *out, &item)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(out))
            .and_then(|()| out.flush());
        if let Err(e) = written {
            tracing::warn!(error = %e, "Failed to forward telemetry item");
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub processed: usize,
    pub skipped: usize,
}

/// Parse `input` line by line and hand each item to `processor`. Blank lines
/// are ignored, malformed ones logged and skipped.
pub fn feed(input: impl BufRead, processor: &dyn TelemetryProcessor) -> Result<FeedStats> {
    let mut stats = FeedStats::default();
    for (index, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("read telemetry input line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Telemetry>(&line) {
            Ok(item) => {
                processor.process(item);
                stats.processed += 1;
            }
            Err(e) => {
                tracing::warn!(line = index + 1, error = %e, "Skipping malformed telemetry item");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}
