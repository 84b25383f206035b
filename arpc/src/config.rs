//! Runtime-configurable tuning parameters for arpc.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `ARPC_`) or by constructing a custom `ArpcConfig`.

use std::time::Duration;

/// Tuning parameters for the dispatch engine and collectives.
#[derive(Debug, Clone)]
pub struct ArpcConfig {
    /// Number of worker tasks draining the ready-queue.
    pub workers: usize,

    /// How long an idle worker waits on the ready-queue before re-checking
    /// the shutdown flag.
    pub queue_wait: Duration,

    /// How long the poller waits for a header before re-checking the
    /// shutdown flag.
    pub probe_interval: Duration,

    /// Timeout for barrier operations.
    pub barrier_timeout: Duration,

    /// Answer failed requests with an `Exception` message instead of
    /// dropping them. Off by default: a failed remote call never resolves.
    pub report_failures: bool,
}

impl Default for ArpcConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_wait: Duration::from_micros(500),
            probe_interval: Duration::from_millis(10),
            barrier_timeout: Duration::from_secs(30),
            report_failures: false,
        }
    }
}

impl ArpcConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `ARPC_WORKERS`
    /// - `ARPC_QUEUE_WAIT_MICROS`
    /// - `ARPC_PROBE_INTERVAL_MILLIS`
    /// - `ARPC_BARRIER_TIMEOUT_SECS`
    /// - `ARPC_REPORT_FAILURES` (`true`/`false`/`1`/`0`)
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("ARPC_WORKERS")
            && let Ok(n) = v.parse::<usize>()
            && n > 0
        {
            cfg.workers = n;
        }
        if let Ok(v) = std::env::var("ARPC_QUEUE_WAIT_MICROS")
            && let Ok(us) = v.parse::<u64>()
        {
            cfg.queue_wait = Duration::from_micros(us);
        }
        if let Ok(v) = std::env::var("ARPC_PROBE_INTERVAL_MILLIS")
            && let Ok(ms) = v.parse::<u64>()
        {
            cfg.probe_interval = Duration::from_millis(ms);
        }
        if let Ok(v) = std::env::var("ARPC_BARRIER_TIMEOUT_SECS")
            && let Ok(s) = v.parse::<u64>()
        {
            cfg.barrier_timeout = Duration::from_secs(s);
        }
        if let Ok(v) = std::env::var("ARPC_REPORT_FAILURES")
            && let Some(b) = parse_bool(&v)
        {
            cfg.report_failures = b;
        }

        cfg
    }

    /// Builder-style override for the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Builder-style override for exception replies.
    pub fn with_report_failures(mut self, report: bool) -> Self {
        self.report_failures = report;
        self
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
