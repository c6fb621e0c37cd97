//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. LOADSTAT_CONFIG environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Trip queue between `report()` callers and the recorder worker
    #[serde(default = "default_trip_queue_capacity")]
    pub trip_queue_capacity: usize,
    /// Finalized bucket queue between recorder and calculator
    #[serde(default = "default_bucket_queue_capacity")]
    pub bucket_queue_capacity: usize,
    /// Stat queue between calculator and session fan-out
    #[serde(default = "default_stat_queue_capacity")]
    pub stat_queue_capacity: usize,
    /// External Stat stream handed to the presentation layer
    #[serde(default = "default_stream_queue_capacity")]
    pub stream_queue_capacity: usize,
    /// Max trips drained by the recorder per wakeup
    #[serde(default = "default_recorder_batch_size")]
    pub recorder_batch_size: usize,
}

fn default_trip_queue_capacity() -> usize {
    2048
}

fn default_bucket_queue_capacity() -> usize {
    1024
}

fn default_stat_queue_capacity() -> usize {
    1000
}

fn default_stream_queue_capacity() -> usize {
    1000
}

fn default_recorder_batch_size() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            trip_queue_capacity: default_trip_queue_capacity(),
            bucket_queue_capacity: default_bucket_queue_capacity(),
            stat_queue_capacity: default_stat_queue_capacity(),
            stream_queue_capacity: default_stream_queue_capacity(),
            recorder_batch_size: default_recorder_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,
    #[serde(default = "default_medium_capacity")]
    pub medium_capacity: usize,
    /// Flush the medium accumulator after this many seconds or this many points
    #[serde(default = "default_medium_window_secs")]
    pub medium_window_secs: u32,
    #[serde(default = "default_long_term_capacity")]
    pub long_term_capacity: usize,
    /// Flush the long-term accumulator after this many seconds or this many points
    #[serde(default = "default_long_term_window_secs")]
    pub long_term_window_secs: u32,
}

fn default_recent_capacity() -> usize {
    300 // 5 minutes at 1s
}

fn default_medium_capacity() -> usize {
    360 // 30 minutes at 5s
}

fn default_medium_window_secs() -> u32 {
    5
}

fn default_long_term_capacity() -> usize {
    480 // 4 hours at 30s
}

fn default_long_term_window_secs() -> u32 {
    30
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            recent_capacity: default_recent_capacity(),
            medium_capacity: default_medium_capacity(),
            medium_window_secs: default_medium_window_secs(),
            long_term_capacity: default_long_term_capacity(),
            long_term_window_secs: default_long_term_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EgressConfig {
    /// JSONL file receiving every emitted Stat (empty disables)
    #[serde(default)]
    pub file: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    pipeline: PipelineConfig,
    chart: ChartConfig,
    metrics_interval_secs: u64,
    egress_file: Option<String>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            chart: ChartConfig::default(),
            metrics_interval_secs: default_metrics_interval(),
            egress_file: None,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Config file path: explicit `--config` value, then environment, then default
    pub fn resolve_config_path(explicit: Option<&str>) -> String {
        if let Some(path) = explicit {
            return path.to_string();
        }

        if let Ok(path) = env::var("LOADSTAT_CONFIG") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let mut config = Self::from_toml(toml_config);
        config.config_file = path.display().to_string();
        Ok(config)
    }

    fn from_toml(toml_config: TomlConfig) -> Self {
        let egress_file = Some(toml_config.egress.file).filter(|f| !f.trim().is_empty());
        let mut config = Self {
            pipeline: toml_config.pipeline,
            chart: toml_config.chart,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            egress_file,
            config_file: "default".to_string(),
        };
        config.sanitize();
        config
    }

    /// Zero capacities would make every queue or ring refuse input
    fn sanitize(&mut self) {
        let p = &mut self.pipeline;
        p.trip_queue_capacity = p.trip_queue_capacity.max(1);
        p.bucket_queue_capacity = p.bucket_queue_capacity.max(1);
        p.stat_queue_capacity = p.stat_queue_capacity.max(1);
        p.stream_queue_capacity = p.stream_queue_capacity.max(1);
        p.recorder_batch_size = p.recorder_batch_size.max(1);

        let c = &mut self.chart;
        c.recent_capacity = c.recent_capacity.max(1);
        c.medium_capacity = c.medium_capacity.max(1);
        c.medium_window_secs = c.medium_window_secs.max(1);
        c.long_term_capacity = c.long_term_capacity.max(1);
        c.long_term_window_secs = c.long_term_window_secs.max(1);

        self.metrics_interval_secs = self.metrics_interval_secs.max(1);
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn chart(&self) -> &ChartConfig {
        &self.chart
    }

    pub fn trip_queue_capacity(&self) -> usize {
        self.pipeline.trip_queue_capacity
    }

    pub fn bucket_queue_capacity(&self) -> usize {
        self.pipeline.bucket_queue_capacity
    }

    pub fn stat_queue_capacity(&self) -> usize {
        self.pipeline.stat_queue_capacity
    }

    pub fn stream_queue_capacity(&self) -> usize {
        self.pipeline.stream_queue_capacity
    }

    pub fn recorder_batch_size(&self) -> usize {
        self.pipeline.recorder_batch_size
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn egress_file(&self) -> Option<&str> {
        self.egress_file.as_deref()
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder: size every pipeline queue at once (tests, benchmarks)
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        self.pipeline.trip_queue_capacity = capacity;
        self.pipeline.bucket_queue_capacity = capacity;
        self.pipeline.stat_queue_capacity = capacity;
        self.pipeline.stream_queue_capacity = capacity;
        self
    }

    pub fn with_trip_queue_capacity(mut self, capacity: usize) -> Self {
        self.pipeline.trip_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_egress_file(mut self, file: impl Into<String>) -> Self {
        self.egress_file = Some(file.into());
        self
    }
}
