//! Simulation configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::DeviceOptions;
use crate::frequency::{millis_to_micros, Time};
use crate::predictor::Mode;
use crate::selection::CoreSelectionPolicy;

/// Holds raw simulation config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawSimulationConfig {
    pub governor: Option<String>,
    pub mode: Option<Mode>,
    pub time_budget: Option<f64>,
    pub cores: Option<usize>,
    pub energy_model: Option<String>,
    pub core_selection: Option<CoreSelectionPolicy>,
    pub job_stealing: Option<bool>,
    pub queue_check: Option<f64>,
    pub sampling_interval: Option<f64>,
    pub controller: Option<RawControllerConfig>,
    pub data: Option<DataConfig>,
    pub workload: Option<WorkloadConfig>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawControllerConfig {
    pub enabled: Option<bool>,
    pub weight: Option<f64>,
    pub threshold: Option<f64>,
}

/// Locations of the training data.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct DataConfig {
    /// File with the supported frequency steps.
    pub frequencies: PathBuf,
    /// Training data directory of every node. Several directories mean a distributed setup
    /// where every query is sent to all nodes.
    pub nodes: Vec<PathBuf>,
}

/// Arrival trace and query sampling.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct WorkloadConfig {
    /// File with arrival times in ms, optionally followed by a query id.
    pub arrivals: PathBuf,
    /// Maximum number of arrivals to replay.
    pub queries: Option<usize>,
    /// Seed used to draw query ids.
    pub seed: Option<u64>,
}

/// Time budget controller settings.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ControllerConfig {
    pub enabled: bool,
    /// Fraction of the peer delay granted as extra budget.
    pub weight: f64,
    /// Minimal budget change in ms worth pushing to a core.
    pub threshold: f64,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// Governor name, optionally with options, e.g. `CONS[period=2000]`.
    pub governor: String,
    /// Which regressors are loaded.
    pub mode: Mode,
    /// Time budget of a query in ms.
    pub time_budget: f64,
    /// Number of cores per node.
    pub cores: usize,
    /// Energy model name.
    pub energy_model: String,
    /// Overrides the core selection policy of the governor.
    pub core_selection: Option<CoreSelectionPolicy>,
    pub job_stealing: bool,
    /// Idle time in ms after which a core drops to the minimum frequency.
    pub queue_check: f64,
    /// Length of the statistics time slots in ms.
    pub sampling_interval: f64,
    pub controller: ControllerConfig,
    pub data: DataConfig,
    pub workload: Option<WorkloadConfig>,
}

impl SimulationConfig {
    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    ///
    /// Relative data paths are resolved against the directory of the file.
    pub fn from_file(file_name: &str) -> Self {
        let mut config = Self::from_yaml(
            &std::fs::read_to_string(file_name).unwrap_or_else(|_| panic!("Can't read file {}", file_name)),
            file_name,
        );
        if let Some(base) = Path::new(file_name).parent() {
            config.resolve_paths(base);
        }
        config
    }

    /// Parses config from a YAML string, `source` is used in error messages.
    pub fn from_yaml(yaml: &str, source: &str) -> Self {
        let raw: RawSimulationConfig =
            serde_yaml::from_str(yaml).unwrap_or_else(|_| panic!("Can't parse YAML from file {}", source));
        let controller = raw.controller.unwrap_or(RawControllerConfig {
            enabled: None,
            weight: None,
            threshold: None,
        });

        Self {
            governor: raw.governor.unwrap_or_else(|| "PESOS".to_string()),
            mode: raw.mode.unwrap_or_default(),
            time_budget: raw.time_budget.unwrap_or(500.),
            cores: raw.cores.unwrap_or(4),
            energy_model: raw.energy_model.unwrap_or_else(|| "query".to_string()),
            core_selection: raw.core_selection,
            job_stealing: raw.job_stealing.unwrap_or(false),
            queue_check: raw.queue_check.unwrap_or(1000.),
            sampling_interval: raw.sampling_interval.unwrap_or(300_000.),
            controller: ControllerConfig {
                enabled: controller.enabled.unwrap_or(false),
                weight: controller.weight.unwrap_or(0.9),
                threshold: controller.threshold.unwrap_or(1.),
            },
            data: raw.data.unwrap_or_default(),
            workload: raw.workload,
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &PathBuf| if p.is_relative() { base.join(p) } else { p.clone() };
        self.data.frequencies = resolve(&self.data.frequencies);
        self.data.nodes = self.data.nodes.iter().map(resolve).collect();
        if let Some(workload) = self.workload.as_mut() {
            workload.arrivals = resolve(&workload.arrivals);
        }
    }

    pub fn time_budget_micros(&self) -> Time {
        millis_to_micros(self.time_budget)
    }

    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            cores: self.cores,
            time_budget: self.time_budget_micros(),
            queue_check: millis_to_micros(self.queue_check),
            job_stealing: self.job_stealing,
            selection: self.core_selection,
            sampling_interval: millis_to_micros(self.sampling_interval),
        }
    }
}
