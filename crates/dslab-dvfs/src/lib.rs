#![doc = include_str!("../readme.md")]

pub mod config;
pub mod controller;
pub mod core;
pub mod device;
pub mod energy;
pub mod error;
pub mod frequency;
pub mod governor;
pub mod log;
pub mod predictor;
pub mod query;
pub mod selection;
pub mod simulation;
pub mod stats;
pub mod workload;

pub use colored;

pub use crate::config::SimulationConfig;
pub use crate::controller::{BudgetUpdate, TimeBudgetController};
pub use crate::core::Core;
pub use crate::device::{Device, DeviceOptions};
pub use crate::energy::EnergyModel;
pub use crate::error::{Error, Result};
pub use crate::frequency::{Frequency, FrequencySteps, Time};
pub use crate::governor::FrequencyGovernor;
pub use crate::predictor::{CostPredictor, Mode, QueryId};
pub use crate::query::QueryInfo;
pub use crate::selection::CoreSelectionPolicy;
pub use crate::simulation::Simulation;
