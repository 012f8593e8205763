//! Frequency governors.
//!
//! A governor decides which core a new query joins and which frequency step a core runs at. Governors
//! hold no per-core state, everything they need is read from the [`Core`] and the cost predictor.

pub mod cons;
pub mod hybrid;
pub mod load_sensitive;
pub mod pesos;
pub mod perf;

use std::collections::HashMap;

use dyn_clone::{clone_trait_object, DynClone};

use crate::core::Core;
use crate::error::{Error, Result};
use crate::frequency::{millis_to_micros, Frequency, FrequencySteps, Time};
use crate::predictor::CostPredictor;
use crate::query::QueryInfo;
use crate::selection::{CoreSelection, CoreSelectionPolicy};

use self::cons::ConsGovernor;
use self::hybrid::HybridGovernor;
use self::load_sensitive::LoadSensitiveGovernor;
use self::perf::PerfGovernor;
use self::pesos::PesosGovernor;

/// Read-only device data available to governors.
pub struct GovernorContext<'a> {
    pub predictor: &'a CostPredictor,
}

impl<'a> GovernorContext<'a> {
    pub fn new(predictor: &'a CostPredictor) -> Self {
        Self { predictor }
    }

    pub fn steps(&self) -> &FrequencySteps {
        self.predictor.steps()
    }

    /// Predicted service time of the query at the maximum frequency, padded with the class RMSE.
    pub fn predicted_max_time(&self, query: &QueryInfo) -> Time {
        self.predictor
            .predict_service_time_at_max_frequency(query.term_class(), query.postings())
    }

    pub fn padded_volume(&self, query: &QueryInfo) -> f64 {
        self.predictor.padded_volume(query.term_class(), query.postings())
    }

    /// Slowest step meeting `target` for the query, see [`CostPredictor::identify_target_frequency`].
    pub fn target_frequency(&self, query: &QueryInfo, target: f64) -> Frequency {
        self.predictor
            .identify_target_frequency(query.term_class(), self.padded_volume(query), target)
    }
}

/// Deadline of a query under the given time budget.
pub fn deadline(query: &QueryInfo, time_budget: Time) -> Time {
    query.arrival_time() + time_budget
}

pub trait FrequencyGovernor: DynClone {
    fn get_name(&self) -> String;

    /// Policy used by [`select_core`](Self::select_core).
    fn default_selection(&self) -> CoreSelectionPolicy;

    /// Chooses the core for a new query.
    fn select_core(&self, time: Time, query: &QueryInfo, cores: &[Core], ctx: &GovernorContext) -> CoreSelection {
        let eval = |t: Time, core: &Core| self.eval_frequency(t, core, ctx);
        self.default_selection().select(time, query, cores, ctx, &eval)
    }

    /// Chooses the frequency of a core given its current queue.
    fn eval_frequency(&self, time: Time, core: &Core, ctx: &GovernorContext) -> Frequency;

    /// Period of the control loop for governors which re-evaluate frequencies on a timer instead of
    /// on every queue change.
    fn control_period(&self) -> Option<Time> {
        None
    }

    fn requires_regressors(&self) -> bool {
        false
    }
}

clone_trait_object!(FrequencyGovernor);

/// Parses `k1=v1,k2=v2` governor options.
pub fn parse_options(s: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for kv in s.split(',') {
        if let Some((k, v)) = kv.split_once('=') {
            result.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    result
}

/// Creates a governor from its config name, e.g. `PESOS` or `CONS[period=2000]` (period in ms).
pub fn governor_resolver(s: &str) -> Result<Box<dyn FrequencyGovernor>> {
    let (name, options) = match s.find('[') {
        Some(pos) if s.ends_with(']') => (&s[..pos], parse_options(&s[pos + 1..s.len() - 1])),
        _ => (s, HashMap::new()),
    };
    match name {
        "PESOS" => Ok(Box::new(PesosGovernor::new())),
        "PERF" => Ok(Box::new(PerfGovernor::new())),
        "LOAD_SENSITIVE" => Ok(Box::new(LoadSensitiveGovernor::new())),
        "MY_MODEL" => Ok(Box::new(HybridGovernor::new())),
        "CONS" => {
            let period = match options.get("period") {
                Some(v) => millis_to_micros(
                    v.parse::<f64>()
                        .map_err(|_| Error::Config(format!("invalid CONS period '{}'", v)))?,
                ),
                None => ConsGovernor::DEFAULT_PERIOD,
            };
            Ok(Box::new(ConsGovernor::with_period(period)))
        }
        _ => Err(Error::unknown_name("governor", s)),
    }
}
