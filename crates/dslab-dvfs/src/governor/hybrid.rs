//! Hybrid of the deadline density and slack based governors.

use crate::core::Core;
use crate::frequency::{Frequency, Time};
use crate::governor::load_sensitive::LoadSensitiveGovernor;
use crate::governor::pesos::PesosGovernor;
use crate::governor::{deadline, FrequencyGovernor, GovernorContext};
use crate::selection::CoreSelectionPolicy;

/// Uses the larger of the PESOS and LOAD_SENSITIVE target times, so the head query runs at the slower of
/// the two frequencies. A bound without a target counts as zero: when the slack to the last deadline is
/// not positive, LOAD_SENSITIVE gives no target and the PESOS target decides alone.
#[derive(Clone, Default)]
pub struct HybridGovernor {}

impl HybridGovernor {
    pub fn new() -> Self {
        Self {}
    }
}

impl FrequencyGovernor for HybridGovernor {
    fn get_name(&self) -> String {
        "MY_MODEL".to_string()
    }

    fn default_selection(&self) -> CoreSelectionPolicy {
        CoreSelectionPolicy::EarliestCompletionTime
    }

    fn eval_frequency(&self, time: Time, core: &Core, ctx: &GovernorContext) -> Frequency {
        let head = match core.head() {
            Some(head) => head,
            None => return ctx.steps().max(),
        };
        if deadline(head, core.time_budget()) <= time {
            return ctx.steps().max();
        }
        let budget = core.time_budget();
        let density = PesosGovernor::target_time(time, core.queue(), budget, ctx).unwrap_or(0.);
        let slack = LoadSensitiveGovernor::target_time(time, core.queue(), budget, ctx).unwrap_or(0.);
        ctx.target_frequency(head, density.max(slack))
    }

    fn requires_regressors(&self) -> bool {
        true
    }
}
