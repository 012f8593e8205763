//! Maximum performance governor.

use crate::core::Core;
use crate::frequency::{Frequency, Time};
use crate::governor::{FrequencyGovernor, GovernorContext};
use crate::selection::CoreSelectionPolicy;

/// Always runs at the fastest step.
#[derive(Clone, Default)]
pub struct PerfGovernor {}

impl PerfGovernor {
    pub fn new() -> Self {
        Self {}
    }
}

impl FrequencyGovernor for PerfGovernor {
    fn get_name(&self) -> String {
        "PERF".to_string()
    }

    fn default_selection(&self) -> CoreSelectionPolicy {
        CoreSelectionPolicy::LeastLoaded
    }

    fn eval_frequency(&self, _time: Time, _core: &Core, ctx: &GovernorContext) -> Frequency {
        ctx.steps().max()
    }
}
