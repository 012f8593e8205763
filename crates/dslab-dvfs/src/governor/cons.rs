//! CONS: utilization control governor.
//!
//! Every control period the governor compares the arrival rate of a core with its service rate. When the
//! utilization leaves the `[DOWN_THRESHOLD, UP_THRESHOLD]` band the frequency is scaled so that the
//! utilization returns to `TARGET_UTILIZATION`.

use crate::core::Core;
use crate::frequency::{micros_to_millis, Frequency, Time, MICROS_IN_MILLI};
use crate::governor::{FrequencyGovernor, GovernorContext};
use crate::selection::CoreSelectionPolicy;

#[derive(Clone)]
pub struct ConsGovernor {
    period: Time,
}

impl ConsGovernor {
    pub const TARGET_UTILIZATION: f64 = 0.70;
    pub const UP_THRESHOLD: f64 = 0.80;
    pub const DOWN_THRESHOLD: f64 = 0.20;
    pub const DEFAULT_PERIOD: Time = 2000 * MICROS_IN_MILLI;

    pub fn new() -> Self {
        Self::with_period(Self::DEFAULT_PERIOD)
    }

    pub fn with_period(period: Time) -> Self {
        assert!(period > 0, "control period must be positive");
        Self { period }
    }

    /// Queries received per ms during the current period.
    pub fn arrival_rate(&self, core: &Core) -> f64 {
        core.counters().received as f64 / micros_to_millis(self.period)
    }

    /// Queries served per ms of busy time during the current period.
    pub fn service_rate(&self, core: &Core) -> f64 {
        let counters = core.counters();
        if counters.busy_time == 0 {
            if counters.processed == 0 {
                0.
            } else {
                f64::MAX
            }
        } else {
            counters.processed as f64 / micros_to_millis(counters.busy_time)
        }
    }

    pub fn utilization(&self, core: &Core) -> f64 {
        let arrival_rate = self.arrival_rate(core);
        let service_rate = self.service_rate(core);
        if service_rate == 0. {
            if arrival_rate == 0. {
                0.
            } else {
                1.
            }
        } else {
            arrival_rate / service_rate
        }
    }

    fn target_frequency(&self, core: &Core, ctx: &GovernorContext) -> Frequency {
        let target_rate = self.arrival_rate(core) / Self::TARGET_UTILIZATION;
        let service_rate = self.service_rate(core);
        if service_rate == 0. {
            if target_rate == 0. {
                ctx.steps().min()
            } else {
                ctx.steps().max()
            }
        } else {
            let target = (core.frequency() as f64 * (target_rate / service_rate)).ceil();
            ctx.steps().at_least(target)
        }
    }
}

impl Default for ConsGovernor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyGovernor for ConsGovernor {
    fn get_name(&self) -> String {
        "CONS".to_string()
    }

    fn default_selection(&self) -> CoreSelectionPolicy {
        CoreSelectionPolicy::LeastLoaded
    }

    fn eval_frequency(&self, _time: Time, core: &Core, ctx: &GovernorContext) -> Frequency {
        let utilization = self.utilization(core);
        if utilization >= Self::UP_THRESHOLD || utilization <= Self::DOWN_THRESHOLD {
            self.target_frequency(core, ctx)
        } else {
            core.frequency()
        }
    }

    fn control_period(&self) -> Option<Time> {
        Some(self.period)
    }
}
