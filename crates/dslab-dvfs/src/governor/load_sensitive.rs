//! Slack based governor.
//!
//! The slack left before the deadline of the last queued query, after serving everything ahead of it at
//! the fastest step, is shared evenly among the queued queries. The head query gets its predicted time
//! plus its share, capped by its own deadline.

use std::collections::VecDeque;

use crate::core::Core;
use crate::frequency::{Frequency, Time};
use crate::governor::{deadline, FrequencyGovernor, GovernorContext};
use crate::query::QueryInfo;
use crate::selection::CoreSelectionPolicy;

#[derive(Clone, Default)]
pub struct LoadSensitiveGovernor {}

impl LoadSensitiveGovernor {
    pub fn new() -> Self {
        Self {}
    }

    /// Target service time of the head query, `None` if there is no slack left.
    pub fn target_time(time: Time, queue: &VecDeque<QueryInfo>, time_budget: Time, ctx: &GovernorContext) -> Option<f64> {
        let head = queue.front()?;
        let last = queue.back()?;
        let head_slack = deadline(head, time_budget) - time;
        if head_slack <= 0 {
            return None;
        }
        let ahead: Time = queue
            .iter()
            .take(queue.len() - 1)
            .map(|q| ctx.predicted_max_time(q))
            .sum();
        let delta = deadline(last, time_budget) - time - ahead;
        if delta <= 0 {
            return None;
        }
        let target = ctx.predicted_max_time(head) as f64 + delta as f64 / queue.len() as f64;
        Some(target.min(head_slack as f64))
    }
}

impl FrequencyGovernor for LoadSensitiveGovernor {
    fn get_name(&self) -> String {
        "LOAD_SENSITIVE".to_string()
    }

    fn default_selection(&self) -> CoreSelectionPolicy {
        CoreSelectionPolicy::EarliestFinishTime
    }

    fn eval_frequency(&self, time: Time, core: &Core, ctx: &GovernorContext) -> Frequency {
        let head = match core.head() {
            Some(head) => head,
            None => return ctx.steps().max(),
        };
        match Self::target_time(time, core.queue(), core.time_budget(), ctx) {
            Some(target) => ctx.target_frequency(head, target),
            None => ctx.steps().max(),
        }
    }

    fn requires_regressors(&self) -> bool {
        true
    }
}
