//! PESOS: deadline density governor.
//!
//! Every query must complete within `arrival + time budget`. The governor finds the highest density of
//! work per remaining time over all queued deadlines and runs the head query at the slowest step which
//! keeps up with it. Queries which cannot meet their deadline even at the fastest step lend their
//! lateness to the others by moving every deadline earlier.

use std::collections::VecDeque;

use crate::core::Core;
use crate::frequency::{Frequency, Time};
use crate::governor::{deadline, FrequencyGovernor, GovernorContext};
use crate::query::QueryInfo;
use crate::selection::CoreSelectionPolicy;

#[derive(Clone, Default)]
pub struct PesosGovernor {}

impl PesosGovernor {
    pub fn new() -> Self {
        Self {}
    }

    /// Total lateness of the queue spread over the queries which are still on time.
    ///
    /// Returns `None` when no query can meet its deadline.
    pub fn lateness(time: Time, queue: &VecDeque<QueryInfo>, time_budget: Time, ctx: &GovernorContext) -> Option<f64> {
        let mut lateness = 0.;
        let mut on_time = 0;
        for query in queue {
            let predicted = ctx.predicted_max_time(query);
            let remaining = time_budget - (time - query.arrival_time());
            if predicted > remaining {
                lateness += (predicted - remaining) as f64;
            } else {
                on_time += 1;
            }
        }
        if lateness == 0. {
            Some(0.)
        } else if on_time == 0 {
            None
        } else {
            Some(lateness / on_time as f64)
        }
    }

    /// Target service time of the head query, `None` if some adjusted deadline has already passed.
    pub fn target_time(time: Time, queue: &VecDeque<QueryInfo>, time_budget: Time, ctx: &GovernorContext) -> Option<f64> {
        let head = queue.front()?;
        if deadline(head, time_budget) <= time {
            return None;
        }
        let lateness = Self::lateness(time, queue, time_budget, ctx)?;
        let now = time as f64;

        let head_deadline = deadline(head, time_budget) as f64 - lateness;
        if head_deadline <= now {
            return None;
        }
        let head_volume = ctx.padded_volume(head);
        let mut volume = head_volume;
        let mut max_density = volume / (head_deadline - now);
        for query in queue.iter().skip(1) {
            volume += ctx.padded_volume(query);
            let query_deadline = deadline(query, time_budget) as f64 - lateness;
            if query_deadline <= now {
                return None;
            }
            max_density = max_density.max(volume / (query_deadline - now));
        }
        Some(head_volume / max_density)
    }
}

impl FrequencyGovernor for PesosGovernor {
    fn get_name(&self) -> String {
        "PESOS".to_string()
    }

    fn default_selection(&self) -> CoreSelectionPolicy {
        CoreSelectionPolicy::EarliestCompletionTime
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
