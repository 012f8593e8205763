//! Core selection policies used when a query arrives on a device.
//!
//! Every policy orders the cores by a key and picks the smallest one. When several cores share the
//! smallest key the one chosen least often on previous ties wins and its tie counter is incremented
//! by the device, which rotates equally loaded cores in a round-robin fashion.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::Core;
use crate::error::{Error, Result};
use crate::frequency::{Frequency, Time};
use crate::governor::GovernorContext;
use crate::query::QueryInfo;

/// Result of a core selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoreSelection {
    pub core: usize,
    /// Whether the core was chosen among several equally eligible ones.
    pub tie: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreSelectionPolicy {
    /// Fewest queued queries, then fewest unfinished ones, ties rotated.
    LeastLoaded,
    /// Fewest unfinished queries, ties resolved by core order.
    FirstLeastLoaded,
    /// Lowest frequency the governor would pick after adding the query, ties rotated.
    LowestFrequency,
    /// Least queued work predicted at the maximum frequency, ties rotated.
    EarliestCompletionTime,
    /// Earliest predicted finish of the new query after a dry-run enqueue, ties rotated.
    EarliestFinishTime,
}

/// Frequency evaluation of the governor owning the policy.
pub type EvalFrequency<'a> = dyn Fn(Time, &Core) -> Frequency + 'a;

impl CoreSelectionPolicy {
    pub fn select(
        &self,
        time: Time,
        query: &QueryInfo,
        cores: &[Core],
        ctx: &GovernorContext,
        eval: &EvalFrequency,
    ) -> CoreSelection {
        match self {
            CoreSelectionPolicy::LeastLoaded => select_rotating(cores, |c| (c.len(), c.utilization(time))),
            CoreSelectionPolicy::FirstLeastLoaded => select_first(cores, |c| c.utilization(time)),
            CoreSelectionPolicy::LowestFrequency => {
                select_rotating(cores, |c| dry_run_frequency(time, c, query, eval))
            }
            CoreSelectionPolicy::EarliestCompletionTime => select_rotating(cores, |c| queued_work(time, c, ctx)),
            CoreSelectionPolicy::EarliestFinishTime => {
                select_rotating(cores, |c| dry_run_finish_time(time, c, query, eval))
            }
        }
    }

    /// Whether the policy needs the regressors of the predictor.
    pub fn requires_regressors(&self) -> bool {
        matches!(self, CoreSelectionPolicy::EarliestCompletionTime)
    }
}

impl FromStr for CoreSelectionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LeastLoaded" => Ok(CoreSelectionPolicy::LeastLoaded),
            "FirstLeastLoaded" => Ok(CoreSelectionPolicy::FirstLeastLoaded),
            "LowestFrequency" => Ok(CoreSelectionPolicy::LowestFrequency),
            "EarliestCompletionTime" => Ok(CoreSelectionPolicy::EarliestCompletionTime),
            "EarliestFinishTime" => Ok(CoreSelectionPolicy::EarliestFinishTime),
            _ => Err(Error::unknown_name("core selection policy", s)),
        }
    }
}

impl Display for CoreSelectionPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn select_rotating<K: PartialOrd>(cores: &[Core], mut key: impl FnMut(&Core) -> K) -> CoreSelection {
    let mut best: Option<(usize, K, u64)> = None;
    let mut tie = false;
    for core in cores {
        let k = key(core);
        match &best {
            Some((_, best_key, best_ties)) => {
                if k < *best_key {
                    best = Some((core.id(), k, core.tie_selected()));
                    tie = false;
                } else if k == *best_key {
                    if core.tie_selected() < *best_ties {
                        best = Some((core.id(), k, core.tie_selected()));
                    }
                    tie = true;
                }
            }
            None => best = Some((core.id(), k, core.tie_selected())),
        }
    }
    match best {
        Some((core, _, _)) => CoreSelection { core, tie },
        None => panic!("device has no cores"),
    }
}

fn select_first<K: PartialOrd>(cores: &[Core], mut key: impl FnMut(&Core) -> K) -> CoreSelection {
    let mut best: Option<(usize, K)> = None;
    for core in cores {
        let k = key(core);
        if best.as_ref().map_or(true, |(_, best_key)| k < *best_key) {
            best = Some((core.id(), k));
        }
    }
    match best {
        Some((core, _)) => CoreSelection { core, tie: false },
        None => panic!("device has no cores"),
    }
}

/// Work queued on the core predicted at the maximum frequency, not counting a finished head.
pub fn queued_work(time: Time, core: &Core, ctx: &GovernorContext) -> Time {
    let finished = core.running().map_or(false, |q| q.is_complete(time));
    core.queue()
        .iter()
        .skip(if finished { 1 } else { 0 })
        .map(|q| ctx.predicted_max_time(q))
        .sum()
}

fn with_query(core: &Core, query: &QueryInfo) -> Core {
    let mut probe = core.clone();
    probe.enqueue(query.clone());
    probe
}

/// Frequency the governor would select if `query` joined the core.
pub fn dry_run_frequency(time: Time, core: &Core, query: &QueryInfo, eval: &EvalFrequency) -> Frequency {
    eval(time, &with_query(core, query))
}

/// Predicted finish time of `query` if it joined the core, using the measured service times at the
/// frequency the governor would select.
pub fn dry_run_finish_time(time: Time, core: &Core, query: &QueryInfo, eval: &EvalFrequency) -> Time {
    let probe = with_query(core, query);
    let frequency = eval(time, &probe);
    let mut finish = time;
    for (i, q) in probe.queue().iter().enumerate() {
        if i == 0 && probe.running().is_some() {
            finish += q.remaining_time(time, frequency);
        } else {
            finish += q.time(frequency);
        }
    }
    finish
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frequency::{FrequencySteps, MICROS_IN_SECOND};
    use crate::predictor::{CostPredictor, Regressor, Regressors, TimeEnergy};

    const FAST: Frequency = 2000000;
    const SLOW: Frequency = 1000000;

    // Query 1 takes 10 ms at the fast step and 20 ms at the slow one, query 2 twice as long.
    fn predictor() -> CostPredictor {
        let model = |alpha| Regressor {
            alpha,
            beta: 0.,
            rmse: 0.,
        };
        let mut regressors = Regressors::default();
        regressors.set_class(0, 0., &[(FAST, model(0.01)), (SLOW, model(0.02))]);
        let mut predictor = CostPredictor::new(FrequencySteps::new(vec![FAST, SLOW]), Some(regressors));
        let te = |ms: Time, energy| TimeEnergy {
            time: ms * 1000,
            energy,
        };
        predictor.add_query(1, 0, 1000, vec![te(10, 1.), te(20, 0.5)]);
        predictor.add_query(2, 0, 2000, vec![te(20, 2.), te(40, 1.)]);
        predictor
    }

    fn query(predictor: &CostPredictor, id: u64, uid: u64) -> QueryInfo {
        let mut q = predictor.query(id);
        q.activate(0, uid, uid);
        q
    }

    fn cores(n: usize) -> Vec<Core> {
        (0..n).map(|i| Core::new(i, 0, FAST, 500_000, MICROS_IN_SECOND)).collect()
    }

    #[test]
    fn least_loaded_breaks_ties_by_counter() {
        let predictor = predictor();
        let ctx = GovernorContext::new(&predictor);
        let eval = |_: Time, _: &Core| FAST;
        let q = query(&predictor, 1, 1);
        let mut cores = cores(3);
        cores[0].increment_tie_selected();
        let selection = CoreSelectionPolicy::LeastLoaded.select(0, &q, &cores, &ctx, &eval);
        assert_eq!(selection, CoreSelection { core: 1, tie: true });

        cores[1].enqueue(query(&predictor, 1, 2));
        cores[2].enqueue(query(&predictor, 1, 3));
        let selection = CoreSelectionPolicy::LeastLoaded.select(0, &q, &cores, &ctx, &eval);
        assert_eq!(selection, CoreSelection { core: 0, tie: false });
    }

    #[test]
    fn first_least_loaded_takes_lowest_id() {
        let predictor = predictor();
        let ctx = GovernorContext::new(&predictor);
        let eval = |_: Time, _: &Core| FAST;
        let q = query(&predictor, 1, 1);
        let mut cores = cores(3);
        cores[0].enqueue(query(&predictor, 1, 2));
        let selection = CoreSelectionPolicy::FirstLeastLoaded.select(0, &q, &cores, &ctx, &eval);
        assert_eq!(selection, CoreSelection { core: 1, tie: false });
    }

    #[test]
    fn earliest_completion_time_compares_queued_work() {
        let predictor = predictor();
        let ctx = GovernorContext::new(&predictor);
        let eval = |_: Time, _: &Core| FAST;
        let q = query(&predictor, 1, 1);
        let mut cores = cores(2);
        cores[0].enqueue(query(&predictor, 2, 2));
        cores[1].enqueue(query(&predictor, 1, 3));
        cores[1].enqueue(query(&predictor, 1, 4));
        assert_eq!(queued_work(0, &cores[0], &ctx), 20_000);
        assert_eq!(queued_work(0, &cores[1], &ctx), 20_000);
        let selection = CoreSelectionPolicy::EarliestCompletionTime.select(0, &q, &cores, &ctx, &eval);
        assert_eq!(selection, CoreSelection { core: 0, tie: true });

        cores[0].enqueue(query(&predictor, 1, 5));
        let selection = CoreSelectionPolicy::EarliestCompletionTime.select(0, &q, &cores, &ctx, &eval);
        assert_eq!(selection, CoreSelection { core: 1, tie: false });
    }

    #[test]
    fn dry_runs_use_the_governor_frequency() {
        let predictor = predictor();
        let ctx = GovernorContext::new(&predictor);
        // slow while a single query is queued
        let eval = |_: Time, core: &Core| if core.len() > 1 { FAST } else { SLOW };
        let q = query(&predictor, 1, 1);
        let mut cores = cores(2);
        cores[0].enqueue(query(&predictor, 1, 2));

        assert_eq!(dry_run_frequency(0, &cores[0], &q, &eval), FAST);
        assert_eq!(dry_run_frequency(0, &cores[1], &q, &eval), SLOW);
        let selection = CoreSelectionPolicy::LowestFrequency.select(0, &q, &cores, &ctx, &eval);
        assert_eq!(selection, CoreSelection { core: 1, tie: false });

        assert_eq!(dry_run_finish_time(0, &cores[0], &q, &eval), 20_000);
        assert_eq!(dry_run_finish_time(0, &cores[1], &q, &eval), 20_000);
        let selection = CoreSelectionPolicy::EarliestFinishTime.select(0, &q, &cores, &ctx, &eval);
        assert_eq!(selection, CoreSelection { core: 0, tie: true });
        // the probe leaves the cores untouched
        assert_eq!(cores[0].len(), 1);
        assert!(cores[1].is_empty());
    }

    #[test]
    fn policy_names() {
        for policy in [
            CoreSelectionPolicy::LeastLoaded,
            CoreSelectionPolicy::EarliestFinishTime,
        ] {
            assert_eq!(policy.to_string().parse::<CoreSelectionPolicy>().unwrap(), policy);
        }
        assert!("Random".parse::<CoreSelectionPolicy>().is_err());
        assert!(CoreSelectionPolicy::EarliestCompletionTime.requires_regressors());
        assert!(!CoreSelectionPolicy::EarliestFinishTime.requires_regressors());
    }
}
