//! Multi-core device driven by a frequency governor.

use std::rc::Rc;

use crate::core::Core;
use crate::energy::EnergyModel;
use crate::error::{Error, Result};
use crate::frequency::{Frequency, FrequencySteps, Time, MICROS_IN_MILLI, MICROS_IN_SECOND};
use crate::governor::{FrequencyGovernor, GovernorContext};
use crate::predictor::{CostPredictor, QueryId};
use crate::query::QueryInfo;
use crate::selection::CoreSelectionPolicy;
use crate::stats::Stats;
use crate::{log_debug, log_trace};

#[derive(Clone, Debug)]
pub struct DeviceOptions {
    pub cores: usize,
    pub time_budget: Time,
    /// Idle time after which an idle core drops to the minimum frequency.
    pub queue_check: Time,
    /// Lets a core which drained its queue take the last waiting query of another core.
    pub job_stealing: bool,
    /// Overrides the core selection policy of the governor.
    pub selection: Option<CoreSelectionPolicy>,
    pub sampling_interval: Time,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            cores: 4,
            time_budget: 500 * MICROS_IN_MILLI,
            queue_check: MICROS_IN_SECOND,
            job_stealing: false,
            selection: None,
            sampling_interval: 5 * 60 * MICROS_IN_SECOND,
        }
    }
}

/// Completion the driver has to deliver back to the device via [`Device::on_completion`].
///
/// A newer entry for the same query supersedes older ones, see [`Device::is_pending`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduledCompletion {
    pub core: usize,
    pub uid: u64,
    pub time: Time,
}

#[derive(Clone, Debug)]
pub struct CompletedQuery {
    pub core: usize,
    pub query: QueryInfo,
}

pub struct Device {
    id: usize,
    name: String,
    predictor: Rc<CostPredictor>,
    cores: Vec<Core>,
    governor: Box<dyn FrequencyGovernor>,
    energy_model: Box<dyn EnergyModel>,
    selection: Option<CoreSelectionPolicy>,
    job_stealing: bool,
    next_uid: u64,
    time: Time,
    scheduled: Vec<ScheduledCompletion>,
    stats: Stats,
}

impl Device {
    pub fn new(
        id: usize,
        predictor: Rc<CostPredictor>,
        governor: Box<dyn FrequencyGovernor>,
        energy_model: Box<dyn EnergyModel>,
        options: DeviceOptions,
    ) -> Result<Self> {
        if options.cores == 0 {
            return Err(Error::Config("device must have at least one core".to_string()));
        }
        if !predictor.has_regressors() {
            if governor.requires_regressors() {
                return Err(Error::MissingRegressors(governor.get_name()));
            }
            if let Some(policy) = options.selection.filter(|p| p.requires_regressors()) {
                return Err(Error::MissingRegressors(policy.to_string()));
            }
            if options.selection.is_none() && governor.default_selection().requires_regressors() {
                return Err(Error::MissingRegressors(governor.default_selection().to_string()));
            }
        }
        let min_frequency = predictor.steps().min();
        let cores = (0..options.cores)
            .map(|i| Core::new(i, id, min_frequency, options.time_budget, options.queue_check))
            .collect();
        Ok(Self {
            id,
            name: format!("device-{}", id),
            predictor,
            cores,
            governor,
            energy_model,
            selection: options.selection,
            job_stealing: options.job_stealing,
            next_uid: 0,
            time: 0,
            scheduled: Vec::new(),
            stats: Stats::new(options.sampling_interval),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn predictor(&self) -> &Rc<CostPredictor> {
        &self.predictor
    }

    pub fn steps(&self) -> &FrequencySteps {
        self.predictor.steps()
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    pub fn core(&self, id: usize) -> &Core {
        &self.cores[id]
    }

    pub fn governor(&self) -> &dyn FrequencyGovernor {
        self.governor.as_ref()
    }

    pub fn energy_model(&self) -> &dyn EnergyModel {
        self.energy_model.as_ref()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn executed_queries(&self) -> u64 {
        self.cores.iter().map(|c| c.executed_queries()).sum()
    }

    pub fn energy_consumption(&self) -> f64 {
        self.stats.energy
    }

    pub fn idle_energy(&self) -> f64 {
        self.stats.idle_energy
    }

    /// Whether any core still has queries.
    pub fn is_busy(&self) -> bool {
        self.cores.iter().any(|c| !c.is_empty())
    }

    /// Returns and clears the completions scheduled since the last call.
    pub fn take_scheduled(&mut self) -> Vec<ScheduledCompletion> {
        std::mem::take(&mut self.scheduled)
    }

    /// Whether a scheduled completion still matches the query in service.
    pub fn is_pending(&self, completion: &ScheduledCompletion) -> bool {
        self.cores
            .get(completion.core)
            .and_then(|c| c.running())
            .map_or(false, |q| q.uid() == completion.uid && q.end_time() == completion.time)
    }

    /// Advances the clock of every core.
    pub fn set_time(&mut self, time: Time) {
        self.time = self.time.max(time);
        for core in self.cores.iter_mut() {
            core.set_time(time);
        }
    }

    /// Handles the arrival of a known query and returns the chosen core and the uid of the query
    /// on this device. `version` identifies the logical query the arrival belongs to.
    pub fn on_arrival(&mut self, time: Time, query_id: QueryId, version: u64) -> (usize, u64) {
        self.set_time(time);
        let mut query = self.predictor.query(query_id);
        self.next_uid += 1;
        let uid = self.next_uid;
        query.activate(time, uid, version);
        let core_id = self.select_core(time, &query);
        log_debug!(
            self.name.as_str(),
            time,
            "query {} (uid {}) arrived, selected core {}",
            query_id,
            uid,
            core_id
        );
        self.add_query(time, core_id, query);
        self.compute_completion_time(time, core_id, uid);
        (core_id, uid)
    }

    /// Chooses the core for a new query and updates the tie counter on ties.
    pub fn select_core(&mut self, time: Time, query: &QueryInfo) -> usize {
        let ctx = GovernorContext::new(&self.predictor);
        let selection = match self.selection {
            Some(policy) => {
                let governor = &self.governor;
                let eval = |t: Time, core: &Core| governor.eval_frequency(t, core, &ctx);
                policy.select(time, query, &self.cores, &ctx, &eval)
            }
            None => self.governor.select_core(time, query, &self.cores, &ctx),
        };
        if selection.tie {
            self.cores[selection.core].increment_tie_selected();
        }
        selection.core
    }

    /// Appends a query to a core and lets the governor react to the new queue.
    ///
    /// Pending idle time is booked first, so the idle period is charged at the frequency the core idled at
    /// and a queue-check step-down can't override the governor's choice.
    pub fn add_query(&mut self, time: Time, core_id: usize, query: QueryInfo) {
        self.book_idle_energy(time);
        self.cores[core_id].enqueue(query);
        self.stats.add_arrival(time);
        if self.governor.control_period().is_none() {
            self.update_frequency(time, core_id);
        }
    }

    /// Starts the query if it is at the head of its core and returns its end time.
    ///
    /// Returns `None` while the query waits behind others, its completion is computed once it reaches
    /// the head of the queue.
    pub fn compute_completion_time(&mut self, time: Time, core_id: usize, uid: u64) -> Option<Time> {
        let core = &self.cores[core_id];
        match core.head() {
            Some(head) if head.uid() == uid => {}
            _ => return None,
        }
        if let Some(running) = core.running() {
            return Some(running.end_time());
        }
        self.book_idle_energy(time);
        let end = self.cores[core_id].start_head(self.energy_model.as_ref())?;
        log_trace!(self.name.as_str(), time, "core {} started uid {}, ends at {}", core_id, uid, end);
        self.scheduled.push(ScheduledCompletion {
            core: core_id,
            uid,
            time: end,
        });
        Some(end)
    }

    /// Sets the frequency of a core, rescheduling the completion of the query in service.
    pub fn set_frequency(&mut self, time: Time, core_id: usize, frequency: Frequency) {
        let core = &mut self.cores[core_id];
        let old = core.frequency();
        if let Some(end) = core.set_frequency(time, frequency, self.energy_model.as_ref()) {
            if let Some(running) = core.running() {
                self.scheduled.push(ScheduledCompletion {
                    core: core_id,
                    uid: running.uid(),
                    time: end,
                });
            }
        }
        if old != frequency {
            log_debug!(self.name.as_str(), time, "core {} frequency {} -> {}", core_id, old, frequency);
        }
    }

    fn update_frequency(&mut self, time: Time, core_id: usize) {
        let ctx = GovernorContext::new(&self.predictor);
        let frequency = self.governor.eval_frequency(time, &self.cores[core_id], &ctx);
        self.set_frequency(time, core_id, frequency);
    }

    /// Applies a time budget pushed for `query_id`. The frequency is re-evaluated only when the query
    /// is at the head of the core. Returns whether the budget changed.
    pub fn set_time_budget(&mut self, time: Time, core_id: usize, budget: Time, query_id: QueryId) -> bool {
        let core = &mut self.cores[core_id];
        if !core.set_time_budget(budget) {
            return false;
        }
        log_debug!(self.name.as_str(), time, "core {} time budget set to {} us", core_id, budget);
        let is_head = core.head().map_or(false, |q| q.id() == query_id);
        if is_head && self.governor.control_period().is_none() {
            self.update_frequency(time, core_id);
        }
        true
    }

    /// Handles a completion notification, returning the queries which finished by `time`.
    pub fn on_completion(&mut self, time: Time) -> Vec<CompletedQuery> {
        self.set_time(time);
        let mut completed = Vec::new();
        for core_id in 0..self.cores.len() {
            if let Some(query) = self.check_completion(time, core_id) {
                completed.push(CompletedQuery { core: core_id, query });
            }
        }
        completed
    }

    /// Removes the finished head query of a core and starts the next one.
    pub fn check_completion(&mut self, time: Time, core_id: usize) -> Option<QueryInfo> {
        let query = self.cores[core_id].finish_head(time)?;
        let energy = query.energy_consumption() + self.energy_model.static_power(query.service_time());
        self.stats.add_query(query.end_time(), query.response_time(), energy);
        log_debug!(
            self.name.as_str(),
            time,
            "core {} completed query {} (uid {}) in {} us",
            core_id,
            query.id(),
            query.uid(),
            query.response_time()
        );
        self.book_idle_energy(time);

        if self.cores[core_id].is_empty() && self.job_stealing {
            self.steal_query(time, core_id);
        }
        if let Some(uid) = self.cores[core_id].head().map(|q| q.uid()) {
            if self.governor.control_period().is_none() {
                self.update_frequency(time, core_id);
            }
            self.compute_completion_time(time, core_id, uid);
        }
        Some(query)
    }

    /// Moves the last waiting query of the fastest loaded core to an idle core.
    fn steal_query(&mut self, time: Time, thief: usize) {
        let mut victim: Option<(usize, Frequency)> = None;
        for core in self.cores.iter().filter(|c| c.id() != thief && c.len() > 1) {
            if victim.map_or(true, |(_, frequency)| core.frequency() > frequency) {
                victim = Some((core.id(), core.frequency()));
            }
        }
        let (victim, _) = match victim {
            Some(v) => v,
            None => return,
        };
        if let Some(query) = self.cores[victim].steal_tail() {
            log_debug!(
                self.name.as_str(),
                time,
                "core {} stole query {} (uid {}) from core {}",
                thief,
                query.id(),
                query.uid(),
                victim
            );
            self.cores[thief].enqueue(query);
            if self.governor.control_period().is_none() {
                self.update_frequency(time, victim);
            }
        }
    }

    /// Periodic control step of timer driven governors.
    pub fn control_tick(&mut self, time: Time) {
        if self.governor.control_period().is_none() {
            return;
        }
        self.set_time(time);
        self.book_idle_energy(time);
        for core_id in 0..self.cores.len() {
            self.update_frequency(time, core_id);
            self.cores[core_id].reset_counters();
        }
    }

    /// Books the idle energy accumulated by all cores.
    pub fn book_idle_energy(&mut self, time: Time) {
        let min_frequency = self.predictor.steps().min();
        let mut energy = 0.;
        for core in self.cores.iter_mut() {
            energy += core.take_idle_energy(min_frequency, self.energy_model.as_ref()).energy;
        }
        if energy > 0. {
            self.stats.add_idle_energy(time, energy);
        }
    }

    /// Closes the idle periods at the end of the simulation.
    pub fn finish(&mut self, time: Time) {
        self.set_time(time);
        self.book_idle_energy(time);
    }
}
