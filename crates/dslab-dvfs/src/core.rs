//! Per-core query queue and frequency state machine.

use std::collections::VecDeque;

use crate::energy::EnergyModel;
use crate::frequency::{Frequency, Time};
use crate::query::QueryInfo;

/// Counters collected over one control period of a utilization-driven governor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeriodCounters {
    /// Queries that arrived on the core.
    pub received: u64,
    /// Queries that completed on the core.
    pub processed: u64,
    /// Total service time of the processed queries.
    pub busy_time: Time,
}

/// Energy booked by [`Core::take_idle_energy`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IdleEnergy {
    /// Idle time charged at the frequency the core had when it went idle.
    pub at_current: Time,
    /// Idle time charged at the minimum frequency after the queue-check threshold.
    pub at_min: Time,
    pub energy: f64,
}

/// A single core of a device.
///
/// The head of the queue is the only query that can be in service. Queries are never reordered.
#[derive(Clone, Debug)]
pub struct Core {
    id: usize,
    device_id: usize,
    queue: VecDeque<QueryInfo>,
    running: bool,
    frequency: Frequency,
    time: Time,
    idle_time: Time,
    idle_time_interval: Time,
    queue_check: Time,
    tie_selected: u64,
    base_time_budget: Time,
    time_budget: Time,
    executed: u64,
    counters: PeriodCounters,
}

impl Core {
    pub fn new(id: usize, device_id: usize, frequency: Frequency, time_budget: Time, queue_check: Time) -> Self {
        Self {
            id,
            device_id,
            queue: VecDeque::new(),
            running: false,
            frequency,
            time: 0,
            idle_time: 0,
            idle_time_interval: 0,
            queue_check,
            tie_selected: 0,
            base_time_budget: time_budget,
            time_budget,
            executed: 0,
            counters: PeriodCounters::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn queue(&self) -> &VecDeque<QueryInfo> {
        &self.queue
    }

    pub fn head(&self) -> Option<&QueryInfo> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the query currently in service.
    pub fn running(&self) -> Option<&QueryInfo> {
        if self.running {
            self.queue.front()
        } else {
            None
        }
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Last time observed by the core, or the end of the query in service.
    pub fn time(&self) -> Time {
        self.time
    }

    pub fn idle_time(&self) -> Time {
        self.idle_time
    }

    pub fn idle_time_interval(&self) -> Time {
        self.idle_time_interval
    }

    pub fn tie_selected(&self) -> u64 {
        self.tie_selected
    }

    pub(crate) fn increment_tie_selected(&mut self) {
        self.tie_selected += 1;
    }

    pub fn time_budget(&self) -> Time {
        self.time_budget
    }

    pub fn base_time_budget(&self) -> Time {
        self.base_time_budget
    }

    /// Sets the time budget, returns whether it changed.
    pub fn set_time_budget(&mut self, budget: Time) -> bool {
        let changed = self.time_budget != budget;
        self.time_budget = budget;
        changed
    }

    pub fn executed_queries(&self) -> u64 {
        self.executed
    }

    pub fn counters(&self) -> &PeriodCounters {
        &self.counters
    }

    #[cfg(test)]
    pub(crate) fn counters_mut(&mut self) -> &mut PeriodCounters {
        &mut self.counters
    }

    pub(crate) fn reset_counters(&mut self) {
        self.counters = PeriodCounters::default();
    }

    /// Number of queries still to be served at `time`, not counting a head which has already finished.
    pub fn utilization(&self, time: Time) -> usize {
        match self.running() {
            Some(head) if head.is_complete(time) => self.queue.len() - 1,
            _ => self.queue.len(),
        }
    }

    /// Appends a query to the tail of the queue.
    pub fn enqueue(&mut self, mut query: QueryInfo) {
        query.set_core_id(self.id);
        self.counters.received += 1;
        self.queue.push_back(query);
    }

    /// Removes the last waiting query, never the one in service.
    pub(crate) fn steal_tail(&mut self) -> Option<QueryInfo> {
        if self.queue.len() > 1 {
            self.counters.received -= self.counters.received.min(1);
            self.queue.pop_back()
        } else {
            None
        }
    }

    /// Advances the core clock, accumulating idle time while nothing is in service.
    pub fn set_time(&mut self, time: Time) {
        if self.time <= time {
            if !self.running {
                self.idle_time += time - self.time;
            }
            self.time = time;
        }
    }

    /// Changes the frequency at `time`. If a query is in service its remaining time and energy are
    /// recomputed and the new end time is returned.
    pub fn set_frequency(&mut self, time: Time, frequency: Frequency, model: &dyn EnergyModel) -> Option<Time> {
        if frequency == self.frequency {
            return None;
        }
        self.frequency = frequency;
        if !self.running {
            return None;
        }
        let head = self.queue.front_mut()?;
        let te = head.time_energy(frequency);
        let energy = model.compute_energy(te.energy, frequency, te.time, false);
        head.update_time_energy(time, frequency, energy);
        self.time = head.end_time();
        Some(self.time)
    }

    /// Starts the head query at the current frequency and returns its end time.
    ///
    /// Pending idle time must be booked before, it is discarded here.
    pub(crate) fn start_head(&mut self, model: &dyn EnergyModel) -> Option<Time> {
        if self.running {
            return self.queue.front().map(|q| q.end_time());
        }
        let frequency = self.frequency;
        let start = self.time;
        let head = self.queue.front_mut()?;
        let start = start.max(head.arrival_time());
        let te = head.time_energy(frequency);
        let energy = model.compute_energy(te.energy, frequency, te.time, false);
        head.start_execution(start, frequency, te.time, energy);
        self.running = true;
        self.time = head.end_time();
        self.idle_time = 0;
        self.idle_time_interval = 0;
        Some(self.time)
    }

    /// Removes the head query if it has finished by `time`.
    pub(crate) fn finish_head(&mut self, time: Time) -> Option<QueryInfo> {
        match self.running() {
            Some(head) if head.is_complete(time) => {}
            _ => return None,
        }
        let query = self.queue.pop_front()?;
        self.running = false;
        self.executed += 1;
        self.counters.processed += 1;
        self.counters.busy_time += query.service_time();
        self.time_budget = self.base_time_budget;
        Some(query)
    }

    /// Books the accumulated idle time.
    ///
    /// Idle time is charged at the current frequency until the core has been idle for the queue-check
    /// interval, after which the core drops to `min_frequency` for the rest of the idle period.
    pub fn take_idle_energy(&mut self, min_frequency: Frequency, model: &dyn EnergyModel) -> IdleEnergy {
        if self.idle_time == 0 {
            return IdleEnergy::default();
        }
        let idle = self.idle_time;
        self.idle_time = 0;
        if self.idle_time_interval + idle < self.queue_check {
            self.idle_time_interval += idle;
            return IdleEnergy {
                at_current: idle,
                at_min: 0,
                energy: model.compute_energy(0., self.frequency, idle, true),
            };
        }
        let at_current = self.queue_check - self.idle_time_interval;
        let at_min = idle - at_current;
        let mut energy = model.compute_energy(0., self.frequency, at_current, true);
        self.frequency = min_frequency;
        energy += model.compute_energy(0., min_frequency, at_min, true);
        self.idle_time_interval = 0;
        IdleEnergy {
            at_current,
            at_min,
            energy,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::frequency::{FrequencySteps, MICROS_IN_SECOND};
    use crate::predictor::{CostPredictor, TimeEnergy};

    /// Records the frequency of every idle interval.
    #[derive(Clone, Default)]
    struct RecordingModel {
        idle: RefCell<Vec<(Frequency, Time)>>,
    }

    impl EnergyModel for RecordingModel {
        fn compute_energy(&self, energy: f64, frequency: Frequency, interval: Time, idle: bool) -> f64 {
            if idle {
                self.idle.borrow_mut().push((frequency, interval));
                interval as f64 * frequency as f64 * 1e-12
            } else {
                energy
            }
        }

        fn static_power(&self, _interval: Time) -> f64 {
            0.
        }

        fn get_name(&self) -> String {
            "recording".to_string()
        }
    }

    fn query(predictor: &CostPredictor, arrival: Time) -> QueryInfo {
        let mut q = predictor.query(1);
        q.activate(arrival, arrival as u64, 0);
        q
    }

    fn predictor() -> CostPredictor {
        let mut predictor = CostPredictor::new(FrequencySteps::new(vec![2000000, 1000000]), None);
        predictor.add_query(
            1,
            0,
            10,
            vec![
                TimeEnergy { time: 100, energy: 1. },
                TimeEnergy { time: 200, energy: 1.5 },
            ],
        );
        predictor
    }

    #[test]
    fn idle_below_queue_check_uses_current_frequency() {
        let model = RecordingModel::default();
        let mut core = Core::new(0, 0, 2000000, 500_000, MICROS_IN_SECOND);
        core.set_time(400_000);
        let idle = core.take_idle_energy(1000000, &model);
        assert_eq!(idle.at_current, 400_000);
        assert_eq!(idle.at_min, 0);
        assert_eq!(core.frequency(), 2000000);
        assert_eq!(*model.idle.borrow(), vec![(2000000, 400_000)]);
        assert_eq!(core.idle_time_interval(), 400_000);
    }

    #[test]
    fn idle_above_queue_check_drops_to_min_frequency() {
        let model = RecordingModel::default();
        let mut core = Core::new(0, 0, 2000000, 500_000, MICROS_IN_SECOND);
        core.set_time(300_000);
        core.take_idle_energy(1000000, &model);
        core.set_time(1_500_000);
        let idle = core.take_idle_energy(1000000, &model);
        assert_eq!(idle.at_current, 700_000);
        assert_eq!(idle.at_min, 500_000);
        assert_eq!(core.frequency(), 1000000);
        assert_eq!(
            *model.idle.borrow(),
            vec![(2000000, 300_000), (2000000, 700_000), (1000000, 500_000)]
        );
        assert_abs_diff_eq!(idle.energy, (700_000. * 2e6 + 500_000. * 1e6) * 1e-12, epsilon = 1e-9);
    }

    #[test]
    fn busy_core_accumulates_no_idle_time() {
        let predictor = predictor();
        let model = RecordingModel::default();
        let mut core = Core::new(0, 0, 2000000, 500_000, MICROS_IN_SECOND);
        core.set_time(50);
        core.enqueue(query(&predictor, 50));
        assert_eq!(core.idle_time(), 50);
        assert_eq!(core.start_head(&model), Some(150));
        assert_eq!(core.idle_time(), 0);
        core.set_time(120);
        assert_eq!(core.idle_time(), 0);
        assert_eq!(core.utilization(120), 1);
        assert_eq!(core.utilization(150), 0);
        assert!(core.finish_head(149).is_none());
        let done = core.finish_head(150).unwrap();
        assert_eq!(done.response_time(), 100);
        core.set_time(170);
        assert_eq!(core.idle_time(), 20);
        assert_eq!(core.counters().processed, 1);
        assert_eq!(core.counters().busy_time, 100);
    }

    #[test]
    fn frequency_change_reschedules_running_query() {
        let predictor = predictor();
        let model = RecordingModel::default();
        let mut core = Core::new(0, 0, 2000000, 500_000, MICROS_IN_SECOND);
        core.enqueue(query(&predictor, 0));
        core.start_head(&model);
        assert_eq!(core.set_frequency(50, 2000000, &model), None);
        assert_eq!(core.set_frequency(50, 1000000, &model), Some(150));
        assert_eq!(core.time(), 150);
        assert_eq!(core.running().map(|q| q.frequency()), Some(1000000));
    }

    #[test]
    fn steal_keeps_running_head() {
        let predictor = predictor();
        let model = RecordingModel::default();
        let mut core = Core::new(0, 0, 2000000, 500_000, MICROS_IN_SECOND);
        core.enqueue(query(&predictor, 0));
        core.start_head(&model);
        assert!(core.steal_tail().is_none());
        core.enqueue(query(&predictor, 10));
        assert_eq!(core.steal_tail().map(|q| q.arrival_time()), Some(10));
        assert_eq!(core.len(), 1);
    }
}
