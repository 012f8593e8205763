//! Deterministic replay of query arrivals on one or more devices.
//!
//! Events are processed in the order of their time, events with equal time in the order of creation.
//! In a distributed setup every arrival is sent to all devices and the logical query completes when
//! its last shard does.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

use serde::Serialize;

use crate::config::SimulationConfig;
use crate::controller::{BudgetUpdate, TimeBudgetController};
use crate::device::{Device, ScheduledCompletion};
use crate::energy::energy_model_resolver;
use crate::error::{Error, Result};
use crate::frequency::{micros_to_millis, millis_to_micros, FrequencySteps, Time};
use crate::governor::governor_resolver;
use crate::predictor::{CostPredictor, QueryId};
use crate::stats::SampleMetric;
use crate::workload::{build_workload, load_arrivals};
use crate::{log_info, log_trace};

const NAME: &str = "simulation";

pub type EventId = u64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventData {
    Arrival { query: QueryId },
    Completion { node: usize, completion: ScheduledCompletion },
    ControlTick { node: usize },
}

#[derive(Clone, Debug)]
pub struct Event {
    pub id: EventId,
    pub time: Time,
    pub data: EventData,
}

impl Eq for Event {}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other.time.cmp(&self.time).then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct LogicalQuery {
    arrival: Time,
    remaining: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceSummary {
    pub name: String,
    pub governor: String,
    pub executed_queries: u64,
    pub energy: f64,
    pub idle_energy: f64,
}

/// Aggregated results, latencies in ms.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationSummary {
    pub time: f64,
    pub completed_queries: u64,
    pub mean_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub max_latency: f64,
    pub energy: f64,
    pub devices: Vec<DeviceSummary>,
}

pub struct Simulation {
    clock: Time,
    event_count: u64,
    events: BinaryHeap<Event>,
    pending: usize,
    devices: Vec<Device>,
    controller: Option<TimeBudgetController>,
    next_version: u64,
    open_queries: HashMap<u64, LogicalQuery>,
    latency: SampleMetric<Time>,
}

impl Simulation {
    pub fn new(devices: Vec<Device>, controller: Option<TimeBudgetController>) -> Self {
        assert!(!devices.is_empty(), "simulation needs at least one device");
        let mut sim = Self {
            clock: 0,
            event_count: 0,
            events: BinaryHeap::new(),
            pending: 0,
            devices,
            controller,
            next_version: 0,
            open_queries: HashMap::new(),
            latency: SampleMetric::default(),
        };
        for node in 0..sim.devices.len() {
            if let Some(period) = sim.devices[node].governor().control_period() {
                sim.add_event(period, EventData::ControlTick { node });
            }
        }
        sim
    }

    /// Builds devices, controller and workload described by the config.
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        if config.data.nodes.is_empty() {
            return Err(Error::Config("no node data directories given".to_string()));
        }
        let controller_enabled = config.controller.enabled && config.data.nodes.len() > 1;
        if controller_enabled && config.job_stealing {
            return Err(Error::Config(
                "job stealing can't be combined with the time budget controller".to_string(),
            ));
        }
        let steps = FrequencySteps::from_file(&config.data.frequencies)?;
        let mut controller = if controller_enabled {
            Some(TimeBudgetController::with_params(
                config.time_budget_micros(),
                config.controller.weight,
                millis_to_micros(config.controller.threshold),
            ))
        } else {
            None
        };

        let mut devices = Vec::new();
        for (node, dir) in config.data.nodes.iter().enumerate() {
            let predictor = Rc::new(CostPredictor::load(steps.clone(), dir, config.mode)?);
            log_info!(
                NAME,
                0,
                "node {}: loaded {} queries from {}",
                node,
                predictor.query_count(),
                dir.display()
            );
            if let Some(controller) = controller.as_mut() {
                controller.connect(predictor.clone(), config.cores);
            }
            devices.push(Device::new(
                node,
                predictor,
                governor_resolver(&config.governor)?,
                energy_model_resolver(&config.energy_model, config.cores)?,
                config.device_options(),
            )?);
        }

        let mut sim = Self::new(devices, controller);
        if let Some(workload) = &config.workload {
            let arrivals = load_arrivals(&workload.arrivals)?;
            let queries = build_workload(
                &arrivals,
                sim.devices[0].predictor(),
                workload.queries,
                workload.seed.unwrap_or(50000),
            )?;
            for device in sim.devices.iter().skip(1) {
                if let Some((_, query)) = queries.iter().find(|(_, q)| !device.predictor().contains(*q)) {
                    return Err(Error::UnknownQuery(*query));
                }
            }
            for (time, query) in queries {
                sim.add_arrival(time, query);
            }
        }
        Ok(sim)
    }

    fn add_event(&mut self, time: Time, data: EventData) -> EventId {
        let id = self.event_count;
        self.event_count += 1;
        if !matches!(data, EventData::ControlTick { .. }) {
            self.pending += 1;
        }
        self.events.push(Event { id, time, data });
        id
    }

    /// Schedules the arrival of a query known to every device.
    pub fn add_arrival(&mut self, time: Time, query: QueryId) -> EventId {
        assert!(time >= self.clock, "arrival at {} is in the past", time);
        self.add_event(time, EventData::Arrival { query })
    }

    pub fn time(&self) -> Time {
        self.clock
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, node: usize) -> &Device {
        &self.devices[node]
    }

    pub fn controller(&self) -> Option<&TimeBudgetController> {
        self.controller.as_ref()
    }

    /// Response times of the completed logical queries.
    pub fn latency(&self) -> &SampleMetric<Time> {
        &self.latency
    }

    pub fn completed_queries(&self) -> u64 {
        self.latency.len() as u64
    }

    /// Processes the next event, returns false if there are no events left.
    pub fn step(&mut self) -> bool {
        let event = match self.events.pop() {
            Some(event) => event,
            None => return false,
        };
        self.clock = event.time;
        match event.data {
            EventData::Arrival { query } => {
                self.pending -= 1;
                self.on_arrival(event.time, query);
            }
            EventData::Completion { node, completion } => {
                self.pending -= 1;
                self.on_completion(event.time, node, completion);
            }
            EventData::ControlTick { node } => {
                self.on_control_tick(event.time, node);
            }
        }
        true
    }

    pub fn step_until_no_events(&mut self) {
        while self.step() {}
    }

    /// Processes events up to `time` inclusive and advances the clock to it.
    /// Returns whether there are events left.
    pub fn step_until_time(&mut self, time: Time) -> bool {
        while let Some(event) = self.events.peek() {
            if event.time > time {
                break;
            }
            self.step();
        }
        self.clock = self.clock.max(time);
        !self.events.is_empty()
    }

    /// Replays all events and closes the idle periods of all devices.
    pub fn run(&mut self) -> SimulationSummary {
        self.step_until_no_events();
        self.finish();
        let summary = self.summary();
        log_info!(
            NAME,
            self.clock,
            "completed {} queries, mean latency {:.3} ms, p99 {:.3} ms, energy {:.3} J",
            summary.completed_queries,
            summary.mean_latency,
            summary.p99_latency,
            summary.energy
        );
        summary
    }

    /// Books the idle energy of all devices up to the current time.
    pub fn finish(&mut self) {
        let time = self.clock;
        for device in self.devices.iter_mut() {
            device.finish(time);
        }
    }

    pub fn summary(&self) -> SimulationSummary {
        let quantile = |q: f64| micros_to_millis(self.latency.quantile(q).unwrap_or(0));
        SimulationSummary {
            time: micros_to_millis(self.clock),
            completed_queries: self.completed_queries(),
            mean_latency: self.latency.mean() / 1000.,
            p95_latency: quantile(0.95),
            p99_latency: quantile(0.99),
            max_latency: quantile(1.),
            energy: self.devices.iter().map(|d| d.energy_consumption()).sum(),
            devices: self
                .devices
                .iter()
                .map(|d| DeviceSummary {
                    name: d.name().to_string(),
                    governor: d.governor().get_name(),
                    executed_queries: d.executed_queries(),
                    energy: d.energy_consumption(),
                    idle_energy: d.idle_energy(),
                })
                .collect(),
        }
    }

    fn on_arrival(&mut self, time: Time, query: QueryId) {
        self.next_version += 1;
        let version = self.next_version;
        self.open_queries.insert(
            version,
            LogicalQuery {
                arrival: time,
                remaining: self.devices.len(),
            },
        );
        for node in 0..self.devices.len() {
            let (core, _) = self.devices[node].on_arrival(time, query, version);
            let updates = match self.controller.as_mut() {
                Some(controller) => controller.add_query(time, node, core, query, version),
                None => Vec::new(),
            };
            self.apply_budgets(time, updates);
        }
        self.collect_scheduled();
    }

    fn on_completion(&mut self, time: Time, node: usize, completion: ScheduledCompletion) {
        if !self.devices[node].is_pending(&completion) {
            log_trace!(NAME, time, "skipping superseded completion {:?} on node {}", completion, node);
            return;
        }
        for done in self.devices[node].on_completion(time) {
            let updates = match self.controller.as_mut() {
                Some(controller) => controller.completed_query(time, node, done.core),
                None => Vec::new(),
            };
            self.apply_budgets(time, updates);

            let version = done.query.version();
            let finished = match self.open_queries.get_mut(&version) {
                Some(logical) => {
                    logical.remaining -= 1;
                    logical.remaining == 0
                }
                None => false,
            };
            if finished {
                if let Some(logical) = self.open_queries.remove(&version) {
                    self.latency.add(done.query.end_time() - logical.arrival);
                }
            }
        }
        self.collect_scheduled();
    }

    fn on_control_tick(&mut self, time: Time, node: usize) {
        self.devices[node].control_tick(time);
        self.collect_scheduled();
        let period = self.devices[node].governor().control_period();
        if let Some(period) = period {
            if self.pending > 0 || self.devices.iter().any(|d| d.is_busy()) {
                self.add_event(time + period, EventData::ControlTick { node });
            }
        }
    }

    fn apply_budgets(&mut self, time: Time, updates: Vec<BudgetUpdate>) {
        for update in updates {
            self.devices[update.node].set_time_budget(time, update.core, update.budget, update.query);
        }
    }

    fn collect_scheduled(&mut self) {
        for node in 0..self.devices.len() {
            for completion in self.devices[node].take_scheduled() {
                self.add_event(completion.time, EventData::Completion { node, completion });
            }
        }
    }
}
