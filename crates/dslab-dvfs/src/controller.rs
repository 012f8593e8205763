//! Distributed time budget controller.
//!
//! A logical query is fanned out to every replica node and completes only when its slowest shard does.
//! The controller mirrors the queues of all nodes and, for the query in service on a core, estimates how
//! long the peer shards of its queued queries will still wait behind other work. Part of that delay is
//! granted to the core as extra time budget, so the governor can pick a slower, cheaper frequency
//! without delaying the logical query.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::frequency::{Time, MICROS_IN_MILLI};
use crate::predictor::{CostPredictor, QueryId};
use crate::{log_debug, log_trace};

const NAME: &str = "controller";

/// Lightweight descriptor of a shard queued on a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PesosQuery {
    pub id: QueryId,
    pub version: u64,
    /// Predicted service time at the maximum frequency.
    pub service_time: Time,
    pub start_time: Option<Time>,
}

impl PesosQuery {
    fn is_same(&self, other: &PesosQuery) -> bool {
        self.id == other.id && self.version == other.version
    }

    /// Service time still to be spent at the maximum frequency.
    pub fn residual_time(&self, time: Time) -> Time {
        match self.start_time {
            Some(start) => (self.service_time - (time - start)).max(0),
            None => self.service_time,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShardCounters {
    pub arrived: usize,
    pub completed: usize,
}

/// Time budget to apply on a core while `query` is in service there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BudgetUpdate {
    pub node: usize,
    pub core: usize,
    pub query: QueryId,
    pub budget: Time,
}

struct CoreQueue {
    queries: VecDeque<PesosQuery>,
    time_budget: Time,
}

struct Node {
    predictor: Rc<CostPredictor>,
    cores: Vec<CoreQueue>,
}

pub struct TimeBudgetController {
    time_budget: Time,
    weight: f64,
    threshold: Time,
    nodes: Vec<Node>,
    open_queries: HashMap<(QueryId, u64), ShardCounters>,
}

impl TimeBudgetController {
    pub const DEFAULT_WEIGHT: f64 = 0.9;
    pub const DEFAULT_THRESHOLD: Time = MICROS_IN_MILLI;

    pub fn new(time_budget: Time) -> Self {
        Self::with_params(time_budget, Self::DEFAULT_WEIGHT, Self::DEFAULT_THRESHOLD)
    }

    /// `weight` damps the granted delay, `threshold` is the minimal budget change worth pushing.
    pub fn with_params(time_budget: Time, weight: f64, threshold: Time) -> Self {
        Self {
            time_budget,
            weight,
            threshold,
            nodes: Vec::new(),
            open_queries: HashMap::new(),
        }
    }

    /// Registers a node and returns its id.
    pub fn connect(&mut self, predictor: Rc<CostPredictor>, cores: usize) -> usize {
        let time_budget = self.time_budget;
        self.nodes.push(Node {
            predictor,
            cores: (0..cores)
                .map(|_| CoreQueue {
                    queries: VecDeque::new(),
                    time_budget,
                })
                .collect(),
        });
        self.nodes.len() - 1
    }

    pub fn nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn time_budget(&self) -> Time {
        self.time_budget
    }

    pub fn open_queries(&self) -> usize {
        self.open_queries.len()
    }

    pub fn shard_counters(&self, query: QueryId, version: u64) -> Option<ShardCounters> {
        self.open_queries.get(&(query, version)).copied()
    }

    pub fn queue(&self, node: usize, core: usize) -> &VecDeque<PesosQuery> {
        &self.nodes[node].cores[core].queries
    }

    /// Last budget pushed to a core.
    pub fn core_budget(&self, node: usize, core: usize) -> Time {
        self.nodes[node].cores[core].time_budget
    }

    /// Records the arrival of a shard on a node core.
    pub fn add_query(
        &mut self,
        time: Time,
        node: usize,
        core: usize,
        query: QueryId,
        version: u64,
    ) -> Vec<BudgetUpdate> {
        let state = &mut self.nodes[node];
        let profile = state.predictor.profile(query);
        let service_time = state
            .predictor
            .predict_service_time_at_max_frequency(profile.term_class, profile.postings);
        let queue = &mut state.cores[core].queries;
        let start_time = if queue.is_empty() { Some(time) } else { None };
        queue.push_back(PesosQuery {
            id: query,
            version,
            service_time,
            start_time,
        });
        self.open_queries.entry((query, version)).or_default().arrived += 1;
        self.analyze_system(time)
    }

    /// Records the completion of the shard at the head of a node core.
    pub fn completed_query(&mut self, time: Time, node: usize, core: usize) -> Vec<BudgetUpdate> {
        let state = &mut self.nodes[node].cores[core];
        let query = match state.queries.pop_front() {
            Some(query) => query,
            None => panic!("no query in service on core {} of node {}", core, node),
        };
        if let Some(next) = state.queries.front_mut() {
            next.start_time = Some(time);
        }
        state.time_budget = self.time_budget;

        let key = (query.id, query.version);
        let nodes = self.nodes.len();
        if let Some(counters) = self.open_queries.get_mut(&key) {
            counters.completed += 1;
            if counters.completed >= nodes {
                self.open_queries.remove(&key);
            }
        }
        self.analyze_system(time)
    }

    /// Recomputes the budget of every busy core and returns the ones worth pushing.
    pub fn analyze_system(&mut self, time: Time) -> Vec<BudgetUpdate> {
        let mut updates = Vec::new();
        for node in 0..self.nodes.len() {
            for core in 0..self.nodes[node].cores.len() {
                let head = match self.nodes[node].cores[core].queries.front() {
                    Some(head) => head.id,
                    None => continue,
                };
                let budget = self.time_budget + self.eval_time_budget(time, node, core);
                let state = &mut self.nodes[node].cores[core];
                if (budget - state.time_budget).abs() >= self.threshold {
                    state.time_budget = budget;
                    log_debug!(NAME, time, "node {} core {}: time budget {} us", node, core, budget);
                    updates.push(BudgetUpdate {
                        node,
                        core,
                        query: head,
                        budget,
                    });
                } else {
                    log_trace!(NAME, time, "node {} core {}: budget {} us unchanged", node, core, budget);
                }
            }
        }
        updates
    }

    /// Extra budget for a core: the smallest wait of its queued queries on the peer nodes, damped by
    /// the weight. Queries not queued on any peer impose no bound.
    ///
    /// The extra budget is zero if a queued query is the last shard pending, if a peer has an idle core
    /// while the shards of a query are still arriving, or if a shard is already in service on a peer.
    pub fn eval_time_budget(&self, time: Time, node: usize, core: usize) -> Time {
        let nodes = self.nodes.len();
        let mut extra: Option<Time> = None;
        for query in self.nodes[node].cores[core].queries.iter() {
            let counters = self
                .open_queries
                .get(&(query.id, query.version))
                .copied()
                .unwrap_or_default();
            if counters.completed + 1 == nodes {
                return 0;
            }
            if counters.arrived < nodes && self.has_idle_peer(node) {
                return 0;
            }
            let mut delay: Option<Time> = None;
            for (peer_id, peer) in self.nodes.iter().enumerate() {
                if peer_id == node {
                    continue;
                }
                for peer_core in peer.cores.iter() {
                    let position = match peer_core.queries.iter().position(|q| q.is_same(query)) {
                        Some(position) => position,
                        None => continue,
                    };
                    if position == 0 {
                        return 0;
                    }
                    let ahead: Time = peer_core
                        .queries
                        .iter()
                        .take(position)
                        .map(|q| q.residual_time(time))
                        .sum();
                    delay = Some(delay.map_or(ahead, |d| d.max(ahead)));
                }
            }
            if let Some(delay) = delay {
                extra = Some(extra.map_or(delay, |e| e.min(delay)));
            }
        }
        (extra.unwrap_or(0) as f64 * self.weight) as Time
    }

    fn has_idle_peer(&self, node: usize) -> bool {
        self.nodes
            .iter()
            .enumerate()
            .any(|(id, peer)| id != node && peer.cores.iter().any(|c| c.queries.is_empty()))
    }
}
