//! Lifecycle record of a single query.

use std::rc::Rc;

use crate::frequency::{Frequency, Time};
use crate::predictor::{QueryId, QueryProfile, TimeEnergy, TimeEnergyTable};

/// A query tracked from its arrival on a core until its completion.
///
/// The time/energy table is shared between all records of the same query.
/// Invariant: `end >= current >= start >= arrival` once the query is running.
#[derive(Clone, Debug)]
pub struct QueryInfo {
    id: QueryId,
    uid: u64,
    version: u64,
    term_class: u32,
    postings: u64,
    table: Rc<TimeEnergyTable>,
    arrival: Time,
    core_id: Option<usize>,
    frequency: Frequency,
    start: Time,
    current: Time,
    end: Time,
    previous_energy: f64,
    last_energy: f64,
    energy: f64,
}

impl QueryInfo {
    pub(crate) fn new(profile: &QueryProfile) -> Self {
        Self {
            id: profile.id,
            uid: 0,
            version: 0,
            term_class: profile.term_class,
            postings: profile.postings,
            table: profile.table.clone(),
            arrival: 0,
            core_id: None,
            frequency: 0,
            start: 0,
            current: 0,
            end: 0,
            previous_energy: 0.,
            last_energy: 0.,
            energy: 0.,
        }
    }

    /// Marks the query as arrived. `uid` identifies this occurrence on the device,
    /// `version` identifies the logical query it belongs to.
    pub fn activate(&mut self, time: Time, uid: u64, version: u64) {
        self.arrival = time;
        self.uid = uid;
        self.version = version;
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn term_class(&self) -> u32 {
        self.term_class
    }

    pub fn postings(&self) -> u64 {
        self.postings
    }

    pub fn arrival_time(&self) -> Time {
        self.arrival
    }

    pub fn core_id(&self) -> Option<usize> {
        self.core_id
    }

    pub(crate) fn set_core_id(&mut self, core_id: usize) {
        self.core_id = Some(core_id);
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn start_time(&self) -> Time {
        self.start
    }

    pub fn end_time(&self) -> Time {
        self.end
    }

    /// Time from arrival to completion.
    pub fn response_time(&self) -> Time {
        self.end - self.arrival
    }

    /// Time spent in service.
    pub fn service_time(&self) -> Time {
        self.end - self.start
    }

    pub fn energy_consumption(&self) -> f64 {
        self.energy
    }

    pub fn last_energy(&self) -> f64 {
        self.last_energy
    }

    pub fn previous_energy(&self) -> f64 {
        self.previous_energy
    }

    pub fn time_energy(&self, frequency: Frequency) -> TimeEnergy {
        match self.table.get(frequency) {
            Some(te) => te,
            None => panic!("no time/energy entry for frequency {} of query {}", frequency, self.id),
        }
    }

    pub fn time(&self, frequency: Frequency) -> Time {
        self.time_energy(frequency).time
    }

    pub fn energy(&self, frequency: Frequency) -> f64 {
        self.time_energy(frequency).energy
    }

    pub fn is_complete(&self, time: Time) -> bool {
        self.end <= time
    }

    /// Starts the execution at `start` with the given duration and accounted energy.
    pub(crate) fn start_execution(&mut self, start: Time, frequency: Frequency, duration: Time, energy: f64) {
        assert!(start >= self.arrival, "query {} started before its arrival", self.id);
        self.frequency = frequency;
        self.start = start;
        self.current = start;
        self.end = start + duration;
        self.previous_energy = 0.;
        self.last_energy = energy;
        self.energy = energy;
    }

    /// Fraction of the work done at `time`, measured against the total time at the current frequency.
    pub fn percentage_completed(&self, time: Time) -> f64 {
        let total = self.time(self.frequency);
        if total <= 0 {
            return 1.;
        }
        let done = total - (self.end - time).max(0);
        (done as f64 / total as f64).clamp(0., 1.)
    }

    /// Remaining service time at `frequency` if the query switched to it at `time`.
    pub fn remaining_time(&self, time: Time, frequency: Frequency) -> Time {
        let total = self.time(frequency);
        let done = (total as f64 * self.percentage_completed(time)).round() as Time;
        (total - done).max(0)
    }

    /// Switches the running query to a new frequency at `time`.
    ///
    /// The completed fraction of the work is kept and the rest is executed at the new speed.
    /// `energy` is the accounted energy of the whole query at the new frequency. The energy of the
    /// previous segment is charged only for its elapsed part.
    pub(crate) fn update_time_energy(&mut self, time: Time, frequency: Frequency, energy: f64) {
        let remaining = self.remaining_time(time, frequency);
        let new_total = self.time(frequency);
        let segment = self.end - self.current;
        let elapsed_energy = if segment > 0 {
            self.last_energy * (time - self.current) as f64 / segment as f64
        } else {
            self.last_energy
        };
        let new_energy = if new_total > 0 {
            energy * remaining as f64 / new_total as f64
        } else {
            0.
        };
        self.energy += elapsed_energy + new_energy - self.last_energy;
        self.previous_energy = elapsed_energy;
        self.last_energy = new_energy;
        self.current = time;
        self.end = time + remaining;
        self.frequency = frequency;
    }
}
