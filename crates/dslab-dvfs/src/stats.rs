//! Statistics collected during a simulation.

use std::collections::BTreeMap;
use std::ops::AddAssign;

use num::{ToPrimitive, Zero};
use serde::Serialize;

use crate::frequency::Time;

#[derive(Clone, Default, Serialize)]
pub struct SampleMetric<T> {
    data: Vec<T>,
}

impl<T> SampleMetric<T> {
    pub fn add(&mut self, x: T) {
        self.data.push(x);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.data
    }
}

impl<T> SampleMetric<T>
where
    T: AddAssign + Copy + Zero,
{
    pub fn sum(&self) -> T {
        let mut s = T::zero();
        for x in self.data.iter().copied() {
            s += x;
        }
        s
    }
}

impl<T> SampleMetric<T>
where
    T: AddAssign + Copy + Zero + ToPrimitive,
{
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.;
        }
        self.sum().to_f64().unwrap_or(f64::NAN) / (self.data.len() as f64)
    }
}

impl<T> SampleMetric<T>
where
    T: Copy + PartialOrd,
{
    /// Returns the nearest-rank quantile, `q` in 0.0-1.0 range.
    pub fn quantile(&self, q: f64) -> Option<T> {
        if self.data.is_empty() {
            return None;
        }
        let mut sorted = self.data.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = (q.clamp(0., 1.) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.max(1) - 1])
    }

    pub fn max(&self) -> Option<T> {
        self.quantile(1.)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SamplingMode {
    /// Sum of the values in a slot.
    Cumulative,
    /// Mean of the values in a slot.
    Average,
}

/// Time series aggregating values into fixed slots.
#[derive(Clone, Serialize)]
pub struct IntervalSampler {
    interval: Time,
    mode: SamplingMode,
    slots: BTreeMap<Time, (f64, u64)>,
}

impl IntervalSampler {
    pub fn new(interval: Time, mode: SamplingMode) -> Self {
        assert!(interval > 0, "sampling interval must be positive");
        Self {
            interval,
            mode,
            slots: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, time: Time, value: f64) {
        let slot = time.div_euclid(self.interval) * self.interval;
        let entry = self.slots.entry(slot).or_insert((0., 0));
        entry.0 += value;
        entry.1 += 1;
    }

    /// Returns `(slot start, value)` pairs ordered by time.
    pub fn values(&self) -> Vec<(Time, f64)> {
        self.slots
            .iter()
            .map(|(start, (sum, count))| match self.mode {
                SamplingMode::Cumulative => (*start, *sum),
                SamplingMode::Average => (*start, *sum / *count as f64),
            })
            .collect()
    }

    pub fn interval(&self) -> Time {
        self.interval
    }
}

/// Statistics of a single device.
#[derive(Clone, Serialize)]
pub struct Stats {
    pub executed_queries: u64,
    /// Total energy in J, idle energy included.
    pub energy: f64,
    pub idle_energy: f64,
    pub tail_latency: SampleMetric<Time>,
    pub query_energy: SampleMetric<f64>,
    pub energy_samples: IntervalSampler,
    pub idle_energy_samples: IntervalSampler,
    pub completion_time_samples: IntervalSampler,
    pub queries_per_slot: IntervalSampler,
}

impl Stats {
    pub fn new(sampling_interval: Time) -> Self {
        Self {
            executed_queries: 0,
            energy: 0.,
            idle_energy: 0.,
            tail_latency: SampleMetric::default(),
            query_energy: SampleMetric::default(),
            energy_samples: IntervalSampler::new(sampling_interval, SamplingMode::Cumulative),
            idle_energy_samples: IntervalSampler::new(sampling_interval, SamplingMode::Cumulative),
            completion_time_samples: IntervalSampler::new(sampling_interval, SamplingMode::Average),
            queries_per_slot: IntervalSampler::new(sampling_interval, SamplingMode::Cumulative),
        }
    }

    pub fn add_arrival(&mut self, time: Time) {
        self.queries_per_slot.add(time, 1.);
    }

    pub fn add_query(&mut self, time: Time, latency: Time, energy: f64) {
        self.executed_queries += 1;
        self.energy += energy;
        self.tail_latency.add(latency);
        self.query_energy.add(energy);
        self.energy_samples.add(time, energy);
        self.completion_time_samples.add(time, latency as f64);
    }

    pub fn add_idle_energy(&mut self, time: Time, energy: f64) {
        self.energy += energy;
        self.idle_energy += energy;
        self.energy_samples.add(time, energy);
        self.idle_energy_samples.add(time, energy);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn sample_metric() {
        let mut metric = SampleMetric::default();
        assert_eq!(metric.mean(), 0.);
        assert_eq!(metric.quantile(0.5), None);
        for x in [5i64, 1, 4, 2, 3] {
            metric.add(x);
        }
        assert_eq!(metric.sum(), 15);
        assert_eq!(metric.mean(), 3.);
        assert_eq!(metric.quantile(0.5), Some(3));
        assert_eq!(metric.quantile(0.95), Some(5));
        assert_eq!(metric.quantile(0.), Some(1));
        assert_eq!(metric.max(), Some(5));
    }

    #[test]
    fn interval_sampler_modes() {
        let mut sum = IntervalSampler::new(100, SamplingMode::Cumulative);
        let mut mean = IntervalSampler::new(100, SamplingMode::Average);
        for (t, v) in [(0, 1.), (99, 3.), (100, 5.), (350, 7.)] {
            sum.add(t, v);
            mean.add(t, v);
        }
        assert_eq!(sum.values(), vec![(0, 4.), (100, 5.), (300, 7.)]);
        assert_eq!(mean.values(), vec![(0, 2.), (100, 5.), (300, 7.)]);
    }

    #[test]
    fn stats_totals() {
        let mut stats = Stats::new(1000);
        stats.add_query(10, 100, 2.);
        stats.add_idle_energy(20, 0.5);
        stats.add_arrival(5);
        assert_eq!(stats.executed_queries, 1);
        assert_abs_diff_eq!(stats.energy, 2.5);
        assert_abs_diff_eq!(stats.idle_energy, 0.5);
        assert_eq!(stats.energy_samples.values(), vec![(0, 2.5)]);
        assert_eq!(stats.queries_per_slot.values(), vec![(0, 1.)]);
    }
}
