//! Time units and the set of frequency steps supported by a device.

use std::path::Path;

use crate::error::{read_file, Error, Result};

/// Simulated time and durations in microseconds.
pub type Time = i64;

/// Core frequency in KHz.
pub type Frequency = u64;

pub const MICROS_IN_MILLI: Time = 1_000;
pub const MICROS_IN_SECOND: Time = 1_000_000;

pub fn millis_to_micros(ms: f64) -> Time {
    (ms * MICROS_IN_MILLI as f64).round() as Time
}

pub fn micros_to_millis(us: Time) -> f64 {
    us as f64 / MICROS_IN_MILLI as f64
}

pub fn micros_to_seconds(us: Time) -> f64 {
    us as f64 / MICROS_IN_SECOND as f64
}

/// Ordered list of DVFS steps shared by all cores of a device.
///
/// Steps are kept in descending order, so index 0 is the fastest step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrequencySteps {
    steps: Vec<Frequency>,
}

impl FrequencySteps {
    pub fn new(mut steps: Vec<Frequency>) -> Self {
        assert!(!steps.is_empty(), "device must support at least one frequency step");
        steps.sort_unstable_by(|a, b| b.cmp(a));
        steps.dedup();
        Self { steps }
    }

    /// Parses a list of steps where every word on every line is a frequency in KHz.
    pub fn parse(text: &str, source: &str) -> Result<Self> {
        let mut steps = Vec::new();
        for (i, line) in text.lines().enumerate() {
            for token in line.split(|c: char| !c.is_alphanumeric() && c != '_') {
                if token.is_empty() {
                    continue;
                }
                let freq = token
                    .parse::<Frequency>()
                    .map_err(|_| Error::parse(source, i + 1, format!("invalid frequency '{}'", token)))?;
                steps.push(freq);
            }
        }
        if steps.is_empty() {
            return Err(Error::NoFrequencies(source.to_string()));
        }
        Ok(Self::new(steps))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Self::parse(&read_file(path)?, &path.display().to_string())
    }

    pub fn max(&self) -> Frequency {
        self.steps[0]
    }

    pub fn min(&self) -> Frequency {
        self.steps[self.steps.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, frequency: Frequency) -> bool {
        self.steps.contains(&frequency)
    }

    /// Steps from the fastest to the slowest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Frequency> + '_ {
        self.steps.iter().copied()
    }

    /// Steps from the slowest to the fastest.
    pub fn slowest_first(&self) -> impl Iterator<Item = Frequency> + '_ {
        self.steps.iter().rev().copied()
    }

    /// Returns the slowest step which is not below `target`, or the fastest step if there is none.
    pub fn at_least(&self, target: f64) -> Frequency {
        self.slowest_first()
            .find(|&f| f as f64 >= target)
            .unwrap_or_else(|| self.max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sorts_descending() {
        let steps = FrequencySteps::parse("800000 1000000\n3500000\n\n2000000", "inline").unwrap();
        assert_eq!(steps.iter().collect::<Vec<_>>(), vec![3500000, 2000000, 1000000, 800000]);
        assert_eq!(steps.max(), 3500000);
        assert_eq!(steps.min(), 800000);
        assert_eq!(steps.slowest_first().next(), Some(800000));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            FrequencySteps::parse("800000 fast", "inline"),
            Err(Error::Parse { line: 1, .. })
        ));
        assert!(matches!(FrequencySteps::parse("\n\n", "inline"), Err(Error::NoFrequencies(_))));
    }

    #[test]
    fn at_least_rounds_up() {
        let steps = FrequencySteps::new(vec![800000, 1600000, 2400000]);
        assert_eq!(steps.at_least(1.0), 800000);
        assert_eq!(steps.at_least(800000.0), 800000);
        assert_eq!(steps.at_least(800001.0), 1600000);
        assert_eq!(steps.at_least(9000000.0), 2400000);
    }

    #[test]
    fn unit_conversions() {
        assert_eq!(millis_to_micros(1.5), 1500);
        assert_eq!(micros_to_millis(2500), 2.5);
        assert_eq!(micros_to_seconds(MICROS_IN_SECOND), 1.0);
    }
}
