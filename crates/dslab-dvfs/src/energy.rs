//! Energy accounting models.
//!
//! A model converts an interval spent at a given frequency into Joules. Active intervals receive the
//! energy predicted for the query, idle intervals are charged with the static power share of a core.

use std::collections::BTreeMap;

use dyn_clone::{clone_trait_object, DynClone};

use crate::error::{Error, Result};
use crate::frequency::{micros_to_seconds, Frequency, Time};

/// Static power of the whole package in W.
pub const STATIC_POWER: f64 = 0.9;
/// Frequency independent part of the dynamic power in W.
pub const INDEPENDENT_POWER: f64 = 0.1;

/// Strategy computing the energy spent by a core.
pub trait EnergyModel: DynClone {
    /// Returns the energy in J spent during `interval` at `frequency`.
    ///
    /// `energy` is the energy predicted for the active work done in the interval and is ignored for idle
    /// intervals.
    fn compute_energy(&self, energy: f64, frequency: Frequency, interval: Time, idle: bool) -> f64;

    /// Returns the static energy in J of a single core over `interval`.
    fn static_power(&self, interval: Time) -> f64;

    fn get_name(&self) -> String;
}

clone_trait_object!(EnergyModel);

fn static_energy(cores: usize, interval: Time) -> f64 {
    STATIC_POWER / cores as f64 * micros_to_seconds(interval)
}

/// Passes the predicted energy through, charges idle time with static power.
#[derive(Clone)]
pub struct QueryEnergyModel {
    cores: usize,
}

impl QueryEnergyModel {
    pub fn new(cores: usize) -> Self {
        Self { cores }
    }
}

impl EnergyModel for QueryEnergyModel {
    fn compute_energy(&self, energy: f64, _frequency: Frequency, interval: Time, idle: bool) -> f64 {
        if idle {
            self.static_power(interval)
        } else {
            energy
        }
    }

    fn static_power(&self, interval: Time) -> f64 {
        static_energy(self.cores, interval)
    }

    fn get_name(&self) -> String {
        "query".to_string()
    }
}

/// Active energy from the measured power coefficient of each frequency step.
#[derive(Clone)]
pub struct CoefficientEnergyModel {
    cores: usize,
    coefficients: BTreeMap<Frequency, f64>,
}

impl CoefficientEnergyModel {
    pub fn new(cores: usize) -> Self {
        let coefficients = [
            (800000, 1.3195298857676),
            (1000000, 1.8851772840657),
            (1200000, 3.0244325748922),
            (1400000, 3.4359313987644),
            (1600000, 4.1396654003963),
            (1800000, 5.0965153747523),
            (2000000, 6.2681729257489),
            (2100000, 6.6835769518592),
            (2300000, 7.5992422893111),
            (2500000, 9.3216932801026),
            (2700000, 10.356831704161),
            (2900000, 11.525879199207),
            (3100000, 12.690698425224),
            (3300000, 14.430752706609),
            (3500000, 16.832854762793),
        ];
        Self::with_coefficients(cores, coefficients.into_iter().collect())
    }

    /// Creates the model with custom power (W) per frequency step.
    pub fn with_coefficients(cores: usize, coefficients: BTreeMap<Frequency, f64>) -> Self {
        Self { cores, coefficients }
    }

    pub fn power(&self, frequency: Frequency) -> f64 {
        match self.coefficients.get(&frequency) {
            Some(power) => *power,
            None => panic!("no power coefficient for frequency {}", frequency),
        }
    }
}

impl EnergyModel for CoefficientEnergyModel {
    fn compute_energy(&self, _energy: f64, frequency: Frequency, interval: Time, idle: bool) -> f64 {
        if idle {
            self.static_power(interval)
        } else {
            self.power(frequency) * micros_to_seconds(interval)
        }
    }

    fn static_power(&self, interval: Time) -> f64 {
        static_energy(self.cores, interval)
    }

    fn get_name(&self) -> String {
        "coefficient".to_string()
    }
}

/// Scales the predicted energy down by a frequency dependent reduction factor.
#[derive(Clone)]
pub struct ParameterEnergyModel {
    cores: usize,
}

impl ParameterEnergyModel {
    const ALPHA: f64 = 0.01;
    const BETA: f64 = 0.06;
    const GAMMA: f64 = 0.01;
    const OMEGA: f64 = 4.;

    pub fn new(cores: usize) -> Self {
        Self { cores }
    }

    /// Fraction of the energy saved at `frequency`.
    pub fn reduction(frequency: Frequency) -> f64 {
        let ghz = frequency as f64 / 1e6;
        Self::ALPHA + Self::BETA * (ghz - 0.8) + Self::GAMMA * (Self::OMEGA - 2.)
    }
}

impl EnergyModel for ParameterEnergyModel {
    fn compute_energy(&self, energy: f64, frequency: Frequency, interval: Time, idle: bool) -> f64 {
        if idle {
            self.static_power(interval)
        } else {
            energy * (1. - Self::reduction(frequency))
        }
    }

    fn static_power(&self, interval: Time) -> f64 {
        static_energy(self.cores, interval)
    }

    fn get_name(&self) -> String {
        "parameter".to_string()
    }
}

/// Creates an energy model from its config name.
pub fn energy_model_resolver(name: &str, cores: usize) -> Result<Box<dyn EnergyModel>> {
    match name.to_lowercase().as_str() {
        "query" => Ok(Box::new(QueryEnergyModel::new(cores))),
        "coefficient" => Ok(Box::new(CoefficientEnergyModel::new(cores))),
        "parameter" => Ok(Box::new(ParameterEnergyModel::new(cores))),
        _ => Err(Error::unknown_name("energy model", name)),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn query_model_passes_energy_through() {
        let model = QueryEnergyModel::new(4);
        assert_eq!(model.compute_energy(1.5, 800000, 1000, false), 1.5);
        // 0.9 W shared by 4 cores over 2 s
        assert_relative_eq!(model.compute_energy(1.5, 800000, 2_000_000, true), 0.45, epsilon = 1e-12);
    }

    #[test]
    fn coefficient_model_uses_step_power() {
        let model = CoefficientEnergyModel::new(4);
        assert_relative_eq!(model.compute_energy(0., 3500000, 500_000, false), 16.832854762793 / 2.);
        assert_relative_eq!(model.compute_energy(0., 3500000, 500_000, true), 0.1125, epsilon = 1e-12);
    }

    #[test]
    fn parameter_model_reduces_energy() {
        let model = ParameterEnergyModel::new(1);
        assert_relative_eq!(ParameterEnergyModel::reduction(800000), 0.03, epsilon = 1e-12);
        assert_relative_eq!(model.compute_energy(10., 1800000, 1000, false), 10. * (1. - 0.09), epsilon = 1e-12);
    }

    #[test]
    fn resolver() {
        assert_eq!(energy_model_resolver("Coefficient", 2).unwrap().get_name(), "coefficient");
        assert!(matches!(
            energy_model_resolver("magic", 2),
            Err(Error::UnknownName { kind: "energy model", .. })
        ));
    }
}
