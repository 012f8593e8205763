//! Query cost and energy predictor.
//!
//! A [`CostPredictor`] is built once per device from static training data:
//!
//! - `predictions.txt` with `<query id> <term class> <postings>` lines,
//! - `time_energy.txt` with the measured service time (ms) of each query at every frequency step,
//!   optionally interleaved with the measured energy (J),
//! - an optional regressors file with `key=value` lines holding per term-class linear models.
//!
//! After loading the predictor is read-only and shared between cores and queries through `Rc`.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{read_file, Error, Result};
use crate::frequency::{millis_to_micros, Frequency, FrequencySteps, Time};
use crate::query::QueryInfo;

pub type QueryId = u64;

pub const PREDICTIONS_FILE: &str = "predictions.txt";
pub const TIME_ENERGY_FILE: &str = "time_energy.txt";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeEnergy {
    pub time: Time,
    pub energy: f64,
}

/// Measured service time and energy of a single query at every frequency step.
#[derive(Debug, Default)]
pub struct TimeEnergyTable {
    entries: BTreeMap<Frequency, TimeEnergy>,
}

impl TimeEnergyTable {
    pub fn new(entries: impl IntoIterator<Item = (Frequency, TimeEnergy)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, frequency: Frequency) -> Option<TimeEnergy> {
        self.entries.get(&frequency).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Frequency, TimeEnergy)> + '_ {
        self.entries.iter().map(|(f, te)| (*f, *te))
    }
}

/// Linear model `alpha * volume + beta + rmse` giving the service time in ms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Regressor {
    pub alpha: f64,
    pub beta: f64,
    pub rmse: f64,
}

impl Regressor {
    pub fn predict(&self, volume: f64) -> Time {
        millis_to_micros(self.alpha * volume + self.beta + self.rmse)
    }
}

/// Regression coefficients stored as an opaque key-value table.
///
/// Keys follow the `class.<k>.rmse` and `<frequency>.<k>.{alpha,beta,rmse}` layout.
#[derive(Clone, Debug, Default)]
pub struct Regressors {
    values: HashMap<String, f64>,
}

impl Regressors {
    pub fn parse(text: &str, source: &str) -> Result<Self> {
        let mut regressors = Self::default();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::parse(source, i + 1, "expected key=value"))?;
            let value = value
                .trim()
                .parse::<f64>()
                .map_err(|_| Error::parse(source, i + 1, format!("invalid value '{}'", value.trim())))?;
            regressors.insert(key.trim(), value);
        }
        Ok(regressors)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Self::parse(&read_file(path)?, &path.display().to_string())
    }

    pub fn insert(&mut self, key: &str, value: f64) {
        self.values.insert(key.to_string(), value);
    }

    /// Sets both the class RMSE and the per-step model of a term class.
    pub fn set_class(&mut self, term_class: u32, class_rmse: f64, models: &[(Frequency, Regressor)]) {
        self.insert(&format!("class.{}.rmse", term_class), class_rmse);
        for (freq, model) in models {
            self.insert(&format!("{}.{}.alpha", freq, term_class), model.alpha);
            self.insert(&format!("{}.{}.beta", freq, term_class), model.beta);
            self.insert(&format!("{}.{}.rmse", freq, term_class), model.rmse);
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn class_rmse(&self, term_class: u32) -> f64 {
        self.value(&format!("class.{}.rmse", term_class))
    }

    pub fn regressor(&self, frequency: Frequency, term_class: u32) -> Regressor {
        Regressor {
            alpha: self.value(&format!("{}.{}.alpha", frequency, term_class)),
            beta: self.value(&format!("{}.{}.beta", frequency, term_class)),
            rmse: self.value(&format!("{}.{}.rmse", frequency, term_class)),
        }
    }

    fn value(&self, key: &str) -> f64 {
        match self.values.get(key) {
            Some(value) => *value,
            None => panic!("no regressor coefficient for key {}", key),
        }
    }
}

/// Selects which regressors are used for the deadline-driven governors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Models fitted to keep the response time under the budget.
    #[serde(rename = "TC")]
    TimeConservative,
    /// Models fitted without the RMSE margin, trading latency for energy.
    #[serde(rename = "EC")]
    EnergyConservative,
}

impl Mode {
    pub fn regressors_file(&self) -> &'static str {
        match self {
            Mode::TimeConservative => "regressors.txt",
            Mode::EnergyConservative => "regressors_normse.txt",
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::TimeConservative
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "TC" | "TIME_CONSERVATIVE" => Ok(Mode::TimeConservative),
            "EC" | "ENERGY_CONSERVATIVE" => Ok(Mode::EnergyConservative),
            _ => Err(Error::unknown_name("mode", s)),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::TimeConservative => write!(f, "TC"),
            Mode::EnergyConservative => write!(f, "EC"),
        }
    }
}

/// Static description of a known query.
#[derive(Clone, Debug)]
pub struct QueryProfile {
    pub id: QueryId,
    pub term_class: u32,
    pub postings: u64,
    pub table: Rc<TimeEnergyTable>,
}

#[derive(Clone, Copy, Debug, Default)]
struct StepTotals {
    time: Time,
    energy: f64,
}

pub struct CostPredictor {
    steps: FrequencySteps,
    profiles: BTreeMap<QueryId, QueryProfile>,
    regressors: Option<Regressors>,
    totals: BTreeMap<Frequency, StepTotals>,
}

impl CostPredictor {
    pub fn new(steps: FrequencySteps, regressors: Option<Regressors>) -> Self {
        Self {
            steps,
            profiles: BTreeMap::new(),
            regressors,
            totals: BTreeMap::new(),
        }
    }

    /// Loads the predictor from a directory holding the training data of a single node.
    ///
    /// The regressors file is optional, its name depends on `mode`.
    pub fn load<P: AsRef<Path>>(steps: FrequencySteps, dir: P, mode: Mode) -> Result<Self> {
        let dir = dir.as_ref();
        let regressors_path = dir.join(mode.regressors_file());
        let regressors = if regressors_path.exists() {
            Some(Regressors::from_file(&regressors_path)?)
        } else {
            None
        };
        let mut predictor = Self::new(steps, regressors);

        let predictions_path = dir.join(PREDICTIONS_FILE);
        let predictions = parse_predictions(
            &read_file(&predictions_path)?,
            &predictions_path.display().to_string(),
        )?;
        let time_energy_path = dir.join(TIME_ENERGY_FILE);
        let tables = predictor.parse_time_energy(
            &read_file(&time_energy_path)?,
            &time_energy_path.display().to_string(),
        )?;

        for (id, table) in tables {
            let (term_class, postings) = *predictions.get(&id).ok_or(Error::MissingPrediction(id))?;
            predictor.add_query(id, term_class, postings, table);
        }
        Ok(predictor)
    }

    /// Parses `<id> <v1> ... <vN>` lines. With N equal to the number of steps the values are service
    /// times in ms ordered from the fastest step; with twice as many they are `time energy` pairs.
    pub fn parse_time_energy(&self, text: &str, source: &str) -> Result<Vec<(QueryId, Vec<TimeEnergy>)>> {
        let mut tables = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let mut tokens = line.split_whitespace();
            let id = match tokens.next() {
                Some(token) => parse_token::<QueryId>(token, source, i + 1)?,
                None => continue,
            };
            let values = tokens
                .map(|t| parse_token::<f64>(t, source, i + 1))
                .collect::<Result<Vec<_>>>()?;
            let steps = self.steps.len();
            let entries = if values.len() == steps {
                values
                    .iter()
                    .map(|&ms| TimeEnergy {
                        time: millis_to_micros(ms),
                        energy: 0.,
                    })
                    .collect()
            } else if values.len() == 2 * steps {
                values
                    .chunks(2)
                    .map(|pair| TimeEnergy {
                        time: millis_to_micros(pair[0]),
                        energy: pair[1],
                    })
                    .collect()
            } else {
                return Err(Error::TableWidth {
                    query: id,
                    found: values.len(),
                    steps,
                });
            };
            tables.push((id, entries));
        }
        Ok(tables)
    }

    /// Registers a query with its measured values, ordered from the fastest step to the slowest.
    pub fn add_query(&mut self, id: QueryId, term_class: u32, postings: u64, values: Vec<TimeEnergy>) {
        assert_eq!(
            values.len(),
            self.steps.len(),
            "query {} must have one time/energy entry per frequency step",
            id
        );
        let table = TimeEnergyTable::new(self.steps.iter().zip(values));
        for (freq, te) in table.iter() {
            let totals = self.totals.entry(freq).or_default();
            totals.time += te.time;
            totals.energy += te.energy;
        }
        self.profiles.insert(
            id,
            QueryProfile {
                id,
                term_class,
                postings,
                table: Rc::new(table),
            },
        );
    }

    pub fn steps(&self) -> &FrequencySteps {
        &self.steps
    }

    pub fn regressors(&self) -> Option<&Regressors> {
        self.regressors.as_ref()
    }

    pub fn has_regressors(&self) -> bool {
        self.regressors.is_some()
    }

    pub fn contains(&self, id: QueryId) -> bool {
        self.profiles.contains_key(&id)
    }

    pub fn query_ids(&self) -> Vec<QueryId> {
        self.profiles.keys().copied().collect()
    }

    pub fn query_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn profile(&self, id: QueryId) -> &QueryProfile {
        match self.profiles.get(&id) {
            Some(profile) => profile,
            None => panic!("query {} is not known to the predictor", id),
        }
    }

    /// Creates a fresh, not yet arrived record of a known query.
    pub fn query(&self, id: QueryId) -> QueryInfo {
        QueryInfo::new(self.profile(id))
    }

    /// Measured service time and energy of a known query.
    pub fn lookup(&self, id: QueryId, frequency: Frequency) -> TimeEnergy {
        match self.profile(id).table.get(frequency) {
            Some(te) => te,
            None => panic!("no time/energy entry for frequency {} of query {}", frequency, id),
        }
    }

    fn regressor_table(&self) -> &Regressors {
        match &self.regressors {
            Some(regressors) => regressors,
            None => panic!("predictor was loaded without regressors"),
        }
    }

    /// Work volume padded with the RMSE of the term class.
    pub fn padded_volume(&self, term_class: u32, postings: u64) -> f64 {
        postings as f64 + self.regressor_table().class_rmse(term_class)
    }

    /// Service time predicted by the regressor of `term_class` at `frequency`.
    pub fn predict_time(&self, frequency: Frequency, term_class: u32, volume: f64) -> Time {
        self.regressor_table().regressor(frequency, term_class).predict(volume)
    }

    /// Predicted service time and energy of a job with the given features.
    ///
    /// The energy is estimated with the mean power drawn at `frequency` over the training data.
    pub fn predict(&self, term_class: u32, volume: f64, frequency: Frequency) -> TimeEnergy {
        let time = self.predict_time(frequency, term_class, volume);
        TimeEnergy {
            time,
            energy: self.mean_power(frequency) * time as f64,
        }
    }

    /// Mean energy per microsecond of service at `frequency` over all loaded queries.
    pub fn mean_power(&self, frequency: Frequency) -> f64 {
        match self.totals.get(&frequency) {
            Some(totals) if totals.time > 0 => totals.energy / totals.time as f64,
            _ => 0.,
        }
    }

    /// Service time predicted at the fastest step, padded with the class RMSE.
    pub fn predict_service_time_at_max_frequency(&self, term_class: u32, postings: u64) -> Time {
        self.predict_time(
            self.steps.max(),
            term_class,
            self.padded_volume(term_class, postings),
        )
    }

    /// Returns the slowest step whose predicted service time does not exceed `target`,
    /// or the fastest step if no step is fast enough.
    pub fn identify_target_frequency(&self, term_class: u32, volume: f64, target: f64) -> Frequency {
        self.steps
            .slowest_first()
            .find(|&f| self.predict_time(f, term_class, volume) as f64 <= target)
            .unwrap_or_else(|| self.steps.max())
    }
}

fn parse_token<T: FromStr>(token: &str, source: &str, line: usize) -> Result<T> {
    token
        .parse::<T>()
        .map_err(|_| Error::parse(source, line, format!("invalid value '{}'", token)))
}

/// Parses `<query id> <term class> <postings>` lines.
pub fn parse_predictions(text: &str, source: &str) -> Result<HashMap<QueryId, (u32, u64)>> {
    let mut predictions = HashMap::new();
    for (i, line) in text.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens.len() != 3 {
            return Err(Error::parse(source, i + 1, "expected '<query id> <term class> <postings>'"));
        }
        let id = parse_token::<QueryId>(tokens[0], source, i + 1)?;
        let term_class = parse_token::<u32>(tokens[1], source, i + 1)?;
        let postings = parse_token::<u64>(tokens[2], source, i + 1)?;
        predictions.insert(id, (term_class, postings));
    }
    Ok(predictions)
}
