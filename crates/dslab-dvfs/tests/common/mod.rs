#![allow(dead_code)]

use std::io::Write;
use std::rc::Rc;

use env_logger::Builder;

use dslab_dvfs::device::{Device, DeviceOptions};
use dslab_dvfs::energy::QueryEnergyModel;
use dslab_dvfs::governor::governor_resolver;
use dslab_dvfs::predictor::{Regressor, Regressors, TimeEnergy};
use dslab_dvfs::{CostPredictor, Frequency, FrequencySteps, QueryId, QueryInfo, Time};

pub const MAX: Frequency = 3500000;
pub const MID: Frequency = 2000000;
pub const MIN: Frequency = 800000;

pub fn init_logger() {
    let _ = Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .is_test(true)
        .try_init();
}

pub fn assert_float_eq(x: f64, y: f64, eps: f64) {
    assert!(x > y - eps && x < y + eps, "{} != {}", x, y);
}

pub fn steps() -> FrequencySteps {
    FrequencySteps::new(vec![MAX, MID, MIN])
}

/// Term class 2 with class RMSE 10: a query with 1000 postings is predicted to take
/// 10.1 ms at 3.5 GHz, 20.2 ms at 2 GHz and 50.5 ms at 0.8 GHz.
pub fn regressors() -> Regressors {
    let mut regressors = Regressors::default();
    let model = |alpha| Regressor {
        alpha,
        beta: 0.,
        rmse: 0.,
    };
    regressors.set_class(2, 10., &[(MAX, model(0.01)), (MID, model(0.02)), (MIN, model(0.05))]);
    regressors
}

fn te(ms: Time, energy: f64) -> TimeEnergy {
    TimeEnergy {
        time: ms * 1000,
        energy,
    }
}

/// Queries 1-4 have 1000 postings and run for 10/20/50 ms, query 5 has 3000 postings
/// and runs three times longer.
pub fn predictor() -> CostPredictor {
    let mut predictor = CostPredictor::new(steps(), Some(regressors()));
    for id in 1..=4 {
        predictor.add_query(id, 2, 1000, vec![te(10, 1.), te(20, 0.8), te(50, 0.6)]);
    }
    predictor.add_query(5, 2, 3000, vec![te(30, 3.), te(60, 2.4), te(150, 1.8)]);
    predictor
}

pub fn query(predictor: &CostPredictor, id: QueryId, arrival: Time, uid: u64) -> QueryInfo {
    let mut query = predictor.query(id);
    query.activate(arrival, uid, uid);
    query
}

pub fn device(governor: &str, options: DeviceOptions) -> Device {
    let cores = options.cores;
    Device::new(
        0,
        Rc::new(predictor()),
        governor_resolver(governor).unwrap(),
        Box::new(QueryEnergyModel::new(cores)),
        options,
    )
    .unwrap()
}

pub fn options(cores: usize, time_budget_ms: Time) -> DeviceOptions {
    DeviceOptions {
        cores,
        time_budget: time_budget_ms * 1000,
        ..DeviceOptions::default()
    }
}
