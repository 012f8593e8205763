mod common;

use std::rc::Rc;

use dslab_dvfs::device::{Device, DeviceOptions, ScheduledCompletion};
use dslab_dvfs::energy::{CoefficientEnergyModel, QueryEnergyModel};
use dslab_dvfs::governor::governor_resolver;
use dslab_dvfs::predictor::TimeEnergy;
use dslab_dvfs::{CoreSelectionPolicy, CostPredictor, Error, FrequencySteps};

use common::*;

#[test]
fn single_query_on_idle_device() {
    init_logger();
    let mut device = device("PERF", options(4, 500));
    let (core, uid) = device.on_arrival(0, 1, 1);
    assert_eq!(core, 0);
    assert_eq!(device.core(0).frequency(), MAX);
    assert_eq!(device.core(0).queue().len(), 1);
    assert_eq!(device.core(0).head().map(|q| q.id()), Some(1));
    let scheduled = device.take_scheduled();
    assert_eq!(scheduled, vec![ScheduledCompletion { core: 0, uid, time: 10_000 }]);
    assert!(device.is_pending(&scheduled[0]));

    let completed = device.on_completion(10_000);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].query.response_time(), 10_000);
    assert!(device.core(0).is_empty());
    assert_eq!(device.executed_queries(), 1);
    // three idle cores with a quarter of 0.9 W each for 10 ms
    assert_float_eq(device.idle_energy(), 3. * 0.225 * 0.01, 1e-9);
    assert_float_eq(device.energy_consumption(), 1. + 0.225 * 0.01 + 3. * 0.225 * 0.01, 1e-9);
    assert_eq!(device.stats().tail_latency.values().to_vec(), vec![10_000]);
}

#[test]
fn ties_rotate_over_cores() {
    let predictor = predictor();
    let mut device = device("PERF", options(4, 500));
    let q = query(&predictor, 1, 0, 1);
    let chosen: Vec<usize> = (0..8).map(|_| device.select_core(0, &q)).collect();
    assert_eq!(chosen, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    assert!(device.cores().iter().all(|c| c.tie_selected() == 2));
}

#[test]
fn least_loaded_prefers_shorter_queue() {
    let mut device = device("PERF", options(2, 500));
    assert_eq!(device.on_arrival(0, 1, 1).0, 0);
    assert_eq!(device.on_arrival(0, 2, 2).0, 1);
    // both cores hold one query, the tie goes to core 1 which has not won a tie yet
    assert_eq!(device.on_arrival(0, 3, 3).0, 1);
    assert_eq!(device.core(0).len(), 1);
    assert_eq!(device.core(1).len(), 2);
}

#[test]
fn first_least_loaded_ignores_ties() {
    let options = DeviceOptions {
        selection: Some(CoreSelectionPolicy::FirstLeastLoaded),
        ..options(3, 500)
    };
    let predictor = predictor();
    let mut device = device("PERF", options);
    let q = query(&predictor, 1, 0, 1);
    assert_eq!(device.select_core(0, &q), 0);
    assert_eq!(device.select_core(0, &q), 0);
    assert!(device.cores().iter().all(|c| c.tie_selected() == 0));
}

#[test]
fn frequency_change_preserves_progress() {
    let mut device = device("PERF", options(1, 500));
    let (_, uid) = device.on_arrival(0, 1, 1);
    let first = device.take_scheduled()[0];
    let before = device.core(0).running().unwrap().percentage_completed(4_000);
    device.set_frequency(4_000, 0, MIN);
    let running = device.core(0).running().unwrap();
    assert_float_eq(running.percentage_completed(4_000), before, 1e-3);
    // 60% of 50 ms left
    assert_eq!(running.end_time(), 34_000);
    let second = device.take_scheduled();
    assert_eq!(second, vec![ScheduledCompletion { core: 0, uid, time: 34_000 }]);
    assert!(!device.is_pending(&first));
    assert!(device.is_pending(&second[0]));
    assert!(device.on_completion(10_000).is_empty());
    assert_eq!(device.on_completion(34_000).len(), 1);
}

#[test]
fn queued_query_starts_after_head() {
    let mut device = device("PERF", options(1, 500));
    device.on_arrival(0, 1, 1);
    let (_, second) = device.on_arrival(1_000, 2, 2);
    assert_eq!(device.compute_completion_time(1_000, 0, second), None);
    assert_eq!(device.take_scheduled().len(), 1);
    device.on_completion(10_000);
    assert_eq!(
        device.take_scheduled(),
        vec![ScheduledCompletion { core: 0, uid: second, time: 20_000 }]
    );
    assert_eq!(device.compute_completion_time(10_000, 0, second), Some(20_000));
    let completed = device.on_completion(20_000);
    assert_eq!(completed[0].query.start_time(), 10_000);
    assert_eq!(completed[0].query.response_time(), 19_000);
}

#[test]
fn pesos_slows_down_with_larger_budget() {
    let mut device = device("PESOS", options(1, 15));
    device.on_arrival(0, 1, 1);
    assert_eq!(device.core(0).frequency(), MAX);
    device.take_scheduled();

    // budget for another query is stored but does not trigger a re-evaluation
    assert!(device.set_time_budget(1_000, 0, 16_000, 2));
    assert_eq!(device.core(0).frequency(), MAX);
    assert!(!device.set_time_budget(1_000, 0, 16_000, 2));

    assert!(device.set_time_budget(1_000, 0, 60_000, 1));
    assert_eq!(device.core(0).frequency(), MIN);
    let scheduled = device.take_scheduled();
    assert_eq!(scheduled.len(), 1);
    // 10% done at 1 ms, 90% of 50 ms left
    assert_eq!(scheduled[0].time, 1_000 + 45_000);

    device.on_completion(scheduled[0].time);
    assert_eq!(device.core(0).time_budget(), 15_000);
}

#[test]
fn drained_core_steals_last_waiting_query() {
    let predictor = predictor();
    let options = DeviceOptions {
        job_stealing: true,
        ..options(2, 500)
    };
    let mut device = device("PERF", options);
    device.add_query(0, 0, query(&predictor, 5, 0, 1));
    device.add_query(0, 0, query(&predictor, 2, 0, 2));
    device.add_query(0, 1, query(&predictor, 1, 0, 3));
    device.compute_completion_time(0, 0, 1);
    device.compute_completion_time(0, 1, 3);
    device.take_scheduled();

    let completed = device.on_completion(10_000);
    assert_eq!(completed[0].query.id(), 1);
    assert_eq!(device.core(0).len(), 1);
    assert_eq!(device.core(1).head().map(|q| q.uid()), Some(2));
    assert_eq!(
        device.take_scheduled(),
        vec![ScheduledCompletion { core: 1, uid: 2, time: 20_000 }]
    );
}

#[test]
fn idle_cores_step_down_after_queue_check() {
    let mut device = device("PERF", options(2, 500));
    device.on_arrival(0, 1, 1);
    device.on_completion(10_000);
    assert_eq!(device.core(0).frequency(), MAX);
    device.finish(500_000);
    assert_eq!(device.core(0).frequency(), MAX);
    device.finish(1_200_000);
    assert_eq!(device.core(0).frequency(), MIN);
    // static power does not depend on the frequency
    assert_float_eq(device.idle_energy(), 0.225 * (1.19 + 1.2), 1e-9);
}

#[test]
fn coefficient_model_charges_step_power() {
    let cores = 1;
    let mut device = Device::new(
        0,
        Rc::new(predictor()),
        governor_resolver("PERF").unwrap(),
        Box::new(CoefficientEnergyModel::new(cores)),
        options(cores, 500),
    )
    .unwrap();
    device.on_arrival(0, 1, 1);
    device.on_completion(10_000);
    assert_float_eq(device.energy_consumption(), 16.832854762793 * 0.01 + 0.9 * 0.01, 1e-9);
}

#[test]
fn deadline_governors_need_regressors() {
    let mut predictor = CostPredictor::new(FrequencySteps::new(vec![MAX, MIN]), None);
    predictor.add_query(
        1,
        0,
        10,
        vec![TimeEnergy { time: 10, energy: 0. }, TimeEnergy { time: 20, energy: 0. }],
    );
    let predictor = Rc::new(predictor);
    for governor in ["PESOS", "LOAD_SENSITIVE", "MY_MODEL"] {
        let result = Device::new(
            0,
            predictor.clone(),
            governor_resolver(governor).unwrap(),
            Box::new(QueryEnergyModel::new(1)),
            options(1, 500),
        );
        assert!(matches!(result, Err(Error::MissingRegressors(_))));
    }
    let result = Device::new(
        0,
        predictor.clone(),
        governor_resolver("PERF").unwrap(),
        Box::new(QueryEnergyModel::new(1)),
        DeviceOptions {
            selection: Some(CoreSelectionPolicy::EarliestCompletionTime),
            ..options(1, 500)
        },
    );
    assert!(matches!(result, Err(Error::MissingRegressors(_))));
    assert!(Device::new(
        0,
        predictor,
        governor_resolver("CONS").unwrap(),
        Box::new(QueryEnergyModel::new(1)),
        options(1, 500),
    )
    .is_ok());
}

#[test]
fn long_idle_does_not_override_governor_choice() {
    init_logger();
    let mut device = device("PERF", options(1, 500));
    device.on_arrival(0, 1, 1);
    device.on_completion(10_000);
    device.take_scheduled();

    let (_, uid) = device.on_arrival(2_010_000, 2, 2);
    let running = device.core(0).running().unwrap();
    assert_eq!(running.frequency(), MAX);
    assert_eq!(device.core(0).frequency(), MAX);
    assert_eq!(
        device.take_scheduled(),
        vec![ScheduledCompletion { core: 0, uid, time: 2_020_000 }]
    );
    // the idle period was booked before the query started
    assert_float_eq(device.idle_energy(), 0.9 * 2., 1e-9);
}

#[test]
fn pesos_meets_tight_budget_after_long_idle() {
    let mut device = device("PESOS", options(1, 12));
    device.on_arrival(0, 1, 1);
    assert_eq!(device.core(0).frequency(), MAX);
    device.on_completion(10_000);

    device.on_arrival(3_000_000, 2, 2);
    assert_eq!(device.core(0).running().unwrap().frequency(), MAX);
    let completed = device.on_completion(3_010_000);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].query.response_time(), 10_000);
}

#[test]
fn stealing_lets_the_victim_slow_down() {
    let predictor = predictor();
    let options = DeviceOptions {
        job_stealing: true,
        ..options(2, 100)
    };
    let mut device = device("PESOS", options);
    device.add_query(0, 0, query(&predictor, 5, 0, 1));
    device.compute_completion_time(0, 0, 1);
    assert_eq!(device.core(0).frequency(), MID);
    device.add_query(0, 0, query(&predictor, 2, 0, 2));
    device.add_query(0, 0, query(&predictor, 3, 0, 3));
    // three queued queries need the fastest step
    assert_eq!(device.core(0).frequency(), MAX);
    assert_eq!(device.core(0).running().unwrap().end_time(), 30_000);

    device.add_query(0, 1, query(&predictor, 1, 0, 4));
    device.set_frequency(0, 1, MAX);
    device.compute_completion_time(0, 1, 4);
    device.take_scheduled();

    let completed = device.on_completion(10_000);
    assert_eq!(completed[0].query.uid(), 4);
    assert_eq!(device.core(0).len(), 2);
    assert_eq!(device.core(1).head().map(|q| q.uid()), Some(3));
    // a third of the work is done, the rest runs at the middle step
    assert_eq!(device.core(0).frequency(), MID);
    assert_eq!(
        device.take_scheduled(),
        vec![
            ScheduledCompletion { core: 0, uid: 1, time: 50_000 },
            ScheduledCompletion { core: 1, uid: 3, time: 60_000 },
        ]
    );
}
