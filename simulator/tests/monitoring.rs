use fairsim::{
    monitoring::{MemoryMetricsSink, MetricPoint},
    Engine, Job, Monitoring, SchedMode, Task, TaskType,
};

fn running_maps(points: &[MetricPoint]) -> Vec<&MetricPoint> {
    points
        .iter()
        .filter(|p| p.kind == TaskType::Map && p.metric == "runningTasks")
        .collect()
}

#[test]
fn test_monitoring() {
    let mut engine = Engine::new(2, 1, 0.);
    let pool = engine.add_pool("default", -1., -1., 1., 0, 0, SchedMode::Fair);
    let mut job = Job::new("job", 0., 1.);
    for (i, ctime) in [0., 0., 1.].into_iter().enumerate() {
        job.add_task(Task::new(i as u64, TaskType::Map, ctime, 2.));
    }
    engine.add_job(pool, job).unwrap();

    let sink = MemoryMetricsSink::default();
    engine.set_monitoring(Monitoring::new(Box::new(sink.clone()), 1));
    engine.process().unwrap();

    let points = sink.points();
    // 7 metrics for each task type of the single pool
    assert!(!points.is_empty());
    assert_eq!(points.len() % 14, 0);

    let running = running_maps(&points);
    assert_eq!(running.iter().map(|p| p.value).fold(0., f64::max), 2.);
    let last = running.last().unwrap();
    assert_eq!(last.time, 4.);
    assert_eq!(last.value, 0.);
    assert!(points.windows(2).all(|w| w[0].time <= w[1].time));
}

#[test]
fn sampling_window() {
    let mut engine = Engine::new(1, 1, 0.);
    let pool = engine.add_pool("default", -1., -1., 1., 0, 0, SchedMode::Fair);
    let mut job = Job::new("job", 0., 1.);
    for i in 0..10 {
        job.add_task(Task::new(i, TaskType::Map, 0., 1.));
    }
    engine.add_job(pool, job).unwrap();

    let sink = MemoryMetricsSink::default();
    engine.set_monitoring(Monitoring::new(Box::new(sink.clone()), 1000));
    engine.process().unwrap();

    // the first and the last event only
    assert_eq!(running_maps(&sink.points()).len(), 2);
    assert!(engine.take_monitoring().is_some());
}
