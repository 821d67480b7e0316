//! Objective function used by external parameter search.
//!
//! Every pool contributes five decision variables, in order: min share
//! timeout, half fair share timeout, weight, map min share and reduce min
//! share. An evaluation applies them, replays the workload from the start
//! and reports one objective per pool; lower is better.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    engine::Engine,
    error::{Result, SimError},
    fair_share::MIN_WEIGHT,
    job::Job,
    task::TaskType,
    utilization::pool_utilization,
};

pub const VARS_PER_POOL: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Objective {
    Ignore,
    /// Jobs finishing later than in the first evaluation plus `slack`.
    ///
    /// A slack below 1 is relative to the job duration of the first evaluation.
    Deadline { slack: f64 },
    /// Mean time from job creation to job finish.
    Latency,
    MapUtilization,
    ReduceUtilization,
}

impl Objective {
    pub fn parse(name: &str, slack: Option<f64>) -> std::result::Result<Objective, String> {
        match name.to_lowercase().as_str() {
            "ignore" => Ok(Objective::Ignore),
            "deadline" => match slack {
                Some(slack) if slack >= 0. => Ok(Objective::Deadline { slack }),
                _ => Err("deadline objective needs a non-negative slack".to_string()),
            },
            "latency" => Ok(Objective::Latency),
            "map_util" => Ok(Objective::MapUtilization),
            "red_util" => Ok(Objective::ReduceUtilization),
            _ => Err(format!("objective `{}` is not predefined", name)),
        }
    }
}

pub struct TuningProblem {
    engine: Engine,
    objectives: Vec<Objective>,
    /// Job finish times of the first evaluation, by job id.
    baseline: FxHashMap<u64, f64>,
    trajectory: Option<BufWriter<File>>,
    evaluations: usize,
}

impl TuningProblem {
    pub fn new(engine: Engine, objectives: Vec<Objective>) -> Result<Self> {
        if objectives.len() != engine.pools().len() {
            return Err(SimError::Config(format!(
                "{} objectives for {} pools",
                objectives.len(),
                engine.pools().len()
            )));
        }
        Ok(TuningProblem {
            engine,
            objectives,
            baseline: FxHashMap::default(),
            trajectory: None,
            evaluations: 0,
        })
    }

    /// Appends every evaluated configuration and its objectives to `path`.
    pub fn set_trajectory<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.trajectory = Some(BufWriter::new(File::create(path)?));
        Ok(())
    }

    pub fn var_count(&self) -> usize {
        self.engine.pools().len() * VARS_PER_POOL
    }

    pub fn obj_count(&self) -> usize {
        self.engine.pools().len()
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Current pool parameters as a decision vector.
    pub fn config(&self) -> Vec<f64> {
        let mut x = Vec::with_capacity(self.var_count());
        for pool in self.engine.pools() {
            x.extend([
                pool.ms_timeout,
                pool.hf_timeout,
                pool.map_share.weight,
                pool.map_share.minshare,
                pool.reduce_share.minshare,
            ]);
        }
        x
    }

    /// Moves `x` into the feasible region.
    pub fn project(&self, x: &mut [f64]) {
        for vars in x.chunks_mut(VARS_PER_POOL) {
            if let [ms, hf, weight, min_map, min_reduce] = vars {
                if *ms < 0. {
                    *ms = -1.;
                }
                if *hf < 0. {
                    *hf = -1.;
                }
                if *weight < MIN_WEIGHT {
                    *weight = MIN_WEIGHT;
                }
                *min_map = (min_map.max(0.) + 0.5).trunc();
                *min_reduce = (min_reduce.max(0.) + 0.5).trunc();
            }
        }
    }

    pub fn apply(&mut self, x: &[f64]) -> Result<()> {
        if x.len() != self.var_count() {
            return Err(SimError::Config(format!(
                "number of decision variables is incorrect: {}",
                x.len()
            )));
        }
        for (pool, vars) in self
            .engine
            .pools_mut()
            .iter_mut()
            .zip(x.chunks(VARS_PER_POOL))
        {
            let name = pool.name.clone();
            let sched = pool.sched;
            pool.reinit(
                &name,
                vars[0],
                vars[1],
                vars[2],
                vars[3].max(0.) as u32,
                vars[4].max(0.) as u32,
                sched,
            );
        }
        self.engine.scale_minshares();
        Ok(())
    }

    pub fn evaluate(&mut self, x: &[f64]) -> Result<Vec<f64>> {
        self.apply(x)?;
        self.engine.reset_time();
        self.engine.process()?;
        let y = self.compute_objectives();
        self.evaluations += 1;
        self.record(x, &y)?;
        Ok(y)
    }

    fn compute_objectives(&mut self) -> Vec<f64> {
        let map_slots = self.engine.total_slots(TaskType::Map);
        let reduce_slots = self.engine.total_slots(TaskType::Reduce);
        let mut y = Vec::with_capacity(self.obj_count());

        for (pool, objective) in self.engine.pools().iter().zip(&self.objectives) {
            let value = match *objective {
                Objective::Ignore => 0.,
                Objective::Latency => {
                    let latencies: Vec<f64> = pool.jobs.iter().filter_map(Job::latency).collect();
                    if latencies.is_empty() {
                        0.
                    } else {
                        latencies.iter().sum::<f64>() / latencies.len() as f64
                    }
                }
                Objective::MapUtilization => -pool_utilization(pool, TaskType::Map, map_slots),
                Objective::ReduceUtilization => {
                    -pool_utilization(pool, TaskType::Reduce, reduce_slots)
                }
                Objective::Deadline { slack } => {
                    let mut violations = 0;
                    // a job unfinished in the first run gets no deadline
                    for job in &pool.jobs {
                        match self.baseline.get(&job.id) {
                            None => {
                                if self.evaluations == 0 && job.latency().is_some() {
                                    self.baseline.insert(job.id, job.ftime);
                                }
                            }
                            Some(&deadline) => {
                                let allowance = if slack < 1. {
                                    slack * (deadline - job.ctime)
                                } else {
                                    slack
                                };
                                if job.latency().is_none() || job.ftime > deadline + allowance {
                                    violations += 1;
                                }
                            }
                        }
                    }
                    violations as f64
                }
            };
            y.push(value);
        }
        y
    }

    fn record(&mut self, x: &[f64], y: &[f64]) -> Result<()> {
        if let Some(file) = self.trajectory.as_mut() {
            let vars: Vec<String> = x.iter().map(|v| v.to_string()).collect();
            let objs: Vec<String> = y.iter().map(|v| v.to_string()).collect();
            writeln!(file, "{}\t{}", vars.join(" "), objs.join(" "))?;
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        job::Job,
        pool::SchedMode,
        task::{Task, TaskType},
    };

    fn problem(objective: Objective) -> TuningProblem {
        let mut engine = Engine::new(2, 1, 0.);
        let pool = engine.add_pool("p", 10., -1., 1., 1, 0, SchedMode::Fair);
        let mut job = Job::new("j", 0., 1.);
        job.add_task(Task::new(1, TaskType::Map, 0., 4.));
        job.add_task(Task::new(2, TaskType::Map, 1., 2.));
        engine.add_job(pool, job).unwrap();
        engine.scale_minshares();
        TuningProblem::new(engine, vec![objective]).unwrap()
    }

    #[test]
    fn parses_objectives() {
        assert_eq!(Objective::parse("MAP_UTIL", None), Ok(Objective::MapUtilization));
        assert_eq!(
            Objective::parse("deadline", Some(3.)),
            Ok(Objective::Deadline { slack: 3. })
        );
        assert!(Objective::parse("deadline", Some(-1.)).is_err());
        assert!(Objective::parse("throughput", None).is_err());
    }

    #[test]
    fn projects_into_feasible_region() {
        let p = problem(Objective::Ignore);
        let mut x = vec![-3., 2., 0.1, 2.4, -7.];
        p.project(&mut x);
        assert_eq!(x, vec![-1., 2., 0.5, 2., 0.]);
    }

    #[test]
    fn config_round_trips_through_apply() {
        let mut p = problem(Objective::Ignore);
        let x = p.config();
        assert_eq!(x, vec![10., -1., 1., 1., 0.]);
        p.apply(&x).unwrap();
        assert_eq!(p.config(), x);
        assert!(p.apply(&x[..3]).is_err());
    }

    #[test]
    fn latency_objective() {
        let mut p = problem(Objective::Latency);
        let x = p.config();
        let y = p.evaluate(&x).unwrap();
        // both maps run in parallel, the job ends at 4
        assert_eq!(y, vec![4.]);
        assert_eq!(p.evaluate(&x).unwrap(), vec![4.]);
        assert_eq!(p.evaluations(), 2);
    }

    #[test]
    fn unfinished_jobs_do_not_count() {
        let mut engine = Engine::new(2, 0, 0.);
        let pool = engine.add_pool("p", -1., -1., 1., 0, 0, SchedMode::Fair);
        let mut job = Job::new("j", 0., 1.);
        job.add_task(Task::new(1, TaskType::Map, 0., 4.));
        engine.add_job(pool, job).unwrap();
        // no reduce slots, this job never runs
        let mut stuck = Job::new("stuck", 0., 1.);
        stuck.add_task(Task::new(2, TaskType::Reduce, 0., 1.));
        engine.add_job(pool, stuck).unwrap();

        let mut latency = TuningProblem::new(engine, vec![Objective::Latency]).unwrap();
        let x = latency.config();
        assert_eq!(latency.evaluate(&x).unwrap(), vec![4.]);

        let mut deadline =
            TuningProblem::new(latency.engine, vec![Objective::Deadline { slack: 0. }]).unwrap();
        assert_eq!(deadline.evaluate(&x).unwrap(), vec![0.]);
        assert_eq!(deadline.baseline.len(), 1);
        assert_eq!(deadline.evaluate(&x).unwrap(), vec![0.]);
    }

    #[test]
    fn deadline_objective_uses_first_run_as_baseline() {
        let mut p = problem(Objective::Deadline { slack: 0. });
        let x = p.config();
        assert_eq!(p.evaluate(&x).unwrap(), vec![0.]);
        assert_eq!(p.evaluate(&x).unwrap(), vec![0.]);

        let mut engine = Engine::new(1, 1, 0.);
        let pool = engine.add_pool("p", -1., -1., 1., 0, 0, SchedMode::Fair);
        let mut job = Job::new("j", 0., 1.);
        job.add_task(Task::new(1, TaskType::Map, 0., 4.));
        job.add_task(Task::new(2, TaskType::Map, 1., 2.));
        engine.add_job(pool, job).unwrap();
        let mut serial = TuningProblem::new(engine, vec![Objective::Deadline { slack: 0. }]).unwrap();
        serial.baseline = p.baseline.clone();
        // one slot serializes the maps, the job ends at 6 instead of 4
        assert_eq!(serial.evaluate(&serial.config()).unwrap(), vec![1.]);
    }
}
