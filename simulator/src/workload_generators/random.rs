use log::info;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Exp, LogNormal};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SimError},
    job::Job,
    task::{Task, TaskType},
};

use super::generator::{JobAssignment, WorkloadGenerator};

/// Log-space parameters of the job population.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobGeneratorParams {
    /// Job arrival rate.
    pub jar: f64,
    /// Log mean of maps per job.
    pub mmpj: f64,
    /// Log mean of reduces per job.
    pub mrpj: f64,
    /// Log standard deviation of maps per job.
    pub smpj: f64,
    /// Log standard deviation of reduces per job.
    pub srpj: f64,
    /// Log mean of map duration.
    pub mmtd: f64,
    /// Log mean of reduce duration.
    pub mrtd: f64,
    /// Log standard deviation of map duration.
    pub smtd: f64,
    /// Log standard deviation of reduce duration.
    pub srtd: f64,
}

/// Generates jobs with exponential inter-arrival times and log-normal sizes and durations.
pub struct JobGenerator {
    arrivals: Exp<f64>,
    maps_per_job: LogNormal<f64>,
    reduces_per_job: LogNormal<f64>,
    map_duration: LogNormal<f64>,
    reduce_duration: LogNormal<f64>,
    rng: StdRng,
    now: f64,
    prefix: String,
    generated: u64,
}

fn lognormal(mu: f64, sigma: f64, what: &str) -> Result<LogNormal<f64>> {
    LogNormal::new(mu, sigma)
        .map_err(|e| SimError::Config(format!("invalid {} distribution: {}", what, e)))
}

impl JobGenerator {
    pub fn new(params: JobGeneratorParams, seed: u64) -> Result<Self> {
        Ok(JobGenerator {
            arrivals: Exp::new(params.jar)
                .map_err(|e| SimError::Config(format!("invalid job arrival rate: {}", e)))?,
            maps_per_job: lognormal(params.mmpj, params.smpj, "maps per job")?,
            reduces_per_job: lognormal(params.mrpj, params.srpj, "reduces per job")?,
            map_duration: lognormal(params.mmtd, params.smtd, "map duration")?,
            reduce_duration: lognormal(params.mrtd, params.srtd, "reduce duration")?,
            rng: StdRng::seed_from_u64(seed),
            now: 0.,
            prefix: String::from("job"),
            generated: 0,
        })
    }

    pub fn set_time(&mut self, now: f64) {
        self.now = now;
    }

    pub fn time(&self) -> f64 {
        self.now
    }

    pub fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Prefix of generated job names, names must stay unique across generators.
    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = prefix.to_string();
    }

    /// Advances the clock by one inter-arrival time and creates a job there.
    pub fn generate(&mut self) -> Job {
        self.now += self.arrivals.sample(&mut self.rng);
        let name = format!("{}_{:06}", self.prefix, self.generated);
        self.generated += 1;

        let mut job = Job::new(&name, self.now, 1.);
        let maps = (self.maps_per_job.sample(&mut self.rng) as usize).max(1);
        let reduces = self.reduces_per_job.sample(&mut self.rng) as usize;
        for (kind, count) in [(TaskType::Map, maps), (TaskType::Reduce, reduces)] {
            for i in 0..count {
                let ptime = match kind {
                    TaskType::Map => self.map_duration.sample(&mut self.rng),
                    TaskType::Reduce => self.reduce_duration.sample(&mut self.rng),
                };
                let task_name = format!("{}_{}_{}", name, kind.name(), i);
                job.add_task(Task::named(&task_name, kind, self.now, ptime));
            }
        }
        job
    }

    /// Uniform job weight in `[low, high]`, for callers that want weighted jobs.
    pub fn random_weight(&mut self, low: f64, high: f64) -> f64 {
        if high > low {
            self.rng.gen_range(low..=high)
        } else {
            low
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Options {
    pool: String,
    jobs: usize,
    seed: Option<u64>,
    start_time: Option<f64>,
    weight_min: Option<f64>,
    weight_max: Option<f64>,
    #[serde(flatten)]
    params: JobGeneratorParams,
}

/// A fixed number of generated jobs, all submitted to one pool.
pub struct SyntheticWorkload {
    options: Options,
    generator: JobGenerator,
}

impl SyntheticWorkload {
    pub fn from_options(options: &serde_yaml::Value) -> Result<Self> {
        let options: Options = serde_yaml::from_value(options.clone())?;
        let mut generator = JobGenerator::new(options.params, options.seed.unwrap_or(42))?;
        generator.set_time(options.start_time.unwrap_or(0.));
        generator.set_prefix(&options.pool);
        Ok(SyntheticWorkload { options, generator })
    }
}

impl WorkloadGenerator for SyntheticWorkload {
    fn get_workload(&mut self) -> Result<Vec<JobAssignment>> {
        let low = self.options.weight_min.unwrap_or(1.);
        let high = self.options.weight_max.unwrap_or(low);

        let mut workload = Vec::with_capacity(self.options.jobs);
        for _ in 0..self.options.jobs {
            let mut job = self.generator.generate();
            let weight = self.generator.random_weight(low, high);
            job.map_share.set_weight(weight);
            job.reduce_share.set_weight(weight);
            workload.push(JobAssignment {
                pool: self.options.pool.clone(),
                job,
                line: 0,
            });
        }
        info!(
            "generated {} jobs for pool {} up to time {}",
            workload.len(),
            self.options.pool,
            self.generator.time()
        );
        Ok(workload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> JobGeneratorParams {
        JobGeneratorParams {
            jar: 0.5,
            mmpj: 1.5,
            mrpj: 0.5,
            smpj: 0.5,
            srpj: 0.5,
            mmtd: 2.,
            mrtd: 3.,
            smtd: 0.3,
            srtd: 0.3,
        }
    }

    #[test]
    fn same_seed_same_jobs() {
        let mut a = JobGenerator::new(params(), 7).unwrap();
        let mut b = JobGenerator::new(params(), 7).unwrap();
        for _ in 0..10 {
            let (x, y) = (a.generate(), b.generate());
            assert_eq!(x.ctime, y.ctime);
            assert_eq!(x.map_tasks.len(), y.map_tasks.len());
            assert_eq!(x.reduce_tasks.len(), y.reduce_tasks.len());
        }
    }

    #[test]
    fn jobs_are_well_formed() {
        let mut generator = JobGenerator::new(params(), 1).unwrap();
        generator.set_time(100.);
        let mut last = 100.;
        for _ in 0..50 {
            let job = generator.generate();
            assert!(job.ctime >= last);
            assert!(!job.map_tasks.is_empty());
            for task in job.map_tasks.iter().chain(&job.reduce_tasks) {
                assert_eq!(task.ctime, job.ctime);
                assert!(task.ptime > 0.);
            }
            last = job.ctime;
        }
    }

    #[test]
    fn rejects_bad_rate() {
        let mut bad = params();
        bad.jar = -1.;
        assert!(JobGenerator::new(bad, 0).is_err());
    }

    #[test]
    fn synthetic_workload_from_options() {
        let options: serde_yaml::Value = serde_yaml::from_str(
            "pool: research\njobs: 3\nseed: 5\njar: 1.0\nmmpj: 1.0\nmrpj: 0.0\nsmpj: 0.1\n\
             srpj: 0.1\nmmtd: 1.0\nmrtd: 1.0\nsmtd: 0.1\nsrtd: 0.1\n",
        )
        .unwrap();
        let mut workload = SyntheticWorkload::from_options(&options).unwrap();
        let jobs = workload.get_workload().unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|a| a.pool == "research"));
        assert!(jobs[0].job.name.starts_with("research_"));
    }
}
