use std::collections::BTreeSet;

use crate::{
    engine::Engine,
    error::{Result, SimError},
    job::Job,
};

/// A job together with the name of the pool it is submitted to.
#[derive(Debug, Clone)]
pub struct JobAssignment {
    pub pool: String,
    pub job: Job,
    /// Input line the job first appeared on, 0 for generated jobs.
    pub line: u64,
}

pub trait WorkloadGenerator {
    fn get_workload(&mut self) -> Result<Vec<JobAssignment>>;
}

/// Adds every job to its pool, or none of them if a pool is unknown.
pub fn assign_jobs(engine: &mut Engine, jobs: Vec<JobAssignment>) -> Result<usize> {
    let mut targets = Vec::with_capacity(jobs.len());
    for assignment in &jobs {
        match engine.pool_index(&assignment.pool) {
            Some(pool) => targets.push(pool),
            None => {
                return Err(SimError::UnknownPool {
                    line: assignment.line,
                    pool: assignment.pool.clone(),
                })
            }
        }
    }

    let mut names = BTreeSet::new();
    for assignment in &jobs {
        if !names.insert((assignment.pool.as_str(), assignment.job.name.as_str())) {
            return Err(SimError::workload(
                assignment.line,
                format!("job {} is submitted twice", assignment.job.name),
            ));
        }
    }

    let count = jobs.len();
    for (pool, assignment) in targets.into_iter().zip(jobs) {
        engine.add_job(pool, assignment.job)?;
    }
    Ok(count)
}
