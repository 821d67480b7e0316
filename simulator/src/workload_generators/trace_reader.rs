//! Tab separated workload records.
//!
//! Trace records, replaying an observed schedule:
//! `POOL \t JOB:PRIORITY \t TASK \t MAP|REDUCE \t CTIME \t STIME \t FTIME`
//!
//! Load records, for a workload that has not run yet:
//! `POOL \t JOB:PRIORITY \t TASK \t MAP|REDUCE \t CTIME \t PTIME`
//!
//! Schedule records, as written by the schedule export:
//! `POOL \t JOB:PRIORITY \t TASK \t MAP|REDUCE \t CTIME \t PTIME \t STIME \t FTIME`

use std::{fs::File, io::Read, str::FromStr};

use csv::{ReaderBuilder, StringRecord};
use log::info;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SimError},
    job::Job,
    task::{Task, TaskType},
};

use super::generator::{JobAssignment, WorkloadGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceFormat {
    /// Seven fields with observed start and finish times.
    Trace,
    /// Six fields with a processing time.
    Load,
    /// Eight fields with a processing time and simulated start and finish times.
    Schedule,
}

impl TraceFormat {
    pub fn fields(self) -> usize {
        match self {
            TraceFormat::Trace => 7,
            TraceFormat::Load => 6,
            TraceFormat::Schedule => 8,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Options {
    path: String,
}

pub struct TraceReader {
    path: String,
    format: TraceFormat,
}

fn parse_field<T: FromStr>(record: &StringRecord, index: usize, name: &str, line: u64) -> Result<T> {
    let value = record
        .get(index)
        .ok_or_else(|| SimError::workload(line, format!("missing {}", name)))?;
    value
        .trim()
        .parse()
        .map_err(|_| SimError::workload(line, format!("invalid {} `{}`", name, value)))
}

fn parse_time(record: &StringRecord, index: usize, name: &str, line: u64) -> Result<f64> {
    let value: f64 = parse_field(record, index, name, line)?;
    if !value.is_finite() {
        return Err(SimError::workload(line, format!("{} `{}` is not finite", name, value)));
    }
    Ok(value)
}

/// Splits `JOB:PRIORITY` at the last colon.
fn parse_job(value: &str, line: u64) -> Result<(&str, f64)> {
    let (name, priority) = value
        .rsplit_once(':')
        .ok_or_else(|| SimError::workload(line, format!("missing job priority in `{}`", value)))?;
    let priority: f64 = priority
        .trim()
        .parse()
        .map_err(|_| SimError::workload(line, format!("invalid job priority `{}`", priority)))?;
    if name.is_empty() {
        return Err(SimError::workload(line, "empty job name"));
    }
    if !f64::is_finite(priority) {
        return Err(SimError::workload(line, format!("job priority `{}` is not finite", priority)));
    }
    Ok((name, priority))
}

impl TraceReader {
    pub fn new(path: &str, format: TraceFormat) -> Self {
        TraceReader {
            path: path.to_string(),
            format,
        }
    }

    pub fn from_options(options: &serde_yaml::Value, format: TraceFormat) -> Result<Self> {
        let options: Options = serde_yaml::from_value(options.clone())?;
        Ok(TraceReader::new(&options.path, format))
    }

    /// Reads every record; any malformed record fails the whole read.
    pub fn read_from<R: Read>(reader: R, format: TraceFormat) -> Result<Vec<JobAssignment>> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .from_reader(reader);

        let mut jobs: Vec<JobAssignment> = Vec::new();
        let mut index: FxHashMap<(String, String), usize> = FxHashMap::default();

        for record in reader.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            if record.len() == 1 && record[0].trim().is_empty() {
                continue;
            }
            if record.len() != format.fields() {
                return Err(SimError::workload(
                    line,
                    format!("expected {} fields, got {}", format.fields(), record.len()),
                ));
            }

            let pool = record[0].trim();
            let (job_name, priority) = parse_job(&record[1], line)?;
            let task_name = record[2].trim();
            let kind: TaskType = record[3]
                .trim()
                .parse()
                .map_err(|reason: String| SimError::workload(line, reason))?;
            let ctime = parse_time(&record, 4, "creation time", line)?;

            let task = match format {
                TraceFormat::Trace => {
                    let stime = parse_time(&record, 5, "start time", line)?;
                    let ftime = parse_time(&record, 6, "finish time", line)?;
                    let mut task = Task::named(task_name, kind, ctime, ftime - stime);
                    task.stime = stime;
                    task.ftime = ftime;
                    task
                }
                TraceFormat::Load => {
                    let ptime = parse_time(&record, 5, "processing time", line)?;
                    Task::named(task_name, kind, ctime, ptime)
                }
                TraceFormat::Schedule => {
                    let ptime = parse_time(&record, 5, "processing time", line)?;
                    let mut task = Task::named(task_name, kind, ctime, ptime);
                    task.stime = parse_time(&record, 6, "start time", line)?;
                    task.ftime = parse_time(&record, 7, "finish time", line)?;
                    task
                }
            };
            if task.ptime < 0. {
                return Err(SimError::workload(
                    line,
                    format!("task {} has a negative processing time", task_name),
                ));
            }

            let key = (pool.to_string(), job_name.to_string());
            let slot = *index.entry(key).or_insert_with(|| {
                jobs.push(JobAssignment {
                    pool: pool.to_string(),
                    job: Job::new(job_name, ctime, priority),
                    line,
                });
                jobs.len() - 1
            });
            let job = &mut jobs[slot].job;
            job.ctime = job.ctime.min(ctime);
            if task.is_finished() {
                job.ftime = job.ftime.max(task.ftime);
            }
            job.add_task(task);
        }
        Ok(jobs)
    }
}

impl WorkloadGenerator for TraceReader {
    fn get_workload(&mut self) -> Result<Vec<JobAssignment>> {
        let jobs = TraceReader::read_from(File::open(&self.path)?, self.format)?;
        info!(
            "loaded {} jobs with {} tasks from {}",
            jobs.len(),
            jobs.iter().map(|a| a.job.task_count()).sum::<usize>(),
            self.path
        );
        Ok(jobs)
    }
}
