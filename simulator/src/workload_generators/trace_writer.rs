use std::{fs::File, io::Write, path::Path};

use csv::WriterBuilder;

use crate::{
    error::{Result, SimError},
    pool::Pool,
    task::TaskType,
};

fn tsv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(writer)
}

/// Writes `POOL JOB:WEIGHT TASK TYPE CTIME PTIME STIME FTIME`, one line per task.
///
/// The output reads back with [`TraceFormat::Schedule`](super::trace_reader::TraceFormat::Schedule).
pub fn export_schedule<W: Write>(writer: W, pools: &[Pool]) -> Result<()> {
    let mut out = tsv_writer(writer);
    for pool in pools {
        for job in &pool.jobs {
            for kind in TaskType::ALL {
                for task in job.tasks(kind) {
                    out.write_record([
                        pool.name.clone(),
                        format!("{}:{}", job.name, job.share(kind).weight),
                        task.label(),
                        kind.to_string(),
                        task.ctime.to_string(),
                        task.ptime.to_string(),
                        task.stime.to_string(),
                        task.ftime.to_string(),
                    ])?;
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

pub fn export_schedule_to_file<P: AsRef<Path>>(path: P, pools: &[Pool]) -> Result<()> {
    export_schedule(File::create(path)?, pools)
}

/// Writes loaded against simulated times:
/// `POOL JOB:WEIGHT TASK TYPE CTIME PTIME STIME STIME' FTIME FTIME'`.
///
/// Both snapshots must hold the same pools, jobs and tasks in the same order.
pub fn export_comparison<W: Write>(writer: W, before: &[Pool], after: &[Pool]) -> Result<()> {
    if before.len() != after.len() {
        return Err(SimError::Mismatch(format!(
            "{} pools against {}",
            before.len(),
            after.len()
        )));
    }
    let mut out = tsv_writer(writer);
    for (pool, pool1) in before.iter().zip(after) {
        if pool.name != pool1.name || pool.jobs.len() != pool1.jobs.len() {
            return Err(SimError::Mismatch(format!("pool {} against {}", pool.name, pool1.name)));
        }
        for (job, job1) in pool.jobs.iter().zip(&pool1.jobs) {
            if job.id != job1.id {
                return Err(SimError::Mismatch(format!(
                    "job ids {:016x} against {:016x}",
                    job.id, job1.id
                )));
            }
            for kind in TaskType::ALL {
                let (tasks, tasks1) = (job.tasks(kind), job1.tasks(kind));
                if tasks.len() != tasks1.len() {
                    return Err(SimError::Mismatch(format!(
                        "job {} has {} {}s against {}",
                        job.name,
                        tasks.len(),
                        kind.name(),
                        tasks1.len()
                    )));
                }
                for (task, task1) in tasks.iter().zip(tasks1) {
                    if task.id != task1.id {
                        return Err(SimError::Mismatch(format!(
                            "task ids {:016x} against {:016x}",
                            task.id, task1.id
                        )));
                    }
                    out.write_record([
                        pool.name.clone(),
                        format!("{}:{}", job.name, job.share(kind).weight),
                        task.label(),
                        kind.to_string(),
                        task.ctime.to_string(),
                        task.ptime.to_string(),
                        task.stime.to_string(),
                        task1.stime.to_string(),
                        task.ftime.to_string(),
                        task1.ftime.to_string(),
                    ])?;
                }
            }
        }
    }
    out.flush()?;
    Ok(())
}

pub fn export_comparison_to_file<P: AsRef<Path>>(
    path: P,
    before: &[Pool],
    after: &[Pool],
) -> Result<()> {
    export_comparison(File::create(path)?, before, after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        job::Job,
        pool::SchedMode,
        task::{Task, TaskType},
        workload_generators::trace_reader::{TraceFormat, TraceReader},
    };

    fn pools() -> Vec<Pool> {
        let mut job = Job::new("job_1", 0., 2.);
        let mut task = Task::new(0xab, TaskType::Map, 0., 3.);
        task.stime = 1.;
        task.ftime = 4.;
        job.add_task(task);
        let mut pool = Pool::new("prod", -1., -1., 1., 0, 0, SchedMode::Fair);
        pool.add_job(job);
        vec![pool]
    }

    #[test]
    fn writes_schedule_lines() {
        let mut out = Vec::new();
        export_schedule(&mut out, &pools()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "prod\tjob_1:2\t00000000000000ab\tMAP\t0\t3\t1\t4\n");
    }

    #[test]
    fn schedule_reads_back() {
        let mut job = Job::new("job_1", 0., 2.);
        let mut task = Task::named("m_7", TaskType::Map, 0., 3.);
        task.stime = 1.;
        task.ftime = 4.;
        job.add_task(task);
        let mut pool = Pool::new("prod", -1., -1., 1., 0, 0, SchedMode::Fair);
        pool.add_job(job);

        let mut out = Vec::new();
        export_schedule(&mut out, &[pool]).unwrap();
        assert!(String::from_utf8(out.clone()).unwrap().contains("\tm_7\t"));

        let jobs = TraceReader::read_from(out.as_slice(), TraceFormat::Schedule).unwrap();
        let read = &jobs[0].job.map_tasks[0];
        assert_eq!(read.id, Task::id_from_str("m_7"));
        assert_eq!((read.ptime, read.stime, read.ftime), (3., 1., 4.));
        assert_eq!(jobs[0].job.weight(), 2.);
    }

    #[test]
    fn compares_matching_snapshots() {
        let before = pools();
        let mut after = pools();
        after[0].jobs[0].map_tasks[0].stime = 0.;
        after[0].jobs[0].map_tasks[0].ftime = 3.;

        let mut out = Vec::new();
        export_comparison(&mut out, &before, &after).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("\t1\t0\t4\t3\n"));
    }

    #[test]
    fn rejects_different_snapshots() {
        let before = pools();
        let mut after = pools();
        after[0].jobs[0].map_tasks[0].id = 1;
        assert!(matches!(
            export_comparison(Vec::new(), &before, &after),
            Err(SimError::Mismatch(_))
        ));
    }
}
