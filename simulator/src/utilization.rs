//! Effective slot utilization of a finished run.

use crate::{pool::Pool, task::TaskType};

/// Busy slot time of finished tasks over `nslots * (last finish - first start)`.
///
/// Returns 0 when nothing finished or there are no slots.
pub fn utilization<'a, I>(pools: I, kind: TaskType, nslots: u32) -> f64
where
    I: IntoIterator<Item = &'a Pool>,
{
    let mut busy = 0.;
    let mut first_start = f64::INFINITY;
    let mut last_finish = f64::NEG_INFINITY;

    let finished = pools
        .into_iter()
        .flat_map(|p| p.jobs.iter())
        .flat_map(|j| j.tasks(kind).iter())
        .filter(|t| t.stime >= 0. && t.is_finished());
    for task in finished {
        busy += task.ftime - task.stime;
        first_start = first_start.min(task.stime);
        last_finish = last_finish.max(task.ftime);
    }

    let span = last_finish - first_start;
    if nslots == 0 || !span.is_finite() || span <= 0. {
        return 0.;
    }
    busy / (nslots as f64 * span)
}

pub fn pool_utilization(pool: &Pool, kind: TaskType, nslots: u32) -> f64 {
    utilization(std::iter::once(pool), kind, nslots)
}
