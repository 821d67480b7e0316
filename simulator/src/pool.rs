use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SimError},
    fair_share::FairShareContext,
    job::Job,
    task::{hash_str, TaskType, TIME_EPSILON},
};

/// Index of a pool inside its engine.
pub type PoolId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedMode {
    Fair,
    Fcfs,
}

impl FromStr for SchedMode {
    type Err = String;

    fn from_str(input: &str) -> std::result::Result<SchedMode, Self::Err> {
        match input.to_lowercase().as_str() {
            "fair" => Ok(SchedMode::Fair),
            "fcfs" | "fifo" => Ok(SchedMode::Fcfs),
            _ => Err(format!("unknown scheduling mode `{}`", input)),
        }
    }
}

impl fmt::Display for SchedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedMode::Fair => write!(f, "fair"),
            SchedMode::Fcfs => write!(f, "fcfs"),
        }
    }
}

/// Preemption deadlines armed by a normal to starved transition.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Checkpoints {
    pub min_share: Option<f64>,
    pub half_fair_share: Option<f64>,
}

impl Checkpoints {
    pub fn deadlines(self) -> impl Iterator<Item = f64> {
        self.min_share.into_iter().chain(self.half_fair_share)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pool {
    pub id: u64,
    pub name: String,
    pub sched: SchedMode,
    /// Negative disables min share preemption.
    pub ms_timeout: f64,
    /// Negative disables half fair share preemption.
    pub hf_timeout: f64,
    /// Last time seen below min share, per task type. Negative when not starved.
    pub last_at_ms: [f64; 2],
    /// Last time seen below half fair share, per task type. Negative when not starved.
    pub last_at_hf: [f64; 2],
    pub map_share: FairShareContext,
    pub reduce_share: FairShareContext,
    pub jobs: Vec<Job>,
}

impl Pool {
    pub fn new(
        name: &str,
        ms_timeout: f64,
        hf_timeout: f64,
        weight: f64,
        min_map: u32,
        min_reduce: u32,
        sched: SchedMode,
    ) -> Self {
        let mut pool = Pool {
            id: 0,
            name: String::new(),
            sched,
            ms_timeout,
            hf_timeout,
            last_at_ms: [-1.; 2],
            last_at_hf: [-1.; 2],
            map_share: FairShareContext::default(),
            reduce_share: FairShareContext::default(),
            jobs: Vec::new(),
        };
        pool.reinit(name, ms_timeout, hf_timeout, weight, min_map, min_reduce, sched);
        pool
    }

    /// Re-applies the configuration, keeping jobs and their tasks.
    #[allow(clippy::too_many_arguments)]
    pub fn reinit(
        &mut self,
        name: &str,
        ms_timeout: f64,
        hf_timeout: f64,
        weight: f64,
        min_map: u32,
        min_reduce: u32,
        sched: SchedMode,
    ) {
        self.id = if name.is_empty() {
            0
        } else {
            Pool::id_from_str(name)
        };
        self.name = name.to_string();
        self.sched = sched;
        self.ms_timeout = ms_timeout;
        self.hf_timeout = hf_timeout;
        self.last_at_ms = [-1.; 2];
        self.last_at_hf = [-1.; 2];
        for (ctx, minshare) in [
            (&mut self.map_share, min_map),
            (&mut self.reduce_share, min_reduce),
        ] {
            ctx.uid = self.id;
            ctx.set_weight(weight);
            ctx.minshare = minshare as f64;
        }
    }

    pub fn id_from_str(name: &str) -> u64 {
        hash_str(name, 0xdeedbeeffeedbeef)
    }

    /// Adds a job and returns its index; demand grows only as tasks become visible.
    pub fn add_job(&mut self, job: Job) -> usize {
        self.jobs.push(job);
        self.jobs.len() - 1
    }

    pub fn share(&self, kind: TaskType) -> &FairShareContext {
        match kind {
            TaskType::Map => &self.map_share,
            TaskType::Reduce => &self.reduce_share,
        }
    }

    pub fn share_mut(&mut self, kind: TaskType) -> &mut FairShareContext {
        match kind {
            TaskType::Map => &mut self.map_share,
            TaskType::Reduce => &mut self.reduce_share,
        }
    }

    pub fn task_count(&self, kind: TaskType) -> usize {
        self.jobs.iter().map(|j| j.tasks(kind).len()).sum()
    }

    fn below_min_share(&self, kind: TaskType) -> bool {
        let ctx = self.share(kind);
        ctx.alloc < ctx.demand.min(ctx.minshare as u32)
    }

    fn below_half_fair_share(&self, kind: TaskType) -> bool {
        let ctx = self.share(kind);
        (ctx.alloc as f64) < (ctx.fairshare / 2.).floor()
    }

    /// Normal to starved transition, run after demand grows.
    ///
    /// Stamps every newly starved condition with `now` and returns the
    /// preemption deadlines the caller has to schedule.
    pub fn transit_n2s(&mut self, kind: TaskType, now: f64) -> Checkpoints {
        let below_ms = self.below_min_share(kind);
        let below_hf = self.below_half_fair_share(kind);
        let i = kind.index();
        let mut checkpoints = Checkpoints::default();

        if self.ms_timeout >= 0. && self.last_at_ms[i] < 0. && below_ms {
            self.last_at_ms[i] = now;
            checkpoints.min_share = Some(now + self.ms_timeout);
        }
        if self.hf_timeout >= 0. && self.last_at_hf[i] < 0. && below_hf {
            self.last_at_hf[i] = now;
            checkpoints.half_fair_share = Some(now + self.hf_timeout);
        }
        checkpoints
    }

    /// Starved to normal transition, run after allocation grows.
    ///
    /// Already scheduled preemption events are left in place and turn into
    /// no-ops once the stamp is cleared.
    pub fn transit_s2n(&mut self, kind: TaskType) {
        let i = kind.index();
        if !self.below_min_share(kind) {
            self.last_at_ms[i] = -1.;
        }
        if !self.below_half_fair_share(kind) {
            self.last_at_hf[i] = -1.;
        }
    }

    /// Slots needed to get back to min share, 0 unless starved for at least `ms_timeout`.
    pub fn starved_for_min_share(&self, kind: TaskType, now: f64) -> Result<u32> {
        let stamp = self.last_at_ms[kind.index()];
        if stamp < 0. || now - stamp + TIME_EPSILON < self.ms_timeout {
            return Ok(0);
        }
        let ctx = self.share(kind);
        let need = ctx.demand.min(ctx.minshare as u32) as i64 - ctx.alloc as i64;
        if need <= 0 {
            return Err(SimError::invariant(
                now,
                format!(
                    "pool {} expected {} allocation below min share",
                    self.name,
                    kind.name()
                ),
            ));
        }
        Ok(need as u32)
    }

    /// Slots needed to get back to fair share, 0 unless starved below half of it for at least `hf_timeout`.
    pub fn starved_for_half_fair_share(&self, kind: TaskType, now: f64) -> Result<u32> {
        let stamp = self.last_at_hf[kind.index()];
        if stamp < 0. || now - stamp + TIME_EPSILON < self.hf_timeout {
            return Ok(0);
        }
        let ctx = self.share(kind);
        if !self.below_half_fair_share(kind) {
            return Err(SimError::invariant(
                now,
                format!(
                    "pool {} expected {} allocation below half fair share",
                    self.name,
                    kind.name()
                ),
            ));
        }
        Ok((ctx.fairshare - ctx.alloc as f64).trunc().max(0.) as u32)
    }

    pub(crate) fn reset(&mut self) {
        self.last_at_ms = [-1.; 2];
        self.last_at_hf = [-1.; 2];
        self.map_share.reset();
        self.reduce_share.reset();
        self.jobs.iter_mut().for_each(Job::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(ms_timeout: f64, hf_timeout: f64) -> Pool {
        Pool::new("research", ms_timeout, hf_timeout, 1., 4, 2, SchedMode::Fair)
    }

    #[test]
    fn sched_mode_parsing() {
        assert_eq!("FAIR".parse::<SchedMode>(), Ok(SchedMode::Fair));
        assert_eq!("fifo".parse::<SchedMode>(), Ok(SchedMode::Fcfs));
        assert_eq!("fcfs".parse::<SchedMode>(), Ok(SchedMode::Fcfs));
        assert!("lottery".parse::<SchedMode>().is_err());
    }

    #[test]
    fn reinit_keeps_jobs() {
        let mut p = pool(1., 1.);
        p.add_job(Job::new("job_1", 0., 1.));
        p.reinit("research", 5., -1., 0.1, 1, 1, SchedMode::Fcfs);
        assert_eq!(p.jobs.len(), 1);
        assert_eq!(p.map_share.weight, 0.5);
        assert_eq!(p.sched, SchedMode::Fcfs);
        assert_eq!(p.map_share.uid, p.id);
    }

    #[test]
    fn arms_checkpoints_once() {
        let mut p = pool(10., 3.);
        p.map_share.demand = 3;
        p.map_share.fairshare = 1.;
        let checkpoints = p.transit_n2s(TaskType::Map, 2.);
        assert_eq!(checkpoints.min_share, Some(12.));
        assert_eq!(checkpoints.half_fair_share, None);
        assert_eq!(p.last_at_ms[0], 2.);

        let again = p.transit_n2s(TaskType::Map, 4.);
        assert_eq!(again.deadlines().count(), 0);
        assert_eq!(p.last_at_ms[0], 2.);
    }

    #[test]
    fn negative_timeout_disables_arming() {
        let mut p = pool(-1., -1.);
        p.reduce_share.demand = 5;
        p.reduce_share.fairshare = 5.;
        assert_eq!(p.transit_n2s(TaskType::Reduce, 0.).deadlines().count(), 0);
        assert!(p.last_at_ms[1] < 0.);
    }

    #[test]
    fn recovers_from_starvation() {
        let mut p = pool(1., 1.);
        p.map_share.demand = 2;
        p.map_share.fairshare = 6.;
        p.transit_n2s(TaskType::Map, 0.);
        assert!(p.last_at_hf[0] >= 0.);

        p.map_share.alloc = 2;
        p.transit_s2n(TaskType::Map);
        assert!(p.last_at_ms[0] < 0.);
        // 2 < floor(6 / 2) still holds
        assert_eq!(p.last_at_hf[0], 0.);
    }

    #[test]
    fn starvation_needs_elapsed_timeout() {
        let mut p = pool(5., 8.);
        p.map_share.demand = 6;
        p.map_share.fairshare = 6.;
        p.map_share.alloc = 1;
        p.transit_n2s(TaskType::Map, 1.);

        assert_eq!(p.starved_for_min_share(TaskType::Map, 3.).unwrap(), 0);
        assert_eq!(p.starved_for_min_share(TaskType::Map, 6.).unwrap(), 3);
        assert_eq!(p.starved_for_half_fair_share(TaskType::Map, 6.).unwrap(), 0);
        assert_eq!(p.starved_for_half_fair_share(TaskType::Map, 9.).unwrap(), 5);
    }

    #[test]
    fn stale_stamp_is_an_invariant_violation() {
        let mut p = pool(1., -1.);
        p.map_share.demand = 2;
        p.transit_n2s(TaskType::Map, 0.);
        p.map_share.alloc = 2;
        assert!(matches!(
            p.starved_for_min_share(TaskType::Map, 5.),
            Err(SimError::Invariant { .. })
        ));
    }
}
