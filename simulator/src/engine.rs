//! Discrete-event engine driving slot admission, completion and preemption.

use std::collections::{BTreeMap, BinaryHeap, VecDeque};

use log::{debug, error, info};
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::{
    error::{Result, SimError},
    events::{Event, EventOutcome, ScheduledEvent},
    fair_share::{self, FairShareContext},
    job::Job,
    monitoring::Monitoring,
    pool::{Pool, PoolId, SchedMode},
    selector::Selector,
    semaphore::VirtualSemaphore,
    task::{Task, TaskRef, TaskType},
};

/// Number of events between two progress reports.
pub const PROGRESS_WINDOW: usize = 50_000;

/// Running tasks of one type, ordered by admission.
#[derive(Debug, Default)]
struct RunningSet {
    by_admission: BTreeMap<u64, TaskRef>,
    admissions: FxHashMap<TaskRef, u64>,
    next: u64,
}

impl RunningSet {
    fn insert(&mut self, task: TaskRef) {
        let seq = self.next;
        self.next += 1;
        self.by_admission.insert(seq, task);
        self.admissions.insert(task, seq);
    }

    fn remove(&mut self, task: &TaskRef) -> bool {
        match self.admissions.remove(task) {
            Some(seq) => self.by_admission.remove(&seq).is_some(),
            None => false,
        }
    }

    /// Youngest admission first.
    fn youngest_first(&self) -> Vec<TaskRef> {
        self.by_admission.values().rev().copied().collect()
    }

    fn len(&self) -> usize {
        self.by_admission.len()
    }

    fn clear(&mut self) {
        self.by_admission.clear();
        self.admissions.clear();
        self.next = 0;
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EngineStats {
    pub events: u64,
    pub admitted: [u64; 2],
    pub finished: [u64; 2],
    pub preempted: [u64; 2],
    pub suspensions: u64,
}

pub struct Engine {
    pub(crate) time_now: f64,
    start_time: f64,
    total_slots: [u32; 2],
    pub(crate) pools: Vec<Pool>,

    queue: BinaryHeap<ScheduledEvent>,
    next_seq: u64,
    pub(crate) semaphores: [VirtualSemaphore<ScheduledEvent>; 2],
    /// Events handed back by a semaphore release, run before the next queued event.
    resume: VecDeque<ScheduledEvent>,
    running: [RunningSet; 2],
    pub(crate) selector: Selector,
    /// A creation event of the type is queued or parked in a semaphore.
    pub(crate) create_pending: [bool; 2],

    pub(crate) stats: EngineStats,
    monitoring: Option<Monitoring>,
}

impl Engine {
    pub fn new(total_maps: u32, total_reduces: u32, start_time: f64) -> Self {
        Engine {
            time_now: start_time,
            start_time,
            total_slots: [total_maps, total_reduces],
            pools: Vec::new(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            semaphores: [
                VirtualSemaphore::new(total_maps),
                VirtualSemaphore::new(total_reduces),
            ],
            resume: VecDeque::new(),
            running: [RunningSet::default(), RunningSet::default()],
            selector: Selector::new(&[]),
            create_pending: [false; 2],
            stats: EngineStats::default(),
            monitoring: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_pool(
        &mut self,
        name: &str,
        ms_timeout: f64,
        hf_timeout: f64,
        weight: f64,
        min_map: u32,
        min_reduce: u32,
        sched: SchedMode,
    ) -> PoolId {
        self.pools.push(Pool::new(
            name, ms_timeout, hf_timeout, weight, min_map, min_reduce, sched,
        ));
        self.pools.len() - 1
    }

    pub fn add_job(&mut self, pool: PoolId, job: Job) -> Result<usize> {
        match self.pools.get_mut(pool) {
            Some(p) => Ok(p.add_job(job)),
            None => Err(SimError::Config(format!("pool index {} is out of range", pool))),
        }
    }

    pub fn pool_index(&self, name: &str) -> Option<PoolId> {
        self.pools.iter().position(|p| p.name == name)
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    pub fn pools_mut(&mut self) -> &mut Vec<Pool> {
        &mut self.pools
    }

    pub fn time_now(&self) -> f64 {
        self.time_now
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn total_slots(&self, kind: TaskType) -> u32 {
        self.total_slots[kind.index()]
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn running(&self, kind: TaskType) -> usize {
        self.running[kind.index()].len()
    }

    pub fn set_monitoring(&mut self, monitoring: Monitoring) {
        self.monitoring = Some(monitoring);
    }

    pub fn take_monitoring(&mut self) -> Option<Monitoring> {
        self.monitoring.take()
    }

    /// Scales pool min shares of both task types to the cluster size.
    pub fn scale_minshares(&mut self) {
        for kind in TaskType::ALL {
            let total = self.total_slots[kind.index()];
            let mut shares: Vec<&mut FairShareContext> =
                self.pools.iter_mut().map(|p| p.share_mut(kind)).collect();
            fair_share::scale_minshares(&mut shares, total);
        }
    }

    pub(crate) fn update_fairshares(&mut self, kind: TaskType) {
        let total = self.total_slots[kind.index()];
        let mut shares: Vec<&mut FairShareContext> =
            self.pools.iter_mut().map(|p| p.share_mut(kind)).collect();
        fair_share::compute_fairshares(&mut shares, total);
    }

    pub(crate) fn schedule(&mut self, time: f64, event: Event) {
        if let Event::CreateMap | Event::CreateReduce = event {
            self.create_pending[event.kind().index()] = true;
        }
        self.queue.push(ScheduledEvent {
            time,
            seq: self.next_seq,
            event,
        });
        self.next_seq += 1;
    }

    /// Schedules preemption checkpoints for a pool whose demand just grew.
    pub(crate) fn arm_checkpoints(&mut self, pool: PoolId, kind: TaskType) {
        let checkpoints = self.pools[pool].transit_n2s(kind, self.time_now);
        for deadline in checkpoints.deadlines() {
            debug!(
                "@{} pool {} starved for {}s, checking at {}",
                self.time_now,
                self.pools[pool].name,
                kind.name(),
                deadline
            );
            self.schedule(deadline, Event::preempt(kind, pool));
        }
    }

    pub(crate) fn release(&mut self, kind: TaskType) {
        if let Some(waiter) = self.semaphores[kind.index()].release() {
            debug!("@{} {} creation resumed", self.time_now, kind.name());
            self.resume.push_back(waiter);
        }
    }

    /// Makes sure a creation event of `kind` exists while tasks are left.
    pub(crate) fn ensure_creation(&mut self, kind: TaskType) {
        if self.create_pending[kind.index()] {
            return;
        }
        if let Some(time) = self.selector.next_creation_time(kind, self.time_now) {
            self.schedule(time, Event::create(kind));
        }
    }

    pub(crate) fn run_task(&mut self, task: TaskRef) {
        let now = self.time_now;
        let record = task.task_mut(&mut self.pools);
        record.attempts += 1;
        record.stime = now;
        record.ftime = -1.;
        let attempt = record.attempts;
        let finish = record.stime + record.ptime;

        self.running[task.kind.index()].insert(task);
        self.stats.admitted[task.kind.index()] += 1;
        self.schedule(finish, Event::finish(task, attempt));
    }

    pub(crate) fn finish_task(&mut self, task: TaskRef) {
        let now = self.time_now;
        let kind = task.kind;
        task.task_mut(&mut self.pools).ftime = now;

        self.running[kind.index()].remove(&task);
        let pool = &mut self.pools[task.pool];
        let job = &mut pool.jobs[task.job];
        job.ftime = now;
        job.share_mut(kind).withdraw();
        pool.share_mut(kind).withdraw();

        self.update_fairshares(kind);
        self.arm_checkpoints(task.pool, kind);
        self.pools[task.pool].transit_s2n(kind);
        self.stats.finished[kind.index()] += 1;
        self.release(kind);
    }

    /// Preempts up to `count` running tasks of pools above their fair share, youngest first.
    pub(crate) fn preempt(&mut self, kind: TaskType, count: u32) -> u32 {
        let mut preempted = 0;
        for task in self.running[kind.index()].youngest_first() {
            if preempted == count {
                break;
            }
            let share = self.pools[task.pool].share(kind);
            if share.alloc as f64 <= share.fairshare {
                continue;
            }
            preempted += 1;
            task.task_mut(&mut self.pools).set_flag(Task::FLAG_PREEMPTED);
            let pool = &mut self.pools[task.pool];
            pool.jobs[task.job].share_mut(kind).withdraw();
            pool.share_mut(kind).withdraw();
            self.selector.add_preempted(task, &mut self.pools);
            self.running[kind.index()].remove(&task);
        }

        self.update_fairshares(kind);
        if preempted > 0 {
            self.ensure_creation(kind);
        }
        for _ in 0..preempted {
            self.release(kind);
        }
        self.stats.preempted[kind.index()] += preempted as u64;
        info!(
            "@{} {} of {} {}s have been preempted",
            self.time_now,
            preempted,
            count,
            kind.name()
        );
        preempted
    }

    fn submit_tasks(&mut self) {
        for kind in TaskType::ALL {
            self.ensure_creation(kind);
        }
    }

    fn dispatch(&mut self, ev: ScheduledEvent) -> Result<EventOutcome> {
        let outcome = self.handle(ev).map_err(|e| {
            error!("@{} {}", self.time_now, e);
            e
        })?;
        #[cfg(debug_assertions)]
        self.check_invariants().map_err(|e| {
            error!("@{} {}", self.time_now, e);
            e
        })?;
        Ok(outcome)
    }

    pub fn map_progress(&self) -> f64 {
        self.selector.progress(TaskType::Map)
    }

    pub fn reduce_progress(&self) -> f64 {
        self.selector.progress(TaskType::Reduce)
    }

    fn show_progress(&self) {
        info!(
            "@{} progress: maps {:.2}%, reduces {:.2}%",
            self.time_now,
            self.map_progress() * 100.,
            self.reduce_progress() * 100.
        );
    }

    /// Runs the simulation until no events remain.
    ///
    /// Creation events still parked in a semaphore at the end are dropped.
    pub fn process(&mut self) -> Result<()> {
        self.selector = Selector::new(&self.pools);
        self.submit_tasks();

        let mut nev: usize = 0;
        while let Some(ev) = self.queue.pop() {
            self.dispatch(ev)?;
            while let Some(waiter) = self.resume.pop_front() {
                self.dispatch(waiter)?;
            }
            self.stats.events += 1;

            let last = self.queue.is_empty();
            if nev % PROGRESS_WINDOW == 0 || last {
                self.show_progress();
            }
            if let Some(monitoring) = self.monitoring.as_mut() {
                monitoring.observe(nev, last, self.time_now, &self.pools);
            }
            nev += 1;
        }

        for kind in TaskType::ALL {
            let parked = self.semaphores[kind.index()].waiting();
            if parked > 0 {
                debug!(
                    "@{} dropping {} suspended {} creations",
                    self.time_now,
                    parked,
                    kind.name()
                );
            }
        }
        if let Some(monitoring) = self.monitoring.as_mut() {
            monitoring.flush();
        }
        Ok(())
    }

    /// Returns the clock to the start time and clears all runtime state.
    ///
    /// Pools, jobs and tasks stay in place, so the engine can run again with
    /// new pool parameters.
    pub fn reset_time(&mut self) {
        self.time_now = self.start_time;
        self.queue.clear();
        self.next_seq = 0;
        self.semaphores.iter_mut().for_each(VirtualSemaphore::reset);
        self.resume.clear();
        self.running.iter_mut().for_each(RunningSet::clear);
        self.selector = Selector::new(&[]);
        self.create_pending = [false; 2];
        self.stats = EngineStats::default();
        self.pools.iter_mut().for_each(Pool::reset);
    }

    /// Checks the accounting invariants of every pool and job.
    pub fn check_invariants(&self) -> Result<()> {
        for kind in TaskType::ALL {
            let mut allocated = 0;
            for pool in &self.pools {
                let share = pool.share(kind);
                if share.alloc > share.demand {
                    return Err(SimError::invariant(
                        self.time_now,
                        format!(
                            "pool {} allocates {} {} slots for a demand of {}",
                            pool.name,
                            share.alloc,
                            kind.name(),
                            share.demand
                        ),
                    ));
                }
                for job in &pool.jobs {
                    let share = job.share(kind);
                    if share.alloc > share.demand {
                        return Err(SimError::invariant(
                            self.time_now,
                            format!(
                                "job {} allocates {} {} slots for a demand of {}",
                                job.name,
                                share.alloc,
                                kind.name(),
                                share.demand
                            ),
                        ));
                    }
                }
                allocated += share.alloc;
            }

            let running = self.running[kind.index()].len();
            if allocated as usize != running || allocated > self.total_slots[kind.index()] {
                return Err(SimError::invariant(
                    self.time_now,
                    format!(
                        "{} {} slots allocated, {} running, {} in total",
                        allocated,
                        kind.name(),
                        running,
                        self.total_slots[kind.index()]
                    ),
                ));
            }
        }
        Ok(())
    }
}
