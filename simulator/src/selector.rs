//! Task visibility and two-level (pool, then job) task selection.

use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeSet, BinaryHeap},
};

use rustc_hash::FxHashMap;

use crate::{
    fair_share::cmp_used_share,
    pool::{Pool, PoolId, SchedMode},
    task::{TaskRef, TaskType},
};

#[derive(Debug, Clone, Copy)]
struct PendingTask {
    ctime: f64,
    task: TaskRef,
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingTask {}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ctime
            .total_cmp(&other.ctime)
            .then_with(|| self.task.cmp(&other.task))
    }
}

type JobQueues = FxHashMap<usize, BinaryHeap<Reverse<PendingTask>>>;

#[derive(Debug, Default)]
struct Lane {
    /// Not yet created tasks, latest first so the earliest sits at the end.
    hidden: Vec<PendingTask>,
    /// Visible tasks waiting for a slot, per pool and job.
    ready: Vec<JobQueues>,
    eligible: usize,
    seen: usize,
    popped: usize,
}

impl Lane {
    fn new(pools: &[Pool], kind: TaskType) -> Self {
        let mut hidden = Vec::new();
        for (p, pool) in pools.iter().enumerate() {
            for (j, job) in pool.jobs.iter().enumerate() {
                for (t, task) in job.tasks(kind).iter().enumerate() {
                    hidden.push(PendingTask {
                        ctime: task.ctime,
                        task: TaskRef::new(p, j, kind, t),
                    });
                }
            }
        }
        hidden.sort_unstable_by(|a, b| b.cmp(a));
        Lane {
            hidden,
            ready: vec![JobQueues::default(); pools.len()],
            eligible: 0,
            seen: 0,
            popped: 0,
        }
    }

    fn push_ready(&mut self, pending: PendingTask) {
        self.ready[pending.task.pool]
            .entry(pending.task.job)
            .or_default()
            .push(Reverse(pending));
        self.eligible += 1;
    }
}

/// Decides which task gets the next free slot.
///
/// Built over the pool collection at the start of every run. Tasks stay
/// hidden until their creation time is reached, visible tasks add to the
/// demand of their job and pool.
#[derive(Debug)]
pub struct Selector {
    lanes: [Lane; 2],
}

impl Selector {
    pub fn new(pools: &[Pool]) -> Self {
        Selector {
            lanes: [
                Lane::new(pools, TaskType::Map),
                Lane::new(pools, TaskType::Reduce),
            ],
        }
    }

    fn lane(&self, kind: TaskType) -> &Lane {
        &self.lanes[kind.index()]
    }

    /// Reveals every task of `kind` created at or before `now`.
    ///
    /// Returns the pools whose demand changed.
    pub fn see(&mut self, kind: TaskType, now: f64, pools: &mut [Pool]) -> BTreeSet<PoolId> {
        let lane = &mut self.lanes[kind.index()];
        let mut changed = BTreeSet::new();
        while let Some(next) = lane.hidden.last() {
            if next.ctime > now {
                break;
            }
            let pending = *next;
            lane.hidden.pop();
            lane.seen += 1;

            let pool = &mut pools[pending.task.pool];
            pool.jobs[pending.task.job].share_mut(kind).add_demand(1);
            pool.share_mut(kind).add_demand(1);
            changed.insert(pending.task.pool);

            lane.push_ready(pending);
        }
        changed
    }

    /// Picks the next task to admit and grants it a slot at job and pool level.
    pub fn pop(&mut self, kind: TaskType, pools: &mut [Pool]) -> Option<TaskRef> {
        let lane = &mut self.lanes[kind.index()];

        let pool_index = lane
            .ready
            .iter()
            .enumerate()
            .filter(|(_, queues)| !queues.is_empty())
            .map(|(p, _)| p)
            .min_by(|&a, &b| {
                cmp_used_share(pools[a].share(kind), pools[b].share(kind)).then(a.cmp(&b))
            })?;

        let pool = &mut pools[pool_index];
        let queues = &mut lane.ready[pool_index];
        let jobs = &pool.jobs;
        let job_index = match pool.sched {
            SchedMode::Fair => queues.keys().copied().min_by(|&a, &b| {
                cmp_used_share(jobs[a].share(kind), jobs[b].share(kind)).then(a.cmp(&b))
            }),
            SchedMode::Fcfs => queues
                .keys()
                .copied()
                .min_by(|&a, &b| jobs[a].ctime.total_cmp(&jobs[b].ctime).then(a.cmp(&b))),
        }?;

        let heap = queues.get_mut(&job_index)?;
        let Reverse(pending) = heap.pop()?;
        if heap.is_empty() {
            queues.remove(&job_index);
        }
        lane.eligible -= 1;
        lane.popped += 1;

        pool.jobs[job_index].share_mut(kind).grant();
        pool.share_mut(kind).grant();
        Some(pending.task)
    }

    /// Puts a preempted task back among the visible ones, keeping its creation time.
    ///
    /// The caller has already withdrawn the slot, the request is added back here.
    pub fn add_preempted(&mut self, task: TaskRef, pools: &mut [Pool]) {
        let ctime = task.task(pools).ctime;
        let pool = &mut pools[task.pool];
        pool.jobs[task.job].share_mut(task.kind).add_demand(1);
        pool.share_mut(task.kind).add_demand(1);

        let lane = &mut self.lanes[task.kind.index()];
        lane.popped = lane.popped.saturating_sub(1);
        lane.push_ready(PendingTask { ctime, task });
    }

    /// True while tasks of `kind` are hidden or waiting for a slot.
    pub fn has(&self, kind: TaskType) -> bool {
        let lane = self.lane(kind);
        !lane.hidden.is_empty() || lane.eligible > 0
    }

    pub fn has_task(&self) -> bool {
        TaskType::ALL.iter().any(|&kind| self.has(kind))
    }

    /// Earliest creation time among hidden tasks.
    pub fn min_ctime(&self, kind: TaskType) -> Option<f64> {
        self.lane(kind).hidden.last().map(|p| p.ctime)
    }

    /// Time for the next creation event of `kind`, `None` when nothing is left.
    pub fn next_creation_time(&self, kind: TaskType, now: f64) -> Option<f64> {
        if self.lane(kind).eligible > 0 {
            Some(now)
        } else {
            self.min_ctime(kind).map(|ctime| ctime.max(now))
        }
    }

    pub fn popped(&self, kind: TaskType) -> usize {
        self.lane(kind).popped
    }

    pub fn seen(&self, kind: TaskType) -> usize {
        self.lane(kind).seen
    }

    /// Tasks still hidden.
    pub fn left(&self, kind: TaskType) -> usize {
        self.lane(kind).hidden.len()
    }

    /// Visible tasks waiting for a slot.
    pub fn eligible(&self, kind: TaskType) -> usize {
        self.lane(kind).eligible
    }

    pub fn progress(&self, kind: TaskType) -> f64 {
        let total = self.popped(kind) + self.left(kind);
        if total == 0 {
            1.
        } else {
            self.popped(kind) as f64 / total as f64
        }
    }

    pub fn maps_popped(&self) -> usize {
        self.popped(TaskType::Map)
    }

    pub fn maps_seen(&self) -> usize {
        self.seen(TaskType::Map)
    }

    pub fn maps_left(&self) -> usize {
        self.left(TaskType::Map)
    }

    pub fn reduces_popped(&self) -> usize {
        self.popped(TaskType::Reduce)
    }

    pub fn reduces_seen(&self) -> usize {
        self.seen(TaskType::Reduce)
    }

    pub fn reduces_left(&self) -> usize {
        self.left(TaskType::Reduce)
    }

    pub fn has_map(&self) -> bool {
        self.has(TaskType::Map)
    }

    pub fn has_reduce(&self) -> bool {
        self.has(TaskType::Reduce)
    }

    pub fn map_min_ctime(&self) -> Option<f64> {
        self.min_ctime(TaskType::Map)
    }

    pub fn reduce_min_ctime(&self) -> Option<f64> {
        self.min_ctime(TaskType::Reduce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{job::Job, task::Task};

    fn job(name: &str, ctime: f64, weight: f64, maps: &[f64]) -> Job {
        let mut job = Job::new(name, ctime, weight);
        for (i, &ctime) in maps.iter().enumerate() {
            let id = Task::id_from_str(&format!("{}_m_{}", name, i));
            job.add_task(Task::new(id, TaskType::Map, ctime, 1.));
        }
        job
    }

    fn drain(selector: &mut Selector, pools: &mut [Pool]) -> Vec<TaskRef> {
        let mut order = Vec::new();
        while let Some(task) = selector.pop(TaskType::Map, pools) {
            order.push(task);
        }
        order
    }

    #[test]
    fn hides_tasks_until_created() {
        let mut pool = Pool::new("p", -1., -1., 1., 0, 0, SchedMode::Fair);
        pool.add_job(job("j", 0., 1., &[0., 2., 5.]));
        let mut pools = vec![pool];
        let mut selector = Selector::new(&pools);

        assert_eq!(selector.map_min_ctime(), Some(0.));
        assert!(!selector.has_reduce());
        let changed = selector.see(TaskType::Map, 2., &mut pools);
        assert_eq!(changed.into_iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(selector.maps_seen(), 2);
        assert_eq!(selector.maps_left(), 1);
        assert_eq!(pools[0].map_share.demand, 2);
        assert_eq!(pools[0].jobs[0].map_share.demand, 2);
        assert_eq!(selector.next_creation_time(TaskType::Map, 2.), Some(2.));

        assert_eq!(drain(&mut selector, &mut pools).len(), 2);
        assert_eq!(selector.next_creation_time(TaskType::Map, 2.), Some(5.));
        assert_eq!(pools[0].map_share.alloc, 2);
        assert!((selector.progress(TaskType::Map) - 2. / 3.).abs() < 1e-12);
    }

    #[test]
    fn fcfs_admits_jobs_in_creation_order() {
        let mut pool = Pool::new("p", -1., -1., 1., 0, 0, SchedMode::Fcfs);
        pool.add_job(job("late", 1., 10., &[1., 1.]));
        pool.add_job(job("early", 0., 0.5, &[0., 0., 0.]));
        let mut pools = vec![pool];
        let mut selector = Selector::new(&pools);
        selector.see(TaskType::Map, 1., &mut pools);

        let jobs: Vec<usize> = drain(&mut selector, &mut pools)
            .iter()
            .map(|t| t.job)
            .collect();
        assert_eq!(jobs, vec![1, 1, 1, 0, 0]);
    }

    #[test]
    fn fair_mode_alternates_between_equal_jobs() {
        let mut pool = Pool::new("p", -1., -1., 1., 0, 0, SchedMode::Fair);
        pool.add_job(job("a", 0., 1., &[0., 0.]));
        pool.add_job(job("b", 0., 1., &[0., 0.]));
        let mut pools = vec![pool];
        let mut selector = Selector::new(&pools);
        selector.see(TaskType::Map, 0., &mut pools);

        let order = drain(&mut selector, &mut pools);
        assert_ne!(order[0].job, order[1].job);
        assert_ne!(order[2].job, order[3].job);
    }

    #[test]
    fn pools_with_lower_used_share_go_first() {
        let mut heavy = Pool::new("heavy", -1., -1., 3., 0, 0, SchedMode::Fair);
        heavy.add_job(job("h", 0., 1., &[0., 0., 0., 0.]));
        let mut light = Pool::new("light", -1., -1., 1., 0, 0, SchedMode::Fair);
        light.add_job(job("l", 0., 1., &[0., 0., 0., 0.]));
        let mut pools = vec![heavy, light];
        let mut selector = Selector::new(&pools);
        selector.see(TaskType::Map, 0., &mut pools);

        for _ in 0..4 {
            selector.pop(TaskType::Map, &mut pools);
        }
        // alloc / weight stays balanced: 3 / 3 against 1 / 1
        assert_eq!(pools[0].map_share.alloc, 3);
        assert_eq!(pools[1].map_share.alloc, 1);
    }

    #[test]
    fn preempted_tasks_compete_again() {
        let mut pool = Pool::new("p", -1., -1., 1., 0, 0, SchedMode::Fair);
        pool.add_job(job("j", 0., 1., &[0., 3.]));
        let mut pools = vec![pool];
        let mut selector = Selector::new(&pools);
        selector.see(TaskType::Map, 3., &mut pools);

        let first = selector.pop(TaskType::Map, &mut pools).unwrap();
        assert_eq!(first.index, 0);
        pools[0].jobs[0].map_share.withdraw();
        pools[0].map_share.withdraw();
        selector.add_preempted(first, &mut pools);

        assert_eq!(selector.maps_popped(), 0);
        assert_eq!(pools[0].map_share.demand, 2);
        assert_eq!(pools[0].map_share.alloc, 0);
        assert_eq!(selector.pop(TaskType::Map, &mut pools), Some(first));
    }
}
