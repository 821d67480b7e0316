use std::cmp::Ordering;

use log::{debug, info};

use crate::{
    engine::Engine,
    error::{Result, SimError},
    pool::PoolId,
    semaphore::Acquire,
    task::{time_eq, TaskRef, TaskType},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    CreateMap,
    CreateReduce,
    FinishMap { task: TaskRef, attempt: u32 },
    FinishReduce { task: TaskRef, attempt: u32 },
    PreemptMap { pool: PoolId },
    PreemptReduce { pool: PoolId },
}

impl Event {
    pub fn create(kind: TaskType) -> Self {
        match kind {
            TaskType::Map => Event::CreateMap,
            TaskType::Reduce => Event::CreateReduce,
        }
    }

    pub fn finish(task: TaskRef, attempt: u32) -> Self {
        match task.kind {
            TaskType::Map => Event::FinishMap { task, attempt },
            TaskType::Reduce => Event::FinishReduce { task, attempt },
        }
    }

    pub fn preempt(kind: TaskType, pool: PoolId) -> Self {
        match kind {
            TaskType::Map => Event::PreemptMap { pool },
            TaskType::Reduce => Event::PreemptReduce { pool },
        }
    }

    pub fn kind(&self) -> TaskType {
        match self {
            Event::CreateMap | Event::FinishMap { .. } | Event::PreemptMap { .. } => TaskType::Map,
            Event::CreateReduce | Event::FinishReduce { .. } | Event::PreemptReduce { .. } => {
                TaskType::Reduce
            }
        }
    }
}

/// An event together with its firing time.
///
/// Ordered for a max-heap so that the earliest time pops first; equal times
/// pop in insertion order.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledEvent {
    pub time: f64,
    pub seq: u64,
    pub event: Event,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Done,
    /// The event now waits inside a semaphore.
    Suspended,
}

impl Engine {
    pub(crate) fn handle(&mut self, ev: ScheduledEvent) -> Result<EventOutcome> {
        match ev.event {
            Event::CreateMap | Event::CreateReduce => self.on_create(ev),
            Event::FinishMap { task, attempt } | Event::FinishReduce { task, attempt } => {
                self.on_finish(ev.time, task, attempt)
            }
            Event::PreemptMap { pool } => self.on_preempt(ev.time, TaskType::Map, pool),
            Event::PreemptReduce { pool } => self.on_preempt(ev.time, TaskType::Reduce, pool),
        }
    }

    fn on_create(&mut self, ev: ScheduledEvent) -> Result<EventOutcome> {
        let kind = ev.event.kind();
        if ev.time > self.time_now {
            self.time_now = ev.time;
        }
        let now = self.time_now;
        debug!("@{} create {} executed", now, kind.name());

        let changed = self.selector.see(kind, now, &mut self.pools);
        self.update_fairshares(kind);
        for pool in changed {
            self.arm_checkpoints(pool, kind);
        }

        if let Acquire::Suspended = self.semaphores[kind.index()].try_acquire(ev) {
            debug!("@{} {} creation suspended due to lack of slot", now, kind.name());
            self.stats.suspensions += 1;
            return Ok(EventOutcome::Suspended);
        }

        let task = self.selector.pop(kind, &mut self.pools).ok_or_else(|| {
            SimError::invariant(now, format!("{} slot granted without an eligible task", kind.name()))
        })?;
        self.pools[task.pool].transit_s2n(kind);
        task.task_mut(&mut self.pools).clear_flags();
        self.run_task(task);

        match self.selector.next_creation_time(kind, now) {
            Some(time) => self.schedule(time, Event::create(kind)),
            None => {
                self.create_pending[kind.index()] = false;
                debug!("@{} no more {} creation", now, kind.name());
            }
        }
        Ok(EventOutcome::Done)
    }

    fn on_finish(&mut self, time: f64, task: TaskRef, attempt: u32) -> Result<EventOutcome> {
        let record = task.task(&self.pools);
        if time_eq(record.stime + record.ptime, time)
            && record.attempts == attempt
            && !record.is_preempted()
        {
            self.time_now = time;
            self.finish_task(task);
        }
        debug!("@{} finish {} executed", self.time_now, task.kind.name());
        Ok(EventOutcome::Done)
    }

    fn on_preempt(&mut self, time: f64, kind: TaskType, pool: PoolId) -> Result<EventOutcome> {
        if time > self.time_now {
            self.time_now = time;
        }
        let now = self.time_now;
        debug!("@{} preempt {} executed for pool {}", now, kind.name(), self.pools[pool].name);

        // drops stamps left behind by allocation changes since arming
        self.pools[pool].transit_s2n(kind);
        let ms = self.pools[pool].starved_for_min_share(kind, now)?;
        let hf = self.pools[pool].starved_for_half_fair_share(kind, now)?;

        if ms > hf {
            info!("@{} need to preempt {} {}s due to min share", now, ms, kind.name());
            self.preempt(kind, ms);
        } else if hf > 0 {
            info!("@{} need to preempt {} {}s due to half fair share", now, hf, kind.name());
            self.preempt(kind, hf);
        }
        Ok(EventOutcome::Done)
    }
}
