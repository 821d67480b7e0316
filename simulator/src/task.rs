use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::{job::Job, pool::Pool};

/// Times below this distance are considered equal.
pub const TIME_EPSILON: f64 = 1e-9;

pub fn time_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < TIME_EPSILON
}

/// Stable 64-bit identifier of an external string id.
pub(crate) fn hash_str(value: &str, seed: u64) -> u64 {
    let mut hasher = FxHasher::default();
    seed.hash(&mut hasher);
    value.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Map,
    Reduce,
}

impl TaskType {
    pub const ALL: [TaskType; 2] = [TaskType::Map, TaskType::Reduce];

    pub fn index(self) -> usize {
        match self {
            TaskType::Map => 0,
            TaskType::Reduce => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskType::Map => "map",
            TaskType::Reduce => "reduce",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Map => write!(f, "MAP"),
            TaskType::Reduce => write!(f, "REDUCE"),
        }
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(input: &str) -> Result<TaskType, Self::Err> {
        match input.to_uppercase().as_str() {
            "MAP" => Ok(TaskType::Map),
            "REDUCE" => Ok(TaskType::Reduce),
            _ => Err(format!("unknown task type `{}`", input)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: u64,
    /// Name from the workload, empty for tasks built in code.
    pub name: String,
    pub kind: TaskType,
    pub ctime: f64,
    pub ptime: f64,
    /// -1 until admitted
    pub stime: f64,
    /// -1 until finished
    pub ftime: f64,
    pub flags: u32,
    /// Number of admissions, including re-admissions after preemption.
    pub attempts: u32,
}

impl Task {
    pub const FLAG_PREEMPTED: u32 = 1;

    pub fn new(id: u64, kind: TaskType, ctime: f64, ptime: f64) -> Self {
        Task {
            id,
            name: String::new(),
            kind,
            ctime,
            ptime,
            stime: -1.,
            ftime: -1.,
            flags: 0,
            attempts: 0,
        }
    }

    pub fn id_from_str(name: &str) -> u64 {
        hash_str(name, 0xdeedbeefdeedbeef)
    }

    /// Task with its id derived from `name`.
    pub fn named(name: &str, kind: TaskType, ctime: f64, ptime: f64) -> Self {
        let mut task = Task::new(Task::id_from_str(name), kind, ctime, ptime);
        task.name = name.to_string();
        task
    }

    /// Workload name, or the hex id when the task has none.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            format!("{:016x}", self.id)
        } else {
            self.name.clone()
        }
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    pub fn test_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn clear_flags(&mut self) {
        self.flags = 0;
    }

    pub fn is_preempted(&self) -> bool {
        self.test_flag(Task::FLAG_PREEMPTED)
    }

    pub fn is_finished(&self) -> bool {
        self.ftime >= 0.
    }

    pub(crate) fn reset(&mut self) {
        self.stime = -1.;
        self.ftime = -1.;
        self.flags = 0;
        self.attempts = 0;
    }
}

/// Identity of a task inside the pool collection of an engine.
///
/// Handles are plain indices, so equality and hashing are structural and
/// any number of owners (events, running sets, selector queues) may hold one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskRef {
    pub pool: usize,
    pub job: usize,
    pub kind: TaskType,
    pub index: usize,
}

impl TaskRef {
    pub fn new(pool: usize, job: usize, kind: TaskType, index: usize) -> Self {
        TaskRef {
            pool,
            job,
            kind,
            index,
        }
    }

    pub fn task<'a>(&self, pools: &'a [Pool]) -> &'a Task {
        &pools[self.pool].jobs[self.job].tasks(self.kind)[self.index]
    }

    pub fn task_mut<'a>(&self, pools: &'a mut [Pool]) -> &'a mut Task {
        &mut pools[self.pool].jobs[self.job].tasks_mut(self.kind)[self.index]
    }

    pub fn job<'a>(&self, pools: &'a [Pool]) -> &'a Job {
        &pools[self.pool].jobs[self.job]
    }
}
