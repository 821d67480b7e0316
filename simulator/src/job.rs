use serde::Serialize;

use crate::{
    fair_share::FairShareContext,
    task::{hash_str, Task, TaskType},
};

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: u64,
    pub name: String,
    pub ctime: f64,
    /// Latest task finish time, -1 until a task finishes.
    pub ftime: f64,
    pub map_share: FairShareContext,
    pub reduce_share: FairShareContext,
    pub map_tasks: Vec<Task>,
    pub reduce_tasks: Vec<Task>,
}

impl Job {
    pub fn new(name: &str, ctime: f64, weight: f64) -> Self {
        let id = Job::id_from_str(name);
        Job {
            id,
            name: name.to_string(),
            ctime,
            ftime: -1.,
            map_share: FairShareContext::new(weight, 0., 0, id),
            reduce_share: FairShareContext::new(weight, 0., 0, id),
            map_tasks: Vec::new(),
            reduce_tasks: Vec::new(),
        }
    }

    pub fn id_from_str(name: &str) -> u64 {
        hash_str(name, 0xfeedbeefdeedbeef)
    }

    pub fn add_task(&mut self, task: Task) {
        self.tasks_mut(task.kind).push(task);
    }

    pub fn tasks(&self, kind: TaskType) -> &Vec<Task> {
        match kind {
            TaskType::Map => &self.map_tasks,
            TaskType::Reduce => &self.reduce_tasks,
        }
    }

    pub fn tasks_mut(&mut self, kind: TaskType) -> &mut Vec<Task> {
        match kind {
            TaskType::Map => &mut self.map_tasks,
            TaskType::Reduce => &mut self.reduce_tasks,
        }
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

    pub fn task_count(&self) -> usize {
        self.map_tasks.len() + self.reduce_tasks.len()
    }

    pub fn weight(&self) -> f64 {
        self.map_share.weight
    }

    /// Time from creation to the last task finish, if the job has finished anything.
    pub fn latency(&self) -> Option<f64> {
        if self.ftime < 0. {
            None
        } else {
            Some(self.ftime - self.ctime)
        }
    }

    pub(crate) fn reset(&mut self) {
        self.ftime = -1.;
        self.map_share.reset();
        self.reduce_share.reset();
        self.map_tasks.iter_mut().for_each(Task::reset);
        self.reduce_tasks.iter_mut().for_each(Task::reset);
    }
}
