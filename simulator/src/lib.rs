#![doc = include_str!("../readme.md")]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fair_share;
pub mod job;
pub mod monitoring;
pub mod parallel_launcher;
pub mod pool;
pub mod selector;
pub mod semaphore;
pub mod simulation;
pub mod task;
pub mod tuning;
pub mod utilization;
pub mod workload_generators;

pub use engine::Engine;
pub use error::{Result, SimError};
pub use job::Job;
pub use monitoring::{MetricsSink, Monitoring};
pub use pool::{Pool, PoolId, SchedMode};
pub use simulation::{FairSchedulerSimulation, SimulationSummary};
pub use task::{Task, TaskRef, TaskType};
pub use workload_generators::generator::WorkloadGenerator;
