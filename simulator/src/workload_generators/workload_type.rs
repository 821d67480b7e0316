//! Workload source types.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    config::sim_config::ClusterWorkloadConfig,
    error::{Result, SimError},
};

use super::{
    generator::WorkloadGenerator,
    random::SyntheticWorkload,
    trace_reader::{TraceFormat, TraceReader},
};

/// Holds supported workload sources.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy)]
pub enum WorkloadType {
    /// Observed schedule with start and finish times.
    Trace,
    /// Tasks with processing times.
    Load,
    /// Exported simulated schedule.
    Schedule,
    /// Generated jobs.
    Synthetic,
}

impl FromStr for WorkloadType {
    type Err = SimError;

    fn from_str(input: &str) -> Result<WorkloadType> {
        match input.to_lowercase().as_str() {
            "trace" => Ok(WorkloadType::Trace),
            "load" => Ok(WorkloadType::Load),
            "schedule" => Ok(WorkloadType::Schedule),
            "synthetic" | "random" => Ok(WorkloadType::Synthetic),
            _ => Err(SimError::Config(format!(
                "cannot parse workload type `{}`",
                input
            ))),
        }
    }
}

pub fn workload_resolver(config: &ClusterWorkloadConfig) -> Result<Box<dyn WorkloadGenerator>> {
    let workload_type: WorkloadType = config.r#type.parse()?;
    let options = config.options.as_ref().ok_or_else(|| {
        SimError::Config(format!("{} workload options are required", config.r#type))
    })?;

    Ok(match workload_type {
        WorkloadType::Trace => Box::new(TraceReader::from_options(options, TraceFormat::Trace)?),
        WorkloadType::Load => Box::new(TraceReader::from_options(options, TraceFormat::Load)?),
        WorkloadType::Schedule => {
            Box::new(TraceReader::from_options(options, TraceFormat::Schedule)?)
        }
        WorkloadType::Synthetic => Box::new(SyntheticWorkload::from_options(options)?),
    })
}
