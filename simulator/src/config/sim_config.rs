use std::{fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SimError},
    pool::SchedMode,
    tuning::Objective,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub total_maps: u32,
    pub total_reduces: u32,
    pub start_time: Option<f64>,
}

/// Pool section as written in the file, every field is checked by [`PoolSettings::resolve`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSettings {
    pub name: Option<String>,
    pub sched_mode: Option<String>,
    pub min_share_timeout: Option<f64>,
    pub fair_share_timeout: Option<f64>,
    pub weight: Option<f64>,
    pub map_min_share: Option<u32>,
    pub reduce_min_share: Option<u32>,
    pub objective: Option<String>,
    pub slack: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub name: String,
    pub sched: SchedMode,
    pub ms_timeout: f64,
    pub hf_timeout: f64,
    pub weight: f64,
    pub min_map: u32,
    pub min_reduce: u32,
    pub objective: Objective,
}

fn required<T: Clone>(value: &Option<T>, index: usize, field: &'static str) -> Result<T> {
    value
        .clone()
        .ok_or(SimError::MissingPoolField { index, field })
}

impl PoolSettings {
    pub fn resolve(&self, index: usize) -> Result<PoolConfig> {
        let name = required(&self.name, index, "name")?;
        let mode = required(&self.sched_mode, index, "sched_mode")?;
        let sched = mode.parse().map_err(|_| SimError::UnknownSchedMode {
            pool: name.clone(),
            mode: mode.clone(),
        })?;
        let objective = match &self.objective {
            Some(objective) => Objective::parse(objective, self.slack)
                .map_err(|reason| SimError::Config(format!("pool {}: {}", index, reason)))?,
            None => Objective::Ignore,
        };

        Ok(PoolConfig {
            sched,
            ms_timeout: required(&self.min_share_timeout, index, "min_share_timeout")?,
            hf_timeout: required(&self.fair_share_timeout, index, "fair_share_timeout")?,
            weight: required(&self.weight, index, "weight")?,
            min_map: required(&self.map_min_share, index, "map_min_share")?,
            min_reduce: required(&self.reduce_min_share, index, "reduce_min_share")?,
            objective,
            name,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterWorkloadConfig {
    pub r#type: String,
    pub options: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub path: String,
    pub window: Option<usize>,
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Simulated schedule, one line per task.
    pub schedule: Option<String>,
    /// Loaded against simulated times, one line per task.
    pub comparison: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub cluster: ClusterConfig,
    pub pools: Vec<PoolSettings>,
    pub workload: Option<Vec<ClusterWorkloadConfig>>,
    pub monitoring: Option<MonitoringConfig>,
    pub output: Option<OutputConfig>,
}

impl SimulationConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        fs::read_to_string(path)?.parse()
    }

    /// Pool settings with every required field present and checked.
    ///
    /// Pool names must be unique, jobs are routed by name.
    pub fn resolved_pools(&self) -> Result<Vec<PoolConfig>> {
        let mut pools: Vec<PoolConfig> = Vec::with_capacity(self.pools.len());
        for (index, settings) in self.pools.iter().enumerate() {
            let pool = settings.resolve(index)?;
            if let Some(first) = pools.iter().position(|p| p.name == pool.name) {
                return Err(SimError::Config(format!(
                    "pool {} repeats the name {} of pool {}",
                    index, pool.name, first
                )));
            }
            pools.push(pool);
        }
        Ok(pools)
    }
}

impl FromStr for SimulationConfig {
    type Err = SimError;

    fn from_str(data: &str) -> Result<Self> {
        let config: SimulationConfig = serde_yaml::from_str(data)?;
        if config.cluster.total_maps == 0 && config.cluster.total_reduces == 0 {
            return Err(SimError::Config("cluster has no slots".to_string()));
        }
        Ok(config)
    }
}
