use std::time::Instant;

use log::info;
use serde::Serialize;

use crate::{
    config::sim_config::{OutputConfig, SimulationConfig},
    engine::{Engine, EngineStats},
    error::Result,
    monitoring::Monitoring,
    pool::Pool,
    task::TaskType,
    tuning::{Objective, TuningProblem},
    utilization::{pool_utilization, utilization},
    workload_generators::{
        generator::assign_jobs,
        trace_writer::{export_comparison_to_file, export_schedule_to_file},
        workload_type::workload_resolver,
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub elapsed: f64,
    pub finished_at: f64,
    pub stats: EngineStats,
    pub map_utilization: f64,
    pub reduce_utilization: f64,
}

/// Builds an engine from a configuration, loads its workloads and runs it.
pub struct FairSchedulerSimulation {
    engine: Engine,
    objectives: Vec<Objective>,
    output: OutputConfig,
    metrics_path: Option<String>,
}

impl FairSchedulerSimulation {
    pub fn new(config: SimulationConfig) -> Result<FairSchedulerSimulation> {
        let mut engine = Engine::new(
            config.cluster.total_maps,
            config.cluster.total_reduces,
            config.cluster.start_time.unwrap_or(0.),
        );

        let pools = config.resolved_pools()?;
        let mut objectives = Vec::with_capacity(pools.len());
        for pool in pools {
            engine.add_pool(
                &pool.name,
                pool.ms_timeout,
                pool.hf_timeout,
                pool.weight,
                pool.min_map,
                pool.min_reduce,
                pool.sched,
            );
            objectives.push(pool.objective);
        }
        engine.scale_minshares();
        info!("loaded settings for {} pools", objectives.len());

        let mut metrics_path = None;
        if let Some(monitoring_config) = &config.monitoring {
            engine.set_monitoring(Monitoring::from_config(monitoring_config)?);
            metrics_path = Some(monitoring_config.path.clone());
        }

        for workload in config.workload.iter().flatten() {
            let mut generator = workload_resolver(workload)?;
            let jobs = generator.get_workload()?;
            let count = assign_jobs(&mut engine, jobs)?;
            info!("loaded {} jobs from {} workload", count, workload.r#type);
        }

        Ok(FairSchedulerSimulation {
            engine,
            objectives,
            output: config.output.unwrap_or_default(),
            metrics_path,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Files written by this simulation.
    pub fn output_paths(&self) -> Vec<String> {
        self.metrics_path
            .iter()
            .chain(self.output.schedule.iter())
            .chain(self.output.comparison.iter())
            .cloned()
            .collect()
    }

    fn log_utilization(&self, pools: &[Pool], label: &str) {
        let map_slots = self.engine.total_slots(TaskType::Map);
        let reduce_slots = self.engine.total_slots(TaskType::Reduce);
        info!(
            "{} map effective utilization: {}",
            label,
            utilization(pools, TaskType::Map, map_slots)
        );
        info!(
            "{} reduce effective utilization: {}",
            label,
            utilization(pools, TaskType::Reduce, reduce_slots)
        );
        for pool in pools {
            info!(
                ">> pool {} map effective utilization: {}, reduce effective utilization: {}",
                pool.name,
                pool_utilization(pool, TaskType::Map, map_slots),
                pool_utilization(pool, TaskType::Reduce, reduce_slots)
            );
        }
    }

    pub fn run(&mut self) -> Result<SimulationSummary> {
        let loaded = self.engine.pools().to_vec();
        self.log_utilization(&loaded, "loaded");
        self.engine.reset_time();

        let t = Instant::now();

        println!("Simulation Started");

        self.engine.process()?;

        let elapsed = t.elapsed().as_secs_f64();
        let finished_at = self.engine.time_now();
        let stats = self.engine.stats().clone();

        println!("SIMULATION FINISHED IN: {:?}s", elapsed);
        println!("SIMULATION FINISHED AT: {}", finished_at);
        println!("Simulation speedup: {}", finished_at / elapsed);
        println!(
            "Processed tasks: {} maps, {} reduces, {} preemptions",
            stats.finished[0],
            stats.finished[1],
            stats.preempted[0] + stats.preempted[1]
        );
        println!(
            "Processed {} events: {}/s",
            stats.events,
            (stats.events as f64 / elapsed) as u64
        );

        self.log_utilization(self.engine.pools(), "simulated");

        if let Some(path) = &self.output.schedule {
            export_schedule_to_file(path, self.engine.pools())?;
            info!("saved schedule to {}", path);
        }
        if let Some(path) = &self.output.comparison {
            export_comparison_to_file(path, &loaded, self.engine.pools())?;
            info!("saved comparison to {}", path);
        }

        let pools = self.engine.pools();
        Ok(SimulationSummary {
            elapsed,
            finished_at,
            map_utilization: utilization(
                pools,
                TaskType::Map,
                self.engine.total_slots(TaskType::Map),
            ),
            reduce_utilization: utilization(
                pools,
                TaskType::Reduce,
                self.engine.total_slots(TaskType::Reduce),
            ),
            stats,
        })
    }

    /// Hands the loaded engine to parameter search, one objective per pool.
    pub fn into_tuning_problem(self) -> Result<TuningProblem> {
        TuningProblem::new(self.engine, self.objectives)
    }
}
