use std::collections::HashSet;

use crate::{
    error::{Result, SimError},
    simulation::{FairSchedulerSimulation, SimulationSummary},
};

/// Runs independent simulations on their own threads.
#[derive(Default)]
pub struct ParallelSimulationsLauncher {
    pub simulations: Vec<FairSchedulerSimulation>,
    pub output_paths: HashSet<String>,
}

impl ParallelSimulationsLauncher {
    pub fn add_simulation(&mut self, simulation: FairSchedulerSimulation) -> Result<()> {
        let paths = simulation.output_paths();
        if let Some(path) = paths.iter().find(|p| self.output_paths.contains(*p)) {
            return Err(SimError::Config(format!(
                "output path {} is already in use",
                path
            )));
        }
        self.output_paths.extend(paths);
        self.simulations.push(simulation);
        Ok(())
    }

    /// Summaries come back in the order simulations were added.
    pub fn run_simulations(self) -> Vec<Result<SimulationSummary>> {
        let mut threads = Vec::new();
        for mut simulation in self.simulations.into_iter() {
            threads.push(std::thread::spawn(move || simulation.run()));
        }

        threads
            .into_iter()
            .enumerate()
            .map(|(i, thread)| {
                thread
                    .join()
                    .unwrap_or_else(|_| Err(SimError::Config(format!("simulation {} panicked", i))))
            })
            .collect()
    }
}
