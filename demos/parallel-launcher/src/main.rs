use std::io::Write;

use env_logger::Builder;

use fairsim::{
    config::sim_config::SimulationConfig, parallel_launcher::ParallelSimulationsLauncher,
    FairSchedulerSimulation, Result,
};

fn main() -> Result<()> {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let mut launcher = ParallelSimulationsLauncher::default();
    for path in ["configs/config.yaml", "configs/config_fcfs.yaml"] {
        let config = SimulationConfig::from_file(path)?;
        launcher.add_simulation(FairSchedulerSimulation::new(config)?)?;
    }

    for (i, result) in launcher.run_simulations().into_iter().enumerate() {
        match result {
            Ok(summary) => println!(
                "simulation {}: finished at {}, {} preemptions, map utilization {:.3}",
                i,
                summary.finished_at,
                summary.stats.preempted[0] + summary.stats.preempted[1],
                summary.map_utilization
            ),
            Err(e) => println!("simulation {} failed: {}", i, e),
        }
    }
    Ok(())
}
