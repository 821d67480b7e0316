use std::io::Write;

use env_logger::Builder;

use fairsim::{config::sim_config::SimulationConfig, FairSchedulerSimulation, Result};

fn main() -> Result<()> {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let config = SimulationConfig::from_file("configs/config.yaml")?;
    // let config = SimulationConfig::from_file("configs/config_with_trace.yaml")?;

    let mut simulation = FairSchedulerSimulation::new(config)?;
    let summary = simulation.run()?;

    for pool in simulation.engine().pools() {
        for job in &pool.jobs {
            if let Some(latency) = job.latency() {
                println!("{} {} latency {}", pool.name, job.name, latency);
            }
        }
    }
    println!(
        "map utilization {:.3}, reduce utilization {:.3}",
        summary.map_utilization, summary.reduce_utilization
    );
    Ok(())
}
