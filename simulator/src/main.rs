use std::io::Write;

use clap::Parser;
use env_logger::Builder;

use dslab_core::Simulation;
use dslab_elastic::{ElasticBatchSimulation, SimulationConfig};

#[derive(Parser)]
#[command(about = "Discrete-event simulator for elastic HPC batch systems")]
struct Args {
    /// Path to the configuration JSON
    config: String,

    /// Simulation seed
    #[arg(long, default_value_t = 123)]
    seed: u64,
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    let config = SimulationConfig::from_file(&args.config);
    let sim = Simulation::new(args.seed);

    let mut simulation = ElasticBatchSimulation::new(sim, config);
    simulation.run();
}
