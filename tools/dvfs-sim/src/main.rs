use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use env_logger::Builder;
use serde::Serialize;

use dslab_dvfs::simulation::SimulationSummary;
use dslab_dvfs::stats::Stats;
use dslab_dvfs::{Simulation, SimulationConfig};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Replays a query trace on DVFS-managed devices
struct Args {
    /// Path to YAML file with simulation configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Path to produced JSON file with simulation results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Governor to use instead of the configured one, e.g. PERF or CONS[period=500]
    #[arg(short, long)]
    governor: Option<String>,
}

#[derive(Serialize)]
struct Results<'a> {
    summary: SimulationSummary,
    stats: Vec<&'a Stats>,
}

fn main() -> std::io::Result<()> {
    Builder::from_default_env().init();
    let args = Args::parse();

    let mut config = SimulationConfig::from_file(args.config.to_str().unwrap());
    if let Some(governor) = args.governor {
        config.governor = governor;
    }

    let mut sim = match Simulation::from_config(&config) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("Can't set up simulation: {}", e);
            std::process::exit(1);
        }
    };
    let summary = sim.run();
    println!("{}", serde_json::to_string_pretty(&summary).unwrap());

    let results = Results {
        summary,
        stats: sim.devices().iter().map(|d| d.stats()).collect(),
    };
    std::fs::File::create(args.output.unwrap_or_else(|| {
        args.config
            .with_file_name([args.config.file_stem().unwrap().to_str().unwrap(), "-results"].concat())
            .with_extension("json")
    }))?
    .write_all(serde_json::to_string_pretty(&results).unwrap().as_bytes())
}
