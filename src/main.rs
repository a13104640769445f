use std::env;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{LevelFilter, debug, error, info};

use beast_pipelines::cli::parse;
use beast_pipelines::config::defs::{format_duration, MemorySize, RunParameters};
use beast_pipelines::pipelines::beast_analysis;
use beast_pipelines::utils::file::validate_inputs;
use beast_pipelines::utils::system::{check_ceilings, default_max_forks, detect_cores_and_load, detect_ram, resolve_seed};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n BEAST Pipelines\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}\n", dir);

    // Nothing is scheduled until both inputs are known to exist.
    let inputs = match validate_inputs(args.input.as_deref(), args.template.as_deref(), &dir) {
        Ok(inputs) => inputs,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!("Alignment: {}", inputs.alignment.display());
    info!("Template: {}", inputs.template.display());

    let (physical_cores, usable_cores, cpu_load) = detect_cores_and_load(args.max_cpus).await?;
    debug!("Detected {} physical cores; CPU load {}%; {} usable", physical_cores, cpu_load, usable_cores);

    let (total_ram, available_ram) = detect_ram()?;
    debug!("Available RAM: {} (~{})", available_ram, MemorySize::from_bytes(available_ram));
    debug!("Total RAM: {} (~{})", total_ram, MemorySize::from_bytes(total_ram));

    check_ceilings(args.max_cpus, args.max_memory, physical_cores, total_ram);

    let seed = resolve_seed(args.seed);
    let max_forks = default_max_forks(args.max_forks, usable_cores);
    debug!("Seed {}; up to {} tasks at once", seed, max_forks);

    let params = match RunParameters::from_args(&args, &dir, seed, max_forks) {
        Ok(params) => Arc::new(params),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    match beast_analysis::run(params.clone(), inputs).await {
        Ok(summary) => {
            info!("All {} tasks completed", summary.records.len());
        }
        Err(e) => {
            error!("Pipeline failed: {} at {}.", e, format_duration(run_start.elapsed()));
            std::process::exit(1);
        }
    }

    println!("Run complete: {}. Results in {}", format_duration(run_start.elapsed()), params.out_dir.display());
    Ok(())
}
