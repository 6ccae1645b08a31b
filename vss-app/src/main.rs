mod app;
mod cli;
mod logging;
mod simulate;

use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;
use vss_experiment::ExperimentConfig;

pub use app::App;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    logging::init_tracing(&args.log_level)?;

    let config = ExperimentConfig::load_or_default(&args.config)?;
    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    info!(
        platform = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        n_down = config.staircase.n_down,
        update_hz = config.timing.effective_update_hz(),
        "starting"
    );

    if args.simulate {
        let report = simulate::run(&args, config, rng)?;
        if let Some(path) = &args.results {
            report.write_json(path)?;
        }
        return Ok(());
    }

    let app = App::new(config, rng, args.results.clone())?;
    app.run()?;

    Ok(())
}
