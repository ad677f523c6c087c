use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use strata::brain::Brain;
use strata::experiments::env_grid::Grid1D;

mod error;
mod paths;
mod runner;

use error::RunnerError;
use paths::AppPaths;
use runner::{run_loop, RunnerConfig};

#[tokio::main]
async fn main() -> Result<(), RunnerError> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            info!("loading runner config from {:?}", path);
            RunnerConfig::from_json_file(&path)?
        }
        None => RunnerConfig::default(),
    };

    let paths = AppPaths::new(config.data_dir.as_deref())?;
    info!("data directory: {:?}", paths.data_dir());

    let mut world = Grid1D::new(config.grid());
    let mut brain = Brain::new(config.brain_config(&world, &paths)?).restore();
    info!(
        "brain '{}' checkpoints to {:?}",
        brain.name(),
        brain.checkpoint().path()
    );
    if brain.timestep() == 0 {
        info!("Starting with fresh brain");
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; checkpointing and shutting down");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let max_steps = config.max_steps;
    let status_interval = config.status_interval;
    let loop_stop = Arc::clone(&stop);
    let (brain, summary) = tokio::task::spawn_blocking(move || {
        let summary = run_loop(&mut brain, &mut world, max_steps, status_interval, &loop_stop);
        (brain, summary)
    })
    .await?;

    if !brain.backup() {
        error!("final checkpoint failed; progress since the last backup is lost");
    }
    let average = brain.visualize();
    info!(
        "ran {} steps (brain age {}), world average reward {:.3}, lifetime average reward {:.3}{}",
        summary.steps,
        summary.timestep,
        summary.world_average_reward,
        average,
        if summary.interrupted { " (interrupted)" } else { "" }
    );
    Ok(())
}
