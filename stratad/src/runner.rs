use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use strata::brain::Brain;
use strata::config::BrainConfig;
use strata::experiments::env_grid::{Grid1D, GridConfig};
use strata::observer::BrainAdapter;

use crate::error::RunnerError;
use crate::paths::AppPaths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub brain: BrainConfig,
    // Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
    // 0 runs until Ctrl-C.
    pub max_steps: u64,
    pub status_interval: u64,

    pub grid_size: usize,
    pub grid_target: usize,
    pub jump_rate: f32,
    pub world_seed: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let grid = GridConfig::default();
        Self {
            brain: BrainConfig::default(),
            data_dir: None,
            max_steps: 100_000,
            status_interval: 10_000,
            grid_size: grid.size,
            grid_target: grid.target,
            jump_rate: grid.jump_rate,
            world_seed: grid.seed,
        }
    }
}

impl RunnerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, RunnerError> {
        let text = std::fs::read_to_string(path).map_err(|source| RunnerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| RunnerError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn grid(&self) -> GridConfig {
        GridConfig {
            size: self.grid_size,
            target: self.grid_target,
            jump_rate: self.jump_rate,
            seed: self.world_seed,
            ..GridConfig::default()
        }
    }

    /// Brain settings fitted to `world`, rooted in the data directory unless
    /// the brain config names its own `log_dir`.
    pub fn brain_config(&self, world: &Grid1D, paths: &AppPaths) -> Result<BrainConfig, RunnerError> {
        let mut cfg = self.brain.clone();
        if cfg.num_sensors != 0 && cfg.num_sensors != world.num_sensors() {
            warn!(
                "config asks for {} sensors but the grid has {}; using the grid",
                cfg.num_sensors,
                world.num_sensors()
            );
        }
        cfg.num_sensors = world.num_sensors();
        cfg.num_actions = world.num_actions();
        // An explicit `brain.log_dir` wins over the data directory.
        if cfg.log_dir == BrainConfig::default().log_dir {
            cfg.log_dir = paths.data_dir().to_path_buf();
            if cfg.checkpoint_path.is_none() {
                cfg.checkpoint_path = Some(paths.checkpoint_file(&cfg.name));
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    pub timestep: u64,
    pub world_average_reward: f32,
    pub interrupted: bool,
}

/// Step `brain` through `world` until `max_steps` or `stop` is raised.
pub fn run_loop(
    brain: &mut Brain,
    world: &mut Grid1D,
    max_steps: u64,
    status_interval: u64,
    stop: &AtomicBool,
) -> RunSummary {
    let mut reward = world.reward();
    let mut steps = 0u64;
    let mut interrupted = false;

    while max_steps == 0 || steps < max_steps {
        if stop.load(Ordering::Relaxed) {
            interrupted = true;
            break;
        }
        let actions = brain.sense_act_learn(&world.sensors(), reward);
        reward = world.step(&actions);
        steps += 1;

        if status_interval > 0 && steps % status_interval == 0 {
            info!("{}", BrainAdapter::new(&*brain).status_line());
        }
    }

    RunSummary {
        steps,
        timestep: brain.timestep(),
        world_average_reward: world.average_reward(),
        interrupted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> RunnerConfig {
        RunnerConfig {
            max_steps: 300,
            status_interval: 100,
            jump_rate: 0.0,
            ..RunnerConfig::default()
        }
    }

    #[test]
    fn partial_json_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runner.json");
        std::fs::write(&path, r#"{ "max_steps": 42, "brain": { "name": "grid" } }"#).unwrap();

        let cfg = RunnerConfig::from_json_file(&path).unwrap();
        assert_eq!(cfg.max_steps, 42);
        assert_eq!(cfg.brain.name, "grid");
        assert_eq!(cfg.grid_size, GridConfig::default().size);
    }

    #[test]
    fn bad_json_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runner.json");
        std::fs::write(&path, "{ max_steps: ").unwrap();
        assert!(matches!(
            RunnerConfig::from_json_file(&path),
            Err(RunnerError::Parse { .. })
        ));
    }

    #[test]
    fn brain_config_follows_the_world() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(Some(tmp.path())).unwrap();
        let cfg = small_config();
        let world = Grid1D::new(cfg.grid());
        let brain_cfg = cfg.brain_config(&world, &paths).unwrap();
        assert_eq!(brain_cfg.num_sensors, 9);
        assert_eq!(brain_cfg.num_actions, 2);
        assert_eq!(brain_cfg.log_dir, tmp.path());
        assert_eq!(
            brain_cfg.resolved_checkpoint_path(),
            tmp.path().join("test_brain.ckpt")
        );
    }

    #[test]
    fn explicit_log_dir_is_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(Some(&tmp.path().join("data"))).unwrap();
        let own = tmp.path().join("own_logs");
        let mut cfg = small_config();
        cfg.brain.log_dir = own.clone();
        let world = Grid1D::new(cfg.grid());

        let brain_cfg = cfg.brain_config(&world, &paths).unwrap();
        assert_eq!(brain_cfg.log_dir, own);
        assert_eq!(brain_cfg.resolved_checkpoint_path(), own.join("test_brain.ckpt"));
    }

    #[test]
    fn oversized_stack_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(Some(tmp.path())).unwrap();
        let path = tmp.path().join("runner.json");
        std::fs::write(&path, r#"{ "brain": { "num_levels": 64 } }"#).unwrap();

        let cfg = RunnerConfig::from_json_file(&path).unwrap();
        let world = Grid1D::new(cfg.grid());
        assert!(matches!(
            cfg.brain_config(&world, &paths),
            Err(RunnerError::Config(_))
        ));
    }

    #[test]
    fn loop_stops_at_max_steps_or_on_request() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::new(Some(tmp.path())).unwrap();
        let cfg = small_config();
        let mut world = Grid1D::new(cfg.grid());
        let mut brain = Brain::new(cfg.brain_config(&world, &paths).unwrap());

        let stop = AtomicBool::new(false);
        let summary = run_loop(&mut brain, &mut world, cfg.max_steps, cfg.status_interval, &stop);
        assert_eq!(summary.steps, 300);
        assert_eq!(summary.timestep, 300);
        assert!(!summary.interrupted);

        stop.store(true, Ordering::Relaxed);
        let summary = run_loop(&mut brain, &mut world, 0, 0, &stop);
        assert_eq!(summary.steps, 0);
        assert_eq!(summary.timestep, 300);
        assert!(summary.interrupted);
    }
}
