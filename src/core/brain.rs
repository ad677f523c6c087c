use tracing::{info, warn};

use crate::affect::{Affect, AffectTracker};
use crate::checkpoint::{CheckpointManager, CheckpointView, RestoredState};
use crate::config::BrainConfig;
use crate::hierarchy::{random_actions, HierarchyController};
use crate::level::{Level, LevelEngine};
use crate::prng::Prng;

/// A hierarchical learning agent: the one owner of all learned state.
///
/// Mutation contract:
/// - `timestep`, `satisfaction`, `actions`, `affect`, the levels and `rng`
///   change only inside [`Brain::sense_act_learn`];
/// - [`Brain::restore`] replaces all of them at once from a checkpoint;
/// - everything else reads.
pub struct Brain<L = Level, A = Affect> {
    config: BrainConfig,
    // Configured actions + 1 reserved "do nothing" action.
    num_actions: usize,

    timestep: u64,
    satisfaction: f32,
    // Full action vector (reserved slot included), echoed into level 0 next
    // step. The hierarchy keeps no copy.
    actions: Vec<f32>,

    affect: A,
    hierarchy: HierarchyController<L>,
    rng: Prng,

    checkpoint: CheckpointManager,
}

impl Brain<Level, Affect> {
    pub fn new(config: BrainConfig) -> Self {
        Self::with_affect(config, Affect::new())
    }
}

impl<L: LevelEngine, A: AffectTracker> Brain<L, A> {
    /// Fresh brain with a caller-supplied tracker.
    ///
    /// # Panics
    ///
    /// If `config` has no sensors-plus-actions width or no levels
    /// (see [`BrainConfig::validate`]).
    pub fn with_affect(config: BrainConfig, affect: A) -> Self {
        if let Err(e) = config.validate() {
            panic!("{e}");
        }
        let num_actions = config.num_actions + 1;

        let mut rng = Prng::new(config.seed.unwrap_or(1));
        let mut hierarchy = HierarchyController::new(
            config.num_sensors,
            num_actions,
            config.num_levels,
            config.sequences_per_element,
        );
        hierarchy.reseed(&mut rng);

        let checkpoint = CheckpointManager::new(config.resolved_checkpoint_path());

        Self {
            num_actions,
            timestep: 0,
            satisfaction: 0.0,
            actions: vec![0.0; num_actions],
            affect,
            hierarchy,
            rng,
            checkpoint,
            config,
        }
    }

    /// One timestep: sense, act, learn.
    ///
    /// `sensors` holds `num_sensors` fuzzy-binary values in [0, 1];
    /// `reward` is expected in [-1, 1]. Returns the configured number of
    /// actions, each 0.0 or 1.0.
    ///
    /// # Panics
    ///
    /// If `sensors` has the wrong length.
    pub fn sense_act_learn(&mut self, sensors: &[f32], reward: f32) -> Vec<f32> {
        self.timestep += 1;

        self.satisfaction = self.affect.update(reward);

        self.actions = self
            .hierarchy
            .step(sensors, reward, self.satisfaction, &self.actions);
        if self.config.random_actions {
            self.actions = random_actions(self.num_actions, &mut self.rng);
        }

        if self.timestep % self.config.backup_interval == 0 {
            self.backup();
        }

        self.actions[..self.num_actions - 1].to_vec()
    }

    /// Lifetime average reward per timestep.
    pub fn report_performance(&self) -> f32 {
        self.affect
            .report(self.timestep, &self.config.name, &self.config.log_dir)
    }

    /// Checkpoint now. `false` means the failure was logged and the brain
    /// carries on unchanged.
    pub fn backup(&self) -> bool {
        self.checkpoint.save(&self.checkpoint_view())
    }

    /// Swap in the checkpointed state when one exists and fits this brain's
    /// shape; otherwise keep the fresh state. Live configuration (name,
    /// paths, interval) always wins over what was saved.
    pub fn restore(mut self) -> Self {
        if let Some(state) = self
            .checkpoint
            .restore::<L, A>(self.config.num_sensors, self.num_actions)
        {
            self.adopt(state);
        }
        self
    }

    fn adopt(&mut self, state: RestoredState<L, A>) {
        let RestoredState {
            name,
            timestep,
            num_sensors,
            num_actions,
            satisfaction,
            actions,
            rng_state,
            affect,
            levels,
        } = state;

        let Some(hierarchy) = HierarchyController::from_levels(num_sensors, num_actions, levels)
        else {
            warn!("checkpoint levels do not fit; keeping fresh brain");
            return;
        };

        if name != self.config.name {
            warn!(
                "checkpoint was saved by brain '{name}', continuing as '{}'",
                self.config.name
            );
        }
        info!(
            "brain restored at timestep {timestep} from {:?}",
            self.checkpoint.path()
        );

        self.timestep = timestep;
        self.satisfaction = satisfaction;
        self.actions = actions;
        self.affect = affect;
        self.hierarchy = hierarchy;
        self.rng = Prng::from_state(rng_state);
    }

    pub fn checkpoint_view(&self) -> CheckpointView<'_, L, A> {
        CheckpointView {
            name: &self.config.name,
            timestep: self.timestep,
            num_sensors: self.config.num_sensors,
            num_actions: self.num_actions,
            satisfaction: self.satisfaction,
            actions: &self.actions,
            rng_state: self.rng.state(),
            affect: &self.affect,
            levels: self.hierarchy.levels(),
        }
    }

    /// Size of one checkpoint file for the current state.
    pub fn image_size_bytes(&self) -> Option<usize> {
        self.checkpoint_view().encoded_len().ok()
    }

    /// Log the brain's age and every level's state, then the tracker report.
    pub fn visualize(&self) -> f32 {
        info!(
            "{} is {} time steps old (satisfaction {:.3})",
            self.config.name, self.timestep, self.satisfaction
        );
        for level in self.hierarchy.levels() {
            let s = level.summary();
            info!(
                "  level {}: {}/{} sequences allocated, {} active, goals {:?}, mean reward {:.3}",
                s.index,
                s.allocated_sequences,
                s.num_sequences,
                s.active_sequences,
                s.goal_elements,
                s.mean_reward_estimate
            );
        }
        self.report_performance()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    pub fn satisfaction(&self) -> f32 {
        self.satisfaction
    }

    pub fn num_sensors(&self) -> usize {
        self.config.num_sensors
    }

    /// Internal action count, reserved action included.
    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    /// Full action vector from the last step, reserved slot included.
    pub fn actions(&self) -> &[f32] {
        &self.actions
    }

    pub fn levels(&self) -> &[L] {
        self.hierarchy.levels()
    }

    pub fn affect(&self) -> &A {
        &self.affect
    }

    pub fn checkpoint(&self) -> &CheckpointManager {
        &self.checkpoint
    }
}
