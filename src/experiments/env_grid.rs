//! A one-dimensional grid world for exercising the control loop.
//!
//! The agent sits on one of `size` cells arranged in a ring and sees its
//! position as a one-hot sensor vector. Two actions step left and right.
//! Sitting on the target cell pays +1; every move costs a little energy.

use crate::affect::AffectTracker;
use crate::brain::Brain;
use crate::level::LevelEngine;
use crate::prng::Prng;

#[derive(Debug, Clone, Copy)]
pub struct GridConfig {
    pub size: usize,
    pub target: usize,
    // Chance per step of being teleported to a random cell.
    pub jump_rate: f32,
    pub energy_cost: f32,
    pub seed: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            size: 9,
            target: 3,
            jump_rate: 0.05,
            energy_cost: 0.01,
            seed: 2026,
        }
    }
}

pub const GRID_ACTIONS: usize = 2;

#[derive(Debug, Clone)]
pub struct Grid1D {
    cfg: GridConfig,
    position: usize,
    steps: u64,
    cumulative_reward: f64,
    rng: Prng,
}

impl Grid1D {
    pub fn new(cfg: GridConfig) -> Self {
        assert!(cfg.size >= 2, "grid needs at least two cells");
        assert!(cfg.target < cfg.size, "target outside the grid");
        let mut rng = Prng::new(cfg.seed);
        let position = rng.gen_range_usize(0, cfg.size);
        Self {
            cfg,
            position,
            steps: 0,
            cumulative_reward: 0.0,
            rng,
        }
    }

    pub fn num_sensors(&self) -> usize {
        self.cfg.size
    }

    pub fn num_actions(&self) -> usize {
        GRID_ACTIONS
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn sensors(&self) -> Vec<f32> {
        let mut s = vec![0.0; self.cfg.size];
        s[self.position] = 1.0;
        s
    }

    pub fn reward(&self) -> f32 {
        if self.position == self.cfg.target {
            1.0
        } else {
            0.0
        }
    }

    /// Apply `[left, right]` and return the reward for the new position.
    pub fn step(&mut self, actions: &[f32]) -> f32 {
        assert_eq!(actions.len(), GRID_ACTIONS, "grid action width");
        let left = actions[0] > 0.5;
        let right = actions[1] > 0.5;
        let size = self.cfg.size;

        match (left, right) {
            (true, false) => self.position = (self.position + size - 1) % size,
            (false, true) => self.position = (self.position + 1) % size,
            _ => {}
        }
        if self.rng.gen_bool(self.cfg.jump_rate) {
            self.position = self.rng.gen_range_usize(0, size);
        }

        let moves = left as u8 + right as u8;
        let reward = self.reward() - self.cfg.energy_cost * moves as f32;
        self.steps += 1;
        self.cumulative_reward += reward as f64;
        reward
    }

    pub fn average_reward(&self) -> f32 {
        if self.steps == 0 {
            0.0
        } else {
            (self.cumulative_reward / self.steps as f64) as f32
        }
    }
}

/// Drive `brain` through `steps` timesteps of the grid world.
///
/// Prints a status line every `render_every` steps (0 disables printing) and
/// returns the world's average reward.
pub fn run_grid_demo<L, A>(
    brain: &mut Brain<L, A>,
    world: &mut Grid1D,
    steps: usize,
    render_every: usize,
) -> f32
where
    L: LevelEngine,
    A: AffectTracker,
{
    let mut reward = world.reward();
    for t in 0..steps {
        let actions = brain.sense_act_learn(&world.sensors(), reward);
        reward = world.step(&actions);

        if render_every > 0 && t % render_every == 0 {
            let mut row: Vec<char> = vec!['.'; world.num_sensors()];
            row[world.cfg.target] = 'o';
            row[world.position] = '@';
            println!(
                "t={:6} {} actions={:?} reward={:+.2} satisfaction={:+.3}",
                brain.timestep(),
                row.iter().collect::<String>(),
                actions,
                reward,
                brain.satisfaction()
            );
        }
    }
    world.average_reward()
}
