//! Reward bookkeeping and the satisfaction signal.
//!
//! The control loop only needs [`AffectTracker`]. [`Affect`] is the default
//! tracker: satisfaction is a slow moving average of reward, and the lifetime
//! reward statistics back the performance report.

use std::io::{self, Read, Write};
use std::path::Path;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::storage::{self, ImagePayload};

/// Turns the reward stream into a satisfaction value and reports on it.
pub trait AffectTracker: ImagePayload {
    /// Fold in one timestep's reward and return the new satisfaction.
    fn update(&mut self, reward: f32) -> f32;

    /// Lifetime performance (average reward per timestep).
    ///
    /// Must not change tracker state: two calls with nothing in between
    /// return the same value. Any report artifact written under `log_dir`
    /// is best effort.
    fn report(&self, timestep: u64, name: &str, log_dir: &Path) -> f32;
}

pub const SATISFACTION_TIME_CONSTANT: f32 = 1_000.0;
pub const REWARD_BLOCK_STEPS: u32 = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Affect {
    satisfaction: f32,
    time_constant: f32,

    cumulative_reward: f64,
    lifetime_steps: u64,

    // Average reward of each completed block of `block_size` steps.
    reward_history: Vec<f32>,
    block_reward: f64,
    block_steps: u32,
    block_size: u32,

    reward_min: f32,
    reward_max: f32,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PerformanceReport<'a> {
    pub name: &'a str,
    pub timestep: u64,
    pub lifetime_steps: u64,
    pub average_reward: f32,
    pub satisfaction: f32,
    pub reward_min: Option<f32>,
    pub reward_max: Option<f32>,
    pub block_size: u32,
    pub reward_history: &'a [f32],
}

impl Default for Affect {
    fn default() -> Self {
        Self::new()
    }
}

impl Affect {
    pub fn new() -> Self {
        Self::with_time_constant(SATISFACTION_TIME_CONSTANT)
    }

    pub fn with_time_constant(time_constant: f32) -> Self {
        Self {
            satisfaction: 0.0,
            time_constant: time_constant.max(1.0),
            cumulative_reward: 0.0,
            lifetime_steps: 0,
            reward_history: Vec::new(),
            block_reward: 0.0,
            block_steps: 0,
            block_size: REWARD_BLOCK_STEPS,
            reward_min: f32::INFINITY,
            reward_max: f32::NEG_INFINITY,
        }
    }

    pub fn satisfaction(&self) -> f32 {
        self.satisfaction
    }

    pub fn lifetime_steps(&self) -> u64 {
        self.lifetime_steps
    }

    pub fn reward_history(&self) -> &[f32] {
        &self.reward_history
    }

    pub fn average_reward(&self) -> f32 {
        if self.lifetime_steps == 0 {
            0.0
        } else {
            (self.cumulative_reward / self.lifetime_steps as f64) as f32
        }
    }

    pub fn performance_report<'a>(&'a self, timestep: u64, name: &'a str) -> PerformanceReport<'a> {
        let seen = self.lifetime_steps > 0;
        PerformanceReport {
            name,
            timestep,
            lifetime_steps: self.lifetime_steps,
            average_reward: self.average_reward(),
            satisfaction: self.satisfaction,
            reward_min: seen.then_some(self.reward_min),
            reward_max: seen.then_some(self.reward_max),
            block_size: self.block_size,
            reward_history: &self.reward_history,
        }
    }

    #[cfg(feature = "serde")]
    fn write_report(&self, timestep: u64, name: &str, log_dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!("{name}_performance.json"));
        let json = serde_json::to_vec_pretty(&self.performance_report(timestep, name))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)
    }

    #[cfg(not(feature = "serde"))]
    fn write_report(&self, _timestep: u64, _name: &str, _log_dir: &Path) -> io::Result<()> {
        Ok(())
    }
}

impl AffectTracker for Affect {
    fn update(&mut self, reward: f32) -> f32 {
        self.satisfaction += (reward - self.satisfaction) / self.time_constant;

        self.cumulative_reward += reward as f64;
        self.lifetime_steps += 1;
        self.reward_min = self.reward_min.min(reward);
        self.reward_max = self.reward_max.max(reward);

        self.block_reward += reward as f64;
        self.block_steps += 1;
        if self.block_steps >= self.block_size {
            self.reward_history
                .push((self.block_reward / self.block_steps as f64) as f32);
            self.block_reward = 0.0;
            self.block_steps = 0;
        }

        self.satisfaction
    }

    fn report(&self, timestep: u64, name: &str, log_dir: &Path) -> f32 {
        let performance = self.average_reward();
        tracing::info!(
            "{name}: average reward {performance:.4} over {} steps (age {timestep})",
            self.lifetime_steps
        );
        if let Err(e) = self.write_report(timestep, name, log_dir) {
            tracing::warn!("failed to write performance report for {name} in {log_dir:?}: {e}");
        }
        performance
    }
}

impl ImagePayload for Affect {
    fn write_image_payload<W: Write>(&self, w: &mut W) -> io::Result<()> {
        storage::write_f32_le(w, self.satisfaction)?;
        storage::write_f32_le(w, self.time_constant)?;
        storage::write_u64_le(w, self.cumulative_reward.to_bits())?;
        storage::write_u64_le(w, self.lifetime_steps)?;
        storage::write_f32_slice(w, &self.reward_history)?;
        storage::write_u64_le(w, self.block_reward.to_bits())?;
        storage::write_u32_le(w, self.block_steps)?;
        storage::write_u32_le(w, self.block_size)?;
        storage::write_f32_le(w, self.reward_min)?;
        storage::write_f32_le(w, self.reward_max)
    }

    fn read_image_payload<R: Read>(r: &mut R) -> io::Result<Self> {
        let satisfaction = storage::read_f32_le(r)?;
        let time_constant = storage::read_f32_le(r)?;
        let cumulative_reward = f64::from_bits(storage::read_u64_le(r)?);
        let lifetime_steps = storage::read_u64_le(r)?;
        let reward_history = storage::read_f32_vec(r)?;
        let block_reward = f64::from_bits(storage::read_u64_le(r)?);
        let block_steps = storage::read_u32_le(r)?;
        let block_size = storage::read_u32_le(r)?;
        let reward_min = storage::read_f32_le(r)?;
        let reward_max = storage::read_f32_le(r)?;

        if time_constant.is_nan() || time_constant < 1.0 || block_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "affect parameters out of range",
            ));
        }

        Ok(Self {
            satisfaction,
            time_constant,
            cumulative_reward,
            lifetime_steps,
            reward_history,
            block_reward,
            block_steps,
            block_size,
            reward_min,
            reward_max,
        })
    }
}
