//! strata: a hierarchical reinforcement-learning agent.
//!
//! A [`brain::Brain`] takes a sensor vector and a scalar reward each timestep
//! and returns an action vector. Internally a stack of levels learns
//! sequences bottom-up and passes goals top-down; an affect tracker turns
//! reward into satisfaction. State is checkpointed to a primary file and a
//! `.bak` copy at a fixed interval.
//!
//! ```no_run
//! use strata::prelude::*;
//!
//! let mut brain = Brain::new(BrainConfig::new(4, 2).with_name("demo")).restore();
//! let mut reward = 0.0;
//! for _ in 0..1000 {
//!     let actions = brain.sense_act_learn(&[1.0, 0.0, 0.0, 0.0], reward);
//!     reward = if actions[0] > 0.5 { 1.0 } else { 0.0 };
//! }
//! brain.backup();
//! brain.report_performance();
//! ```

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/affect.rs"]
pub mod affect;

#[path = "core/level.rs"]
pub mod level;

#[path = "core/hierarchy.rs"]
pub mod hierarchy;

#[path = "core/checkpoint.rs"]
pub mod checkpoint;

#[path = "core/brain.rs"]
pub mod brain;

pub mod observer;

pub mod experiments {
    pub mod env_grid;
}

pub mod prelude {
    pub use crate::affect::{Affect, AffectTracker};
    pub use crate::brain::Brain;
    pub use crate::checkpoint::{CheckpointError, CheckpointManager};
    pub use crate::config::{BrainConfig, ConfigError};
    pub use crate::level::{Level, LevelEngine, LevelSummary};
    pub use crate::observer::{BrainAdapter, BrainSnapshot};
}
