#[cfg(feature = "serde")]
use serde::Serialize;

use crate::affect::AffectTracker;
use crate::brain::Brain;
use crate::level::{LevelEngine, LevelSummary};

/// A read-only snapshot of what the brain is doing.
///
/// Observers cannot mutate or steer the brain. Snapshotting is on-demand and
/// allocates; the per-timestep loop is unaffected.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct BrainSnapshot {
    pub name: String,
    pub timestep: u64,
    pub satisfaction: f32,
    // Externally visible actions (reserved slot stripped).
    pub actions: Vec<f32>,
    pub checkpoint_bytes: Option<usize>,
    pub levels: Vec<LevelSummary>,
}

pub struct BrainAdapter<'a, L, A> {
    brain: &'a Brain<L, A>,
}

impl<'a, L: LevelEngine, A: AffectTracker> BrainAdapter<'a, L, A> {
    pub fn new(brain: &'a Brain<L, A>) -> Self {
        Self { brain }
    }

    pub fn snapshot(&self) -> BrainSnapshot {
        let actions = self.brain.actions();
        BrainSnapshot {
            name: self.brain.name().to_string(),
            timestep: self.brain.timestep(),
            satisfaction: self.brain.satisfaction(),
            actions: actions[..actions.len() - 1].to_vec(),
            checkpoint_bytes: self.brain.image_size_bytes(),
            levels: self.brain.levels().iter().map(|l| l.summary()).collect(),
        }
    }

    /// One-line status for logs.
    pub fn status_line(&self) -> String {
        let s = self.snapshot();
        let allocated: Vec<String> = s
            .levels
            .iter()
            .map(|l| format!("{}/{}", l.allocated_sequences, l.num_sequences))
            .collect();
        format!(
            "{} t={} satisfaction={:+.3} actions={:?} sequences=[{}]",
            s.name,
            s.timestep,
            s.satisfaction,
            s.actions,
            allocated.join(" ")
        )
    }
}
