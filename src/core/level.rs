//! One layer of the hierarchy.
//!
//! [`LevelEngine`] is everything the control loop relies on. [`Level`] is a
//! small default engine: it discovers element transitions
//! (`pre` at t-1 followed by `post` at t), reports them as its sequences, and
//! learns which ones precede reward.

use hashbrown::HashMap;
use std::io::{self, Read, Write};

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::prng::Prng;
use crate::storage::{self, ImagePayload};

/// The contract between the hierarchy and a single level.
///
/// A level at index `i` consumes `num_elements` activities (level 0: sensors
/// followed by the previous action vector; above that: the sequence
/// activities of level `i - 1`) and produces `num_sequences` activities.
pub trait LevelEngine: ImagePayload {
    fn new(level_index: usize, num_elements: usize, num_sequences: usize) -> Self;

    fn level_index(&self) -> usize;
    fn num_elements(&self) -> usize;
    fn num_sequences(&self) -> usize;

    /// Advance one timestep and return the sequence activities.
    fn step(&mut self, element_activities: &[f32], reward: f32, satisfaction: f32) -> &[f32];

    /// What this level wants its elements to do next, one entry per element.
    fn element_goals(&self) -> &[f32];

    /// Goals pushed down from the level above, one entry per sequence.
    /// Zero until the first write.
    fn sequence_goals(&self) -> &[f32];

    fn set_sequence_goals(&mut self, goals: &[f32]);

    /// Re-seed any internal randomness.
    fn reseed(&mut self, _seed: u64) {}

    fn summary(&self) -> LevelSummary;
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct LevelSummary {
    pub index: usize,
    pub num_elements: usize,
    pub num_sequences: usize,
    pub allocated_sequences: usize,
    pub active_sequences: usize,
    pub goal_elements: Vec<usize>,
    pub mean_reward_estimate: f32,
}

// Fuzzy activity at or above this counts as "on" for discovery/reporting.
const ACTIVE_THRESHOLD: f32 = 0.5;
// Accumulated co-activation needed before a transition becomes a sequence.
const NUCLEATION_THRESHOLD: f32 = 3.0;
const REWARD_RATE: f32 = 0.1;
const EXPLORATION_RATE: f32 = 0.2;
const GOAL_THRESHOLD: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sequence {
    pre: u32,
    post: u32,
    // Expected reward on the step after this sequence completes.
    reward: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    index: usize,
    num_elements: usize,
    num_sequences: usize,
    age: u64,
    rng: Prng,

    sequences: Vec<Sequence>,
    // Packed (pre, post) -> position in `sequences`. Derived, not persisted.
    sequence_index: HashMap<u64, usize>,
    // Packed (pre, post) -> accumulated evidence for not-yet-allocated pairs.
    candidates: HashMap<u64, f32>,

    previous_activities: Vec<f32>,
    sequence_activities: Vec<f32>,
    element_goals: Vec<f32>,
    sequence_goals: Vec<f32>,
}

impl Level {
    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn allocated_sequences(&self) -> usize {
        self.sequences.len()
    }

    /// Element pair behind sequence `j`, if allocated.
    pub fn sequence_elements(&self, j: usize) -> Option<(usize, usize)> {
        self.sequences
            .get(j)
            .map(|s| (s.pre as usize, s.post as usize))
    }

    pub fn sequence_reward(&self, j: usize) -> Option<f32> {
        self.sequences.get(j).map(|s| s.reward)
    }

    fn nucleate(&mut self, current: &[f32]) {
        if self.sequences.len() >= self.num_sequences {
            return;
        }

        for pre in 0..self.num_elements {
            let a = self.previous_activities[pre];
            if a < ACTIVE_THRESHOLD {
                continue;
            }
            for (post, &b) in current.iter().enumerate() {
                if b < ACTIVE_THRESHOLD {
                    continue;
                }
                let key = pack(pre, post);
                if self.sequence_index.contains_key(&key) {
                    continue;
                }

                let evidence = self.candidates.entry(key).or_insert(0.0);
                *evidence += a * b;
                if *evidence < NUCLEATION_THRESHOLD {
                    continue;
                }

                self.candidates.remove(&key);
                self.sequence_index.insert(key, self.sequences.len());
                self.sequences.push(Sequence {
                    pre: pre as u32,
                    post: post as u32,
                    reward: 0.0,
                });
                if self.sequences.len() >= self.num_sequences {
                    // Full: nothing left to allocate.
                    self.candidates.clear();
                    return;
                }
            }
        }
    }

    fn choose_goals(&mut self, current: &[f32], satisfaction: f32) {
        self.element_goals.fill(0.0);

        let mut best: Option<(usize, f32)> = None;
        for (j, seq) in self.sequences.iter().enumerate() {
            let ready = current[seq.pre as usize];
            if ready <= 0.0 {
                continue;
            }
            let value = ready * (seq.reward + self.sequence_goals[j]);
            if value > GOAL_THRESHOLD && best.map_or(true, |(_, v)| value > v) {
                best = Some((seq.post as usize, value));
            }
        }

        let goal = match best {
            Some((element, _)) => Some(element),
            None => {
                // Content brains explore less.
                let explore = EXPLORATION_RATE * (1.0 - satisfaction.clamp(0.0, 1.0));
                if self.num_elements > 0 && self.rng.gen_bool(explore) {
                    Some(self.rng.gen_range_usize(0, self.num_elements))
                } else {
                    None
                }
            }
        };

        if let Some(element) = goal {
            self.element_goals[element] = 1.0;
        }
    }
}

impl LevelEngine for Level {
    fn new(level_index: usize, num_elements: usize, num_sequences: usize) -> Self {
        Self {
            index: level_index,
            num_elements,
            num_sequences,
            age: 0,
            rng: Prng::new(level_index as u64 + 1),
            sequences: Vec::new(),
            sequence_index: HashMap::new(),
            candidates: HashMap::new(),
            previous_activities: vec![0.0; num_elements],
            sequence_activities: vec![0.0; num_sequences],
            element_goals: vec![0.0; num_elements],
            sequence_goals: vec![0.0; num_sequences],
        }
    }

    fn level_index(&self) -> usize {
        self.index
    }

    fn num_elements(&self) -> usize {
        self.num_elements
    }

    fn num_sequences(&self) -> usize {
        self.num_sequences
    }

    fn step(&mut self, element_activities: &[f32], reward: f32, satisfaction: f32) -> &[f32] {
        assert_eq!(
            element_activities.len(),
            self.num_elements,
            "level {}: element activity width",
            self.index
        );
        self.age += 1;

        // Credit this reward to the sequences that completed last step.
        for (seq, &act) in self.sequences.iter_mut().zip(&self.sequence_activities) {
            if act > 0.0 {
                seq.reward += REWARD_RATE * act * (reward - seq.reward);
            }
        }

        self.nucleate(element_activities);

        for (j, seq) in self.sequences.iter().enumerate() {
            self.sequence_activities[j] = self.previous_activities[seq.pre as usize]
                * element_activities[seq.post as usize];
        }

        self.choose_goals(element_activities, satisfaction);
        self.previous_activities.copy_from_slice(element_activities);

        &self.sequence_activities
    }

    fn element_goals(&self) -> &[f32] {
        &self.element_goals
    }

    fn sequence_goals(&self) -> &[f32] {
        &self.sequence_goals
    }

    fn set_sequence_goals(&mut self, goals: &[f32]) {
        assert_eq!(
            goals.len(),
            self.num_sequences,
            "level {}: sequence goal width",
            self.index
        );
        self.sequence_goals.copy_from_slice(goals);
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = Prng::new(seed);
    }

    fn summary(&self) -> LevelSummary {
        let mean_reward_estimate = if self.sequences.is_empty() {
            0.0
        } else {
            self.sequences.iter().map(|s| s.reward).sum::<f32>() / self.sequences.len() as f32
        };
        LevelSummary {
            index: self.index,
            num_elements: self.num_elements,
            num_sequences: self.num_sequences,
            allocated_sequences: self.sequences.len(),
            active_sequences: self
                .sequence_activities
                .iter()
                .filter(|&&a| a >= ACTIVE_THRESHOLD)
                .count(),
            goal_elements: self
                .element_goals
                .iter()
                .enumerate()
                .filter(|&(_, &g)| g > 0.5)
                .map(|(i, _)| i)
                .collect(),
            mean_reward_estimate,
        }
    }
}

impl ImagePayload for Level {
    fn write_image_payload<W: Write>(&self, w: &mut W) -> io::Result<()> {
        storage::write_len(w, self.index)?;
        storage::write_len(w, self.num_elements)?;
        storage::write_len(w, self.num_sequences)?;
        storage::write_u64_le(w, self.age)?;
        storage::write_u64_le(w, self.rng.state())?;

        storage::write_len(w, self.sequences.len())?;
        for s in &self.sequences {
            storage::write_u32_le(w, s.pre)?;
            storage::write_u32_le(w, s.post)?;
            storage::write_f32_le(w, s.reward)?;
        }

        // Sorted so identical levels produce identical bytes.
        let mut candidates: Vec<(u64, f32)> =
            self.candidates.iter().map(|(&k, &v)| (k, v)).collect();
        candidates.sort_unstable_by_key(|&(k, _)| k);
        storage::write_len(w, candidates.len())?;
        for (key, evidence) in candidates {
            storage::write_u64_le(w, key)?;
            storage::write_f32_le(w, evidence)?;
        }

        storage::write_f32_slice(w, &self.previous_activities)?;
        storage::write_f32_slice(w, &self.sequence_activities)?;
        storage::write_f32_slice(w, &self.element_goals)?;
        storage::write_f32_slice(w, &self.sequence_goals)
    }

    fn read_image_payload<R: Read>(r: &mut R) -> io::Result<Self> {
        let index = storage::read_len(r)?;
        let num_elements = storage::read_len(r)?;
        let num_sequences = storage::read_len(r)?;
        let age = storage::read_u64_le(r)?;
        let rng = Prng::from_state(storage::read_u64_le(r)?);

        let seq_n = storage::read_len(r)?;
        if seq_n > num_sequences {
            return Err(invalid("more sequences than capacity"));
        }
        let mut sequences = Vec::with_capacity(seq_n);
        let mut sequence_index = HashMap::with_capacity(seq_n);
        for j in 0..seq_n {
            let pre = storage::read_u32_le(r)?;
            let post = storage::read_u32_le(r)?;
            let reward = storage::read_f32_le(r)?;
            if pre as usize >= num_elements || post as usize >= num_elements {
                return Err(invalid("sequence element out of range"));
            }
            if sequence_index
                .insert(pack(pre as usize, post as usize), j)
                .is_some()
            {
                return Err(invalid("duplicate sequence"));
            }
            sequences.push(Sequence { pre, post, reward });
        }

        let cand_n = storage::read_len(r)?;
        let mut candidates = HashMap::with_capacity(cand_n.min(1 << 16));
        for _ in 0..cand_n {
            let key = storage::read_u64_le(r)?;
            let evidence = storage::read_f32_le(r)?;
            candidates.insert(key, evidence);
        }

        let previous_activities = storage::read_f32_vec(r)?;
        let sequence_activities = storage::read_f32_vec(r)?;
        let element_goals = storage::read_f32_vec(r)?;
        let sequence_goals = storage::read_f32_vec(r)?;
        if previous_activities.len() != num_elements
            || element_goals.len() != num_elements
            || sequence_activities.len() != num_sequences
            || sequence_goals.len() != num_sequences
        {
            return Err(invalid("level vector width mismatch"));
        }

        Ok(Self {
            index,
            num_elements,
            num_sequences,
            age,
            rng,
            sequences,
            sequence_index,
            candidates,
            previous_activities,
            sequence_activities,
            element_goals,
            sequence_goals,
        })
    }
}

fn pack(pre: usize, post: usize) -> u64 {
    ((pre as u64) << 32) | (post as u64)
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_hot(n: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; n];
        v[i] = 1.0;
        v
    }

    #[test]
    fn repeated_transition_becomes_a_sequence() {
        let mut level = Level::new(0, 3, 9);
        for _ in 0..4 {
            level.step(&one_hot(3, 0), 0.0, 0.0);
            level.step(&one_hot(3, 1), 0.0, 0.0);
        }
        let found = (0..level.allocated_sequences())
            .filter_map(|j| level.sequence_elements(j))
            .any(|pair| pair == (0, 1));
        assert!(found, "0 -> 1 should have nucleated");
    }

    #[test]
    fn sequence_activity_is_product_of_pre_and_post() {
        let mut level = Level::new(0, 2, 4);
        for _ in 0..4 {
            level.step(&[1.0, 0.0], 0.0, 0.0);
            level.step(&[0.0, 1.0], 0.0, 0.0);
        }
        let j = (0..level.allocated_sequences())
            .find(|&j| level.sequence_elements(j) == Some((0, 1)))
            .expect("0 -> 1 allocated");

        level.step(&[0.8, 0.0], 0.0, 0.0);
        let out = level.step(&[0.0, 0.5], 0.0, 0.0).to_vec();
        assert!((out[j] - 0.4).abs() < 1e-6);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let mut level = Level::new(0, 4, 2);
        for t in 0..200 {
            level.step(&one_hot(4, t % 4), 0.0, 0.0);
        }
        assert_eq!(level.allocated_sequences(), 2);
    }

    #[test]
    fn rewarded_sequence_becomes_a_goal() {
        let mut level = Level::new(0, 3, 9);
        // 0 -> 1 is always followed by reward.
        for _ in 0..60 {
            level.step(&one_hot(3, 0), 0.0, 1.0);
            level.step(&one_hot(3, 1), 0.0, 1.0);
            level.step(&one_hot(3, 2), 1.0, 1.0);
        }
        let j = (0..level.allocated_sequences())
            .find(|&j| level.sequence_elements(j) == Some((0, 1)))
            .expect("0 -> 1 allocated");
        assert!(level.sequence_reward(j).unwrap() > 0.5);

        level.step(&one_hot(3, 0), 0.0, 1.0);
        assert_eq!(level.element_goals(), &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn element_goals_are_binary_with_at_most_one_winner() {
        let mut level = Level::new(0, 5, 15);
        level.reseed(99);
        for t in 0..500 {
            let a = ((t * 7) % 5) as usize;
            level.step(&one_hot(5, a), ((t % 3) as f32 - 1.0) * 0.5, 0.0);
            let goals = level.element_goals();
            assert!(goals.iter().all(|&g| g == 0.0 || g == 1.0));
            assert!(goals.iter().filter(|&&g| g == 1.0).count() <= 1);
        }
    }

    #[test]
    fn sequence_goals_default_to_zero_and_accept_writes() {
        let mut level = Level::new(1, 2, 3);
        assert_eq!(level.sequence_goals(), &[0.0, 0.0, 0.0]);
        level.set_sequence_goals(&[0.0, 1.0, 0.0]);
        assert_eq!(level.sequence_goals(), &[0.0, 1.0, 0.0]);
    }

    #[test]
    #[should_panic]
    fn wrong_width_input_panics() {
        let mut level = Level::new(0, 3, 9);
        level.step(&[1.0, 0.0], 0.0, 0.0);
    }

    #[test]
    fn image_roundtrip_preserves_everything() {
        let mut level = Level::new(2, 4, 12);
        level.reseed(5);
        for t in 0..300 {
            level.step(&one_hot(4, (t * 3) % 4), (t % 2) as f32, 0.3);
        }
        level.set_sequence_goals(&one_hot(12, 4));

        let bytes = storage::payload_bytes(&level).unwrap();
        let mut back: Level = storage::payload_from_bytes(&bytes).unwrap();
        assert_eq!(back, level);

        // Identical futures, including exploration draws.
        let mut original = level.clone();
        for t in 0..50 {
            let input = one_hot(4, t % 4);
            assert_eq!(
                original.step(&input, 0.0, 0.0).to_vec(),
                back.step(&input, 0.0, 0.0).to_vec()
            );
            assert_eq!(original.element_goals(), back.element_goals());
        }
    }

    #[test]
    fn corrupt_image_is_rejected() {
        let level = Level::new(0, 3, 9);
        let mut bytes = storage::payload_bytes(&level).unwrap();
        // num_sequences -> 0 while vectors still carry 9 entries.
        bytes[8..12].copy_from_slice(&0u32.to_le_bytes());
        assert!(storage::payload_from_bytes::<Level>(&bytes).is_err());
    }
}
