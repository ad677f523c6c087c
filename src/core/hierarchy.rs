//! The per-timestep control loop over a fixed stack of levels.
//!
//! One call to [`HierarchyController::step`] runs, in order:
//! 1. a bottom-up pass, level 0 first, each level's sequence activities
//!    becoming the next level's element activities;
//! 2. a top-down pass, copying `levels[i + 1].element_goals()` into
//!    `levels[i]` as its sequence goals, from the second-highest level down;
//! 3. action selection from the action slice of level 0's element goals.
//!
//! The passes never interleave: a level's element goals for this timestep
//! exist only once its own step has returned.

use crate::level::LevelEngine;
use crate::prng::Prng;

pub struct HierarchyController<L> {
    num_sensors: usize,
    // Includes the reserved "do nothing" action in the last slot.
    num_actions: usize,
    levels: Vec<L>,
}

/// Largest element or sequence count a single level may have.
pub const MAX_LEVEL_WIDTH: usize = 1 << 20;

/// `(num_elements, num_sequences)` for each level of a stack, or `None` if
/// any width would pass [`MAX_LEVEL_WIDTH`].
pub fn level_widths(
    num_sensors: usize,
    num_actions: usize,
    num_levels: usize,
    sequences_per_element: usize,
) -> Option<Vec<(usize, usize)>> {
    let mut widths = Vec::with_capacity(num_levels.min(64));
    let mut num_elements = num_sensors.checked_add(num_actions)?;
    for _ in 0..num_levels {
        let num_sequences = sequences_per_element.checked_mul(num_elements)?;
        if num_elements > MAX_LEVEL_WIDTH || num_sequences > MAX_LEVEL_WIDTH {
            return None;
        }
        widths.push((num_elements, num_sequences));
        num_elements = num_sequences;
    }
    Some(widths)
}

/// True when `levels` is a non-empty stack, indexed in order, whose level 0
/// consumes `num_sensors + num_actions` elements and whose every other level
/// consumes exactly what the level below produces.
pub fn level_chain_is_consistent<L: LevelEngine>(
    levels: &[L],
    num_sensors: usize,
    num_actions: usize,
) -> bool {
    if num_actions == 0 || levels.is_empty() {
        return false;
    }
    let mut expected = num_sensors + num_actions;
    for (i, level) in levels.iter().enumerate() {
        if level.level_index() != i
            || level.num_elements() != expected
            || level.element_goals().len() != expected
            || level.sequence_goals().len() != level.num_sequences()
        {
            return false;
        }
        expected = level.num_sequences();
    }
    true
}

/// Each action fires independently with probability `1 / num_actions`.
pub fn random_actions(num_actions: usize, rng: &mut Prng) -> Vec<f32> {
    let threshold = 1.0 / num_actions.max(1) as f32;
    (0..num_actions)
        .map(|_| if rng.next_f32_01() < threshold { 1.0 } else { 0.0 })
        .collect()
}

impl<L: LevelEngine> HierarchyController<L> {
    /// # Panics
    ///
    /// If there is no action slot, no level, or the widths do not fit
    /// [`level_widths`]. [`BrainConfig::validate`](crate::config::BrainConfig::validate)
    /// rejects all three up front.
    pub fn new(
        num_sensors: usize,
        num_actions: usize,
        num_levels: usize,
        sequences_per_element: usize,
    ) -> Self {
        assert!(num_actions >= 1, "the reserved action is always present");
        assert!(num_levels >= 1, "a hierarchy needs at least one level");
        let Some(widths) = level_widths(num_sensors, num_actions, num_levels, sequences_per_element)
        else {
            panic!("level widths exceed {MAX_LEVEL_WIDTH}");
        };

        let levels = widths
            .into_iter()
            .enumerate()
            .map(|(i, (num_elements, num_sequences))| L::new(i, num_elements, num_sequences))
            .collect();

        Self {
            num_sensors,
            num_actions,
            levels,
        }
    }

    /// Rebuild around previously persisted levels.
    ///
    /// Returns `None` if the widths do not chain (see
    /// [`level_chain_is_consistent`]).
    pub fn from_levels(num_sensors: usize, num_actions: usize, levels: Vec<L>) -> Option<Self> {
        if !level_chain_is_consistent(&levels, num_sensors, num_actions) {
            return None;
        }

        Some(Self {
            num_sensors,
            num_actions,
            levels,
        })
    }

    /// Give every level its own exploration stream derived from `rng`.
    pub fn reseed(&mut self, rng: &mut Prng) {
        for (i, level) in self.levels.iter_mut().enumerate() {
            level.reseed(rng.fork(i as u64).state());
        }
    }

    /// Run one full timestep and return the selected action vector
    /// (`num_actions` entries including the reserved slot, each 0.0 or 1.0).
    ///
    /// The controller keeps no action history: the caller owns the vector
    /// and passes it back as `previous_actions` on the next step.
    ///
    /// # Panics
    ///
    /// If `sensors` is not `num_sensors` long or `previous_actions` is not
    /// `num_actions` long. Silently reshaping either would break the fixed
    /// level widths.
    pub fn step(
        &mut self,
        sensors: &[f32],
        reward: f32,
        satisfaction: f32,
        previous_actions: &[f32],
    ) -> Vec<f32> {
        assert_eq!(sensors.len(), self.num_sensors, "sensor vector width");
        assert_eq!(
            previous_actions.len(),
            self.num_actions,
            "previous action vector width"
        );

        let mut element_activities = Vec::with_capacity(self.num_sensors + self.num_actions);
        element_activities.extend_from_slice(sensors);
        element_activities.extend_from_slice(previous_actions);

        for level in self.levels.iter_mut() {
            element_activities = level
                .step(&element_activities, reward, satisfaction)
                .to_vec();
        }

        self.propagate_goals();
        self.select_actions()
    }

    fn propagate_goals(&mut self) {
        for i in (0..self.levels.len().saturating_sub(1)).rev() {
            let (lower, upper) = self.levels.split_at_mut(i + 1);
            lower[i].set_sequence_goals(upper[0].element_goals());
        }
    }

    fn select_actions(&self) -> Vec<f32> {
        let goals = self.levels[0].element_goals();
        goals[self.num_sensors..self.num_sensors + self.num_actions]
            .iter()
            .map(|&goal| if goal >= 0.5 { 1.0 } else { 0.0 })
            .collect()
    }

    pub fn num_sensors(&self) -> usize {
        self.num_sensors
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn height(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[L] {
        &self.levels
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::level::{Level, LevelSummary};
    use crate::storage::{self, ImagePayload};
    use std::io::{self, Read, Write};

    /// A transparent level: sequences echo elements, goals follow a pattern
    /// that changes every step so stale goal copies are detectable.
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct ScriptedLevel {
        index: usize,
        num_elements: usize,
        num_sequences: usize,
        steps: u64,
        pub(crate) last_input: Vec<f32>,
        pub(crate) goals_seen_at_step: Vec<f32>,
        out: Vec<f32>,
        element_goals: Vec<f32>,
        sequence_goals: Vec<f32>,
    }

    impl LevelEngine for ScriptedLevel {
        fn new(level_index: usize, num_elements: usize, num_sequences: usize) -> Self {
            Self {
                index: level_index,
                num_elements,
                num_sequences,
                steps: 0,
                last_input: Vec::new(),
                goals_seen_at_step: vec![0.0; num_sequences],
                out: vec![0.0; num_sequences],
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

        fn step(&mut self, element_activities: &[f32], _reward: f32, _satisfaction: f32) -> &[f32] {
            assert_eq!(element_activities.len(), self.num_elements);
            self.steps += 1;
            self.last_input = element_activities.to_vec();
            self.goals_seen_at_step = self.sequence_goals.clone();
            for (j, o) in self.out.iter_mut().enumerate() {
                *o = element_activities[j % self.num_elements];
            }
            for (e, g) in self.element_goals.iter_mut().enumerate() {
                *g = ((e as u64 + self.index as u64 + self.steps) % 2) as f32;
            }
            &self.out
        }

        fn element_goals(&self) -> &[f32] {
            &self.element_goals
        }

        fn sequence_goals(&self) -> &[f32] {
            &self.sequence_goals
        }

        fn set_sequence_goals(&mut self, goals: &[f32]) {
            assert_eq!(goals.len(), self.num_sequences);
            self.sequence_goals.copy_from_slice(goals);
        }

        fn summary(&self) -> LevelSummary {
            LevelSummary {
                index: self.index,
                num_elements: self.num_elements,
                num_sequences: self.num_sequences,
                allocated_sequences: self.num_sequences,
                active_sequences: 0,
                goal_elements: Vec::new(),
                mean_reward_estimate: 0.0,
            }
        }
    }

    impl ImagePayload for ScriptedLevel {
        fn write_image_payload<W: Write>(&self, w: &mut W) -> io::Result<()> {
            storage::write_len(w, self.index)?;
            storage::write_len(w, self.num_elements)?;
            storage::write_len(w, self.num_sequences)?;
            storage::write_u64_le(w, self.steps)?;
            storage::write_f32_slice(w, &self.last_input)?;
            storage::write_f32_slice(w, &self.goals_seen_at_step)?;
            storage::write_f32_slice(w, &self.out)?;
            storage::write_f32_slice(w, &self.element_goals)?;
            storage::write_f32_slice(w, &self.sequence_goals)
        }

        fn read_image_payload<R: Read>(r: &mut R) -> io::Result<Self> {
            Ok(Self {
                index: storage::read_len(r)?,
                num_elements: storage::read_len(r)?,
                num_sequences: storage::read_len(r)?,
                steps: storage::read_u64_le(r)?,
                last_input: storage::read_f32_vec(r)?,
                goals_seen_at_step: storage::read_f32_vec(r)?,
                out: storage::read_f32_vec(r)?,
                element_goals: storage::read_f32_vec(r)?,
                sequence_goals: storage::read_f32_vec(r)?,
            })
        }
    }

    #[test]
    fn widths_chain_through_the_stack() {
        let h: HierarchyController<ScriptedLevel> = HierarchyController::new(2, 3, 3, 2);
        let widths: Vec<(usize, usize)> = h
            .levels()
            .iter()
            .map(|l| (l.num_elements(), l.num_sequences()))
            .collect();
        assert_eq!(widths, vec![(5, 10), (10, 20), (20, 40)]);
        assert_eq!(level_widths(2, 3, 3, 2), Some(widths));
    }

    #[test]
    fn level_zero_sees_sensors_then_previous_actions() {
        let mut h: HierarchyController<ScriptedLevel> = HierarchyController::new(2, 3, 1, 3);
        h.step(&[0.25, 1.0], 0.0, 0.0, &[1.0, 0.0, 1.0]);
        assert_eq!(h.levels()[0].last_input, vec![0.25, 1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn bottom_up_feeds_each_level_from_the_one_below() {
        let mut h: HierarchyController<ScriptedLevel> = HierarchyController::new(2, 2, 3, 2);
        h.step(&[0.5, 1.0], 0.0, 0.0, &[0.0, 1.0]);
        for i in 1..h.height() {
            let below = &h.levels()[i - 1];
            let expected: Vec<f32> = (0..below.num_sequences())
                .map(|j| below.last_input[j % below.num_elements()])
                .collect();
            assert_eq!(h.levels()[i].last_input, expected);
        }
    }

    #[test]
    fn top_down_copies_goals_after_bottom_up() {
        let mut h: HierarchyController<ScriptedLevel> = HierarchyController::new(1, 2, 3, 2);
        let mut prev = vec![0.0; 2];
        for t in 0..5 {
            let sensors = [(t % 2) as f32];
            prev = h.step(&sensors, 0.0, 0.0, &prev);

            for i in 0..h.height() - 1 {
                assert_eq!(
                    h.levels()[i].sequence_goals(),
                    h.levels()[i + 1].element_goals(),
                    "level {i} after step {t}"
                );
            }
            // The top level never receives goals.
            let top = &h.levels()[h.height() - 1];
            assert!(top.sequence_goals().iter().all(|&g| g == 0.0));
        }
    }

    #[test]
    fn goals_seen_during_a_step_are_from_the_previous_step() {
        let mut h: HierarchyController<ScriptedLevel> = HierarchyController::new(1, 2, 2, 2);
        h.step(&[1.0], 0.0, 0.0, &[0.0, 0.0]);
        let upper_goals_t1 = h.levels()[1].element_goals().to_vec();
        h.step(&[1.0], 0.0, 0.0, &[0.0, 0.0]);
        assert_eq!(h.levels()[0].goals_seen_at_step, upper_goals_t1);
        assert_ne!(h.levels()[1].element_goals(), upper_goals_t1.as_slice());
    }

    #[test]
    fn actions_come_from_the_action_slice() {
        let mut h: HierarchyController<ScriptedLevel> = HierarchyController::new(2, 3, 1, 3);
        let actions = h.step(&[0.0, 0.0], 0.0, 0.0, &[0.0, 0.0, 0.0]);
        // Step 1 goals for level 0: element e -> (e + 1) % 2.
        assert_eq!(actions, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn default_levels_emit_binary_actions() {
        let mut h: HierarchyController<Level> = HierarchyController::new(3, 4, 2, 3);
        let mut rng = Prng::new(11);
        h.reseed(&mut rng);
        let mut prev = vec![0.0; 4];
        for t in 0..300 {
            let sensors = [(t % 2) as f32, ((t / 2) % 2) as f32, 0.5];
            prev = h.step(&sensors, if t % 7 == 0 { 1.0 } else { 0.0 }, 0.0, &prev);
            assert_eq!(prev.len(), 4);
            assert!(prev.iter().all(|&a| a == 0.0 || a == 1.0));
        }
    }

    #[test]
    fn from_levels_rejects_a_broken_chain() {
        let good: Vec<ScriptedLevel> = level_widths(2, 2, 2, 2)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, (e, s))| ScriptedLevel::new(i, e, s))
            .collect();
        assert!(HierarchyController::from_levels(2, 2, good.clone()).is_some());
        assert!(HierarchyController::from_levels(3, 2, good.clone()).is_none());
        assert!(HierarchyController::<ScriptedLevel>::from_levels(2, 2, Vec::new()).is_none());

        let mut swapped = good;
        swapped.swap(0, 1);
        assert!(HierarchyController::from_levels(2, 2, swapped).is_none());
    }

    #[test]
    fn oversized_stacks_have_no_widths() {
        assert!(level_widths(2, 2, 64, 3).is_none());
        assert!(level_widths(usize::MAX, 1, 1, 1).is_none());
        assert!(level_widths(1, 1, 1, usize::MAX).is_none());
        assert!(level_widths(MAX_LEVEL_WIDTH, 1, 1, 1).is_none());
        assert_eq!(level_widths(2, 2, 3, 3).map(|w| w.len()), Some(3));
    }

    #[test]
    #[should_panic(expected = "level widths exceed")]
    fn new_refuses_an_oversized_stack() {
        let _h: HierarchyController<ScriptedLevel> = HierarchyController::new(2, 2, 64, 3);
    }

    #[test]
    fn random_actions_are_binary() {
        let mut rng = Prng::new(5);
        let mut fired = 0;
        for _ in 0..1_000 {
            let a = random_actions(4, &mut rng);
            assert_eq!(a.len(), 4);
            assert!(a.iter().all(|&x| x == 0.0 || x == 1.0));
            fired += a.iter().filter(|&&x| x == 1.0).count();
        }
        // Expected 1000 firings (4 actions * 1/4 each).
        assert!((700..1300).contains(&fired));
    }

    #[test]
    #[should_panic(expected = "sensor vector width")]
    fn short_sensor_vector_panics() {
        let mut h: HierarchyController<ScriptedLevel> = HierarchyController::new(2, 3, 1, 3);
        h.step(&[1.0], 0.0, 0.0, &[0.0, 0.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "previous action vector width")]
    fn short_action_echo_panics() {
        let mut h: HierarchyController<ScriptedLevel> = HierarchyController::new(2, 3, 1, 3);
        h.step(&[1.0, 0.0], 0.0, 0.0, &[0.0, 0.0]);
    }
}
