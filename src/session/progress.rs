//! Workout progress snapshot types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What was recorded for one exercise within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseRecord {
  pub sets_completed: u32,
  pub reps: u32,
  #[serde(default)]
  pub weight: Option<f64>,
}

/// Position and history of an in-progress workout session.
///
/// Mirrored into both local stores on every mutation; `last_updated` is the
/// only reconciliation signal between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
  pub current_exercise_index: usize,
  pub current_set_index: usize,
  pub exercises_completed: BTreeSet<String>,
  pub workout_duration_secs: u64,
  pub exercise_history: BTreeMap<String, ExerciseRecord>,
  pub last_updated: DateTime<Utc>,
}

impl SessionProgress {
  pub fn empty() -> Self {
    Self {
      current_exercise_index: 0,
      current_set_index: 0,
      exercises_completed: BTreeSet::new(),
      workout_duration_secs: 0,
      exercise_history: BTreeMap::new(),
      last_updated: Utc::now(),
    }
  }

  /// True when nothing has been trained yet: no completed exercises, no
  /// recorded sets, position at the start.
  pub fn is_empty(&self) -> bool {
    self.exercises_completed.is_empty()
      && self.exercise_history.is_empty()
      && self.current_exercise_index == 0
      && self.current_set_index == 0
  }

  /// Pick the more recently updated of two snapshots; ties go to `self`.
  pub fn fresher(self, other: SessionProgress) -> SessionProgress {
    if other.last_updated > self.last_updated {
      other
    } else {
      self
    }
  }
}
