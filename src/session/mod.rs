//! Workout session persistence and resumption.
//!
//! A session's progress lives in three places that fail independently: a
//! primary local store, a backup local store, and the remote session ledger.
//! Nothing coordinates writes across them; the reconciler sorts out which
//! snapshot wins when the user re-enters a workout.

mod ledger;
mod progress;
mod reconciler;
mod store;

pub use ledger::{ExerciseEntry, HttpSessionLedger, LedgerSession, SessionLedger};
pub use progress::{ExerciseRecord, SessionProgress};
pub use reconciler::{Reconciler, ResumeDecision};
pub use store::{
  MemoryProgressStore, ProgressStore, SqliteProgressStore, BACKUP_KEY_PREFIX, PRIMARY_KEY_PREFIX,
};
