//! Resumption reconciler: decides, on training-flow entry, whether to resume
//! an existing session, start a new one, or ask the user.
//!
//! Lifecycle of one training-flow visit:
//! `Idle -> Probing -> {Resuming | Initializing | AwaitingUserChoice} ->
//! Active -> Finalizing -> Idle`. [`Reconciler::probe`] covers everything up
//! to `Active`; [`Reconciler::record`] is the `Active` mutation path;
//! [`Reconciler::finish`] and [`Reconciler::abandon`] are `Finalizing`.
//! Exiting early without calling either leaves the remote session open and
//! both local tiers intact, so a later visit can still offer resumption.

use color_eyre::Result;
use std::sync::Arc;
use ulid::Ulid;

use super::ledger::{ExerciseEntry, SessionLedger};
use super::progress::SessionProgress;
use super::store::ProgressStore;

/// How a training-flow visit starts.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDecision {
  /// An earlier session was picked up; continue from `progress`.
  Resumed {
    session_id: String,
    progress: SessionProgress,
    /// Set when the ledger was unreachable and the session only exists
    /// locally until `reconcile_local_session` runs.
    local_only: bool,
  },
  /// A fresh session was started.
  Initialized {
    session_id: String,
    progress: SessionProgress,
    local_only: bool,
  },
  /// An open remote session exists but nothing corroborates it: no local
  /// state, no recorded exercises. Auto-resuming would be indistinguishable
  /// from starting fresh, and auto-abandoning from data loss, so the caller
  /// must ask the user.
  AwaitUserChoice { session_id: String },
}

pub struct Reconciler<L: SessionLedger> {
  ledger: L,
  primary: Arc<dyn ProgressStore>,
  backup: Arc<dyn ProgressStore>,
}

/// Merge the two local snapshots; the fresher `last_updated` wins, ties go to
/// the primary tier. Empty progress does not count as a snapshot.
fn reconcile_snapshots(
  primary: Option<SessionProgress>,
  backup: Option<SessionProgress>,
) -> Option<SessionProgress> {
  let merged = match (primary, backup) {
    (Some(p), Some(b)) => Some(p.fresher(b)),
    (p, b) => p.or(b),
  };
  merged.filter(|progress| !progress.is_empty())
}

impl<L: SessionLedger> Reconciler<L> {
  pub fn new(ledger: L, primary: Arc<dyn ProgressStore>, backup: Arc<dyn ProgressStore>) -> Self {
    Self {
      ledger,
      primary,
      backup,
    }
  }

  /// Probe all three stores and decide how this visit starts.
  pub async fn probe(&self, user_id: &str, workout_id: &str) -> Result<ResumeDecision> {
    let open = match self.ledger.find_open_session(user_id, workout_id).await {
      Ok(open) => open,
      Err(e) => {
        // Connectivity must never block training
        tracing::warn!("session ledger unreachable, continuing local-only: {e}");
        return self.probe_local_only();
      }
    };

    let session = match open {
      Some(session) => session,
      None => {
        // find_open_session returned nothing, so inserting here upholds the
        // one-open-session-per-(user, workout) invariant
        let session_id = self.ledger.create_session(user_id, workout_id).await?;
        let progress = SessionProgress::empty();
        self.primary.write(&session_id, &progress)?;
        self.backup.write(&session_id, &progress)?;

        return Ok(ResumeDecision::Initialized {
          session_id,
          progress,
          local_only: false,
        });
      }
    };

    let local = reconcile_snapshots(
      self.primary.read(&session.session_id)?,
      self.backup.read(&session.session_id)?,
    );
    if let Some(progress) = local {
      return Ok(ResumeDecision::Resumed {
        session_id: session.session_id,
        progress,
        local_only: false,
      });
    }

    // No local state. Recorded exercise rows on the ledger still mark the
    // session as real, though they carry no resumable position.
    match self.ledger.has_recorded_progress(&session.session_id).await {
      Ok(true) => Ok(ResumeDecision::Resumed {
        session_id: session.session_id,
        progress: SessionProgress::empty(),
        local_only: false,
      }),
      Ok(false) => Ok(ResumeDecision::AwaitUserChoice {
        session_id: session.session_id,
      }),
      Err(e) => {
        tracing::warn!("could not verify recorded progress: {e}");
        Ok(ResumeDecision::AwaitUserChoice {
          session_id: session.session_id,
        })
      }
    }
  }

  /// Ledger unreachable: trust whichever tier has data, otherwise start a
  /// session that exists only locally for now.
  fn probe_local_only(&self) -> Result<ResumeDecision> {
    let primary = self.primary.latest()?;
    let backup = self.backup.latest()?;

    let local = match (primary, backup) {
      (Some(p), Some(b)) => Some(if b.1.last_updated > p.1.last_updated { b } else { p }),
      (p, b) => p.or(b),
    };

    match local {
      Some((session_id, progress)) => Ok(ResumeDecision::Resumed {
        session_id,
        progress,
        local_only: true,
      }),
      None => {
        let session_id = Ulid::new().to_string();
        let progress = SessionProgress::empty();
        self.primary.write(&session_id, &progress)?;
        self.backup.write(&session_id, &progress)?;

        Ok(ResumeDecision::Initialized {
          session_id,
          progress,
          local_only: true,
        })
      }
    }
  }

  /// Re-attach a local-only session to the ledger once connectivity returns.
  /// Returns the remote session id, re-keying local state if it differs.
  ///
  /// Best-effort: if the original create had in fact landed before the
  /// perceived failure, a duplicate open session can remain behind; nothing
  /// here deduplicates it.
  pub async fn reconcile_local_session(
    &self,
    user_id: &str,
    workout_id: &str,
    local_id: &str,
  ) -> Result<String> {
    let remote_id = match self.ledger.find_open_session(user_id, workout_id).await? {
      Some(session) => session.session_id,
      None => self.ledger.create_session(user_id, workout_id).await?,
    };

    if remote_id != local_id {
      let snapshot = reconcile_snapshots(
        self.primary.read(local_id)?,
        self.backup.read(local_id)?,
      );
      if let Some(progress) = snapshot {
        self.primary.write(&remote_id, &progress)?;
        self.backup.write(&remote_id, &progress)?;
      }
      self.primary.clear(local_id)?;
      self.backup.clear(local_id)?;
    }

    Ok(remote_id)
  }

  /// Mirror a progress mutation into both local tiers. Fire-and-forget: the
  /// caller returns immediately and the writes settle in the background, so
  /// user interaction never waits on persistence.
  pub fn record(&self, session_id: &str, progress: &SessionProgress) {
    for store in [Arc::clone(&self.primary), Arc::clone(&self.backup)] {
      let session_id = session_id.to_string();
      let progress = progress.clone();

      tokio::spawn(async move {
        if let Err(e) = store.write(&session_id, &progress) {
          tracing::warn!("session state write for {} failed: {e}", session_id);
        }
      });
    }
  }

  /// Normal finish: persist the final exercise history, close the remote
  /// session, then clear both local tiers.
  pub async fn finish(&self, session_id: &str, entries: &[ExerciseEntry]) -> Result<()> {
    self.ledger.record_progress(session_id, entries).await?;
    self.ledger.close_session(session_id).await?;

    self.primary.clear(session_id)?;
    self.backup.clear(session_id)?;

    Ok(())
  }

  /// Explicit abandon, the discard arm of `AwaitUserChoice`: close the remote
  /// session and drop local state.
  pub async fn abandon(&self, session_id: &str) -> Result<()> {
    self.ledger.close_session(session_id).await?;

    self.primary.clear(session_id)?;
    self.backup.clear(session_id)?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::ledger::LedgerSession;
  use crate::session::progress::ExerciseRecord;
  use crate::session::store::MemoryProgressStore;
  use chrono::Utc;
  use color_eyre::eyre::eyre;
  use std::future::Future;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;

  #[derive(Default)]
  struct MockLedger {
    open: Mutex<Option<LedgerSession>>,
    create_calls: AtomicUsize,
    has_trail: AtomicBool,
    unreachable: AtomicBool,
    closed: Mutex<Vec<String>>,
    recorded: Mutex<Vec<(String, usize)>>,
  }

  impl MockLedger {
    fn with_open_session(session_id: &str) -> Self {
      let ledger = Self::default();
      *ledger.open.lock().unwrap() = Some(LedgerSession {
        session_id: session_id.to_string(),
        started_at: Utc::now(),
      });
      ledger
    }

    fn unreachable() -> Self {
      let ledger = Self::default();
      ledger.unreachable.store(true, Ordering::SeqCst);
      ledger
    }
  }

  impl SessionLedger for MockLedger {
    fn find_open_session(
      &self,
      _user_id: &str,
      _workout_id: &str,
    ) -> impl Future<Output = Result<Option<LedgerSession>>> + Send {
      let unreachable = self.unreachable.load(Ordering::SeqCst);
      let open = self.open.lock().unwrap().clone();
      async move {
        if unreachable {
          Err(eyre!("name resolution failed"))
        } else {
          Ok(open)
        }
      }
    }

    fn create_session(
      &self,
      _user_id: &str,
      _workout_id: &str,
    ) -> impl Future<Output = Result<String>> + Send {
      self.create_calls.fetch_add(1, Ordering::SeqCst);
      let session = LedgerSession {
        session_id: "remote-1".to_string(),
        started_at: Utc::now(),
      };
      *self.open.lock().unwrap() = Some(session);
      async move { Ok("remote-1".to_string()) }
    }

    fn record_progress(
      &self,
      session_id: &str,
      entries: &[ExerciseEntry],
    ) -> impl Future<Output = Result<()>> + Send {
      self
        .recorded
        .lock()
        .unwrap()
        .push((session_id.to_string(), entries.len()));
      async move { Ok(()) }
    }

    fn has_recorded_progress(&self, _session_id: &str) -> impl Future<Output = Result<bool>> + Send {
      let has_trail = self.has_trail.load(Ordering::SeqCst);
      async move { Ok(has_trail) }
    }

    fn close_session(&self, session_id: &str) -> impl Future<Output = Result<()>> + Send {
      self.closed.lock().unwrap().push(session_id.to_string());
      *self.open.lock().unwrap() = None;
      async move { Ok(()) }
    }
  }

  fn stores() -> (Arc<MemoryProgressStore>, Arc<MemoryProgressStore>) {
    (
      Arc::new(MemoryProgressStore::new()),
      Arc::new(MemoryProgressStore::new()),
    )
  }

  fn reconciler(
    ledger: Arc<MockLedger>,
    primary: Arc<MemoryProgressStore>,
    backup: Arc<MemoryProgressStore>,
  ) -> Reconciler<Arc<MockLedger>> {
    Reconciler::new(ledger, primary, backup)
  }

  fn progress_at_exercise(index: usize) -> SessionProgress {
    let mut progress = SessionProgress::empty();
    progress.current_exercise_index = index;
    progress.exercises_completed.insert(format!("ex-{}", index));
    progress.exercise_history.insert(
      format!("ex-{}", index),
      ExerciseRecord {
        sets_completed: 3,
        reps: 10,
        weight: None,
      },
    );
    progress
  }

  #[tokio::test]
  async fn test_no_open_session_initializes_fresh() {
    let ledger = Arc::new(MockLedger::default());
    let (primary, backup) = stores();
    let reconciler = reconciler(Arc::clone(&ledger), Arc::clone(&primary), Arc::clone(&backup));

    let decision = reconciler.probe("user-1", "workout-1").await.unwrap();

    match decision {
      ResumeDecision::Initialized {
        session_id,
        progress,
        local_only,
      } => {
        assert_eq!(session_id, "remote-1");
        assert!(progress.is_empty());
        assert!(!local_only);
      }
      other => panic!("expected Initialized, got {:?}", other),
    }

    // Empty progress lands in both tiers right away
    assert!(primary.read("remote-1").unwrap().is_some());
    assert!(backup.read("remote-1").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_never_creates_when_open_session_exists() {
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    ledger.has_trail.store(true, Ordering::SeqCst);
    let (primary, backup) = stores();
    let reconciler = reconciler(Arc::clone(&ledger), primary, backup);

    reconciler.probe("user-1", "workout-1").await.unwrap();

    assert_eq!(ledger.create_calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_resumes_fresher_local_snapshot() {
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    let (primary, backup) = stores();

    primary.write("sess-9", &progress_at_exercise(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    backup.write("sess-9", &progress_at_exercise(4)).unwrap();

    let reconciler = reconciler(ledger, primary, backup);
    let decision = reconciler.probe("user-1", "workout-1").await.unwrap();

    match decision {
      ResumeDecision::Resumed {
        session_id,
        progress,
        local_only,
      } => {
        assert_eq!(session_id, "sess-9");
        assert_eq!(progress.current_exercise_index, 4);
        assert!(!local_only);
      }
      other => panic!("expected Resumed, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_resumes_from_single_surviving_tier() {
    // One tier was cleared; the other still carries the session
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    let (primary, backup) = stores();
    backup.write("sess-9", &progress_at_exercise(2)).unwrap();

    let reconciler = reconciler(ledger, primary, backup);
    let decision = reconciler.probe("user-1", "workout-1").await.unwrap();

    match decision {
      ResumeDecision::Resumed { progress, .. } => {
        assert_eq!(progress.current_exercise_index, 2);
      }
      other => panic!("expected Resumed, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_remote_trail_resumes_with_empty_progress() {
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    ledger.has_trail.store(true, Ordering::SeqCst);
    let (primary, backup) = stores();
    let reconciler = reconciler(ledger, primary, backup);

    let decision = reconciler.probe("user-1", "workout-1").await.unwrap();

    match decision {
      ResumeDecision::Resumed { progress, .. } => assert!(progress.is_empty()),
      other => panic!("expected Resumed, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_bare_open_session_awaits_user_choice() {
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    let (primary, backup) = stores();
    let reconciler = reconciler(ledger, primary, backup);

    let decision = reconciler.probe("user-1", "workout-1").await.unwrap();

    assert_eq!(
      decision,
      ResumeDecision::AwaitUserChoice {
        session_id: "sess-9".to_string()
      }
    );
  }

  #[tokio::test]
  async fn test_empty_local_state_does_not_auto_resume() {
    // An initial empty blob is not evidence of training activity
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    let (primary, backup) = stores();
    primary.write("sess-9", &SessionProgress::empty()).unwrap();

    let reconciler = reconciler(ledger, primary, backup);
    let decision = reconciler.probe("user-1", "workout-1").await.unwrap();

    assert!(matches!(decision, ResumeDecision::AwaitUserChoice { .. }));
  }

  #[tokio::test]
  async fn test_unreachable_ledger_resumes_local_data() {
    let ledger = Arc::new(MockLedger::unreachable());
    let (primary, backup) = stores();
    primary.write("local-7", &progress_at_exercise(2)).unwrap();

    let reconciler = reconciler(ledger, primary, backup);
    let decision = reconciler.probe("user-1", "workout-1").await.unwrap();

    match decision {
      ResumeDecision::Resumed {
        session_id,
        progress,
        local_only,
      } => {
        assert_eq!(session_id, "local-7");
        assert_eq!(progress.current_exercise_index, 2);
        assert!(local_only);
      }
      other => panic!("expected local-only Resumed, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_unreachable_ledger_without_data_mints_local_session() {
    let ledger = Arc::new(MockLedger::unreachable());
    let (primary, backup) = stores();
    let reconciler = reconciler(ledger, Arc::clone(&primary), backup);

    let decision = reconciler.probe("user-1", "workout-1").await.unwrap();

    match decision {
      ResumeDecision::Initialized {
        session_id,
        local_only,
        ..
      } => {
        assert!(local_only);
        assert!(primary.read(&session_id).unwrap().is_some());
      }
      other => panic!("expected local-only Initialized, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_resume_then_walk_away_leaves_tiers_untouched() {
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    let (primary, backup) = stores();
    primary.write("sess-9", &progress_at_exercise(3)).unwrap();
    backup.write("sess-9", &progress_at_exercise(1)).unwrap();

    let before_primary = primary.read("sess-9").unwrap();
    let before_backup = backup.read("sess-9").unwrap();

    let reconciler = reconciler(ledger, Arc::clone(&primary), Arc::clone(&backup));
    reconciler.probe("user-1", "workout-1").await.unwrap();

    // Probing resumes without writing; an early exit changes nothing
    assert_eq!(primary.read("sess-9").unwrap(), before_primary);
    assert_eq!(backup.read("sess-9").unwrap(), before_backup);
  }

  #[tokio::test]
  async fn test_record_mirrors_into_both_tiers() {
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    let (primary, backup) = stores();
    let reconciler = reconciler(ledger, Arc::clone(&primary), Arc::clone(&backup));

    reconciler.record("sess-9", &progress_at_exercise(5));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
      primary.read("sess-9").unwrap().unwrap().current_exercise_index,
      5
    );
    assert_eq!(
      backup.read("sess-9").unwrap().unwrap().current_exercise_index,
      5
    );
  }

  #[tokio::test]
  async fn test_finish_closes_ledger_and_clears_tiers() {
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    let (primary, backup) = stores();
    primary.write("sess-9", &progress_at_exercise(3)).unwrap();
    backup.write("sess-9", &progress_at_exercise(3)).unwrap();

    let reconciler = reconciler(Arc::clone(&ledger), Arc::clone(&primary), Arc::clone(&backup));
    let entries = vec![ExerciseEntry {
      exercise_id: "ex-3".to_string(),
      sets_completed: 3,
      reps: 10,
      weight: None,
    }];
    reconciler.finish("sess-9", &entries).await.unwrap();

    assert_eq!(*ledger.closed.lock().unwrap(), vec!["sess-9"]);
    assert_eq!(*ledger.recorded.lock().unwrap(), vec![("sess-9".to_string(), 1)]);
    assert!(primary.read("sess-9").unwrap().is_none());
    assert!(backup.read("sess-9").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_abandon_closes_ledger_and_clears_tiers() {
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    let (primary, backup) = stores();
    primary.write("sess-9", &SessionProgress::empty()).unwrap();

    let reconciler = reconciler(Arc::clone(&ledger), Arc::clone(&primary), backup);
    reconciler.abandon("sess-9").await.unwrap();

    assert_eq!(*ledger.closed.lock().unwrap(), vec!["sess-9"]);
    assert!(primary.read("sess-9").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_reconcile_local_session_rekeys_state() {
    let ledger = Arc::new(MockLedger::default());
    let (primary, backup) = stores();
    primary.write("local-7", &progress_at_exercise(2)).unwrap();

    let reconciler = reconciler(Arc::clone(&ledger), Arc::clone(&primary), Arc::clone(&backup));
    let remote_id = reconciler
      .reconcile_local_session("user-1", "workout-1", "local-7")
      .await
      .unwrap();

    assert_eq!(remote_id, "remote-1");
    assert!(primary.read("local-7").unwrap().is_none());
    assert_eq!(
      primary.read("remote-1").unwrap().unwrap().current_exercise_index,
      2
    );
    assert_eq!(
      backup.read("remote-1").unwrap().unwrap().current_exercise_index,
      2
    );
  }

  #[tokio::test]
  async fn test_reconcile_local_session_reuses_existing_remote() {
    let ledger = Arc::new(MockLedger::with_open_session("sess-9"));
    let (primary, backup) = stores();
    primary.write("sess-9", &progress_at_exercise(2)).unwrap();

    let reconciler = reconciler(Arc::clone(&ledger), Arc::clone(&primary), backup);
    let remote_id = reconciler
      .reconcile_local_session("user-1", "workout-1", "sess-9")
      .await
      .unwrap();

    assert_eq!(remote_id, "sess-9");
    assert_eq!(ledger.create_calls.load(Ordering::SeqCst), 0);
    assert!(primary.read("sess-9").unwrap().is_some());
  }
}
