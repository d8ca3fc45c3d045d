//! Remote session ledger: the authoritative record of session existence and
//! completion. Consumed over HTTP; the storage engine behind it is not ours.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use url::Url;

/// An open session as the ledger reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSession {
  pub session_id: String,
  pub started_at: DateTime<Utc>,
}

/// One finished exercise, as persisted to the ledger when a session closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseEntry {
  pub exercise_id: String,
  pub sets_completed: u32,
  pub reps: u32,
  #[serde(default)]
  pub weight: Option<f64>,
}

/// The ledger seam. At most one open session may exist per
/// (user, workout) pair; callers uphold this by probing with
/// `find_open_session` before ever calling `create_session`.
pub trait SessionLedger: Send + Sync {
  fn find_open_session(
    &self,
    user_id: &str,
    workout_id: &str,
  ) -> impl Future<Output = Result<Option<LedgerSession>>> + Send;

  fn create_session(
    &self,
    user_id: &str,
    workout_id: &str,
  ) -> impl Future<Output = Result<String>> + Send;

  fn record_progress(
    &self,
    session_id: &str,
    entries: &[ExerciseEntry],
  ) -> impl Future<Output = Result<()>> + Send;

  /// Whether any exercise rows were recorded for this session. Used as a
  /// corroborating signal when both local tiers are empty.
  fn has_recorded_progress(&self, session_id: &str) -> impl Future<Output = Result<bool>> + Send;

  fn close_session(&self, session_id: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<L: SessionLedger> SessionLedger for Arc<L> {
  fn find_open_session(
    &self,
    user_id: &str,
    workout_id: &str,
  ) -> impl Future<Output = Result<Option<LedgerSession>>> + Send {
    (**self).find_open_session(user_id, workout_id)
  }

  fn create_session(
    &self,
    user_id: &str,
    workout_id: &str,
  ) -> impl Future<Output = Result<String>> + Send {
    (**self).create_session(user_id, workout_id)
  }

  fn record_progress(
    &self,
    session_id: &str,
    entries: &[ExerciseEntry],
  ) -> impl Future<Output = Result<()>> + Send {
    (**self).record_progress(session_id, entries)
  }

  fn has_recorded_progress(&self, session_id: &str) -> impl Future<Output = Result<bool>> + Send {
    (**self).has_recorded_progress(session_id)
  }

  fn close_session(&self, session_id: &str) -> impl Future<Output = Result<()>> + Send {
    (**self).close_session(session_id)
  }
}

/// Ledger client for the backend REST routes.
#[derive(Clone)]
pub struct HttpSessionLedger {
  client: reqwest::Client,
  base_url: Url,
}

#[derive(Deserialize)]
struct ApiSession {
  session_id: String,
  started_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ApiCreated {
  session_id: String,
}

#[derive(Deserialize)]
struct ApiCount {
  count: u64,
}

impl HttpSessionLedger {
  pub fn new(base_url: &str) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid ledger base URL {}: {}", base_url, e))?;

    Ok(Self {
      client: reqwest::Client::new(),
      base_url,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid ledger endpoint {}: {}", path, e))
  }
}

impl SessionLedger for HttpSessionLedger {
  fn find_open_session(
    &self,
    user_id: &str,
    workout_id: &str,
  ) -> impl Future<Output = Result<Option<LedgerSession>>> + Send {
    let endpoint = self.endpoint("api/sessions/open");
    let client = self.client.clone();
    let query = [
      ("user_id", user_id.to_string()),
      ("workout_id", workout_id.to_string()),
    ];

    async move {
      let response = client
        .get(endpoint?)
        .query(&query)
        .send()
        .await
        .map_err(|e| eyre!("Failed to query open session: {}", e))?;

      if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
      }

      let session: ApiSession = response
        .error_for_status()
        .map_err(|e| eyre!("Open-session query rejected: {}", e))?
        .json()
        .await
        .map_err(|e| eyre!("Failed to parse open session: {}", e))?;

      Ok(Some(LedgerSession {
        session_id: session.session_id,
        started_at: session.started_at,
      }))
    }
  }

  fn create_session(
    &self,
    user_id: &str,
    workout_id: &str,
  ) -> impl Future<Output = Result<String>> + Send {
    let endpoint = self.endpoint("api/sessions");
    let client = self.client.clone();
    let body = serde_json::json!({
      "user_id": user_id,
      "workout_id": workout_id,
      "started_at": Utc::now(),
      "completed": false,
    });

    async move {
      let created: ApiCreated = client
        .post(endpoint?)
        .json(&body)
        .send()
        .await
        .map_err(|e| eyre!("Failed to create session: {}", e))?
        .error_for_status()
        .map_err(|e| eyre!("Session creation rejected: {}", e))?
        .json()
        .await
        .map_err(|e| eyre!("Failed to parse created session: {}", e))?;

      Ok(created.session_id)
    }
  }

  fn record_progress(
    &self,
    session_id: &str,
    entries: &[ExerciseEntry],
  ) -> impl Future<Output = Result<()>> + Send {
    let endpoint = self.endpoint(&format!("api/sessions/{}/exercises", session_id));
    let client = self.client.clone();
    let entries = entries.to_vec();

    async move {
      client
        .post(endpoint?)
        .json(&entries)
        .send()
        .await
        .map_err(|e| eyre!("Failed to record exercise history: {}", e))?
        .error_for_status()
        .map_err(|e| eyre!("Exercise history rejected: {}", e))?;

      Ok(())
    }
  }

  fn has_recorded_progress(&self, session_id: &str) -> impl Future<Output = Result<bool>> + Send {
    let endpoint = self.endpoint(&format!("api/sessions/{}/exercises/count", session_id));
    let client = self.client.clone();

    async move {
      let counted: ApiCount = client
        .get(endpoint?)
        .send()
        .await
        .map_err(|e| eyre!("Failed to count exercise history: {}", e))?
        .error_for_status()
        .map_err(|e| eyre!("Exercise count rejected: {}", e))?
        .json()
        .await
        .map_err(|e| eyre!("Failed to parse exercise count: {}", e))?;

      Ok(counted.count > 0)
    }
  }

  fn close_session(&self, session_id: &str) -> impl Future<Output = Result<()>> + Send {
    let endpoint = self.endpoint(&format!("api/sessions/{}/close", session_id));
    let client = self.client.clone();

    async move {
      client
        .post(endpoint?)
        .json(&serde_json::json!({ "completed": true }))
        .send()
        .await
        .map_err(|e| eyre!("Failed to close session: {}", e))?
        .error_for_status()
        .map_err(|e| eyre!("Session close rejected: {}", e))?;

      Ok(())
    }
  }
}
