//! Cache worker: runs the interception loop in its own task.
//!
//! The worker owns the gateway and talks to the rest of the app only through
//! messages, mirroring how request interception runs outside the UI thread.
//! Each fetch is answered concurrently; control messages steer the cache
//! generation lifecycle.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::gateway::FetchGateway;
use super::traits::{FetchOutcome, RequestKey, RequestKind, Transport};

#[derive(Debug)]
pub enum WorkerMessage {
  /// Route a request through the gateway and reply with the outcome.
  Fetch {
    key: RequestKey,
    kind: RequestKind,
    reply: oneshot::Sender<Result<FetchOutcome>>,
  },
  /// Force immediate activation of the newly installed cache generation,
  /// superseding the default activate-on-next-start behavior.
  SkipWaiting,
}

/// Page-side handle to the cache worker.
#[derive(Clone)]
pub struct CacheWorkerHandle {
  tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl CacheWorkerHandle {
  /// Spawn the worker. Install (static precache) runs before the loop starts
  /// serving; when `activate_on_start` is false, stale generations survive
  /// until a `SkipWaiting` message arrives.
  pub fn spawn<T>(gateway: FetchGateway<T>, manifest: Vec<String>, activate_on_start: bool) -> Self
  where
    T: Transport + 'static,
  {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let gateway = Arc::new(gateway);

    tokio::spawn(async move {
      if let Err(e) = gateway.install(&manifest).await {
        tracing::warn!("static precache failed: {e}");
      }

      let mut activated = false;
      if activate_on_start {
        if let Err(e) = gateway.activate() {
          tracing::warn!("cache activation failed: {e}");
        } else {
          activated = true;
        }
      }

      while let Some(message) = rx.recv().await {
        match message {
          WorkerMessage::Fetch { key, kind, reply } => {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
              // Receiver may have navigated away; nothing to do then
              let _ = reply.send(gateway.fetch(&key, kind).await);
            });
          }
          WorkerMessage::SkipWaiting => {
            if !activated {
              match gateway.activate() {
                Ok(()) => activated = true,
                Err(e) => tracing::warn!("cache activation failed: {e}"),
              }
            }
          }
        }
      }
    });

    Self { tx }
  }

  /// Fetch through the worker.
  pub async fn fetch(&self, key: RequestKey, kind: RequestKind) -> Result<FetchOutcome> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(WorkerMessage::Fetch { key, kind, reply })
      .map_err(|_| eyre!("cache worker has shut down"))?;

    rx.await.map_err(|_| eyre!("cache worker dropped the request"))?
  }

  /// Send the skip-waiting control message.
  pub fn skip_waiting(&self) -> Result<()> {
    self
      .tx
      .send(WorkerMessage::SkipWaiting)
      .map_err(|_| eyre!("cache worker has shut down"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::CacheEntryStore;
  use crate::cache::traits::CachedResponse;
  use crate::config::{BackendConfig, CacheConfig, Config};
  use std::future::Future;
  use std::time::Duration;

  struct EchoTransport;

  impl Transport for EchoTransport {
    fn fetch(&self, key: &RequestKey) -> impl Future<Output = Result<CachedResponse>> + Send {
      let body = key.url.clone().into_bytes();
      async move {
        Ok(CachedResponse {
          status: 200,
          headers: Vec::new(),
          body,
        })
      }
    }
  }

  fn test_config() -> Config {
    Config {
      backend: BackendConfig {
        origin: "https://app.example.com".to_string(),
        api_prefix: "/api/".to_string(),
        data_host: "data.example.com".to_string(),
      },
      cache: CacheConfig::default(),
    }
  }

  fn test_store() -> (tempfile::TempDir, Arc<CacheEntryStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CacheEntryStore::open(&dir.path().join("cache.db")).unwrap());
    (dir, store)
  }

  #[tokio::test]
  async fn test_fetch_roundtrip_through_worker() {
    let (_dir, store) = test_store();
    let gateway = FetchGateway::new(EchoTransport, store, &test_config()).unwrap();
    let handle = CacheWorkerHandle::spawn(gateway, Vec::new(), true);

    let key = RequestKey::get("https://app.example.com/dashboard");
    let outcome = handle.fetch(key, RequestKind::Navigation).await.unwrap();

    assert!(outcome.is_from_network());
    assert_eq!(
      outcome.response().unwrap().body,
      b"https://app.example.com/dashboard"
    );
  }

  #[tokio::test]
  async fn test_install_precaches_manifest_before_serving() {
    let (_dir, store) = test_store();
    let gateway = FetchGateway::new(EchoTransport, Arc::clone(&store), &test_config()).unwrap();
    let handle = CacheWorkerHandle::spawn(gateway, vec!["/offline.html".to_string()], true);

    // First fetch is only answered after install completed
    let key = RequestKey::get("https://app.example.com/offline.html");
    let outcome = handle.fetch(key.clone(), RequestKind::Navigation).await.unwrap();

    assert_eq!(outcome, FetchOutcome::Cache(store.get("trainloop-static-v1", &key).unwrap().unwrap()));
  }

  #[tokio::test]
  async fn test_skip_waiting_forces_activation() {
    let (_dir, store) = test_store();
    let key = RequestKey::get("https://app.example.com/old");
    store
      .put(
        "trainloop-static-v0",
        &key,
        &CachedResponse {
          status: 200,
          headers: Vec::new(),
          body: b"old".to_vec(),
        },
      )
      .unwrap();

    let gateway = FetchGateway::new(EchoTransport, Arc::clone(&store), &test_config()).unwrap();
    let handle = CacheWorkerHandle::spawn(gateway, Vec::new(), false);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Old generation survives until the page opts in
    assert!(store.get("trainloop-static-v0", &key).unwrap().is_some());

    handle.skip_waiting().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(store.get("trainloop-static-v0", &key).unwrap().is_none());
  }
}
