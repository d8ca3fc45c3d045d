//! Fetch gateway: classifies intercepted requests and applies a caching
//! strategy.
//!
//! Backend API and data-host requests go network-first (live data when
//! possible, cache when offline); everything else goes cache-first (app shell
//! and assets never touch the network once cached).

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use url::Url;

use crate::config::Config;

use super::store::CacheEntryStore;
use super::traits::{CachedResponse, FetchOutcome, RequestKey, RequestKind, Transport};

pub struct FetchGateway<T: Transport> {
  transport: T,
  store: Arc<CacheEntryStore>,
  origin: Url,
  api_prefix: String,
  data_host: String,
  static_partition: String,
  dynamic_partition: String,
  dynamic_limit: usize,
  offline_page: String,
  placeholder_icon: String,
}

impl<T: Transport> FetchGateway<T> {
  pub fn new(transport: T, store: Arc<CacheEntryStore>, config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.backend.origin)
      .map_err(|e| eyre!("Invalid origin {}: {}", config.backend.origin, e))?;

    Ok(Self {
      transport,
      store,
      origin,
      api_prefix: config.backend.api_prefix.clone(),
      data_host: config.backend.data_host.clone(),
      static_partition: config.cache.static_partition.clone(),
      dynamic_partition: config.cache.dynamic_partition.clone(),
      dynamic_limit: config.cache.dynamic_limit,
      offline_page: config.cache.offline_page.clone(),
      placeholder_icon: config.cache.placeholder_icon.clone(),
    })
  }

  /// Route a request through the strategy its URL classifies into.
  pub async fn fetch(&self, key: &RequestKey, kind: RequestKind) -> Result<FetchOutcome> {
    if self.is_api_request(&key.url) {
      self.network_first(key, kind).await
    } else {
      self.cache_first(key, kind).await
    }
  }

  /// Backend API routes and the data-backend host get live data first.
  fn is_api_request(&self, url: &str) -> bool {
    match Url::parse(url) {
      Ok(parsed) => {
        parsed.path().contains(&self.api_prefix)
          || parsed
            .host_str()
            .is_some_and(|host| host.contains(&self.data_host))
      }
      Err(_) => false,
    }
  }

  /// Cross-origin responses never enter the dynamic partition.
  fn is_same_origin(&self, url: &str) -> bool {
    match Url::parse(url) {
      Ok(parsed) => parsed.origin() == self.origin.origin(),
      Err(_) => false,
    }
  }

  async fn network_first(&self, key: &RequestKey, kind: RequestKind) -> Result<FetchOutcome> {
    match self.transport.fetch(key).await {
      Ok(response) => {
        if key.is_cacheable() {
          self.write_dynamic_detached(key, &response);
        }
        Ok(FetchOutcome::Network(response))
      }
      Err(e) => {
        tracing::debug!("network-first fetch for {} failed, probing cache: {e}", key.url);

        if let Some(cached) = self.lookup(key)? {
          return Ok(FetchOutcome::Cache(cached));
        }
        if kind == RequestKind::Navigation {
          if let Some(page) = self.offline_page()? {
            return Ok(FetchOutcome::Fallback(page));
          }
        }
        Ok(FetchOutcome::Offline(CachedResponse::offline_json()))
      }
    }
  }

  async fn cache_first(&self, key: &RequestKey, kind: RequestKind) -> Result<FetchOutcome> {
    if let Some(cached) = self.lookup(key)? {
      return Ok(FetchOutcome::Cache(cached));
    }

    match self.transport.fetch(key).await {
      Ok(response) => {
        // Only complete same-origin responses are worth keeping
        if key.is_cacheable() && response.status == 200 && self.is_same_origin(&key.url) {
          self.write_dynamic_detached(key, &response);
        }
        Ok(FetchOutcome::Network(response))
      }
      Err(e) => {
        tracing::debug!("cache-first fetch for {} failed: {e}", key.url);

        match kind {
          RequestKind::Navigation => match self.offline_page()? {
            Some(page) => Ok(FetchOutcome::Fallback(page)),
            None => Ok(FetchOutcome::Unavailable),
          },
          RequestKind::Image => {
            let icon_key = self.asset_key(&self.placeholder_icon)?;
            match self.lookup(&icon_key)? {
              Some(icon) => Ok(FetchOutcome::Fallback(icon)),
              None => Ok(FetchOutcome::Unavailable),
            }
          }
          RequestKind::Other => Ok(FetchOutcome::Unavailable),
        }
      }
    }
  }

  /// Seed the static partition from the manifest. All-or-nothing: a single
  /// failed asset fails the install.
  pub async fn install(&self, manifest: &[String]) -> Result<()> {
    for path in manifest {
      let key = self.asset_key(path)?;
      let response = self.transport.fetch(&key).await?;
      self.store.put(&self.static_partition, &key, &response)?;
    }

    tracing::info!("precached {} static assets", manifest.len());
    Ok(())
  }

  /// Reclaim partitions from previous deployments; only the current
  /// generation's names survive.
  pub fn activate(&self) -> Result<()> {
    self
      .store
      .purge_partitions_except(&[&self.static_partition, &self.dynamic_partition])
  }

  /// Current static partition takes precedence, then current dynamic, then
  /// any other partition: entries from a not-yet-purged previous generation
  /// still count as hits until activation reclaims them.
  fn lookup(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    if let Some(hit) = self.store.get(&self.static_partition, key)? {
      return Ok(Some(hit));
    }
    if let Some(hit) = self.store.get(&self.dynamic_partition, key)? {
      return Ok(Some(hit));
    }
    self.store.get_any(key)
  }

  fn offline_page(&self) -> Result<Option<CachedResponse>> {
    let key = self.asset_key(&self.offline_page)?;
    self.lookup(&key)
  }

  fn asset_key(&self, path: &str) -> Result<RequestKey> {
    let url = self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid manifest path {}: {}", path, e))?;
    Ok(RequestKey::get(url.as_str()))
  }

  /// Write into the dynamic partition and settle the eviction bound, detached
  /// from the caller: the response has already been returned.
  fn write_dynamic_detached(&self, key: &RequestKey, response: &CachedResponse) {
    let store = Arc::clone(&self.store);
    let key = key.clone();
    let response = response.clone();
    let partition = self.dynamic_partition.clone();
    let limit = self.dynamic_limit;

    tokio::spawn(async move {
      let result = store
        .put(&partition, &key, &response)
        .and_then(|_| store.evict_oldest_if_over(&partition, limit));
      if let Err(e) = result {
        tracing::warn!("dynamic cache write for {} failed: {e}", key.url);
      }
    });
  }
}
