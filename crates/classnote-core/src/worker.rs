//! The Cache Manager.
//!
//! `CacheWorker` decides, for every intercepted request, whether to
//! answer from the current cache generation or from the network, and
//! keeps the cache aligned with the application version:
//!
//! - **install** pre-populates the current generation from the asset manifest
//! - **activate** evicts every older generation and claims open pages
//! - **fetch** is cache-first, storing complete same-origin responses on
//!   a miss and falling back to the cached root document when offline
//! - **push** / **notification click** surface push messages to the user
//!
//! All configuration arrives through the constructor.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, CacheStore};
use crate::config::{OfflineFallback, StaticAssetPolicy, WorkerConfig};
use crate::error::{FetchError, WorkerError};
use crate::host::Host;
use crate::http::{Request, Response};
use crate::network::Fetcher;
use crate::notification::{Notification, NotificationClick, PushPayload};

/// Sync tag the application registers for deferred work.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

// ============================================================================
// Worker State
// ============================================================================

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Created, no lifecycle event handled yet
    Parsed,
    Installing,
    Installed,
    Activating,
    /// Active and controlling pages
    Activated,
    /// Install failed; this worker will never control pages
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Parsed => write!(f, "parsed"),
            WorkerState::Installing => write!(f, "installing"),
            WorkerState::Installed => write!(f, "installed"),
            WorkerState::Activating => write!(f, "activating"),
            WorkerState::Activated => write!(f, "activated"),
            WorkerState::Redundant => write!(f, "redundant"),
        }
    }
}

// ============================================================================
// Event Results
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    pub cached: Vec<Url>,
    pub skipped: Vec<Url>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
    pub clients_claimed: usize,
}

/// Where a response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    /// Cached root document served in place of an unreachable page
    NavigationFallback,
    /// Synthetic 503 placeholder
    Offline,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSource::Cache => write!(f, "cache"),
            ResponseSource::Network => write!(f, "network"),
            ResponseSource::NavigationFallback => write!(f, "navigation fallback"),
            ResponseSource::Offline => write!(f, "offline placeholder"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Not intercepted; the host handles the request as if no worker existed
    PassThrough,
    Respond {
        response: Response,
        source: ResponseSource,
    },
}

// ============================================================================
// Cache Worker
// ============================================================================

pub struct CacheWorker {
    config: WorkerConfig,
    generation: String,
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    host: Arc<dyn Host>,
    state: RwLock<WorkerState>,
    /// Cache writes still running after their response was returned
    background: TaskTracker,
}

impl CacheWorker {
    pub fn new(
        config: WorkerConfig,
        storage: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        host: Arc<dyn Host>,
    ) -> Result<Self, WorkerError> {
        config.validate()?;
        let generation = config.generation();
        Ok(Self {
            config,
            generation,
            storage,
            fetcher,
            host,
            state: RwLock::new(WorkerState::Parsed),
            background: TaskTracker::new(),
        })
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.storage
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, new_state: WorkerState) {
        let mut state = self.state.write().await;
        let old_state = *state;
        if old_state != new_state {
            debug!(from = %old_state, to = %new_state, "Worker state change");
            *state = new_state;
        }
    }

    async fn ensure_not_redundant(&self) -> Result<(), WorkerError> {
        let state = self.state().await;
        if state == WorkerState::Redundant {
            return Err(WorkerError::InvalidState {
                expected: "non-redundant",
                actual: state,
            });
        }
        Ok(())
    }

    // ===== Install =====

    /// Open the current generation and pre-populate it from the manifest.
    ///
    /// Static assets follow the configured [`StaticAssetPolicy`]. External
    /// assets are always isolated: one unreachable CDN never blocks
    /// installation. On success the host is asked to skip waiting.
    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        self.ensure_not_redundant().await?;
        self.set_state(WorkerState::Installing).await;
        info!(generation = %self.generation, "Installing");

        match self.populate().await {
            Ok(report) => {
                self.set_state(WorkerState::Installed).await;
                info!(
                    generation = %self.generation,
                    cached = report.cached.len(),
                    skipped = report.skipped.len(),
                    "Install complete"
                );
                self.host.skip_waiting().await;
                Ok(report)
            }
            Err(e) => {
                warn!(generation = %self.generation, error = %e, "Install failed");
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn populate(&self) -> Result<InstallReport, WorkerError> {
        let store = self.storage.open(&self.generation).await?;
        let statics = self.config.resolved_static_assets()?;
        let externals = self.config.resolved_external_assets()?;

        let (static_results, external_results) = futures::join!(
            self.fetch_all(&statics),
            self.fetch_all(&externals)
        );

        let mut report = InstallReport {
            generation: self.generation.clone(),
            ..Default::default()
        };
        let mut to_store = Vec::new();

        for (url, result) in statics.into_iter().zip(static_results) {
            let outcome = match result {
                Ok(response) if response.ok() => Ok(response),
                Ok(response) => Err(FetchError::Status {
                    status: response.status,
                    url: url.to_string(),
                }),
                Err(e) => Err(e),
            };
            match (outcome, self.config.static_asset_policy) {
                (Ok(response), _) => to_store.push((Request::get(url), response)),
                (Err(e), StaticAssetPolicy::AllOrNothing) => {
                    return Err(WorkerError::InstallAborted {
                        url: url.to_string(),
                        reason: e.to_string(),
                    });
                }
                (Err(e), StaticAssetPolicy::PerAsset) => {
                    warn!(url = %url, error = %e, "Failed to cache");
                    report.skipped.push(url);
                }
            }
        }

        for (url, result) in externals.into_iter().zip(external_results) {
            match result {
                Ok(response) if response.ok() => to_store.push((Request::get(url), response)),
                Ok(response) => {
                    debug!(url = %url, status = response.status, "Not caching unsuccessful response");
                    report.skipped.push(url);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to cache");
                    report.skipped.push(url);
                }
            }
        }

        report.cached = to_store.iter().map(|(req, _)| req.url.clone()).collect();
        store.put_all(to_store).await?;
        Ok(report)
    }

    async fn fetch_all(&self, urls: &[Url]) -> Vec<Result<Response, FetchError>> {
        join_all(urls.iter().map(|url| {
            let request = Request::get(url.clone());
            async move { self.fetcher.fetch(&request).await }
        }))
        .await
    }

    // ===== Activate =====

    /// Evict every generation this application owns except the current
    /// one, then take control of open pages.
    pub async fn activate(&self) -> Result<ActivateReport, WorkerError> {
        self.ensure_not_redundant().await?;
        self.set_state(WorkerState::Activating).await;
        info!(generation = %self.generation, "Activating");

        let stale: Vec<String> = self
            .storage
            .keys()
            .await
            .into_iter()
            .filter(|name| name != &self.generation && self.config.owns_generation(name))
            .collect();

        let mut deleted = Vec::with_capacity(stale.len());
        for name in stale {
            if self.storage.delete(&name).await? {
                info!(generation = %name, "Evicted stale generation");
                deleted.push(name);
            }
        }

        let clients_claimed = self.host.claim_clients().await;
        self.set_state(WorkerState::Activated).await;

        Ok(ActivateReport {
            deleted,
            clients_claimed,
        })
    }

    // ===== Fetch =====

    /// Decide how to answer one intercepted request.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchOutcome, WorkerError> {
        if request.method != Method::GET || !request.is_network_scheme() {
            debug!(url = %request.url, method = %request.method, "Passing through");
            return Ok(FetchOutcome::PassThrough);
        }

        if let Some(response) = self.lookup(&request).await {
            debug!(url = %request.url, "Cache hit");
            return Ok(FetchOutcome::Respond {
                response,
                source: ResponseSource::Cache,
            });
        }

        match self.fetcher.fetch(&request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.store_in_background(request, response.clone());
                }
                Ok(FetchOutcome::Respond {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                warn!(url = %request.url, error = %e, "Network fetch failed");
                self.offline_response(&request, e).await
            }
        }
    }

    async fn lookup(&self, request: &Request) -> Option<Response> {
        let store = self.current_store().await?;
        store.match_request(request).await
    }

    async fn current_store(&self) -> Option<Arc<CacheStore>> {
        self.storage.get(&self.generation).await
    }

    fn store_in_background(&self, request: Request, response: Response) {
        let storage = Arc::clone(&self.storage);
        let generation = self.generation.clone();
        self.background.spawn(async move {
            let result = match storage.open(&generation).await {
                Ok(store) => store.put(&request, response).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(url = %request.url, error = %e, "Failed to store response");
            }
        });
    }

    async fn offline_response(
        &self,
        request: &Request,
        error: FetchError,
    ) -> Result<FetchOutcome, WorkerError> {
        if request.is_navigation() {
            let root = Request::get(self.config.resolve(&self.config.root_document)?);
            if let Some(response) = self.lookup(&root).await {
                debug!(url = %request.url, "Serving cached root document");
                return Ok(FetchOutcome::Respond {
                    response,
                    source: ResponseSource::NavigationFallback,
                });
            }
        }

        match self.config.offline_fallback {
            OfflineFallback::ServiceUnavailable => Ok(FetchOutcome::Respond {
                response: Response::offline(),
                source: ResponseSource::Offline,
            }),
            OfflineFallback::Propagate => Err(error.into()),
        }
    }

    /// Resolve once every background cache write has finished.
    pub async fn wait_until_idle(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    // ===== Sync =====

    /// Background sync is acknowledged but performs no work. Returns
    /// whether the tag was recognised.
    pub async fn handle_sync(&self, tag: &str) -> bool {
        if tag == BACKGROUND_SYNC_TAG {
            info!(tag, "Background sync triggered");
            true
        } else {
            debug!(tag, "Ignoring unknown sync tag");
            false
        }
    }

    // ===== Push / Notifications =====

    /// Show a notification for a push message. A message without a
    /// payload shows nothing.
    pub async fn handle_push(
        &self,
        payload: Option<&[u8]>,
    ) -> Result<Option<Notification>, WorkerError> {
        let Some(raw) = payload else {
            debug!("Push without payload");
            return Ok(None);
        };

        let payload = PushPayload::parse(raw).inspect_err(|e| {
            warn!(error = %e, "Dropping push message");
        })?;
        let notification = Notification::from_payload(payload);
        self.host
            .show_notification(&notification)
            .await
            .map_err(|e| WorkerError::Host(e.to_string()))?;
        Ok(Some(notification))
    }

    /// Close the clicked notification and open the app unless the click
    /// was on a non-open action. Returns whether a window was opened.
    pub async fn handle_notification_click(
        &self,
        click: NotificationClick,
    ) -> Result<bool, WorkerError> {
        self.host.close_notification(&click.notification).await;
        if !click.opens_app() {
            return Ok(false);
        }

        let root = self.config.resolve(&self.config.app_root)?;
        self.host
            .open_window(&root)
            .await
            .map_err(|e| WorkerError::Host(e.to_string()))?;
        Ok(true)
    }
}

impl fmt::Debug for CacheWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheWorker")
            .field("generation", &self.generation)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
