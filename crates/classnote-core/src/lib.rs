//! Offline caching worker for the ClassNote web application.
//!
//! The worker sits between the application and the network. It
//! pre-populates a versioned response cache on install, evicts stale
//! versions on activate, answers requests cache-first with a fallback
//! to the cached root document when offline, and turns push messages
//! into notifications.
//!
//! Platform services (opening windows, showing notifications, claiming
//! pages) are reached through the [`host::Host`] trait; the network is
//! reached through [`network::Fetcher`].

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod http;
pub mod network;
pub mod notification;
pub mod worker;

pub use cache::{CacheStorage, CacheStore, CachedResponse};
pub use config::{OfflineFallback, StaticAssetPolicy, WorkerConfig};
pub use dispatch::WorkerHandle;
pub use error::{FetchError, WorkerError};
pub use host::{Host, HostCall, LoggingHost};
pub use http::{Request, RequestKey, RequestMode, Response, ResponseType};
pub use network::{Fetcher, HttpFetcher};
pub use notification::{Notification, NotificationClick, PushPayload};
pub use worker::{
    ActivateReport, CacheWorker, FetchOutcome, InstallReport, ResponseSource, WorkerState,
};
