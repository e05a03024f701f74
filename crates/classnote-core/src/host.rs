//! Platform collaborators the worker calls out to.
//!
//! Replacing a running worker, taking control of open pages, and showing
//! notifications all belong to the hosting environment. The worker only
//! asks for them through [`Host`].

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;
use url::Url;

use crate::notification::Notification;

#[async_trait]
pub trait Host: Send + Sync {
    /// Activate the new worker without waiting for pages to reload.
    async fn skip_waiting(&self);

    /// Take control of every open page. Returns how many were claimed.
    async fn claim_clients(&self) -> usize;

    async fn show_notification(&self, notification: &Notification) -> Result<()>;

    async fn close_notification(&self, notification: &Notification);

    async fn open_window(&self, url: &Url) -> Result<()>;
}

/// Something the worker asked the host to do.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    SkipWaiting,
    ClaimClients,
    ShowNotification(Notification),
    CloseNotification(String),
    OpenWindow(Url),
}

/// Host that logs every request and remembers it.
///
/// Stands in for a browser when the worker runs from the command line;
/// the recorded calls make it useful in tests too.
#[derive(Debug, Default)]
pub struct LoggingHost {
    clients: usize,
    calls: Mutex<Vec<HostCall>>,
}

impl LoggingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend this many pages are open when clients are claimed.
    pub fn with_clients(mut self, clients: usize) -> Self {
        self.clients = clients;
        self
    }

    pub async fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: HostCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl Host for LoggingHost {
    async fn skip_waiting(&self) {
        info!("Skip waiting requested");
        self.record(HostCall::SkipWaiting).await;
    }

    async fn claim_clients(&self) -> usize {
        info!(clients = self.clients, "Claiming clients");
        self.record(HostCall::ClaimClients).await;
        self.clients
    }

    async fn show_notification(&self, notification: &Notification) -> Result<()> {
        info!(title = %notification.title, body = %notification.body, "Showing notification");
        self.record(HostCall::ShowNotification(notification.clone())).await;
        Ok(())
    }

    async fn close_notification(&self, notification: &Notification) {
        info!(title = %notification.title, "Closing notification");
        self.record(HostCall::CloseNotification(notification.title.clone()))
            .await;
    }

    async fn open_window(&self, url: &Url) -> Result<()> {
        info!(url = %url, "Opening window");
        self.record(HostCall::OpenWindow(url.clone())).await;
        Ok(())
    }
}
