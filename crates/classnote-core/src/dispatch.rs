//! Message-passing front for the worker.
//!
//! The hosting environment delivers lifecycle signals as messages over a
//! bounded channel. A single dispatcher task owns the [`CacheWorker`];
//! every message carries a oneshot reply, so the sender awaits a deferred
//! result the same way a browser awaits `waitUntil`/`respondWith`.
//!
//! Install and activate are handled in arrival order. Fetch, push, sync
//! and notification clicks are spawned so a slow network request never
//! holds up the others. Spawned handlers are tracked: once every handle is
//! dropped the dispatcher waits for them, then for the cache writes they
//! started, before it exits.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::error::WorkerError;
use crate::http::Request;
use crate::notification::{Notification, NotificationClick};
use crate::worker::{ActivateReport, CacheWorker, FetchOutcome, InstallReport};

/// Buffer size for the lifecycle message channel.
const CHANNEL_BUFFER_SIZE: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, WorkerError>>;

/// A lifecycle signal and the channel its result goes back on.
enum LifecycleEvent {
    Install(Reply<InstallReport>),
    Activate(Reply<ActivateReport>),
    Fetch(Request, Reply<FetchOutcome>),
    Sync(String, oneshot::Sender<bool>),
    Push(Option<Bytes>, Reply<Option<Notification>>),
    NotificationClick(NotificationClick, Reply<bool>),
    /// Resolves once pending cache writes have landed
    Idle(oneshot::Sender<()>),
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Install(_) => "install",
            LifecycleEvent::Activate(_) => "activate",
            LifecycleEvent::Fetch(..) => "fetch",
            LifecycleEvent::Sync(..) => "sync",
            LifecycleEvent::Push(..) => "push",
            LifecycleEvent::NotificationClick(..) => "notificationclick",
            LifecycleEvent::Idle(_) => "idle",
        }
    }
}

/// Cheap to clone; every clone feeds the same dispatcher.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<LifecycleEvent>,
}

/// Start the dispatcher task. It runs until every handle is dropped, then
/// waits for outstanding cache writes before exiting.
pub fn spawn(worker: CacheWorker) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let task = tokio::spawn(run(Arc::new(worker), rx));
    (WorkerHandle { tx }, task)
}

async fn run(worker: Arc<CacheWorker>, mut rx: mpsc::Receiver<LifecycleEvent>) {
    info!(generation = %worker.generation(), "Dispatcher started");
    let handlers = TaskTracker::new();

    while let Some(event) = rx.recv().await {
        debug!(event = event.name(), "Dispatching");
        match event {
            LifecycleEvent::Install(reply) => {
                send_reply(reply, worker.install().await);
            }
            LifecycleEvent::Activate(reply) => {
                send_reply(reply, worker.activate().await);
            }
            LifecycleEvent::Fetch(request, reply) => {
                let worker = Arc::clone(&worker);
                handlers.spawn(async move {
                    send_reply(reply, worker.handle_fetch(request).await);
                });
            }
            LifecycleEvent::Sync(tag, reply) => {
                let worker = Arc::clone(&worker);
                handlers.spawn(async move {
                    send_reply(reply, worker.handle_sync(&tag).await);
                });
            }
            LifecycleEvent::Push(payload, reply) => {
                let worker = Arc::clone(&worker);
                handlers.spawn(async move {
                    send_reply(reply, worker.handle_push(payload.as_deref()).await);
                });
            }
            LifecycleEvent::NotificationClick(click, reply) => {
                let worker = Arc::clone(&worker);
                handlers.spawn(async move {
                    send_reply(reply, worker.handle_notification_click(click).await);
                });
            }
            LifecycleEvent::Idle(reply) => {
                let worker = Arc::clone(&worker);
                handlers.spawn(async move {
                    worker.wait_until_idle().await;
                    send_reply(reply, ());
                });
            }
        }
    }

    // Handlers may still start cache writes, so drain them first
    handlers.close();
    handlers.wait().await;
    worker.wait_until_idle().await;
    info!("Dispatcher stopped");
}

/// Helper to send a reply, logging if the caller went away
fn send_reply<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        error!("Failed to send event result - caller dropped");
    }
}

impl WorkerHandle {
    async fn dispatch<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> LifecycleEvent,
    ) -> Result<T, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| WorkerError::Stopped)?;
        rx.await.map_err(|_| WorkerError::Stopped)?
    }

    pub async fn install(&self) -> Result<InstallReport, WorkerError> {
        self.dispatch(LifecycleEvent::Install).await
    }

    pub async fn activate(&self) -> Result<ActivateReport, WorkerError> {
        self.dispatch(LifecycleEvent::Activate).await
    }

    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome, WorkerError> {
        self.dispatch(|reply| LifecycleEvent::Fetch(request, reply))
            .await
    }

    pub async fn push(&self, payload: Option<Bytes>) -> Result<Option<Notification>, WorkerError> {
        self.dispatch(|reply| LifecycleEvent::Push(payload, reply))
            .await
    }

    pub async fn notification_click(&self, click: NotificationClick) -> Result<bool, WorkerError> {
        self.dispatch(|reply| LifecycleEvent::NotificationClick(click, reply))
            .await
    }

    pub async fn sync(&self, tag: &str) -> Result<bool, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LifecycleEvent::Sync(tag.to_string(), reply))
            .await
            .map_err(|_| WorkerError::Stopped)?;
        rx.await.map_err(|_| WorkerError::Stopped)
    }

    /// Wait until cache writes started by earlier fetches have finished.
    pub async fn idle(&self) -> Result<(), WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LifecycleEvent::Idle(reply))
            .await
            .map_err(|_| WorkerError::Stopped)?;
        rx.await.map_err(|_| WorkerError::Stopped)
    }
}
