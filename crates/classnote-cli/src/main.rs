//! classnote-sw - drive the ClassNote offline worker from the command line.
//!
//! Stands in for the browser: lifecycle events are sent to the worker
//! through its message channel, the network is reached with `reqwest`,
//! and the cache lives on disk so state carries over between runs.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use classnote_core::dispatch;
use classnote_core::{
    CacheStorage, CacheWorker, FetchOutcome, Fetcher, Host, HttpFetcher, LoggingHost,
    Notification, NotificationClick, PushPayload, Request, WorkerConfig, WorkerHandle,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Overrides `base_url` from the config file
const BASE_URL_ENV: &str = "CLASSNOTE_BASE_URL";

const USAGE: &str = "\
Usage: classnote-sw <command> [args]

Commands:
  init                             Write the current configuration to disk
  install                          Pre-populate the current cache generation
  activate                         Evict stale generations and claim pages
  fetch <url> [--navigate] [--method M]
                                   Run one request through the worker
  push <json>                      Deliver a push message
  click [action]                   Click a notification (default: open)
  sync <tag>                       Deliver a background sync event
  status                           List cache generations and entries";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn load_config() -> Result<WorkerConfig> {
    let mut config = WorkerConfig::load().context("Failed to load config")?;
    if let Ok(base) = std::env::var(BASE_URL_ENV) {
        config.base_url = base;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let config = load_config()?;
    if command == "init" {
        config.save().context("Failed to save config")?;
        println!("Saved configuration for generation {}", config.generation());
        return Ok(());
    }

    let storage = Arc::new(CacheStorage::open_dir(config.cache_dir()?).await?);

    if command == "status" {
        return print_status(&storage).await;
    }

    let fetcher = HttpFetcher::new(
        &config.base()?,
        Duration::from_secs(config.request_timeout_secs),
    )?;
    let worker = CacheWorker::new(
        config,
        Arc::clone(&storage),
        Arc::new(fetcher) as Arc<dyn Fetcher>,
        Arc::new(LoggingHost::new()) as Arc<dyn Host>,
    )?;
    info!(generation = %worker.generation(), command = %command, "Starting worker");

    let (handle, task) = dispatch::spawn(worker);
    let result = run_command(&handle, command, &args[1..]).await;

    // Let pending cache writes finish before exiting
    drop(handle);
    task.await.context("Worker task panicked")?;
    result
}

async fn run_command(handle: &WorkerHandle, command: &str, args: &[String]) -> Result<()> {
    match command {
        "install" => {
            let report = handle.install().await?;
            println!("Installed generation {}", report.generation);
            for url in &report.cached {
                println!("  cached   {}", url);
            }
            for url in &report.skipped {
                println!("  skipped  {}", url);
            }
        }
        "activate" => {
            let report = handle.activate().await?;
            if report.deleted.is_empty() {
                println!("No stale generations");
            }
            for name in &report.deleted {
                println!("Deleted generation {}", name);
            }
            println!("Claimed {} client(s)", report.clients_claimed);
        }
        "fetch" => {
            let request = parse_fetch_args(args)?;
            match handle.fetch(request).await? {
                FetchOutcome::PassThrough => println!("Not intercepted (pass-through)"),
                FetchOutcome::Respond { response, source } => {
                    println!(
                        "{} {} ({}, {} bytes, from {})",
                        response.status,
                        response.status_text,
                        response.kind,
                        response.body.len(),
                        source
                    );
                }
            }
        }
        "push" => {
            match handle
                .push(args.first().map(|p| p.clone().into_bytes().into()))
                .await?
            {
                Some(notification) => {
                    println!("{}", serde_json::to_string_pretty(&notification)?)
                }
                None => println!("Push without payload - nothing shown"),
            }
        }
        "click" => {
            let notification = Notification::from_payload(PushPayload {
                title: None,
                body: String::new(),
                data: None,
            });
            let click = NotificationClick {
                notification,
                action: args.first().cloned(),
            };
            if handle.notification_click(click).await? {
                println!("Opened application window");
            } else {
                println!("Notification closed");
            }
        }
        "sync" => {
            let Some(tag) = args.first() else {
                bail!("sync requires a tag");
            };
            if handle.sync(tag).await? {
                println!("Sync '{}' handled", tag);
            } else {
                println!("Sync '{}' ignored", tag);
            }
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
    Ok(())
}

fn parse_fetch_args(args: &[String]) -> Result<Request> {
    let mut url = None;
    let mut navigate = false;
    let mut method = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--navigate" => navigate = true,
            "--method" => {
                let value = iter.next().context("--method requires a value")?;
                method = Some(value.to_ascii_uppercase());
            }
            other if url.is_none() => url = Some(other.to_string()),
            other => bail!("Unexpected argument: {}", other),
        }
    }

    let url = url.context("fetch requires a URL")?;
    let url = url::Url::parse(&url).with_context(|| format!("Invalid URL: {}", url))?;
    let mut request = if navigate {
        Request::navigate(url)
    } else {
        Request::get(url)
    };
    if let Some(method) = method {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .with_context(|| format!("Invalid method: {}", method))?;
        request = request.with_method(method);
    }
    Ok(request)
}

async fn print_status(storage: &CacheStorage) -> Result<()> {
    let names = storage.keys().await;
    if let Some(dir) = storage.dir() {
        println!("Cache directory: {}", dir.display());
    }
    if names.is_empty() {
        println!("No cache generations");
        return Ok(());
    }
    for name in names {
        let Some(store) = storage.get(&name).await else {
            continue;
        };
        let entries = store.entries().await;
        println!("{} ({} entries)", name, entries.len());
        for (key, cached) in entries {
            println!(
                "  {:<60} {} {}",
                key.to_string(),
                cached.response.status,
                cached.age_display()
            );
        }
    }
    Ok(())
}
