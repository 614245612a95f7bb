//! Demo binary: runs the dispatcher against in-memory resources.
//!
//! Registers a handful of `demo://` URLs, drives a scripted client through
//! them, prints the notifications it receives, and exits on Ctrl-C or when
//! the script finishes. Useful for smoke-testing a config file and for
//! watching the protocol flow with `RUST_LOG=loadgate=trace`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use loadgate::config::{self, DispatcherConfig};
use loadgate::dispatcher::Dispatcher;
use loadgate::job::memory::{MemoryJobFactory, MemoryResource};
use loadgate::job::JobRegistry;
use loadgate::lifecycle::{self, Shutdown};
use loadgate::messages::{
    ClientId, ClientMessage, DispatcherMessage, Priority, RequestDescriptor, RequestId,
    ResourceKind, RouteId,
};
use loadgate::observability::logging;
use loadgate::throttle::NoThrottles;

#[derive(Debug, Parser)]
#[command(name = "loadgate", about = "Resource loading dispatcher demo")]
struct Args {
    /// Path to a TOML config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => DispatcherConfig::default(),
    };
    logging::init(&config.observability);

    let mut factory = MemoryJobFactory::new();
    factory.add(
        "demo://host/page",
        MemoryResource::new(&b"<html>hello</html>"[..], "text/html"),
    );
    factory.add(
        "demo://host/style.css",
        MemoryResource::new(&b"body { color: red }"[..], "text/css"),
    );
    let mut registry = JobRegistry::new();
    registry.register(Box::new(factory));

    let (dispatcher, handle) = Dispatcher::new(config, registry, Arc::new(NoThrottles));
    let dispatcher_task = dispatcher.spawn();

    let shutdown = Shutdown::new();
    tokio::spawn(lifecycle::listen_for_signals(shutdown.clone()));

    // One scripted client fetching the registered resources.
    let client = ClientId(1);
    let (sink, mut events) = mpsc::unbounded_channel();
    handle.attach_client(client, sink);

    for (n, url) in ["demo://host/page", "demo://host/style.css"]
        .iter()
        .enumerate()
    {
        handle.send(
            client,
            ClientMessage::CreateRequest {
                request_id: RequestId(n as u64 + 1),
                descriptor: RequestDescriptor::get(
                    url::Url::parse(url)?,
                    ResourceKind::Normal,
                    Priority::Medium,
                    RouteId(1),
                ),
            },
        );
    }

    let mut remaining = 2;
    while remaining > 0 {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = shutdown.wait() => break,
        };
        let Some(event) = event else { break };
        println!("{}", serde_json::to_string(&event)?);
        if let DispatcherMessage::DataAvailable { request_id, .. } = &event {
            handle.send(
                client,
                ClientMessage::AcknowledgeData {
                    request_id: *request_id,
                },
            );
        }
        if event.is_terminal() {
            remaining -= 1;
        }
    }

    let snapshot = handle.snapshot().await;
    tracing::info!(loads = snapshot.len(), "remaining in-flight loads");

    handle.shutdown();
    dispatcher_task.await?;
    Ok(())
}
