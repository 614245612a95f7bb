//! Shared harness for dispatcher integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

use loadgate::config::DispatcherConfig;
use loadgate::dispatcher::{Dispatcher, DispatcherHandle};
use loadgate::job::memory::{MemoryJobFactory, MemoryResource};
use loadgate::job::{Job, JobContext, JobFactory, JobRegistry, ReadOutcome};
use loadgate::messages::{
    ClientId, ClientMessage, DispatcherMessage, ErrorCode, Priority, RequestDescriptor, RequestId,
    ResourceKind, ResponseHead, RouteId,
};
use loadgate::throttle::{
    NoThrottles, ResourceThrottle, ThrottleController, ThrottleDecision, ThrottleProvider,
};

pub fn start(config: DispatcherConfig, registry: JobRegistry) -> DispatcherHandle {
    start_with(config, registry, Arc::new(NoThrottles))
}

pub fn start_with(
    config: DispatcherConfig,
    registry: JobRegistry,
    throttles: Arc<dyn ThrottleProvider>,
) -> DispatcherHandle {
    let (dispatcher, handle) = Dispatcher::new(config, registry, throttles);
    dispatcher.spawn();
    handle
}

/// Attach a client and return its id plus the notification stream.
pub fn attach(
    handle: &DispatcherHandle,
    id: u64,
) -> (ClientId, mpsc::UnboundedReceiver<DispatcherMessage>) {
    let client = ClientId(id);
    let (sink, events) = mpsc::unbounded_channel();
    handle.attach_client(client, sink);
    (client, events)
}

pub fn get(url: &str, kind: ResourceKind) -> RequestDescriptor {
    RequestDescriptor::get(Url::parse(url).unwrap(), kind, Priority::Medium, RouteId(1))
}

pub fn create(handle: &DispatcherHandle, client: ClientId, n: u64, descriptor: RequestDescriptor) {
    handle.send(
        client,
        ClientMessage::CreateRequest {
            request_id: RequestId(n),
            descriptor,
        },
    );
}

/// Receive the next notification or panic after two seconds.
pub async fn recv(events: &mut mpsc::UnboundedReceiver<DispatcherMessage>) -> DispatcherMessage {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a dispatcher message")
        .expect("dispatcher closed the notification channel")
}

/// Assert nothing arrives within the window.
pub async fn assert_silent(events: &mut mpsc::UnboundedReceiver<DispatcherMessage>, ms: u64) {
    if let Ok(message) = timeout(Duration::from_millis(ms), events.recv()).await {
        panic!("unexpected message: {message:?}");
    }
}

/// Drain notifications, acknowledging each chunk, until the terminal
/// completion. Returns every message received plus the terminal code.
pub async fn drive_to_completion(
    handle: &DispatcherHandle,
    client: ClientId,
    events: &mut mpsc::UnboundedReceiver<DispatcherMessage>,
) -> (Vec<DispatcherMessage>, ErrorCode) {
    let mut messages = Vec::new();
    loop {
        let message = recv(events).await;
        if let DispatcherMessage::DataAvailable { request_id, .. } = &message {
            handle.send(
                client,
                ClientMessage::AcknowledgeData {
                    request_id: *request_id,
                },
            );
        }
        messages.push(message.clone());
        if let DispatcherMessage::Completed { error, .. } = message {
            return (messages, error);
        }
    }
}

/// Concatenated `DataAvailable` payloads, in delivery order.
pub fn body_bytes(messages: &[DispatcherMessage]) -> Vec<u8> {
    let mut body = Vec::new();
    for message in messages {
        if let DispatcherMessage::DataAvailable { data, .. } = message {
            body.extend_from_slice(data);
        }
    }
    body
}

/// Registry serving the given URLs from memory.
pub fn memory_registry(entries: Vec<(&str, MemoryResource)>) -> JobRegistry {
    let mut factory = MemoryJobFactory::new();
    for (url, resource) in entries {
        factory.add(url, resource);
    }
    let mut registry = JobRegistry::new();
    registry.register(Box::new(factory));
    registry
}

fn plain_head() -> ResponseHead {
    ResponseHead {
        status: 200,
        mime_type: "text/plain".to_string(),
        content_length: None,
        security_info: None,
    }
}

/// Factory for `stall://` URLs: jobs report headers, then every read pends
/// forever. The per-URL kill flag lets tests observe when the dispatcher
/// finally kills the job.
#[derive(Default, Clone)]
pub struct StallFactory {
    flags: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
}

impl StallFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn killed(&self, url: &str) -> bool {
        self.flags
            .lock()
            .unwrap()
            .get(url)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

impl JobFactory for StallFactory {
    fn name(&self) -> &'static str {
        "stall"
    }

    fn create(&self, descriptor: &RequestDescriptor) -> Option<Box<dyn Job>> {
        if descriptor.url.scheme() != "stall" {
            return None;
        }
        let flag = Arc::new(AtomicBool::new(false));
        self.flags
            .lock()
            .unwrap()
            .insert(descriptor.url.as_str().to_string(), flag.clone());
        Some(Box::new(StallJob { killed: flag }))
    }
}

struct StallJob {
    killed: Arc<AtomicBool>,
}

impl Job for StallJob {
    fn start(&mut self, ctx: &JobContext) {
        ctx.started(plain_head());
    }

    fn read(&mut self, _max: usize, _ctx: &JobContext) -> ReadOutcome {
        ReadOutcome::Pending
    }

    fn kill(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    fn uses_network(&self) -> bool {
        false
    }
}

/// Factory for `redir://` URLs: the job reports one redirect at start and
/// serves a fixed body once the redirect is followed.
pub struct RedirectFactory {
    pub target: &'static str,
    pub body: &'static [u8],
}

impl JobFactory for RedirectFactory {
    fn name(&self) -> &'static str {
        "redirect"
    }

    fn create(&self, descriptor: &RequestDescriptor) -> Option<Box<dyn Job>> {
        if descriptor.url.scheme() != "redir" {
            return None;
        }
        Some(Box::new(RedirectJob {
            target: Url::parse(self.target).unwrap(),
            body: Bytes::from_static(self.body),
            served: false,
        }))
    }
}

struct RedirectJob {
    target: Url,
    body: Bytes,
    served: bool,
}

impl Job for RedirectJob {
    fn start(&mut self, ctx: &JobContext) {
        ctx.redirected(self.target.clone());
    }

    fn follow_redirect(&mut self, ctx: &JobContext) {
        ctx.started(plain_head());
    }

    fn read(&mut self, _max: usize, _ctx: &JobContext) -> ReadOutcome {
        if self.served {
            ReadOutcome::Ready(Bytes::new())
        } else {
            self.served = true;
            ReadOutcome::Ready(self.body.clone())
        }
    }

    fn kill(&mut self) {}

    fn uses_network(&self) -> bool {
        false
    }
}

/// Provider attaching one always-deferring throttle per request, handing the
/// controller to the test through `slot`.
#[derive(Default, Clone)]
pub struct HoldProvider {
    pub slot: Arc<Mutex<Option<ThrottleController>>>,
}

impl HoldProvider {
    pub fn controller(&self) -> ThrottleController {
        self.slot
            .lock()
            .unwrap()
            .clone()
            .expect("no request has been throttled yet")
    }
}

impl ThrottleProvider for HoldProvider {
    fn throttles_for(
        &self,
        _descriptor: &RequestDescriptor,
        controller: &ThrottleController,
    ) -> Vec<Box<dyn ResourceThrottle>> {
        *self.slot.lock().unwrap() = Some(controller.clone());
        vec![Box::new(HoldThrottle)]
    }
}

struct HoldThrottle;

impl ResourceThrottle for HoldThrottle {
    fn name(&self) -> &'static str {
        "hold"
    }

    fn will_start(&mut self) -> ThrottleDecision {
        ThrottleDecision::Defer
    }
}
