//! Dispatcher command loop and public handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::admission::AdmissionLedger;
use crate::client::{ClientConnection, ClientSink};
use crate::config::DispatcherConfig;
use crate::dispatcher::detach::DetachedSet;
use crate::dispatcher::pump::{BodyPump, DownloadFile};
use crate::dispatcher::record::{LoadPhase, LoadRecord};
use crate::dispatcher::routes::PendingRequest;
use crate::dispatcher::snapshot::{most_interesting, RouteLoadInfo};
use crate::dispatcher::{Command, CommandSender};
use crate::files::TempFileTable;
use crate::job::{JobContext, JobRegistry, ReadOutcome};
use crate::messages::{
    ClientId, ClientMessage, DispatcherMessage, ErrorCode, Priority, RequestDescriptor, RequestId,
    RequestKey, ResponseHead, RouteId,
};
use crate::observability::metrics;
use crate::throttle::{ChainOutcome, Checkpoint, ThrottleChain, ThrottleController, ThrottleProvider};

/// Cloneable handle for talking to a running dispatcher.
///
/// Created by the composition root and passed to every client-connection
/// object; there is no ambient global dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: CommandSender,
}

impl DispatcherHandle {
    pub fn attach_client(&self, client_id: ClientId, sink: ClientSink) {
        let _ = self.tx.send(Command::AttachClient { client_id, sink });
    }

    pub fn client_gone(&self, client_id: ClientId) {
        let _ = self.tx.send(Command::ClientGone { client_id });
    }

    /// Deliver one protocol message on behalf of a client.
    pub fn send(&self, client_id: ClientId, message: ClientMessage) {
        let _ = self.tx.send(Command::FromClient { client_id, message });
    }

    pub fn block_route(&self, client_id: ClientId, route: RouteId) {
        let _ = self.tx.send(Command::BlockRoute { client_id, route });
    }

    pub fn resume_route(&self, client_id: ClientId, route: RouteId) {
        let _ = self.tx.send(Command::ResumeRoute { client_id, route });
    }

    pub fn cancel_blocked_route(&self, client_id: ClientId, route: RouteId) {
        let _ = self.tx.send(Command::CancelBlockedRoute { client_id, route });
    }

    /// Route teardown: cancels in-flight (non-detached) loads for the route.
    pub fn cancel_route(&self, client_id: ClientId, route: RouteId) {
        let _ = self.tx.send(Command::CancelRoute { client_id, route });
    }

    pub fn mark_pending_transfer(&self, key: RequestKey) {
        let _ = self.tx.send(Command::MarkPendingTransfer { key });
    }

    /// Diagnostic snapshot; empty if the dispatcher already stopped.
    pub async fn snapshot(&self) -> Vec<RouteLoadInfo> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Snapshot { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// The dispatcher: owns all load state, driven by one command queue.
pub struct Dispatcher {
    config: DispatcherConfig,
    registry: JobRegistry,
    throttles: Arc<dyn ThrottleProvider>,
    rx: mpsc::UnboundedReceiver<Command>,
    tx: CommandSender,

    clients: HashMap<ClientId, ClientConnection>,
    /// Client-owned in-flight loads.
    records: HashMap<RequestKey, LoadRecord>,
    /// Loads owned by the dispatcher alone.
    detached: DetachedSet,
    /// Old key → new key mappings left behind by ownership transfers, so
    /// stale Job callbacks still find their record.
    aliases: HashMap<RequestKey, RequestKey>,
    ledger: AdmissionLedger,
    files: TempFileTable,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        registry: JobRegistry,
        throttles: Arc<dyn ThrottleProvider>,
    ) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DispatcherHandle { tx: tx.clone() };
        let dispatcher = Self {
            ledger: AdmissionLedger::new(config.admission.clone()),
            detached: DetachedSet::new(config.detach.max_detached_loads),
            config,
            registry,
            throttles,
            rx,
            tx,
            clients: HashMap::new(),
            records: HashMap::new(),
            aliases: HashMap::new(),
            files: TempFileTable::new(),
        };
        (dispatcher, handle)
    }

    /// Run until shutdown (or until every handle is dropped).
    pub async fn run(mut self) {
        tracing::info!(
            max_global = self.config.admission.max_global_requests,
            max_per_client = self.config.admission.max_requests_per_client,
            "dispatcher running"
        );
        while let Some(command) = self.rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle_command(command);
        }
        self.teardown();
        tracing::info!("dispatcher stopped");
    }

    /// Spawn the loop onto the current runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn teardown(&mut self) {
        for (_, mut record) in self.records.drain() {
            record.kill();
        }
        for key in self.detached.keys() {
            if let Some(mut record) = self.detached.remove(key) {
                record.kill();
            }
        }
        self.clients.clear();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::AttachClient { client_id, sink } => self.attach_client(client_id, sink),
            Command::ClientGone { client_id } => self.client_gone(client_id),
            Command::FromClient { client_id, message } => self.from_client(client_id, message),
            Command::BlockRoute { client_id, route } => {
                if let Some(client) = self.clients.get_mut(&client_id) {
                    client.blocked_routes.block(route);
                    tracing::debug!(%client_id, %route, "route blocked");
                }
            }
            Command::ResumeRoute { client_id, route } => self.resume_route(client_id, route),
            Command::CancelBlockedRoute { client_id, route } => {
                if let Some(client) = self.clients.get_mut(&client_id) {
                    let dropped = client.blocked_routes.cancel(route);
                    tracing::debug!(%client_id, %route, dropped, "blocked route cancelled");
                }
            }
            Command::CancelRoute { client_id, route } => self.cancel_route(client_id, route),
            Command::MarkPendingTransfer { key } => {
                let key = self.resolve(key);
                match self.records.get_mut(&key) {
                    Some(record) => {
                        record.pending_transfer = true;
                        tracing::debug!(%key, "marked pending transfer");
                    }
                    None => tracing::warn!(%key, "cannot mark unknown request for transfer"),
                }
            }
            Command::ThrottleResume { key } => self.throttle_resume(self.resolve(key)),
            Command::ThrottleCancel { key, code } => {
                let key = self.resolve(key);
                if self.records.contains_key(&key) || self.detached.contains(key) {
                    self.complete(key, code);
                }
            }
            Command::JobStarted { key, head } => self.job_started(self.resolve(key), head),
            Command::JobRedirected { key, new_url } => {
                self.job_redirected(self.resolve(key), new_url)
            }
            Command::JobReadDone { key, result } => self.job_read_done(self.resolve(key), result),
            Command::JobFailed { key, code } => {
                let key = self.resolve(key);
                if self.records.contains_key(&key) || self.detached.contains(key) {
                    self.complete(key, code);
                }
            }
            Command::DetachTimeout { key } => self.detach_timeout(self.resolve(key)),
            Command::Snapshot { reply } => {
                let _ = reply.send(most_interesting(self.records.values()));
            }
            Command::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    /// Follow transfer aliases so stale callbacks reach the re-keyed record.
    fn resolve(&self, mut key: RequestKey) -> RequestKey {
        while let Some(next) = self.aliases.get(&key) {
            key = *next;
        }
        key
    }

    fn attach_client(&mut self, client_id: ClientId, sink: ClientSink) {
        if self.clients.contains_key(&client_id) {
            tracing::warn!(%client_id, "client attached twice; replacing sink");
        }
        self.clients.insert(client_id, ClientConnection::new(client_id, sink));
        tracing::debug!(%client_id, "client attached");
    }

    /// The peer disconnected: cancel its loads, detaching the detachable
    /// ones that are still loading. No notifications are sent.
    fn client_gone(&mut self, client_id: ClientId) {
        let Some(client) = self.clients.remove(&client_id) else {
            return;
        };
        for request_id in client.request_ids() {
            let key = RequestKey::new(client_id, request_id);
            let Some(record) = self.records.get(&key) else {
                continue;
            };
            if record.kind().is_detachable() && !record.job_finished {
                self.detach(key, false);
            } else {
                // The owner is already gone, so complete() emits nothing.
                self.complete(key, ErrorCode::Aborted);
            }
        }
        tracing::debug!(%client_id, "client gone");
    }

    fn from_client(&mut self, client_id: ClientId, message: ClientMessage) {
        if !self.clients.contains_key(&client_id) {
            tracing::warn!(%client_id, "message from unknown client dropped");
            return;
        }
        match message {
            ClientMessage::CreateRequest {
                request_id,
                descriptor,
            } => self.create_request(client_id, request_id, descriptor),
            ClientMessage::CancelRequest { request_id } => {
                self.cancel_request(client_id, request_id)
            }
            ClientMessage::FollowRedirect { request_id } => {
                self.follow_redirect(client_id, request_id)
            }
            ClientMessage::ChangePriority {
                request_id,
                priority,
            } => self.change_priority(client_id, request_id, priority),
            ClientMessage::AcknowledgeData { request_id } => {
                self.acknowledge_data(client_id, request_id)
            }
            ClientMessage::ReleaseTemporaryFile { request_id } => {
                self.files.release(RequestKey::new(client_id, request_id));
            }
        }
    }

    fn create_request(
        &mut self,
        client_id: ClientId,
        request_id: RequestId,
        descriptor: RequestDescriptor,
    ) {
        if let Some(old_key) = descriptor.transferred_from {
            self.claim_transfer(client_id, request_id, descriptor, old_key);
            return;
        }

        let client = self.clients.get_mut(&client_id).expect("caller checked client");
        let key = RequestKey::new(client_id, request_id);
        if client.owns_request(request_id) || self.records.contains_key(&key) {
            tracing::warn!(%key, "duplicate request id ignored");
            return;
        }

        // Blocked routes queue the request before admission or throttles run.
        let route = descriptor.route;
        if client.blocked_routes.is_blocked(route) {
            client.blocked_routes.enqueue(
                route,
                PendingRequest {
                    request_id,
                    descriptor,
                },
            );
            tracing::debug!(%key, %route, "request queued on blocked route");
            return;
        }

        self.start_request(client_id, request_id, descriptor);
    }

    /// Admission, throttle chain, and Job creation for one request.
    fn start_request(
        &mut self,
        client_id: ClientId,
        request_id: RequestId,
        descriptor: RequestDescriptor,
    ) {
        let key = RequestKey::new(client_id, request_id);
        let cost = self.ledger.estimate_cost(&descriptor);

        if !self.ledger.try_admit(client_id, cost) {
            metrics::record_admission_rejected();
            self.send_to_client(
                client_id,
                DispatcherMessage::Completed {
                    request_id,
                    error: ErrorCode::InsufficientResources,
                },
            );
            tracing::debug!(%key, "request rejected by admission ledger");
            return;
        }

        let Some(job) = self.registry.create(&descriptor) else {
            self.ledger.release(client_id, cost);
            self.send_to_client(
                client_id,
                DispatcherMessage::Completed {
                    request_id,
                    error: ErrorCode::UnsupportedScheme,
                },
            );
            tracing::debug!(%key, url = %descriptor.url, "no job factory accepted request");
            return;
        };

        let controller = ThrottleController::new(key, self.tx.clone());
        let chain = ThrottleChain::new(self.throttles.throttles_for(&descriptor, &controller));
        let pump = BodyPump::new(self.config.pump.shared_buffer_size);
        let record = LoadRecord::new(key, descriptor, job, chain, pump, cost);

        if let Some(client) = self.clients.get_mut(&client_id) {
            client.add_request(request_id);
        }
        self.records.insert(key, record);
        metrics::record_request_created();
        metrics::set_requests_in_flight(self.ledger.global_count());
        tracing::debug!(%key, "request created");

        self.run_checkpoint(key, Checkpoint::WillStart);
    }

    /// Run a throttle checkpoint from its first throttle and act on the
    /// outcome.
    fn run_checkpoint(&mut self, key: RequestKey, checkpoint: Checkpoint) {
        let Some(record) = record_entry(&mut self.records, &mut self.detached, key) else {
            return;
        };
        record.phase = match checkpoint {
            Checkpoint::WillStart => LoadPhase::WillStart,
            Checkpoint::WillStartNetwork => LoadPhase::WillStartNetwork,
            Checkpoint::WillProcessResponse => LoadPhase::WillProcessResponse,
        };
        let head = record.head.clone();
        let outcome = record.chain.run(checkpoint, head.as_ref());
        self.checkpoint_outcome(key, checkpoint, outcome);
    }

    fn checkpoint_outcome(&mut self, key: RequestKey, checkpoint: Checkpoint, outcome: ChainOutcome) {
        match outcome {
            ChainOutcome::Completed => match checkpoint {
                Checkpoint::WillStart => self.after_will_start(key),
                Checkpoint::WillStartNetwork => self.start_job(key),
                Checkpoint::WillProcessResponse => self.begin_response(key),
            },
            ChainOutcome::Deferred => {}
            ChainOutcome::Cancelled(code) => self.complete(key, code),
        }
    }

    fn after_will_start(&mut self, key: RequestKey) {
        let Some(record) = record_entry(&mut self.records, &mut self.detached, key) else {
            return;
        };
        if record.job.uses_network() {
            self.run_checkpoint(key, Checkpoint::WillStartNetwork);
        } else {
            self.start_job(key);
        }
    }

    fn start_job(&mut self, key: RequestKey) {
        let ctx = JobContext::new(key, self.tx.clone());
        let Some(record) = record_entry(&mut self.records, &mut self.detached, key) else {
            return;
        };
        record.phase = LoadPhase::Starting;
        record.job.start(&ctx);
    }

    fn throttle_resume(&mut self, key: RequestKey) {
        let Some(record) = record_entry(&mut self.records, &mut self.detached, key) else {
            // The request was cancelled while deferred; resuming is a no-op.
            tracing::trace!(%key, "resume for finished request ignored");
            return;
        };
        let head = record.head.clone();
        let Some((checkpoint, outcome)) = record.chain.resume(head.as_ref()) else {
            tracing::warn!(%key, "resume without a deferred throttle ignored");
            return;
        };
        self.checkpoint_outcome(key, checkpoint, outcome);
    }

    fn job_started(&mut self, key: RequestKey, head: ResponseHead) {
        let Some(record) = record_entry(&mut self.records, &mut self.detached, key) else {
            return;
        };
        if record.phase != LoadPhase::Starting {
            tracing::warn!(%key, phase = ?record.phase, "unexpected headers ignored");
            return;
        }
        record.head = Some(head);
        if record.is_detached() {
            // No client to consult: skip response throttles and drain.
            record.phase = LoadPhase::Body;
            self.pump_read(key);
        } else {
            self.run_checkpoint(key, Checkpoint::WillProcessResponse);
        }
    }

    /// Response throttles passed: expose the response and start the body.
    fn begin_response(&mut self, key: RequestKey) {
        let download_dir = self.config.pump.download_dir.clone();
        let Some(record) = record_entry(&mut self.records, &mut self.detached, key) else {
            return;
        };
        record.phase = LoadPhase::Body;

        if record.kind().is_download() && !record.is_detached() {
            match DownloadFile::create(&download_dir, key) {
                Ok(file) => record.pump.download = Some(file),
                Err(error) => {
                    tracing::warn!(%key, %error, "failed to create download file");
                    self.complete(key, ErrorCode::Failed);
                    return;
                }
            }
        }

        if let (Some(owner), Some(head)) = (record.owner, record.head.clone()) {
            let message = DispatcherMessage::ResponseStarted {
                request_id: key.request,
                status: head.status,
                mime_type: head.mime_type,
                content_length: head.content_length,
                security_info: head.security_info,
            };
            if let Some(client) = self.clients.get(&owner) {
                client.send(message);
            }
        }
        self.pump_read(key);
    }

    /// Drive reads while the pump allows it. Chunk-mode requests stop after
    /// one chunk and wait for the acknowledgement; download and detached
    /// requests keep draining until the job pends or finishes.
    fn pump_read(&mut self, key: RequestKey) {
        loop {
            let ctx = JobContext::new(key, self.tx.clone());
            let max = self.config.pump.chunk_size;
            let Some(record) = record_entry(&mut self.records, &mut self.detached, key) else {
                return;
            };
            if record.phase != LoadPhase::Body || record.job_finished {
                return;
            }
            if !record.pump.can_read() {
                return;
            }
            match record.job.read(max, &ctx) {
                ReadOutcome::Ready(chunk) if chunk.is_empty() => {
                    self.complete(key, ErrorCode::Ok);
                    return;
                }
                ReadOutcome::Ready(chunk) => {
                    if !self.deliver_chunk(key, chunk) {
                        return;
                    }
                }
                ReadOutcome::Pending => {
                    if let Some(record) = record_entry(&mut self.records, &mut self.detached, key) {
                        record.pump.read_in_flight = true;
                    }
                    return;
                }
                ReadOutcome::Err(code) => {
                    self.complete(key, code);
                    return;
                }
            }
        }
    }

    /// Deliver one chunk. Returns true when the pump loop should keep
    /// reading (download or detached mode).
    fn deliver_chunk(&mut self, key: RequestKey, chunk: Bytes) -> bool {
        let Some(record) = record_entry(&mut self.records, &mut self.detached, key) else {
            return false;
        };

        if let Some(download) = record.pump.download.as_mut() {
            let written = match download.append(&chunk) {
                Ok(written) => written,
                Err(error) => {
                    tracing::warn!(%key, %error, "download write failed");
                    self.complete(key, ErrorCode::Failed);
                    return false;
                }
            };
            let total = download.total;
            record.pump.bytes_delivered += written;
            let owner = record.owner;
            if let Some(client) = owner.and_then(|id| self.clients.get(&id)) {
                client.send(DispatcherMessage::DataDownloaded {
                    request_id: key.request,
                    length: total,
                });
            }
            return true;
        }

        if record.is_detached() {
            // Drained for the cache's benefit; nobody to notify.
            record.pump.bytes_delivered += chunk.len() as u64;
            return true;
        }

        let offset = record.pump.place_chunk(chunk.len());
        let owner = record.owner;
        let message = DispatcherMessage::DataAvailable {
            request_id: key.request,
            offset,
            length: chunk.len(),
            data: chunk,
        };
        if let Some(client) = owner.and_then(|id| self.clients.get(&id)) {
            client.send(message);
        }
        // One chunk in flight; wait for the acknowledgement.
        false
    }

    fn job_read_done(&mut self, key: RequestKey, result: Result<Bytes, ErrorCode>) {
        {
            let Some(record) = record_entry(&mut self.records, &mut self.detached, key) else {
                return;
            };
            if !record.pump.read_in_flight {
                tracing::warn!(%key, "read completion without a pending read ignored");
                return;
            }
            record.pump.read_in_flight = false;
        }
        match result {
            Ok(chunk) if chunk.is_empty() => self.complete(key, ErrorCode::Ok),
            Ok(chunk) => {
                if self.deliver_chunk(key, chunk) {
                    self.pump_read(key);
                }
            }
            Err(code) => self.complete(key, code),
        }
    }

    fn job_redirected(&mut self, key: RequestKey, new_url: Url) {
        let ctx = JobContext::new(key, self.tx.clone());
        let Some(record) = record_entry(&mut self.records, &mut self.detached, key) else {
            return;
        };
        if record.phase != LoadPhase::Starting {
            tracing::warn!(%key, phase = ?record.phase, "unexpected redirect ignored");
            return;
        }
        record.descriptor.url = new_url.clone();
        if record.is_detached() {
            // No client to approve; follow immediately.
            record.job.follow_redirect(&ctx);
            return;
        }
        record.phase = LoadPhase::WaitingRedirect;
        let owner = record.owner;
        if let Some(client) = owner.and_then(|id| self.clients.get(&id)) {
            client.send(DispatcherMessage::Redirected {
                request_id: key.request,
                new_url,
            });
        }
    }

    fn follow_redirect(&mut self, client_id: ClientId, request_id: RequestId) {
        let key = RequestKey::new(client_id, request_id);
        let ctx = JobContext::new(key, self.tx.clone());
        let Some(record) = self.records.get_mut(&key) else {
            return;
        };
        if record.phase != LoadPhase::WaitingRedirect {
            tracing::warn!(%key, "FollowRedirect outside a redirect ignored");
            return;
        }
        record.phase = LoadPhase::Starting;
        record.job.follow_redirect(&ctx);
    }

    fn change_priority(&mut self, client_id: ClientId, request_id: RequestId, priority: Priority) {
        let key = RequestKey::new(client_id, request_id);
        if let Some(record) = self.records.get_mut(&key) {
            record.priority = priority;
            record.descriptor.priority = priority;
            record.job.set_priority(priority);
        }
    }

    fn acknowledge_data(&mut self, client_id: ClientId, request_id: RequestId) {
        let key = RequestKey::new(client_id, request_id);
        let Some(record) = self.records.get_mut(&key) else {
            // ACK raced with completion; fine.
            tracing::trace!(%key, "ack for finished request ignored");
            return;
        };
        if record.pump.ack() {
            self.pump_read(key);
        } else {
            tracing::trace!(%key, "excess ack ignored");
        }
    }

    fn cancel_request(&mut self, client_id: ClientId, request_id: RequestId) {
        let key = RequestKey::new(client_id, request_id);
        let Some(record) = self.records.get(&key) else {
            tracing::trace!(%key, "cancel for unknown request ignored");
            return;
        };
        if record.pending_transfer {
            // Ownership is in flight; only context-wide cancellation applies.
            tracing::debug!(%key, "cancel ignored while pending transfer");
            return;
        }
        if record.kind().is_detachable() && !record.job_finished {
            self.detach(key, true);
        } else {
            self.complete(key, ErrorCode::Aborted);
        }
    }

    /// Convert a cancel into a detach: the client sees a terminal abort now,
    /// the load finishes in the background under a grace timer.
    fn detach(&mut self, key: RequestKey, notify: bool) {
        let Some(mut record) = self.records.remove(&key) else {
            return;
        };
        if let Some(client) = self.clients.get_mut(&key.client) {
            client.remove_request(key.request);
            if notify {
                client.send(DispatcherMessage::Completed {
                    request_id: key.request,
                    error: ErrorCode::Aborted,
                });
            }
        }
        if !record.ledger_released {
            self.ledger.release(key.client, record.cost);
            record.ledger_released = true;
        }
        record.owner = None;
        record.pump.clear_ack_gate();

        let grace = Duration::from_millis(self.config.detach.grace_period_ms);
        let tx = self.tx.clone();
        record.grace_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(Command::DetachTimeout { key });
        }));

        if let Some(mut evicted) = self.detached.insert(record) {
            tracing::debug!(evicted = %evicted.key, "detached set full; evicting oldest");
            evicted.kill();
        }
        metrics::record_request_detached();
        metrics::set_requests_in_flight(self.ledger.global_count());
        tracing::debug!(%key, "request detached");

        // Keep draining if the body was already flowing.
        self.pump_read(key);
    }

    fn detach_timeout(&mut self, key: RequestKey) {
        let Some(mut record) = self.detached.remove(key) else {
            return;
        };
        record.kill();
        if let Some(download) = record.pump.download.take() {
            download.discard();
        }
        metrics::record_request_completed(ErrorCode::TimedOut);
        tracing::debug!(%key, "detached load timed out");
    }

    fn resume_route(&mut self, client_id: ClientId, route: RouteId) {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return;
        };
        let queue = client.blocked_routes.resume(route);
        if queue.is_empty() {
            return;
        }
        tracing::debug!(%client_id, %route, drained = queue.len(), "route resumed");
        for pending in queue {
            self.start_request(client_id, pending.request_id, pending.descriptor);
        }
    }

    fn cancel_route(&mut self, client_id: ClientId, route: RouteId) {
        let keys: Vec<RequestKey> = self
            .records
            .values()
            .filter(|r| r.owner == Some(client_id) && r.descriptor.route == route)
            .map(|r| r.key)
            .collect();
        for key in keys {
            self.complete(key, ErrorCode::Aborted);
        }
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.blocked_routes.cancel(route);
        }
    }

    /// Client B claims a load previously marked for transfer by client A.
    fn claim_transfer(
        &mut self,
        client_id: ClientId,
        request_id: RequestId,
        descriptor: RequestDescriptor,
        old_key: RequestKey,
    ) {
        let old_key = self.resolve(old_key);
        let new_key = RequestKey::new(client_id, request_id);

        let valid = self
            .records
            .get(&old_key)
            .map(|record| record.pending_transfer)
            .unwrap_or(false);
        if !valid {
            tracing::warn!(%old_key, %new_key, "transfer claim for unmarked or finished request");
            self.send_to_client(
                client_id,
                DispatcherMessage::Completed {
                    request_id,
                    error: ErrorCode::Failed,
                },
            );
            return;
        }

        let mut record = self.records.remove(&old_key).expect("checked above");
        if let Some(old_client) = self.clients.get_mut(&old_key.client) {
            old_client.remove_request(old_key.request);
        }

        // Move the admission charge to the new owner. The load was already
        // admitted; a transfer is a continuation, not a new request.
        if !record.ledger_released {
            self.ledger.release(old_key.client, record.cost);
            self.ledger.force_admit(client_id, record.cost);
        }

        record.key = new_key;
        record.owner = Some(client_id);
        record.pending_transfer = false;
        // The load continues under the claiming route; URL, offset, and
        // security info travel with the record.
        record.descriptor.route = descriptor.route;

        if let Some(client) = self.clients.get_mut(&client_id) {
            client.add_request(request_id);
        }
        self.aliases.insert(old_key, new_key);
        self.records.insert(new_key, record);
        metrics::record_request_transferred();
        tracing::debug!(%old_key, %new_key, "request transferred");
    }

    /// Remove the record and emit its terminal completion.
    fn complete(&mut self, key: RequestKey, code: ErrorCode) {
        let record = self
            .records
            .remove(&key)
            .or_else(|| self.detached.remove(key));
        let Some(mut record) = record else {
            return;
        };
        record.kill();

        if !record.ledger_released {
            self.ledger.release(key.client, record.cost);
            record.ledger_released = true;
        }

        if let Some(download) = record.pump.download.take() {
            if code.is_ok() {
                match download.finish() {
                    Ok(path) => self.files.register(key, path),
                    Err(error) => {
                        tracing::warn!(%key, %error, "failed to finalize download file")
                    }
                }
            } else {
                download.discard();
            }
        }

        if let Some(owner) = record.owner {
            if let Some(client) = self.clients.get_mut(&owner) {
                client.remove_request(key.request);
                client.send(DispatcherMessage::Completed {
                    request_id: key.request,
                    error: code,
                });
            }
        }

        self.aliases.retain(|_, target| *target != key);
        metrics::record_request_completed(code);
        metrics::set_requests_in_flight(self.ledger.global_count());
        tracing::debug!(%key, %code, bytes = record.pump.bytes_delivered, "request completed");
    }

    fn send_to_client(&self, client_id: ClientId, message: DispatcherMessage) {
        if let Some(client) = self.clients.get(&client_id) {
            client.send(message);
        }
    }
}

/// Look a record up in the client-owned map first, then the detached set.
fn record_entry<'a>(
    records: &'a mut HashMap<RequestKey, LoadRecord>,
    detached: &'a mut DetachedSet,
    key: RequestKey,
) -> Option<&'a mut LoadRecord> {
    if records.contains_key(&key) {
        records.get_mut(&key)
    } else {
        detached.get_mut(key)
    }
}
