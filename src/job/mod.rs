//! Job abstraction: pull-based byte sources feeding one request each.
//!
//! # State machine
//! ```text
//! Created → Started → {headers available} → Reading* → {Completed | Failed | Killed}
//! ```
//!
//! # Contract
//! - `start` is invoked exactly once; it may report headers synchronously
//!   (through the context, still delivered on a later dispatcher turn) or
//!   asynchronously
//! - `read` is only called after headers are available and never while a
//!   previous read is pending; an error outcome is terminal and `read` is
//!   never called again
//! - `kill` may be called from any non-terminal state and must stop further
//!   callbacks; the dispatcher additionally drops events for records that no
//!   longer exist
//!
//! Real network jobs live in the network stack; this crate only consumes the
//! contract and ships [`memory::MemoryJob`] as the reference collaborator.

pub mod memory;
pub mod registry;

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::dispatcher::Command;
use crate::messages::{ErrorCode, Priority, RequestKey, ResponseHead, UploadProgress};

pub use registry::{JobFactory, JobRegistry};

/// Result of a synchronous [`Job::read`] call.
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    /// Bytes are available now. An empty chunk signals end of body.
    Ready(Bytes),
    /// The job will deliver the result later via [`JobContext::read_done`].
    Pending,
    /// Terminal failure; `read` will not be called again.
    Err(ErrorCode),
}

/// Channel a Job uses to deliver its callbacks onto the dispatcher task.
///
/// Every notification is enqueued as a command and processed serially by the
/// dispatcher loop, regardless of which thread the Job's I/O runs on.
#[derive(Debug, Clone)]
pub struct JobContext {
    key: RequestKey,
    tx: mpsc::UnboundedSender<Command>,
}

impl JobContext {
    pub(crate) fn new(key: RequestKey, tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { key, tx }
    }

    pub fn key(&self) -> RequestKey {
        self.key
    }

    /// Headers are available.
    pub fn started(&self, head: ResponseHead) {
        let _ = self.tx.send(Command::JobStarted { key: self.key, head });
    }

    /// The load was redirected; the dispatcher relays this to the client,
    /// which answers with `FollowRedirect`.
    pub fn redirected(&self, new_url: Url) {
        let _ = self.tx.send(Command::JobRedirected {
            key: self.key,
            new_url,
        });
    }

    /// Completion of a read that previously returned [`ReadOutcome::Pending`].
    /// An empty chunk signals end of body.
    pub fn read_done(&self, result: Result<Bytes, ErrorCode>) {
        let _ = self.tx.send(Command::JobReadDone {
            key: self.key,
            result,
        });
    }

    /// Terminal failure outside of a read (e.g. during start).
    pub fn failed(&self, code: ErrorCode) {
        let _ = self.tx.send(Command::JobFailed {
            key: self.key,
            code,
        });
    }
}

/// A pull-based byte source for one request.
#[allow(unused_variables)]
pub trait Job: Send {
    /// Begin the load. Called exactly once.
    fn start(&mut self, ctx: &JobContext);

    /// Read up to `max` bytes of the body.
    fn read(&mut self, max: usize, ctx: &JobContext) -> ReadOutcome;

    /// Stop producing callbacks. May be called from any non-terminal state.
    fn kill(&mut self);

    /// Continue after the client approved a redirect.
    fn follow_redirect(&mut self, ctx: &JobContext) {}

    /// Hint that the request's priority changed.
    fn set_priority(&mut self, priority: Priority) {}

    /// Whether this job will touch the network. Gates the
    /// `will_start_network` throttle checkpoint.
    fn uses_network(&self) -> bool {
        true
    }

    /// Upload progress, when the job is sending a request body.
    fn upload_progress(&self) -> Option<UploadProgress> {
        None
    }
}
