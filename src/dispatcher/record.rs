//! Per-request state: the LoadRecord.
//!
//! A LoadRecord exclusively owns its Job. Ownership follows the record: a
//! client connection owns the record via the dispatcher's request map until
//! the request completes, is cancelled, or detaches — at which point the
//! record moves into the dispatcher's detached set and the client reference
//! is cleared. A Job is never started twice and never outlives its record.

use tokio::task::JoinHandle;

use crate::dispatcher::pump::BodyPump;
use crate::job::Job;
use crate::messages::{
    ClientId, Priority, RequestDescriptor, RequestKey, ResourceKind, ResponseHead,
};
use crate::throttle::ThrottleChain;

/// Where a request currently is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Running (or deferred in) the before-start throttle chain.
    WillStart,
    /// Running (or deferred in) the before-network throttle chain.
    WillStartNetwork,
    /// `Job::start` issued; waiting for headers or a redirect.
    Starting,
    /// A redirect was relayed; waiting for the client's `FollowRedirect`.
    WaitingRedirect,
    /// Headers arrived; running (or deferred in) the response throttle chain.
    WillProcessResponse,
    /// Body bytes are being pumped to the client.
    Body,
}

/// Client-visible load state reported by the introspection snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LoadState {
    Throttled,
    Starting,
    WaitingForResponse,
    ReadingResponse,
}

/// All dispatcher-side state for one in-flight request.
pub struct LoadRecord {
    pub key: RequestKey,
    pub descriptor: RequestDescriptor,
    pub priority: Priority,
    /// Owning client; `None` once detached or once the client is gone.
    pub owner: Option<ClientId>,
    pub job: Box<dyn Job>,
    pub chain: ThrottleChain,
    pub phase: LoadPhase,
    /// Headers, once the Job reported them.
    pub head: Option<ResponseHead>,
    pub pump: BodyPump,
    /// Admission cost charged for this request; released exactly once.
    pub cost: u64,
    pub ledger_released: bool,
    /// Set while ownership is being transferred to another client; ordinary
    /// cancels from the original client are ignored in this state.
    pub pending_transfer: bool,
    /// Grace timer armed at detach time; aborted on completion.
    pub grace_timer: Option<JoinHandle<()>>,
    /// True once the job reached a terminal state (EOF, failure, or kill).
    pub job_finished: bool,
}

impl LoadRecord {
    pub fn new(
        key: RequestKey,
        descriptor: RequestDescriptor,
        job: Box<dyn Job>,
        chain: ThrottleChain,
        pump: BodyPump,
        cost: u64,
    ) -> Self {
        let priority = descriptor.priority;
        Self {
            key,
            descriptor,
            priority,
            owner: Some(key.client),
            job,
            chain,
            phase: LoadPhase::WillStart,
            head: None,
            pump,
            cost,
            ledger_released: false,
            pending_transfer: false,
            grace_timer: None,
            job_finished: false,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.descriptor.kind
    }

    pub fn is_detached(&self) -> bool {
        self.owner.is_none()
    }

    /// Snapshot state for diagnostics.
    pub fn load_state(&self) -> LoadState {
        match self.phase {
            LoadPhase::WillStart | LoadPhase::WillStartNetwork => LoadState::Throttled,
            LoadPhase::Starting => LoadState::Starting,
            LoadPhase::WaitingRedirect | LoadPhase::WillProcessResponse => {
                LoadState::WaitingForResponse
            }
            LoadPhase::Body => LoadState::ReadingResponse,
        }
    }

    /// Stop the job and any pending grace timer.
    pub fn kill(&mut self) {
        if !self.job_finished {
            self.job.kill();
            self.job_finished = true;
        }
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for LoadRecord {
    fn drop(&mut self) {
        self.kill();
    }
}
