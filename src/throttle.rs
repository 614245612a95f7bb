//! Policy throttles: pluggable hooks that can defer or cancel a request.
//!
//! # Checkpoints
//! - `will_start`: before anything else happens for the request
//! - `will_start_network`: before the Job touches the network (skipped for
//!   Jobs satisfied from non-network sources)
//! - `will_process_response`: once headers are available, before the body is
//!   exposed to the client
//!
//! # Design Decisions
//! - The chain is populated once at creation by a host-supplied provider and
//!   run in order at each checkpoint
//! - At most one throttle may be deferred per request; the dispatcher tracks
//!   the deferred position and resumes from it
//! - `ThrottleController` methods enqueue dispatcher commands, so a cancel
//!   issued from a throttle never destroys the Job synchronously inside the
//!   callback

use tokio::sync::mpsc;

use crate::dispatcher::Command;
use crate::messages::{ErrorCode, RequestDescriptor, RequestKey, ResponseHead};

/// The checkpoint a throttle chain is currently being run at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    WillStart,
    WillStartNetwork,
    WillProcessResponse,
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Checkpoint::WillStart => "will_start",
            Checkpoint::WillStartNetwork => "will_start_network",
            Checkpoint::WillProcessResponse => "will_process_response",
        };
        f.write_str(name)
    }
}

/// What a throttle wants done with the request at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Proceed,
    /// Stop forward progress until the throttle calls
    /// [`ThrottleController::resume`].
    Defer,
    /// Cancel with the given terminal code.
    Cancel(ErrorCode),
}

/// Handle a deferred throttle uses to resume or cancel its request later.
///
/// Cloneable; safe to move into timers or external policy tasks. Calls made
/// after the request completed are no-ops.
#[derive(Debug, Clone)]
pub struct ThrottleController {
    key: RequestKey,
    tx: mpsc::UnboundedSender<Command>,
}

impl ThrottleController {
    pub(crate) fn new(key: RequestKey, tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { key, tx }
    }

    /// Resume the request deferred at the current checkpoint.
    pub fn resume(&self) {
        let _ = self.tx.send(Command::ThrottleResume { key: self.key });
    }

    /// Cancel the request. The default code reports a policy block.
    pub fn cancel(&self) {
        self.cancel_with(ErrorCode::BlockedByPolicy);
    }

    pub fn cancel_with(&self, code: ErrorCode) {
        let _ = self.tx.send(Command::ThrottleCancel {
            key: self.key,
            code,
        });
    }
}

/// One policy hook in a request's throttle chain.
#[allow(unused_variables)]
pub trait ResourceThrottle: Send {
    /// Short name used in logs when this throttle defers or cancels.
    fn name(&self) -> &'static str;

    fn will_start(&mut self) -> ThrottleDecision {
        ThrottleDecision::Proceed
    }

    fn will_start_network(&mut self) -> ThrottleDecision {
        ThrottleDecision::Proceed
    }

    fn will_process_response(&mut self, head: &ResponseHead) -> ThrottleDecision {
        ThrottleDecision::Proceed
    }
}

/// Host-supplied factory populating each new request's throttle chain.
pub trait ThrottleProvider: Send + Sync {
    /// Build the ordered chain for one request. `controller` resumes or
    /// cancels this request; clone it into any throttle that defers.
    fn throttles_for(
        &self,
        descriptor: &RequestDescriptor,
        controller: &ThrottleController,
    ) -> Vec<Box<dyn ResourceThrottle>>;
}

/// Provider that attaches no throttles.
#[derive(Debug, Default)]
pub struct NoThrottles;

impl ThrottleProvider for NoThrottles {
    fn throttles_for(
        &self,
        _descriptor: &RequestDescriptor,
        _controller: &ThrottleController,
    ) -> Vec<Box<dyn ResourceThrottle>> {
        Vec::new()
    }
}

/// Per-request chain state: the throttles plus the resume position.
pub struct ThrottleChain {
    throttles: Vec<Box<dyn ResourceThrottle>>,
    /// Index of the next throttle to run at the current checkpoint.
    next: usize,
    /// Set while exactly one throttle is deferred.
    deferred_at: Option<Checkpoint>,
}

/// Outcome of running a chain at one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    Completed,
    Deferred,
    Cancelled(ErrorCode),
}

impl ThrottleChain {
    pub fn new(throttles: Vec<Box<dyn ResourceThrottle>>) -> Self {
        Self {
            throttles,
            next: 0,
            deferred_at: None,
        }
    }

    pub fn deferred_at(&self) -> Option<Checkpoint> {
        self.deferred_at
    }

    /// Run the chain at `checkpoint` starting from the first throttle.
    pub fn run(&mut self, checkpoint: Checkpoint, head: Option<&ResponseHead>) -> ChainOutcome {
        assert!(
            self.deferred_at.is_none(),
            "throttle chain run while a throttle is deferred"
        );
        self.next = 0;
        self.advance(checkpoint, head)
    }

    /// Resume after a deferral at `checkpoint`, continuing with the throttle
    /// after the one that deferred.
    pub fn resume(&mut self, head: Option<&ResponseHead>) -> Option<(Checkpoint, ChainOutcome)> {
        let checkpoint = self.deferred_at.take()?;
        self.next += 1;
        Some((checkpoint, self.advance(checkpoint, head)))
    }

    fn advance(&mut self, checkpoint: Checkpoint, head: Option<&ResponseHead>) -> ChainOutcome {
        while self.next < self.throttles.len() {
            let throttle = &mut self.throttles[self.next];
            let decision = match checkpoint {
                Checkpoint::WillStart => throttle.will_start(),
                Checkpoint::WillStartNetwork => throttle.will_start_network(),
                Checkpoint::WillProcessResponse => {
                    let head = head.expect("response checkpoint requires headers");
                    throttle.will_process_response(head)
                }
            };
            match decision {
                ThrottleDecision::Proceed => self.next += 1,
                ThrottleDecision::Defer => {
                    tracing::debug!(throttle = throttle.name(), %checkpoint, "request deferred");
                    self.deferred_at = Some(checkpoint);
                    return ChainOutcome::Deferred;
                }
                ThrottleDecision::Cancel(code) => {
                    tracing::debug!(throttle = throttle.name(), %checkpoint, %code, "request cancelled by throttle");
                    return ChainOutcome::Cancelled(code);
                }
            }
        }
        ChainOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        decisions: Vec<ThrottleDecision>,
        calls: usize,
    }

    impl Scripted {
        fn new(decisions: Vec<ThrottleDecision>) -> Self {
            Self { decisions, calls: 0 }
        }
    }

    impl ResourceThrottle for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn will_start(&mut self) -> ThrottleDecision {
            let decision = self.decisions[self.calls.min(self.decisions.len() - 1)];
            self.calls += 1;
            decision
        }
    }

    #[test]
    fn test_all_proceed() {
        let mut chain = ThrottleChain::new(vec![
            Box::new(Scripted::new(vec![ThrottleDecision::Proceed])),
            Box::new(Scripted::new(vec![ThrottleDecision::Proceed])),
        ]);
        assert_eq!(chain.run(Checkpoint::WillStart, None), ChainOutcome::Completed);
        assert_eq!(chain.deferred_at(), None);
    }

    #[test]
    fn test_defer_then_resume_continues_after_deferring_throttle() {
        let mut chain = ThrottleChain::new(vec![
            Box::new(Scripted::new(vec![ThrottleDecision::Defer, ThrottleDecision::Proceed])),
            Box::new(Scripted::new(vec![ThrottleDecision::Proceed])),
        ]);
        assert_eq!(chain.run(Checkpoint::WillStart, None), ChainOutcome::Deferred);
        assert_eq!(chain.deferred_at(), Some(Checkpoint::WillStart));

        // Resume continues with the *next* throttle; the deferring throttle
        // is not asked again.
        let (checkpoint, outcome) = chain.resume(None).unwrap();
        assert_eq!(checkpoint, Checkpoint::WillStart);
        assert_eq!(outcome, ChainOutcome::Completed);
    }

    #[test]
    fn test_cancel_stops_chain() {
        let mut chain = ThrottleChain::new(vec![
            Box::new(Scripted::new(vec![ThrottleDecision::Cancel(ErrorCode::BlockedByPolicy)])),
            Box::new(Scripted::new(vec![ThrottleDecision::Proceed])),
        ]);
        assert_eq!(
            chain.run(Checkpoint::WillStart, None),
            ChainOutcome::Cancelled(ErrorCode::BlockedByPolicy)
        );
    }

    #[test]
    fn test_resume_without_deferral_is_none() {
        let mut chain = ThrottleChain::new(Vec::new());
        assert!(chain.resume(None).is_none());
    }
}
