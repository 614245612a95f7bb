//! The resource loading dispatcher.
//!
//! # Data Flow
//! ```text
//! client connection ──ClientMessage──▶ core.rs (command loop)
//!     → admission.rs (ceilings)
//!     → throttle.rs (will_start / will_start_network)
//!     → job registry (content source selection)
//!     → Job::start
//!     → throttle.rs (will_process_response)
//!     → pump.rs (credit-gated body chunks)
//!     → Completed (exactly once, always last)
//! ```
//!
//! # Design Decisions
//! - One task owns every LoadRecord and all notification ordering; Jobs may
//!   run I/O anywhere but deliver callbacks as commands into the same queue
//! - Cancellation is asynchronous with respect to the caller: a cancel
//!   enqueues work and returns; records are destroyed on a later turn
//! - Detached records are owned by a dedicated bounded set, not by a
//!   dangling client reference

pub mod core;
pub mod detach;
pub mod pump;
pub mod record;
pub mod routes;
pub mod snapshot;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::client::ClientSink;
use crate::messages::{ClientId, ClientMessage, ErrorCode, RequestKey, ResponseHead, RouteId};
use snapshot::RouteLoadInfo;

pub use self::core::{Dispatcher, DispatcherHandle};
pub use record::LoadState;

/// Everything the dispatcher loop processes, in arrival order.
///
/// Client traffic, host control operations, Job callbacks, throttle
/// resumptions, and timer expiries all funnel through this one queue; that
/// serialization is what makes the dispatcher's state safe without locks.
#[derive(Debug)]
pub enum Command {
    /// A client connection came up.
    AttachClient {
        client_id: ClientId,
        sink: ClientSink,
    },
    /// A client connection went away; its loads are cancelled or detached.
    ClientGone { client_id: ClientId },
    /// A protocol message from a connected client.
    FromClient {
        client_id: ClientId,
        message: ClientMessage,
    },

    /// Queue future requests for this (client, route).
    BlockRoute { client_id: ClientId, route: RouteId },
    /// Drain a blocked route's queue through normal request creation.
    ResumeRoute { client_id: ClientId, route: RouteId },
    /// Discard a blocked route's queue without starting anything.
    CancelBlockedRoute { client_id: ClientId, route: RouteId },
    /// Route teardown: cancel all non-detached loads for the route.
    CancelRoute { client_id: ClientId, route: RouteId },

    /// Flag a load for ownership transfer; ordinary cancels from the
    /// current owner are ignored until a new owner claims it.
    MarkPendingTransfer { key: RequestKey },

    /// A deferred throttle resumed its request.
    ThrottleResume { key: RequestKey },
    /// A throttle cancelled its request (possibly while deferred).
    ThrottleCancel { key: RequestKey, code: ErrorCode },

    /// Job callback: headers are available.
    JobStarted { key: RequestKey, head: ResponseHead },
    /// Job callback: the load was redirected.
    JobRedirected { key: RequestKey, new_url: Url },
    /// Job callback: a pending read finished. An empty chunk is end of body.
    JobReadDone {
        key: RequestKey,
        result: Result<Bytes, ErrorCode>,
    },
    /// Job callback: terminal failure outside a read.
    JobFailed { key: RequestKey, code: ErrorCode },

    /// A detached load's grace period expired.
    DetachTimeout { key: RequestKey },

    /// Diagnostics: most interesting in-flight request per route.
    Snapshot {
        reply: oneshot::Sender<Vec<RouteLoadInfo>>,
    },

    /// Stop the loop, killing every remaining load.
    Shutdown,
}

pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;
