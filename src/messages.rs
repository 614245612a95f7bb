//! Client/dispatcher protocol types.
//!
//! # Responsibilities
//! - Define the request identifiers shared by both sides of the channel
//! - Define the closed message enums exchanged with client connections
//! - Define the terminal error codes a request can complete with
//!
//! # Design Decisions
//! - Both message sets are closed enums matched exhaustively at the
//!   serialization boundary; adding a message kind is a compile error at
//!   every match site
//! - `request_id` is chosen by the client and unique per client at any
//!   instant; the dispatcher never synthesizes request ids
//! - No serialization format is prescribed; types derive Serde so any
//!   realization of the channel can encode them

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Identifier of one renderer-like client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Client-chosen identifier for one request, unique per client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Identifier of a route (frame/browsing-context) within a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteId(pub u64);

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "route-{}", self.0)
    }
}

/// Globally unique key of one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub client: ClientId,
    pub request: RequestId,
}

impl RequestKey {
    pub fn new(client: ClientId, request: RequestId) -> Self {
        Self { client, request }
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.client, self.request)
    }
}

/// Resource kinds with distinct cancellation/delivery semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Ordinary subresource; client cancel kills the load.
    Normal,
    /// Speculative load (e.g. prefetch); client cancel detaches instead of
    /// killing, letting the load finish for caching purposes.
    Detachable,
    /// Top-level document load.
    MainDocument,
    /// Body is spooled to a temporary file instead of chunk buffers.
    DownloadToFile,
}

impl ResourceKind {
    pub fn is_detachable(self) -> bool {
        matches!(self, ResourceKind::Detachable)
    }

    pub fn is_download(self) -> bool {
        matches!(self, ResourceKind::DownloadToFile)
    }
}

/// Request priority, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Idle,
    Low,
    Medium,
    High,
}

/// Opaque security/identity metadata attached to a response (e.g. a
/// certificate handle). Carried across ownership transfers untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInfo {
    pub cert_id: u32,
}

/// Response metadata a Job reports once headers are available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseHead {
    pub status: u16,
    pub mime_type: String,
    /// Total body length when known up front.
    pub content_length: Option<u64>,
    pub security_info: Option<SecurityInfo>,
}

/// Upload progress as (bytes sent, total bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub sent: u64,
    pub total: u64,
}

/// Everything needed to create one load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: String,
    pub url: Url,
    pub kind: ResourceKind,
    pub priority: Priority,
    pub route: RouteId,
    /// Header name/value pairs, opaque to the dispatcher.
    pub headers: Vec<(String, String)>,
    /// Optional upload body; counted into the admission cost estimate.
    pub upload: Option<Bytes>,
    /// Set when this request re-attaches an in-flight load marked for
    /// transfer by its previous owner.
    pub transferred_from: Option<RequestKey>,
}

impl RequestDescriptor {
    /// Convenience constructor for the common GET case.
    pub fn get(url: Url, kind: ResourceKind, priority: Priority, route: RouteId) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            kind,
            priority,
            route,
            headers: Vec::new(),
            upload: None,
            transferred_from: None,
        }
    }

    /// Value of the first header with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Terminal outcome of a request. Every request completes with exactly one
/// of these; admission and policy failures share the shape of a failed load
/// and differ only in code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ErrorCode {
    #[error("ok")]
    Ok,
    /// Over the per-client or global admission ceiling; no Job was created.
    #[error("insufficient resources")]
    InsufficientResources,
    /// A policy throttle cancelled the request.
    #[error("blocked by policy")]
    BlockedByPolicy,
    /// Explicit client cancel, client/route teardown, or the synthetic
    /// completion reported when a detachable request detaches.
    #[error("aborted")]
    Aborted,
    /// A detached load did not finish within the grace period.
    #[error("timed out")]
    TimedOut,
    #[error("failed")]
    Failed,
    #[error("invalid URL")]
    InvalidUrl,
    /// No registered job factory accepted the URL.
    #[error("unsupported scheme")]
    UnsupportedScheme,
    /// Multi-range request against a single-range-capable source.
    #[error("range not satisfiable")]
    RangeNotSatisfiable,
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        matches!(self, ErrorCode::Ok)
    }
}

/// Messages a client connection sends to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    CreateRequest {
        request_id: RequestId,
        descriptor: RequestDescriptor,
    },
    CancelRequest {
        request_id: RequestId,
    },
    FollowRedirect {
        request_id: RequestId,
    },
    ChangePriority {
        request_id: RequestId,
        priority: Priority,
    },
    /// Acknowledges consumption of the outstanding `DataAvailable` chunk.
    AcknowledgeData {
        request_id: RequestId,
    },
    /// Drops the client's reference to a registered download file.
    ReleaseTemporaryFile {
        request_id: RequestId,
    },
}

/// Messages the dispatcher sends to a client connection.
///
/// Per-request ordering: `ResponseStarted`, then zero or more body
/// notifications, then exactly one `Completed`, always last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatcherMessage {
    ResponseStarted {
        request_id: RequestId,
        status: u16,
        mime_type: String,
        content_length: Option<u64>,
        security_info: Option<SecurityInfo>,
    },
    Redirected {
        request_id: RequestId,
        new_url: Url,
    },
    /// A chunk is available at `offset..offset + length` of the shared
    /// buffer. Must be acknowledged before the next chunk is delivered.
    DataAvailable {
        request_id: RequestId,
        offset: usize,
        length: usize,
        data: Bytes,
    },
    /// Cumulative bytes written to the temporary download file so far.
    /// No acknowledgement is expected.
    DataDownloaded {
        request_id: RequestId,
        length: u64,
    },
    Completed {
        request_id: RequestId,
        error: ErrorCode,
    },
}

impl DispatcherMessage {
    pub fn request_id(&self) -> RequestId {
        match self {
            DispatcherMessage::ResponseStarted { request_id, .. }
            | DispatcherMessage::Redirected { request_id, .. }
            | DispatcherMessage::DataAvailable { request_id, .. }
            | DispatcherMessage::DataDownloaded { request_id, .. }
            | DispatcherMessage::Completed { request_id, .. } => *request_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatcherMessage::Completed { .. })
    }
}
