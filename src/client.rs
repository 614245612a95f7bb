//! Client connection bookkeeping.
//!
//! # Responsibilities
//! - Hold the outgoing message sink for one renderer-like peer
//! - Track which request ids the client currently owns
//! - Track the client's blocked routes and their queued requests
//!
//! # Design Decisions
//! - The sink is an unbounded sender; per-request backpressure is the data
//!   pump's credit protocol, not channel capacity
//! - A send to a disconnected peer is not an error here; disconnection is
//!   handled when the host reports the client gone

use std::collections::HashSet;

use tokio::sync::mpsc;

use crate::dispatcher::routes::RouteBlockSet;
use crate::messages::{ClientId, DispatcherMessage, RequestId};

/// Sink end of one client's notification channel.
pub type ClientSink = mpsc::UnboundedSender<DispatcherMessage>;

/// Dispatcher-side state for one connected client.
pub struct ClientConnection {
    pub id: ClientId,
    sink: ClientSink,
    /// Request ids currently owned by this client (excludes detached loads).
    requests: HashSet<RequestId>,
    /// Blocked routes and their queued requests.
    pub blocked_routes: RouteBlockSet,
}

impl ClientConnection {
    pub fn new(id: ClientId, sink: ClientSink) -> Self {
        Self {
            id,
            sink,
            requests: HashSet::new(),
            blocked_routes: RouteBlockSet::new(),
        }
    }

    pub fn send(&self, message: DispatcherMessage) {
        if self.sink.send(message).is_err() {
            tracing::trace!(client = %self.id, "dropping notification for disconnected client");
        }
    }

    pub fn add_request(&mut self, id: RequestId) {
        self.requests.insert(id);
    }

    pub fn remove_request(&mut self, id: RequestId) {
        self.requests.remove(&id);
    }

    pub fn owns_request(&self, id: RequestId) -> bool {
        self.requests.contains(&id)
    }

    pub fn request_ids(&self) -> Vec<RequestId> {
        self.requests.iter().copied().collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tracking() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = ClientConnection::new(ClientId(1), tx);
        client.add_request(RequestId(5));
        assert!(client.owns_request(RequestId(5)));
        client.remove_request(RequestId(5));
        assert!(!client.owns_request(RequestId(5)));
        assert_eq!(client.request_count(), 0);
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = ClientConnection::new(ClientId(1), tx);
        drop(rx);
        client.send(DispatcherMessage::Completed {
            request_id: RequestId(1),
            error: crate::messages::ErrorCode::Ok,
        });
    }
}
