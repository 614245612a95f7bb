//! Route blocking: suspend, resume, or discard a route's requests in bulk.
//!
//! While a route is blocked, arriving requests are queued in submission
//! order without admission checks, throttles, or Jobs. Resuming drains the
//! queue through the normal creation path; cancelling discards it so the
//! queued requests never produce network activity or client notifications.

use std::collections::{HashMap, VecDeque};

use crate::messages::{RequestDescriptor, RequestId, RouteId};

/// A queued request waiting for its route to be unblocked.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub descriptor: RequestDescriptor,
}

/// Per-client set of blocked routes and their queues.
#[derive(Debug, Default)]
pub struct RouteBlockSet {
    blocked: HashMap<RouteId, VecDeque<PendingRequest>>,
}

impl RouteBlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start blocking a route. Blocking an already-blocked route keeps its
    /// queue.
    pub fn block(&mut self, route: RouteId) {
        self.blocked.entry(route).or_default();
    }

    pub fn is_blocked(&self, route: RouteId) -> bool {
        self.blocked.contains_key(&route)
    }

    /// Queue a request for a blocked route. Returns false if the route is
    /// not blocked.
    pub fn enqueue(&mut self, route: RouteId, pending: PendingRequest) -> bool {
        match self.blocked.get_mut(&route) {
            Some(queue) => {
                queue.push_back(pending);
                true
            }
            None => false,
        }
    }

    /// Unblock a route, returning its queue in arrival order.
    pub fn resume(&mut self, route: RouteId) -> VecDeque<PendingRequest> {
        self.blocked.remove(&route).unwrap_or_default()
    }

    /// Unblock a route, discarding its queue. Returns the number dropped.
    pub fn cancel(&mut self, route: RouteId) -> usize {
        self.blocked.remove(&route).map_or(0, |queue| queue.len())
    }

    pub fn blocked_routes(&self) -> impl Iterator<Item = RouteId> + '_ {
        self.blocked.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Priority, ResourceKind};
    use url::Url;

    fn pending(n: u64) -> PendingRequest {
        PendingRequest {
            request_id: RequestId(n),
            descriptor: RequestDescriptor::get(
                Url::parse("test://a/").unwrap(),
                ResourceKind::Normal,
                Priority::Medium,
                RouteId(1),
            ),
        }
    }

    #[test]
    fn test_enqueue_requires_block() {
        let mut set = RouteBlockSet::new();
        assert!(!set.enqueue(RouteId(1), pending(1)));

        set.block(RouteId(1));
        assert!(set.is_blocked(RouteId(1)));
        assert!(set.enqueue(RouteId(1), pending(1)));
    }

    #[test]
    fn test_resume_preserves_arrival_order() {
        let mut set = RouteBlockSet::new();
        set.block(RouteId(1));
        for n in 0..4 {
            assert!(set.enqueue(RouteId(1), pending(n)));
        }
        let drained: Vec<_> = set.resume(RouteId(1)).into_iter().map(|p| p.request_id.0).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
        assert!(!set.is_blocked(RouteId(1)));
    }

    #[test]
    fn test_cancel_discards_queue() {
        let mut set = RouteBlockSet::new();
        set.block(RouteId(2));
        set.enqueue(RouteId(2), pending(1));
        set.enqueue(RouteId(2), pending(2));
        assert_eq!(set.cancel(RouteId(2)), 2);
        assert!(!set.is_blocked(RouteId(2)));
        assert!(set.resume(RouteId(2)).is_empty());
    }

    #[test]
    fn test_reblocking_keeps_queue() {
        let mut set = RouteBlockSet::new();
        set.block(RouteId(3));
        set.enqueue(RouteId(3), pending(7));
        set.block(RouteId(3));
        assert_eq!(set.resume(RouteId(3)).len(), 1);
    }
}
