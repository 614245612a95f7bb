//! Detached loads: cancelled by the client, still running for the cache.
//!
//! When a detachable request is cancelled (or its client disconnects while
//! it is still loading), the record moves here. The dispatcher alone owns
//! it: no client-visible events are emitted, the body keeps draining, and a
//! grace timer force-kills the job if it does not finish in time. The set
//! is bounded so many small detach-prone requests cannot accumulate;
//! inserting past the bound evicts the oldest detached load.

use std::collections::{HashMap, VecDeque};

use crate::dispatcher::record::LoadRecord;
use crate::messages::RequestKey;

/// Dispatcher-owned set of detached loads, bounded, oldest evicted first.
pub struct DetachedSet {
    max: usize,
    order: VecDeque<RequestKey>,
    records: HashMap<RequestKey, LoadRecord>,
}

impl DetachedSet {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            order: VecDeque::new(),
            records: HashMap::new(),
        }
    }

    /// Insert a detached record. When the set is full, the oldest record is
    /// removed and returned so the caller can kill it.
    pub fn insert(&mut self, record: LoadRecord) -> Option<LoadRecord> {
        debug_assert!(record.is_detached(), "record must be unlinked before detaching");
        let evicted = if self.records.len() >= self.max {
            self.pop_oldest()
        } else {
            None
        };
        self.order.push_back(record.key);
        self.records.insert(record.key, record);
        evicted
    }

    pub fn remove(&mut self, key: RequestKey) -> Option<LoadRecord> {
        let record = self.records.remove(&key)?;
        self.order.retain(|k| *k != key);
        Some(record)
    }

    pub fn get_mut(&mut self, key: RequestKey) -> Option<&mut LoadRecord> {
        self.records.get_mut(&key)
    }

    pub fn contains(&self, key: RequestKey) -> bool {
        self.records.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> Vec<RequestKey> {
        self.order.iter().copied().collect()
    }

    fn pop_oldest(&mut self) -> Option<LoadRecord> {
        let key = self.order.pop_front()?;
        self.records.remove(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::pump::BodyPump;
    use crate::job::{Job, JobContext, ReadOutcome};
    use crate::messages::{ClientId, Priority, RequestDescriptor, RequestId, ResourceKind, RouteId};
    use crate::throttle::ThrottleChain;
    use url::Url;

    struct NullJob;

    impl Job for NullJob {
        fn start(&mut self, _ctx: &JobContext) {}
        fn read(&mut self, _max: usize, _ctx: &JobContext) -> ReadOutcome {
            ReadOutcome::Ready(bytes::Bytes::new())
        }
        fn kill(&mut self) {}
    }

    fn detached_record(n: u64) -> LoadRecord {
        let key = RequestKey::new(ClientId(1), RequestId(n));
        let descriptor = RequestDescriptor::get(
            Url::parse("test://a/").unwrap(),
            ResourceKind::Detachable,
            Priority::Low,
            RouteId(0),
        );
        let mut record = LoadRecord::new(
            key,
            descriptor,
            Box::new(NullJob),
            ThrottleChain::new(Vec::new()),
            BodyPump::new(64),
            0,
        );
        record.owner = None;
        record
    }

    #[test]
    fn test_bounded_insert_evicts_oldest() {
        let mut set = DetachedSet::new(2);
        assert!(set.insert(detached_record(1)).is_none());
        assert!(set.insert(detached_record(2)).is_none());

        let evicted = set.insert(detached_record(3)).expect("oldest should be evicted");
        assert_eq!(evicted.key.request, RequestId(1));
        assert_eq!(set.len(), 2);
        assert!(set.contains(RequestKey::new(ClientId(1), RequestId(3))));
    }

    #[test]
    fn test_remove_updates_order() {
        let mut set = DetachedSet::new(2);
        set.insert(detached_record(1));
        set.insert(detached_record(2));
        set.remove(RequestKey::new(ClientId(1), RequestId(1)));

        // With request 1 gone there is room; no eviction on the next insert.
        assert!(set.insert(detached_record(3)).is_none());
    }
}
