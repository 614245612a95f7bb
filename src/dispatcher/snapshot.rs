//! Introspection: per-route load snapshots for diagnostics.
//!
//! For every (client, route) pair with in-flight requests, the snapshot
//! reports the single most interesting request: highest priority first,
//! ties broken by the earliest request id. Detached loads have no client
//! and are not reported. Snapshots are diagnostic only and never feed back
//! into control flow.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::dispatcher::record::{LoadRecord, LoadState};
use crate::messages::{ClientId, RequestId, RouteId, UploadProgress};

/// Snapshot of the most interesting request on one route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteLoadInfo {
    pub client: ClientId,
    pub route: RouteId,
    pub request: RequestId,
    pub url: Url,
    pub state: LoadState,
    pub upload: Option<UploadProgress>,
}

/// Reduce all in-flight records to one entry per (client, route).
pub fn most_interesting<'a>(records: impl Iterator<Item = &'a LoadRecord>) -> Vec<RouteLoadInfo> {
    let mut per_route: HashMap<(ClientId, RouteId), &LoadRecord> = HashMap::new();

    for record in records {
        let Some(client) = record.owner else {
            continue;
        };
        let slot = per_route.entry((client, record.descriptor.route)).or_insert(record);
        if more_interesting(record, slot) {
            *slot = record;
        }
    }

    let mut infos: Vec<RouteLoadInfo> = per_route
        .into_iter()
        .map(|((client, route), record)| RouteLoadInfo {
            client,
            route,
            request: record.key.request,
            url: record.descriptor.url.clone(),
            state: record.load_state(),
            upload: record.job.upload_progress(),
        })
        .collect();
    infos.sort_by_key(|info| (info.client, info.route));
    infos
}

fn more_interesting(a: &LoadRecord, b: &LoadRecord) -> bool {
    (a.priority, std::cmp::Reverse(a.key.request)) > (b.priority, std::cmp::Reverse(b.key.request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::pump::BodyPump;
    use crate::job::{Job, JobContext, ReadOutcome};
    use crate::messages::{Priority, RequestDescriptor, RequestKey, ResourceKind};
    use crate::throttle::ThrottleChain;

    struct NullJob;

    impl Job for NullJob {
        fn start(&mut self, _ctx: &JobContext) {}
        fn read(&mut self, _max: usize, _ctx: &JobContext) -> ReadOutcome {
            ReadOutcome::Ready(bytes::Bytes::new())
        }
        fn kill(&mut self) {}
    }

    fn record(client: u64, request: u64, route: u64, priority: Priority) -> LoadRecord {
        let mut descriptor = RequestDescriptor::get(
            Url::parse("test://a/").unwrap(),
            ResourceKind::Normal,
            priority,
            RouteId(route),
        );
        descriptor.priority = priority;
        LoadRecord::new(
            RequestKey::new(ClientId(client), RequestId(request)),
            descriptor,
            Box::new(NullJob),
            ThrottleChain::new(Vec::new()),
            BodyPump::new(64),
            0,
        )
    }

    #[test]
    fn test_highest_priority_wins() {
        let records = vec![
            record(1, 1, 1, Priority::Low),
            record(1, 2, 1, Priority::High),
        ];
        let infos = most_interesting(records.iter());
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].request, RequestId(2));
    }

    #[test]
    fn test_priority_tie_broken_by_earliest_request() {
        let records = vec![
            record(1, 9, 1, Priority::Medium),
            record(1, 3, 1, Priority::Medium),
            record(1, 5, 1, Priority::Medium),
        ];
        let infos = most_interesting(records.iter());
        assert_eq!(infos[0].request, RequestId(3));
    }

    #[test]
    fn test_routes_reported_separately() {
        let records = vec![
            record(1, 1, 1, Priority::Low),
            record(1, 2, 2, Priority::Low),
            record(2, 3, 1, Priority::Low),
        ];
        let infos = most_interesting(records.iter());
        assert_eq!(infos.len(), 3);
    }

    #[test]
    fn test_detached_records_skipped() {
        let mut detached = record(1, 1, 1, Priority::High);
        detached.owner = None;
        let records = vec![detached, record(1, 2, 1, Priority::Idle)];
        let infos = most_interesting(records.iter());
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].request, RequestId(2));
    }
}
