//! Admission ledger: bounds on in-flight requests.
//!
//! # Responsibilities
//! - Track per-client request counts and approximate byte cost
//! - Track the global in-flight request count
//! - Reject a request over either ceiling before any Job exists
//!
//! # Design Decisions
//! - The cost estimate is a heuristic (fixed overhead plus variable-length
//!   request strings), not an exact accounting
//! - Mutated only by the dispatcher task, so plain collections suffice
//! - `release` must be called exactly once per admitted request; the caller
//!   guards this with a flag on the load record

use std::collections::HashMap;

use crate::config::AdmissionConfig;
use crate::messages::{ClientId, RequestDescriptor};

/// Per-client running totals.
#[derive(Debug, Default, Clone, Copy)]
struct ClientStats {
    count: usize,
    cost: u64,
}

/// Tracks in-flight request counts and costs against configured ceilings.
#[derive(Debug)]
pub struct AdmissionLedger {
    config: AdmissionConfig,
    per_client: HashMap<ClientId, ClientStats>,
    global_count: usize,
}

impl AdmissionLedger {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            per_client: HashMap::new(),
            global_count: 0,
        }
    }

    /// Approximate memory cost of starting this request.
    ///
    /// Fixed per-request overhead plus the byte length of the method, URL,
    /// and upload body. The variable part is a minor contribution for
    /// typical requests.
    pub fn estimate_cost(&self, descriptor: &RequestDescriptor) -> u64 {
        let strings_cost = descriptor.method.len()
            + descriptor.url.as_str().len()
            + descriptor.upload.as_ref().map_or(0, |b| b.len());
        self.config.avg_bytes_per_request + strings_cost as u64
    }

    /// Admit a request, charging `cost` to `client`. Returns false without
    /// charging anything when either ceiling would be exceeded.
    pub fn try_admit(&mut self, client: ClientId, cost: u64) -> bool {
        if self.global_count >= self.config.max_global_requests {
            tracing::debug!(%client, global = self.global_count, "admission rejected: global ceiling");
            return false;
        }
        let stats = self.per_client.entry(client).or_default();
        if stats.count >= self.config.max_requests_per_client
            || stats.cost.saturating_add(cost) > self.config.max_cost_per_client
        {
            tracing::debug!(
                %client,
                count = stats.count,
                cost = stats.cost,
                request_cost = cost,
                "admission rejected: per-client ceiling"
            );
            return false;
        }
        stats.count += 1;
        stats.cost += cost;
        self.global_count += 1;
        true
    }

    /// Charge a request to `client` without ceiling checks. Used when an
    /// already-admitted load is transferred to a new owner.
    pub fn force_admit(&mut self, client: ClientId, cost: u64) {
        let stats = self.per_client.entry(client).or_default();
        stats.count += 1;
        stats.cost = stats.cost.saturating_add(cost);
        self.global_count += 1;
    }

    /// Release an admitted request. Call exactly once per admission.
    pub fn release(&mut self, client: ClientId, cost: u64) {
        self.global_count = self.global_count.saturating_sub(1);
        if let Some(stats) = self.per_client.get_mut(&client) {
            stats.count = stats.count.saturating_sub(1);
            stats.cost = stats.cost.saturating_sub(cost);
            if stats.count == 0 {
                self.per_client.remove(&client);
            }
        }
    }

    pub fn global_count(&self) -> usize {
        self.global_count
    }

    pub fn client_count(&self, client: ClientId) -> usize {
        self.per_client.get(&client).map_or(0, |s| s.count)
    }

    pub fn client_cost(&self, client: ClientId) -> u64 {
        self.per_client.get(&client).map_or(0, |s| s.cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Priority, RequestKey, ResourceKind, RouteId};
    use url::Url;

    fn ledger(per_client: usize, global: usize) -> AdmissionLedger {
        AdmissionLedger::new(AdmissionConfig {
            max_requests_per_client: per_client,
            max_global_requests: global,
            max_cost_per_client: 1_000_000,
            avg_bytes_per_request: 4_400,
        })
    }

    #[test]
    fn test_per_client_count_ceiling() {
        let mut ledger = ledger(2, 10);
        let a = ClientId(1);
        assert!(ledger.try_admit(a, 100));
        assert!(ledger.try_admit(a, 100));
        assert!(!ledger.try_admit(a, 100));
        // Another client is unaffected.
        assert!(ledger.try_admit(ClientId(2), 100));
    }

    #[test]
    fn test_global_ceiling() {
        let mut ledger = ledger(10, 3);
        assert!(ledger.try_admit(ClientId(1), 1));
        assert!(ledger.try_admit(ClientId(2), 1));
        assert!(ledger.try_admit(ClientId(3), 1));
        assert!(!ledger.try_admit(ClientId(4), 1));
    }

    #[test]
    fn test_cost_ceiling() {
        let mut ledger = AdmissionLedger::new(AdmissionConfig {
            max_requests_per_client: 100,
            max_global_requests: 100,
            max_cost_per_client: 10_000,
            avg_bytes_per_request: 4_400,
        });
        let a = ClientId(1);
        assert!(ledger.try_admit(a, 6_000));
        assert!(!ledger.try_admit(a, 6_000));
        assert_eq!(ledger.client_count(a), 1);
    }

    #[test]
    fn test_release_frees_capacity() {
        let mut ledger = ledger(1, 1);
        let a = ClientId(1);
        assert!(ledger.try_admit(a, 50));
        assert!(!ledger.try_admit(a, 50));
        ledger.release(a, 50);
        assert_eq!(ledger.global_count(), 0);
        assert_eq!(ledger.client_cost(a), 0);
        assert!(ledger.try_admit(a, 50));
    }

    #[test]
    fn test_failed_admit_charges_nothing() {
        let mut ledger = ledger(1, 10);
        let a = ClientId(1);
        assert!(ledger.try_admit(a, 50));
        assert!(!ledger.try_admit(a, 50));
        assert_eq!(ledger.client_count(a), 1);
        assert_eq!(ledger.client_cost(a), 50);
        assert_eq!(ledger.global_count(), 1);
    }

    #[test]
    fn test_cost_estimate_includes_upload() {
        let ledger = ledger(1, 1);
        let url = Url::parse("test://host/path").unwrap();
        let mut desc = RequestDescriptor::get(url, ResourceKind::Normal, Priority::Medium, RouteId(0));
        let base = ledger.estimate_cost(&desc);
        assert_eq!(base, 4_400 + 3 + desc.url.as_str().len() as u64);

        desc.upload = Some(bytes::Bytes::from_static(&[0u8; 16]));
        assert_eq!(ledger.estimate_cost(&desc), base + 16);
        // Transfer marker does not change the estimate.
        desc.transferred_from = Some(RequestKey::new(ClientId(9), crate::messages::RequestId(9)));
        assert_eq!(ledger.estimate_cost(&desc), base + 16);
    }
}
