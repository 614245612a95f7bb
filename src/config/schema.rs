//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! dispatcher. All types derive Serde traits for deserialization from config
//! files, and every field has a default so a minimal (or empty) config is
//! valid.
//!
//! The numeric defaults for admission ceilings and the detach grace period
//! are policy constants; deployments tune them per platform.

use serde::{Deserialize, Serialize};

/// Root configuration for the resource loading dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Admission ceilings for in-flight requests.
    pub admission: AdmissionConfig,

    /// Body delivery and buffering settings.
    pub pump: PumpConfig,

    /// Detachable request handling.
    pub detach: DetachConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Admission ledger ceilings.
///
/// Two independent bounds are enforced: a per-client count/cost ceiling and
/// a global count ceiling. A request that would exceed either is rejected
/// before any Job is created.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum in-flight requests for any single client.
    pub max_requests_per_client: usize,

    /// Maximum in-flight requests across all clients.
    pub max_global_requests: usize,

    /// Maximum approximate byte cost of one client's in-flight requests.
    pub max_cost_per_client: u64,

    /// Fixed per-request overhead added to the cost estimate. The estimate
    /// is a heuristic, typically dominated by this constant.
    pub avg_bytes_per_request: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            // Per-client count is 45% of the global ceiling so no single
            // client can monopolize the dispatcher.
            max_requests_per_client: 2_700,
            max_global_requests: 6_000,
            // 25 MB of estimated cost per client.
            max_cost_per_client: 26_214_400,
            avg_bytes_per_request: 4_400,
        }
    }
}

/// Data pump settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Maximum bytes read from a Job per chunk.
    pub chunk_size: usize,

    /// Capacity of the shared body buffer a client reads chunks from.
    pub shared_buffer_size: usize,

    /// Directory for download-to-file temporaries. Empty means the OS temp
    /// directory.
    pub download_dir: String,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32 * 1024,
            shared_buffer_size: 512 * 1024,
            download_dir: String::new(),
        }
    }
}

/// Detachable request settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetachConfig {
    /// How long a detached load may keep running before it is force
    /// cancelled.
    pub grace_period_ms: u64,

    /// Upper bound on concurrently detached loads; inserting past the bound
    /// evicts the oldest.
    pub max_detached_loads: usize,
}

impl Default for DetachConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 30_000,
            max_detached_loads: 64,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter when RUST_LOG is not set.
    pub log_level: String,

    /// Emit JSON logs instead of human-readable output.
    pub log_json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "loadgate=info".to_string(),
            log_json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = DispatcherConfig::default();
        assert!(config.admission.max_requests_per_client <= config.admission.max_global_requests);
        assert!(config.pump.chunk_size <= config.pump.shared_buffer_size);
        assert!(config.detach.grace_period_ms > 0);
    }

    #[test]
    fn test_empty_toml_parses() {
        let config: DispatcherConfig = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.admission.max_global_requests, 6_000);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: DispatcherConfig = toml::from_str(
            "[admission]\nmax_requests_per_client = 2\n\n[detach]\ngrace_period_ms = 50\n",
        )
        .unwrap();
        assert_eq!(config.admission.max_requests_per_client, 2);
        assert_eq!(config.detach.grace_period_ms, 50);
        // Untouched sections keep their defaults.
        assert_eq!(config.pump.chunk_size, 32 * 1024);
    }
}
