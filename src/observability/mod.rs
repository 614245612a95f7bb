//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatcher / jobs / admission produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON or pretty)
//!     → Whatever metrics recorder the host installs
//! ```
//!
//! # Design Decisions
//! - Log fields use the protocol's Display forms (`client-N/req-N`) so one
//!   request can be traced across subsystems by grepping its key
//! - Metrics go through the `metrics` facade; this crate never installs a
//!   recorder, the embedding host does

pub mod logging;
pub mod metrics;
