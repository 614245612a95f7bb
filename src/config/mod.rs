//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DispatcherConfig (validated, immutable)
//!     → handed to the dispatcher at construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the dispatcher is built from it
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{AdmissionConfig, DetachConfig, DispatcherConfig, ObservabilityConfig, PumpConfig};
