//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ceilings > 0, buffer sizes coherent)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Validation is a pure function: DispatcherConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::DispatcherConfig;

/// One semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `admission.max_global_requests`.
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &DispatcherConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut require = |ok: bool, field: &str, message: &str| {
        if !ok {
            errors.push(ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        }
    };

    let a = &config.admission;
    require(a.max_requests_per_client > 0, "admission.max_requests_per_client", "must be > 0");
    require(a.max_global_requests > 0, "admission.max_global_requests", "must be > 0");
    require(
        a.max_requests_per_client <= a.max_global_requests,
        "admission.max_requests_per_client",
        "must not exceed max_global_requests",
    );
    require(a.max_cost_per_client > 0, "admission.max_cost_per_client", "must be > 0");

    let p = &config.pump;
    require(p.chunk_size > 0, "pump.chunk_size", "must be > 0");
    require(
        p.chunk_size <= p.shared_buffer_size,
        "pump.chunk_size",
        "must not exceed shared_buffer_size",
    );

    let d = &config.detach;
    require(d.grace_period_ms > 0, "detach.grace_period_ms", "must be > 0");
    require(d.max_detached_loads > 0, "detach.max_detached_loads", "must be > 0");

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&DispatcherConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = DispatcherConfig::default();
        config.admission.max_global_requests = 0;
        config.pump.chunk_size = 0;
        config.detach.grace_period_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        // max_global_requests = 0 also trips the per-client <= global check.
        assert!(errors.len() >= 3);
        assert!(errors.iter().any(|e| e.field == "pump.chunk_size"));
    }

    #[test]
    fn test_chunk_larger_than_buffer_rejected() {
        let mut config = DispatcherConfig::default();
        config.pump.chunk_size = config.pump.shared_buffer_size + 1;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("shared_buffer_size"));
    }
}
