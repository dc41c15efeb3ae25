//! Error types for the Strata planner

use thiserror::Error;

/// Main error type for Strata operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed service definition; names the offending field and service key
    #[error("validation error for service '{service}', field '{field}': {message}")]
    Validation {
        /// Service key the error belongs to
        service: String,
        /// Offending field
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// Global configuration error (not tied to a single service)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Two or more services claim the same routing priority
    #[error("priority conflict: priority {priority} claimed by services {services:?}")]
    PriorityConflict {
        /// The contested priority
        priority: u32,
        /// Every service key claiming it
        services: Vec<String>,
    },

    /// Sidecar reservations exceed the parent compute allocation
    #[error("resource budget exceeded for service '{service}': {message}")]
    BudgetExceeded {
        /// Service whose synthesis failed
        service: String,
        /// Which reservation overran the budget
        message: String,
    },

    /// Autoscaling bounds are inconsistent
    #[error(
        "invalid scaling bounds for service '{service}': \
         min {min} <= desired {desired} <= max {max} does not hold"
    )]
    ScalingBounds {
        /// Service whose synthesis failed
        service: String,
        /// Minimum capacity
        min: u32,
        /// Desired capacity
        desired: u32,
        /// Maximum capacity
        max: u32,
    },

    /// Certificate validation did not complete within the configured timeout
    #[error("certificate validation timed out for '{domain}': unresolved records {unresolved:?}")]
    ValidationTimeout {
        /// Subject domain of the certificate
        domain: String,
        /// Validation records that never resolved
        unresolved: Vec<String>,
    },

    /// Certificate is in the wrong state for the attempted operation
    #[error("certificate '{certificate}' is {state}, expected {expected}")]
    CertificateState {
        /// Authority-assigned certificate identifier
        certificate: String,
        /// State the certificate is actually in
        state: &'static str,
        /// State the operation requires
        expected: &'static str,
    },

    /// Cycle detected in the derived resource graph.
    ///
    /// This is an internal-consistency defect in entity modeling, not a
    /// user-fixable configuration problem.
    #[error("internal error: dependency graph cycle involving {0}")]
    GraphCycle(String),

    /// Certificate authority call failed
    #[error("certificate authority error: {0}")]
    Authority(String),

    /// DNS record publisher call failed
    #[error("DNS publisher error: {0}")]
    Dns(String),

    /// Resource apply/destroy operation failed
    #[error("apply error: {0}")]
    Apply(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error (config file reading in the CLI)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a validation error for a service field
    pub fn validation(
        service: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            service: service.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a budget-exceeded error for a service
    pub fn budget_exceeded(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BudgetExceeded {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create an authority error with the given message
    pub fn authority(msg: impl Into<String>) -> Self {
        Self::Authority(msg.into())
    }

    /// Create a DNS publisher error with the given message
    pub fn dns(msg: impl Into<String>) -> Self {
        Self::Dns(msg.into())
    }

    /// Create a certificate state-transition error
    pub fn certificate_state(
        certificate: impl Into<String>,
        state: &'static str,
        expected: &'static str,
    ) -> Self {
        Self::CertificateState {
            certificate: certificate.into(),
            state,
            expected,
        }
    }

    /// Create an apply error with the given message
    pub fn apply(msg: impl Into<String>) -> Self {
        Self::Apply(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// True for errors an operator can fix by editing the service catalog
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Configuration(_)
                | Self::PriorityConflict { .. }
                | Self::BudgetExceeded { .. }
                | Self::ScalingBounds { .. }
        )
    }
}
