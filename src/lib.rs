//! Strata - declarative service orchestration planner
//!
//! Strata takes a declarative catalog of named services and derives the full
//! set of dependent resources each one needs: routing rules on a shared
//! gateway, compute definitions with optional sidecars, autoscaling policy,
//! service-discovery registration, an optional CDN front-end, and a
//! DNS-validated certificate pipeline.
//!
//! # Architecture
//!
//! Strata is a planning layer, not a control plane:
//! - Synthesis is pure: the same catalog always produces the same plan,
//!   so re-planning never churns resources that did not change.
//! - Asynchronous state (DNS propagation for certificate validation) is
//!   modeled as an explicit, cancellable polling state machine.
//! - Resource ordering is an explicit dependency graph; nothing reaches for
//!   another resource's output by name lookup.
//!
//! # Modules
//!
//! - [`spec`] - Service catalog types, normalization, and validation
//! - [`priority`] - Deterministic gateway rule priority allocation
//! - [`synth`] - Per-service derivation of the dependent resource set
//! - [`cert`] - Certificate issuance/validation state machine
//! - [`graph`] - Dependency graph and convergence engine
//! - [`planner`] - Unified front door wiring registry, allocator, synthesizer
//! - [`retry`] - Exponential backoff with jitter for polling loops
//! - [`error`] - Error types for the planner

#![deny(missing_docs)]

pub mod cert;
pub mod error;
pub mod graph;
pub mod planner;
pub mod priority;
pub mod retry;
pub mod spec;
pub mod synth;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// These constants define the default values used throughout Strata.
// Centralizing them here ensures consistency across catalog defaults, the
// planner, and test fixtures.

/// Default base priority for auto-allocated gateway routing rules
pub const DEFAULT_BASE_PRIORITY: u32 = 100;

/// Highest priority a gateway listener accepts for a routing rule
pub const MAX_RULE_PRIORITY: u32 = 50_000;

/// Default overall timeout for certificate validation polling, in seconds
pub const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 300;

/// Fixed authority region for edge-distribution certificates
///
/// Edge certificates must be requested against the global authority region
/// regardless of where the workloads themselves deploy.
pub const EDGE_CERTIFICATE_REGION: &str = "us-east-1";

/// Default number of resource operations applied in parallel within one
/// dependency level of the convergence engine
pub const DEFAULT_APPLY_PARALLELISM: usize = 4;
