//! Raw input types for the service catalog
//!
//! These types mirror the wire shape of a user-declared catalog entry before
//! normalization. Defaults are filled and constraints checked by the
//! [`Registry`](crate::spec::Registry); nothing here performs validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Feature flags controlling which optional sub-resources a service gets
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    /// Route this service through the shared gateway via a domain-matched rule
    #[serde(default)]
    pub expose_via_gateway: bool,

    /// Attach an autoscaling policy to the compute unit
    #[serde(default)]
    pub enable_autoscaling: bool,

    /// Co-locate a telemetry sidecar with the primary container
    #[serde(default)]
    pub enable_telemetry_sidecar: bool,

    /// Co-locate a background worker container with the primary container
    #[serde(default)]
    pub enable_worker_container: bool,

    /// Register a resolvable name in the discovery namespace
    #[serde(default)]
    pub enable_service_discovery: bool,

    /// Put a CDN distribution in front of the service's domain
    #[serde(default)]
    pub enable_cdn: bool,

    /// Mark the service for CI pipeline provisioning (consumed externally)
    #[serde(default)]
    pub enable_ci_pipeline: bool,
}

/// A single raw catalog entry as declared by the user
///
/// Entry order in the catalog is significant: auto-allocated routing
/// priorities follow declaration order.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawServiceSpec {
    /// Service name, unique across the catalog
    pub name: String,

    /// Container image; a `:latest` tag is appended when no tag is given
    pub image: String,

    /// Port the primary container listens on
    pub container_port: u16,

    /// HTTP path probed by the gateway health check
    #[serde(default)]
    pub health_check_path: String,

    /// CPU allocation in CPU units (1024 = one vCPU)
    #[serde(default = "default_cpu")]
    pub cpu: u32,

    /// Memory allocation in MiB
    #[serde(default = "default_memory")]
    pub memory: u32,

    /// Public domain for gateway exposure and certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Steady-state task count
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,

    /// Autoscaling floor
    #[serde(default = "default_min_capacity")]
    pub min_capacity: u32,

    /// Autoscaling ceiling
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u32,

    /// Target CPU utilization percentage for autoscaling
    #[serde(default = "default_cpu_target")]
    pub cpu_target_percent: u32,

    /// Target memory utilization percentage for autoscaling
    #[serde(default = "default_memory_target")]
    pub memory_target_percent: u32,

    /// Explicitly pinned gateway rule priority
    ///
    /// Pinned priorities are part of the routing contract: the allocator
    /// never moves them, and any collision is a hard failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_priority: Option<u32>,

    /// Plain environment variables for the primary container
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Secret bindings: variable name to secret identifier (opaque ARN/ID)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,

    /// Service is intentionally unroutable (no gateway, no discovery)
    #[serde(default)]
    pub internal_only: bool,

    /// Explicit CDN alias list; defaults to `[domain]` during synthesis
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cdn_aliases: Vec<String>,

    /// Optional sub-resource feature flags
    #[serde(flatten)]
    pub flags: FeatureFlags,
}

impl RawServiceSpec {
    /// Create a minimal raw entry with catalog defaults, for tests and
    /// programmatic construction
    pub fn new(name: impl Into<String>, image: impl Into<String>, container_port: u16) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            container_port,
            health_check_path: String::new(),
            cpu: default_cpu(),
            memory: default_memory(),
            domain: None,
            desired_count: default_desired_count(),
            min_capacity: default_min_capacity(),
            max_capacity: default_max_capacity(),
            cpu_target_percent: default_cpu_target(),
            memory_target_percent: default_memory_target(),
            rule_priority: None,
            environment: BTreeMap::new(),
            secrets: BTreeMap::new(),
            internal_only: false,
            cdn_aliases: Vec::new(),
            flags: FeatureFlags::default(),
        }
    }
}

fn default_cpu() -> u32 {
    256
}

fn default_memory() -> u32 {
    512
}

fn default_desired_count() -> u32 {
    1
}

fn default_min_capacity() -> u32 {
    1
}

fn default_max_capacity() -> u32 {
    4
}

fn default_cpu_target() -> u32 {
    70
}

fn default_memory_target() -> u32 {
    80
}

// =============================================================================
// Instance-Size Tiers
// =============================================================================

/// Allowed memory range (MiB) per CPU allocation, mirroring the instance-size
/// tiers of the underlying compute platform
const RESOURCE_TIERS: &[(u32, u32, u32)] = &[
    (256, 512, 2048),
    (512, 1024, 4096),
    (1024, 2048, 8192),
    (2048, 4096, 16384),
    (4096, 8192, 30720),
];

/// Check whether a cpu/memory pair forms a valid instance-size tier
pub fn valid_resource_tier(cpu: u32, memory: u32) -> bool {
    let Some(&(_, min_mem, max_mem)) = RESOURCE_TIERS.iter().find(|&&(c, _, _)| c == cpu) else {
        return false;
    };
    if memory < min_mem || memory > max_mem {
        return false;
    }
    // Memory steps: 512 only for the smallest tier, otherwise whole GiB
    memory == 512 || memory % 1024 == 0
}

/// List the valid CPU allocations, for error messages
pub fn valid_cpu_values() -> Vec<u32> {
    RESOURCE_TIERS.iter().map(|&(c, _, _)| c).collect()
}
