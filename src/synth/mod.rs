//! Resource synthesis for catalog services
//!
//! This module derives the full dependent resource set for one normalized
//! service:
//! - ComputeUnit: the deployable workload (primary container plus optional
//!   telemetry sidecar and worker container)
//! - TargetBinding: the gateway attachment point (only when exposed)
//! - RoutingRule: domain-matched listener rule (only when exposed)
//! - AutoscalingPolicy: CPU/memory-tracking scaling (only when enabled)
//! - DiscoveryRegistration: resolvable internal name (only when enabled)
//! - CdnOrigin: CDN front-end (only when enabled)
//!
//! Every optional sub-resource is wholly present or wholly absent; the
//! synthesizer rejects any combination that would leave one half-wired.
//! Synthesis is pure: the same spec and config always produce the same
//! derived set, byte for byte.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::spec::{GlobalConfig, ServiceSpec};
use crate::{Error, Result};

// =============================================================================
// Sidecar Reservations
// =============================================================================

/// CPU units reserved by the telemetry sidecar
pub const TELEMETRY_SIDECAR_CPU: u32 = 128;
/// Memory (MiB) reserved by the telemetry sidecar
pub const TELEMETRY_SIDECAR_MEMORY: u32 = 256;
/// CPU units reserved by the background worker container
pub const WORKER_CONTAINER_CPU: u32 = 256;
/// Memory (MiB) reserved by the background worker container
pub const WORKER_CONTAINER_MEMORY: u32 = 512;

// =============================================================================
// Compute Unit
// =============================================================================

/// Role of a container within a compute unit
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ContainerRole {
    /// The service's main container
    Primary,
    /// Co-located telemetry collector
    TelemetrySidecar,
    /// Co-located background worker
    Worker,
}

/// A container definition inside a compute unit
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDef {
    /// Container name
    pub name: String,
    /// Container image
    pub image: String,
    /// Role within the unit
    pub role: ContainerRole,
    /// CPU reservation in CPU units
    pub cpu: u32,
    /// Memory reservation in MiB
    pub memory: u32,
    /// Listening port, for the primary container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Whether the unit fails when this container exits
    pub essential: bool,
    /// Environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

/// A deployable workload: exactly one per service
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComputeUnit {
    /// Stable identifier: `{project}-{environment}-{service}`
    pub id: String,
    /// Owning service name
    pub service: String,
    /// Total CPU envelope in CPU units
    pub cpu: u32,
    /// Total memory envelope in MiB
    pub memory: u32,
    /// Containers, primary first
    pub containers: Vec<ContainerDef>,
    /// Secret bindings: variable name to secret identifier
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
    /// Steady-state task count
    pub desired_count: u32,
}

impl ComputeUnit {
    /// The primary container of this unit
    pub fn primary(&self) -> &ContainerDef {
        // Synthesis always emits the primary first
        &self.containers[0]
    }

    /// CPU units left after all sidecar reservations
    pub fn primary_cpu(&self) -> u32 {
        self.primary().cpu
    }
}

// =============================================================================
// Gateway Resources
// =============================================================================

/// Attachment point between the gateway and a compute unit
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetBinding {
    /// Stable identifier: `{prefix}-{service}-tg`
    pub id: String,
    /// Owning service name
    pub service: String,
    /// Traffic port
    pub port: u16,
    /// Health check path probed by the gateway
    pub health_check_path: String,
    /// Target protocol
    pub protocol: String,
}

/// Domain-matched rule on the shared gateway listener
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingRule {
    /// Listener this rule attaches to
    pub listener_id: String,
    /// Target binding the rule forwards to
    pub target_id: String,
    /// Host header the rule matches
    pub host: String,
    /// Rule priority, unique within the listener
    pub priority: u32,
}

// =============================================================================
// Autoscaling
// =============================================================================

/// CPU/memory-tracking autoscaling policy bound to a compute unit
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingPolicy {
    /// Stable identifier: `{prefix}-{service}-scaling`
    pub id: String,
    /// Compute unit the policy scales
    pub compute_unit_id: String,
    /// Scaling floor
    pub min_capacity: u32,
    /// Scaling ceiling
    pub max_capacity: u32,
    /// Target CPU utilization percentage
    pub cpu_target_percent: u32,
    /// Target memory utilization percentage
    pub memory_target_percent: u32,
}

// =============================================================================
// Discovery and CDN
// =============================================================================

/// Service-discovery registration under a namespace
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRegistration {
    /// Stable identifier: `{prefix}-{service}-discovery`
    pub id: String,
    /// Owning service name
    pub service: String,
    /// Discovery namespace identifier (opaque, caller-supplied)
    pub namespace_id: String,
    /// Resolvable name registered for the service
    pub dns_name: String,
}

/// CDN origin fronting a service's domain
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CdnOrigin {
    /// Stable identifier: `{prefix}-{service}-cdn`
    pub id: String,
    /// Owning service name
    pub service: String,
    /// Origin the distribution pulls from
    pub origin_domain: String,
    /// Alias domains served by the distribution
    pub aliases: Vec<String>,
}

// =============================================================================
// Derived Service
// =============================================================================

/// The complete derived resource set for one service
///
/// Optional sub-resources are modeled as `Option<T>`, never as a flag plus
/// implicitly-coupled fields: a `Some` is a whole resource, a `None` is no
/// resource at all.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DerivedService {
    /// Service name
    pub service: String,
    /// The workload, always present
    pub compute: ComputeUnit,
    /// Gateway attachment, when exposed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_binding: Option<TargetBinding>,
    /// Listener rule, when exposed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_rule: Option<RoutingRule>,
    /// Autoscaling policy, when enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<AutoscalingPolicy>,
    /// Discovery registration, when enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryRegistration>,
    /// CDN front-end, when enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn: Option<CdnOrigin>,
}

impl DerivedService {
    /// Count of derived resources, the compute unit included
    pub fn resource_count(&self) -> usize {
        1 + [
            self.target_binding.is_some(),
            self.routing_rule.is_some(),
            self.autoscaling.is_some(),
            self.discovery.is_some(),
            self.cdn.is_some(),
        ]
        .iter()
        .filter(|&&present| present)
        .count()
    }
}

// =============================================================================
// Synthesizer
// =============================================================================

/// Derives the dependent resource set for normalized services
///
/// The synthesizer is pure: it performs no I/O and its output is a
/// deterministic function of the spec, the global config, and the allocated
/// priority.
pub struct Synthesizer<'a> {
    config: &'a GlobalConfig,
}

impl<'a> Synthesizer<'a> {
    /// Create a synthesizer over the given global configuration
    pub fn new(config: &'a GlobalConfig) -> Self {
        Self { config }
    }

    /// Synthesize the full derived resource set for one service.
    ///
    /// `priority` is the routing priority allocated for the service; it must
    /// be `Some` exactly when the service is gateway-exposed.
    pub fn synthesize(
        &self,
        spec: &ServiceSpec,
        priority: Option<u32>,
    ) -> Result<DerivedService> {
        self.check_routing_path(spec)?;

        let compute = self.synthesize_compute(spec)?;

        let target_binding = spec
            .flags
            .expose_via_gateway
            .then(|| self.synthesize_target_binding(spec));

        let routing_rule = match (&target_binding, priority) {
            (Some(binding), Some(priority)) => Some(RoutingRule {
                listener_id: self.config.listener_id.clone(),
                target_id: binding.id.clone(),
                // Normalization guarantees a domain for exposed services
                host: spec.domain.clone().unwrap_or_default(),
                priority,
            }),
            (Some(_), None) => {
                return Err(Error::configuration(format!(
                    "service '{}' is exposed but no priority was allocated",
                    spec.name
                )));
            }
            _ => None,
        };

        let autoscaling = if spec.flags.enable_autoscaling {
            Some(self.synthesize_autoscaling(spec, &compute)?)
        } else {
            None
        };

        let discovery = if spec.flags.enable_service_discovery {
            Some(self.synthesize_discovery(spec)?)
        } else {
            None
        };

        let cdn = spec
            .flags
            .enable_cdn
            .then(|| self.synthesize_cdn(spec));

        debug!(service = %spec.name, "synthesized derived resource set");

        Ok(DerivedService {
            service: spec.name.clone(),
            compute,
            target_binding,
            routing_rule,
            autoscaling,
            discovery,
            cdn,
        })
    }

    /// A service must be exposed, discoverable, or explicitly internal-only.
    ///
    /// Anything else is an unroutable workload nobody can reach, which is a
    /// configuration error rather than a silently accepted state.
    fn check_routing_path(&self, spec: &ServiceSpec) -> Result<()> {
        let routable = spec.flags.expose_via_gateway || spec.flags.enable_service_discovery;
        if !routable && !spec.internal_only {
            return Err(Error::validation(
                &spec.name,
                "internalOnly",
                "service has no routing path; set internalOnly for a service \
                 that is neither exposed nor discoverable",
            ));
        }
        Ok(())
    }

    fn synthesize_compute(&self, spec: &ServiceSpec) -> Result<ComputeUnit> {
        let mut sidecar_cpu = 0u32;
        let mut sidecar_memory = 0u32;
        let mut containers = Vec::new();

        if spec.flags.enable_telemetry_sidecar {
            sidecar_cpu += TELEMETRY_SIDECAR_CPU;
            sidecar_memory += TELEMETRY_SIDECAR_MEMORY;
        }
        if spec.flags.enable_worker_container {
            sidecar_cpu += WORKER_CONTAINER_CPU;
            sidecar_memory += WORKER_CONTAINER_MEMORY;
        }

        // Sidecars share the parent envelope; the primary must keep a
        // non-zero remainder of both dimensions.
        if sidecar_cpu >= spec.cpu || sidecar_memory >= spec.memory {
            return Err(Error::budget_exceeded(
                &spec.name,
                format!(
                    "sidecar reservations ({sidecar_cpu} cpu, {sidecar_memory} MiB) \
                     exceed the {} cpu / {} MiB allocation",
                    spec.cpu, spec.memory
                ),
            ));
        }

        containers.push(ContainerDef {
            name: spec.name.clone(),
            image: spec.image.clone(),
            role: ContainerRole::Primary,
            cpu: spec.cpu - sidecar_cpu,
            memory: spec.memory - sidecar_memory,
            port: Some(spec.container_port),
            essential: true,
            environment: spec.environment.clone(),
        });

        if spec.flags.enable_telemetry_sidecar {
            containers.push(ContainerDef {
                name: format!("{}-telemetry", spec.name),
                image: "public.ecr.aws/strata/telemetry-agent:stable".to_string(),
                role: ContainerRole::TelemetrySidecar,
                cpu: TELEMETRY_SIDECAR_CPU,
                memory: TELEMETRY_SIDECAR_MEMORY,
                port: None,
                essential: false,
                environment: BTreeMap::new(),
            });
        }

        if spec.flags.enable_worker_container {
            containers.push(ContainerDef {
                name: format!("{}-worker", spec.name),
                image: spec.image.clone(),
                role: ContainerRole::Worker,
                cpu: WORKER_CONTAINER_CPU,
                memory: WORKER_CONTAINER_MEMORY,
                port: None,
                essential: false,
                environment: spec.environment.clone(),
            });
        }

        Ok(ComputeUnit {
            id: format!("{}-{}", self.config.resource_prefix(), spec.name),
            service: spec.name.clone(),
            cpu: spec.cpu,
            memory: spec.memory,
            containers,
            secrets: spec.secrets.clone(),
            desired_count: spec.desired_count,
        })
    }

    fn synthesize_target_binding(&self, spec: &ServiceSpec) -> TargetBinding {
        TargetBinding {
            id: format!("{}-{}-tg", self.config.resource_prefix(), spec.name),
            service: spec.name.clone(),
            port: spec.container_port,
            health_check_path: spec.health_check_path.clone(),
            protocol: "HTTP".to_string(),
        }
    }

    fn synthesize_autoscaling(
        &self,
        spec: &ServiceSpec,
        compute: &ComputeUnit,
    ) -> Result<AutoscalingPolicy> {
        if !(spec.min_capacity <= spec.desired_count && spec.desired_count <= spec.max_capacity) {
            return Err(Error::ScalingBounds {
                service: spec.name.clone(),
                min: spec.min_capacity,
                desired: spec.desired_count,
                max: spec.max_capacity,
            });
        }

        Ok(AutoscalingPolicy {
            id: format!("{}-{}-scaling", self.config.resource_prefix(), spec.name),
            compute_unit_id: compute.id.clone(),
            min_capacity: spec.min_capacity,
            max_capacity: spec.max_capacity,
            cpu_target_percent: spec.cpu_target_percent,
            memory_target_percent: spec.memory_target_percent,
        })
    }

    fn synthesize_discovery(&self, spec: &ServiceSpec) -> Result<DiscoveryRegistration> {
        // A flag with no namespace is a configuration error, never a no-op
        let namespace_id = self.config.discovery_namespace_id.as_deref().ok_or_else(|| {
            Error::validation(
                &spec.name,
                "enableServiceDiscovery",
                "service discovery enabled but no discovery namespace is configured",
            )
        })?;

        Ok(DiscoveryRegistration {
            id: format!("{}-{}-discovery", self.config.resource_prefix(), spec.name),
            service: spec.name.clone(),
            namespace_id: namespace_id.to_string(),
            dns_name: format!("{}.{}.internal", spec.name, self.config.environment),
        })
    }

    fn synthesize_cdn(&self, spec: &ServiceSpec) -> CdnOrigin {
        // Alias defaulting happens here, during synthesis, so nothing
        // downstream has to guess what an empty list means.
        let aliases = if spec.cdn_aliases.is_empty() {
            spec.domain.iter().cloned().collect()
        } else {
            spec.cdn_aliases.clone()
        };

        let origin_domain = spec
            .domain
            .clone()
            .or_else(|| aliases.first().cloned())
            .unwrap_or_default();

        CdnOrigin {
            id: format!("{}-{}-cdn", self.config.resource_prefix(), spec.name),
            service: spec.name.clone(),
            origin_domain,
            aliases,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{RawServiceSpec, Registry};

    fn config() -> GlobalConfig {
        GlobalConfig::new("shop", "prod", "eu-west-1").with_discovery_namespace("ns-123")
    }

    fn normalize(raw: RawServiceSpec) -> ServiceSpec {
        let out = Registry::normalize(&[raw]);
        assert!(out.is_clean(), "fixture failed validation: {:?}", out.failures);
        out.services.into_iter().next().unwrap()
    }

    fn exposed(name: &str) -> ServiceSpec {
        let mut raw = RawServiceSpec::new(name, "registry/app:v1", 8080);
        raw.domain = Some(format!("{name}.example.com"));
        raw.health_check_path = "/healthz".to_string();
        raw.flags.expose_via_gateway = true;
        normalize(raw)
    }

    fn internal(name: &str) -> ServiceSpec {
        let mut raw = RawServiceSpec::new(name, "registry/app:v1", 8080);
        raw.internal_only = true;
        normalize(raw)
    }

    // =========================================================================
    // Story: Always Synthesize a Compute Unit
    // =========================================================================

    #[test]
    fn story_compute_unit_always_present() {
        let config = config();
        let synth = Synthesizer::new(&config);
        let derived = synth.synthesize(&internal("batch"), None).unwrap();

        assert_eq!(derived.compute.id, "shop-prod-batch");
        assert_eq!(derived.compute.containers.len(), 1);
        assert_eq!(derived.compute.primary().role, ContainerRole::Primary);
        assert_eq!(derived.compute.primary().port, Some(8080));
        assert!(derived.compute.primary().essential);
    }

    #[test]
    fn story_primary_gets_full_envelope_without_sidecars() {
        let config = config();
        let synth = Synthesizer::new(&config);
        let derived = synth.synthesize(&internal("batch"), None).unwrap();

        assert_eq!(derived.compute.primary().cpu, 256);
        assert_eq!(derived.compute.primary().memory, 512);
    }

    // =========================================================================
    // Story: Sidecars Share the Parent Envelope
    // =========================================================================

    #[test]
    fn story_telemetry_sidecar_carves_out_reservation() {
        let mut raw = RawServiceSpec::new("api", "registry/api:v1", 8080);
        raw.cpu = 512;
        raw.memory = 1024;
        raw.internal_only = true;
        raw.flags.enable_telemetry_sidecar = true;
        let spec = normalize(raw);

        let config = config();
        let derived = Synthesizer::new(&config).synthesize(&spec, None).unwrap();

        assert_eq!(derived.compute.containers.len(), 2);
        let primary = derived.compute.primary();
        assert_eq!(primary.cpu, 512 - TELEMETRY_SIDECAR_CPU);
        assert_eq!(primary.memory, 1024 - TELEMETRY_SIDECAR_MEMORY);

        let sidecar = &derived.compute.containers[1];
        assert_eq!(sidecar.role, ContainerRole::TelemetrySidecar);
        assert_eq!(sidecar.cpu, TELEMETRY_SIDECAR_CPU);
        assert!(!sidecar.essential);
    }

    #[test]
    fn story_worker_container_reuses_service_image() {
        let mut raw = RawServiceSpec::new("api", "registry/api:v1", 8080);
        raw.cpu = 1024;
        raw.memory = 2048;
        raw.internal_only = true;
        raw.flags.enable_worker_container = true;
        let spec = normalize(raw);

        let config = config();
        let derived = Synthesizer::new(&config).synthesize(&spec, None).unwrap();

        let worker = derived
            .compute
            .containers
            .iter()
            .find(|c| c.role == ContainerRole::Worker)
            .expect("worker container");
        assert_eq!(worker.image, "registry/api:v1");
        assert_eq!(worker.name, "api-worker");
    }

    /// Story: sidecars that eat the whole envelope are rejected
    ///
    /// A 256-cpu service cannot host both sidecars (128 + 256 cpu) and still
    /// run its primary container.
    #[test]
    fn story_budget_exceeded_when_sidecars_overrun() {
        let mut raw = RawServiceSpec::new("api", "registry/api:v1", 8080);
        raw.internal_only = true;
        raw.flags.enable_telemetry_sidecar = true;
        raw.flags.enable_worker_container = true;
        let spec = normalize(raw);

        let config = config();
        let result = Synthesizer::new(&config).synthesize(&spec, None);

        match result {
            Err(Error::BudgetExceeded { service, message }) => {
                assert_eq!(service, "api");
                assert!(message.contains("sidecar reservations"));
            }
            other => panic!("Expected BudgetExceeded, got {other:?}"),
        }
    }

    // =========================================================================
    // Story: Gateway Resources Only When Exposed
    // =========================================================================

    #[test]
    fn story_exposed_service_gets_binding_and_rule() {
        let config = config();
        let derived = Synthesizer::new(&config)
            .synthesize(&exposed("api"), Some(100))
            .unwrap();

        let binding = derived.target_binding.expect("target binding");
        assert_eq!(binding.id, "shop-prod-api-tg");
        assert_eq!(binding.port, 8080);
        assert_eq!(binding.health_check_path, "/healthz");

        let rule = derived.routing_rule.expect("routing rule");
        assert_eq!(rule.host, "api.example.com");
        assert_eq!(rule.priority, 100);
        assert_eq!(rule.target_id, "shop-prod-api-tg");
    }

    #[test]
    fn story_unexposed_service_has_no_gateway_resources() {
        let config = config();
        let derived = Synthesizer::new(&config)
            .synthesize(&internal("batch"), None)
            .unwrap();

        assert!(derived.target_binding.is_none());
        assert!(derived.routing_rule.is_none());
    }

    #[test]
    fn story_exposed_without_priority_is_internal_error() {
        let config = config();
        let result = Synthesizer::new(&config).synthesize(&exposed("api"), None);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    // =========================================================================
    // Story: Autoscaling Bounds
    // =========================================================================

    #[test]
    fn story_autoscaling_bound_to_compute_unit() {
        let mut raw = RawServiceSpec::new("api", "registry/api:v1", 8080);
        raw.internal_only = true;
        raw.desired_count = 2;
        raw.min_capacity = 1;
        raw.max_capacity = 6;
        raw.flags.enable_autoscaling = true;
        let spec = normalize(raw);

        let config = config();
        let derived = Synthesizer::new(&config).synthesize(&spec, None).unwrap();

        let scaling = derived.autoscaling.expect("autoscaling policy");
        assert_eq!(scaling.compute_unit_id, derived.compute.id);
        assert_eq!(scaling.min_capacity, 1);
        assert_eq!(scaling.max_capacity, 6);
        assert_eq!(scaling.cpu_target_percent, 70);
    }

    /// Story: min <= desired <= max must hold or synthesis fails
    #[test]
    fn story_invalid_scaling_bounds_rejected() {
        let mut raw = RawServiceSpec::new("api", "registry/api:v1", 8080);
        raw.internal_only = true;
        raw.desired_count = 1;
        raw.min_capacity = 3;
        raw.max_capacity = 6;
        raw.flags.enable_autoscaling = true;
        let spec = normalize(raw);

        let config = config();
        let result = Synthesizer::new(&config).synthesize(&spec, None);

        match result {
            Err(Error::ScalingBounds { min, desired, max, .. }) => {
                assert_eq!((min, desired, max), (3, 1, 6));
            }
            other => panic!("Expected ScalingBounds, got {other:?}"),
        }
    }

    #[test]
    fn story_no_autoscaling_without_flag() {
        let config = config();
        let derived = Synthesizer::new(&config)
            .synthesize(&internal("batch"), None)
            .unwrap();
        assert!(derived.autoscaling.is_none());
    }

    // =========================================================================
    // Story: Discovery Needs a Namespace
    // =========================================================================

    #[test]
    fn story_discovery_registration_under_namespace() {
        let mut raw = RawServiceSpec::new("worker", "registry/worker:v1", 9090);
        raw.flags.enable_service_discovery = true;
        let spec = normalize(raw);

        let config = config();
        let derived = Synthesizer::new(&config).synthesize(&spec, None).unwrap();

        let discovery = derived.discovery.expect("discovery registration");
        assert_eq!(discovery.namespace_id, "ns-123");
        assert_eq!(discovery.dns_name, "worker.prod.internal");
    }

    /// Story: flag set with no namespace is a configuration error, not a no-op
    #[test]
    fn story_discovery_without_namespace_fails() {
        let mut raw = RawServiceSpec::new("worker", "registry/worker:v1", 9090);
        raw.flags.enable_service_discovery = true;
        let spec = normalize(raw);

        let config = GlobalConfig::new("shop", "prod", "eu-west-1"); // no namespace
        let result = Synthesizer::new(&config).synthesize(&spec, None);

        match result {
            Err(Error::Validation { field, .. }) => {
                assert_eq!(field, "enableServiceDiscovery");
            }
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    // =========================================================================
    // Story: CDN Alias Defaulting Happens During Synthesis
    // =========================================================================

    #[test]
    fn story_cdn_aliases_default_to_domain() {
        let mut raw = RawServiceSpec::new("web", "registry/web:v1", 8080);
        raw.domain = Some("www.example.com".to_string());
        raw.health_check_path = "/".to_string();
        raw.flags.expose_via_gateway = true;
        raw.flags.enable_cdn = true;
        let spec = normalize(raw);

        let config = config();
        let derived = Synthesizer::new(&config).synthesize(&spec, Some(100)).unwrap();

        let cdn = derived.cdn.expect("cdn origin");
        assert_eq!(cdn.aliases, vec!["www.example.com".to_string()]);
        assert_eq!(cdn.origin_domain, "www.example.com");
    }

    #[test]
    fn story_explicit_cdn_aliases_are_kept() {
        let mut raw = RawServiceSpec::new("web", "registry/web:v1", 8080);
        raw.domain = Some("www.example.com".to_string());
        raw.health_check_path = "/".to_string();
        raw.flags.expose_via_gateway = true;
        raw.flags.enable_cdn = true;
        raw.cdn_aliases = vec![
            "www.example.com".to_string(),
            "cdn.example.com".to_string(),
        ];
        let spec = normalize(raw);

        let config = config();
        let derived = Synthesizer::new(&config).synthesize(&spec, Some(100)).unwrap();

        assert_eq!(derived.cdn.unwrap().aliases.len(), 2);
    }

    // =========================================================================
    // Story: No Silent Unroutable Services
    // =========================================================================

    /// Story: a service nobody can reach must say so explicitly
    #[test]
    fn story_unroutable_service_rejected_without_internal_only() {
        let raw = RawServiceSpec::new("orphan", "registry/orphan:v1", 8080);
        let spec = normalize(raw);

        let config = config();
        let result = Synthesizer::new(&config).synthesize(&spec, None);

        match result {
            Err(Error::Validation { field, .. }) => assert_eq!(field, "internalOnly"),
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn story_internal_only_with_autoscaling_is_allowed() {
        let mut raw = RawServiceSpec::new("batch", "registry/batch:v1", 8080);
        raw.internal_only = true;
        raw.flags.enable_autoscaling = true;
        let spec = normalize(raw);

        let config = config();
        let derived = Synthesizer::new(&config).synthesize(&spec, None).unwrap();
        assert!(derived.autoscaling.is_some());
        assert!(derived.target_binding.is_none());
    }

    // =========================================================================
    // Story: Synthesis Is Deterministic
    // =========================================================================

    /// Story: re-running synthesis on an unchanged spec is byte-identical
    #[test]
    fn story_synthesis_is_deterministic() {
        let mut raw = RawServiceSpec::new("api", "registry/api:v1", 8080);
        raw.domain = Some("api.example.com".to_string());
        raw.health_check_path = "/healthz".to_string();
        raw.cpu = 512;
        raw.memory = 1024;
        raw.flags.expose_via_gateway = true;
        raw.flags.enable_telemetry_sidecar = true;
        raw.flags.enable_autoscaling = true;
        raw.flags.enable_cdn = true;
        let spec = normalize(raw);

        let config = config();
        let synth = Synthesizer::new(&config);

        let first = synth.synthesize(&spec, Some(100)).unwrap();
        let second = synth.synthesize(&spec, Some(100)).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn story_resource_count() {
        let config = config();
        let derived = Synthesizer::new(&config)
            .synthesize(&exposed("api"), Some(100))
            .unwrap();
        // compute + target binding + routing rule
        assert_eq!(derived.resource_count(), 3);
    }
}
