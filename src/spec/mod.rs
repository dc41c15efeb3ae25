//! Service catalog registry: normalization and validation
//!
//! The registry is the single entry point for user-declared service
//! definitions. It fills defaults, validates constraints, and produces the
//! normalized [`ServiceSpec`] list every downstream component consumes.
//! It performs no I/O and registers no entry partially: an entry either
//! normalizes completely or is reported as a failure.

mod types;

pub use types::{valid_cpu_values, valid_resource_tier, FeatureFlags, RawServiceSpec};

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, DEFAULT_BASE_PRIORITY, MAX_RULE_PRIORITY};

// =============================================================================
// Global Configuration
// =============================================================================

/// Global planning parameters shared by every service in the catalog
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Project identifier, prefixed onto every derived resource name
    pub project: String,

    /// Environment identifier (e.g. "prod", "staging")
    pub environment: String,

    /// Deployment region for regional certificate requests
    pub region: String,

    /// Identifier of the shared gateway listener routing rules attach to
    #[serde(default = "default_listener_id")]
    pub listener_id: String,

    /// DNS zone for automatic publication of certificate validation records;
    /// absent means records are surfaced for manual publication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_zone_id: Option<String>,

    /// Discovery namespace identifier; required by any service that enables
    /// service discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_namespace_id: Option<String>,

    /// Base priority for auto-allocated routing rules
    #[serde(default = "default_base_priority")]
    pub base_priority: u32,
}

fn default_listener_id() -> String {
    "default".to_string()
}

fn default_base_priority() -> u32 {
    DEFAULT_BASE_PRIORITY
}

impl GlobalConfig {
    /// Create a config with defaults for listener and base priority
    pub fn new(
        project: impl Into<String>,
        environment: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            environment: environment.into(),
            region: region.into(),
            listener_id: default_listener_id(),
            dns_zone_id: None,
            discovery_namespace_id: None,
            base_priority: DEFAULT_BASE_PRIORITY,
        }
    }

    /// Set the DNS zone for automatic validation-record publication
    pub fn with_dns_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.dns_zone_id = Some(zone_id.into());
        self
    }

    /// Set the discovery namespace identifier
    pub fn with_discovery_namespace(mut self, namespace_id: impl Into<String>) -> Self {
        self.discovery_namespace_id = Some(namespace_id.into());
        self
    }

    /// Override the base priority for auto-allocated routing rules
    pub fn with_base_priority(mut self, base: u32) -> Self {
        self.base_priority = base;
        self
    }

    /// Common prefix for every derived resource identifier
    pub fn resource_prefix(&self) -> String {
        format!("{}-{}", self.project, self.environment)
    }
}

// =============================================================================
// Normalized ServiceSpec
// =============================================================================

/// A fully normalized service definition
///
/// Produced only by [`Registry::normalize`]; every field has passed
/// validation and every default has been filled.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Unique service name
    pub name: String,
    /// Container image, always carrying an explicit tag
    pub image: String,
    /// Primary container port
    pub container_port: u16,
    /// Gateway health check path (non-empty whenever exposed)
    pub health_check_path: String,
    /// CPU allocation in CPU units
    pub cpu: u32,
    /// Memory allocation in MiB
    pub memory: u32,
    /// Public domain, when the service has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Steady-state task count
    pub desired_count: u32,
    /// Autoscaling floor
    pub min_capacity: u32,
    /// Autoscaling ceiling
    pub max_capacity: u32,
    /// Target CPU utilization percentage
    pub cpu_target_percent: u32,
    /// Target memory utilization percentage
    pub memory_target_percent: u32,
    /// Explicitly pinned routing priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_priority: Option<u32>,
    /// Plain environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Secret bindings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
    /// Service is intentionally unroutable
    pub internal_only: bool,
    /// Explicit CDN aliases (may be empty; synthesis substitutes the domain)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cdn_aliases: Vec<String>,
    /// Feature flags
    pub flags: FeatureFlags,
}

impl ServiceSpec {
    /// True when the service routes through the shared gateway
    pub fn is_exposed(&self) -> bool {
        self.flags.expose_via_gateway
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Outcome of normalizing a catalog: the surviving services in declaration
/// order plus per-service failures
#[derive(Debug, Default)]
pub struct Normalized {
    /// Valid services, in catalog declaration order
    pub services: Vec<ServiceSpec>,
    /// Failures keyed by service name
    pub failures: BTreeMap<String, Error>,
}

impl Normalized {
    /// True when every entry normalized successfully
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Validates and normalizes raw catalog entries
pub struct Registry;

impl Registry {
    /// Normalize a whole catalog.
    ///
    /// Every entry is checked; failures are collected rather than aborting on
    /// the first one, so an operator sees every misconfigured service in one
    /// pass. An invalid entry is never partially registered.
    pub fn normalize(raw: &[RawServiceSpec]) -> Normalized {
        let mut out = Normalized::default();
        let mut seen: BTreeSet<&str> = BTreeSet::new();

        for entry in raw {
            if !seen.insert(entry.name.as_str()) {
                out.failures.insert(
                    entry.name.clone(),
                    Error::validation(
                        &entry.name,
                        "name",
                        "duplicate service name in catalog",
                    ),
                );
                continue;
            }

            match Self::normalize_one(entry) {
                Ok(spec) => {
                    debug!(service = %spec.name, "normalized catalog entry");
                    out.services.push(spec);
                }
                Err(e) => {
                    out.failures.insert(entry.name.clone(), e);
                }
            }
        }

        out
    }

    /// Normalize a single entry, or fail naming the offending field
    fn normalize_one(raw: &RawServiceSpec) -> Result<ServiceSpec, Error> {
        let name = raw.name.trim();
        if name.is_empty() {
            return Err(Error::validation(&raw.name, "name", "name must be non-empty"));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::validation(
                name,
                "name",
                "name must contain only lowercase letters, digits, and hyphens",
            ));
        }

        if raw.container_port == 0 {
            return Err(Error::validation(
                name,
                "containerPort",
                "port must be in 1-65535",
            ));
        }

        if !valid_resource_tier(raw.cpu, raw.memory) {
            return Err(Error::validation(
                name,
                "cpu/memory",
                format!(
                    "{} cpu / {} MiB is not a valid instance-size tier (cpu must be one of {:?})",
                    raw.cpu,
                    raw.memory,
                    valid_cpu_values()
                ),
            ));
        }

        if raw.min_capacity > raw.max_capacity {
            return Err(Error::validation(
                name,
                "minCapacity",
                format!(
                    "min capacity {} exceeds max capacity {}",
                    raw.min_capacity, raw.max_capacity
                ),
            ));
        }

        if let Some(priority) = raw.rule_priority {
            if priority == 0 || priority > MAX_RULE_PRIORITY {
                return Err(Error::validation(
                    name,
                    "rulePriority",
                    format!("priority must be in 1-{MAX_RULE_PRIORITY}"),
                ));
            }
        }

        let domain = raw
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from);

        if raw.flags.expose_via_gateway {
            if domain.is_none() {
                return Err(Error::validation(
                    name,
                    "domain",
                    "gateway exposure requires a domain",
                ));
            }
            if raw.health_check_path.is_empty() {
                return Err(Error::validation(
                    name,
                    "healthCheckPath",
                    "gateway exposure requires a health check path",
                ));
            }
        }

        if raw.flags.enable_cdn && domain.is_none() && raw.cdn_aliases.is_empty() {
            return Err(Error::validation(
                name,
                "cdnAliases",
                "CDN requires a domain or an explicit alias list",
            ));
        }

        // Append the default tag when the image reference has none
        let image = if raw.image.contains(':') {
            raw.image.clone()
        } else {
            format!("{}:latest", raw.image)
        };

        Ok(ServiceSpec {
            name: name.to_string(),
            image,
            container_port: raw.container_port,
            health_check_path: raw.health_check_path.clone(),
            cpu: raw.cpu,
            memory: raw.memory,
            domain,
            desired_count: raw.desired_count,
            min_capacity: raw.min_capacity,
            max_capacity: raw.max_capacity,
            cpu_target_percent: raw.cpu_target_percent,
            memory_target_percent: raw.memory_target_percent,
            rule_priority: raw.rule_priority,
            environment: raw.environment.clone(),
            secrets: raw.secrets.clone(),
            internal_only: raw.internal_only,
            cdn_aliases: raw.cdn_aliases.clone(),
            flags: raw.flags.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposed(name: &str, domain: &str) -> RawServiceSpec {
        let mut raw = RawServiceSpec::new(name, "registry/app:v1", 8080);
        raw.domain = Some(domain.to_string());
        raw.health_check_path = "/healthz".to_string();
        raw.flags.expose_via_gateway = true;
        raw
    }

    // =========================================================================
    // Story: Defaults Are Filled, Not Guessed Downstream
    // =========================================================================

    #[test]
    fn story_image_tag_defaults_to_latest() {
        let raw = RawServiceSpec::new("api", "registry/api", 8080);
        let out = Registry::normalize(&[raw]);
        assert!(out.is_clean());
        assert_eq!(out.services[0].image, "registry/api:latest");
    }

    #[test]
    fn story_explicit_tag_is_kept() {
        let raw = RawServiceSpec::new("api", "registry/api:v2", 8080);
        let out = Registry::normalize(&[raw]);
        assert_eq!(out.services[0].image, "registry/api:v2");
    }

    #[test]
    fn story_capacity_and_target_defaults() {
        let raw = RawServiceSpec::new("api", "registry/api:v1", 8080);
        let out = Registry::normalize(&[raw]);
        let spec = &out.services[0];
        assert_eq!(spec.desired_count, 1);
        assert_eq!(spec.cpu_target_percent, 70);
        assert_eq!(spec.memory_target_percent, 80);
    }

    // =========================================================================
    // Story: Constraint Violations Name the Field and Service
    // =========================================================================

    #[test]
    fn story_zero_port_rejected() {
        let raw = RawServiceSpec::new("api", "registry/api:v1", 0);
        let out = Registry::normalize(&[raw]);
        assert!(out.services.is_empty());
        let err = out.failures.get("api").unwrap();
        assert!(err.to_string().contains("containerPort"));
    }

    #[test]
    fn story_invalid_tier_rejected() {
        let mut raw = RawServiceSpec::new("api", "registry/api:v1", 8080);
        raw.cpu = 256;
        raw.memory = 8192;
        let out = Registry::normalize(&[raw]);
        let err = out.failures.get("api").unwrap();
        assert!(err.to_string().contains("instance-size tier"));
    }

    #[test]
    fn story_min_over_max_rejected() {
        let mut raw = RawServiceSpec::new("api", "registry/api:v1", 8080);
        raw.min_capacity = 5;
        raw.max_capacity = 2;
        let out = Registry::normalize(&[raw]);
        let err = out.failures.get("api").unwrap();
        assert!(err.to_string().contains("minCapacity"));
    }

    #[test]
    fn story_exposure_requires_domain_and_health_check() {
        let mut raw = RawServiceSpec::new("api", "registry/api:v1", 8080);
        raw.flags.expose_via_gateway = true;
        let out = Registry::normalize(&[raw.clone()]);
        assert!(out.failures.get("api").unwrap().to_string().contains("domain"));

        raw.domain = Some("api.example.com".to_string());
        let out = Registry::normalize(&[raw]);
        assert!(out
            .failures
            .get("api")
            .unwrap()
            .to_string()
            .contains("healthCheckPath"));
    }

    #[test]
    fn story_pinned_priority_range_checked() {
        let mut raw = exposed("api", "api.example.com");
        raw.rule_priority = Some(60_000);
        let out = Registry::normalize(&[raw]);
        assert!(out
            .failures
            .get("api")
            .unwrap()
            .to_string()
            .contains("rulePriority"));
    }

    #[test]
    fn story_cdn_without_domain_or_aliases_rejected() {
        let mut raw = RawServiceSpec::new("assets", "registry/assets:v1", 8080);
        raw.flags.enable_cdn = true;
        let out = Registry::normalize(&[raw]);
        assert!(out
            .failures
            .get("assets")
            .unwrap()
            .to_string()
            .contains("cdnAliases"));
    }

    #[test]
    fn story_bad_name_charset_rejected() {
        let raw = RawServiceSpec::new("My Service!", "registry/app:v1", 8080);
        let out = Registry::normalize(&[raw]);
        assert_eq!(out.failures.len(), 1);
    }

    // =========================================================================
    // Story: Batch Validation Reports Everything At Once
    // =========================================================================

    /// Story: an operator sees every misconfigured service in one pass
    ///
    /// Three entries, two broken: both failures are reported and the valid
    /// one still normalizes.
    #[test]
    fn story_failures_collected_not_first_error() {
        let good = exposed("api", "api.example.com");
        let bad_port = RawServiceSpec::new("broken-port", "registry/a:v1", 0);
        let mut bad_tier = RawServiceSpec::new("broken-tier", "registry/b:v1", 9090);
        bad_tier.memory = 30720;

        let out = Registry::normalize(&[good, bad_port, bad_tier]);
        assert_eq!(out.services.len(), 1);
        assert_eq!(out.services[0].name, "api");
        assert_eq!(out.failures.len(), 2);
        assert!(out.failures.contains_key("broken-port"));
        assert!(out.failures.contains_key("broken-tier"));
    }

    #[test]
    fn story_duplicate_names_rejected() {
        let first = RawServiceSpec::new("api", "registry/api:v1", 8080);
        let second = RawServiceSpec::new("api", "registry/api:v2", 8081);
        let out = Registry::normalize(&[first, second]);

        // First occurrence wins; the duplicate is the failure
        assert_eq!(out.services.len(), 1);
        assert_eq!(out.services[0].image, "registry/api:v1");
        assert!(out
            .failures
            .get("api")
            .unwrap()
            .to_string()
            .contains("duplicate"));
    }

    #[test]
    fn story_declaration_order_preserved() {
        let entries = vec![
            RawServiceSpec::new("zeta", "registry/z:v1", 8080),
            RawServiceSpec::new("alpha", "registry/a:v1", 8080),
            RawServiceSpec::new("mid", "registry/m:v1", 8080),
        ];
        let out = Registry::normalize(&entries);
        let names: Vec<&str> = out.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    // =========================================================================
    // GlobalConfig
    // =========================================================================

    #[test]
    fn test_global_config_builders() {
        let config = GlobalConfig::new("shop", "prod", "eu-west-1")
            .with_dns_zone("Z0123456789")
            .with_discovery_namespace("ns-abc")
            .with_base_priority(200);

        assert_eq!(config.resource_prefix(), "shop-prod");
        assert_eq!(config.dns_zone_id.as_deref(), Some("Z0123456789"));
        assert_eq!(config.discovery_namespace_id.as_deref(), Some("ns-abc"));
        assert_eq!(config.base_priority, 200);
    }

    #[test]
    fn test_global_config_defaults_on_deserialize() {
        let json = r#"{"project":"shop","environment":"prod","region":"eu-west-1"}"#;
        let config: GlobalConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.base_priority, crate::DEFAULT_BASE_PRIORITY);
        assert_eq!(config.listener_id, "default");
        assert!(config.dns_zone_id.is_none());
    }
}
