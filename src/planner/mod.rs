//! Catalog planning: the front door of the crate
//!
//! The planner chains the pipeline stages together: normalize the raw
//! catalog, allocate routing priorities, synthesize each service's derived
//! resources, and collect the certificate requests the plan needs. Failures
//! are collected per service so one broken entry never hides another; the
//! single exception is a priority conflict, which poisons the shared
//! listener and therefore fails the whole plan.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cert::{CertificateRequest, CertificateScope};
use crate::graph::ResourceGraph;
use crate::priority;
use crate::spec::{GlobalConfig, RawServiceSpec, Registry};
use crate::synth::{DerivedService, Synthesizer};
use crate::{Error, Result};

// =============================================================================
// Catalog File
// =============================================================================

/// On-disk catalog: global configuration plus the service list
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    /// Global planning parameters
    pub global: GlobalConfig,
    /// Declared services, in priority-allocation order
    pub services: Vec<RawServiceSpec>,
}

// =============================================================================
// Plan
// =============================================================================

/// A fully synthesized deployment plan
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Derived resource sets, one per surviving service, in catalog order
    pub services: Vec<DerivedService>,
    /// Certificates the plan requires, deduplicated, in first-use order
    pub certificates: Vec<CertificateRequest>,
}

impl Plan {
    /// Build the dependency graph over this plan's resources
    pub fn resource_graph(&self) -> ResourceGraph {
        ResourceGraph::from_plan(self)
    }

    /// Total derived resources across all services, certificates excluded
    pub fn resource_count(&self) -> usize {
        self.services.iter().map(DerivedService::resource_count).sum()
    }
}

/// A plan together with the per-service failures collected along the way
#[derive(Debug)]
pub struct PlanOutcome {
    /// The plan over every service that survived
    pub plan: Plan,
    /// Failures keyed by service name
    pub failures: BTreeMap<String, Error>,
}

impl PlanOutcome {
    /// True when every catalog entry made it into the plan
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Turns a raw catalog into a deployment plan
pub struct Planner<'a> {
    config: &'a GlobalConfig,
}

impl<'a> Planner<'a> {
    /// Create a planner over the given global configuration
    pub fn new(config: &'a GlobalConfig) -> Self {
        Self { config }
    }

    /// Plan the whole catalog.
    ///
    /// Normalization and synthesis failures are collected per service; the
    /// surviving services still produce a usable plan. A priority conflict
    /// is the one hard failure: the listener's rule table is shared, so an
    /// ambiguous allocation invalidates every exposed service at once.
    pub fn plan(&self, raw: &[RawServiceSpec]) -> Result<PlanOutcome> {
        let normalized = Registry::normalize(raw);
        let mut failures = normalized.failures;
        for name in failures.keys() {
            warn!(service = %name, "catalog entry failed normalization");
        }

        let priorities =
            priority::allocate(&normalized.services, self.config.base_priority)?;

        let synthesizer = Synthesizer::new(self.config);
        let mut services = Vec::new();
        for spec in &normalized.services {
            let priority = priorities.get(&spec.name).copied();
            match synthesizer.synthesize(spec, priority) {
                Ok(derived) => services.push(derived),
                Err(e) => {
                    warn!(service = %spec.name, error = %e, "synthesis failed");
                    failures.insert(spec.name.clone(), e);
                }
            }
        }

        let certificates = Self::certificate_requests(&services);

        info!(
            services = services.len(),
            certificates = certificates.len(),
            failures = failures.len(),
            "planned catalog"
        );

        Ok(PlanOutcome {
            plan: Plan {
                services,
                certificates,
            },
            failures,
        })
    }

    /// Collect the certificate requests the derived services need.
    ///
    /// One regional certificate per exposed domain and one edge certificate
    /// per CDN origin, deduplicated on (scope, domain) in first-use order so
    /// repeated planning runs emit an identical list.
    fn certificate_requests(derived: &[DerivedService]) -> Vec<CertificateRequest> {
        let mut seen: BTreeSet<(CertificateScope, String)> = BTreeSet::new();
        let mut requests = Vec::new();

        for service in derived {
            if let Some(rule) = &service.routing_rule {
                if seen.insert((CertificateScope::Regional, rule.host.clone())) {
                    requests.push(CertificateRequest::regional(rule.host.clone()));
                }
            }

            if let Some(cdn) = &service.cdn {
                if seen.insert((CertificateScope::Edge, cdn.origin_domain.clone())) {
                    // Every alias beyond the origin rides as an alternative name
                    let alternate_names: Vec<String> = cdn
                        .aliases
                        .iter()
                        .filter(|a| **a != cdn.origin_domain)
                        .cloned()
                        .collect();
                    requests.push(CertificateRequest::edge(
                        cdn.origin_domain.clone(),
                        alternate_names,
                    ));
                }
            }
        }

        requests
    }
}

// =============================================================================
// Tests
// =============================================================================
