//! Resource dependency graph and convergence engine
//!
//! Derived resources must be created in dependency order: a routing rule
//! cannot attach to a target binding that does not exist, and a CDN origin
//! cannot reference an edge certificate that has not issued. The graph makes
//! those orderings explicit, the engine walks them.
//!
//! Creation proceeds level by level. Within a level there are no edges, so
//! nodes apply concurrently up to the configured parallelism. A failed node
//! never rolls back its siblings; its transitive dependents are skipped and
//! everything else converges. Destruction walks the same graph in reverse.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cert::CertificateScope;
use crate::planner::Plan;
use crate::{Error, Result, DEFAULT_APPLY_PARALLELISM};

// =============================================================================
// Nodes
// =============================================================================

/// Kind of a derived resource in the graph
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    /// Regional certificate backing gateway routing rules
    RegionalCertificate,
    /// Edge certificate backing CDN origins
    EdgeCertificate,
    /// Gateway attachment point
    TargetBinding,
    /// Service-discovery registration
    DiscoveryRegistration,
    /// Deployable workload
    ComputeUnit,
    /// Listener routing rule
    RoutingRule,
    /// Autoscaling policy
    AutoscalingPolicy,
    /// CDN front-end
    CdnOrigin,
}

impl ResourceKind {
    fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::RegionalCertificate => "regionalCertificate",
            ResourceKind::EdgeCertificate => "edgeCertificate",
            ResourceKind::TargetBinding => "targetBinding",
            ResourceKind::DiscoveryRegistration => "discoveryRegistration",
            ResourceKind::ComputeUnit => "computeUnit",
            ResourceKind::RoutingRule => "routingRule",
            ResourceKind::AutoscalingPolicy => "autoscalingPolicy",
            ResourceKind::CdnOrigin => "cdnOrigin",
        }
    }
}

/// A node in the resource graph: a kind plus the owning name
///
/// Certificates are named by domain, everything else by service.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    /// Resource kind
    pub kind: ResourceKind,
    /// Owning service name, or domain for certificates
    pub name: String,
}

impl NodeId {
    /// Create a node identifier
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.name)
    }
}

// =============================================================================
// Graph
// =============================================================================

/// Directed dependency graph over derived resources
///
/// An edge from A to B means A depends on B: B is created before A and
/// destroyed after it.
#[derive(Clone, Debug, Default)]
pub struct ResourceGraph {
    dependencies: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl ResourceGraph {
    /// An empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with no dependencies (a no-op if already present)
    pub fn add_node(&mut self, node: NodeId) {
        self.dependencies.entry(node).or_default();
    }

    /// Record that `node` depends on `prerequisite`; both sides are added
    pub fn add_dependency(&mut self, node: NodeId, prerequisite: NodeId) {
        self.add_node(prerequisite.clone());
        self.dependencies.entry(node).or_default().insert(prerequisite);
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// True when the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Direct prerequisites of a node
    pub fn prerequisites_of<'a>(&'a self, node: &NodeId) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.dependencies.get(node).into_iter().flatten()
    }

    /// Nodes that directly depend on `node`
    pub fn dependents_of<'a>(&'a self, node: &'a NodeId) -> impl Iterator<Item = &'a NodeId> {
        self.dependencies
            .iter()
            .filter(move |(_, prereqs)| prereqs.contains(node))
            .map(|(dependent, _)| dependent)
    }

    /// Build the graph for a whole plan
    pub fn from_plan(plan: &Plan) -> Self {
        let mut graph = Self::new();

        let cert_node = |scope: CertificateScope, domain: &str| {
            let kind = match scope {
                CertificateScope::Regional => ResourceKind::RegionalCertificate,
                CertificateScope::Edge => ResourceKind::EdgeCertificate,
            };
            NodeId::new(kind, domain)
        };

        for request in &plan.certificates {
            graph.add_node(cert_node(request.scope, &request.domain));
        }

        for derived in &plan.services {
            let service = derived.service.as_str();
            let compute = NodeId::new(ResourceKind::ComputeUnit, service);
            graph.add_node(compute.clone());

            if derived.target_binding.is_some() {
                let binding = NodeId::new(ResourceKind::TargetBinding, service);
                // The workload registers into the binding at launch
                graph.add_dependency(compute.clone(), binding.clone());

                if let Some(rule) = &derived.routing_rule {
                    let rule_node = NodeId::new(ResourceKind::RoutingRule, service);
                    graph.add_dependency(rule_node.clone(), binding);
                    let cert = cert_node(CertificateScope::Regional, &rule.host);
                    if graph.dependencies.contains_key(&cert) {
                        graph.add_dependency(rule_node, cert);
                    }
                }
            }

            if derived.discovery.is_some() {
                // Registration must exist before the workload registers into it
                let discovery = NodeId::new(ResourceKind::DiscoveryRegistration, service);
                graph.add_dependency(compute.clone(), discovery);
            }

            if derived.autoscaling.is_some() {
                let scaling = NodeId::new(ResourceKind::AutoscalingPolicy, service);
                graph.add_dependency(scaling, compute.clone());
            }

            if let Some(cdn) = &derived.cdn {
                let cdn_node = NodeId::new(ResourceKind::CdnOrigin, service);
                graph.add_node(cdn_node.clone());
                if derived.routing_rule.is_some() {
                    graph.add_dependency(
                        cdn_node.clone(),
                        NodeId::new(ResourceKind::RoutingRule, service),
                    );
                }
                let cert = cert_node(CertificateScope::Edge, &cdn.origin_domain);
                if graph.dependencies.contains_key(&cert) {
                    graph.add_dependency(cdn_node, cert);
                }
            }
        }

        graph
    }

    /// Topological levels for creation.
    ///
    /// Level N contains every node whose prerequisites all sit in levels
    /// below N; nodes within a level are mutually independent and sorted for
    /// a deterministic walk. A cycle fails with the nodes involved.
    pub fn creation_levels(&self) -> Result<Vec<Vec<NodeId>>> {
        let mut placed: BTreeSet<&NodeId> = BTreeSet::new();
        let mut remaining: BTreeSet<&NodeId> = self.dependencies.keys().collect();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<&NodeId> = remaining
                .iter()
                .copied()
                .filter(|node| self.prerequisites_of(node).all(|dep| placed.contains(dep)))
                .collect();

            if ready.is_empty() {
                let stuck: Vec<String> = remaining.iter().map(|n| n.to_string()).collect();
                return Err(Error::GraphCycle(format!(
                    "dependency cycle among: {}",
                    stuck.join(", ")
                )));
            }

            for node in &ready {
                placed.insert(node);
                remaining.remove(*node);
            }
            levels.push(ready.into_iter().cloned().collect());
        }

        Ok(levels)
    }

    /// Topological levels for destruction: creation levels reversed
    pub fn destruction_levels(&self) -> Result<Vec<Vec<NodeId>>> {
        let mut levels = self.creation_levels()?;
        levels.reverse();
        Ok(levels)
    }
}

// =============================================================================
// Convergence Engine
// =============================================================================

/// Applies one derived resource to the world
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceApplier: Send + Sync {
    /// Create or update the resource behind the node
    async fn apply(&self, node: NodeId) -> Result<()>;

    /// Destroy the resource behind the node
    async fn destroy(&self, node: NodeId) -> Result<()>;
}

/// Per-node outcome tracked during a walk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeState {
    Done,
    Failed,
    Skipped,
}

/// Outcome of a convergence or teardown walk
#[derive(Debug, Default)]
pub struct ConvergenceReport {
    /// Nodes applied (or destroyed), sorted
    pub applied: Vec<NodeId>,
    /// Nodes whose operation failed, with the error
    pub failed: BTreeMap<NodeId, Error>,
    /// Nodes skipped because a prerequisite (or dependent, on teardown)
    /// did not complete
    pub skipped: Vec<NodeId>,
}

impl ConvergenceReport {
    /// True when every node applied
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Walks a resource graph, applying or destroying nodes in dependency order
pub struct ConvergenceEngine {
    applier: Arc<dyn ResourceApplier>,
    parallelism: usize,
}

impl ConvergenceEngine {
    /// Create an engine with the default parallelism
    pub fn new(applier: Arc<dyn ResourceApplier>) -> Self {
        Self {
            applier,
            parallelism: DEFAULT_APPLY_PARALLELISM,
        }
    }

    /// Cap concurrent operations within a level (clamped to at least 1)
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Create every resource in the graph, prerequisites first.
    ///
    /// A failure never rolls back siblings: independent subtrees keep
    /// converging, and only the failed node's transitive dependents are
    /// skipped.
    pub async fn converge(&self, graph: &ResourceGraph) -> Result<ConvergenceReport> {
        let levels = graph.creation_levels()?;
        info!(nodes = graph.len(), levels = levels.len(), "converging resource graph");

        let states: DashMap<NodeId, NodeState> = DashMap::new();
        let mut report = ConvergenceReport::default();

        for level in levels {
            let mut runnable = Vec::new();
            for node in level {
                // Prerequisites always sit in earlier levels, so their
                // states are settled by now.
                let blocked = graph
                    .prerequisites_of(&node)
                    .any(|dep| states.get(dep).map(|s| *s) != Some(NodeState::Done));
                if blocked {
                    warn!(node = %node, "skipping: prerequisite did not apply");
                    states.insert(node.clone(), NodeState::Skipped);
                    report.skipped.push(node);
                } else {
                    runnable.push(node);
                }
            }

            let states_ref = &states;
            let results: Vec<(NodeId, Result<()>)> = futures::stream::iter(runnable)
                .map(|node| async move {
                    debug!(node = %node, "applying");
                    let result = self.applier.apply(node.clone()).await;
                    let state = if result.is_ok() {
                        NodeState::Done
                    } else {
                        NodeState::Failed
                    };
                    states_ref.insert(node.clone(), state);
                    (node, result)
                })
                .buffer_unordered(self.parallelism)
                .collect()
                .await;

            for (node, result) in results {
                match result {
                    Ok(()) => report.applied.push(node),
                    Err(e) => {
                        warn!(node = %node, error = %e, "apply failed");
                        report.failed.insert(node, e);
                    }
                }
            }
        }

        report.applied.sort();
        report.skipped.sort();
        Ok(report)
    }

    /// Destroy every resource in the graph, dependents first.
    ///
    /// A node whose dependent failed to destroy is skipped: tearing out a
    /// prerequisite from under a still-existing dependent would strand it.
    pub async fn teardown(&self, graph: &ResourceGraph) -> Result<ConvergenceReport> {
        let levels = graph.destruction_levels()?;
        info!(nodes = graph.len(), levels = levels.len(), "tearing down resource graph");

        let states: DashMap<NodeId, NodeState> = DashMap::new();
        let mut report = ConvergenceReport::default();

        for level in levels {
            let mut runnable = Vec::new();
            for node in level {
                let blocked = graph
                    .dependents_of(&node)
                    .any(|dep| states.get(dep).map(|s| *s) != Some(NodeState::Done));
                if blocked {
                    warn!(node = %node, "skipping: dependent still exists");
                    states.insert(node.clone(), NodeState::Skipped);
                    report.skipped.push(node);
                } else {
                    runnable.push(node);
                }
            }

            let states_ref = &states;
            let results: Vec<(NodeId, Result<()>)> = futures::stream::iter(runnable)
                .map(|node| async move {
                    debug!(node = %node, "destroying");
                    let result = self.applier.destroy(node.clone()).await;
                    let state = if result.is_ok() {
                        NodeState::Done
                    } else {
                        NodeState::Failed
                    };
                    states_ref.insert(node.clone(), state);
                    (node, result)
                })
                .buffer_unordered(self.parallelism)
                .collect()
                .await;

            for (node, result) in results {
                match result {
                    Ok(()) => report.applied.push(node),
                    Err(e) => {
                        warn!(node = %node, error = %e, "destroy failed");
                        report.failed.insert(node, e);
                    }
                }
            }
        }

        report.applied.sort();
        report.skipped.sort();
        Ok(report)
    }
}

// =============================================================================
// Tests
// =============================================================================
