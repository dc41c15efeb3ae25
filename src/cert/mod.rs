//! Certificate issuance and DNS validation
//!
//! Certificates back two kinds of routing front-ends:
//! - Regional: the shared gateway listener, issued in the deployment region
//! - Edge: CDN distributions, which only accept certificates issued in the
//!   edge region regardless of where the rest of the stack lives
//!
//! Issuance is asynchronous. The authority hands back DNS validation records
//! which must resolve before the certificate is usable; the
//! [`CertificateValidator`] publishes them (when a zone is configured), then
//! polls the authority with backoff until the certificate issues, the
//! deadline passes, or the caller cancels. Validation never destroys
//! anything: a cancelled run leaves the certificate pending so a later run
//! can pick it back up.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use crate::retry::{Backoff, BackoffConfig};
use crate::{Error, Result, DEFAULT_VALIDATION_TIMEOUT_SECS, EDGE_CERTIFICATE_REGION};

// =============================================================================
// Types
// =============================================================================

/// Where a certificate will be consumed, which dictates the issuing region
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum CertificateScope {
    /// Attached to the shared gateway in the deployment region
    Regional,
    /// Attached to a CDN distribution; must be issued in the edge region
    Edge,
}

impl CertificateScope {
    /// The region the issuing authority must live in for this scope
    pub fn authority_region<'a>(&self, deployment_region: &'a str) -> &'a str {
        match self {
            CertificateScope::Regional => deployment_region,
            CertificateScope::Edge => EDGE_CERTIFICATE_REGION,
        }
    }
}

/// A DNS record the authority requires before it will issue
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRecord {
    /// Record name
    pub name: String,
    /// Record type, CNAME for DNS validation
    pub record_type: String,
    /// Record value
    pub value: String,
}

/// A certificate to be requested from the authority
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    /// Primary domain
    pub domain: String,
    /// Subject alternative names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternate_names: Vec<String>,
    /// Consumption scope
    pub scope: CertificateScope,
}

impl CertificateRequest {
    /// A regional certificate for a single domain
    pub fn regional(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            alternate_names: Vec::new(),
            scope: CertificateScope::Regional,
        }
    }

    /// An edge certificate for a domain with alternative names
    pub fn edge(domain: impl Into<String>, alternate_names: Vec<String>) -> Self {
        Self {
            domain: domain.into(),
            alternate_names,
            scope: CertificateScope::Edge,
        }
    }
}

/// Lifecycle state of a tracked certificate
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CertificateState {
    /// Requested from the authority, validation records known
    Requested,
    /// Validation records published (or handed off), awaiting issuance
    PendingValidation,
    /// Issued and usable
    Issued,
    /// Gave up waiting for issuance
    Failed,
}

impl CertificateState {
    fn as_str(&self) -> &'static str {
        match self {
            CertificateState::Requested => "requested",
            CertificateState::PendingValidation => "pendingValidation",
            CertificateState::Issued => "issued",
            CertificateState::Failed => "failed",
        }
    }
}

/// A certificate tracked through validation
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// Authority-assigned identifier
    pub id: String,
    /// The originating request
    pub request: CertificateRequest,
    /// Current lifecycle state
    pub state: CertificateState,
    /// DNS records required for validation
    pub records: Vec<ValidationRecord>,
    /// When the certificate was requested
    pub requested_at: DateTime<Utc>,
    /// When the state last changed
    pub state_changed_at: DateTime<Utc>,
}

impl Certificate {
    fn set_state(&mut self, state: CertificateState) {
        self.state = state;
        self.state_changed_at = Utc::now();
    }
}

/// Authority-reported issuance progress
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IssuanceStatus {
    /// Whether the certificate has issued
    pub issued: bool,
    /// Validation record names still unresolved
    pub unresolved: Vec<String>,
}

/// How a validation wait ended, short of an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The certificate issued
    Issued,
    /// The caller cancelled; the certificate is still pending
    Cancelled,
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// The certificate-issuing authority for one region
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Request a certificate; returns its identifier and the DNS records
    /// required for validation
    async fn request_certificate(
        &self,
        request: CertificateRequest,
    ) -> Result<(String, Vec<ValidationRecord>)>;

    /// Report issuance progress for a previously requested certificate
    async fn issuance_status(&self, certificate_id: String) -> Result<IssuanceStatus>;
}

/// Publishes DNS records into a hosted zone
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DnsRecordPublisher: Send + Sync {
    /// Upsert the given records into the zone
    async fn publish(&self, zone_id: String, records: Vec<ValidationRecord>) -> Result<()>;
}

// =============================================================================
// Validator
// =============================================================================

/// Timing parameters for the validation wait
#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    /// Give up waiting for issuance after this long
    pub timeout: Duration,
    /// Poll backoff
    pub backoff: BackoffConfig,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_VALIDATION_TIMEOUT_SECS),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Drives certificates from request through DNS validation to issuance
pub struct CertificateValidator {
    authority: Arc<dyn CertificateAuthority>,
    publisher: Arc<dyn DnsRecordPublisher>,
    region: String,
    dns_zone_id: Option<String>,
    config: ValidatorConfig,
}

impl CertificateValidator {
    /// Create a validator bound to the authority of one region
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        publisher: Arc<dyn DnsRecordPublisher>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            authority,
            publisher,
            region: region.into(),
            dns_zone_id: None,
            config: ValidatorConfig::default(),
        }
    }

    /// Enable automatic publication of validation records into this zone
    pub fn with_dns_zone(mut self, zone_id: impl Into<String>) -> Self {
        self.dns_zone_id = Some(zone_id.into());
        self
    }

    /// Override the validation timing parameters
    pub fn with_config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Request a certificate from the authority.
    ///
    /// The scope/region pairing is checked before the authority is contacted:
    /// an edge certificate requested through a validator bound to any other
    /// region can never be attached, so it is refused up front.
    pub async fn request(&self, request: CertificateRequest) -> Result<Certificate> {
        let required = request.scope.authority_region(&self.region);
        if required != self.region {
            return Err(Error::configuration(format!(
                "certificate for '{}' has scope {:?} which requires region {}, \
                 but this validator is bound to {}",
                request.domain, request.scope, required, self.region
            )));
        }

        let (id, records) = self.authority.request_certificate(request.clone()).await?;
        info!(domain = %request.domain, certificate = %id, "requested certificate");

        let now = Utc::now();
        Ok(Certificate {
            id,
            request,
            state: CertificateState::Requested,
            records,
            requested_at: now,
            state_changed_at: now,
        })
    }

    /// Publish the certificate's validation records and mark it pending.
    ///
    /// Without a configured zone the records are left for the operator to
    /// publish out of band; the certificate still moves to pending so the
    /// wait loop can observe out-of-band resolution.
    ///
    /// Only a freshly requested certificate can start validation. Failed
    /// certificates stay failed; reissuance means a new [`Self::request`].
    pub async fn begin_validation(&self, certificate: &mut Certificate) -> Result<()> {
        if certificate.state != CertificateState::Requested {
            return Err(Error::certificate_state(
                &certificate.id,
                certificate.state.as_str(),
                CertificateState::Requested.as_str(),
            ));
        }

        match &self.dns_zone_id {
            Some(zone) => {
                self.publisher
                    .publish(zone.clone(), certificate.records.clone())
                    .await?;
                info!(
                    certificate = %certificate.id,
                    zone = %zone,
                    records = certificate.records.len(),
                    "published validation records"
                );
            }
            None => {
                info!(
                    certificate = %certificate.id,
                    records = certificate.records.len(),
                    "no DNS zone configured; validation records must be published manually"
                );
            }
        }

        certificate.set_state(CertificateState::PendingValidation);
        Ok(())
    }

    /// Wait for the certificate to issue.
    ///
    /// Polls the authority with backoff until issuance, the configured
    /// timeout, or cancellation. Authority errors during polling are treated
    /// as transient and retried within the deadline. A timeout marks the
    /// certificate failed; a cancellation leaves it pending.
    pub async fn await_issuance(
        &self,
        certificate: &mut Certificate,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ValidationOutcome> {
        if certificate.state != CertificateState::PendingValidation {
            return Err(Error::certificate_state(
                &certificate.id,
                certificate.state.as_str(),
                CertificateState::PendingValidation.as_str(),
            ));
        }

        let deadline = Instant::now() + self.config.timeout;
        let mut backoff = Backoff::new(&self.config.backoff);
        let mut cancel_open = true;
        // If every poll errors before the deadline, the timeout still needs
        // records to report; start from the full set we were told to publish.
        let mut unresolved: Vec<String> =
            certificate.records.iter().map(|r| r.name.clone()).collect();

        loop {
            if *cancel.borrow() {
                info!(certificate = %certificate.id, "validation cancelled");
                return Ok(ValidationOutcome::Cancelled);
            }

            match self.authority.issuance_status(certificate.id.clone()).await {
                // An authority report claiming issuance while records remain
                // unresolved is inconsistent; keep polling rather than trust it.
                Ok(status) if status.issued && status.unresolved.is_empty() => {
                    certificate.set_state(CertificateState::Issued);
                    info!(
                        certificate = %certificate.id,
                        domain = %certificate.request.domain,
                        "certificate issued"
                    );
                    return Ok(ValidationOutcome::Issued);
                }
                Ok(status) => {
                    debug!(
                        certificate = %certificate.id,
                        unresolved = status.unresolved.len(),
                        "certificate not yet issued"
                    );
                    unresolved = status.unresolved;
                }
                // Transient: the deadline bounds how long we keep trying
                Err(e) => {
                    warn!(
                        certificate = %certificate.id,
                        error = %e,
                        "authority status check failed; will retry"
                    );
                }
            }

            let delay = backoff.next_delay();
            if Instant::now() + delay >= deadline {
                certificate.set_state(CertificateState::Failed);
                return Err(Error::ValidationTimeout {
                    domain: certificate.request.domain.clone(),
                    unresolved,
                });
            }

            tokio::select! {
                _ = sleep(delay) => {}
                changed = cancel.changed(), if cancel_open => {
                    // A dropped sender means nothing will ever cancel us;
                    // stop selecting on the channel and just keep polling.
                    if changed.is_err() {
                        cancel_open = false;
                    }
                }
            }
        }
    }

    /// Wait for a batch of certificates concurrently.
    ///
    /// Results are returned in input order; one certificate timing out does
    /// not stop the others.
    pub async fn validate_all(
        &self,
        certificates: &mut [Certificate],
        cancel: &watch::Receiver<bool>,
    ) -> Vec<Result<ValidationOutcome>> {
        let waits = certificates
            .iter_mut()
            .map(|cert| self.await_issuance(cert, cancel.clone()));
        futures::future::join_all(waits).await
    }
}

// =============================================================================
// Tests
// =============================================================================
