//! Deterministic gateway rule priority allocation
//!
//! Routing priorities are part of the routing contract: once a service has a
//! priority on a listener, re-planning an unchanged catalog must never move
//! it, or the gateway replaces rules for no reason. Allocation is therefore a
//! pure function of the current input set: no hidden counter, no prior-run
//! state.
//!
//! Pinned priorities (declared via `rulePriority`) are reserved up front;
//! auto-allocation walks upward from the base, skipping reservations. Any
//! collision between pins is a hard failure naming every claimant, never a
//! silent reassignment.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::spec::ServiceSpec;
use crate::{Error, Result, MAX_RULE_PRIORITY};

/// Assign a unique routing priority to every gateway-exposed service.
///
/// Services are visited in catalog declaration order. Pinned priorities are
/// honored as-is; the rest are allocated starting at `base`, incrementing by
/// one and skipping anything pinned. The result maps service name to
/// priority and contains exactly the exposed services.
///
/// # Errors
///
/// [`Error::PriorityConflict`] when two services pin the same priority,
/// naming every claimant. [`Error::Configuration`] when allocation would
/// walk past the listener's maximum priority.
pub fn allocate(services: &[ServiceSpec], base: u32) -> Result<BTreeMap<String, u32>> {
    let exposed: Vec<&ServiceSpec> = services.iter().filter(|s| s.is_exposed()).collect();

    // Reserve pins first so auto-allocation can never land on one.
    let mut pinned: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for service in &exposed {
        if let Some(priority) = service.rule_priority {
            pinned.entry(priority).or_default().push(&service.name);
        }
    }

    if let Some((&priority, claimants)) = pinned.iter().find(|(_, names)| names.len() > 1) {
        return Err(Error::PriorityConflict {
            priority,
            services: claimants.iter().map(|s| s.to_string()).collect(),
        });
    }

    let reserved: BTreeSet<u32> = pinned.keys().copied().collect();
    let mut assigned: BTreeMap<String, u32> = BTreeMap::new();
    let mut next = base;

    for service in &exposed {
        let priority = match service.rule_priority {
            Some(pinned) => pinned,
            None => {
                while reserved.contains(&next) {
                    next += 1;
                }
                if next > MAX_RULE_PRIORITY {
                    return Err(Error::configuration(format!(
                        "priority allocation exceeded listener maximum {MAX_RULE_PRIORITY}"
                    )));
                }
                let allocated = next;
                next += 1;
                allocated
            }
        };

        debug!(service = %service.name, priority, "allocated routing priority");
        assigned.insert(service.name.clone(), priority);
    }

    Ok(assigned)
}
