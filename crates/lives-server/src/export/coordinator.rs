//! Per-locality build coordination
//!
//! The coordinator owns the build lock map and derives each locality's
//! snapshot state from three inputs: whether a lock is held, whether an
//! artifact is published, and how the artifact's watermark compares to the
//! live source watermark. `try_acquire` is the single-flight gate: it is an
//! atomic check-and-set under one mutex, so any number of callers racing on
//! the same locality produce exactly one build.
//!
//! Locks carry a lease. A lock held longer than the lease is treated as
//! abandoned (a crashed or wedged build) and reclaimed, otherwise the
//! locality would stay `Building` forever and never rebuild. The lock map is
//! process-local; the deployment assumption is a single server process
//! owning the export directory.

use chrono::{DateTime, Utc};
use lives_common::Locality;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::Artifact;

/// Snapshot state of one locality's export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalityState {
    /// No artifact has ever been published and no build is in flight.
    Absent,
    /// A published artifact is at least as new as the source watermark.
    Fresh,
    /// A published artifact exists but the source has moved past it.
    Stale,
    /// A build lock is currently held; overrides the other three.
    Building,
}

/// How a build finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Success,
    Failure,
}

/// An exclusive, time-bounded claim on one locality's build slot
#[derive(Debug, Clone)]
struct BuildLock {
    owner: Uuid,
    acquired_at: Instant,
}

/// Per-locality build state machine with single-flight acquisition
pub struct BuildCoordinator {
    locks: Mutex<HashMap<Locality, BuildLock>>,
    lease: Duration,
}

/// Whether a snapshot is outdated relative to the live source.
///
/// A locality is stale iff no artifact exists, or the artifact's watermark is
/// behind the source watermark. `Option` ordering (`None < Some(_)`) gives
/// the right answer for empty localities: an empty archive stays fresh until
/// the first inspection appears.
pub fn is_stale(artifact: Option<&Artifact>, source_watermark: Option<DateTime<Utc>>) -> bool {
    match artifact {
        None => true,
        Some(artifact) => artifact.watermark < source_watermark,
    }
}

impl BuildCoordinator {
    pub fn new(lease: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            lease,
        }
    }

    /// Compute the locality's current state. A held (unexpired) lock
    /// overrides artifact comparisons.
    pub fn evaluate(
        &self,
        locality: &Locality,
        artifact: Option<&Artifact>,
        source_watermark: Option<DateTime<Utc>>,
    ) -> LocalityState {
        if self.is_building(locality) {
            LocalityState::Building
        } else if artifact.is_none() {
            LocalityState::Absent
        } else if is_stale(artifact, source_watermark) {
            LocalityState::Stale
        } else {
            LocalityState::Fresh
        }
    }

    /// True iff a live (unexpired) build lock is held for the locality.
    pub fn is_building(&self, locality: &Locality) -> bool {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        self.live_lock(&mut locks, locality).is_some()
    }

    /// Atomically claim the locality's build slot.
    ///
    /// Returns the owner token on success, which the finished build must
    /// present to `release`. Returns `None` without side effect when another
    /// build is in flight; reclaims and replaces an expired lock.
    pub fn try_acquire(&self, locality: &Locality) -> Option<Uuid> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

        if self.live_lock(&mut locks, locality).is_some() {
            debug!(locality = %locality, "Build already in flight, skipping trigger");
            return None;
        }

        let lock = BuildLock {
            owner: Uuid::new_v4(),
            acquired_at: Instant::now(),
        };
        let owner = lock.owner;
        debug!(locality = %locality, owner = %owner, "Build lock acquired");
        locks.insert(locality.clone(), lock);
        Some(owner)
    }

    /// Clear the locality's build lock after a finished build.
    ///
    /// Only the lock whose owner matches `owner` is removed. A build that
    /// outlived its lease and was reclaimed must not clear the reclaimer's
    /// lock, or `is_building` would go false while that build still runs.
    pub fn release(&self, locality: &Locality, owner: Uuid, outcome: BuildOutcome) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

        match locks.get(locality).map(|l| (l.owner, l.acquired_at)) {
            Some((holder, acquired_at)) if holder == owner => {
                let held_for = acquired_at.elapsed();
                locks.remove(locality);
                match outcome {
                    BuildOutcome::Success => {
                        info!(locality = %locality, held_secs = held_for.as_secs_f64(), "Build lock released after successful build")
                    },
                    BuildOutcome::Failure => {
                        warn!(locality = %locality, held_secs = held_for.as_secs_f64(), "Build lock released after failed build")
                    },
                }
            },
            Some((holder, _)) => {
                // Lease expired mid-build and another build took the slot.
                warn!(
                    locality = %locality,
                    owner = %owner,
                    holder = %holder,
                    "Skipping release of a build lock reclaimed by another build"
                );
            },
            None => {
                warn!(locality = %locality, owner = %owner, "Released a build lock that was no longer held");
            },
        }
    }

    /// Look up the locality's lock, dropping it if the lease has expired.
    fn live_lock<'a>(
        &self,
        locks: &'a mut HashMap<Locality, BuildLock>,
        locality: &Locality,
    ) -> Option<&'a BuildLock> {
        if let Some(lock) = locks.get(locality) {
            if lock.acquired_at.elapsed() > self.lease {
                warn!(
                    locality = %locality,
                    owner = %lock.owner,
                    lease_secs = self.lease.as_secs(),
                    "Build lock exceeded its lease, reclaiming as abandoned"
                );
                locks.remove(locality);
                return None;
            }
        }
        locks.get(locality)
    }
}
