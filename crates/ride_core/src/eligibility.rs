//! Driver eligibility rules for ride assignment.
//!
//! A driver is eligible for a specific ride only when all three rules hold.
//! The rules are evaluated in order and the first violation is reported, so
//! exclusion counters stay comparable across dispatch passes.

use std::fmt;

use crate::records::{Driver, DriverStatus, Ride};
use crate::store::EntityStore;

/// Why a candidate driver was rejected for a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibleReason {
    /// Driver is already on an active ride.
    NotIdle,
    /// Driver completed a ride with this rider within the cooldown window.
    RecentRideWithRider,
    /// Driver's two most recent ride outcomes are both cancellations.
    RepeatedCancellations,
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IneligibleReason::NotIdle => "active_ride",
            IneligibleReason::RecentRideWithRider => "recent_ride",
            IneligibleReason::RepeatedCancellations => "cancelled_rides",
        };
        write!(f, "{}", name)
    }
}

/// Rule evaluation against a driver snapshot.
///
/// `last_completed_with_rider` is the timestamp of the most recent completed
/// ride between this driver and the ride's rider, if any. The driver becomes
/// eligible again at exactly `completed_at + cooldown_ms`.
pub fn check_candidate(
    driver: &Driver,
    last_completed_with_rider: Option<u64>,
    now_ms: u64,
    cooldown_ms: u64,
) -> Result<(), IneligibleReason> {
    if driver.status != DriverStatus::Idle {
        return Err(IneligibleReason::NotIdle);
    }

    if let Some(completed_at) = last_completed_with_rider {
        if now_ms.saturating_sub(completed_at) < cooldown_ms {
            return Err(IneligibleReason::RecentRideWithRider);
        }
    }

    if driver.last_two_cancelled() {
        return Err(IneligibleReason::RepeatedCancellations);
    }

    Ok(())
}

/// Store-backed filter: resolves the same-rider cooldown lookup and applies
/// [check_candidate].
pub struct EligibilityFilter<'a> {
    store: &'a EntityStore,
    now_ms: u64,
    cooldown_ms: u64,
}

impl<'a> EligibilityFilter<'a> {
    pub fn new(store: &'a EntityStore, now_ms: u64, cooldown_ms: u64) -> Self {
        Self {
            store,
            now_ms,
            cooldown_ms,
        }
    }

    pub fn check(&self, ride: &Ride, driver: &Driver) -> Result<(), IneligibleReason> {
        let last_completed = self.store.last_completed_with(driver.id, ride.rider);
        check_candidate(driver, last_completed, self.now_ms, self.cooldown_ms)
    }
}
