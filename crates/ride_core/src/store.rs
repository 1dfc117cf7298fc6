//! Exclusive owner of all entity records.
//!
//! Every mutation in the system goes through one of the guarded operations
//! below: the store locks, re-reads the current state, checks the expected
//! status guard, and only then writes. Callers hold ids, never references to
//! record internals, and read cloned snapshots, so the background dispatch
//! scheduler and request-driven lifecycle commands can race freely without
//! producing a double-booked driver or a twice-assigned ride.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use h3o::LatLng;

use crate::pricing::{calculate_fare, FareBreakdown, PricingConfig, DEFAULT_PRICING_KEY};
use crate::clock::minutes_between;
use crate::records::{
    Driver, DriverId, DriverStatus, Ride, RideId, RideOutcome, RideStatus, Rider, RiderId,
};
use crate::spatial::{haversine_km, DriverSpatialIndex};

#[derive(Debug)]
pub enum StoreError {
    /// An optimistic status guard failed on an assignment write. Recoverable:
    /// the dispatcher re-reads and retries or skips.
    Conflict {
        ride: RideId,
        driver: DriverId,
        ride_status: RideStatus,
        driver_status: DriverStatus,
    },
    /// A lifecycle operation was invoked on a ride whose current state forbids
    /// it. Surfaced to the caller, never silently applied.
    InvalidTransition {
        ride: RideId,
        from: RideStatus,
        action: &'static str,
    },
    RideNotFound(RideId),
    DriverNotFound(DriverId),
    RiderNotFound(RiderId),
    /// No pricing configuration under the given key at fare-computation time.
    ConfigurationMissing(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict {
                ride,
                driver,
                ride_status,
                driver_status,
            } => write!(
                f,
                "assignment conflict: ride {} is {}, driver {} is {}",
                ride, ride_status, driver, driver_status
            ),
            StoreError::InvalidTransition { ride, from, action } => {
                write!(f, "cannot {} ride {} in status {}", action, ride, from)
            }
            StoreError::RideNotFound(id) => write!(f, "ride {} not found", id),
            StoreError::DriverNotFound(id) => write!(f, "driver {} not found", id),
            StoreError::RiderNotFound(id) => write!(f, "rider {} not found", id),
            StoreError::ConfigurationMissing(key) => {
                write!(f, "no pricing configuration under key {:?}", key)
            }
        }
    }
}

impl Error for StoreError {}

#[derive(Debug, Default)]
struct StoreInner {
    riders: HashMap<RiderId, Rider>,
    drivers: HashMap<DriverId, Driver>,
    rides: HashMap<RideId, Ride>,
    pricing: HashMap<String, PricingConfig>,
    /// (driver, rider) → timestamp of their most recent completed ride,
    /// serving the same-rider cooldown rule as an O(1) lookup.
    completed_pairs: HashMap<(DriverId, RiderId), u64>,
    spatial: DriverSpatialIndex,
    next_rider: u64,
    next_driver: u64,
    next_ride: u64,
}

#[derive(Debug, Default)]
pub struct EntityStore {
    inner: Mutex<StoreInner>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guards never leave records half-written (the status check precedes any
    /// mutation), so a poisoned lock is recoverable.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── record creation ────────────────────────────────────────────

    pub fn create_rider(&self, name: impl Into<String>, home: LatLng) -> RiderId {
        let mut inner = self.lock();
        inner.next_rider += 1;
        let id = RiderId(inner.next_rider);
        inner.riders.insert(
            id,
            Rider {
                id,
                name: name.into(),
                home,
            },
        );
        id
    }

    pub fn create_driver(&self, name: impl Into<String>, position: LatLng) -> DriverId {
        let mut inner = self.lock();
        inner.next_driver += 1;
        let id = DriverId(inner.next_driver);
        inner.drivers.insert(id, Driver::new(id, name, position));
        inner.spatial.insert(id, position);
        id
    }

    /// Create a ride request in `create_ride` status with its straight-line
    /// distance precomputed.
    pub fn create_ride(
        &self,
        rider: RiderId,
        pickup: LatLng,
        dropoff: LatLng,
        now_ms: u64,
    ) -> Result<RideId, StoreError> {
        let mut inner = self.lock();
        if !inner.riders.contains_key(&rider) {
            return Err(StoreError::RiderNotFound(rider));
        }
        inner.next_ride += 1;
        let id = RideId(inner.next_ride);
        inner.rides.insert(
            id,
            Ride {
                id,
                rider,
                driver: None,
                pickup,
                dropoff,
                status: RideStatus::CreateRide,
                distance_km: haversine_km(pickup, dropoff),
                fare: None,
                created_at: now_ms,
                assigned_at: None,
                arrived_at: None,
                started_at: None,
                ended_at: None,
                cancelled_at: None,
            },
        );
        Ok(id)
    }

    // ── snapshot reads ─────────────────────────────────────────────

    pub fn rider(&self, id: RiderId) -> Option<Rider> {
        self.lock().riders.get(&id).cloned()
    }

    pub fn driver(&self, id: DriverId) -> Option<Driver> {
        self.lock().drivers.get(&id).cloned()
    }

    pub fn ride(&self, id: RideId) -> Option<Ride> {
        self.lock().rides.get(&id).cloned()
    }

    pub fn list_riders(&self) -> Vec<Rider> {
        let inner = self.lock();
        let mut riders: Vec<_> = inner.riders.values().cloned().collect();
        riders.sort_by_key(|r| r.id);
        riders
    }

    pub fn list_drivers(&self) -> Vec<Driver> {
        let inner = self.lock();
        let mut drivers: Vec<_> = inner.drivers.values().cloned().collect();
        drivers.sort_by_key(|d| d.id);
        drivers
    }

    pub fn list_rides(&self) -> Vec<Ride> {
        let inner = self.lock();
        let mut rides: Vec<_> = inner.rides.values().cloned().collect();
        rides.sort_by_key(|r| r.id);
        rides
    }

    /// Rides awaiting a driver, oldest first so dispatch is fair.
    pub fn pending_rides(&self) -> Vec<Ride> {
        let inner = self.lock();
        let mut pending: Vec<_> = inner
            .rides
            .values()
            .filter(|ride| ride.status == RideStatus::CreateRide)
            .cloned()
            .collect();
        pending.sort_by_key(|ride| (ride.created_at, ride.id));
        pending
    }

    /// Idle drivers within `radius_km` of `center`, with their exact distance,
    /// closest first (ties by id).
    pub fn idle_drivers_within(&self, center: LatLng, radius_km: f64) -> Vec<(Driver, f64)> {
        let inner = self.lock();
        let mut found = Vec::new();
        for id in inner.spatial.drivers_in_disk(center, radius_km) {
            let Some(driver) = inner.drivers.get(&id) else {
                continue;
            };
            if driver.status != DriverStatus::Idle {
                continue;
            }
            let distance = haversine_km(driver.position, center);
            if distance <= radius_km {
                found.push((driver.clone(), distance));
            }
        }
        found.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.id.cmp(&b.0.id))
        });
        found
    }

    /// Timestamp of the most recent completed ride between `driver` and
    /// `rider`, if any.
    pub fn last_completed_with(&self, driver: DriverId, rider: RiderId) -> Option<u64> {
        self.lock().completed_pairs.get(&(driver, rider)).copied()
    }

    // ── pricing configuration ──────────────────────────────────────

    pub fn set_pricing_config(&self, key: impl Into<String>, config: PricingConfig) {
        self.lock().pricing.insert(key.into(), config);
    }

    pub fn pricing_config(&self, key: &str) -> Option<PricingConfig> {
        self.lock().pricing.get(key).copied()
    }

    // ── guarded writes ─────────────────────────────────────────────

    /// Atomically assign `driver` to `ride`. Fails with [StoreError::Conflict]
    /// if either record's status no longer matches the expectation: the
    /// caller lost a race and must re-evaluate.
    pub fn try_assign(
        &self,
        ride_id: RideId,
        driver_id: DriverId,
        expected_ride: RideStatus,
        expected_driver: DriverStatus,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let Some(ride) = inner.rides.get(&ride_id) else {
            return Err(StoreError::RideNotFound(ride_id));
        };
        let Some(driver) = inner.drivers.get(&driver_id) else {
            return Err(StoreError::DriverNotFound(driver_id));
        };
        if ride.status != expected_ride || driver.status != expected_driver {
            return Err(StoreError::Conflict {
                ride: ride_id,
                driver: driver_id,
                ride_status: ride.status,
                driver_status: driver.status,
            });
        }
        debug_assert!(
            driver.status != DriverStatus::Idle || driver.active_ride.is_none(),
            "idle driver must not carry an active ride"
        );

        if let Some(ride) = inner.rides.get_mut(&ride_id) {
            ride.status = RideStatus::Assigned;
            ride.driver = Some(driver_id);
            ride.assigned_at = Some(now_ms);
        }
        if let Some(driver) = inner.drivers.get_mut(&driver_id) {
            driver.status = DriverStatus::Assigned;
            driver.active_ride = Some(ride_id);
        }
        Ok(())
    }

    /// `driver_assigned → driver_at_location`.
    pub fn mark_driver_arrived(&self, ride_id: RideId, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let Some(ride) = inner.rides.get_mut(&ride_id) else {
            return Err(StoreError::RideNotFound(ride_id));
        };
        if ride.status != RideStatus::Assigned {
            return Err(StoreError::InvalidTransition {
                ride: ride_id,
                from: ride.status,
                action: "mark arrival for",
            });
        }
        ride.status = RideStatus::DriverArrived;
        ride.arrived_at = Some(now_ms);
        Ok(())
    }

    /// `driver_at_location → start_ride`; the driver goes on trip.
    pub fn start_ride(&self, ride_id: RideId, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let Some(ride) = inner.rides.get(&ride_id) else {
            return Err(StoreError::RideNotFound(ride_id));
        };
        if ride.status != RideStatus::DriverArrived {
            return Err(StoreError::InvalidTransition {
                ride: ride_id,
                from: ride.status,
                action: "start",
            });
        }
        let Some(driver_id) = ride.driver else {
            return Err(StoreError::InvalidTransition {
                ride: ride_id,
                from: ride.status,
                action: "start",
            });
        };

        if let Some(ride) = inner.rides.get_mut(&ride_id) {
            ride.status = RideStatus::Started;
            ride.started_at = Some(now_ms);
        }
        if let Some(driver) = inner.drivers.get_mut(&driver_id) {
            driver.status = DriverStatus::OnTrip;
        }
        Ok(())
    }

    /// `start_ride → end_ride`: computes the fare exactly once, frees the
    /// driver at the drop-off location and records the completion in the
    /// driver's history and the cooldown index.
    ///
    /// Fails with [StoreError::ConfigurationMissing] when no active pricing
    /// configuration exists, leaving the ride in `start_ride`.
    pub fn complete_ride(&self, ride_id: RideId, now_ms: u64) -> Result<FareBreakdown, StoreError> {
        let mut inner = self.lock();
        let Some(ride) = inner.rides.get(&ride_id) else {
            return Err(StoreError::RideNotFound(ride_id));
        };
        if ride.status != RideStatus::Started {
            return Err(StoreError::InvalidTransition {
                ride: ride_id,
                from: ride.status,
                action: "complete",
            });
        }
        let Some(driver_id) = ride.driver else {
            return Err(StoreError::InvalidTransition {
                ride: ride_id,
                from: ride.status,
                action: "complete",
            });
        };
        let Some(config) = inner.pricing.get(DEFAULT_PRICING_KEY).copied() else {
            return Err(StoreError::ConfigurationMissing(
                DEFAULT_PRICING_KEY.to_string(),
            ));
        };

        let rider = ride.rider;
        let dropoff = ride.dropoff;
        let distance_km = if ride.distance_km > 0.0 {
            ride.distance_km
        } else {
            haversine_km(ride.pickup, ride.dropoff)
        };
        let started_at = ride.started_at.unwrap_or(now_ms);
        let arrived_at = ride.arrived_at.unwrap_or(started_at);
        let duration_minutes = minutes_between(started_at, now_ms);
        let wait_minutes = minutes_between(arrived_at, started_at);
        let fare = calculate_fare(distance_km, duration_minutes, wait_minutes, &config);
        log::debug!(
            "ride {} fare: base {:.2} + distance {:.2} + time {:.2} + waiting {:.2} = {:.2}",
            ride_id,
            fare.base,
            fare.distance,
            fare.time,
            fare.waiting,
            fare.total
        );

        if let Some(ride) = inner.rides.get_mut(&ride_id) {
            ride.status = RideStatus::Completed;
            ride.ended_at = Some(now_ms);
            ride.distance_km = distance_km;
            ride.fare = Some(fare.total);
        }
        if let Some(driver) = inner.drivers.get_mut(&driver_id) {
            driver.status = DriverStatus::Idle;
            driver.active_ride = None;
            driver.position = dropoff;
            driver.record_outcome(RideOutcome::Completed);
        }
        inner.spatial.update_position(driver_id, dropoff);
        inner.completed_pairs.insert((driver_id, rider), now_ms);
        Ok(fare)
    }

    /// Cancel a ride. Allowed from `create_ride`, `driver_assigned` and
    /// `driver_at_location`; a ride that has started must run to completion.
    /// An assigned driver is freed back to idle and the cancellation lands in
    /// its outcome ring.
    pub fn cancel_ride(&self, ride_id: RideId, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let Some(ride) = inner.rides.get(&ride_id) else {
            return Err(StoreError::RideNotFound(ride_id));
        };
        if !ride.status.can_cancel() {
            return Err(StoreError::InvalidTransition {
                ride: ride_id,
                from: ride.status,
                action: "cancel",
            });
        }
        let assigned_driver = ride.driver;

        if let Some(ride) = inner.rides.get_mut(&ride_id) {
            ride.status = RideStatus::Cancelled;
            ride.cancelled_at = Some(now_ms);
        }
        if let Some(driver_id) = assigned_driver {
            if let Some(driver) = inner.drivers.get_mut(&driver_id) {
                driver.status = DriverStatus::Idle;
                driver.active_ride = None;
                driver.record_outcome(RideOutcome::Cancelled);
            }
        }
        log::debug!("ride {} cancelled", ride_id);
        Ok(())
    }
}
