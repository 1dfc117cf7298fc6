//! Driver allocation: expanding-radius nearest-eligible search.
//!
//! For each pending ride the dispatcher grows a search disk around the pickup
//! point, filters idle drivers through the eligibility rules and attempts a
//! guarded assignment of the closest survivor. A lost race (another writer
//! touched the ride or the driver first) is retried once at the same radius
//! with a refreshed candidate list; exhausting the radius ceiling is not an
//! error; the ride stays pending for the next scheduled pass.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::eligibility::{EligibilityFilter, IneligibleReason};
use crate::records::{DriverId, DriverStatus, RideId, RideStatus};
use crate::store::{EntityStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// First search radius around the pickup point.
    pub initial_radius_km: f64,
    /// Radius growth when a disk holds no eligible driver.
    pub radius_increment_km: f64,
    /// Search ceiling; the last step is clamped here so the full disk is
    /// covered before the attempt ends.
    pub max_radius_km: f64,
    /// Window during which a driver may not serve the same rider again.
    pub same_rider_cooldown: Duration,
    /// Cadence of the background dispatch scheduler.
    pub tick_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            initial_radius_km: 1.0,
            radius_increment_km: 1.0,
            max_radius_km: 20.0,
            same_rider_cooldown: Duration::from_secs(30 * 60),
            tick_interval: Duration::from_secs(10),
        }
    }
}

/// Result of one allocation attempt for one ride.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchOutcome {
    Assigned {
        driver: DriverId,
        distance_km: f64,
        /// Radius at which the assignment happened.
        radius_km: f64,
    },
    /// Radius ceiling reached with no eligible driver; the ride stays pending.
    Exhausted,
    /// The ride left `create_ride` while we were searching (cancelled, or
    /// assigned by a concurrent attempt).
    Aborted,
}

/// Drivers rejected by the eligibility rules during a pass, by reason.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExclusionCounts {
    pub active_ride: usize,
    pub recent_ride: usize,
    pub cancelled_rides: usize,
}

impl ExclusionCounts {
    fn record(&mut self, reason: IneligibleReason) {
        match reason {
            IneligibleReason::NotIdle => self.active_ride += 1,
            IneligibleReason::RecentRideWithRider => self.recent_ride += 1,
            IneligibleReason::RepeatedCancellations => self.cancelled_rides += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.active_ride + self.recent_ride + self.cancelled_rides
    }
}

/// Aggregate result of one dispatch pass over the pending-ride list.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct DispatchPassStats {
    pub processed: usize,
    pub assigned: usize,
    pub exhausted: usize,
    pub aborted: usize,
    pub errors: usize,
    pub exclusions: ExclusionCounts,
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<EntityStore>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(store: Arc<EntityStore>, clock: Arc<dyn Clock>, config: DispatchConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    /// One pass over all pending rides, in creation order. A failure on one
    /// ride is logged and must not prevent processing of the next.
    pub fn dispatch_pending(&self) -> DispatchPassStats {
        let pending = self.store.pending_rides();
        log::info!("dispatch pass: {} pending rides", pending.len());

        let mut stats = DispatchPassStats::default();
        for ride in pending {
            stats.processed += 1;
            match self.dispatch_with_stats(ride.id, &mut stats.exclusions) {
                Ok(DispatchOutcome::Assigned {
                    driver,
                    distance_km,
                    radius_km,
                }) => {
                    stats.assigned += 1;
                    log::info!(
                        "assigned driver {} to ride {} at {:.2} km (radius {:.0} km)",
                        driver,
                        ride.id,
                        distance_km,
                        radius_km
                    );
                }
                Ok(DispatchOutcome::Exhausted) => {
                    stats.exhausted += 1;
                    log::warn!(
                        "no eligible driver for ride {} within {:.0} km",
                        ride.id,
                        self.config.max_radius_km
                    );
                }
                Ok(DispatchOutcome::Aborted) => {
                    stats.aborted += 1;
                    log::debug!("ride {} no longer pending, skipping", ride.id);
                }
                Err(err) => {
                    stats.errors += 1;
                    log::error!("dispatch failed for ride {}: {}", ride.id, err);
                }
            }
        }
        stats
    }

    /// Allocate a driver for a single pending ride.
    pub fn dispatch_ride(&self, ride_id: RideId) -> Result<DispatchOutcome, StoreError> {
        self.dispatch_with_stats(ride_id, &mut ExclusionCounts::default())
    }

    fn dispatch_with_stats(
        &self,
        ride_id: RideId,
        exclusions: &mut ExclusionCounts,
    ) -> Result<DispatchOutcome, StoreError> {
        let now_ms = self.clock.now_ms();
        let cooldown_ms = self.config.same_rider_cooldown.as_millis() as u64;
        let filter = EligibilityFilter::new(&self.store, now_ms, cooldown_ms);

        let mut radius_km = self.config.initial_radius_km;
        loop {
            // Cancellation of an in-flight search is observed here, once per
            // radius iteration.
            let Some(ride) = self.store.ride(ride_id) else {
                return Ok(DispatchOutcome::Aborted);
            };
            if ride.status != RideStatus::CreateRide {
                return Ok(DispatchOutcome::Aborted);
            }

            let mut conflict_retries = 0;
            'same_radius: loop {
                let candidates = self.store.idle_drivers_within(ride.pickup, radius_km);
                let mut eligible: Vec<(DriverId, f64)> = Vec::new();
                for (driver, distance_km) in &candidates {
                    match filter.check(&ride, driver) {
                        Ok(()) => eligible.push((driver.id, *distance_km)),
                        Err(reason) => {
                            exclusions.record(reason);
                            log::debug!(
                                "driver {} excluded for ride {}: {}",
                                driver.id,
                                ride.id,
                                reason
                            );
                        }
                    }
                }
                log::debug!(
                    "ride {}: {} eligible of {} candidates within {:.0} km",
                    ride.id,
                    eligible.len(),
                    candidates.len(),
                    radius_km
                );

                // Closest wins; equidistant drivers resolve to the lowest id.
                let Some(&(driver_id, distance_km)) = eligible.iter().min_by(|a, b| {
                    a.1.partial_cmp(&b.1)
                        .unwrap_or(Ordering::Equal)
                        .then(a.0.cmp(&b.0))
                }) else {
                    break 'same_radius;
                };

                match self.store.try_assign(
                    ride_id,
                    driver_id,
                    RideStatus::CreateRide,
                    DriverStatus::Idle,
                    now_ms,
                ) {
                    Ok(()) => {
                        return Ok(DispatchOutcome::Assigned {
                            driver: driver_id,
                            distance_km,
                            radius_km,
                        })
                    }
                    Err(StoreError::Conflict { .. }) => {
                        let Some(current) = self.store.ride(ride_id) else {
                            return Ok(DispatchOutcome::Aborted);
                        };
                        if current.status != RideStatus::CreateRide {
                            return Ok(DispatchOutcome::Aborted);
                        }
                        // The driver was taken from under us. Retry this
                        // radius once with fresh candidates; a second lost
                        // race expands instead of spinning.
                        conflict_retries += 1;
                        if conflict_retries > 1 {
                            break 'same_radius;
                        }
                    }
                    Err(err) => return Err(err),
                }
            }

            if radius_km >= self.config.max_radius_km {
                return Ok(DispatchOutcome::Exhausted);
            }
            radius_km = (radius_km + self.config.radius_increment_km).min(self.config.max_radius_km);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MS_PER_MINUTE};
    use crate::pricing::{PricingConfig, DEFAULT_PRICING_KEY};
    use crate::records::RiderId;
    use crate::test_helpers::{point_km_north, test_point};

    fn setup() -> (Arc<EntityStore>, Arc<ManualClock>, Dispatcher) {
        let store = Arc::new(EntityStore::new());
        store.set_pricing_config(DEFAULT_PRICING_KEY, PricingConfig::default());
        let clock = Arc::new(ManualClock::new(0));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&clock) as Arc<dyn Clock>,
            DispatchConfig::default(),
        );
        (store, clock, dispatcher)
    }

    fn pending_ride(store: &EntityStore, rider: RiderId, now_ms: u64) -> RideId {
        store
            .create_ride(rider, test_point(), point_km_north(test_point(), 0.3), now_ms)
            .expect("ride")
    }

    #[test]
    fn closest_driver_wins_at_the_initial_radius() {
        let (store, _clock, dispatcher) = setup();
        let pickup = test_point();
        let rider = store.create_rider("Rider1", pickup);
        let near = store.create_driver("Near", point_km_north(pickup, 0.5));
        let _mid = store.create_driver("Mid", point_km_north(pickup, 1.5));
        let _far = store.create_driver("Far", point_km_north(pickup, 3.0));
        let ride = pending_ride(&store, rider, 0);

        let outcome = dispatcher.dispatch_ride(ride).expect("dispatch");
        match outcome {
            DispatchOutcome::Assigned {
                driver, radius_km, ..
            } => {
                assert_eq!(driver, near);
                // Found before any expansion.
                assert_eq!(radius_km, 1.0);
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn radius_expands_until_a_driver_is_in_range() {
        let (store, _clock, dispatcher) = setup();
        let pickup = test_point();
        let rider = store.create_rider("Rider1", pickup);
        let driver = store.create_driver("Distant", point_km_north(pickup, 2.5));
        let ride = pending_ride(&store, rider, 0);

        let outcome = dispatcher.dispatch_ride(ride).expect("dispatch");
        match outcome {
            DispatchOutcome::Assigned {
                driver: assigned,
                radius_km,
                distance_km,
            } => {
                assert_eq!(assigned, driver);
                assert_eq!(radius_km, 3.0);
                assert!((distance_km - 2.5).abs() < 1e-6);
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn equidistant_drivers_resolve_to_the_lowest_id() {
        let (store, _clock, dispatcher) = setup();
        let pickup = test_point();
        let spot = point_km_north(pickup, 0.4);
        let rider = store.create_rider("Rider1", pickup);
        let first = store.create_driver("First", spot);
        let _second = store.create_driver("Second", spot);
        let ride = pending_ride(&store, rider, 0);

        let outcome = dispatcher.dispatch_ride(ride).expect("dispatch");
        assert!(
            matches!(outcome, DispatchOutcome::Assigned { driver, .. } if driver == first),
            "expected lowest driver id, got {:?}",
            outcome
        );
    }

    #[test]
    fn exhaustion_leaves_the_ride_pending() {
        let (store, _clock, dispatcher) = setup();
        let pickup = test_point();
        let rider = store.create_rider("Rider1", pickup);
        let _far = store.create_driver("TooFar", point_km_north(pickup, 25.0));
        let ride = pending_ride(&store, rider, 0);

        let outcome = dispatcher.dispatch_ride(ride).expect("dispatch");
        assert_eq!(outcome, DispatchOutcome::Exhausted);
        assert_eq!(
            store.ride(ride).expect("ride").status,
            RideStatus::CreateRide
        );
    }

    #[test]
    fn cancelled_ride_aborts_the_search() {
        let (store, _clock, dispatcher) = setup();
        let pickup = test_point();
        let rider = store.create_rider("Rider1", pickup);
        let _driver = store.create_driver("Driver1", point_km_north(pickup, 0.5));
        let ride = pending_ride(&store, rider, 0);
        store.cancel_ride(ride, 1).expect("cancel");

        let outcome = dispatcher.dispatch_ride(ride).expect("dispatch");
        assert_eq!(outcome, DispatchOutcome::Aborted);
    }

    #[test]
    fn same_rider_cooldown_diverts_to_a_farther_driver() {
        let (store, clock, dispatcher) = setup();
        let pickup = test_point();
        let dropoff = point_km_north(pickup, 0.3);
        let rider = store.create_rider("Rider1", pickup);
        let close = store.create_driver("Close", point_km_north(pickup, 0.2));
        let backup = store.create_driver("Backup", point_km_north(pickup, 4.0));

        // First ride: the close driver serves this rider and completes.
        let first = store.create_ride(rider, pickup, dropoff, 0).expect("ride");
        assert!(matches!(
            dispatcher.dispatch_ride(first).expect("dispatch"),
            DispatchOutcome::Assigned { driver, .. } if driver == close
        ));
        store.mark_driver_arrived(first, MS_PER_MINUTE).expect("arrive");
        store.start_ride(first, 2 * MS_PER_MINUTE).expect("start");
        store
            .complete_ride(first, 5 * MS_PER_MINUTE)
            .expect("complete");

        // Ten minutes later the same rider requests again: the close driver
        // is inside the cooldown, so the backup gets it.
        clock.set_ms(15 * MS_PER_MINUTE);
        let second = store
            .create_ride(rider, pickup, dropoff, clock.now_ms())
            .expect("ride");
        assert!(matches!(
            dispatcher.dispatch_ride(second).expect("dispatch"),
            DispatchOutcome::Assigned { driver, .. } if driver == backup
        ));
        store.cancel_ride(second, clock.now_ms()).expect("cancel");

        // At completion + 30 minutes the close driver is eligible again.
        clock.set_ms(35 * MS_PER_MINUTE);
        let third = store
            .create_ride(rider, pickup, dropoff, clock.now_ms())
            .expect("ride");
        assert!(matches!(
            dispatcher.dispatch_ride(third).expect("dispatch"),
            DispatchOutcome::Assigned { driver, .. } if driver == close
        ));
    }

    #[test]
    fn driver_with_two_cancellations_is_skipped() {
        let (store, _clock, dispatcher) = setup();
        let pickup = test_point();
        let rider = store.create_rider("Rider1", pickup);
        let flaky = store.create_driver("Flaky", point_km_north(pickup, 0.2));

        // Two assigned-then-cancelled rides build the streak.
        for created_at in [0, 10] {
            let ride = pending_ride(&store, rider, created_at);
            assert!(matches!(
                dispatcher.dispatch_ride(ride).expect("dispatch"),
                DispatchOutcome::Assigned { driver, .. } if driver == flaky
            ));
            store.cancel_ride(ride, created_at + 5).expect("cancel");
        }

        let blocked = pending_ride(&store, rider, 20);
        assert_eq!(
            dispatcher.dispatch_ride(blocked).expect("dispatch"),
            DispatchOutcome::Exhausted
        );
        assert_eq!(
            store.ride(blocked).expect("ride").status,
            RideStatus::CreateRide
        );
    }

    #[test]
    fn one_pass_processes_every_ride_despite_shortages() {
        let (store, _clock, dispatcher) = setup();
        let pickup = test_point();
        let rider = store.create_rider("Rider1", pickup);
        let _driver = store.create_driver("Only", point_km_north(pickup, 0.5));
        let first = pending_ride(&store, rider, 0);
        let second = pending_ride(&store, rider, 1);

        let stats = dispatcher.dispatch_pending();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.assigned, 1);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.errors, 0);

        // Oldest ride got the only driver.
        assert_eq!(store.ride(first).expect("ride").status, RideStatus::Assigned);
        assert_eq!(
            store.ride(second).expect("ride").status,
            RideStatus::CreateRide
        );
    }
}
