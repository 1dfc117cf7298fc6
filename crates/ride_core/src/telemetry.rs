//! Simulation metrics derived from ride and driver snapshots.
//!
//! Everything here is computed from stale-tolerant snapshot reads; no new
//! invariants are introduced. The summary is the shape handed to the external
//! API layer.

use serde::Serialize;

use crate::clock::minutes_between;
use crate::records::{Driver, DriverId, DriverStatus, Ride, RideStatus};
use crate::store::EntityStore;

/// Ride counts by status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RideCounts {
    pub pending: usize,
    pub assigned: usize,
    pub arrived: usize,
    pub started: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl RideCounts {
    pub fn add(&mut self, status: RideStatus) {
        match status {
            RideStatus::CreateRide => self.pending += 1,
            RideStatus::Assigned => self.assigned += 1,
            RideStatus::DriverArrived => self.arrived += 1,
            RideStatus::Started => self.started += 1,
            RideStatus::Completed => self.completed += 1,
            RideStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.assigned + self.arrived + self.started + self.completed + self.cancelled
    }
}

/// Driver counts by status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriverCounts {
    pub idle: usize,
    pub assigned: usize,
    pub on_trip: usize,
}

impl DriverCounts {
    pub fn add(&mut self, status: DriverStatus) {
        match status {
            DriverStatus::Idle => self.idle += 1,
            DriverStatus::Assigned => self.assigned += 1,
            DriverStatus::OnTrip => self.on_trip += 1,
        }
    }
}

/// Per-driver aggregates over completed and cancelled rides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverAggregate {
    pub driver: DriverId,
    pub name: String,
    pub completed_rides: usize,
    pub cancelled_rides: usize,
    pub total_fare: f64,
    pub avg_fare: f64,
    pub avg_wait_minutes: f64,
    pub avg_duration_minutes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub rides: RideCounts,
    pub drivers: DriverCounts,
    /// Average minutes from driver arrival to ride start, over completed rides.
    pub avg_wait_minutes: f64,
    /// Average minutes from ride start to ride end, over completed rides.
    pub avg_duration_minutes: f64,
    pub per_driver: Vec<DriverAggregate>,
}

/// Minutes the driver waited at the pickup location, if both timestamps exist.
fn wait_minutes(ride: &Ride) -> Option<f64> {
    match (ride.arrived_at, ride.started_at) {
        (Some(arrived), Some(started)) => Some(minutes_between(arrived, started)),
        _ => None,
    }
}

/// Minutes the ride was underway, if both timestamps exist.
fn duration_minutes(ride: &Ride) -> Option<f64> {
    match (ride.started_at, ride.ended_at) {
        (Some(started), Some(ended)) => Some(minutes_between(started, ended)),
        _ => None,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn aggregate_driver(driver: &Driver, rides: &[Ride]) -> DriverAggregate {
    let mut fares = Vec::new();
    let mut waits = Vec::new();
    let mut durations = Vec::new();
    let mut cancelled = 0usize;

    for ride in rides {
        if ride.driver != Some(driver.id) {
            continue;
        }
        match ride.status {
            RideStatus::Completed => {
                fares.push(ride.fare.unwrap_or(0.0));
                if let Some(wait) = wait_minutes(ride) {
                    waits.push(wait);
                }
                if let Some(duration) = duration_minutes(ride) {
                    durations.push(duration);
                }
            }
            RideStatus::Cancelled => cancelled += 1,
            _ => {}
        }
    }

    let total_fare: f64 = fares.iter().sum();
    DriverAggregate {
        driver: driver.id,
        name: driver.name.clone(),
        completed_rides: fares.len(),
        cancelled_rides: cancelled,
        total_fare,
        avg_fare: mean(&fares),
        avg_wait_minutes: mean(&waits),
        avg_duration_minutes: mean(&durations),
    }
}

/// Build the full metrics summary from current store snapshots.
pub fn summarize(store: &EntityStore) -> MetricsSummary {
    let rides = store.list_rides();
    let drivers = store.list_drivers();

    let mut ride_counts = RideCounts::default();
    let mut waits = Vec::new();
    let mut durations = Vec::new();
    for ride in &rides {
        ride_counts.add(ride.status);
        if ride.status == RideStatus::Completed {
            if let Some(wait) = wait_minutes(ride) {
                waits.push(wait);
            }
            if let Some(duration) = duration_minutes(ride) {
                durations.push(duration);
            }
        }
    }

    let mut driver_counts = DriverCounts::default();
    let mut per_driver = Vec::with_capacity(drivers.len());
    for driver in &drivers {
        driver_counts.add(driver.status);
        per_driver.push(aggregate_driver(driver, &rides));
    }

    MetricsSummary {
        rides: ride_counts,
        drivers: driver_counts,
        avg_wait_minutes: mean(&waits),
        avg_duration_minutes: mean(&durations),
        per_driver,
    }
}
