//! Entity records: riders, drivers, rides and their state machines.
//!
//! Records are owned exclusively by the [crate::store::EntityStore]; the rest
//! of the system sees cloned snapshots and refers to records by id. All
//! timestamps are epoch milliseconds (see [crate::clock]).

use std::collections::VecDeque;
use std::fmt;

use h3o::LatLng;
use serde::{Deserialize, Serialize};

/// How many ride outcomes are retained per driver. The eligibility rules only
/// look at the two most recent; the rest feed observability.
pub const OUTCOME_HISTORY_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RiderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DriverId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RideId(pub u64);

impl fmt::Display for RiderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ride state machine. Forward transitions only; `Cancelled` is reachable from
/// the first three states, never from `Started` or a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RideStatus {
    CreateRide,
    Assigned,
    DriverArrived,
    Started,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Cancellation is allowed until the ride is underway.
    pub fn can_cancel(self) -> bool {
        matches!(
            self,
            RideStatus::CreateRide | RideStatus::Assigned | RideStatus::DriverArrived
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RideStatus::CreateRide => "create_ride",
            RideStatus::Assigned => "driver_assigned",
            RideStatus::DriverArrived => "driver_at_location",
            RideStatus::Started => "start_ride",
            RideStatus::Completed => "end_ride",
            RideStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverStatus {
    Idle,
    Assigned,
    OnTrip,
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverStatus::Idle => "idle",
            DriverStatus::Assigned => "assigned",
            DriverStatus::OnTrip => "on_trip",
        };
        write!(f, "{}", name)
    }
}

/// Terminal outcome of a ride, as recorded in a driver's history ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RideOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rider {
    pub id: RiderId,
    pub name: String,
    pub home: LatLng,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Driver {
    pub id: DriverId,
    pub name: String,
    /// Current coordinate. Moves to the drop-off when a ride completes;
    /// drivers are stationary between rides.
    pub position: LatLng,
    pub status: DriverStatus,
    pub active_ride: Option<RideId>,
    /// Bounded ring of recent ride outcomes, oldest first.
    pub recent_outcomes: VecDeque<RideOutcome>,
}

impl Driver {
    pub fn new(id: DriverId, name: impl Into<String>, position: LatLng) -> Self {
        Self {
            id,
            name: name.into(),
            position,
            status: DriverStatus::Idle,
            active_ride: None,
            recent_outcomes: VecDeque::with_capacity(OUTCOME_HISTORY_LEN),
        }
    }

    /// Push an outcome into the ring, evicting the oldest past
    /// [OUTCOME_HISTORY_LEN].
    pub fn record_outcome(&mut self, outcome: RideOutcome) {
        if self.recent_outcomes.len() == OUTCOME_HISTORY_LEN {
            self.recent_outcomes.pop_front();
        }
        self.recent_outcomes.push_back(outcome);
    }

    /// True when the driver's two most recent recorded outcomes are both
    /// cancellations.
    pub fn last_two_cancelled(&self) -> bool {
        let mut recent = self.recent_outcomes.iter().rev();
        matches!(
            (recent.next(), recent.next()),
            (Some(RideOutcome::Cancelled), Some(RideOutcome::Cancelled))
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ride {
    pub id: RideId,
    pub rider: RiderId,
    pub driver: Option<DriverId>,
    pub pickup: LatLng,
    pub dropoff: LatLng,
    pub status: RideStatus,
    /// Straight-line pickup→dropoff distance, precomputed at creation.
    pub distance_km: f64,
    /// Set exactly once, when the ride completes.
    pub fare: Option<f64>,
    pub created_at: u64,
    pub assigned_at: Option<u64>,
    pub arrived_at: Option<u64>,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
    pub cancelled_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_ring_is_bounded() {
        let position = LatLng::new(0.0, 0.0).expect("valid coordinate");
        let mut driver = Driver::new(DriverId(1), "Driver1", position);
        for _ in 0..OUTCOME_HISTORY_LEN + 3 {
            driver.record_outcome(RideOutcome::Completed);
        }
        assert_eq!(driver.recent_outcomes.len(), OUTCOME_HISTORY_LEN);
    }

    #[test]
    fn last_two_cancelled_requires_two_trailing_cancellations() {
        let position = LatLng::new(0.0, 0.0).expect("valid coordinate");
        let mut driver = Driver::new(DriverId(1), "Driver1", position);
        assert!(!driver.last_two_cancelled());

        driver.record_outcome(RideOutcome::Cancelled);
        assert!(!driver.last_two_cancelled());

        driver.record_outcome(RideOutcome::Cancelled);
        assert!(driver.last_two_cancelled());

        // A completion in between resets the streak.
        driver.record_outcome(RideOutcome::Completed);
        assert!(!driver.last_two_cancelled());

        driver.record_outcome(RideOutcome::Cancelled);
        assert!(!driver.last_two_cancelled());
        driver.record_outcome(RideOutcome::Cancelled);
        assert!(driver.last_two_cancelled());
    }

    #[test]
    fn cancel_is_rejected_once_underway() {
        assert!(RideStatus::CreateRide.can_cancel());
        assert!(RideStatus::Assigned.can_cancel());
        assert!(RideStatus::DriverArrived.can_cancel());
        assert!(!RideStatus::Started.can_cancel());
        assert!(!RideStatus::Completed.can_cancel());
        assert!(!RideStatus::Cancelled.can_cancel());
    }

    #[test]
    fn status_names_match_wire_format() {
        assert_eq!(RideStatus::CreateRide.to_string(), "create_ride");
        assert_eq!(RideStatus::Assigned.to_string(), "driver_assigned");
        assert_eq!(RideStatus::Completed.to_string(), "end_ride");
    }
}
