//! Fare calculation from ride distance, duration and waiting time.

use serde::{Deserialize, Serialize};

/// Key under which the active pricing configuration is stored.
pub const DEFAULT_PRICING_KEY: &str = "default";

/// Rates used to price a completed ride. Immutable once fetched for a given
/// computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Flat amount charged on every ride.
    pub base_fare: f64,
    /// Charge per kilometer of pickup→dropoff distance.
    pub per_km_rate: f64,
    /// Charge per minute between ride start and ride end.
    pub per_minute_rate: f64,
    /// Charge per minute the driver waited at the pickup location.
    pub per_wait_minute_rate: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fare: 20.0,
            per_km_rate: 10.0,
            per_minute_rate: 2.0,
            per_wait_minute_rate: 1.0,
        }
    }
}

/// Per-component fare amounts, plus the cent-rounded total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FareBreakdown {
    pub base: f64,
    pub distance: f64,
    pub time: f64,
    pub waiting: f64,
    pub total: f64,
}

/// Calculate the fare for a completed ride.
///
/// Formula: `base + distance_km × per_km + duration_min × per_min +
/// wait_min × per_wait_min`, with every input clamped to ≥ 0 so degenerate
/// trips (zero distance, clock skew) price cleanly instead of erroring.
///
/// Pure function: identical inputs always yield the identical fare.
pub fn calculate_fare(
    distance_km: f64,
    duration_minutes: f64,
    wait_minutes: f64,
    config: &PricingConfig,
) -> FareBreakdown {
    let distance_km = distance_km.max(0.0);
    let duration_minutes = duration_minutes.max(0.0);
    let wait_minutes = wait_minutes.max(0.0);

    let base = config.base_fare;
    let distance = distance_km * config.per_km_rate;
    let time = duration_minutes * config.per_minute_rate;
    let waiting = wait_minutes * config.per_wait_minute_rate;

    FareBreakdown {
        base,
        distance,
        time,
        waiting,
        total: round_cents(base + distance + time + waiting),
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fare_sums_all_four_components() {
        let config = PricingConfig {
            base_fare: 50.0,
            per_km_rate: 10.0,
            per_minute_rate: 2.0,
            per_wait_minute_rate: 1.0,
        };
        let fare = calculate_fare(10.0, 20.0, 2.0, &config);
        assert_eq!(fare.base, 50.0);
        assert_eq!(fare.distance, 100.0);
        assert_eq!(fare.time, 40.0);
        assert_eq!(fare.waiting, 2.0);
        assert_eq!(fare.total, 192.0);
    }

    #[test]
    fn fare_is_deterministic_across_invocations() {
        let config = PricingConfig::default();
        let first = calculate_fare(7.3, 14.5, 1.25, &config);
        for _ in 0..10 {
            assert_eq!(calculate_fare(7.3, 14.5, 1.25, &config), first);
        }
    }

    #[test]
    fn degenerate_inputs_are_clamped_not_rejected() {
        let config = PricingConfig::default();
        let fare = calculate_fare(-3.0, -10.0, -1.0, &config);
        assert_eq!(fare.total, config.base_fare);
        assert_eq!(fare.distance, 0.0);
        assert_eq!(fare.time, 0.0);
        assert_eq!(fare.waiting, 0.0);

        let zero_trip = calculate_fare(0.0, 0.0, 0.0, &config);
        assert_eq!(zero_trip.total, config.base_fare);
    }

    #[test]
    fn totals_are_rounded_to_cents() {
        let config = PricingConfig {
            base_fare: 0.0,
            per_km_rate: 1.0,
            per_minute_rate: 0.0,
            per_wait_minute_rate: 0.0,
        };
        let fare = calculate_fare(1.0 / 3.0, 0.0, 0.0, &config);
        assert_eq!(fare.total, 0.33);
    }
}
