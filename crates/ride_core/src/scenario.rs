//! Seeded scenario generation for simulations and benchmarks.
//!
//! Populates a store with riders and drivers scattered around a city center
//! and generates ride requests near each rider's home. Everything is driven by
//! a seeded RNG so a scenario is reproducible from its parameters alone.

use h3o::LatLng;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::pricing::{PricingConfig, DEFAULT_PRICING_KEY};
use crate::records::{DriverId, RideId, RiderId};
use crate::spatial::EARTH_RADIUS_KM;
use crate::store::EntityStore;

/// Pickup points are drawn within this distance of the rider's home.
const PICKUP_SPREAD_KM: f64 = 5.0;

/// Drop-off points are drawn within this distance of the rider's home.
const DROPOFF_SPREAD_KM: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioParams {
    pub num_riders: usize,
    pub num_drivers: usize,
    /// City center latitude (default: Bangalore).
    pub center_lat: f64,
    /// City center longitude.
    pub center_lng: f64,
    /// Riders and drivers are placed within this radius of the center.
    pub city_radius_km: f64,
    /// Seed for the RNG, for reproducibility.
    pub seed: u64,
    pub pricing: PricingConfig,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            num_riders: 10,
            num_drivers: 15,
            center_lat: 12.9716,
            center_lng: 77.5946,
            city_radius_km: 20.0,
            seed: 0,
            pricing: PricingConfig::default(),
        }
    }
}

impl ScenarioParams {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_population(mut self, num_riders: usize, num_drivers: usize) -> Self {
        self.num_riders = num_riders;
        self.num_drivers = num_drivers;
        self
    }
}

/// Ids created by [seed_scenario].
#[derive(Debug, Clone)]
pub struct SeededScenario {
    pub riders: Vec<RiderId>,
    pub drivers: Vec<DriverId>,
}

/// Uniform random point within `radius_km` of `center` (uniform over the disk
/// area, hence the square root on the radial draw).
pub fn random_point_within_km<R: Rng>(
    rng: &mut R,
    center: LatLng,
    radius_km: f64,
) -> Result<LatLng, String> {
    let r = rng.gen::<f64>().sqrt() * radius_km.max(0.0);
    let theta = rng.gen::<f64>() * std::f64::consts::TAU;
    let east_km = r * theta.cos();
    let north_km = r * theta.sin();

    let dlat = (north_km / EARTH_RADIUS_KM).to_degrees();
    let dlng = (east_km / (EARTH_RADIUS_KM * center.lat().to_radians().cos())).to_degrees();
    LatLng::new(center.lat() + dlat, center.lng() + dlng)
        .map_err(|e| format!("generated coordinate out of range: {}", e))
}

/// Seed pricing, riders and drivers into `store` per `params`.
pub fn seed_scenario(
    store: &EntityStore,
    params: &ScenarioParams,
) -> Result<SeededScenario, String> {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let center = LatLng::new(params.center_lat, params.center_lng)
        .map_err(|e| format!("invalid city center: {}", e))?;

    store.set_pricing_config(DEFAULT_PRICING_KEY, params.pricing);

    let mut riders = Vec::with_capacity(params.num_riders);
    for i in 0..params.num_riders {
        let home = random_point_within_km(&mut rng, center, params.city_radius_km)?;
        riders.push(store.create_rider(format!("Rider{}", i + 1), home));
    }

    let mut drivers = Vec::with_capacity(params.num_drivers);
    for i in 0..params.num_drivers {
        let position = random_point_within_km(&mut rng, center, params.city_radius_km)?;
        drivers.push(store.create_driver(format!("Driver{}", i + 1), position));
    }

    log::info!(
        "seeded scenario: {} riders, {} drivers around ({:.4}, {:.4})",
        riders.len(),
        drivers.len(),
        params.center_lat,
        params.center_lng
    );
    Ok(SeededScenario { riders, drivers })
}

/// Generate one or two ride requests per rider, pickups near home, drop-offs
/// a little farther out.
pub fn generate_requests(
    store: &EntityStore,
    rng: &mut StdRng,
    riders: &[RiderId],
    now_ms: u64,
) -> Result<Vec<RideId>, String> {
    let mut rides = Vec::new();
    for &rider_id in riders {
        let Some(rider) = store.rider(rider_id) else {
            return Err(format!("rider {} not found in store", rider_id));
        };
        let requests = rng.gen_range(1..=2);
        for _ in 0..requests {
            let pickup = random_point_within_km(rng, rider.home, PICKUP_SPREAD_KM)?;
            let dropoff = random_point_within_km(rng, rider.home, DROPOFF_SPREAD_KM)?;
            let ride = store
                .create_ride(rider_id, pickup, dropoff, now_ms)
                .map_err(|e| e.to_string())?;
            rides.push(ride);
        }
    }
    Ok(rides)
}
