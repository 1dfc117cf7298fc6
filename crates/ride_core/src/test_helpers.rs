//! Test helpers for common test setup and utilities.
//!
//! This module provides shared test utilities to reduce duplication across
//! test files.

use std::sync::Arc;

use h3o::LatLng;

use crate::pricing::{PricingConfig, DEFAULT_PRICING_KEY};
use crate::spatial::EARTH_RADIUS_KM;
use crate::store::EntityStore;

/// Standard test location used across test files for consistency
/// (Bangalore city center, same as the default scenario).
pub const TEST_LAT: f64 = 12.9716;
pub const TEST_LNG: f64 = 77.5946;

/// Get the standard test location.
///
/// # Panics
///
/// Panics if the test coordinates are invalid (should never happen).
pub fn test_point() -> LatLng {
    LatLng::new(TEST_LAT, TEST_LNG).expect("test coordinates should be valid")
}

/// Point exactly `km` north of `origin` along the meridian, so its haversine
/// distance from `origin` is exactly `km`.
///
/// # Panics
///
/// Panics if the offset pushes the latitude out of range.
pub fn point_km_north(origin: LatLng, km: f64) -> LatLng {
    let dlat = (km / EARTH_RADIUS_KM).to_degrees();
    LatLng::new(origin.lat() + dlat, origin.lng()).expect("offset coordinate should be valid")
}

/// Fresh store with the default pricing configuration installed.
pub fn store_with_default_pricing() -> Arc<EntityStore> {
    let store = Arc::new(EntityStore::new());
    store.set_pricing_config(DEFAULT_PRICING_KEY, PricingConfig::default());
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::haversine_km;

    #[test]
    fn test_point_is_valid() {
        let point = test_point();
        assert_eq!(point.lat(), TEST_LAT);
        assert_eq!(point.lng(), TEST_LNG);
    }

    #[test]
    fn northward_offsets_have_exact_distances() {
        let origin = test_point();
        let offset = point_km_north(origin, 2.0);
        assert!((haversine_km(origin, offset) - 2.0).abs() < 1e-9);
    }
}
