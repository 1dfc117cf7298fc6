//! Spatial operations: haversine distances and the H3-backed driver index.
//!
//! This module provides:
//!
//! - **Distance calculations**: great-circle distance between two coordinates
//! - **Grid disk queries**: cached H3 disks used to prefilter radius queries
//! - **DriverSpatialIndex**: H3 cell → driver mappings so `listDriversWithin`
//!   never scans the full driver table
//!
//! The index uses resolution 7 (~1.2 km edge cells): coarse enough that a
//! 20 km disk stays in the hundreds of cells, fine enough that the exact
//! haversine refinement discards few candidates.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use h3o::{CellIndex, LatLng, Resolution};
use lru::LruCache;

use crate::records::DriverId;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

pub const INDEX_RESOLUTION: Resolution = Resolution::Seven;

/// Average edge length of a resolution-7 cell. Ring counts derived from this
/// over-cover the requested radius; exact distances prune the excess.
const CELL_EDGE_KM: f64 = 1.2;

/// Great-circle distance between two coordinates in kilometers.
///
/// Pure and deterministic: identical inputs always yield the identical
/// distance, which the fare calculation relies on.
pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    let (lat1, lon1) = (a.lat().to_radians(), a.lng().to_radians());
    let (lat2, lon2) = (b.lat().to_radians(), b.lng().to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Grid disk cache for radius queries: the dispatcher asks for the same
/// (origin, k) disks every pass.
struct GridDiskCache {
    cache: Mutex<LruCache<(CellIndex, u32), Vec<CellIndex>>>,
}

impl GridDiskCache {
    fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(1_000).expect("cache size must be non-zero"),
            )),
        }
    }

    fn get_or_compute(&self, origin: CellIndex, k: u32) -> Vec<CellIndex> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            // Fallback: compute without cache if mutex poisoned
            Err(_) => return origin.grid_disk::<Vec<_>>(k),
        };
        cache
            .get_or_insert((origin, k), || origin.grid_disk::<Vec<_>>(k))
            .clone()
    }
}

static GRID_DISK_CACHE: OnceLock<GridDiskCache> = OnceLock::new();

/// Get the grid disk of `origin` with radius `k`, cached.
pub fn grid_disk_cached(origin: CellIndex, k: u32) -> Vec<CellIndex> {
    GRID_DISK_CACHE
        .get_or_init(GridDiskCache::new)
        .get_or_compute(origin, k)
}

/// Number of rings needed so the disk covers `radius_km` around any point of
/// the origin cell.
fn rings_for_radius_km(radius_km: f64) -> u32 {
    (radius_km.max(0.0) / CELL_EDGE_KM).ceil() as u32 + 1
}

/// Spatial index for driver lookups by H3 cell.
///
/// Maintains cell → driver and driver → cell mappings, updated as drivers are
/// registered and as their coordinate moves on ride completion.
#[derive(Debug, Default)]
pub struct DriverSpatialIndex {
    drivers_by_cell: HashMap<CellIndex, Vec<DriverId>>,
    driver_to_cell: HashMap<DriverId, CellIndex>,
}

impl DriverSpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, driver: DriverId, position: LatLng) {
        let cell = position.to_cell(INDEX_RESOLUTION);
        self.drivers_by_cell.entry(cell).or_default().push(driver);
        self.driver_to_cell.insert(driver, cell);
    }

    pub fn update_position(&mut self, driver: DriverId, position: LatLng) {
        let new_cell = position.to_cell(INDEX_RESOLUTION);
        if self.driver_to_cell.get(&driver) == Some(&new_cell) {
            return;
        }
        self.remove(driver);
        self.drivers_by_cell.entry(new_cell).or_default().push(driver);
        self.driver_to_cell.insert(driver, new_cell);
    }

    pub fn remove(&mut self, driver: DriverId) {
        if let Some(cell) = self.driver_to_cell.remove(&driver) {
            if let Some(drivers) = self.drivers_by_cell.get_mut(&cell) {
                drivers.retain(|&d| d != driver);
                if drivers.is_empty() {
                    self.drivers_by_cell.remove(&cell);
                }
            }
        }
    }

    /// Candidate drivers within `radius_km` of `center`. Over-approximates:
    /// every driver inside the radius is returned, plus some just outside it;
    /// callers refine with [haversine_km].
    pub fn drivers_in_disk(&self, center: LatLng, radius_km: f64) -> Vec<DriverId> {
        let origin = center.to_cell(INDEX_RESOLUTION);
        let k = rings_for_radius_km(radius_km);
        let mut result = Vec::new();
        for cell in grid_disk_cached(origin, k) {
            if let Some(drivers) = self.drivers_by_cell.get(&cell) {
                result.extend(drivers.iter().copied());
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.driver_to_cell.len()
    }

    pub fn is_empty(&self) -> bool {
        self.driver_to_cell.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lng: f64) -> LatLng {
        LatLng::new(lat, lng).expect("valid coordinate")
    }

    /// Point exactly `km` north of `origin` along the meridian.
    fn km_north(origin: LatLng, km: f64) -> LatLng {
        let dlat = (km / EARTH_RADIUS_KM).to_degrees();
        point(origin.lat() + dlat, origin.lng())
    }

    #[test]
    fn haversine_of_identical_points_is_zero() {
        let p = point(12.9716, 77.5946);
        assert_eq!(haversine_km(p, p), 0.0);
    }

    #[test]
    fn haversine_matches_meridian_arc() {
        let origin = point(12.9716, 77.5946);
        for km in [0.5, 1.0, 5.0, 19.9] {
            let d = haversine_km(origin, km_north(origin, km));
            assert!(
                (d - km).abs() < 1e-6,
                "expected {} km along the meridian, got {}",
                km,
                d
            );
        }
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = point(52.52, 13.40);
        let b = point(48.85, 2.35);
        assert_eq!(haversine_km(a, b), haversine_km(b, a));
    }

    #[test]
    fn disk_query_finds_drivers_inside_radius() {
        let center = point(12.9716, 77.5946);
        let mut index = DriverSpatialIndex::new();
        index.insert(DriverId(1), km_north(center, 0.5));
        index.insert(DriverId(2), km_north(center, 3.0));
        index.insert(DriverId(3), km_north(center, 50.0));

        let near = index.drivers_in_disk(center, 1.0);
        assert!(near.contains(&DriverId(1)));
        assert!(!near.contains(&DriverId(3)));

        let wide = index.drivers_in_disk(center, 20.0);
        assert!(wide.contains(&DriverId(1)));
        assert!(wide.contains(&DriverId(2)));
    }

    #[test]
    fn update_position_moves_driver_between_cells() {
        let center = point(12.9716, 77.5946);
        let far = km_north(center, 40.0);
        let mut index = DriverSpatialIndex::new();
        index.insert(DriverId(7), center);
        assert!(index.drivers_in_disk(center, 1.0).contains(&DriverId(7)));

        index.update_position(DriverId(7), far);
        assert!(!index.drivers_in_disk(center, 1.0).contains(&DriverId(7)));
        assert!(index.drivers_in_disk(far, 1.0).contains(&DriverId(7)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn remove_clears_both_mappings() {
        let center = point(12.9716, 77.5946);
        let mut index = DriverSpatialIndex::new();
        index.insert(DriverId(1), center);
        index.remove(DriverId(1));
        assert!(index.is_empty());
        assert!(index.drivers_in_disk(center, 5.0).is_empty());
    }
}
