//! Parquet export of ride records and driver aggregates for offline analysis.

use std::error::Error;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use crate::records::{Ride, RideStatus};
use crate::telemetry::DriverAggregate;

fn u64_field(name: &'static str) -> Field {
    Field::new(name, DataType::UInt64, false)
}

fn nullable_u64_field(name: &'static str) -> Field {
    Field::new(name, DataType::UInt64, true)
}

fn f64_field(name: &'static str) -> Field {
    Field::new(name, DataType::Float64, false)
}

fn utf8_field(name: &'static str) -> Field {
    Field::new(name, DataType::Utf8, false)
}

fn write_record_batch<P: AsRef<Path>>(
    path: P,
    schema: Schema,
    arrays: Vec<ArrayRef>,
) -> Result<(), Box<dyn Error>> {
    let schema = Arc::new(schema);
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Write every completed ride in `rides` (other statuses are skipped) with its
/// full timestamp funnel and fare.
pub fn write_completed_rides_parquet<P: AsRef<Path>>(
    path: P,
    rides: &[Ride],
) -> Result<(), Box<dyn Error>> {
    let completed: Vec<&Ride> = rides
        .iter()
        .filter(|ride| ride.status == RideStatus::Completed)
        .collect();

    let mut ride_ids = Vec::with_capacity(completed.len());
    let mut rider_ids = Vec::with_capacity(completed.len());
    let mut driver_ids = Vec::with_capacity(completed.len());
    let mut distance_km = Vec::with_capacity(completed.len());
    let mut fare = Vec::with_capacity(completed.len());
    let mut created_at = Vec::with_capacity(completed.len());
    let mut assigned_at = Vec::with_capacity(completed.len());
    let mut arrived_at = Vec::with_capacity(completed.len());
    let mut started_at = Vec::with_capacity(completed.len());
    let mut ended_at = Vec::with_capacity(completed.len());

    for ride in &completed {
        ride_ids.push(ride.id.0);
        rider_ids.push(ride.rider.0);
        driver_ids.push(ride.driver.map(|d| d.0));
        distance_km.push(ride.distance_km);
        fare.push(ride.fare.unwrap_or(0.0));
        created_at.push(ride.created_at);
        assigned_at.push(ride.assigned_at);
        arrived_at.push(ride.arrived_at);
        started_at.push(ride.started_at);
        ended_at.push(ride.ended_at);
    }

    let schema = Schema::new(vec![
        u64_field("ride_id"),
        u64_field("rider_id"),
        nullable_u64_field("driver_id"),
        f64_field("distance_km"),
        f64_field("fare"),
        u64_field("created_at"),
        nullable_u64_field("assigned_at"),
        nullable_u64_field("arrived_at"),
        nullable_u64_field("started_at"),
        nullable_u64_field("ended_at"),
    ]);

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from(ride_ids)),
        Arc::new(UInt64Array::from(rider_ids)),
        Arc::new(UInt64Array::from_iter(driver_ids)),
        Arc::new(Float64Array::from(distance_km)),
        Arc::new(Float64Array::from(fare)),
        Arc::new(UInt64Array::from(created_at)),
        Arc::new(UInt64Array::from_iter(assigned_at)),
        Arc::new(UInt64Array::from_iter(arrived_at)),
        Arc::new(UInt64Array::from_iter(started_at)),
        Arc::new(UInt64Array::from_iter(ended_at)),
    ];

    write_record_batch(path, schema, arrays)
}

/// Write per-driver aggregates (see [crate::telemetry::summarize]).
pub fn write_driver_stats_parquet<P: AsRef<Path>>(
    path: P,
    stats: &[DriverAggregate],
) -> Result<(), Box<dyn Error>> {
    let mut driver_ids = Vec::with_capacity(stats.len());
    let mut names = Vec::with_capacity(stats.len());
    let mut completed = Vec::with_capacity(stats.len());
    let mut cancelled = Vec::with_capacity(stats.len());
    let mut total_fare = Vec::with_capacity(stats.len());
    let mut avg_fare = Vec::with_capacity(stats.len());
    let mut avg_wait = Vec::with_capacity(stats.len());
    let mut avg_duration = Vec::with_capacity(stats.len());

    for aggregate in stats {
        driver_ids.push(aggregate.driver.0);
        names.push(aggregate.name.clone());
        completed.push(aggregate.completed_rides as u64);
        cancelled.push(aggregate.cancelled_rides as u64);
        total_fare.push(aggregate.total_fare);
        avg_fare.push(aggregate.avg_fare);
        avg_wait.push(aggregate.avg_wait_minutes);
        avg_duration.push(aggregate.avg_duration_minutes);
    }

    let schema = Schema::new(vec![
        u64_field("driver_id"),
        utf8_field("name"),
        u64_field("completed_rides"),
        u64_field("cancelled_rides"),
        f64_field("total_fare"),
        f64_field("avg_fare"),
        f64_field("avg_wait_minutes"),
        f64_field("avg_duration_minutes"),
    ]);

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(UInt64Array::from(driver_ids)),
        Arc::new(StringArray::from(names)),
        Arc::new(UInt64Array::from(completed)),
        Arc::new(UInt64Array::from(cancelled)),
        Arc::new(Float64Array::from(total_fare)),
        Arc::new(Float64Array::from(avg_fare)),
        Arc::new(Float64Array::from(avg_wait)),
        Arc::new(Float64Array::from(avg_duration)),
    ];

    write_record_batch(path, schema, arrays)
}
