use std::cmp::Ordering;

use serde::Serialize;

use crate::error::Result;
use crate::records::SystemRecord;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        distance(self, other)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborEntry {
    pub name: String,
    pub distance: f64,
    pub remote_id: Option<String>,
}

pub fn distance(a: Point, b: Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// Every other system ranked by distance from `target`. NaN distances sort last;
/// equal distances keep input order.
pub fn nearest(target: &SystemRecord, all: &[SystemRecord]) -> Vec<NeighborEntry> {
    let origin = target.point();
    let mut neighbors = all
        .iter()
        .filter(|record| record.name != target.name)
        .map(|record| NeighborEntry {
            name: record.name.clone(),
            distance: distance(origin, record.point()),
            remote_id: record.sarna_id.clone(),
        })
        .collect::<Vec<_>>();
    neighbors.sort_by(|left, right| compare_distance(left.distance, right.distance));
    neighbors
}

pub fn nearest_within(
    target: &SystemRecord,
    all: &[SystemRecord],
    max_distance: f64,
) -> Vec<NeighborEntry> {
    nearest(target, all)
        .into_iter()
        .filter(|entry| entry.distance <= max_distance)
        .collect()
}

/// `nearest_within` for a target whose own coordinates must be readable.
pub fn neighbors_within(
    target: &SystemRecord,
    all: &[SystemRecord],
    max_distance: f64,
) -> Result<Vec<NeighborEntry>> {
    target.coordinates()?;
    Ok(nearest_within(target, all, max_distance))
}

fn compare_distance(left: f64, right: f64) -> Ordering {
    match (left.is_nan(), right.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => left.total_cmp(&right),
    }
}
