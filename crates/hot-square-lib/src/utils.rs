//! Utility functions for grid cell math, headings and short-range distances
//!
//! Coordinates are `geo::Point<f64>` with x = longitude and y = latitude, both in degrees.

use crate::{DataError, Result};

use geo::Point;
use std::f64::consts::PI;

/// Mean Earth radius in meters used by the grid span helpers
pub const EARTH_RADIUS_METERS: f64 = 6371004.0;

/// Meters per degree of latitude (EARTH_RADIUS_METERS * 2 * PI / 360)
pub const LAT_METERS_PER_DEGREE: f64 = 111194.99646;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Build a point from latitude and longitude in degrees
#[inline(always)]
pub fn point(lat: f64, lng: f64) -> Point<f64> {
    Point::new(lng, lat)
}

/// Number of cells along one axis at the given (possibly fractional) zoom
#[inline(always)]
pub fn cells_per_axis(zoom: f64) -> f64 {
    2f64.powf(zoom)
}

/// Slippy-map row of a latitude, clamped to the grid
#[inline]
pub fn lat_to_cell(lat: f64, total: f64) -> u32 {
    let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * total;
    clamp_cell(y, total)
}

/// Slippy-map column of a longitude, clamped to the grid
#[inline]
pub fn lng_to_cell(lng: f64, total: f64) -> u32 {
    let x = (lng + 180.0) / 360.0 * total;
    clamp_cell(x, total)
}

#[inline(always)]
fn clamp_cell(value: f64, total: f64) -> u32 {
    let max = (total.ceil() - 1.0).max(0.0);
    value.floor().clamp(0.0, max) as u32
}

/// Latitude of a (possibly fractional) row edge
///
/// `row = 0.0` is the northern grid edge; use `row + 0.5` for the row center.
#[inline]
pub fn cell_to_lat(row: f64, total: f64) -> f64 {
    let n = PI - 2.0 * PI * row / total;
    n.sinh().atan().to_degrees()
}

/// Longitude of a (possibly fractional) column edge
#[inline]
pub fn cell_to_lng(col: f64, total: f64) -> f64 {
    col / total * 360.0 - 180.0
}

/// Bearing in degrees from `from` to `to`, in [0, 360), clockwise from north
///
/// Computed on raw degree deltas: the angle to north comes from the normalized dot product and
/// the half (east or west) from the sign of the longitude delta. A zero-length vector has
/// heading 0.
pub fn heading(from: Point<f64>, to: Point<f64>) -> f64 {
    let dx = to.x() - from.x();
    let dy = to.y() - from.y();
    let len = (dx * dx + dy * dy).sqrt();
    if len == 0.0 {
        return 0.0;
    }
    let angle = (dy / len).clamp(-1.0, 1.0).acos().to_degrees();
    let heading = if dx > 0.0 { angle } else { 360.0 - angle };
    heading.rem_euclid(360.0)
}

/// Heading rounded to whole degrees in 0..360
#[inline]
pub fn heading_degrees(from: Point<f64>, to: Point<f64>) -> i32 {
    ((heading(from, to) + 0.5) as i32).rem_euclid(360)
}

/// Heading bucket of a heading in degrees, rounding to the nearest bucket
///
/// With 8 levels, level 0 covers [-22.5, 22.5), level 1 covers [22.5, 67.5) and so on.
/// `levels` must divide 360.
#[inline]
pub fn heading_to_level(heading: f64, levels: usize) -> usize {
    let step = 360.0 / levels as f64;
    let h = heading.rem_euclid(360.0);
    ((h / step + 0.5) as usize) % levels
}

/// Representative heading of a bucket
#[inline]
pub fn level_to_heading(level: usize, levels: usize) -> i32 {
    (level * (360 / levels)) as i32
}

/// Absolute difference between two headings, in 0..=180
#[inline]
pub fn heading_difference(h1: i32, h2: i32) -> i32 {
    let diff = (h2.rem_euclid(360) - h1.rem_euclid(360)).rem_euclid(360);
    if diff <= 180 { diff } else { 360 - diff }
}

/// Whether two headings point the same way within `tolerance` degrees
#[inline]
pub fn is_same_direction(h1: i32, h2: i32, tolerance: i32) -> bool {
    heading_difference(h1, h2) <= tolerance
}

/// Offset in degrees from the closest point of the segment to `coord`
///
/// The projection parameter is clamped to [0, 1] so the closest point never leaves the segment.
#[inline(always)]
fn offset_to_segment(coord: Point<f64>, from: Point<f64>, to: Point<f64>) -> (f64, f64) {
    let apx = coord.x() - from.x();
    let apy = coord.y() - from.y();
    let abx = to.x() - from.x();
    let aby = to.y() - from.y();
    let ab2 = abx * abx + aby * aby;
    let t = if ab2 == 0.0 {
        0.0
    } else {
        ((apx * abx + apy * aby) / ab2).clamp(0.0, 1.0)
    };
    (
        coord.x() - (from.x() + abx * t),
        coord.y() - (from.y() + aby * t),
    )
}

/// Squared distance in degrees² from a point to a segment
#[inline]
pub fn distance_squared_degrees(coord: Point<f64>, from: Point<f64>, to: Point<f64>) -> f64 {
    let (dx, dy) = offset_to_segment(coord, from, to);
    dx * dx + dy * dy
}

/// Squared distance in m² from a point to a segment
///
/// Equirectangular approximation scaled at the query latitude. Only meaningful over short
/// distances (a few hundred meters).
#[inline]
pub fn distance_squared_meters(coord: Point<f64>, from: Point<f64>, to: Point<f64>) -> f64 {
    let (dx, dy) = offset_to_segment(coord, from, to);
    let r1 = dx * LAT_METERS_PER_DEGREE * coord.y().to_radians().cos();
    let r2 = dy * LAT_METERS_PER_DEGREE;
    r1 * r1 + r2 * r2
}

/// Convert a north-south distance in meters to degrees of latitude
#[inline(always)]
pub fn meters_to_degrees(meters: f64) -> f64 {
    meters / LAT_METERS_PER_DEGREE
}

/// Convert degrees of latitude to meters
#[inline(always)]
pub fn degrees_to_meters(degrees: f64) -> f64 {
    degrees * LAT_METERS_PER_DEGREE
}

/// Convert an east-west distance in meters to degrees of longitude at `lat`
///
/// The latitude is clamped to the Web Mercator range so the result stays finite.
#[inline]
pub fn meters_to_lng_degrees(meters: f64, lat: f64) -> f64 {
    meters_to_degrees(meters) / lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians().cos()
}

/// East-west distance in meters between two longitudes at a latitude
#[inline]
pub fn same_lat_distance_meters(lat: f64, lng1: f64, lng2: f64) -> f64 {
    ((EARTH_RADIUS_METERS * PI / 180.0) * lat.to_radians().cos() * (lng2 - lng1)).abs()
}

/// North-south distance in meters between two latitudes
#[inline]
pub fn same_lng_distance_meters(lat1: f64, lat2: f64) -> f64 {
    ((EARTH_RADIUS_METERS * PI / 180.0) * (lat2 - lat1)).abs()
}

/// Decode one raw input row, trimming whitespace and a trailing carriage return
///
/// Rows that are not valid UTF-8 become [`DataError::MalformedRow`] so readers can skip them
/// like any other bad row.
pub(crate) fn decode_row(bytes: &[u8], line_number: usize) -> Result<&str> {
    std::str::from_utf8(bytes)
        .map(str::trim)
        .map_err(|err| DataError::MalformedRow {
            line: line_number,
            reason: format!("invalid UTF-8: {err}"),
        })
}

/// Fractional zoom at which a grid cell is `meters` wide (east-west) at `lat`
///
/// `zoom_for_square_span(10.0, 45.720608)` is about 21.414, the default square zoom.
pub fn zoom_for_square_span(meters: f64, lat: f64) -> f64 {
    let circumference = 360.0 * LAT_METERS_PER_DEGREE * lat.to_radians().cos();
    (circumference / meters).log2()
}
