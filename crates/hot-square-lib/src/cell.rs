//! Grid cell identifiers shared by the tile and square indexes

use crate::utils;
use geo::Point;
use smallvec::SmallVec;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A cell of a slippy-map grid at some zoom level
///
/// Ordering is row-major (`lat` first), which is also the order of the packed 64-bit form
/// `(lat << 32) | lng`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellId {
    /// Row, counted from the northern edge of the grid
    pub lat: u32,
    /// Column, counted eastwards from the antimeridian
    pub lng: u32,
}

/// Cell of the tile grid
pub type TileId = CellId;

/// Cell of the square grid
pub type SquareId = CellId;

impl CellId {
    #[inline]
    pub const fn new(lat: u32, lng: u32) -> Self {
        Self { lat, lng }
    }

    /// Cell containing a point, for a grid with `total` cells per axis
    #[inline]
    pub fn from_point(point: Point<f64>, total: f64) -> Self {
        Self {
            lat: utils::lat_to_cell(point.y(), total),
            lng: utils::lng_to_cell(point.x(), total),
        }
    }

    /// Packed form `(lat << 32) | lng`
    #[inline]
    pub fn to_bits(self) -> u64 {
        ((self.lat as u64) << 32) | self.lng as u64
    }

    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self {
            lat: (bits >> 32) as u32,
            lng: bits as u32,
        }
    }

    /// Geographic center of the cell
    #[inline]
    pub fn center(self, total: f64) -> Point<f64> {
        utils::point(
            utils::cell_to_lat(self.lat as f64 + 0.5, total),
            utils::cell_to_lng(self.lng as f64 + 0.5, total),
        )
    }

    /// Edges of the cell as (north, south, west, east) in degrees
    pub fn edges(self, total: f64) -> (f64, f64, f64, f64) {
        (
            utils::cell_to_lat(self.lat as f64, total),
            utils::cell_to_lat(self.lat as f64 + 1.0, total),
            utils::cell_to_lng(self.lng as f64, total),
            utils::cell_to_lng(self.lng as f64 + 1.0, total),
        )
    }

    /// The up to 8 cells surrounding this one
    ///
    /// Columns wrap around the antimeridian; rows beyond the poles are skipped.
    pub fn neighbors(self, total: f64) -> SmallVec<[CellId; 8]> {
        let cells = total.ceil() as i64;
        let mut out = SmallVec::new();
        for dlat in -1i64..=1 {
            let lat = self.lat as i64 + dlat;
            if lat < 0 || lat >= cells {
                continue;
            }
            for dlng in -1i64..=1 {
                if dlat == 0 && dlng == 0 {
                    continue;
                }
                let lng = (self.lng as i64 + dlng).rem_euclid(cells);
                let neighbor = CellId::new(lat as u32, lng as u32);
                // A one-column grid wraps onto itself
                if neighbor != self && !out.contains(&neighbor) {
                    out.push(neighbor);
                }
            }
        }
        out
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.to_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_layout() {
        let id = CellId::new(0x0001_2345, 0x0000_6789);
        assert_eq!(id.to_bits(), 0x0001_2345_0000_6789);
        assert_eq!(CellId::from_bits(id.to_bits()), id);
        assert_eq!(id.to_string(), "0x1234500006789");
    }

    #[test]
    fn test_ordering_matches_bits() {
        let a = CellId::new(1, 500);
        let b = CellId::new(2, 0);
        assert!(a < b);
        assert!(a.to_bits() < b.to_bits());
    }

    #[test]
    fn test_center_inside_cell() {
        let total = utils::cells_per_axis(17.0);
        let p = utils::point(45.7005, 126.6005);
        let id = CellId::from_point(p, total);
        let center = id.center(total);
        assert_eq!(CellId::from_point(center, total), id);

        let (north, south, west, east) = id.edges(total);
        assert!(north > p.y() && p.y() >= south);
        assert!(west <= p.x() && p.x() < east);
    }

    #[test]
    fn test_neighbors_interior() {
        let total = utils::cells_per_axis(17.0);
        let id = CellId::new(1000, 1000);
        let neighbors = id.neighbors(total);
        assert_eq!(neighbors.len(), 8);
        assert!(neighbors.contains(&CellId::new(999, 999)));
        assert!(neighbors.contains(&CellId::new(1001, 1001)));
        assert!(!neighbors.contains(&id));
    }

    #[test]
    fn test_neighbors_wrap_and_poles() {
        let total = utils::cells_per_axis(17.0);
        let last = total as u32 - 1;

        // Antimeridian: column 0 neighbors the last column
        let west_edge = CellId::new(1000, 0);
        assert!(west_edge.neighbors(total).contains(&CellId::new(1000, last)));

        // Northern edge: no row above
        let north_edge = CellId::new(0, 1000);
        let neighbors = north_edge.neighbors(total);
        assert_eq!(neighbors.len(), 5);
        assert!(neighbors.iter().all(|n| n.lat <= 1));
    }
}
