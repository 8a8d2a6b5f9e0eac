//! Index configuration shared by the tile and square indexes

use crate::{DataError, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tunables for segment assignment and grid construction
///
/// A single value of this type is handed to every index at construction time; indexes never
/// read process-wide settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexConfig {
    /// Maximum distance in meters between a fix and its assigned segment.
    /// Default: 120
    pub seg_assign_distance_max: f64,
    /// Zoom level of the square grid. Fractional values are allowed.
    /// Default: 21.4142821 (squares of about 10 m at 45.72°N)
    pub square_zoom_level: f64,
    /// Number of heading buckets per square. Must divide 360.
    /// Default: 72 (5° per bucket)
    pub heading_levels: usize,
    /// Zoom level of the tile grid.
    /// Default: 17
    pub tile_zoom_level: u32,
    /// Maximum heading difference in degrees for a segment to count as travelling the same
    /// direction as the fix.
    /// Default: 90
    pub heading_tolerance: i32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            seg_assign_distance_max: 120.0,
            square_zoom_level: 21.4142821,
            heading_levels: 72,
            tile_zoom_level: 17,
            heading_tolerance: 90,
        }
    }
}

impl IndexConfig {
    /// Check that the configuration describes a usable pair of grids
    pub fn validate(&self) -> Result<()> {
        if !(self.seg_assign_distance_max.is_finite() && self.seg_assign_distance_max > 0.0) {
            return Err(DataError::InvalidConfig(format!(
                "seg_assign_distance_max must be positive, got {}",
                self.seg_assign_distance_max
            )));
        }
        if self.heading_levels == 0 || 360 % self.heading_levels != 0 {
            return Err(DataError::InvalidConfig(format!(
                "heading_levels must divide 360, got {}",
                self.heading_levels
            )));
        }
        if self.tile_zoom_level > 31 {
            return Err(DataError::InvalidConfig(format!(
                "tile_zoom_level must be at most 31, got {}",
                self.tile_zoom_level
            )));
        }
        // Cell ids are u32 per axis.
        if !(self.square_zoom_level.is_finite()
            && self.square_zoom_level >= 0.0
            && self.square_zoom_level < 32.0)
        {
            return Err(DataError::InvalidConfig(format!(
                "square_zoom_level must be in [0, 32), got {}",
                self.square_zoom_level
            )));
        }
        if !(0..=180).contains(&self.heading_tolerance) {
            return Err(DataError::InvalidConfig(format!(
                "heading_tolerance must be in 0..=180, got {}",
                self.heading_tolerance
            )));
        }
        Ok(())
    }

    /// Width of a heading bucket in whole degrees
    #[inline]
    pub fn heading_step(&self) -> usize {
        360 / self.heading_levels.max(1)
    }
}
