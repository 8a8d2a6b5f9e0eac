//! MatchingContext - Top-level owner of the configuration and indexes
//!
//! This module provides the high-level API: load a road network, build or restore the square
//! index, and assign GPS fixes.

use crate::{
    BuildOptions, IndexConfig, LoadStats, Result, SegmentId, SegmentStore, SquareIndex, TileIndex,
};

use geo::Point;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Result of an assignment that may have retried with the opposite heading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Assignment {
    pub segment_id: SegmentId,
    /// Whether the match was found travelling against the fix's heading
    pub reversed: bool,
}

impl Assignment {
    /// Try `assign` at `heading`, then at `heading + 180`
    ///
    /// Matching the reversed heading is how fixes on a segment digitized against the direction
    /// of travel get resolved; the indexes never do it on their own.
    pub fn resolve<F>(heading: i32, assign: F) -> Option<Assignment>
    where
        F: Fn(i32) -> Option<SegmentId>,
    {
        if let Some(segment_id) = assign(heading) {
            return Some(Assignment {
                segment_id,
                reversed: false,
            });
        }
        assign((heading.rem_euclid(360) + 180) % 360).map(|segment_id| Assignment {
            segment_id,
            reversed: true,
        })
    }
}

/// Summary of a matching context
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContextInfo {
    pub segment_count: usize,
    pub tile_count: usize,
    pub square_count: usize,
    /// Rows of the square CSV
    pub heading_range_count: usize,
    pub square_zoom_level: f64,
    pub load_stats: LoadStats,
}

/// Segment store, tile index and square index sharing one configuration
#[derive(Debug, Clone)]
pub struct MatchingContext {
    config: IndexConfig,
    store: Arc<SegmentStore>,
    tiles: TileIndex,
    squares: SquareIndex,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl MatchingContext {
    /// Create a context over an already loaded store; the square index starts empty
    pub fn new(store: SegmentStore, config: IndexConfig) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("context::new");

        config.validate()?;
        let store = Arc::new(store);
        let tiles = TileIndex::generate(Arc::clone(&store), &config)?;
        let squares = SquareIndex::new(config.clone());
        Ok(Self {
            config,
            store,
            tiles,
            squares,
        })
    }

    /// Load segments from CSV and generate the tile index
    pub fn load_segments<P: AsRef<Path>>(path: P, config: IndexConfig) -> Result<Self> {
        let store = SegmentStore::load_from_csv_file(path)?;
        Self::new(store, config)
    }

    /// Build the square index from the tile index
    pub fn build_squares(&mut self, options: &BuildOptions) -> Result<()> {
        self.squares.build_parallel(&self.tiles, options)
    }

    /// Restore the square index from a CSV snapshot
    pub fn load_squares<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.squares.load_from_csv_file(path)
    }

    pub fn save_squares<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.squares.save_to_csv_file(path)
    }

    pub fn save_tiles<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.tiles.save_to_csv_file(path)
    }

    /// Assign a fix with the square index when built, otherwise with the tile index
    #[inline]
    pub fn assign(&self, coord: Point<f64>, heading: i32) -> Option<SegmentId> {
        if self.squares.is_built() {
            self.squares.assign_segment(coord, heading)
        } else {
            self.tiles.assign_segment(coord, heading)
        }
    }

    /// Like [`MatchingContext::assign`], retrying with the opposite heading on a miss
    #[inline]
    pub fn assign_with_reverse(&self, coord: Point<f64>, heading: i32) -> Option<Assignment> {
        Assignment::resolve(heading, |h| self.assign(coord, h))
    }

    pub fn info(&self) -> ContextInfo {
        ContextInfo {
            segment_count: self.store.len(),
            tile_count: self.tiles.tile_count(),
            square_count: self.squares.square_count(),
            heading_range_count: self.squares.csv_line_count(),
            square_zoom_level: self.squares.zoom_level(),
            load_stats: self.store.stats(),
        }
    }

    #[inline]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    #[inline]
    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    #[inline]
    pub fn tiles(&self) -> &TileIndex {
        &self.tiles
    }

    #[inline]
    pub fn squares(&self) -> &SquareIndex {
        &self.squares
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Segment;
    use crate::utils::point;

    fn single_segment_context(config: IndexConfig) -> MatchingContext {
        let segment = Segment::new(
            1,
            point(45.70, 126.60),
            point(45.71, 126.61),
            100,
            false,
            1375.0,
            1.0,
        );
        MatchingContext::new(SegmentStore::from_segments([segment]).unwrap(), config).unwrap()
    }

    #[test]
    fn test_single_segment_scenario() {
        let mut context = single_segment_context(IndexConfig::default());
        context
            .build_squares(&BuildOptions::with_threads(4))
            .unwrap();
        let near_start = point(45.7005, 126.6005);

        for index_assign in [
            context.tiles().assign_segment(near_start, 30),
            context.squares().assign_segment(near_start, 30),
        ] {
            assert_eq!(index_assign, Some(1));
        }
        assert_eq!(context.tiles().assign_segment(near_start, 200), None);
        assert_eq!(context.squares().assign_segment(near_start, 200), None);
        assert_eq!(context.squares().assign_segment(near_start, 20), Some(1));

        assert_eq!(
            context.assign_with_reverse(near_start, 200),
            Some(Assignment {
                segment_id: 1,
                reversed: true
            })
        );
        assert_eq!(
            context.assign_with_reverse(near_start, 30),
            Some(Assignment {
                segment_id: 1,
                reversed: false
            })
        );
    }

    #[test]
    fn test_assign_falls_back_to_tiles() {
        let context = single_segment_context(IndexConfig::default());
        assert!(!context.squares().is_built());
        assert_eq!(context.assign(point(45.7005, 126.6005), 45), Some(1));
    }

    #[test]
    fn test_resolve_without_match() {
        assert_eq!(Assignment::resolve(90, |_| None), None);
        // Only the reversed heading matches
        let found = Assignment::resolve(350, |h| (h == 170).then_some(7));
        assert_eq!(
            found,
            Some(Assignment {
                segment_id: 7,
                reversed: true
            })
        );
    }

    #[test]
    fn test_resolve_extreme_heading() {
        // i32::MAX is 127 modulo 360, reversed 307
        let found = Assignment::resolve(i32::MAX, |h| (h == 307).then_some(3));
        assert_eq!(
            found,
            Some(Assignment {
                segment_id: 3,
                reversed: true
            })
        );
        let context = single_segment_context(IndexConfig::default());
        assert_eq!(
            context.assign_with_reverse(point(45.7005, 126.6005), i32::MIN),
            Some(Assignment {
                segment_id: 1,
                reversed: true
            })
        );
    }

    #[test]
    fn test_info_and_persistence() {
        let config = IndexConfig {
            seg_assign_distance_max: 30.0,
            ..Default::default()
        };
        let mut context = single_segment_context(config.clone());
        context
            .build_squares(&BuildOptions::with_threads(2))
            .unwrap();

        let info = context.info();
        assert_eq!(info.segment_count, 1);
        assert_eq!(info.tile_count, context.tiles().tile_count());
        assert!(info.square_count > 0);
        assert!(info.heading_range_count >= info.square_count);
        assert_eq!(info.square_zoom_level, config.square_zoom_level);
        assert_eq!(info.load_stats.loaded, 1);

        let dir = tempfile::tempdir().unwrap();
        let squares_path = dir.path().join("squares.csv");
        let tiles_path = dir.path().join("tiles.csv");
        context.save_squares(&squares_path).unwrap();
        context.save_tiles(&tiles_path).unwrap();

        let mut restored = single_segment_context(config);
        restored.load_squares(&squares_path).unwrap();
        assert_eq!(restored.info(), info);
    }

    #[test]
    fn test_load_segments_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segments.csv");
        std::fs::write(
            &path,
            "\"1\",45.70,126.60,45.71,126.61,\"100\",0,1375,1\n",
        )
        .unwrap();

        let context = MatchingContext::load_segments(&path, IndexConfig::default()).unwrap();
        assert_eq!(context.store().len(), 1);
        assert_eq!(context.assign(point(45.7005, 126.6005), 30), Some(1));
    }
}
