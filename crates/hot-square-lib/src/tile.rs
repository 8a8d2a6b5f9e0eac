//! TileIndex - Coarse grid used as the ground-truth nearest-segment search
//!
//! Every segment is registered in the tiles of its two endpoints. Each tile then caches the
//! union of its own segments and those of its 8 neighbors, so a query only ever looks at one
//! tile's candidate list. Empty placeholder tiles are created around every populated tile so
//! that points just outside a segment's tiles still find it.

use crate::{
    CellId, DataError, IndexConfig, Result, Segment, SegmentId, SegmentStore, TileId, utils,
};

use geo::Point;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Candidates within this many m² of the minimum distance are considered equally close
const TIE_EPSILON_SQ_METERS: f64 = 1.0;

/// Geographic extent of one or more tiles, in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl TileBounds {
    fn union(self, other: TileBounds) -> TileBounds {
        TileBounds {
            north: self.north.max(other.north),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            west: self.west.min(other.west),
        }
    }
}

/// A cell of the tile grid
#[derive(Debug, Clone)]
pub struct Tile {
    id: TileId,
    /// Positions of the segments with an endpoint in this tile, sorted and unique
    own: Vec<usize>,
    /// Own segments plus all neighbors' segments, sorted and unique
    candidates: Vec<usize>,
}

impl Tile {
    fn empty(id: TileId) -> Self {
        Self {
            id,
            own: Vec::new(),
            candidates: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> TileId {
        self.id
    }

    /// Store positions of segments with an endpoint in this tile
    #[inline]
    pub fn own_segments(&self) -> &[usize] {
        &self.own
    }

    /// Store positions of segments considered by queries falling in this tile
    #[inline]
    pub fn candidates(&self) -> &[usize] {
        &self.candidates
    }

    /// Whether this tile only exists as a neighbor of a populated tile
    #[inline]
    pub fn is_placeholder(&self) -> bool {
        self.own.is_empty()
    }
}

/// Fixed-zoom tile grid over a segment store
#[derive(Debug, Clone)]
pub struct TileIndex {
    store: Arc<SegmentStore>,
    tiles: HashMap<TileId, Tile>,
    zoom: u32,
    /// Tiles per axis (2^zoom)
    total: f64,
    heading_tolerance: i32,
    distance_max_sq: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TileIndex {
    /// Build the tile grid for every segment of the store
    pub fn generate(store: Arc<SegmentStore>, config: &IndexConfig) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("tile::generate");

        config.validate()?;
        if store.is_empty() {
            return Err(DataError::EmptyIndex("segment store has no segments"));
        }

        let total = utils::cells_per_axis(config.tile_zoom_level as f64);
        let mut tiles: HashMap<TileId, Tile> = HashMap::new();

        // Register each segment in the tiles of its endpoints
        for (position, segment) in store.segments().iter().enumerate() {
            let from_tile = CellId::from_point(segment.from, total);
            let to_tile = CellId::from_point(segment.to, total);
            tiles
                .entry(from_tile)
                .or_insert_with(|| Tile::empty(from_tile))
                .own
                .push(position);
            if to_tile != from_tile {
                tiles
                    .entry(to_tile)
                    .or_insert_with(|| Tile::empty(to_tile))
                    .own
                    .push(position);
            }
        }
        let populated = tiles.len();

        // Placeholders around every populated tile
        let populated_ids: Vec<TileId> = tiles.keys().copied().collect();
        for id in populated_ids {
            for neighbor in id.neighbors(total) {
                tiles.entry(neighbor).or_insert_with(|| Tile::empty(neighbor));
            }
        }

        // Candidate lists: own segments plus the neighbors' own segments
        let candidates: Vec<(TileId, Vec<usize>)> = tiles
            .keys()
            .map(|&id| {
                let mut list: Vec<usize> = tiles[&id].own.clone();
                for neighbor in id.neighbors(total) {
                    if let Some(tile) = tiles.get(&neighbor) {
                        list.extend_from_slice(&tile.own);
                    }
                }
                list.sort_unstable();
                list.dedup();
                (id, list)
            })
            .collect();
        for (id, list) in candidates {
            if let Some(tile) = tiles.get_mut(&id) {
                tile.candidates = list;
            }
        }

        tracing::info!(
            "Generated {} tiles at zoom {} ({} populated) for {} segments",
            tiles.len(),
            config.tile_zoom_level,
            populated,
            store.len()
        );

        Ok(Self {
            store,
            tiles,
            zoom: config.tile_zoom_level,
            total,
            heading_tolerance: config.heading_tolerance,
            distance_max_sq: config.seg_assign_distance_max * config.seg_assign_distance_max,
        })
    }

    /// Assign a fix to the nearest segment travelling in a compatible direction
    ///
    /// Returns `None` if the fix falls outside the tiled area, if no candidate has a compatible
    /// heading, or if the nearest compatible candidate is farther than the configured maximum
    /// distance. Among candidates within 1 m² of the minimum squared distance, the one whose
    /// heading is closest to the fix's heading wins; earlier store positions win exact ties.
    pub fn assign_segment(&self, coord: Point<f64>, heading: i32) -> Option<SegmentId> {
        let tile = self.tiles.get(&self.tile_id(coord))?;
        let segments = self.store.segments();

        let mut compatible: SmallVec<[(&Segment, f64); 64]> = SmallVec::new();
        let mut distance_min = f64::MAX;
        for &position in &tile.candidates {
            let segment = &segments[position];
            if !utils::is_same_direction(segment.heading, heading, self.heading_tolerance) {
                continue;
            }
            let distance = segment.distance_squared_meters(coord);
            distance_min = distance_min.min(distance);
            compatible.push((segment, distance));
        }

        if compatible.is_empty() || distance_min > self.distance_max_sq {
            return None;
        }

        let mut best: Option<&Segment> = None;
        let mut angle_min = i32::MAX;
        for (segment, distance) in compatible {
            if (distance - distance_min).abs() >= TIE_EPSILON_SQ_METERS {
                continue;
            }
            let angle = utils::heading_difference(segment.heading, heading);
            if angle < angle_min {
                angle_min = angle;
                best = Some(segment);
            }
        }
        best.map(|segment| segment.id)
    }

    /// Id of the tile containing a point
    #[inline]
    pub fn tile_id(&self, coord: Point<f64>) -> TileId {
        CellId::from_point(coord, self.total)
    }

    #[inline]
    pub fn get_tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(&id)
    }

    /// Tile containing a point, if the point is inside the tiled area
    #[inline]
    pub fn tile_by_coord(&self, coord: Point<f64>) -> Option<&Tile> {
        self.tiles.get(&self.tile_id(coord))
    }

    /// Geographic center of a tile
    #[inline]
    pub fn tile_center(&self, id: TileId) -> Point<f64> {
        id.center(self.total)
    }

    /// Edges of a tile
    pub fn tile_bounds(&self, id: TileId) -> TileBounds {
        let (north, south, west, east) = id.edges(self.total);
        TileBounds {
            north,
            south,
            east,
            west,
        }
    }

    /// Extent of all tiles, placeholders included
    pub fn bounding_box(&self) -> Option<TileBounds> {
        self.tiles
            .keys()
            .map(|&id| self.tile_bounds(id))
            .reduce(TileBounds::union)
    }

    #[inline]
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Tiles in unspecified order
    #[inline]
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    #[inline]
    pub fn zoom_level(&self) -> u32 {
        self.zoom
    }

    #[inline]
    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    /// Write one row per tile, ordered by id: `0x<packed id>,<north>,<west>,<south>,<east>`
    pub fn save_to_csv_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut ids: Vec<TileId> = self.tiles.keys().copied().collect();
        ids.sort_unstable();

        let mut out = BufWriter::new(File::create(path.as_ref())?);
        for id in ids {
            let bounds = self.tile_bounds(id);
            writeln!(
                out,
                "{},{:.6},{:.6},{:.6},{:.6}",
                id, bounds.north, bounds.west, bounds.south, bounds.east
            )?;
        }
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::point;

    fn segment(id: SegmentId, from: (f64, f64), to: (f64, f64)) -> Segment {
        Segment::new(
            id,
            point(from.0, from.1),
            point(to.0, to.1),
            id * 10,
            false,
            0.0,
            1.0,
        )
    }

    /// Short segment around the center of a tile, so both endpoints share the tile
    fn tile_local_segment(id: SegmentId, near: (f64, f64)) -> Segment {
        let total = utils::cells_per_axis(17.0);
        let center = CellId::from_point(point(near.0, near.1), total).center(total);
        segment(
            id,
            (center.y(), center.x()),
            (center.y() + 1e-5, center.x() + 1e-5),
        )
    }

    fn index_for(segments: Vec<Segment>, config: &IndexConfig) -> TileIndex {
        let store = Arc::new(SegmentStore::from_segments(segments).unwrap());
        TileIndex::generate(store, config).unwrap()
    }

    #[test]
    fn test_single_segment_heading_filter() {
        let index = index_for(
            vec![segment(1, (45.70, 126.60), (45.71, 126.61))],
            &IndexConfig::default(),
        );
        let near_start = point(45.7005, 126.6005);

        assert_eq!(index.assign_segment(near_start, 30), Some(1));
        // Opposite direction is not resolved automatically
        assert_eq!(index.assign_segment(near_start, 200), None);
        // Caller-level retry with the reversed heading
        assert_eq!(index.assign_segment(near_start, (200 + 180) % 360), Some(1));
    }

    #[test]
    fn test_outside_tiled_area() {
        let index = index_for(
            vec![segment(1, (45.70, 126.60), (45.701, 126.601))],
            &IndexConfig::default(),
        );
        assert!(index.tile_by_coord(point(40.0, 120.0)).is_none());
        assert_eq!(index.assign_segment(point(40.0, 120.0), 45), None);
    }

    #[test]
    fn test_distance_cutoff() {
        let config = IndexConfig {
            seg_assign_distance_max: 50.0,
            ..Default::default()
        };
        // East-west segment, heading 90
        let index = index_for(vec![segment(1, (45.70, 126.60), (45.70, 126.601))], &config);

        // About 33 m north of the segment
        assert_eq!(index.assign_segment(point(45.7003, 126.6005), 90), Some(1));
        // About 89 m north of the segment
        assert_eq!(index.assign_segment(point(45.7008, 126.6005), 90), None);
    }

    #[test]
    fn test_tie_broken_by_heading() {
        // Two segments leaving the same point: one north, one north-east
        let index = index_for(
            vec![
                segment(1, (45.70, 126.60), (45.701, 126.60)),
                segment(2, (45.70, 126.60), (45.701, 126.601)),
            ],
            &IndexConfig::default(),
        );
        let start = point(45.70, 126.60);
        assert_eq!(index.assign_segment(start, 10), Some(1));
        assert_eq!(index.assign_segment(start, 50), Some(2));
    }

    #[test]
    fn test_nearest_wins_over_heading() {
        // Parallel east-west segments about 22 m and 55 m south of the query
        let index = index_for(
            vec![
                segment(1, (45.7000, 126.6000), (45.7000, 126.6010)),
                segment(2, (45.7003, 126.6000), (45.7003, 126.6010)),
            ],
            &IndexConfig::default(),
        );
        assert_eq!(index.assign_segment(point(45.7005, 126.6005), 80), Some(2));
    }

    #[test]
    fn test_custom_heading_tolerance() {
        let config = IndexConfig {
            heading_tolerance: 30,
            ..Default::default()
        };
        let index = index_for(vec![segment(1, (45.70, 126.60), (45.71, 126.61))], &config);
        let near_start = point(45.7005, 126.6005);
        assert_eq!(index.assign_segment(near_start, 30), Some(1));
        assert_eq!(index.assign_segment(near_start, 100), None);
    }

    #[test]
    fn test_placeholders_and_candidates() {
        let index = index_for(
            vec![tile_local_segment(1, (45.70, 126.60))],
            &IndexConfig::default(),
        );
        // One populated tile and its 8 placeholder neighbors
        assert_eq!(index.tile_count(), 9);
        let home = index.tile_by_coord(point(45.70, 126.60)).unwrap();
        assert!(!home.is_placeholder());
        assert_eq!(home.own_segments(), &[0]);

        for neighbor in home.id().neighbors(utils::cells_per_axis(17.0)) {
            let tile = index.get_tile(neighbor).unwrap();
            assert!(tile.is_placeholder());
            assert_eq!(tile.candidates(), &[0]);
        }
    }

    #[test]
    fn test_boundary_jitter_is_stable() {
        // Spans more than two tile widths, so it covers both edges of the middle tile
        let index = index_for(
            vec![segment(1, (45.70, 126.598), (45.70, 126.604))],
            &IndexConfig::default(),
        );
        let home = index.tile_id(point(45.70, 126.60));
        let bounds = index.tile_bounds(home);

        for offset in [-1e-9, 0.0, 1e-9] {
            let on_east_edge = point(45.70, bounds.east + offset);
            assert_eq!(index.assign_segment(on_east_edge, 90), Some(1));
            let on_west_edge = point(45.70, bounds.west + offset);
            assert_eq!(index.assign_segment(on_west_edge, 90), Some(1));
        }
    }

    #[test]
    fn test_bounding_box_and_center() {
        let index = index_for(
            vec![tile_local_segment(1, (45.70, 126.60))],
            &IndexConfig::default(),
        );
        let bbox = index.bounding_box().unwrap();
        assert!(bbox.north > 45.70 && bbox.south < 45.70);
        assert!(bbox.west < 126.60 && bbox.east > 126.60);

        let home = index.tile_id(point(45.70, 126.60));
        assert_eq!(index.tile_id(index.tile_center(home)), home);
    }

    #[test]
    fn test_save_to_csv_file() {
        let index = index_for(
            vec![tile_local_segment(1, (45.70, 126.60))],
            &IndexConfig::default(),
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiles.csv");
        index.save_to_csv_file(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 9);
        for line in &lines {
            assert!(line.starts_with("0x"));
            assert_eq!(line.split(',').count(), 5);
        }

        let home = index.tile_id(point(45.70, 126.60));
        assert!(lines.iter().any(|l| l.starts_with(&format!("{home},"))));
    }

    #[test]
    fn test_many_candidates_spill() {
        // Thousands of parallel east-west segments stacked inside one tile
        let total = utils::cells_per_axis(17.0);
        let center = CellId::from_point(point(45.70, 126.60), total).center(total);
        let segments: Vec<Segment> = (0..3000)
            .map(|i| {
                let lat = center.y() + i as f64 * 1e-7;
                segment(i + 1, (lat, center.x()), (lat, center.x() + 1e-5))
            })
            .collect();
        let index = index_for(segments, &IndexConfig::default());

        let home = index.tile_by_coord(center).unwrap();
        assert_eq!(home.own_segments().len(), 3000);
        assert_eq!(home.candidates().len(), 3000);
        // Many segments tie within 1 m², the first in store order wins
        assert_eq!(index.assign_segment(center, 90), Some(1));
        // A fix above the stack lands on one of the topmost segments
        let above = point(center.y() + 3000.0 * 1e-7 + 5e-5, center.x() + 5e-6);
        let top = index.assign_segment(above, 90).unwrap();
        assert!((2980..=3000).contains(&top), "assigned {top}");
        assert_eq!(index.assign_segment(center, 270), None);
    }

    #[test]
    fn test_extreme_query_headings() {
        let index = index_for(
            vec![segment(1, (45.70, 126.60), (45.71, 126.61))],
            &IndexConfig::default(),
        );
        let near_start = point(45.7005, 126.6005);
        // i32::MIN is 232 modulo 360, too far from 45
        assert_eq!(index.assign_segment(near_start, i32::MIN), None);
        // 45 + 360 * 1000
        assert_eq!(index.assign_segment(near_start, 360_045), Some(1));
        assert_eq!(index.assign_segment(near_start, -315), Some(1));
    }

    #[test]
    fn test_generate_rejects_invalid_config() {
        let store = Arc::new(
            SegmentStore::from_segments(vec![segment(1, (45.70, 126.60), (45.71, 126.61))])
                .unwrap(),
        );
        let config = IndexConfig {
            heading_levels: 7,
            ..Default::default()
        };
        assert!(matches!(
            TileIndex::generate(store, &config),
            Err(DataError::InvalidConfig(_))
        ));
    }
}
