//! SquareIndex - Fine grid of precomputed answers per heading bucket
//!
//! Each square stores, for every heading bucket, the segment the tile index assigns to the
//! square's center. Consecutive buckets with the same answer are stored as one
//! [`HeadingRange`], and buckets with no answer are omitted, so a query is a map lookup followed
//! by a short scan.
//!
//! The index is built in two parallel phases (see [`SquareIndex::build_parallel`]) or restored
//! from the CSV written by [`SquareIndex::save_to_csv_file`].

use crate::builder::{self, BuildOptions, BuildPhase};
use crate::{CellId, DataError, IndexConfig, Result, Segment, SegmentId, SquareId, TileIndex, utils};

use geo::Point;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Sampling step of the discovery walk, in meters
const DISCOVERY_STEP_METERS: f64 = 2.0;

/// Extra reach of the discovery walk beyond the assignment distance, in meters.
/// Covers the offset between a sample and the center of its square.
const DISCOVERY_SLACK_METERS: f64 = 7.0;

/// Margin added around each segment's bounding box, as a factor of the assignment distance
const DISCOVERY_MARGIN_FACTOR: f64 = 1.1;

/// Number of comma-separated fields in a square CSV row
const SQUARE_CSV_FIELDS: usize = 5;

/// Inclusive run of heading buckets that all map to the same segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeadingRange {
    pub from_level: u16,
    pub to_level: u16,
    pub segment_id: SegmentId,
}

impl HeadingRange {
    #[inline]
    pub fn contains(&self, level: usize) -> bool {
        (self.from_level as usize..=self.to_level as usize).contains(&level)
    }
}

/// A cell of the square grid with its heading ranges, sorted by `from_level`
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Square {
    id: SquareId,
    ranges: SmallVec<[HeadingRange; 4]>,
}

impl Square {
    #[inline]
    pub fn id(&self) -> SquareId {
        self.id
    }

    #[inline]
    pub fn ranges(&self) -> &[HeadingRange] {
        &self.ranges
    }

    /// Segment stored for a heading bucket
    #[inline]
    pub fn segment_for_level(&self, level: usize) -> Option<SegmentId> {
        self.ranges
            .iter()
            .find(|range| range.contains(level))
            .map(|range| range.segment_id)
    }
}

/// Compress per-bucket answers into runs, dropping runs without a segment
fn compress_levels(levels: &[Option<SegmentId>]) -> SmallVec<[HeadingRange; 4]> {
    let mut ranges = SmallVec::new();
    let mut start = 0;
    while start < levels.len() {
        let mut end = start;
        while end + 1 < levels.len() && levels[end + 1] == levels[start] {
            end += 1;
        }
        if let Some(segment_id) = levels[start] {
            ranges.push(HeadingRange {
                from_level: start as u16,
                to_level: end as u16,
                segment_id,
            });
        }
        start = end + 1;
    }
    ranges
}

/// Parse one row of the square CSV: `lng_cell,lat_cell,from_level,to_level,segment_id`
fn parse_csv_row(
    line: &str,
    line_number: usize,
    heading_levels: usize,
) -> Result<(SquareId, HeadingRange)> {
    let malformed = |reason: String| DataError::MalformedRow {
        line: line_number,
        reason,
    };

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != SQUARE_CSV_FIELDS {
        return Err(malformed(format!(
            "expected {SQUARE_CSV_FIELDS} fields, found {}",
            fields.len()
        )));
    }

    let cell = |index: usize, name: &str| -> Result<u32> {
        fields[index]
            .parse::<u32>()
            .map_err(|_| malformed(format!("invalid {name} '{}'", fields[index])))
    };
    let lng = cell(0, "longitude cell")?;
    let lat = cell(1, "latitude cell")?;
    let from_level = fields[2]
        .parse::<u16>()
        .map_err(|_| malformed(format!("invalid from level '{}'", fields[2])))?;
    let to_level = fields[3]
        .parse::<u16>()
        .map_err(|_| malformed(format!("invalid to level '{}'", fields[3])))?;
    let segment_id = fields[4]
        .parse::<SegmentId>()
        .map_err(|_| malformed(format!("invalid segment id '{}'", fields[4])))?;

    if from_level > to_level || to_level as usize >= heading_levels {
        return Err(malformed(format!(
            "heading range {from_level}..={to_level} outside 0..{heading_levels}"
        )));
    }

    Ok((
        CellId::new(lat, lng),
        HeadingRange {
            from_level,
            to_level,
            segment_id,
        },
    ))
}

/// Fine-grained grid answering assignments from precomputed heading ranges
#[derive(Debug, Clone)]
pub struct SquareIndex {
    config: IndexConfig,
    /// Squares per axis (2^zoom, fractional zoom allowed)
    total: f64,
    squares: BTreeMap<SquareId, Square>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SquareIndex {
    /// Create an empty index at the configured square zoom
    pub fn new(config: IndexConfig) -> Self {
        let total = utils::cells_per_axis(config.square_zoom_level);
        Self {
            config,
            total,
            squares: BTreeMap::new(),
        }
    }

    /// Change the grid zoom, returning the previous one
    ///
    /// Squares built at the old zoom no longer line up with the grid, so they are dropped.
    pub fn set_zoom_level(&mut self, zoom: f64) -> f64 {
        let old = self.config.square_zoom_level;
        if zoom != old {
            self.config.square_zoom_level = zoom;
            self.total = utils::cells_per_axis(zoom);
            self.squares.clear();
        }
        old
    }

    #[inline]
    pub fn zoom_level(&self) -> f64 {
        self.config.square_zoom_level
    }

    #[inline]
    pub fn heading_levels(&self) -> usize {
        self.config.heading_levels
    }

    #[inline]
    pub fn is_built(&self) -> bool {
        !self.squares.is_empty()
    }

    /// Build every square within reach of a segment of the tile index's store
    ///
    /// Phase 1 walks a grid of sample points around each segment and collects the squares of
    /// samples close enough to the segment. Phase 2 asks the tile index for the answer at each
    /// square's center for every heading bucket. Both phases split their input statically across
    /// `options.thread_count` workers; results are merged on the calling thread.
    ///
    /// On error the index is left empty.
    pub fn build_parallel(&mut self, tiles: &TileIndex, options: &BuildOptions) -> Result<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("square::build_parallel");

        self.squares.clear();
        self.config.validate()?;

        let ids = self.discover(tiles, options)?;
        if ids.is_empty() {
            return Err(DataError::EmptyIndex("no squares within reach of any segment"));
        }

        self.squares = self.materialize(tiles, &ids, options)?;
        if self.squares.is_empty() {
            return Err(DataError::EmptyIndex("no square has an assignable segment"));
        }

        tracing::info!(
            "Built {} squares ({} heading ranges) at zoom {} from {} candidates",
            self.squares.len(),
            self.csv_line_count(),
            self.config.square_zoom_level,
            ids.len()
        );
        Ok(())
    }

    /// Phase 1: sorted ids of all squares near some segment
    fn discover(&self, tiles: &TileIndex, options: &BuildOptions) -> Result<Vec<SquareId>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("square::discover");

        let total = self.total;
        let distance_max = self.config.seg_assign_distance_max;
        let partial_sets = builder::run_partitioned(
            tiles.store().segments(),
            BuildPhase::Discovery,
            options,
            |segments, ctx| {
                let mut found = HashSet::new();
                for segment in segments {
                    if ctx.is_cancelled() {
                        break;
                    }
                    discover_segment_squares(segment, total, distance_max, &mut found);
                    ctx.tick();
                }
                found
            },
        )?;

        let mut merged: HashSet<SquareId> = HashSet::new();
        for set in partial_sets {
            merged.extend(set);
        }
        let mut ids: Vec<SquareId> = merged.into_iter().collect();
        ids.sort_unstable();

        tracing::info!("Discovered {} candidate squares", ids.len());
        Ok(ids)
    }

    /// Phase 2: heading ranges for every candidate square
    fn materialize(
        &self,
        tiles: &TileIndex,
        ids: &[SquareId],
        options: &BuildOptions,
    ) -> Result<BTreeMap<SquareId, Square>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("square::materialize");

        let total = self.total;
        let heading_levels = self.config.heading_levels;
        let partial_squares = builder::run_partitioned(
            ids,
            BuildPhase::Materialization,
            options,
            |chunk, ctx| {
                let mut squares = Vec::with_capacity(chunk.len());
                let mut levels: Vec<Option<SegmentId>> = Vec::with_capacity(heading_levels);
                for &id in chunk {
                    if ctx.is_cancelled() {
                        break;
                    }
                    let center = id.center(total);
                    levels.clear();
                    levels.extend((0..heading_levels).map(|level| {
                        tiles.assign_segment(center, utils::level_to_heading(level, heading_levels))
                    }));
                    squares.push(Square {
                        id,
                        ranges: compress_levels(&levels),
                    });
                    ctx.tick();
                }
                squares
            },
        )?;

        let mut merged = BTreeMap::new();
        let mut empty = 0usize;
        for square in partial_squares.into_iter().flatten() {
            if square.ranges.is_empty() {
                empty += 1;
                continue;
            }
            merged.insert(square.id, square);
        }
        tracing::debug!("Dropped {empty} squares without any assignable heading");
        Ok(merged)
    }

    /// Assign a fix using the precomputed heading ranges
    pub fn assign_segment(&self, coord: Point<f64>, heading: i32) -> Option<SegmentId> {
        let square = self.squares.get(&self.square_id(coord))?;
        let level = utils::heading_to_level(heading as f64, self.config.heading_levels);
        square.segment_for_level(level)
    }

    /// Id of the square containing a point
    #[inline]
    pub fn square_id(&self, coord: Point<f64>) -> SquareId {
        CellId::from_point(coord, self.total)
    }

    /// Geographic center of a square
    #[inline]
    pub fn square_center(&self, id: SquareId) -> Point<f64> {
        id.center(self.total)
    }

    #[inline]
    pub fn get_square(&self, id: SquareId) -> Option<&Square> {
        self.squares.get(&id)
    }

    /// Squares in id order
    #[inline]
    pub fn squares(&self) -> impl Iterator<Item = &Square> {
        self.squares.values()
    }

    #[inline]
    pub fn square_count(&self) -> usize {
        self.squares.len()
    }

    /// Number of rows [`SquareIndex::save_to_csv_file`] writes
    pub fn csv_line_count(&self) -> usize {
        self.squares.values().map(|sq| sq.ranges.len()).sum()
    }

    /// Size in meters of the square containing `lat`, as (north-south, east-west)
    pub fn square_spans_in_meters(&self, lat: f64) -> (f64, f64) {
        let id = self.square_id(utils::point(lat, 0.0));
        let (north, south, west, east) = id.edges(self.total);
        (
            utils::same_lng_distance_meters(south, north),
            utils::same_lat_distance_meters(lat, west, east),
        )
    }

    /// Write one row per heading range: `lng_cell,lat_cell,from_level,to_level,segment_id`
    ///
    /// Squares are written in id order and the rows of a square are contiguous.
    pub fn save_to_csv_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("square::save_to_csv_file");

        let path = path.as_ref();
        let mut out = BufWriter::new(File::create(path)?);
        for square in self.squares.values() {
            for range in &square.ranges {
                writeln!(
                    out,
                    "{},{},{},{},{}",
                    square.id.lng, square.id.lat, range.from_level, range.to_level, range.segment_id
                )?;
            }
        }
        out.flush()?;

        tracing::info!(
            "Saved {} squares ({} rows) to {}",
            self.squares.len(),
            self.csv_line_count(),
            path.display()
        );
        Ok(())
    }

    /// Replace the index with the squares stored in a CSV file
    ///
    /// Rows are grouped by square wherever they appear in the file. Malformed rows are logged
    /// and skipped. On error the index is left empty.
    pub fn load_from_csv_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("square::load_from_csv_file");

        self.squares.clear();
        self.config.validate()?;

        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);

        let mut squares: BTreeMap<SquareId, Square> = BTreeMap::new();
        let mut rows = 0usize;
        let mut malformed = 0usize;
        for (index, bytes) in reader.split(b'\n').enumerate() {
            let bytes = bytes?;
            let parsed = match utils::decode_row(&bytes, index + 1) {
                Ok("") => continue,
                Ok(line) => parse_csv_row(line, index + 1, self.config.heading_levels),
                Err(err) => Err(err),
            };
            match parsed {
                Ok((id, range)) => {
                    squares
                        .entry(id)
                        .or_insert_with(|| Square {
                            id,
                            ranges: SmallVec::new(),
                        })
                        .ranges
                        .push(range);
                    rows += 1;
                }
                Err(err) => {
                    tracing::warn!("Skipping square row in {}: {}", path.display(), err);
                    malformed += 1;
                }
            }
        }

        if squares.is_empty() {
            return Err(DataError::EmptyIndex("square file contains no valid rows"));
        }
        for square in squares.values_mut() {
            square.ranges.sort_by_key(|range| range.from_level);
        }

        tracing::info!(
            "Loaded {} squares ({} rows, {} malformed) from {}",
            squares.len(),
            rows,
            malformed,
            path.display()
        );
        self.squares = squares;
        Ok(())
    }
}

/// Collect the squares of sample points near a segment
///
/// Samples lie on a regular grid, about 2 m apart on the ground, spanning the segment's bounding
/// box grown by a margin. The grid is stepped by index so that no rounding error accumulates
/// along a row.
fn discover_segment_squares(
    segment: &Segment,
    total: f64,
    distance_max: f64,
    found: &mut HashSet<SquareId>,
) {
    let margin_meters = distance_max * DISCOVERY_MARGIN_FACTOR;
    let reach = distance_max + DISCOVERY_SLACK_METERS;
    let reach_sq = reach * reach;

    let (min_lat, min_lng, max_lat, max_lng) = segment.bounds();
    let lat_margin = utils::meters_to_degrees(margin_meters);
    let lat_step = utils::meters_to_degrees(DISCOVERY_STEP_METERS);
    let (min_lat, max_lat) = (min_lat - lat_margin, max_lat + lat_margin);

    // A degree of longitude shrinks with latitude; size it at the most poleward edge so the
    // margin covers the full reach on the ground everywhere in the box
    let widest_lat = min_lat.abs().max(max_lat.abs());
    let lng_margin = utils::meters_to_lng_degrees(margin_meters, widest_lat);
    let lng_step = utils::meters_to_lng_degrees(DISCOVERY_STEP_METERS, widest_lat);
    let (min_lng, max_lng) = (min_lng - lng_margin, max_lng + lng_margin);

    // Latitude end is inclusive, longitude end exclusive
    let lat_samples = ((max_lat - min_lat) / lat_step).floor() as usize + 1;
    let lng_samples = ((max_lng - min_lng) / lng_step).ceil() as usize;

    for i in 0..lat_samples {
        let lat = min_lat + i as f64 * lat_step;
        for j in 0..lng_samples {
            let sample = utils::point(lat, min_lng + j as f64 * lng_step);
            if segment.distance_squared_meters(sample) < reach_sq {
                found.insert(CellId::from_point(sample, total));
            }
        }
    }
}
