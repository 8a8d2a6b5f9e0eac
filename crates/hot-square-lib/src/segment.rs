//! Road segments and the immutable segment store
//!
//! The store is the single owner of segment data. Indexes keep an `Arc<SegmentStore>` and
//! refer to segments by their position in it.

use crate::{DataError, Result, utils};

use geo::Point;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Identifier of a road segment
pub type SegmentId = i64;

/// Number of comma-separated fields in a segment CSV row
const SEGMENT_CSV_FIELDS: usize = 9;

/// A directed road segment
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Segment {
    pub id: SegmentId,
    /// Start point (x = longitude, y = latitude)
    pub from: Point<f64>,
    /// End point (x = longitude, y = latitude)
    pub to: Point<f64>,
    pub way_id: i64,
    pub one_way: bool,
    pub length: f64,
    pub weight: f64,
    /// Bearing from `from` to `to`, whole degrees in 0..360
    pub heading: i32,
}

impl Segment {
    /// Create a segment, deriving its heading from the endpoints
    pub fn new(
        id: SegmentId,
        from: Point<f64>,
        to: Point<f64>,
        way_id: i64,
        one_way: bool,
        length: f64,
        weight: f64,
    ) -> Self {
        Self {
            id,
            from,
            to,
            way_id,
            one_way,
            length,
            weight,
            heading: utils::heading_degrees(from, to),
        }
    }

    /// Parse one row of the segment CSV
    ///
    /// Expected layout:
    /// `"<id>",<from_lat>,<from_lng>,<to_lat>,<to_lng>,"<way_id>",<one_way>,<length>,<weight>`.
    /// Quotes around fields are optional.
    pub fn parse_csv_row(line: &str, line_number: usize) -> Result<Self> {
        let malformed = |reason: String| DataError::MalformedRow {
            line: line_number,
            reason,
        };

        let fields: Vec<&str> = line
            .split(',')
            .map(|f| f.trim().trim_matches('"'))
            .collect();
        if fields.len() != SEGMENT_CSV_FIELDS {
            return Err(malformed(format!(
                "expected {SEGMENT_CSV_FIELDS} fields, found {}",
                fields.len()
            )));
        }

        let int = |index: usize, name: &str| -> Result<i64> {
            fields[index]
                .parse::<i64>()
                .map_err(|_| malformed(format!("invalid {name} '{}'", fields[index])))
        };
        let float = |index: usize, name: &str| -> Result<f64> {
            fields[index]
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| malformed(format!("invalid {name} '{}'", fields[index])))
        };

        let id = int(0, "segment id")?;
        let from_lat = float(1, "from latitude")?;
        let from_lng = float(2, "from longitude")?;
        let to_lat = float(3, "to latitude")?;
        let to_lng = float(4, "to longitude")?;
        let way_id = int(5, "way id")?;
        let one_way = int(6, "one-way flag")? != 0;
        let length = float(7, "length")?;
        let weight = float(8, "weight")?;

        for lat in [from_lat, to_lat] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(malformed(format!("latitude {lat} out of range")));
            }
        }
        for lng in [from_lng, to_lng] {
            if !(-180.0..=180.0).contains(&lng) {
                return Err(malformed(format!("longitude {lng} out of range")));
            }
        }

        Ok(Self::new(
            id,
            utils::point(from_lat, from_lng),
            utils::point(to_lat, to_lng),
            way_id,
            one_way,
            length,
            weight,
        ))
    }

    /// Squared distance in m² from a point to this segment
    #[inline]
    pub fn distance_squared_meters(&self, coord: Point<f64>) -> f64 {
        utils::distance_squared_meters(coord, self.from, self.to)
    }

    /// Bounding box as (min_lat, min_lng, max_lat, max_lng)
    #[inline]
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        (
            self.from.y().min(self.to.y()),
            self.from.x().min(self.to.x()),
            self.from.y().max(self.to.y()),
            self.from.x().max(self.to.x()),
        )
    }
}

/// Counters collected while loading a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LoadStats {
    /// Non-blank rows read
    pub rows: usize,
    /// Segments kept
    pub loaded: usize,
    /// Rows skipped because they could not be parsed
    pub malformed: usize,
    /// Rows skipped because their id was already present
    pub duplicates: usize,
}

/// Immutable collection of road segments with O(1) lookup by id
#[derive(Debug, Clone)]
pub struct SegmentStore {
    /// Segments in load order
    segments: Vec<Segment>,
    /// Segment id -> position in `segments`
    positions: HashMap<SegmentId, usize>,
    stats: LoadStats,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SegmentStore {
    /// Load segments from a CSV file
    ///
    /// Blank lines are ignored, malformed rows are logged and skipped, and duplicate ids keep
    /// their first occurrence. Fails if the file cannot be read or no row survives.
    pub fn load_from_csv_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("segment::load_from_csv_file");

        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);

        let mut store = Self::empty();
        for (index, bytes) in reader.split(b'\n').enumerate() {
            let bytes = bytes?;
            let parsed = match utils::decode_row(&bytes, index + 1) {
                Ok("") => continue,
                Ok(line) => Segment::parse_csv_row(line, index + 1),
                Err(err) => Err(err),
            };
            store.stats.rows += 1;

            match parsed {
                Ok(segment) => store.insert(segment),
                Err(err) => {
                    tracing::warn!("Skipping segment row in {}: {}", path.display(), err);
                    store.stats.malformed += 1;
                }
            }
        }

        if store.segments.is_empty() {
            return Err(DataError::NoValidSegments {
                path: path.display().to_string(),
            });
        }

        store.segments.shrink_to_fit();
        tracing::info!(
            "Loaded {} segments from {} ({} rows, {} malformed, {} duplicates)",
            store.stats.loaded,
            path.display(),
            store.stats.rows,
            store.stats.malformed,
            store.stats.duplicates
        );
        Ok(store)
    }

    /// Build a store from already parsed segments, with the same duplicate handling as
    /// [`SegmentStore::load_from_csv_file`]
    pub fn from_segments<I: IntoIterator<Item = Segment>>(segments: I) -> Result<Self> {
        let mut store = Self::empty();
        for segment in segments {
            store.stats.rows += 1;
            store.insert(segment);
        }
        if store.segments.is_empty() {
            return Err(DataError::EmptyIndex("segment store has no segments"));
        }
        Ok(store)
    }

    fn empty() -> Self {
        Self {
            segments: Vec::new(),
            positions: HashMap::new(),
            stats: LoadStats::default(),
        }
    }

    fn insert(&mut self, segment: Segment) {
        if self.positions.contains_key(&segment.id) {
            tracing::debug!("Duplicate segment id {} ignored", segment.id);
            self.stats.duplicates += 1;
            return;
        }
        self.positions.insert(segment.id, self.segments.len());
        self.segments.push(segment);
        self.stats.loaded += 1;
    }

    /// Look up a segment by id
    #[inline]
    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.positions.get(&id).map(|&pos| &self.segments[pos])
    }

    /// Position of a segment in load order
    #[inline]
    pub fn position(&self, id: SegmentId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    /// Segment at a position in load order
    #[inline]
    pub fn by_position(&self, position: usize) -> Option<&Segment> {
        self.segments.get(position)
    }

    /// All segments in load order
    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[inline]
    pub fn stats(&self) -> LoadStats {
        self.stats
    }
}
