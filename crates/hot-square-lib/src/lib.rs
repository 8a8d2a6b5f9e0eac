//! Hot Square Library - Heading-Aware GPS Map-Matching
//!
//! This library assigns GPS fixes (coordinate + heading) to the most likely road segment of a
//! static road network. Assignment is purely geometric: the nearest segment travelling in a
//! compatible direction wins.
//!
//! # Architecture
//!
//! - **[`SegmentStore`]**: Immutable storage for the road segments, with O(1) id lookup
//! - **[`TileIndex`]**: Coarse grid (zoom 17 by default) with neighbor-inclusive candidate lists,
//!   used as the ground-truth nearest-segment search
//! - **[`SquareIndex`]**: Fine grid (about 10 m cells) holding precomputed answers per heading
//!   bucket, built in parallel from the tile index and persisted as CSV
//! - **[`MatchingContext`]**: High-level owner of the configuration and the three indexes
//!
//! # Performance Characteristics
//!
//! - **Tile query**: O(K) where K = candidate segments in the 3x3 tile neighborhood
//! - **Square query**: O(1) lookup + O(R) scan over the square's heading ranges
//! - **Square build**: O(S × A) discovery (S = segments, A = sampled area) plus
//!   O(Q × H × K) materialization (Q = squares, H = heading levels), split across workers

mod builder;
mod cell;
mod config;
mod context;
mod segment;
mod square;
mod tile;
pub mod utils;

// Public API exports
pub use builder::{BuildOptions, BuildPhase, BuildProgress, CancelToken};
pub use cell::{CellId, SquareId, TileId};
pub use config::IndexConfig;
pub use context::{Assignment, ContextInfo, MatchingContext};
pub use segment::{LoadStats, Segment, SegmentId, SegmentStore};
pub use square::{HeadingRange, Square, SquareIndex};
pub use tile::{Tile, TileBounds, TileIndex};

/// Error types for the matching library
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed row at line {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("No valid segments found in {path}")]
    NoValidSegments { path: String },

    #[error("Empty index: {0}")]
    EmptyIndex(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Build cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DataError>;
