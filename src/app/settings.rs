use clap::{Args, Parser, Subcommand};
use hot_square_lib::IndexConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
/// Hot Square - Heading-aware GPS map-matching over tile and square grid indexes
pub struct Settings {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the square index from a segment CSV and save it
    Build(BuildArgs),
    /// Assign every fix of a GPS CSV to a road segment
    Assign(AssignArgs),
    /// Print square sizes in meters, or the zoom giving a square size
    Spans(SpansArgs),
}

/// Index tuning shared by all commands
#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Maximum distance in meters between a fix and its segment
    #[arg(long, default_value_t = 120.0)]
    pub distance_max: f64,
    /// Zoom level of the square grid (fractional allowed)
    #[arg(long, default_value_t = 21.4142821)]
    pub square_zoom: f64,
    /// Number of heading buckets per square (must divide 360)
    #[arg(long, default_value_t = 72)]
    pub heading_levels: usize,
    /// Zoom level of the tile grid
    #[arg(long, default_value_t = 17)]
    pub tile_zoom: u32,
    /// Maximum heading difference in degrees for a segment to count as same direction
    #[arg(long, default_value_t = 90)]
    pub heading_tolerance: i32,
}

impl From<&IndexArgs> for IndexConfig {
    fn from(args: &IndexArgs) -> Self {
        IndexConfig {
            seg_assign_distance_max: args.distance_max,
            square_zoom_level: args.square_zoom,
            heading_levels: args.heading_levels,
            tile_zoom_level: args.tile_zoom,
            heading_tolerance: args.heading_tolerance,
        }
    }
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Segment CSV: "id",from_lat,from_lng,to_lat,to_lng,"way_id",one_way,length,weight
    #[arg(long)]
    pub segments: PathBuf,
    /// Where to write the square CSV
    #[arg(long)]
    pub squares_out: PathBuf,
    /// Also write the tile grid with each tile's bounds
    #[arg(long)]
    pub tiles_out: Option<PathBuf>,
    /// Worker threads (defaults to the number of CPUs)
    #[arg(long)]
    pub threads: Option<usize>,
    /// Hide the progress bar
    #[arg(long)]
    pub quiet: bool,
    #[command(flatten)]
    pub index: IndexArgs,
}

#[derive(Args, Debug)]
pub struct AssignArgs {
    /// Segment CSV
    #[arg(long)]
    pub segments: PathBuf,
    /// Square CSV written by `build`; the square index is built in memory when omitted
    #[arg(long)]
    pub squares: Option<PathBuf>,
    /// GPS fixes to assign
    #[arg(long)]
    pub input: PathBuf,
    /// Output CSV: each input row followed by tile_segment,tile_reversed,square_segment,square_reversed
    #[arg(long)]
    pub output: PathBuf,
    /// Column holding the latitude
    #[arg(long, default_value_t = 0)]
    pub lat_col: usize,
    /// Column holding the longitude
    #[arg(long, default_value_t = 1)]
    pub lng_col: usize,
    /// Column holding the heading in degrees
    #[arg(long, default_value_t = 2)]
    pub heading_col: usize,
    /// Field delimiter of the input
    #[arg(long, default_value_t = ',')]
    pub delimiter: char,
    /// Skip the first input row
    #[arg(long)]
    pub header: bool,
    /// Stop after this many fixes
    #[arg(long)]
    pub limit: Option<usize>,
    /// Worker threads for an in-memory square build
    #[arg(long)]
    pub threads: Option<usize>,
    #[command(flatten)]
    pub index: IndexArgs,
}

#[derive(Args, Debug)]
pub struct SpansArgs {
    /// Reference latitude in degrees
    #[arg(long, default_value_t = 45.720608)]
    pub lat: f64,
    /// Square zoom to measure
    #[arg(long, default_value_t = 21.4142821, conflicts_with = "meters")]
    pub zoom: f64,
    /// Instead of measuring, find the zoom giving squares this many meters wide
    #[arg(long)]
    pub meters: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_defaults_match_index_config() {
        let settings = Settings::try_parse_from([
            "hot-square",
            "build",
            "--segments",
            "segs.csv",
            "--squares-out",
            "squares.csv",
        ])
        .unwrap();
        let Command::Build(args) = settings.command else {
            panic!("expected build command");
        };
        assert_eq!(IndexConfig::from(&args.index), IndexConfig::default());
        assert!(args.tiles_out.is_none());
    }

    #[test]
    fn test_assign_columns() {
        let settings = Settings::try_parse_from([
            "hot-square",
            "assign",
            "--segments",
            "segs.csv",
            "--input",
            "gps.csv",
            "--output",
            "out.csv",
            "--lat-col",
            "3",
            "--lng-col",
            "2",
            "--heading-col",
            "5",
            "--delimiter",
            ";",
            "--distance-max",
            "50",
        ])
        .unwrap();
        let Command::Assign(args) = settings.command else {
            panic!("expected assign command");
        };
        assert_eq!((args.lat_col, args.lng_col, args.heading_col), (3, 2, 5));
        assert_eq!(args.delimiter, ';');
        assert_eq!(IndexConfig::from(&args.index).seg_assign_distance_max, 50.0);
    }

    #[test]
    fn test_spans_conflicting_args() {
        let result = Settings::try_parse_from([
            "hot-square",
            "spans",
            "--zoom",
            "20",
            "--meters",
            "10",
        ]);
        assert!(result.is_err());
    }
}
