//! Batch assignment of GPS fixes read from a delimited text file

use super::progress;
use super::settings::AssignArgs;
use anyhow::Context;
use geo::Point;
use hot_square_lib::{Assignment, IndexConfig, MatchingContext, utils};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

/// Where the fields of a fix live in an input row
#[derive(Debug, Clone, Copy)]
struct FixColumns {
    lat: usize,
    lng: usize,
    heading: usize,
    delimiter: char,
}

impl FixColumns {
    fn from_args(args: &AssignArgs) -> Self {
        Self {
            lat: args.lat_col,
            lng: args.lng_col,
            heading: args.heading_col,
            delimiter: args.delimiter,
        }
    }

    /// Parse position and whole-degree heading from one row
    fn parse(&self, line: &str) -> anyhow::Result<(Point<f64>, i32)> {
        let fields: Vec<&str> = line.split(self.delimiter).collect();
        let field = |index: usize, name: &str| -> anyhow::Result<f64> {
            let raw = fields
                .get(index)
                .with_context(|| format!("missing {name} column {index}"))?;
            raw.trim()
                .trim_matches('"')
                .parse::<f64>()
                .with_context(|| format!("invalid {name} {raw:?}"))
        };

        let lat = field(self.lat, "latitude")?;
        let lng = field(self.lng, "longitude")?;
        let heading = field(self.heading, "heading")?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            anyhow::bail!("coordinate ({lat}, {lng}) out of range");
        }
        if !heading.is_finite() {
            anyhow::bail!("invalid heading {heading}");
        }
        Ok((utils::point(lat, lng), (heading.round() as i32).rem_euclid(360)))
    }
}

/// Counters reported once the whole input is processed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct AssignStats {
    fixes: usize,
    malformed: usize,
    tile_misses: usize,
    square_misses: usize,
    tile_reversed: usize,
    square_reversed: usize,
    /// Fixes where both indexes matched but disagree on the segment
    disagreements: usize,
}

impl AssignStats {
    fn record(&mut self, tile: Option<Assignment>, square: Option<Assignment>) {
        self.fixes += 1;
        match tile {
            None => self.tile_misses += 1,
            Some(a) if a.reversed => self.tile_reversed += 1,
            Some(_) => {}
        }
        match square {
            None => self.square_misses += 1,
            Some(a) if a.reversed => self.square_reversed += 1,
            Some(_) => {}
        }
        if let (Some(t), Some(s)) = (tile, square)
            && t.segment_id != s.segment_id
        {
            self.disagreements += 1;
        }
    }
}

fn format_assignment(assignment: Option<Assignment>, delimiter: char) -> String {
    match assignment {
        Some(a) => format!("{}{delimiter}{}", a.segment_id, u8::from(a.reversed)),
        None => format!("-1{delimiter}-1"),
    }
}

/// The input row followed by the tile and square results
fn output_row(
    line: &str,
    delimiter: char,
    tile: Option<Assignment>,
    square: Option<Assignment>,
) -> String {
    format!(
        "{line}{delimiter}{}{delimiter}{}",
        format_assignment(tile, delimiter),
        format_assignment(square, delimiter)
    )
}

fn header_row(line: &str, delimiter: char) -> String {
    ["tile_segment", "tile_reversed", "square_segment", "square_reversed"]
        .iter()
        .fold(line.to_string(), |mut row, column| {
            row.push(delimiter);
            row.push_str(column);
            row
        })
}

fn prepare_context(args: &AssignArgs) -> anyhow::Result<MatchingContext> {
    let config = IndexConfig::from(&args.index);
    let mut context = MatchingContext::load_segments(&args.segments, config)
        .with_context(|| format!("loading segments from {}", args.segments.display()))?;

    match &args.squares {
        Some(path) => context
            .load_squares(path)
            .with_context(|| format!("loading squares from {}", path.display()))?,
        None => {
            tracing::info!("No square file given, building the square index in memory");
            let (options, bar) = progress::build_options(args.threads, false);
            let result = context.build_squares(&options);
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            result.context("building square index")?;
        }
    }
    Ok(context)
}

/// Assign every row of `reader`, writing the annotated rows to `writer`
#[profiling::function]
fn assign_rows<R: BufRead, W: Write>(
    context: &MatchingContext,
    reader: R,
    writer: &mut W,
    columns: FixColumns,
    header: bool,
    limit: Option<usize>,
) -> anyhow::Result<AssignStats> {
    let mut stats = AssignStats::default();
    let mut rows = reader.split(b'\n').enumerate();

    if header {
        if let Some((_, bytes)) = rows.next() {
            let bytes = bytes?;
            let line = String::from_utf8_lossy(&bytes);
            writeln!(writer, "{}", header_row(line.trim_end_matches('\r'), columns.delimiter))?;
        }
    }

    for (index, bytes) in rows {
        if limit.is_some_and(|limit| stats.fixes >= limit) {
            break;
        }
        let bytes = bytes?;
        let line = match std::str::from_utf8(&bytes) {
            Ok(line) => line.trim_end_matches('\r'),
            Err(err) => {
                tracing::warn!("Skipping line {}: invalid UTF-8: {err}", index + 1);
                stats.malformed += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let (coord, heading) = match columns.parse(line) {
            Ok(fix) => fix,
            Err(err) => {
                tracing::warn!("Skipping line {}: {err:#}", index + 1);
                stats.malformed += 1;
                continue;
            }
        };

        let tile = Assignment::resolve(heading, |h| context.tiles().assign_segment(coord, h));
        let square = Assignment::resolve(heading, |h| context.squares().assign_segment(coord, h));
        stats.record(tile, square);
        writeln!(writer, "{}", output_row(line, columns.delimiter, tile, square))?;
    }

    writer.flush()?;
    Ok(stats)
}

pub fn run(args: &AssignArgs) -> anyhow::Result<()> {
    let context = prepare_context(args)?;

    let input = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let output = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut writer = BufWriter::new(output);

    let stats = assign_rows(
        &context,
        BufReader::new(input),
        &mut writer,
        FixColumns::from_args(args),
        args.header,
        args.limit,
    )?;

    tracing::info!(
        "Assigned {} fixes ({} malformed rows skipped)",
        stats.fixes,
        stats.malformed
    );
    tracing::info!(
        "Tile index: {} misses, {} reversed; square index: {} misses, {} reversed",
        stats.tile_misses,
        stats.tile_reversed,
        stats.square_misses,
        stats.square_reversed
    );
    if stats.disagreements > 0 {
        tracing::warn!(
            "{} fixes matched different segments in the tile and square indexes",
            stats.disagreements
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hot_square_lib::{BuildOptions, Segment, SegmentStore};

    const COLUMNS: FixColumns = FixColumns {
        lat: 0,
        lng: 1,
        heading: 2,
        delimiter: ',',
    };

    fn context() -> MatchingContext {
        let segment = Segment::new(
            1,
            utils::point(45.70, 126.60),
            utils::point(45.71, 126.61),
            100,
            false,
            1375.0,
            1.0,
        );
        let mut context = MatchingContext::new(
            SegmentStore::from_segments([segment]).unwrap(),
            IndexConfig::default(),
        )
        .unwrap();
        context
            .build_squares(&BuildOptions::with_threads(2))
            .unwrap();
        context
    }

    #[test]
    fn test_parse_fix() {
        let (coord, heading) = COLUMNS.parse("45.7005, 126.6005,\"359.6\"").unwrap();
        assert_eq!((coord.y(), coord.x()), (45.7005, 126.6005));
        assert_eq!(heading, 0);

        let swapped = FixColumns {
            lat: 2,
            lng: 1,
            heading: 0,
            delimiter: ';',
        };
        let (coord, heading) = swapped.parse("-30;126.6;45.7").unwrap();
        assert_eq!((coord.y(), coord.x(), heading), (45.7, 126.6, 330));
    }

    #[test]
    fn test_parse_fix_errors() {
        assert!(COLUMNS.parse("45.7,126.6").is_err());
        assert!(COLUMNS.parse("abc,126.6,10").is_err());
        assert!(COLUMNS.parse("95.0,126.6,10").is_err());
        assert!(COLUMNS.parse("45.7,126.6,NaN").is_err());
    }

    #[test]
    fn test_output_row() {
        let forward = Some(Assignment {
            segment_id: 12,
            reversed: false,
        });
        let reversed = Some(Assignment {
            segment_id: 7,
            reversed: true,
        });
        assert_eq!(output_row("a,b", ',', forward, reversed), "a,b,12,0,7,1");
        assert_eq!(output_row("a;b", ';', None, forward), "a;b;-1;-1;12;0");
        assert_eq!(
            header_row("lat,lng", ','),
            "lat,lng,tile_segment,tile_reversed,square_segment,square_reversed"
        );
    }

    #[test]
    fn test_assign_rows() {
        let context = context();
        let input = "lat,lng,heading\n\
                     45.7005,126.6005,30\n\
                     45.7005,126.6005,210\n\
                     not,a,fix\n\
                     10.0,10.0,0\n";
        let mut output = Vec::new();
        let stats = assign_rows(&context, input.as_bytes(), &mut output, COLUMNS, true, None)
            .unwrap();

        assert_eq!(
            stats,
            AssignStats {
                fixes: 3,
                malformed: 1,
                tile_misses: 1,
                square_misses: 1,
                tile_reversed: 1,
                square_reversed: 1,
                disagreements: 0,
            }
        );
        let output = String::from_utf8(output).unwrap();
        let rows: Vec<&str> = output.lines().collect();
        assert_eq!(rows.len(), 4);
        assert!(rows[0].ends_with("square_reversed"));
        assert_eq!(rows[1], "45.7005,126.6005,30,1,0,1,0");
        assert_eq!(rows[2], "45.7005,126.6005,210,1,1,1,1");
        assert_eq!(rows[3], "10.0,10.0,0,-1,-1,-1,-1");
    }

    #[test]
    fn test_assign_rows_skips_invalid_utf8() {
        let context = context();
        let mut input = b"45.7005,126.6005,30\r\n".to_vec();
        input.extend_from_slice(b"45.7005,\xff\xfe,30\n");
        input.extend_from_slice(b"45.7005,126.6005,210\n");
        let mut output = Vec::new();
        let stats =
            assign_rows(&context, input.as_slice(), &mut output, COLUMNS, false, None).unwrap();

        assert_eq!(stats.fixes, 2);
        assert_eq!(stats.malformed, 1);
        let output = String::from_utf8(output).unwrap();
        let rows: Vec<&str> = output.lines().collect();
        assert_eq!(rows, ["45.7005,126.6005,30,1,0,1,0", "45.7005,126.6005,210,1,1,1,1"]);
    }

    #[test]
    fn test_assign_rows_limit() {
        let context = context();
        let input = "45.7005,126.6005,30\n45.7005,126.6005,30\n45.7005,126.6005,30\n";
        let mut output = Vec::new();
        let stats =
            assign_rows(&context, input.as_bytes(), &mut output, COLUMNS, false, Some(2)).unwrap();
        assert_eq!(stats.fixes, 2);
        assert_eq!(String::from_utf8(output).unwrap().lines().count(), 2);
    }
}
