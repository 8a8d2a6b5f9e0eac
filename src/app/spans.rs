use super::settings::SpansArgs;
use hot_square_lib::{IndexConfig, SquareIndex, utils};

pub fn run(args: &SpansArgs) -> anyhow::Result<()> {
    if !(-utils::MAX_LATITUDE..=utils::MAX_LATITUDE).contains(&args.lat) {
        anyhow::bail!("latitude {} is outside the Web Mercator range", args.lat);
    }

    if let Some(meters) = args.meters {
        if !(meters > 0.0) {
            anyhow::bail!("square size must be positive, got {meters}");
        }
        let zoom = utils::zoom_for_square_span(meters, args.lat);
        println!("zoom {zoom:.7} gives {meters} m squares at latitude {}", args.lat);
        return Ok(());
    }

    let (north_south, east_west) = spans_at(args.zoom, args.lat)?;
    println!(
        "zoom {} at latitude {}: {north_south:.3} m north-south, {east_west:.3} m east-west",
        args.zoom, args.lat
    );
    Ok(())
}

/// Square size in meters at a zoom and latitude, as (north-south, east-west)
fn spans_at(zoom: f64, lat: f64) -> anyhow::Result<(f64, f64)> {
    let config = IndexConfig {
        square_zoom_level: zoom,
        ..Default::default()
    };
    config.validate()?;
    Ok(SquareIndex::new(config).square_spans_in_meters(lat))
}
