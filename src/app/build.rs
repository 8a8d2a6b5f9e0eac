use super::progress;
use super::settings::BuildArgs;
use anyhow::Context;
use hot_square_lib::{IndexConfig, MatchingContext};
use std::time::Instant;

#[profiling::function]
pub fn run(args: &BuildArgs) -> anyhow::Result<()> {
    let config = IndexConfig::from(&args.index);
    let mut context = MatchingContext::load_segments(&args.segments, config)
        .with_context(|| format!("loading segments from {}", args.segments.display()))?;

    if let Some(path) = &args.tiles_out {
        context
            .save_tiles(path)
            .with_context(|| format!("saving tiles to {}", path.display()))?;
        tracing::info!("Tiles saved to {}", path.display());
    }

    let (options, bar) = progress::build_options(args.threads, args.quiet);
    let started = Instant::now();
    let result = context.build_squares(&options);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    result.context("building square index")?;

    context
        .save_squares(&args.squares_out)
        .with_context(|| format!("saving squares to {}", args.squares_out.display()))?;

    let info = context.info();
    tracing::info!(
        "Built {} squares ({} heading ranges) from {} segments on {} tiles in {:.2?}",
        info.square_count,
        info.heading_range_count,
        info.segment_count,
        info.tile_count,
        started.elapsed()
    );
    tracing::info!("Squares saved to {}", args.squares_out.display());
    Ok(())
}
