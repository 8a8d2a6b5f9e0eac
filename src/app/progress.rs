//! Terminal progress bar fed by the square builder's progress reports

use hot_square_lib::{BuildOptions, BuildProgress};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] {msg:>15} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)";

/// Build options for `threads` workers, with a progress bar unless `quiet`
///
/// The returned bar is already wired to the options' progress callback; finish it once the
/// build returns.
pub fn build_options(threads: Option<usize>, quiet: bool) -> (BuildOptions, Option<ProgressBar>) {
    let mut options = BuildOptions::default();
    if let Some(threads) = threads {
        options.thread_count = threads;
    }
    if quiet {
        return (options, None);
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  "),
    );

    let sink = bar.clone();
    let options = options
        .poll_interval(Duration::from_millis(200))
        .on_progress(move |progress| update(&sink, progress));
    (options, Some(bar))
}

fn update(bar: &ProgressBar, progress: &BuildProgress) {
    bar.set_message(progress.phase.to_string());
    bar.set_length(progress.total as u64);
    bar.set_position(progress.done as u64);
}
