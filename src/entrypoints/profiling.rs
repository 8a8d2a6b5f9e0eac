/*!
Logging and profiling setup for the command line.

Logs go to stderr through `tracing_subscriber`, filtered by `RUST_LOG`. When built with the
`profiling` feature, a `tracing-chrome` layer also records every span into a Chrome trace file
(`HOT_SQUARE_TRACE_FILE`, `trace.json` by default) that can be opened in Perfetto.
*/

/// Keeps profiling output alive; drop it to flush the trace file
pub struct ProfilingGuard {
    #[cfg(feature = "profiling")]
    _flush: tracing_chrome::FlushGuard,
}

/// Set a default `RUST_LOG` when the user did not choose one
fn set_default_log_filter() {
    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            if cfg!(debug_assertions) {
                std::env::set_var("RUST_LOG", "debug");
            } else {
                std::env::set_var("RUST_LOG", "info");
            }
        }
    }
}

#[cfg(feature = "profiling")]
mod inner {
    use super::{ProfilingGuard, set_default_log_filter};
    use std::path::PathBuf;
    use tracing_subscriber::prelude::*;

    const TRACE_FILE_ENV: &str = "HOT_SQUARE_TRACE_FILE";
    const DEFAULT_TRACE_FILE: &str = "trace.json";

    pub fn setup_logging_and_profiling() -> ProfilingGuard {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        set_default_log_filter();

        let trace_file = std::env::var(TRACE_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_TRACE_FILE));
        let (chrome_layer, flush) = tracing_chrome::ChromeLayerBuilder::new()
            .file(trace_file.clone())
            .include_args(true)
            .build();

        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::from_default_env());
        tracing_subscriber::registry()
            .with(chrome_layer)
            .with(fmt_layer)
            .init();

        tracing::info!(
            "Profiling enabled, recording chrome trace to {} (open with https://ui.perfetto.dev)",
            trace_file.display()
        );
        ProfilingGuard { _flush: flush }
    }
}

#[cfg(not(feature = "profiling"))]
mod inner {
    use super::{ProfilingGuard, set_default_log_filter};
    use tracing_subscriber::prelude::*;

    pub fn setup_logging_and_profiling() -> ProfilingGuard {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        set_default_log_filter();

        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_filter(EnvFilter::from_default_env());
        tracing_subscriber::registry().with(fmt_layer).init();

        tracing::debug!("Logging initialized (profiling disabled in this build)");
        ProfilingGuard {}
    }
}

pub use inner::setup_logging_and_profiling;
