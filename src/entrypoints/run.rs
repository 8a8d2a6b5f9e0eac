use super::cli::parse_args;
use super::metadata::log_version_info;
use super::profiling::setup_logging_and_profiling;
use crate::app::settings::Settings;
use std::process::ExitCode;

/// Native entry point
pub fn native_main() -> ExitCode {
    let settings = match parse_args::<Settings>() {
        Ok(settings) => settings,
        // Prints help, version or the usage error and exits with clap's status code
        Err(e) => e.exit(),
    };

    // Held until exit so the trace file gets flushed
    let _profiling = setup_logging_and_profiling();
    log_version_info();

    match crate::app::run(settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
