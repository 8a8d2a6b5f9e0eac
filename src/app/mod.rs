pub mod settings;

mod assign;
mod build;
mod progress;
mod spans;

use settings::{Command, Settings};

/// Run the command selected on the command line
pub fn run(settings: Settings) -> anyhow::Result<()> {
    match &settings.command {
        Command::Build(args) => build::run(args),
        Command::Assign(args) => assign::run(args),
        Command::Spans(args) => spans::run(args),
    }
}
