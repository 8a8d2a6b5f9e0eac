use std::process::ExitCode;

mod app;
mod entrypoints;

fn main() -> ExitCode {
    entrypoints::main::main()
}
