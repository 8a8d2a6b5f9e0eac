// Shared modules
pub(crate) mod cli;
mod metadata;
pub(crate) mod profiling;
mod run;

// Entry points
pub mod main;
