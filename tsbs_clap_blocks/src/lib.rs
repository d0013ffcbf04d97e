//! Building blocks for the [`clap`]-based command line configuration of the benchmark tools.

pub mod logging;
pub mod tokio;
