pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod processing;
pub mod sources;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliArgs;
pub use config::RunConfig;

pub use core::{ExtractionPipeline, RunReport};
pub use domain::model::{Aoi, SourceOutcome, SourceStatus, Zone};
pub use utils::error::{EtlError, Result};
