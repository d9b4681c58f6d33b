pub mod aoi;
pub mod pipeline;
pub mod summary;
pub mod tile_index;
pub mod workspace;
pub mod zone;

pub use aoi::{AoiDraft, AoiResolver};
pub use pipeline::{ExtractionPipeline, RunPlan, RunReport};
pub use summary::RunSummary;
pub use workspace::{OutputLayout, SourceWorkspace};
pub use zone::{select_zone, ZonePolicy};
