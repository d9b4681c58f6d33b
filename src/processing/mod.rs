pub mod raster;
pub mod vector;

pub use raster::{derive_hillshade, normalize_raster};
pub use vector::{LayerTarget, NormalizeReport, VectorNormalizer};
