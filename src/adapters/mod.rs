// Adapters: concrete engines and file formats behind the domain ports.

pub mod gdal_raster;
pub mod geo_engine;
pub mod geojson_io;
pub mod geopackage;
pub mod project_composer;

use crate::domain::model::FeatureSet;
use crate::domain::ports::FeatureReader;
use crate::utils::error::{EtlError, Result};
use geopackage::GeoPackage;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VectorFormat {
    GeoJson,
    GeoPackage,
}

fn detect_format(path: &Path) -> Result<VectorFormat> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("geojson") | Some("json") => Ok(VectorFormat::GeoJson),
        Some("gpkg") => Ok(VectorFormat::GeoPackage),
        _ => Err(EtlError::InvalidConfigValueError {
            field: "path".to_string(),
            value: path.display().to_string(),
            reason: "Unsupported vector format (expected .geojson, .json or .gpkg)".to_string(),
        }),
    }
}

/// 依副檔名讀取 GeoJSON 或 GeoPackage
#[derive(Debug, Default, Clone)]
pub struct VectorFileReader;

impl FeatureReader for VectorFileReader {
    fn layer_names(&self, path: &Path) -> Result<Vec<String>> {
        match detect_format(path)? {
            VectorFormat::GeoJson => Ok(vec![path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or("features")
                .to_string()]),
            VectorFormat::GeoPackage => GeoPackage::open_read_only(path)?.feature_layers(),
        }
    }

    fn read_layer(&self, path: &Path, layer: Option<&str>) -> Result<FeatureSet> {
        match detect_format(path)? {
            VectorFormat::GeoJson => geojson_io::read_feature_collection(path),
            VectorFormat::GeoPackage => {
                let store = GeoPackage::open_read_only(path)?;
                match layer {
                    Some(name) => store.read_layer(name),
                    None => {
                        let first = store.feature_layers()?.into_iter().next().ok_or_else(|| {
                            EtlError::TileIndexError {
                                message: format!("No feature layer in {}", path.display()),
                            }
                        })?;
                        store.read_layer(&first)
                    }
                }
            }
        }
    }
}
