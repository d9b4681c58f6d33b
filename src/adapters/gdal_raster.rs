use crate::adapters::geojson_io;
use crate::domain::model::{Epsg, Feature, FeatureSet, Zone};
use crate::domain::ports::RasterEngine;
use crate::utils::error::{EtlError, Result};
use geo::{Geometry, MultiPolygon};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

const CREATION_OPTIONS: [&str; 4] = ["-co", "COMPRESS=LZW", "-co", "TILED=YES"];

/// 以 GDAL 命令列工具實作的影像引擎
#[derive(Debug, Clone)]
pub struct GdalCli {
    gdalwarp: String,
    gdaldem: String,
}

impl Default for GdalCli {
    fn default() -> Self {
        Self {
            gdalwarp: "gdalwarp".to_string(),
            gdaldem: "gdaldem".to_string(),
        }
    }
}

impl GdalCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binaries(gdalwarp: impl Into<String>, gdaldem: impl Into<String>) -> Self {
        Self {
            gdalwarp: gdalwarp.into(),
            gdaldem: gdaldem.into(),
        }
    }

    fn run(&self, program: &str, args: Vec<OsString>) -> Result<()> {
        tracing::debug!("Running {} {:?}", program, args);
        let output = Command::new(program)
            .args(&args)
            .output()
            .map_err(|e| EtlError::RasterEngineError {
                message: format!("cannot start {}: {}", program, e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(EtlError::RasterEngineError {
                message: format!(
                    "{} exited with {}: {}",
                    program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

fn os(values: &[&str]) -> Vec<OsString> {
    values.iter().map(OsString::from).collect()
}

impl RasterEngine for GdalCli {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let existing: Vec<&PathBuf> = inputs.iter().filter(|p| p.exists()).collect();
        if existing.is_empty() {
            return Err(EtlError::RasterEngineError {
                message: "merge called without any readable raster".to_string(),
            });
        }

        let mut args = os(&["-overwrite", "-of", "GTiff"]);
        args.extend(os(&CREATION_OPTIONS));
        args.extend(existing.iter().map(|p| p.as_os_str().to_os_string()));
        args.push(output.as_os_str().to_os_string());
        self.run(&self.gdalwarp, args)
    }

    fn reproject(&self, input: &Path, target: Zone, output: &Path) -> Result<()> {
        let mut args = os(&["-overwrite", "-of", "GTiff", "-r", "bilinear", "-t_srs"]);
        args.push(target.epsg().to_string().into());
        args.extend(os(&CREATION_OPTIONS));
        args.push(input.as_os_str().to_os_string());
        args.push(output.as_os_str().to_os_string());
        self.run(&self.gdalwarp, args)
    }

    fn clip(&self, input: &Path, mask: &MultiPolygon<f64>, mask_crs: Epsg, output: &Path) -> Result<()> {
        let stem = output
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("raster");
        let cutline = output.with_file_name(format!("temp_aoi_{}.geojson", stem));
        geojson_io::write_feature_collection(
            &cutline,
            &FeatureSet::new(
                Some(mask_crs),
                vec![Feature::new(Geometry::MultiPolygon(mask.clone()))],
            ),
        )?;

        let mut args = os(&["-overwrite", "-of", "GTiff", "-cutline"]);
        args.push(cutline.as_os_str().to_os_string());
        args.extend(os(&["-crop_to_cutline", "-dstnodata", "-9999"]));
        args.extend(os(&CREATION_OPTIONS));
        args.push(input.as_os_str().to_os_string());
        args.push(output.as_os_str().to_os_string());
        let result = self.run(&self.gdalwarp, args);

        if let Err(e) = std::fs::remove_file(&cutline) {
            tracing::debug!("Could not remove cutline {}: {}", cutline.display(), e);
        }
        result
    }

    fn hillshade(&self, input: &Path, output: &Path) -> Result<()> {
        let mut args = os(&["hillshade"]);
        args.push(input.as_os_str().to_os_string());
        args.push(output.as_os_str().to_os_string());
        args.extend(os(&["-of", "GTiff"]));
        args.extend(os(&CREATION_OPTIONS));
        self.run(&self.gdaldem, args)
    }
}
