use crate::core::workspace::SourceWorkspace;
use crate::domain::model::Zone;
use crate::domain::ports::RasterEngine;
use crate::utils::error::{EtlError, Result};
use geo::MultiPolygon;
use std::path::{Path, PathBuf};

/// 合併 (多圖幅時)、投影至分區、依 AOI 裁切
pub fn normalize_raster(
    engine: &dyn RasterEngine,
    workspace: &mut SourceWorkspace,
    inputs: &[PathBuf],
    aoi: &MultiPolygon<f64>,
    zone: Zone,
    output: &Path,
) -> Result<()> {
    let source = match inputs {
        [] => {
            return Err(EtlError::SourceProcessingError {
                source_id: workspace.source_id().to_string(),
                message: "no raster to normalize".to_string(),
            })
        }
        [single] => single.clone(),
        many => {
            let mosaic = workspace.temp_path("temp_unclipped_mosaic_", "tif");
            tracing::info!("🧱 [{}] Merging {} rasters", workspace.source_id(), many.len());
            engine.merge(many, &mosaic)?;
            mosaic
        }
    };

    let reprojected = workspace.temp_path("temp_reproj_", "tif");
    engine.reproject(&source, zone, &reprojected)?;
    engine.clip(&reprojected, aoi, zone.epsg(), output)?;
    tracing::info!("🗺️ [{}] Raster written: {}", workspace.source_id(), output.display());
    Ok(())
}

/// 陰影圖失敗只記錄，不影響高程影像
pub fn derive_hillshade(engine: &dyn RasterEngine, input: &Path, output: &Path) -> bool {
    match engine.hillshade(input, output) {
        Ok(()) => {
            tracing::info!("⛰️ Hillshade written: {}", output.display());
            true
        }
        Err(e) => {
            tracing::warn!("⚠️ Hillshade failed for {}: {}", input.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Epsg;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingEngine {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingEngine {
        fn record(&self, call: String, output: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            std::fs::write(output, b"raster")?;
            Ok(())
        }
    }

    impl RasterEngine for RecordingEngine {
        fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
            self.record(format!("merge:{}", inputs.len()), output)
        }

        fn reproject(&self, _input: &Path, target: Zone, output: &Path) -> Result<()> {
            self.record(format!("reproject:{}", target), output)
        }

        fn clip(&self, _input: &Path, _mask: &MultiPolygon<f64>, mask_crs: Epsg, output: &Path) -> Result<()> {
            self.record(format!("clip:{}", mask_crs), output)
        }

        fn hillshade(&self, _input: &Path, _output: &Path) -> Result<()> {
            Err(EtlError::RasterEngineError {
                message: "gdaldem missing".to_string(),
            })
        }
    }

    #[test]
    fn test_multi_tile_pipeline_merges_first() {
        let dir = TempDir::new().unwrap();
        let engine = RecordingEngine::default();
        let zone = Zone::from_epsg(Epsg(32188)).unwrap();
        let output = dir.path().join("out.tif");
        {
            let mut workspace = SourceWorkspace::new(dir.path(), "mnt");
            let inputs = vec![dir.path().join("a.tif"), dir.path().join("b.tif")];
            normalize_raster(&engine, &mut workspace, &inputs, &MultiPolygon::new(vec![]), zone, &output).unwrap();
            assert!(dir.path().join("temp_reproj_mnt.tif").exists());
        }

        assert_eq!(
            *engine.calls.lock().unwrap(),
            vec!["merge:2", "reproject:EPSG:32188", "clip:EPSG:32188"]
        );
        assert!(output.exists());
        assert!(!dir.path().join("temp_unclipped_mosaic_mnt.tif").exists());
        assert!(!derive_hillshade(&engine, &output, &dir.path().join("hs.tif")));
    }

    #[test]
    fn test_empty_input_fails() {
        let dir = TempDir::new().unwrap();
        let mut workspace = SourceWorkspace::new(dir.path(), "mnt");
        let result = normalize_raster(
            &RecordingEngine::default(),
            &mut workspace,
            &[],
            &MultiPolygon::new(vec![]),
            Zone::DEFAULT,
            &dir.path().join("out.tif"),
        );
        assert!(result.is_err());
    }
}
