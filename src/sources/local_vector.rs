use crate::adapters::geojson_io::write_feature_collection;
use crate::config::SourceConfig;
use crate::core::workspace::SourceWorkspace;
use crate::domain::model::{Epsg, FeatureSet, FetchContext, FetchOutcome, SourceDescriptor};
use crate::domain::ports::{DataSource, FeatureReader, GeometryEngine};
use crate::sources::{features_in_bounds, SourceCore, SourceServices};
use crate::utils::error::Result;
use crate::utils::validation;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub const KIND: &str = "local_vector";

#[derive(Debug, Clone)]
struct LocalVectorSettings {
    path: PathBuf,
    layer: Option<String>,
    aoi_index: bool,
}

impl LocalVectorSettings {
    fn from_config(config: &SourceConfig) -> Result<Self> {
        let path = config.require_str("path")?;
        validation::validate_existing_path("path", path)?;
        validation::validate_file_extension("path", path, &["geojson", "json", "gpkg"])?;
        Ok(Self {
            path: PathBuf::from(path),
            layer: config.param_str("layer").map(str::to_string),
            aoi_index: config.param_bool("aoi_index").unwrap_or(false),
        })
    }
}

/// 本機向量檔 (GeoJSON / GeoPackage)
pub struct LocalVectorSource {
    core: SourceCore,
    settings: Option<LocalVectorSettings>,
    engine: Arc<dyn GeometryEngine>,
    reader: Arc<dyn FeatureReader>,
}

pub fn build(config: SourceConfig, descriptor: SourceDescriptor, services: &SourceServices) -> Box<dyn DataSource> {
    let mut core = SourceCore::new(config, descriptor);
    let settings = core.settle(LocalVectorSettings::from_config(&core.config));
    Box::new(LocalVectorSource {
        core,
        settings,
        engine: services.engine.clone(),
        reader: services.reader.clone(),
    })
}

#[async_trait]
impl DataSource for LocalVectorSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.core.descriptor
    }

    fn is_enabled(&self) -> bool {
        self.core.enabled
    }

    fn validate_config(&self) -> Result<()> {
        LocalVectorSettings::from_config(&self.core.config).map(|_| ())
    }

    async fn fetch_data(&self, context: FetchContext<'_>, workspace: &mut SourceWorkspace) -> Result<FetchOutcome> {
        let settings = self.settings.as_ref().ok_or_else(|| self.core.not_configured())?;
        if settings.aoi_index {
            tracing::info!("🗂️ [{}] AOI index source, already handled", self.core.id());
            return Ok(FetchOutcome::AoiIndexHandled);
        }

        let set = self
            .reader
            .read_layer(&settings.path, settings.layer.as_deref())
            .map_err(|e| self.core.fetch_error(format!("cannot read {}: {}", settings.path.display(), e)))?;
        let crs = set.crs.unwrap_or(Epsg::WGS84);
        let query = self.engine.reproject_bounds(&context.bounds(), Epsg::WGS84, crs)?;

        let total = set.len();
        let features = features_in_bounds(self.engine.as_ref(), set.features, &query);
        tracing::info!(
            "📥 [{}] {} of {} feature(s) intersect the AOI bounds",
            self.core.id(),
            features.len(),
            total
        );
        if features.is_empty() {
            return Ok(FetchOutcome::NoData);
        }

        let output = workspace.temp_path("temp_filtered_", "geojson");
        write_feature_collection(&output, &FeatureSet::new(Some(crs), features))?;
        Ok(FetchOutcome::VectorFile(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::geojson_io::read_feature_collection;
    use crate::domain::model::{Bounds, Feature};
    use crate::sources::test_support::{config, services};
    use geo::{point, Geometry};
    use tempfile::TempDir;

    fn sample_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("poi.geojson");
        let set = FeatureSet::new(
            Some(Epsg::WGS84),
            vec![
                Feature::new(Geometry::Point(point!(x: -71.5, y: 46.5))).with_property("name", "in"),
                Feature::new(Geometry::Point(point!(x: -60.0, y: 50.0))).with_property("name", "out"),
            ],
        );
        write_feature_collection(&path, &set).unwrap();
        path
    }

    #[tokio::test]
    async fn test_fetch_filters_by_bounds() {
        let dir = TempDir::new().unwrap();
        let path = sample_file(&dir);
        let cfg = config(&format!("id = \"poi\"\ntype = \"local_vector\"\npath = \"{}\"\n", path.display()));
        let source = build(cfg.clone(), cfg.descriptor(0), &services());
        assert!(source.is_enabled());

        let mut workspace = SourceWorkspace::new(dir.path(), "poi");
        let outcome = source
            .fetch_data(FetchContext::Bounds(Bounds::new(-72.0, 46.0, -71.0, 47.0)), &mut workspace)
            .await
            .unwrap();
        let FetchOutcome::VectorFile(file) = outcome else {
            panic!("expected a vector file");
        };
        assert_eq!(file.file_name().unwrap(), "temp_filtered_poi.geojson");
        let written = read_feature_collection(&file).unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written.features[0].property_str("name").as_deref(), Some("in"));
    }

    #[tokio::test]
    async fn test_aoi_index_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = sample_file(&dir);
        let cfg = config(&format!(
            "id = \"index\"\ntype = \"local_vector\"\npath = \"{}\"\naoi_index = true\n",
            path.display()
        ));
        let source = build(cfg.clone(), cfg.descriptor(0), &services());
        let mut workspace = SourceWorkspace::new(dir.path(), "index");
        let outcome = source
            .fetch_data(FetchContext::Bounds(Bounds::new(0.0, 0.0, 1.0, 1.0)), &mut workspace)
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::AoiIndexHandled);
    }

    #[test]
    fn test_missing_file_disables() {
        let cfg = config("id = \"poi\"\ntype = \"local_vector\"\npath = \"/nonexistent/poi.geojson\"\n");
        let source = build(cfg.clone(), cfg.descriptor(0), &services());
        assert!(!source.is_enabled());
        assert!(source.validate_config().is_err());
    }
}
