use crate::adapters::geojson_io::write_feature_collection;
use crate::config::SourceConfig;
use crate::core::workspace::SourceWorkspace;
use crate::domain::model::{Epsg, Feature, FeatureSet, FetchContext, FetchOutcome, SourceDescriptor};
use crate::domain::ports::{DataSource, FeatureReader, GeometryEngine};
use crate::sources::{features_in_bounds, SourceCore, SourceServices};
use crate::utils::error::Result;
use crate::utils::validation;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

pub const KIND: &str = "indexed_vector";

#[derive(Debug, Clone)]
struct IndexedSettings {
    index_path: PathBuf,
    index_layer: String,
    block_column: String,
    data_path: PathBuf,
    table_prefix: String,
    index_crs: Epsg,
    data_crs: Epsg,
}

impl IndexedSettings {
    fn from_config(config: &SourceConfig) -> Result<Self> {
        let index_path = config.require_str("index_path")?;
        validation::validate_existing_path("index_path", index_path)?;
        let data_path = config.require_str("data_path")?;
        validation::validate_existing_path("data_path", data_path)?;
        validation::validate_file_extension("data_path", data_path, &["gpkg"])?;

        Ok(Self {
            index_path: PathBuf::from(index_path),
            index_layer: config.require_str("index_layer")?.to_string(),
            block_column: config.require_str("block_column")?.to_string(),
            data_path: PathBuf::from(data_path),
            table_prefix: config.param_str("table_prefix").unwrap_or_default().to_string(),
            index_crs: config.param_epsg("index_crs").unwrap_or(Epsg::QUEBEC_LAMBERT),
            data_crs: config.param_epsg("data_crs").unwrap_or(Epsg::QUEBEC_LAMBERT),
        })
    }
}

/// 以區塊索引分割的大型向量庫，只讀取與 AOI 相交的區塊資料表
pub struct IndexedVectorSource {
    core: SourceCore,
    settings: Option<IndexedSettings>,
    engine: Arc<dyn GeometryEngine>,
    reader: Arc<dyn FeatureReader>,
}

pub fn build(config: SourceConfig, descriptor: SourceDescriptor, services: &SourceServices) -> Box<dyn DataSource> {
    let mut core = SourceCore::new(config, descriptor);
    let settings = core.settle(IndexedSettings::from_config(&core.config));
    Box::new(IndexedVectorSource {
        core,
        settings,
        engine: services.engine.clone(),
        reader: services.reader.clone(),
    })
}

impl IndexedVectorSource {
    fn blocks_for(&self, settings: &IndexedSettings, context: &FetchContext<'_>) -> Result<BTreeSet<String>> {
        let index = self
            .reader
            .read_layer(&settings.index_path, Some(&settings.index_layer))
            .map_err(|e| self.core.fetch_error(format!("index unavailable: {}", e)))?;
        let crs = index.crs.unwrap_or(settings.index_crs);
        let query = self.engine.reproject_bounds(&context.bounds(), Epsg::WGS84, crs)?;

        Ok(features_in_bounds(self.engine.as_ref(), index.features, &query)
            .iter()
            .filter_map(|feature| feature.property_str(&settings.block_column))
            .collect())
    }
}

#[async_trait]
impl DataSource for IndexedVectorSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.core.descriptor
    }

    fn is_enabled(&self) -> bool {
        self.core.enabled
    }

    fn validate_config(&self) -> Result<()> {
        IndexedSettings::from_config(&self.core.config).map(|_| ())
    }

    async fn fetch_data(&self, context: FetchContext<'_>, workspace: &mut SourceWorkspace) -> Result<FetchOutcome> {
        let settings = self.settings.as_ref().ok_or_else(|| self.core.not_configured())?;
        let blocks = self.blocks_for(settings, &context)?;
        if blocks.is_empty() {
            tracing::info!("📭 [{}] No index block intersects the AOI", self.core.id());
            return Ok(FetchOutcome::NoData);
        }
        tracing::info!("🗂️ [{}] {} block(s): {:?}", self.core.id(), blocks.len(), blocks);

        let tables = self.reader.layer_names(&settings.data_path)?;
        let query = self
            .engine
            .reproject_bounds(&context.bounds(), Epsg::WGS84, settings.data_crs)?;

        let mut collected: Vec<Feature> = Vec::new();
        for block in &blocks {
            let table = format!("{}{}", settings.table_prefix, block);
            if !tables.iter().any(|name| name == &table) {
                tracing::warn!("⚠️ [{}] Table '{}' not found, skipped", self.core.id(), table);
                continue;
            }
            let set = self.reader.read_layer(&settings.data_path, Some(&table))?;
            let table_crs = set.crs.unwrap_or(settings.data_crs);
            let mut features = set.features;
            if table_crs != settings.data_crs {
                for feature in &mut features {
                    feature.geometry = self
                        .engine
                        .reproject(&feature.geometry, table_crs, settings.data_crs)?;
                }
            }
            let selected = features_in_bounds(self.engine.as_ref(), features, &query);
            tracing::debug!("[{}] {}: {} feature(s)", self.core.id(), table, selected.len());
            collected.extend(selected);
        }

        if collected.is_empty() {
            return Ok(FetchOutcome::NoData);
        }

        let output = workspace.temp_path("temp_indexed_", "geojson");
        write_feature_collection(&output, &FeatureSet::new(Some(settings.data_crs), collected))?;
        Ok(FetchOutcome::VectorFile(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::geojson_io::read_feature_collection;
    use crate::adapters::geopackage::GeoPackage;
    use crate::domain::model::Bounds;
    use crate::domain::ports::LayerWriter;
    use crate::sources::test_support::{config, services};
    use geo::{point, polygon, Geometry};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_only_intersecting_blocks() {
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("blocks.geojson");
        let data_path = dir.path().join("lakes.gpkg");

        let block = |name: &str, x: f64| {
            Feature::new(Geometry::Polygon(polygon![
                (x: x, y: 46.0), (x: x + 1.0, y: 46.0), (x: x + 1.0, y: 47.0), (x: x, y: 47.0), (x: x, y: 46.0)
            ]))
            .with_property("bloc", name)
        };
        write_feature_collection(
            &index_path,
            &FeatureSet::new(Some(Epsg::WGS84), vec![block("A", -72.0), block("B", -65.0)]),
        )
        .unwrap();

        let mut store = GeoPackage::create(&data_path).unwrap();
        let lakes = |x: f64| {
            FeatureSet::new(
                Some(Epsg::WGS84),
                vec![Feature::new(Geometry::Point(point!(x: x, y: 46.5)))],
            )
        };
        store.write_layer("lac_A", &lakes(-71.5), Epsg::WGS84).unwrap();
        store.write_layer("lac_B", &lakes(-64.5), Epsg::WGS84).unwrap();
        drop(store);

        let cfg = config(&format!(
            "id = \"lakes\"\ntype = \"indexed_vector\"\nindex_path = \"{}\"\nindex_layer = \"blocks\"\nblock_column = \"bloc\"\ndata_path = \"{}\"\ntable_prefix = \"lac_\"\ndata_crs = 4326\n",
            index_path.display(),
            data_path.display()
        ));
        let source = build(cfg.clone(), cfg.descriptor(0), &services());
        assert!(source.is_enabled());

        let mut workspace = SourceWorkspace::new(dir.path(), "lakes");
        let outcome = source
            .fetch_data(FetchContext::Bounds(Bounds::new(-71.8, 46.2, -71.2, 46.8)), &mut workspace)
            .await
            .unwrap();
        let FetchOutcome::VectorFile(file) = outcome else {
            panic!("expected a vector file");
        };
        assert_eq!(read_feature_collection(&file).unwrap().len(), 1);
    }
}
