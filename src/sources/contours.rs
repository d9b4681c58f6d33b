use crate::adapters::geojson_io::write_feature_collection;
use crate::config::SourceConfig;
use crate::core::workspace::SourceWorkspace;
use crate::domain::model::{Epsg, Feature, FeatureSet, FetchContext, FetchNeeds, FetchOutcome, SourceDescriptor};
use crate::domain::ports::{DataSource, FeatureReader, GeometryEngine};
use crate::sources::download::{fetch_tiles, resolve_cache_dir, TileDownloader, TileRequest};
use crate::sources::{join_url, SourceCore, SourceServices};
use crate::utils::error::Result;
use crate::utils::validation;
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const KIND: &str = "contours";

#[derive(Debug, Clone)]
struct ContourSettings {
    base_url: String,
    file_prefix: String,
    layer: Option<String>,
    cache_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ContourSettings {
    fn from_config(core: &SourceCore) -> Result<Self> {
        let config = &core.config;
        let base_url = config.require_str("base_url")?;
        validation::validate_url("base_url", base_url)?;
        Ok(Self {
            base_url: base_url.to_string(),
            file_prefix: config.param_str("file_prefix").unwrap_or("Courbes_").to_string(),
            layer: config.param_str("layer").map(str::to_string),
            cache_dir: resolve_cache_dir(config.param_str("cache_dir")),
            timeout: core.timeout(),
        })
    }

    fn request(&self, code: &str) -> TileRequest {
        let file_name = format!("{}{}.gpkg", self.file_prefix, code);
        TileRequest {
            code: code.to_string(),
            url: join_url(&self.base_url, &file_name),
            file_name,
        }
    }
}

/// 每個子圖幅一個 GeoPackage 的等高線資料
pub struct ContourSource {
    core: SourceCore,
    settings: Option<ContourSettings>,
    client: Client,
    engine: Arc<dyn GeometryEngine>,
    reader: Arc<dyn FeatureReader>,
}

pub fn build(config: SourceConfig, descriptor: SourceDescriptor, services: &SourceServices) -> Box<dyn DataSource> {
    let mut core = SourceCore::new(config, descriptor);
    let checked = ContourSettings::from_config(&core);
    let settings = core.settle(checked);
    Box::new(ContourSource {
        core,
        settings,
        client: services.client.clone(),
        engine: services.engine.clone(),
        reader: services.reader.clone(),
    })
}

#[async_trait]
impl DataSource for ContourSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.core.descriptor
    }

    fn is_enabled(&self) -> bool {
        self.core.enabled
    }

    fn validate_config(&self) -> Result<()> {
        ContourSettings::from_config(&self.core).map(|_| ())
    }

    fn fetch_needs(&self) -> FetchNeeds {
        FetchNeeds::Aoi
    }

    async fn fetch_data(&self, context: FetchContext<'_>, workspace: &mut SourceWorkspace) -> Result<FetchOutcome> {
        let settings = self.settings.as_ref().ok_or_else(|| self.core.not_configured())?;
        let tiles = context.sub_tiles();
        if tiles.is_empty() {
            tracing::info!("📭 [{}] AOI has no sub-tile manifest", self.core.id());
            return Ok(FetchOutcome::NoData);
        }

        let requests: Vec<TileRequest> = tiles.iter().map(|tile| settings.request(&tile.code)).collect();
        let downloader = TileDownloader::new(self.client.clone(), settings.timeout, settings.cache_dir.clone());
        let fetched = fetch_tiles(&downloader, &requests, workspace).await;
        if fetched.is_empty() {
            return Err(self.core.fetch_error(format!(
                "none of the {} contour package(s) could be fetched",
                tiles.len()
            )));
        }

        // 第一個圖幅的坐標系為合併後的坐標系
        let mut merged_crs: Option<Epsg> = None;
        let mut merged: Vec<Feature> = Vec::new();
        for (code, path) in &fetched {
            let set = match self.reader.read_layer(path, settings.layer.as_deref()) {
                Ok(set) => set,
                Err(e) => {
                    tracing::warn!("⚠️ [{}] Cannot read contours for {}: {}", self.core.id(), code, e);
                    continue;
                }
            };
            let crs = set.crs.unwrap_or(Epsg::WGS84);
            let target = *merged_crs.get_or_insert(crs);
            for mut feature in set.features {
                if crs != target {
                    feature.geometry = self.engine.reproject(&feature.geometry, crs, target)?;
                }
                merged.push(feature);
            }
        }

        tracing::info!(
            "📥 [{}] {} contour feature(s) from {} package(s)",
            self.core.id(),
            merged.len(),
            fetched.len()
        );
        if merged.is_empty() {
            return Ok(FetchOutcome::NoData);
        }

        let output = workspace.temp_path("temp_merged_", "geojson");
        write_feature_collection(&output, &FeatureSet::new(merged_crs, merged))?;
        Ok(FetchOutcome::VectorFile(output))
    }
}
