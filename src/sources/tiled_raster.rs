use crate::config::SourceConfig;
use crate::core::workspace::SourceWorkspace;
use crate::domain::model::{
    FetchContext, FetchNeeds, FetchOutcome, RasterProducts, SourceDescriptor, SubTile,
};
use crate::domain::ports::DataSource;
use crate::sources::download::{fetch_tiles, resolve_cache_dir, TileDownloader, TileRequest};
use crate::sources::{join_url, SourceCore, SourceServices};
use crate::utils::error::Result;
use crate::utils::validation;
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;

pub const KIND: &str = "tiled_raster";

#[derive(Debug, Clone)]
struct TiledRasterSettings {
    base_url: Option<String>,
    file_prefix: String,
    extension: String,
    cache_dir: Option<PathBuf>,
    timeout: Duration,
    hillshade: bool,
}

impl TiledRasterSettings {
    fn from_config(core: &SourceCore) -> Result<Self> {
        let config = &core.config;
        let base_url = config.param_str("base_url");
        if let Some(url) = base_url {
            validation::validate_url("base_url", url)?;
        }
        Ok(Self {
            base_url: base_url.map(str::to_string),
            file_prefix: config.param_str("file_prefix").unwrap_or("MNT_").to_string(),
            extension: config
                .param_str("extension")
                .unwrap_or("tif")
                .trim_start_matches('.')
                .to_string(),
            cache_dir: resolve_cache_dir(config.param_str("cache_dir")),
            timeout: core.timeout(),
            hillshade: config.param_bool("hillshade").unwrap_or(true),
        })
    }

    fn file_name(&self, code: &str) -> String {
        format!("{}{}.{}", self.file_prefix, code, self.extension)
    }

    /// 清單中的網址優先，否則以 base_url 組合
    fn request_for(&self, tile: &SubTile) -> Option<TileRequest> {
        let file_name = self.file_name(&tile.code);
        let url = tile
            .url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.base_url.as_deref().map(|base| join_url(base, &file_name)))?;
        Some(TileRequest {
            code: tile.code.clone(),
            url,
            file_name,
        })
    }
}

/// 依子圖幅清單下載的影像圖幅庫 (例如 LiDAR MNT)
pub struct TiledRasterSource {
    core: SourceCore,
    settings: Option<TiledRasterSettings>,
    client: Client,
}

pub fn build(config: SourceConfig, descriptor: SourceDescriptor, services: &SourceServices) -> Box<dyn DataSource> {
    let mut core = SourceCore::new(config, descriptor);
    let checked = TiledRasterSettings::from_config(&core);
    let settings = core.settle(checked);
    Box::new(TiledRasterSource {
        core,
        settings,
        client: services.client.clone(),
    })
}

#[async_trait]
impl DataSource for TiledRasterSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.core.descriptor
    }

    fn is_enabled(&self) -> bool {
        self.core.enabled
    }

    fn validate_config(&self) -> Result<()> {
        TiledRasterSettings::from_config(&self.core).map(|_| ())
    }

    fn fetch_needs(&self) -> FetchNeeds {
        FetchNeeds::Aoi
    }

    fn raster_products(&self) -> Option<RasterProducts> {
        let settings = self.settings.as_ref()?;
        Some(RasterProducts {
            hillshade: settings.hillshade,
            single_tile_prefix: Some(settings.file_prefix.clone()),
        })
    }

    async fn fetch_data(&self, context: FetchContext<'_>, workspace: &mut SourceWorkspace) -> Result<FetchOutcome> {
        let settings = self.settings.as_ref().ok_or_else(|| self.core.not_configured())?;
        let tiles = context.sub_tiles();
        if tiles.is_empty() {
            tracing::info!("📭 [{}] AOI has no sub-tile manifest", self.core.id());
            return Ok(FetchOutcome::NoData);
        }

        let requests: Vec<TileRequest> = tiles
            .iter()
            .filter_map(|tile| {
                let request = settings.request_for(tile);
                if request.is_none() {
                    tracing::warn!("⚠️ [{}] Tile {} has no download URL", self.core.id(), tile.code);
                }
                request
            })
            .collect();

        let downloader = TileDownloader::new(self.client.clone(), settings.timeout, settings.cache_dir.clone());
        let fetched = fetch_tiles(&downloader, &requests, workspace).await;
        tracing::info!(
            "📦 [{}] {} of {} tile(s) available",
            self.core.id(),
            fetched.len(),
            tiles.len()
        );

        if fetched.is_empty() {
            return Err(self.core.fetch_error(format!(
                "none of the {} manifest tile(s) could be fetched",
                tiles.len()
            )));
        }
        Ok(FetchOutcome::RasterFiles(
            fetched.into_iter().map(|(_, path)| path).collect(),
        ))
    }
}
