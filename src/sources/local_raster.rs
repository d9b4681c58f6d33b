use crate::config::SourceConfig;
use crate::core::workspace::SourceWorkspace;
use crate::domain::model::{FetchContext, FetchOutcome, RasterProducts, SourceDescriptor};
use crate::domain::ports::DataSource;
use crate::sources::{SourceCore, SourceServices};
use crate::utils::error::Result;
use crate::utils::validation;
use async_trait::async_trait;
use std::path::PathBuf;

pub const KIND: &str = "local_raster";

pub struct LocalRasterSource {
    core: SourceCore,
    path: Option<PathBuf>,
    hillshade: bool,
}

fn checked_path(config: &SourceConfig) -> Result<PathBuf> {
    let path = config.require_str("path")?;
    validation::validate_existing_path("path", path)?;
    Ok(PathBuf::from(path))
}

pub fn build(config: SourceConfig, descriptor: SourceDescriptor, _services: &SourceServices) -> Box<dyn DataSource> {
    let mut core = SourceCore::new(config, descriptor);
    let path = core.settle(checked_path(&core.config));
    let hillshade = core.config.param_bool("hillshade").unwrap_or(false);
    Box::new(LocalRasterSource { core, path, hillshade })
}

#[async_trait]
impl DataSource for LocalRasterSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.core.descriptor
    }

    fn is_enabled(&self) -> bool {
        self.core.enabled
    }

    fn validate_config(&self) -> Result<()> {
        checked_path(&self.core.config).map(|_| ())
    }

    fn raster_products(&self) -> Option<RasterProducts> {
        Some(RasterProducts {
            hillshade: self.hillshade,
            single_tile_prefix: None,
        })
    }

    async fn fetch_data(&self, _context: FetchContext<'_>, _workspace: &mut SourceWorkspace) -> Result<FetchOutcome> {
        let path = self.path.as_ref().ok_or_else(|| self.core.not_configured())?;
        Ok(FetchOutcome::RasterFiles(vec![path.clone()]))
    }
}
