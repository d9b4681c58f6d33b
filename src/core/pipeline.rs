use crate::adapters::gdal_raster::GdalCli;
use crate::adapters::geo_engine::GeoEngine;
use crate::adapters::geopackage::GeoPackage;
use crate::adapters::project_composer::ManifestComposer;
use crate::adapters::VectorFileReader;
use crate::config::RunConfig;
use crate::core::aoi::AoiResolver;
use crate::core::summary::{RunSummary, AOI_KIND};
use crate::core::workspace::{OutputLayout, SourceWorkspace};
use crate::domain::model::{
    Aoi, AoiDefinitionType, Feature, FeatureSet, FetchContext, FetchNeeds, FetchOutcome,
    RasterProducts, SourceDescriptor, SourceOutcome, SourceStatus,
};
use crate::domain::ports::{
    DataSource, FeatureReader, GeometryEngine, LayerWriter, ProjectComposer, ProjectRequest,
    RasterEngine,
};
use crate::processing::{derive_hillshade, normalize_raster, LayerTarget, VectorNormalizer};
use crate::sources::{SourceRegistry, SourceServices};
use crate::utils::error::{EtlError, Result};
use crate::utils::monitor::StageMonitor;
use chrono::NaiveDate;
use geo::Geometry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 一次執行的結果
#[derive(Debug)]
pub struct RunReport {
    pub aoi: Aoi,
    pub layout: OutputLayout,
    pub summary: RunSummary,
    pub project_file: Option<PathBuf>,
}

impl RunReport {
    pub fn has_source_failures(&self) -> bool {
        self.summary.failures() > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSource {
    pub descriptor: SourceDescriptor,
    pub will_run: bool,
}

/// --dry-run 的輸出：不建立任何檔案
#[derive(Debug)]
pub struct RunPlan {
    pub aoi: Aoi,
    pub layout: OutputLayout,
    pub sources: Vec<PlannedSource>,
}

/// 端到端流程：AOI → 輸出目錄 → 逐一處理資料源 → 摘要 → 清理 → 專案檔
pub struct ExtractionPipeline {
    config: RunConfig,
    engine: Arc<dyn GeometryEngine>,
    reader: Arc<dyn FeatureReader>,
    raster: Arc<dyn RasterEngine>,
    composer: Option<Arc<dyn ProjectComposer>>,
    registry: SourceRegistry,
    source_services: SourceServices,
    monitor: StageMonitor,
    run_date: NaiveDate,
}

impl ExtractionPipeline {
    /// 使用內建引擎建立
    pub fn new(config: RunConfig) -> Result<Self> {
        let engine: Arc<dyn GeometryEngine> = Arc::new(GeoEngine::new());
        let reader: Arc<dyn FeatureReader> = Arc::new(VectorFileReader);
        let composer: Arc<dyn ProjectComposer> =
            Arc::new(ManifestComposer::new(config.project.styles_dir.clone()));
        let source_services = SourceServices::new(engine.clone(), reader.clone())?;

        Ok(Self {
            config,
            engine,
            reader,
            raster: Arc::new(GdalCli::new()),
            composer: Some(composer),
            registry: SourceRegistry::with_builtin(),
            source_services,
            monitor: StageMonitor::new(false),
            run_date: chrono::Local::now().date_naive(),
        })
    }

    pub fn with_raster_engine(mut self, raster: Arc<dyn RasterEngine>) -> Self {
        self.raster = raster;
        self
    }

    pub fn with_composer(mut self, composer: Option<Arc<dyn ProjectComposer>>) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor = StageMonitor::new(enabled);
        self
    }

    pub fn with_run_date(mut self, date: NaiveDate) -> Self {
        self.run_date = date;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn resolve_aoi(&self) -> Result<Aoi> {
        tracing::info!("🎯 Resolving AOI");
        let resolver = AoiResolver::new(
            self.engine.as_ref(),
            self.reader.as_ref(),
            self.config.tile_index.as_ref(),
        );
        let aoi = resolver.resolve(&self.config.aoi, &self.config.projection)?;
        tracing::info!(
            "✅ AOI '{}' resolved: zone {}, {} sub-tile(s)",
            aoi.display_name(),
            aoi.target_zone(),
            aoi.sub_tiles().len()
        );
        Ok(aoi)
    }

    fn layout_for(&self, aoi: &Aoi) -> OutputLayout {
        OutputLayout::plan(
            &self.config.project.output_dir,
            &self.config.project.id,
            aoi.target_zone(),
            self.run_date,
        )
    }

    /// 解析 AOI 並列出將執行的資料源，不寫入任何檔案
    pub fn plan(&self) -> Result<RunPlan> {
        let aoi = self.resolve_aoi()?;
        let layout = self.layout_for(&aoi);
        let built = self
            .registry
            .create_all(&self.config.datasources, &self.source_services);
        let mut sources: Vec<PlannedSource> = built
            .sources
            .iter()
            .map(|source| PlannedSource {
                descriptor: source.descriptor().clone(),
                will_run: true,
            })
            .chain(built.rejected.into_iter().map(|descriptor| PlannedSource {
                descriptor,
                will_run: false,
            }))
            .collect();
        sources.sort_by_key(|planned| (planned.descriptor.priority, planned.descriptor.declaration_index));
        Ok(RunPlan { aoi, layout, sources })
    }

    pub async fn run(&self) -> Result<RunReport> {
        self.monitor.log_stage("start");

        let aoi = self.resolve_aoi()?;
        self.monitor.log_stage("aoi resolved");

        let layout = self.layout_for(&aoi);
        layout.prepare()?;
        let mut store = GeoPackage::create(&layout.store_path).map_err(|e| EtlError::OutputPreparationError {
            message: format!("cannot open {}: {}", layout.store_path.display(), e),
        })?;

        let mut summary = RunSummary::new();
        summary.push(self.write_aoi_layer(&aoi, &mut store));

        let built = self
            .registry
            .create_all(&self.config.datasources, &self.source_services);
        for descriptor in &built.rejected {
            summary.push(SourceOutcome::new(descriptor, false, SourceStatus::SkippedDisabled));
        }
        for source in &built.sources {
            let outcome = self.process_source(source.as_ref(), &aoi, &layout, &mut store).await;
            summary.push(outcome);
            self.monitor.log_stage(&format!("source {}", source.descriptor().id));
        }
        drop(store);

        summary.log_table();
        if let Err(e) = summary.write_csv(&layout.summary_path()) {
            tracing::warn!("⚠️ Summary file not written: {}", e);
        }

        layout.cleanup_temp();

        let project_file = if self.config.project.generate_project {
            self.compose_project(&layout)
        } else {
            None
        };

        self.monitor.log_final();
        tracing::info!(
            "🏁 Run complete: {} source(s), {} failure(s)",
            summary.len().saturating_sub(1),
            summary.failures()
        );

        Ok(RunReport {
            aoi,
            layout,
            summary,
            project_file,
        })
    }

    fn write_aoi_layer(&self, aoi: &Aoi, store: &mut dyn LayerWriter) -> SourceOutcome {
        let layer = self.config.project.aoi_layer_name.clone();
        let descriptor = SourceDescriptor {
            id: layer.clone(),
            name: "AOI extent".to_string(),
            kind: AOI_KIND.to_string(),
            priority: 0,
            output_layer_name: layer.clone(),
            declaration_index: 0,
        };
        let definition = match aoi.definition_type() {
            AoiDefinitionType::TileCodes => "tile_codes",
            AoiDefinitionType::BoundaryFile => "boundary_file",
        };
        let feature = Feature::new(Geometry::MultiPolygon(aoi.projected_geometry().clone()))
            .with_property("name", aoi.display_name())
            .with_property("definition", definition)
            .with_property("zone", aoi.target_zone().to_string())
            .with_property("tile_count", aoi.sub_tiles().len());
        let zone_crs = aoi.target_zone().epsg();

        match store.write_layer(&layer, &FeatureSet::new(Some(zone_crs), vec![feature]), zone_crs) {
            Ok(written) => SourceOutcome::new(&descriptor, true, SourceStatus::Success).with_counts(1, written),
            Err(e) => {
                tracing::error!("❌ [{}] write: {}", layer, e);
                SourceOutcome::new(&descriptor, true, SourceStatus::ProcessingFailed).with_counts(1, 0)
            }
        }
    }

    async fn process_source(
        &self,
        source: &dyn DataSource,
        aoi: &Aoi,
        layout: &OutputLayout,
        store: &mut GeoPackage,
    ) -> SourceOutcome {
        let descriptor = source.descriptor().clone();
        tracing::info!("🚀 [{}] {} ({})", descriptor.id, descriptor.name, descriptor.kind);
        let mut workspace = layout.source_workspace(&descriptor.id);
        let context = match source.fetch_needs() {
            FetchNeeds::Aoi => FetchContext::Aoi(aoi),
            FetchNeeds::Bounds => FetchContext::Bounds(aoi.bounds()),
        };

        let fetched = match source.fetch_data(context, &mut workspace).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::error!("❌ [{}] fetch: {}", descriptor.id, e);
                return SourceOutcome::new(&descriptor, true, SourceStatus::FetchFailed);
            }
        };

        match fetched {
            FetchOutcome::AoiIndexHandled => SourceOutcome::new(&descriptor, true, SourceStatus::IndexHandled),
            FetchOutcome::NoData => {
                tracing::info!("📭 [{}] No data in AOI", descriptor.id);
                SourceOutcome::new(&descriptor, true, SourceStatus::SuccessEmpty)
            }
            FetchOutcome::VectorFile(path) => self.normalize_vector(&descriptor, &path, aoi, store),
            FetchOutcome::RasterFiles(paths) => self.normalize_rasters(
                &descriptor,
                source,
                &paths,
                aoi,
                layout,
                &mut workspace,
            ),
        }
    }

    fn normalize_vector(
        &self,
        descriptor: &SourceDescriptor,
        path: &Path,
        aoi: &Aoi,
        store: &mut dyn LayerWriter,
    ) -> SourceOutcome {
        let normalizer = VectorNormalizer::new(self.reader.as_ref(), self.engine.as_ref());
        let target = LayerTarget {
            source_id: &descriptor.id,
            layer: &descriptor.output_layer_name,
            aoi: aoi.projected_geometry(),
            zone: aoi.target_zone(),
        };
        let report = normalizer.normalize(path, &target, store);

        let status = match (&report.error, report.final_count) {
            (Some(e), _) => {
                let stage = if matches!(e, EtlError::WriteError { .. }) { "write" } else { "process" };
                tracing::error!("❌ [{}] {}: {}", descriptor.id, stage, e);
                SourceStatus::ProcessingFailed
            }
            (None, 0) => SourceStatus::SuccessEmpty,
            (None, _) => SourceStatus::Success,
        };
        SourceOutcome::new(descriptor, true, status).with_counts(report.raw_count, report.final_count)
    }

    fn normalize_rasters(
        &self,
        descriptor: &SourceDescriptor,
        source: &dyn DataSource,
        paths: &[PathBuf],
        aoi: &Aoi,
        layout: &OutputLayout,
        workspace: &mut SourceWorkspace,
    ) -> SourceOutcome {
        let raw_count = paths.len();
        let products = source.raster_products().unwrap_or(RasterProducts {
            hillshade: false,
            single_tile_prefix: None,
        });
        let base = match (&products.single_tile_prefix, paths, aoi.sub_tiles()) {
            (Some(prefix), [_], [tile]) => format!("{}{}", prefix, tile.code),
            _ => descriptor.output_layer_name.clone(),
        };
        let output = layout.raster_output(&base);

        if let Err(e) = normalize_raster(
            self.raster.as_ref(),
            workspace,
            paths,
            aoi.projected_geometry(),
            aoi.target_zone(),
            &output,
        ) {
            tracing::error!("❌ [{}] process: {}", descriptor.id, e);
            return SourceOutcome::new(descriptor, true, SourceStatus::ProcessingFailed).with_counts(raw_count, 0);
        }

        if products.hillshade {
            derive_hillshade(self.raster.as_ref(), &output, &layout.hillshade_output(&base));
        }
        SourceOutcome::new(descriptor, true, SourceStatus::Success).with_counts(raw_count, 1)
    }

    fn compose_project(&self, layout: &OutputLayout) -> Option<PathBuf> {
        let composer = self.composer.as_ref()?;
        let request = ProjectRequest {
            name: layout.folder_name.clone(),
            project_dir: layout.project_dir.clone(),
            store_path: layout.store_path.clone(),
            imagery_dir: layout.imagery_dir.clone(),
            zone: layout.zone,
        };
        match composer.compose(&request) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!("⚠️ Project generation failed: {}", e);
                None
            }
        }
    }
}
