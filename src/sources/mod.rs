pub mod contours;
pub mod download;
pub mod indexed_vector;
pub mod local_raster;
pub mod local_vector;
pub mod tiled_raster;
pub mod wfs;

use crate::config::SourceConfig;
use crate::domain::model::{Bounds, Feature, SourceDescriptor};
use crate::domain::ports::{DataSource, FeatureReader, GeometryEngine};
use crate::utils::error::{EtlError, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// 資料源共用的外部協作者
#[derive(Clone)]
pub struct SourceServices {
    pub engine: Arc<dyn GeometryEngine>,
    pub reader: Arc<dyn FeatureReader>,
    pub client: Client,
}

impl SourceServices {
    pub fn new(engine: Arc<dyn GeometryEngine>, reader: Arc<dyn FeatureReader>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("aoi-etl/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            engine,
            reader,
            client,
        })
    }
}

/// 所有資料源共有的設定與啟用狀態
#[derive(Debug, Clone)]
pub(crate) struct SourceCore {
    pub descriptor: SourceDescriptor,
    pub config: SourceConfig,
    pub enabled: bool,
}

impl SourceCore {
    pub fn new(config: SourceConfig, descriptor: SourceDescriptor) -> Self {
        Self {
            enabled: config.enabled,
            descriptor,
            config,
        }
    }

    /// 設定檢查失敗時停用資料源，不拋出錯誤
    pub fn settle<T>(&mut self, checked: Result<T>) -> Option<T> {
        match checked {
            Ok(settings) => Some(settings),
            Err(e) => {
                if self.enabled {
                    tracing::warn!(
                        "⚠️ [{}] Invalid configuration, source disabled: {}",
                        self.descriptor.id,
                        e
                    );
                }
                self.enabled = false;
                None
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn fetch_error(&self, message: impl Into<String>) -> EtlError {
        EtlError::SourceFetchError {
            source_id: self.descriptor.id.clone(),
            message: message.into(),
        }
    }

    pub fn not_configured(&self) -> EtlError {
        EtlError::ConfigError {
            message: format!("source '{}' has no valid configuration", self.descriptor.id),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.config
                .param_u64("timeout_seconds")
                .filter(|seconds| *seconds > 0)
                .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
        )
    }
}

pub type SourceConstructor =
    fn(SourceConfig, SourceDescriptor, &SourceServices) -> Box<dyn DataSource>;

/// 類型字串對應建構函式的開放式註冊表
pub struct SourceRegistry {
    constructors: HashMap<String, SourceConstructor>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// 內建的六種資料源
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let builtin: [(&str, SourceConstructor); 6] = [
            (local_vector::KIND, local_vector::build),
            (wfs::KIND, wfs::build),
            (indexed_vector::KIND, indexed_vector::build),
            (tiled_raster::KIND, tiled_raster::build),
            (local_raster::KIND, local_raster::build),
            (contours::KIND, contours::build),
        ];
        for (kind, constructor) in builtin {
            registry.constructors.insert(kind.to_string(), constructor);
        }
        registry
    }

    /// 類型字串不可重複
    pub fn register(&mut self, kind: &str, constructor: SourceConstructor) -> Result<()> {
        if self.constructors.contains_key(kind) {
            return Err(EtlError::InvalidConfigValueError {
                field: "datasources.type".to_string(),
                value: kind.to_string(),
                reason: "Source kind already registered".to_string(),
            });
        }
        self.constructors.insert(kind.to_string(), constructor);
        Ok(())
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// 未知類型或停用時回傳 None
    pub fn create(
        &self,
        config: &SourceConfig,
        declaration_index: usize,
        services: &SourceServices,
    ) -> Option<Box<dyn DataSource>> {
        let descriptor = config.descriptor(declaration_index);
        let Some(constructor) = config
            .kind
            .as_deref()
            .and_then(|kind| self.constructors.get(kind))
        else {
            tracing::warn!(
                "⚠️ [{}] Unknown source type '{}', skipped",
                descriptor.id,
                descriptor.kind
            );
            return None;
        };

        let source = constructor(config.clone(), descriptor, services);
        if !source.is_enabled() {
            tracing::info!("⏭️ [{}] Source is disabled", source.descriptor().id);
            return None;
        }
        // 外部註冊的類型不一定會在建構時自行停用
        if let Err(e) = source.validate_config() {
            tracing::warn!(
                "⚠️ [{}] Invalid configuration, source skipped: {}",
                source.descriptor().id,
                e
            );
            return None;
        }
        Some(source)
    }

    /// 兩份清單皆依 (priority, 宣告順序) 排序
    pub fn create_all(&self, configs: &[SourceConfig], services: &SourceServices) -> SourceSet {
        let mut set = SourceSet::default();
        for (index, config) in configs.iter().enumerate() {
            match self.create(config, index, services) {
                Some(source) => set.sources.push(source),
                None => set.rejected.push(config.descriptor(index)),
            }
        }
        set.sources.sort_by_key(|source| {
            let descriptor = source.descriptor();
            (descriptor.priority, descriptor.declaration_index)
        });
        set.rejected
            .sort_by_key(|descriptor| (descriptor.priority, descriptor.declaration_index));
        set
    }
}

/// 可執行的資料源，以及停用、類型未知或設定無效而略過的設定
#[derive(Default)]
pub struct SourceSet {
    pub sources: Vec<Box<dyn DataSource>>,
    pub rejected: Vec<SourceDescriptor>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// 外包矩形與查詢範圍相交的要素
pub(crate) fn features_in_bounds(
    engine: &dyn GeometryEngine,
    features: Vec<Feature>,
    bounds: &Bounds,
) -> Vec<Feature> {
    features
        .into_iter()
        .filter(|feature| {
            engine
                .bounds(&feature.geometry)
                .map(|envelope| envelope.intersects(bounds))
                .unwrap_or(false)
        })
        .collect()
}

/// 將 base_url 與檔名接成下載網址
pub(crate) fn join_url(base: &str, file_name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), file_name)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::adapters::geo_engine::GeoEngine;
    use crate::adapters::VectorFileReader;

    pub fn services() -> SourceServices {
        SourceServices::new(Arc::new(GeoEngine::new()), Arc::new(VectorFileReader)).unwrap()
    }

    pub fn config(toml_src: &str) -> SourceConfig {
        toml::from_str(toml_src).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_unknown_kind_is_skipped() {
        let registry = SourceRegistry::with_builtin();
        let config = config("id = \"x\"\ntype = \"ftp\"\n");
        assert!(registry.create(&config, 0, &services()).is_none());
    }

    #[test]
    fn test_missing_required_field_disables() {
        let registry = SourceRegistry::with_builtin();
        let config = config("id = \"roads\"\ntype = \"wfs\"\nurl = \"https://example.com/wfs\"\n");
        assert!(registry.create(&config, 0, &services()).is_none());
    }

    #[test]
    fn test_register_rejects_duplicate_kind() {
        let mut registry = SourceRegistry::with_builtin();
        assert!(registry.register("wfs", wfs::build).is_err());
        assert!(registry.register("wfs_mirror", wfs::build).is_ok());
        assert!(registry.kinds().contains(&"wfs_mirror"));
    }

    #[test]
    fn test_create_all_orders_by_priority_then_declaration() {
        let registry = SourceRegistry::with_builtin();
        let mk = |id: &str, priority: i64| {
            config(&format!(
                "id = \"{}\"\ntype = \"wfs\"\npriority = {}\nurl = \"https://example.com/wfs\"\ntypename = \"t\"\n",
                id, priority
            ))
        };
        let mut configs = vec![mk("c", 5), mk("a", 1), mk("b", 5)];
        configs.push(config("id = \"z\"\ntype = \"ftp\"\npriority = 0\n"));
        configs.push(config("id = \"off\"\ntype = \"wfs\"\nenabled = false\npriority = 3\n"));

        let set = registry.create_all(&configs, &services());
        let ids: Vec<String> = set.sources.iter().map(|s| s.descriptor().id.clone()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        let rejected: Vec<&str> = set.rejected.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(rejected, vec!["z", "off"]);
    }

    struct Unchecked {
        descriptor: SourceDescriptor,
    }

    #[async_trait::async_trait]
    impl DataSource for Unchecked {
        fn descriptor(&self) -> &SourceDescriptor {
            &self.descriptor
        }

        fn is_enabled(&self) -> bool {
            true
        }

        fn validate_config(&self) -> Result<()> {
            Err(EtlError::MissingConfigError {
                field: "endpoint".to_string(),
            })
        }

        async fn fetch_data(
            &self,
            _context: crate::domain::model::FetchContext<'_>,
            _workspace: &mut crate::core::workspace::SourceWorkspace,
        ) -> Result<crate::domain::model::FetchOutcome> {
            Ok(crate::domain::model::FetchOutcome::NoData)
        }
    }

    fn build_unchecked(
        _config: SourceConfig,
        descriptor: SourceDescriptor,
        _services: &SourceServices,
    ) -> Box<dyn DataSource> {
        Box::new(Unchecked { descriptor })
    }

    #[test]
    fn test_registered_kind_failing_validation_is_rejected() {
        let mut registry = SourceRegistry::with_builtin();
        registry.register("ftp_drop", build_unchecked).unwrap();
        let configs = vec![config("id = \"drop\"\ntype = \"ftp_drop\"\n")];

        let set = registry.create_all(&configs, &services());
        assert!(set.sources.is_empty());
        assert_eq!(set.rejected.len(), 1);
        assert_eq!(set.rejected[0].kind, "ftp_drop");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://x.org/tiles/", "MNT_21L14NE.tif"),
            "https://x.org/tiles/MNT_21L14NE.tif"
        );
    }
}
