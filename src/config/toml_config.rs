use crate::core::zone::ZonePolicy;
use crate::domain::model::{Epsg, SourceDescriptor};
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_AOI_LAYER: &str = "aoi_extent";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub project: ProjectConfig,
    pub aoi: AoiConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    pub tile_index: Option<TileIndexConfig>,
    #[serde(default)]
    pub datasources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub generate_project: bool,
    pub styles_dir: Option<PathBuf>,
    #[serde(default = "default_aoi_layer")]
    pub aoi_layer_name: String,
}

/// AOI 定義：圖幅代碼清單或邊界檔
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "definition", rename_all = "snake_case")]
pub enum AoiConfig {
    TileCodes(Vec<String>),
    BoundaryFile(PathBuf),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectionConfig {
    pub custom_zone: Option<String>,
    #[serde(default)]
    pub zone_policy: ZonePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileIndexConfig {
    pub path: PathBuf,
    #[serde(default = "default_fine_layer")]
    pub layer: String,
    #[serde(default = "default_fine_code_column")]
    pub code_column: String,
    #[serde(default = "default_url_column")]
    pub url_column: Option<String>,
    #[serde(default = "default_fine_crs")]
    pub crs: u32,
    pub coarse: Option<CoarseIndexConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoarseIndexConfig {
    pub path: PathBuf,
    #[serde(default = "default_coarse_layer")]
    pub layer: String,
    #[serde(default = "default_coarse_code_column")]
    pub code_column: String,
    #[serde(default = "default_coarse_crs")]
    pub crs: u32,
}

/// 單一資料源設定；類型專屬的參數攤平於 params
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    pub output_layer_name: Option<String>,
    #[serde(flatten)]
    pub params: toml::Table,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_true() -> bool {
    true
}

fn default_aoi_layer() -> String {
    DEFAULT_AOI_LAYER.to_string()
}

fn default_priority() -> i64 {
    99
}

fn default_fine_layer() -> String {
    "QC_index_url_snrc_mnt".to_string()
}

fn default_fine_code_column() -> String {
    "feuillet".to_string()
}

fn default_url_column() -> Option<String> {
    Some("lidar_url".to_string())
}

fn default_fine_crs() -> u32 {
    Epsg::QUEBEC_LAMBERT.code()
}

fn default_coarse_layer() -> String {
    "CA_index_snrc_50k".to_string()
}

fn default_coarse_code_column() -> String {
    "NTS_SNRC".to_string()
}

fn default_coarse_crs() -> u32 {
    Epsg::NAD83.code()
}

impl RunConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${DATA_ROOT})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| EtlError::ConfigError {
            message: format!("env substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("project.id", &self.project.id)?;
        validation::validate_path(
            "project.output_dir",
            &self.project.output_dir.to_string_lossy(),
        )?;
        validation::validate_non_empty_string("project.aoi_layer_name", &self.project.aoi_layer_name)?;

        match &self.aoi {
            AoiConfig::TileCodes(codes) => {
                if codes.iter().all(|code| code.trim().is_empty()) {
                    return Err(EtlError::MissingConfigError {
                        field: "aoi.definition".to_string(),
                    });
                }
                let index = validation::validate_required_field("tile_index", &self.tile_index)?;
                validation::validate_path("tile_index.path", &index.path.to_string_lossy())?;
                validation::validate_non_empty_string("tile_index.code_column", &index.code_column)?;
            }
            AoiConfig::BoundaryFile(path) => {
                let path = path.to_string_lossy();
                validation::validate_existing_path("aoi.definition", &path)?;
                validation::validate_file_extension("aoi.definition", &path, &["geojson", "json", "gpkg"])?;
            }
        }

        // 自訂分區無效時僅警告，不視為錯誤
        if let Some(custom) = &self.projection.custom_zone {
            if crate::domain::model::Zone::normalize(custom).is_none() {
                tracing::warn!("⚠️ projection.custom_zone '{}' is not a valid zone and will be ignored", custom);
            }
        }

        // GeoPackage 的圖層名稱不分大小寫
        let reserved = self.project.aoi_layer_name.to_lowercase();
        let mut ids = std::collections::HashSet::new();
        let mut layers = std::collections::HashSet::new();
        for (index, source) in self.datasources.iter().enumerate() {
            let descriptor = source.descriptor(index);
            if !ids.insert(descriptor.id.to_lowercase()) {
                return Err(EtlError::InvalidConfigValueError {
                    field: "datasources.id".to_string(),
                    value: descriptor.id,
                    reason: "Duplicate data source id".to_string(),
                });
            }
            let layer = descriptor.output_layer_name.to_lowercase();
            if layer == reserved {
                return Err(EtlError::InvalidConfigValueError {
                    field: "datasources.output_layer_name".to_string(),
                    value: descriptor.output_layer_name,
                    reason: format!("'{}' is reserved for the AOI layer", self.project.aoi_layer_name),
                });
            }
            if !layers.insert(layer) {
                return Err(EtlError::InvalidConfigValueError {
                    field: "datasources.output_layer_name".to_string(),
                    value: descriptor.output_layer_name,
                    reason: "Output layer name already used by another source".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn fine_index_crs(&self) -> Option<Epsg> {
        self.tile_index.as_ref().map(|index| Epsg(index.crs))
    }
}

impl Validate for RunConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

impl SourceConfig {
    pub fn descriptor(&self, declaration_index: usize) -> SourceDescriptor {
        let id = self
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("source_{}", declaration_index + 1));
        SourceDescriptor {
            name: self.name.clone().unwrap_or_else(|| id.clone()),
            kind: self.kind.clone().unwrap_or_else(|| "unknown".to_string()),
            priority: self.priority,
            output_layer_name: self
                .output_layer_name
                .clone()
                .unwrap_or_else(|| id.clone()),
            id,
            declaration_index,
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(|value| value.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    /// 必填字串參數
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.param_str(key).ok_or_else(|| EtlError::MissingConfigError {
            field: format!("{}.{}", self.id.as_deref().unwrap_or("datasource"), key),
        })
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|value| value.as_bool())
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params
            .get(key)
            .and_then(|value| value.as_integer())
            .and_then(|value| u64::try_from(value).ok())
    }

    pub fn param_epsg(&self, key: &str) -> Option<Epsg> {
        match self.params.get(key)? {
            toml::Value::Integer(code) => u32::try_from(*code).ok().map(Epsg),
            toml::Value::String(raw) => raw.parse().ok(),
            _ => None,
        }
    }

    /// 額外的字串對應表 (例如 WFS 附加查詢參數)
    pub fn param_map(&self, key: &str) -> Vec<(String, String)> {
        self.params
            .get(key)
            .and_then(|value| value.as_table())
            .map(|table| {
                table
                    .iter()
                    .map(|(k, v)| {
                        let value = match v {
                            toml::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
