use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("HTTP request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJsonError(#[from] geojson::Error),

    #[error("GeoPackage error: {0}")]
    StoreError(#[from] rusqlite::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("AOI resolution failed: {message}")]
    AoiResolutionError { message: String },

    #[error("Tile index error: {message}")]
    TileIndexError { message: String },

    #[error("Source '{source_id}' fetch failed: {message}")]
    SourceFetchError { source_id: String, message: String },

    #[error("Source '{source_id}' processing failed: {message}")]
    SourceProcessingError { source_id: String, message: String },

    #[error("Failed to write layer '{layer}': {message}")]
    WriteError { layer: String, message: String },

    #[error("Geometry error: {message}")]
    GeometryError { message: String },

    #[error("Projection error: {message}")]
    ProjectionError { message: String },

    #[error("Raster engine error: {message}")]
    RasterEngineError { message: String },

    #[error("Download of {url} incomplete: expected {expected} bytes, received {received}")]
    DownloadVerificationError {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("Could not prepare output directory: {message}")]
    OutputPreparationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Aoi,
    Source,
    Output,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::ConfigError { .. }
            | EtlError::ConfigValidationError { .. }
            | EtlError::InvalidConfigValueError { .. }
            | EtlError::MissingConfigError { .. } => ErrorCategory::Configuration,
            EtlError::AoiResolutionError { .. }
            | EtlError::TileIndexError { .. }
            | EtlError::GeometryError { .. }
            | EtlError::ProjectionError { .. } => ErrorCategory::Aoi,
            EtlError::SourceFetchError { .. }
            | EtlError::SourceProcessingError { .. }
            | EtlError::DownloadVerificationError { .. }
            | EtlError::RasterEngineError { .. }
            | EtlError::ApiError(_)
            | EtlError::GeoJsonError(_) => ErrorCategory::Source,
            EtlError::WriteError { .. }
            | EtlError::OutputPreparationError { .. }
            | EtlError::StoreError(_)
            | EtlError::CsvError(_) => ErrorCategory::Output,
            EtlError::IoError(_) | EtlError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            // 單一資料源的錯誤不影響整體結果
            ErrorCategory::Source => ErrorSeverity::Medium,
            ErrorCategory::Configuration | ErrorCategory::Aoi => ErrorSeverity::High,
            ErrorCategory::Output => match self {
                EtlError::WriteError { .. } => ErrorSeverity::Medium,
                _ => ErrorSeverity::Critical,
            },
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 是否會中止整個執行 (AOI 解析、輸出目錄、設定載入)
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Aoi
        ) || matches!(self, EtlError::OutputPreparationError { .. })
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            EtlError::MissingConfigError { field } => {
                format!("Add the '{}' field to the run configuration", field)
            }
            EtlError::InvalidConfigValueError { field, .. }
            | EtlError::ConfigValidationError { field, .. } => {
                format!("Check the value of '{}' in the run configuration", field)
            }
            EtlError::ConfigError { .. } => "Check the TOML syntax of the run file".to_string(),
            EtlError::AoiResolutionError { .. } => {
                "Verify the tile codes or boundary file and that the AOI lies inside a supported zone (or set projection.custom_zone)".to_string()
            }
            EtlError::TileIndexError { .. } => {
                "Check tile_index.path, layer and column names".to_string()
            }
            EtlError::ProjectionError { .. } | EtlError::GeometryError { .. } => {
                "Check the CRS declared by the input data".to_string()
            }
            EtlError::SourceFetchError { .. } | EtlError::ApiError(_) => {
                "Check network access and the source URL, then rerun".to_string()
            }
            EtlError::DownloadVerificationError { .. } => {
                "The download was truncated; rerun to fetch the missing tiles".to_string()
            }
            EtlError::RasterEngineError { .. } => {
                "Make sure the GDAL command line tools (gdalwarp, gdaldem) are installed".to_string()
            }
            EtlError::OutputPreparationError { .. } | EtlError::WriteError { .. } => {
                "Check write permissions and free space in the output directory".to_string()
            }
            _ => "Rerun with --verbose for details".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("設定錯誤: {}", self),
            ErrorCategory::Aoi => format!("無法解析研究範圍 (AOI): {}", self),
            ErrorCategory::Source => format!("資料源錯誤: {}", self),
            ErrorCategory::Output => format!("輸出錯誤: {}", self),
            ErrorCategory::System => format!("系統錯誤: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_errors_are_not_run_fatal() {
        let err = EtlError::SourceFetchError {
            source_id: "roads".to_string(),
            message: "timeout".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Source);
        assert_eq!(err.severity(), ErrorSeverity::Medium);
        assert!(!err.is_run_fatal());
    }

    #[test]
    fn test_aoi_errors_are_run_fatal() {
        let err = EtlError::AoiResolutionError {
            message: "no zone".to_string(),
        };
        assert!(err.is_run_fatal());
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(err.user_friendly_message().contains("no zone"));
    }

    #[test]
    fn test_output_preparation_is_critical() {
        let err = EtlError::OutputPreparationError {
            message: "read-only".to_string(),
        };
        assert!(err.is_run_fatal());
        assert_eq!(err.severity(), ErrorSeverity::Critical);
    }
}
