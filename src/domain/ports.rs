use crate::core::workspace::SourceWorkspace;
use crate::domain::model::{
    Bounds, Epsg, FeatureSet, FetchContext, FetchNeeds, FetchOutcome, RasterProducts,
    SourceDescriptor, Zone,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use geo::{Geometry, MultiPolygon};
use std::path::{Path, PathBuf};

/// 幾何運算引擎 (投影轉換、聯集、修復、裁切)
pub trait GeometryEngine: Send + Sync {
    /// 空幾何轉換後仍為空幾何
    fn reproject(&self, geometry: &Geometry<f64>, from: Epsg, to: Epsg) -> Result<Geometry<f64>>;

    fn union(&self, geometries: &[Geometry<f64>]) -> MultiPolygon<f64>;

    fn is_valid(&self, geometry: &Geometry<f64>) -> bool;

    fn make_valid(&self, geometry: &Geometry<f64>) -> Geometry<f64>;

    fn intersects(&self, a: &Geometry<f64>, b: &Geometry<f64>) -> bool;

    /// 回傳 None 代表完全落在遮罩之外；拓撲錯誤回傳 Err
    fn clip(&self, geometry: &Geometry<f64>, mask: &MultiPolygon<f64>) -> Result<Option<Geometry<f64>>>;

    fn bounds(&self, geometry: &Geometry<f64>) -> Option<Bounds>;

    fn reproject_bounds(&self, bounds: &Bounds, from: Epsg, to: Epsg) -> Result<Bounds> {
        if from == to {
            return Ok(*bounds);
        }
        let polygon = Geometry::Polygon(bounds.to_polygon());
        let projected = self.reproject(&polygon, from, to)?;
        self.bounds(&projected).ok_or_else(|| crate::EtlError::ProjectionError {
            message: format!("Bounds could not be projected from {} to {}", from, to),
        })
    }
}

/// 影像運算引擎
pub trait RasterEngine: Send + Sync {
    /// 輸入為空時必須失敗
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    fn reproject(&self, input: &Path, target: Zone, output: &Path) -> Result<()>;

    fn clip(&self, input: &Path, mask: &MultiPolygon<f64>, mask_crs: Epsg, output: &Path) -> Result<()>;

    fn hillshade(&self, input: &Path, output: &Path) -> Result<()>;
}

/// 可查詢的圖層容器 (索引檔、邊界檔、下載的向量檔)
pub trait FeatureReader: Send + Sync {
    fn layer_names(&self, path: &Path) -> Result<Vec<String>>;

    /// layer 為 None 時讀取第一個圖層
    fn read_layer(&self, path: &Path, layer: Option<&str>) -> Result<FeatureSet>;
}

/// 合併輸出庫的單一寫入者
pub trait LayerWriter {
    /// 取代同名圖層，回傳寫入的要素數
    fn write_layer(&mut self, name: &str, features: &FeatureSet, crs: Epsg) -> Result<usize>;

    fn layer_names(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct ProjectRequest {
    pub name: String,
    pub project_dir: PathBuf,
    pub store_path: PathBuf,
    pub imagery_dir: PathBuf,
    pub zone: Zone,
}

pub trait ProjectComposer: Send + Sync {
    fn compose(&self, request: &ProjectRequest) -> Result<PathBuf>;
}

#[async_trait]
pub trait DataSource: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn is_enabled(&self) -> bool;

    /// 建構時呼叫；失敗時資料源會自行停用
    fn validate_config(&self) -> Result<()>;

    fn fetch_needs(&self) -> FetchNeeds {
        FetchNeeds::Bounds
    }

    fn raster_products(&self) -> Option<RasterProducts> {
        None
    }

    async fn fetch_data(
        &self,
        context: FetchContext<'_>,
        workspace: &mut SourceWorkspace,
    ) -> Result<FetchOutcome>;
}
