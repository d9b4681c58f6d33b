use geo::{Coord, Geometry, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// EPSG 座標參考系統代碼
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Epsg(pub u32);

impl Epsg {
    pub const WGS84: Epsg = Epsg(4326);
    pub const NAD83: Epsg = Epsg(4269);
    pub const QUEBEC_LAMBERT: Epsg = Epsg(32198);

    pub fn code(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Epsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl FromStr for Epsg {
    type Err = String;

    /// 接受 "EPSG:32188"、"32188"、"urn:ogc:def:crs:EPSG::32188" 等寫法
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .rsplit(':')
            .next()
            .unwrap_or(trimmed)
            .trim_start_matches(|c: char| c.is_ascii_alphabetic());
        let upper = trimmed.to_ascii_uppercase();
        let recognised = upper.starts_with("EPSG:")
            || upper.starts_with("URN:OGC:DEF:CRS:EPSG:")
            || upper.starts_with("EPSG")
            || trimmed.chars().all(|c| c.is_ascii_digit());
        if !recognised {
            return Err(format!("Unrecognised CRS identifier: {}", s));
        }
        digits
            .parse::<u32>()
            .ok()
            .filter(|code| *code > 0)
            .map(Epsg)
            .ok_or_else(|| format!("Unrecognised CRS identifier: {}", s))
    }
}

/// 地理範圍 (min_x, min_y, max_x, max_y)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_rect(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    pub fn center_x(&self) -> f64 {
        (self.min_x + self.max_x) / 2.0
    }

    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            Coord {
                x: self.min_x,
                y: self.min_y,
            },
            Coord {
                x: self.max_x,
                y: self.max_y,
            },
        )
        .to_polygon()
    }

    /// WFS bbox 參數格式
    pub fn to_query_string(&self) -> String {
        format!("{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

/// 轄區內有效的投影分區 (MTM 1 至 10)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zone(Epsg);

impl Zone {
    pub const FIRST_CODE: u32 = 32181;
    pub const LAST_CODE: u32 = 32190;
    /// MTM 8
    pub const DEFAULT: Zone = Zone(Epsg(32188));

    pub fn from_epsg(epsg: Epsg) -> Option<Self> {
        if Self::is_valid_code(epsg.code()) {
            Some(Self(epsg))
        } else {
            None
        }
    }

    pub fn is_valid_code(code: u32) -> bool {
        (Self::FIRST_CODE..=Self::LAST_CODE).contains(&code)
    }

    /// 將任意寫法的分區代碼正規化
    pub fn normalize(raw: &str) -> Option<Self> {
        raw.parse::<Epsg>().ok().and_then(Self::from_epsg)
    }

    pub fn epsg(&self) -> Epsg {
        self.0
    }

    pub fn short_name(&self) -> String {
        short_zone_name(self.0)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub fn short_zone_name(epsg: Epsg) -> String {
    if Zone::is_valid_code(epsg.code()) {
        (epsg.code() - Zone::FIRST_CODE + 1).to_string()
    } else {
        format!("EPSG{}", epsg.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AoiDefinitionType {
    TileCodes,
    BoundaryFile,
}

/// 一筆向量要素
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Feature {
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry,
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn property_str(&self, key: &str) -> Option<String> {
        self.properties.get(key).and_then(|value| match value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureSet {
    /// 未宣告時為 None
    pub crs: Option<Epsg>,
    pub features: Vec<Feature>,
}

impl FeatureSet {
    pub fn new(crs: Option<Epsg>, features: Vec<Feature>) -> Self {
        Self { crs, features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// 索引圖層中的一列
#[derive(Debug, Clone, PartialEq)]
pub struct TileIndexRecord {
    pub code: String,
    pub geometry: Geometry<f64>,
    pub crs: Epsg,
    pub url: Option<String>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// 子圖幅清單中的一筆
#[derive(Debug, Clone, PartialEq)]
pub struct SubTile {
    pub code: String,
    pub url: Option<String>,
    pub geometry: Geometry<f64>,
    pub crs: Epsg,
}

impl From<TileIndexRecord> for SubTile {
    fn from(record: TileIndexRecord) -> Self {
        Self {
            code: record.code,
            url: record.url,
            geometry: record.geometry,
            crs: record.crs,
        }
    }
}

/// 已完成解析的研究範圍，建立後不可變
#[derive(Debug, Clone)]
pub struct Aoi {
    pub(crate) definition_type: AoiDefinitionType,
    pub(crate) input_references: Vec<String>,
    pub(crate) base_geometry: MultiPolygon<f64>,
    pub(crate) base_crs: Epsg,
    pub(crate) bounds: Bounds,
    pub(crate) target_zone: Zone,
    pub(crate) projected_geometry: MultiPolygon<f64>,
    pub(crate) sub_tiles: Vec<SubTile>,
    pub(crate) display_name: String,
}

impl Aoi {
    pub fn definition_type(&self) -> AoiDefinitionType {
        self.definition_type
    }

    pub fn input_references(&self) -> &[String] {
        &self.input_references
    }

    pub fn base_geometry(&self) -> &MultiPolygon<f64> {
        &self.base_geometry
    }

    pub fn base_crs(&self) -> Epsg {
        self.base_crs
    }

    /// 經緯度範圍 (EPSG:4326)
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn target_zone(&self) -> Zone {
        self.target_zone
    }

    pub fn projected_geometry(&self) -> &MultiPolygon<f64> {
        &self.projected_geometry
    }

    pub fn sub_tiles(&self) -> &[SubTile] {
        &self.sub_tiles
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceStatus {
    FetchFailed,
    ProcessingFailed,
    SkippedDisabled,
    SuccessEmpty,
    Success,
    IndexHandled,
}

impl SourceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SourceStatus::FetchFailed => "Fetch failed",
            SourceStatus::ProcessingFailed => "Processing failed",
            SourceStatus::SkippedDisabled => "Skipped (disabled)",
            SourceStatus::SuccessEmpty => "Success (no data in AOI)",
            SourceStatus::Success => "Success",
            SourceStatus::IndexHandled => "Index (handled)",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SourceStatus::FetchFailed | SourceStatus::ProcessingFailed)
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 資料源的識別資訊，由設定檔而來
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub priority: i64,
    pub output_layer_name: String,
    pub declaration_index: usize,
}

/// 每個資料源處理後的結果紀錄
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcome {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub enabled: bool,
    pub status: SourceStatus,
    pub raw_count: usize,
    pub final_count: usize,
    pub priority: i64,
}

impl SourceOutcome {
    pub fn new(descriptor: &SourceDescriptor, enabled: bool, status: SourceStatus) -> Self {
        Self {
            id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            kind: descriptor.kind.clone(),
            enabled,
            status,
            raw_count: 0,
            final_count: 0,
            priority: descriptor.priority,
        }
    }

    pub fn with_counts(mut self, raw_count: usize, final_count: usize) -> Self {
        self.raw_count = raw_count;
        self.final_count = final_count;
        self
    }
}

/// 資料源需要的抓取參數
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchNeeds {
    Aoi,
    Bounds,
}

pub enum FetchContext<'a> {
    Aoi(&'a Aoi),
    Bounds(Bounds),
}

impl FetchContext<'_> {
    pub fn bounds(&self) -> Bounds {
        match self {
            FetchContext::Aoi(aoi) => aoi.bounds(),
            FetchContext::Bounds(bounds) => *bounds,
        }
    }

    pub fn sub_tiles(&self) -> &[SubTile] {
        match self {
            FetchContext::Aoi(aoi) => aoi.sub_tiles(),
            FetchContext::Bounds(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    VectorFile(PathBuf),
    RasterFiles(Vec<PathBuf>),
    AoiIndexHandled,
    NoData,
}

/// 影像類資料源的輸出需求
#[derive(Debug, Clone, PartialEq)]
pub struct RasterProducts {
    pub hillshade: bool,
    /// 單一圖幅時使用的檔名前綴 (例如 "MNT_")
    pub single_tile_prefix: Option<String>,
}
