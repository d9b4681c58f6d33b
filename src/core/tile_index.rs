use crate::config::TileIndexConfig;
use crate::domain::model::{Epsg, FeatureSet, TileIndexRecord};
use crate::domain::ports::{FeatureReader, GeometryEngine};
use crate::utils::error::{EtlError, Result};
use geo::{Geometry, MultiPolygon};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

/// 子圖幅方位後綴
pub const SUBTILE_SUFFIXES: [&str; 8] = ["NE", "NO", "NW", "NC", "SE", "SO", "SW", "SC"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileCode {
    /// 子圖幅，已正規化 (例如 "21L14NE")
    Child(String),
    /// 母圖幅前綴，已正規化 (例如 "21L14")
    Parent(String),
}

impl TileCode {
    pub fn normalized(&self) -> &str {
        match self {
            TileCode::Child(code) | TileCode::Parent(code) => code,
        }
    }
}

/// 圖幅代碼文法
#[derive(Debug, Clone)]
pub struct TileCodeGrammar {
    child: Regex,
    parent: Regex,
}

impl TileCodeGrammar {
    pub fn new() -> Result<Self> {
        let parent = r"\d{2}[A-Z]\d{2}|\d{3}[A-Z]\d{2}";
        let suffixes = SUBTILE_SUFFIXES.join("|");
        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| EtlError::TileIndexError {
                message: format!("invalid tile code pattern: {}", e),
            })
        };
        Ok(Self {
            child: compile(format!(r"^(?:{})(?:{})$", parent, suffixes))?,
            parent: compile(format!(r"^(?:{})$", parent))?,
        })
    }

    pub fn parse(&self, raw: &str) -> Option<TileCode> {
        let code = raw.trim().to_ascii_uppercase();
        if (7..=8).contains(&code.len()) && self.child.is_match(&code) {
            return Some(TileCode::Child(strip_padding(&code, 8)));
        }
        if self.parent.is_match(&code) {
            return Some(TileCode::Parent(strip_padding(&code, 6)));
        }
        None
    }

    /// 索引中的代碼也以相同規則正規化，無法解析時只轉大寫
    pub fn normalize(&self, raw: &str) -> String {
        match self.parse(raw) {
            Some(code) => code.normalized().to_string(),
            None => raw.trim().to_ascii_uppercase(),
        }
    }
}

fn strip_padding(code: &str, padded_len: usize) -> String {
    if code.len() == padded_len && code.starts_with('0') {
        code[1..].to_string()
    } else {
        code.to_string()
    }
}

/// 已載入記憶體的圖幅索引圖層
#[derive(Debug, Clone)]
pub struct TileIndex {
    records: Vec<TileIndexRecord>,
    normalized_codes: Vec<String>,
    crs: Epsg,
}

impl TileIndex {
    pub fn from_features(
        set: FeatureSet,
        code_column: &str,
        url_column: Option<&str>,
        assumed_crs: Epsg,
        grammar: &TileCodeGrammar,
    ) -> Result<Self> {
        let crs = match set.crs {
            Some(crs) => crs,
            None => {
                tracing::warn!("⚠️ Tile index declares no CRS, assuming {}", assumed_crs);
                assumed_crs
            }
        };

        let mut records = Vec::with_capacity(set.features.len());
        let mut normalized_codes = Vec::with_capacity(set.features.len());
        let mut skipped = 0usize;
        for feature in set.features {
            let Some(code) = feature.property_str(code_column) else {
                skipped += 1;
                continue;
            };
            let code = code.trim().to_string();
            normalized_codes.push(grammar.normalize(&code));
            records.push(TileIndexRecord {
                url: url_column.and_then(|column| feature.property_str(column)),
                code,
                geometry: feature.geometry,
                crs,
                attributes: feature.properties,
            });
        }

        if records.is_empty() && skipped > 0 {
            return Err(EtlError::TileIndexError {
                message: format!("no row carries the code column '{}'", code_column),
            });
        }
        if skipped > 0 {
            tracing::debug!("Skipped {} index rows without '{}'", skipped, code_column);
        }

        Ok(Self {
            records,
            normalized_codes,
            crs,
        })
    }

    pub fn load(
        reader: &dyn FeatureReader,
        path: &Path,
        layer: &str,
        code_column: &str,
        url_column: Option<&str>,
        assumed_crs: Epsg,
        grammar: &TileCodeGrammar,
    ) -> Result<Self> {
        let set = reader
            .read_layer(path, Some(layer))
            .map_err(|e| EtlError::TileIndexError {
                message: format!("cannot read '{}' from {}: {}", layer, path.display(), e),
            })?;
        tracing::debug!("Loaded {} rows from index layer '{}'", set.len(), layer);
        Self::from_features(set, code_column, url_column, assumed_crs, grammar)
    }

    pub fn crs(&self) -> Epsg {
        self.crs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn find_exact(&self, normalized: &str) -> Vec<TileIndexRecord> {
        self.select(|code| code == normalized)
    }

    /// 前綴包含掃描：只取下一層 (前綴長度 + 2)
    fn children_of(&self, prefix: &str) -> Vec<TileIndexRecord> {
        self.select(|code| code.starts_with(prefix) && code.len() == prefix.len() + 2)
    }

    fn select(&self, predicate: impl Fn(&str) -> bool) -> Vec<TileIndexRecord> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .zip(&self.normalized_codes)
            .filter(|(_, code)| predicate(code))
            .filter(|(_, code)| seen.insert(code.as_str()))
            .map(|(record, _)| record.clone())
            .collect()
    }

    fn intersecting(&self, geometry: &Geometry<f64>, engine: &dyn GeometryEngine) -> Vec<TileIndexRecord> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .zip(&self.normalized_codes)
            .filter(|(record, _)| engine.intersects(&record.geometry, geometry))
            .filter(|(_, code)| seen.insert(code.as_str()))
            .map(|(record, _)| record.clone())
            .collect()
    }
}

/// 單一代碼的查詢結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileMatch {
    pub fine: Vec<TileIndexRecord>,
    /// 細索引查無子圖幅時，由粗索引補上的母圖幅
    pub coarse: Vec<TileIndexRecord>,
}

impl TileMatch {
    pub fn is_empty(&self) -> bool {
        self.fine.is_empty() && self.coarse.is_empty()
    }
}

pub struct TileIndexResolver {
    grammar: TileCodeGrammar,
    fine: TileIndex,
    coarse: Option<TileIndex>,
}

impl TileIndexResolver {
    pub fn new(grammar: TileCodeGrammar, fine: TileIndex, coarse: Option<TileIndex>) -> Self {
        Self {
            grammar,
            fine,
            coarse,
        }
    }

    /// 依設定載入細索引與選用的粗索引
    pub fn load(reader: &dyn FeatureReader, config: &TileIndexConfig) -> Result<Self> {
        let grammar = TileCodeGrammar::new()?;
        let fine = TileIndex::load(
            reader,
            &config.path,
            &config.layer,
            &config.code_column,
            config.url_column.as_deref(),
            Epsg(config.crs),
            &grammar,
        )?;
        tracing::info!("🗂️ Fine tile index: {} rows ({})", fine.len(), fine.crs());

        let coarse = match &config.coarse {
            Some(coarse) => match TileIndex::load(
                reader,
                &coarse.path,
                &coarse.layer,
                &coarse.code_column,
                None,
                Epsg(coarse.crs),
                &grammar,
            ) {
                Ok(index) => Some(index),
                Err(e) => {
                    tracing::warn!("⚠️ Coarse tile index unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Self::new(grammar, fine, coarse))
    }

    pub fn grammar(&self) -> &TileCodeGrammar {
        &self.grammar
    }

    pub fn fine_crs(&self) -> Epsg {
        self.fine.crs()
    }

    pub fn resolve_code(&self, raw: &str) -> TileMatch {
        let Some(code) = self.grammar.parse(raw) else {
            tracing::warn!("⚠️ '{}' is not a recognised tile code", raw);
            return TileMatch::default();
        };

        let result = match &code {
            TileCode::Child(child) => TileMatch {
                fine: self.fine.find_exact(child),
                coarse: Vec::new(),
            },
            TileCode::Parent(prefix) => {
                let fine = self.fine.children_of(prefix);
                let coarse = match (&self.coarse, fine.is_empty()) {
                    (Some(index), true) => index.find_exact(prefix),
                    _ => Vec::new(),
                };
                TileMatch { fine, coarse }
            }
        };

        if result.is_empty() {
            tracing::warn!("⚠️ Tile code '{}' matched no index row", raw);
        } else {
            tracing::debug!(
                "Tile code '{}' -> {} fine / {} coarse rows",
                raw,
                result.fine.len(),
                result.coarse.len()
            );
        }
        result
    }

    /// 空間相交查詢 (邊界檔 AOI 使用)
    pub fn resolve_intersecting(
        &self,
        geometry: &MultiPolygon<f64>,
        geometry_crs: Epsg,
        engine: &dyn GeometryEngine,
    ) -> Result<Vec<TileIndexRecord>> {
        let in_index_crs = engine.reproject(
            &Geometry::MultiPolygon(geometry.clone()),
            geometry_crs,
            self.fine.crs(),
        )?;
        Ok(self.fine.intersecting(&in_index_crs, engine))
    }
}
