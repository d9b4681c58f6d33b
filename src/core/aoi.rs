use crate::config::{AoiConfig, ProjectionConfig, TileIndexConfig};
use crate::core::tile_index::TileIndexResolver;
use crate::core::zone::{resolve_override, select_zone, ZonePolicy};
use crate::domain::model::{Aoi, AoiDefinitionType, Bounds, Epsg, SubTile, Zone};
use crate::domain::ports::{FeatureReader, GeometryEngine};
use crate::utils::error::{EtlError, Result};
use geo::{Geometry, MultiPolygon};
use std::collections::HashSet;
use std::path::Path;

fn aoi_error(message: impl Into<String>) -> EtlError {
    EtlError::AoiResolutionError {
        message: message.into(),
    }
}

/// 定義完成、尚未決定投影分區的 AOI
#[derive(Debug, Clone)]
pub struct AoiDraft {
    definition_type: AoiDefinitionType,
    input_references: Vec<String>,
    base_geometry: MultiPolygon<f64>,
    base_crs: Epsg,
    bounds: Bounds,
    sub_tiles: Vec<SubTile>,
}

impl AoiDraft {
    pub fn definition_type(&self) -> AoiDefinitionType {
        self.definition_type
    }

    pub fn base_geometry(&self) -> &MultiPolygon<f64> {
        &self.base_geometry
    }

    pub fn base_crs(&self) -> Epsg {
        self.base_crs
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn sub_tiles(&self) -> &[SubTile] {
        &self.sub_tiles
    }

    /// 供輸出命名使用，不影響解析
    pub fn display_name(&self) -> String {
        display_name(self.definition_type, &self.input_references)
    }

    /// 決定投影分區並產生投影後幾何；相同輸入必得相同結果
    pub fn finalize(
        &self,
        engine: &dyn GeometryEngine,
        custom_zone: Option<&str>,
        policy: ZonePolicy,
    ) -> Result<Aoi> {
        if self.base_geometry.0.is_empty() || !self.bounds.is_valid() {
            return Err(aoi_error("base geometry or bounds are undefined"));
        }

        let zone = match resolve_override(custom_zone).or_else(|| select_zone(&self.bounds, policy)) {
            Some(zone) => zone,
            None => {
                tracing::warn!("⚠️ Zone could not be resolved, retrying from the geometry bounds");
                self.zone_from_geometry_bounds(engine, policy)?
            }
        };
        tracing::info!("📐 Target zone: {} (ZONE{})", zone, zone.short_name());

        let projected_geometry = if self.base_crs == zone.epsg() {
            self.base_geometry.clone()
        } else {
            let projected = engine
                .reproject(
                    &Geometry::MultiPolygon(self.base_geometry.clone()),
                    self.base_crs,
                    zone.epsg(),
                )
                .map_err(|e| aoi_error(format!("reprojection to {} failed: {}", zone, e)))?;
            into_multi_polygon(projected)
                .ok_or_else(|| aoi_error("reprojection did not yield a polygonal geometry"))?
        };

        let projected_geometry = ensure_valid(engine, projected_geometry)?;

        Ok(Aoi {
            display_name: self.display_name(),
            definition_type: self.definition_type,
            input_references: self.input_references.clone(),
            base_geometry: self.base_geometry.clone(),
            base_crs: self.base_crs,
            bounds: self.bounds,
            target_zone: zone,
            projected_geometry,
            sub_tiles: self.sub_tiles.clone(),
        })
    }

    fn zone_from_geometry_bounds(&self, engine: &dyn GeometryEngine, policy: ZonePolicy) -> Result<Zone> {
        let geographic = engine
            .reproject(
                &Geometry::MultiPolygon(self.base_geometry.clone()),
                self.base_crs,
                Epsg::WGS84,
            )
            .map_err(|e| aoi_error(format!("bounds recomputation failed: {}", e)))?;
        let bounds = engine
            .bounds(&geographic)
            .ok_or_else(|| aoi_error("AOI geometry has no extent"))?;
        select_zone(&bounds, policy).ok_or_else(|| {
            aoi_error(format!(
                "AOI centred at longitude {:.3} lies outside every supported zone",
                bounds.center_x()
            ))
        })
    }
}

fn into_multi_polygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::MultiPolygon(multi) => Some(multi),
        Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon])),
        _ => None,
    }
}

fn ensure_valid(engine: &dyn GeometryEngine, geometry: MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
    if geometry.0.is_empty() {
        return Err(aoi_error("projected geometry is empty"));
    }
    let wrapped = Geometry::MultiPolygon(geometry);
    if engine.is_valid(&wrapped) {
        return into_multi_polygon(wrapped).ok_or_else(|| aoi_error("projected geometry is not polygonal"));
    }

    tracing::warn!("⚠️ Projected AOI geometry is invalid, repairing");
    let repaired = engine.make_valid(&wrapped);
    if !engine.is_valid(&repaired) {
        return Err(aoi_error("projected geometry is invalid and could not be repaired"));
    }
    into_multi_polygon(repaired)
        .filter(|multi| !multi.0.is_empty())
        .ok_or_else(|| aoi_error("projected geometry is empty after repair"))
}

pub fn display_name(definition_type: AoiDefinitionType, references: &[String]) -> String {
    match definition_type {
        AoiDefinitionType::TileCodes => match references {
            [] => "unknown_aoi".to_string(),
            [single] => single.replace('/', "_"),
            [first, rest @ ..] => format!("{}_and_{}_others", first.replace('/', "_"), rest.len()),
        },
        AoiDefinitionType::BoundaryFile => references
            .first()
            .and_then(|path| Path::new(path).file_stem())
            .and_then(|stem| stem.to_str())
            .map(|stem| stem.replace(' ', "_"))
            .unwrap_or_else(|| "unknown_aoi".to_string()),
    }
}

/// 由設定解析 AOI
pub struct AoiResolver<'a> {
    engine: &'a dyn GeometryEngine,
    reader: &'a dyn FeatureReader,
    tile_index: Option<&'a TileIndexConfig>,
}

impl<'a> AoiResolver<'a> {
    pub fn new(
        engine: &'a dyn GeometryEngine,
        reader: &'a dyn FeatureReader,
        tile_index: Option<&'a TileIndexConfig>,
    ) -> Self {
        Self {
            engine,
            reader,
            tile_index,
        }
    }

    /// 定義並完成 AOI
    pub fn resolve(&self, aoi: &AoiConfig, projection: &ProjectionConfig) -> Result<Aoi> {
        let draft = self.define(aoi)?;
        draft.finalize(
            self.engine,
            projection.custom_zone.as_deref(),
            projection.zone_policy,
        )
    }

    pub fn define(&self, aoi: &AoiConfig) -> Result<AoiDraft> {
        match aoi {
            AoiConfig::TileCodes(codes) => self.define_from_tile_codes(codes),
            AoiConfig::BoundaryFile(path) => self.define_from_boundary_file(path),
        }
    }

    fn load_index(&self) -> Result<TileIndexResolver> {
        let config = self
            .tile_index
            .ok_or_else(|| aoi_error("tile codes require a [tile_index] section"))?;
        TileIndexResolver::load(self.reader, config)
    }

    pub fn define_from_tile_codes(&self, codes: &[String]) -> Result<AoiDraft> {
        let index = self
            .load_index()
            .map_err(|e| aoi_error(format!("tile index unavailable: {}", e)))?;
        self.define_with_index(&index, codes)
    }

    pub fn define_with_index(&self, index: &TileIndexResolver, codes: &[String]) -> Result<AoiDraft> {
        let references: Vec<String> = codes
            .iter()
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .collect();
        if references.is_empty() {
            return Err(aoi_error("no tile code given"));
        }

        let union_crs = index.fine_crs();
        let mut geometries = Vec::new();
        let mut sub_tiles: Vec<SubTile> = Vec::new();
        let mut seen = HashSet::new();

        for code in &references {
            let matched = index.resolve_code(code);
            for record in matched.fine {
                if seen.insert(index.grammar().normalize(&record.code)) {
                    geometries.push(self.to_crs(&record.geometry, record.crs, union_crs)?);
                    sub_tiles.push(record.into());
                }
            }
            for record in matched.coarse {
                geometries.push(self.to_crs(&record.geometry, record.crs, union_crs)?);
            }
        }

        if geometries.is_empty() {
            return Err(aoi_error(format!(
                "none of the tile codes [{}] matched the tile index",
                references.join(", ")
            )));
        }

        let base_geometry = self.engine.union(&geometries);
        if base_geometry.0.is_empty() {
            return Err(aoi_error("union of the matched tiles is empty"));
        }
        let bounds = self.geographic_bounds(&base_geometry, union_crs)?;
        tracing::info!(
            "🧩 {} tile code(s) -> {} sub-tile(s), bounds [{:.4}, {:.4}, {:.4}, {:.4}]",
            references.len(),
            sub_tiles.len(),
            bounds.min_x,
            bounds.min_y,
            bounds.max_x,
            bounds.max_y
        );

        Ok(AoiDraft {
            definition_type: AoiDefinitionType::TileCodes,
            input_references: references,
            base_geometry,
            base_crs: union_crs,
            bounds,
            sub_tiles,
        })
    }

    pub fn define_from_boundary_file(&self, path: &Path) -> Result<AoiDraft> {
        let set = self
            .reader
            .read_layer(path, None)
            .map_err(|e| aoi_error(format!("cannot read boundary file {}: {}", path.display(), e)))?;
        if set.is_empty() {
            return Err(aoi_error(format!("boundary file {} has no geometry", path.display())));
        }
        let native_crs = set.crs.unwrap_or_else(|| {
            tracing::warn!("⚠️ Boundary file declares no CRS, assuming {}", Epsg::WGS84);
            Epsg::WGS84
        });

        let geometries: Vec<Geometry<f64>> = set.features.into_iter().map(|f| f.geometry).collect();
        let native_union = self.engine.union(&geometries);
        if native_union.0.is_empty() {
            return Err(aoi_error("boundary file contains no polygon"));
        }

        let projected = self.to_crs(&Geometry::MultiPolygon(native_union), native_crs, Epsg::WGS84)?;
        let base_geometry =
            into_multi_polygon(projected).ok_or_else(|| aoi_error("boundary reprojection failed"))?;
        let bounds = self.geographic_bounds(&base_geometry, Epsg::WGS84)?;

        // 子圖幅清單為盡力而為，失敗時保持空白
        let sub_tiles = match self.tile_index {
            Some(_) => match self
                .load_index()
                .and_then(|index| index.resolve_intersecting(&base_geometry, Epsg::WGS84, self.engine))
            {
                Ok(records) => records.into_iter().map(SubTile::from).collect(),
                Err(e) => {
                    tracing::warn!("⚠️ Sub-tile manifest unavailable for boundary AOI: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        tracing::info!(
            "🧭 Boundary {} -> {} sub-tile(s) intersecting",
            path.display(),
            sub_tiles.len()
        );

        Ok(AoiDraft {
            definition_type: AoiDefinitionType::BoundaryFile,
            input_references: vec![path.to_string_lossy().into_owned()],
            base_geometry,
            base_crs: Epsg::WGS84,
            bounds,
            sub_tiles,
        })
    }

    /// 定義階段的投影失敗一律視為 AOI 解析失敗
    fn to_crs(&self, geometry: &Geometry<f64>, from: Epsg, to: Epsg) -> Result<Geometry<f64>> {
        self.engine
            .reproject(geometry, from, to)
            .map_err(|e| aoi_error(format!("cannot reproject AOI geometry from {} to {}: {}", from, to, e)))
    }

    fn geographic_bounds(&self, geometry: &MultiPolygon<f64>, crs: Epsg) -> Result<Bounds> {
        let geographic = self.to_crs(&Geometry::MultiPolygon(geometry.clone()), crs, Epsg::WGS84)?;
        self.engine
            .bounds(&geographic)
            .filter(Bounds::is_valid)
            .ok_or_else(|| aoi_error("AOI bounds could not be computed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(
            display_name(AoiDefinitionType::TileCodes, &["21L14NE".to_string()]),
            "21L14NE"
        );
        assert_eq!(
            display_name(
                AoiDefinitionType::TileCodes,
                &["21L14NE".to_string(), "21L14NO".to_string(), "21L14SE".to_string()]
            ),
            "21L14NE_and_2_others"
        );
        assert_eq!(
            display_name(AoiDefinitionType::TileCodes, &["a/b".to_string()]),
            "a_b"
        );
        assert_eq!(
            display_name(
                AoiDefinitionType::BoundaryFile,
                &["/data/Lac Saint Jean.geojson".to_string()]
            ),
            "Lac_Saint_Jean"
        );
        assert_eq!(display_name(AoiDefinitionType::BoundaryFile, &[]), "unknown_aoi");
    }
}
