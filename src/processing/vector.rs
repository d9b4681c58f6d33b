use crate::domain::model::{Epsg, Feature, FeatureSet, Zone};
use crate::domain::ports::{FeatureReader, GeometryEngine, LayerWriter};
use crate::utils::error::{EtlError, Result};
use geo::{Geometry, MultiPolygon};
use serde_json::Map;
use std::collections::HashSet;
use std::path::Path;

/// 正規化結果；計數與成功與否無關，一律回報
#[derive(Debug)]
pub struct NormalizeReport {
    pub ok: bool,
    pub raw_count: usize,
    pub final_count: usize,
    pub error: Option<EtlError>,
}

impl NormalizeReport {
    fn success(raw_count: usize, final_count: usize) -> Self {
        Self {
            ok: true,
            raw_count,
            final_count,
            error: None,
        }
    }

    fn failure(raw_count: usize, final_count: usize, error: EtlError) -> Self {
        Self {
            ok: false,
            raw_count,
            final_count,
            error: Some(error),
        }
    }
}

/// 寫入合併輸出的目標圖層
#[derive(Debug, Clone, Copy)]
pub struct LayerTarget<'a> {
    pub source_id: &'a str,
    pub layer: &'a str,
    pub aoi: &'a MultiPolygon<f64>,
    pub zone: Zone,
}

pub struct VectorNormalizer<'a> {
    reader: &'a dyn FeatureReader,
    engine: &'a dyn GeometryEngine,
}

impl<'a> VectorNormalizer<'a> {
    pub fn new(reader: &'a dyn FeatureReader, engine: &'a dyn GeometryEngine) -> Self {
        Self { reader, engine }
    }

    /// 讀取、投影、裁切並寫入合併輸出
    pub fn normalize(&self, file: &Path, target: &LayerTarget<'_>, store: &mut dyn LayerWriter) -> NormalizeReport {
        let processing_error = |message: String| EtlError::SourceProcessingError {
            source_id: target.source_id.to_string(),
            message,
        };

        let set = match self.reader.read_layer(file, None) {
            Ok(set) => set,
            Err(e) => {
                return NormalizeReport::failure(
                    0,
                    0,
                    processing_error(format!("cannot read {}: {}", file.display(), e)),
                )
            }
        };
        let raw_count = set.len();

        let features = match self.reproject(set, target.zone) {
            Ok(features) => features,
            Err(e) => return NormalizeReport::failure(raw_count, 0, processing_error(e.to_string())),
        };

        let aoi = self.valid_aoi(target.aoi);
        let clipped = match self.clip_all(&features, &aoi) {
            Ok(clipped) => clipped,
            Err(first) => {
                tracing::warn!(
                    "⚠️ [{}] Clip failed ({}), repairing geometries and retrying",
                    target.source_id,
                    first
                );
                let repaired: Vec<Feature> = features
                    .into_iter()
                    .map(|feature| Feature {
                        geometry: self.engine.make_valid(&feature.geometry),
                        properties: feature.properties,
                    })
                    .collect();
                match self.clip_all(&repaired, &aoi) {
                    Ok(clipped) => clipped,
                    Err(second) => {
                        return NormalizeReport::failure(
                            raw_count,
                            0,
                            processing_error(format!("clip failed after repair: {}", second)),
                        )
                    }
                }
            }
        };

        let final_count = clipped.len();
        tracing::info!(
            "✂️ [{}] {} -> {} feature(s) after clip",
            target.source_id,
            raw_count,
            final_count
        );
        if clipped.is_empty() {
            return NormalizeReport::success(raw_count, 0);
        }

        let sanitized: Vec<Feature> = clipped
            .into_iter()
            .map(|feature| Feature {
                geometry: feature.geometry,
                properties: sanitize_properties(feature.properties),
            })
            .collect();
        let output = FeatureSet::new(Some(target.zone.epsg()), sanitized);
        match store.write_layer(target.layer, &output, target.zone.epsg()) {
            Ok(written) => {
                tracing::info!("💾 [{}] Layer '{}' written ({} features)", target.source_id, target.layer, written);
                NormalizeReport::success(raw_count, final_count)
            }
            Err(e) => NormalizeReport::failure(
                raw_count,
                final_count,
                EtlError::WriteError {
                    layer: target.layer.to_string(),
                    message: e.to_string(),
                },
            ),
        }
    }

    fn reproject(&self, set: FeatureSet, zone: Zone) -> Result<Vec<Feature>> {
        let source_crs = set.crs.unwrap_or_else(|| {
            tracing::debug!("No CRS declared, assuming {}", Epsg::WGS84);
            Epsg::WGS84
        });
        if source_crs == zone.epsg() {
            return Ok(set.features);
        }
        set.features
            .into_iter()
            .map(|feature| {
                Ok(Feature {
                    geometry: self.engine.reproject(&feature.geometry, source_crs, zone.epsg())?,
                    properties: feature.properties,
                })
            })
            .collect()
    }

    fn valid_aoi(&self, aoi: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        let wrapped = Geometry::MultiPolygon(aoi.clone());
        if self.engine.is_valid(&wrapped) {
            return aoi.clone();
        }
        tracing::warn!("⚠️ AOI geometry invalid before clip, repairing");
        match self.engine.make_valid(&wrapped) {
            Geometry::MultiPolygon(repaired) => repaired,
            Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
            _ => aoi.clone(),
        }
    }

    fn clip_all(&self, features: &[Feature], aoi: &MultiPolygon<f64>) -> Result<Vec<Feature>> {
        let mut clipped = Vec::with_capacity(features.len());
        for feature in features {
            if let Some(geometry) = self.engine.clip(&feature.geometry, aoi)? {
                clipped.push(Feature {
                    geometry,
                    properties: feature.properties.clone(),
                });
            }
        }
        Ok(clipped)
    }
}

/// 輸出庫不接受的欄位字元
pub fn sanitize_field_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .filter(|c| *c != '.' && *c != ':')
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    match cleaned.to_ascii_lowercase().as_str() {
        "" => "field".to_string(),
        "fid" | "geom" => format!("src_{}", cleaned),
        _ => cleaned,
    }
}

/// 欄位名稱不分大小寫，重複時加上 `_n`
fn sanitize_properties(properties: Map<String, serde_json::Value>) -> Map<String, serde_json::Value> {
    let mut sanitized = Map::with_capacity(properties.len());
    let mut taken: HashSet<String> = HashSet::with_capacity(properties.len());
    for (key, value) in properties {
        let base = sanitize_field_name(&key);
        let mut name = base.clone();
        let mut n = 1;
        while taken.contains(&name.to_lowercase()) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        taken.insert(name.to_lowercase());
        sanitized.insert(name, value);
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::geo_engine::GeoEngine;
    use crate::adapters::geojson_io::write_feature_collection;
    use crate::adapters::geopackage::GeoPackage;
    use crate::adapters::VectorFileReader;
    use geo::{polygon, Polygon};
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryStore {
        layers: Vec<(String, FeatureSet)>,
        fail: bool,
    }

    impl LayerWriter for MemoryStore {
        fn write_layer(&mut self, name: &str, features: &FeatureSet, _crs: Epsg) -> Result<usize> {
            if self.fail {
                return Err(EtlError::WriteError {
                    layer: name.to_string(),
                    message: "disk full".to_string(),
                });
            }
            self.layers.retain(|(layer, _)| layer != name);
            self.layers.push((name.to_string(), features.clone()));
            Ok(features.len())
        }

        fn layer_names(&self) -> Result<Vec<String>> {
            Ok(self.layers.iter().map(|(name, _)| name.clone()).collect())
        }
    }

    fn zone() -> Zone {
        Zone::from_epsg(Epsg(32187)).unwrap()
    }

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![(x: x, y: y), (x: x + size, y: y), (x: x + size, y: y + size), (x: x, y: y + size), (x: x, y: y)]
    }

    fn aoi() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![square(300_000.0, 5_100_000.0, 1_000.0)])
    }

    fn write_input(dir: &TempDir, features: Vec<Feature>) -> std::path::PathBuf {
        let path = dir.path().join("input.geojson");
        write_feature_collection(&path, &FeatureSet::new(Some(Epsg(32187)), features)).unwrap();
        path
    }

    #[test]
    fn test_features_inside_aoi_keep_their_count() {
        let dir = TempDir::new().unwrap();
        let inside: Vec<Feature> = (0..3)
            .map(|i| {
                Feature::new(Geometry::Polygon(square(300_100.0 + 200.0 * i as f64, 5_100_100.0, 100.0)))
                    .with_property("rank", i)
            })
            .collect();
        let path = write_input(&dir, inside);

        let engine = GeoEngine::new();
        let normalizer = VectorNormalizer::new(&VectorFileReader, &engine);
        let aoi = aoi();
        let target = LayerTarget {
            source_id: "parcels",
            layer: "parcels",
            aoi: &aoi,
            zone: zone(),
        };
        let mut store = MemoryStore::default();
        let report = normalizer.normalize(&path, &target, &mut store);
        assert!(report.ok);
        assert_eq!(report.raw_count, 3);
        assert_eq!(report.final_count, 3);
        assert_eq!(store.layer_names().unwrap(), vec!["parcels"]);
    }

    #[test]
    fn test_invalid_feature_is_repaired_and_retried() {
        let dir = TempDir::new().unwrap();
        let bowtie = polygon![
            (x: 300_100.0, y: 5_100_100.0), (x: 300_400.0, y: 5_100_400.0),
            (x: 300_400.0, y: 5_100_100.0), (x: 300_100.0, y: 5_100_400.0),
            (x: 300_100.0, y: 5_100_100.0)
        ];
        let path = write_input(&dir, vec![Feature::new(Geometry::Polygon(bowtie))]);

        let engine = GeoEngine::new();
        let normalizer = VectorNormalizer::new(&VectorFileReader, &engine);
        let aoi = aoi();
        let target = LayerTarget {
            source_id: "wetlands",
            layer: "wetlands",
            aoi: &aoi,
            zone: zone(),
        };
        let mut store = MemoryStore::default();
        let report = normalizer.normalize(&path, &target, &mut store);
        assert!(report.ok, "{:?}", report.error);
        assert_eq!(report.raw_count, 1);
    }

    #[test]
    fn test_write_failure_keeps_counts() {
        let dir = TempDir::new().unwrap();
        let path = write_input(
            &dir,
            vec![
                Feature::new(Geometry::Polygon(square(300_100.0, 5_100_100.0, 100.0))),
                Feature::new(Geometry::Polygon(square(400_000.0, 5_200_000.0, 100.0))),
            ],
        );
        let engine = GeoEngine::new();
        let normalizer = VectorNormalizer::new(&VectorFileReader, &engine);
        let aoi = aoi();
        let target = LayerTarget {
            source_id: "roads",
            layer: "roads",
            aoi: &aoi,
            zone: zone(),
        };
        let mut store = MemoryStore {
            fail: true,
            ..Default::default()
        };
        let report = normalizer.normalize(&path, &target, &mut store);
        assert!(!report.ok);
        assert_eq!((report.raw_count, report.final_count), (2, 1));
        assert!(matches!(report.error, Some(EtlError::WriteError { .. })));
    }

    #[test]
    fn test_sanitize_field_names() {
        assert_eq!(sanitize_field_name("Nom du lac"), "Nom_du_lac");
        assert_eq!(sanitize_field_name("gml:id"), "gmlid");
        assert_eq!(sanitize_field_name("area.km2"), "areakm2");
        assert_eq!(sanitize_field_name("FID"), "src_FID");

        let mut props = Map::new();
        props.insert("a.b".to_string(), 1.into());
        props.insert("ab".to_string(), 2.into());
        let sanitized = sanitize_properties(props);
        assert_eq!(sanitized.len(), 2);
    }

    #[test]
    fn test_field_names_differing_only_by_case_are_renamed() {
        let mut props = Map::new();
        props.insert("Name".to_string(), "a".into());
        props.insert("NAME".to_string(), "b".into());
        props.insert("name".to_string(), "c".into());
        let sanitized = sanitize_properties(props);

        let lowered: HashSet<String> = sanitized.keys().map(|k| k.to_lowercase()).collect();
        assert_eq!(sanitized.len(), 3);
        assert_eq!(lowered.len(), 3);
    }

    #[test]
    fn test_case_clashing_fields_are_written_to_geopackage() {
        let dir = TempDir::new().unwrap();
        let path = write_input(
            &dir,
            vec![Feature::new(Geometry::Polygon(square(300_100.0, 5_100_100.0, 100.0)))
                .with_property("Name", "Route 155")
                .with_property("NAME", "R155")],
        );
        let engine = GeoEngine::new();
        let normalizer = VectorNormalizer::new(&VectorFileReader, &engine);
        let aoi = aoi();
        let target = LayerTarget {
            source_id: "roads",
            layer: "roads",
            aoi: &aoi,
            zone: zone(),
        };
        let mut store = GeoPackage::create(&dir.path().join("combined.gpkg")).unwrap();
        let report = normalizer.normalize(&path, &target, &mut store);
        assert!(report.ok, "{:?}", report.error);

        let written = store.read_layer("roads").unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written.features[0].properties.len(), 2);
    }

    /// 裁切永遠回報拓撲錯誤的引擎
    struct BrokenClipEngine(GeoEngine);

    impl GeometryEngine for BrokenClipEngine {
        fn reproject(&self, geometry: &Geometry<f64>, from: Epsg, to: Epsg) -> Result<Geometry<f64>> {
            self.0.reproject(geometry, from, to)
        }

        fn union(&self, geometries: &[Geometry<f64>]) -> MultiPolygon<f64> {
            self.0.union(geometries)
        }

        fn is_valid(&self, geometry: &Geometry<f64>) -> bool {
            self.0.is_valid(geometry)
        }

        fn make_valid(&self, geometry: &Geometry<f64>) -> Geometry<f64> {
            self.0.make_valid(geometry)
        }

        fn intersects(&self, a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
            self.0.intersects(a, b)
        }

        fn clip(&self, _geometry: &Geometry<f64>, _mask: &MultiPolygon<f64>) -> Result<Option<Geometry<f64>>> {
            Err(EtlError::GeometryError {
                message: "TopologyException: side location conflict".to_string(),
            })
        }

        fn bounds(&self, geometry: &Geometry<f64>) -> Option<crate::domain::model::Bounds> {
            self.0.bounds(geometry)
        }
    }

    #[test]
    fn test_second_clip_failure_fails_the_source_only() {
        let dir = TempDir::new().unwrap();
        let path = write_input(
            &dir,
            vec![
                Feature::new(Geometry::Polygon(square(300_100.0, 5_100_100.0, 100.0))),
                Feature::new(Geometry::Polygon(square(300_300.0, 5_100_300.0, 100.0))),
            ],
        );
        let engine = BrokenClipEngine(GeoEngine::new());
        let normalizer = VectorNormalizer::new(&VectorFileReader, &engine);
        let aoi = aoi();
        let target = LayerTarget {
            source_id: "wetlands",
            layer: "wetlands",
            aoi: &aoi,
            zone: zone(),
        };
        let mut store = MemoryStore::default();
        let report = normalizer.normalize(&path, &target, &mut store);

        assert!(!report.ok);
        assert_eq!((report.raw_count, report.final_count), (2, 0));
        assert!(matches!(report.error, Some(EtlError::SourceProcessingError { .. })));
        assert!(store.layer_names().unwrap().is_empty());
    }
}
