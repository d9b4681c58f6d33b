use crate::domain::model::{Epsg, Feature, FeatureSet};
use crate::utils::error::{EtlError, Result};
use geojson::{FeatureCollection, GeoJson, JsonObject};
use std::path::Path;

/// 從 GeoJSON 文字解析要素；未宣告 crs 時回傳 None
pub fn parse_feature_collection(content: &str) -> Result<FeatureSet> {
    let geojson: GeoJson = content.parse()?;

    let (crs, raw_features) = match geojson {
        GeoJson::FeatureCollection(collection) => {
            let crs = collection.foreign_members.as_ref().and_then(declared_crs);
            (crs, collection.features)
        }
        GeoJson::Feature(feature) => (None, vec![feature]),
        GeoJson::Geometry(geometry) => (
            None,
            vec![geojson::Feature {
                bbox: None,
                geometry: Some(geometry),
                id: None,
                properties: None,
                foreign_members: None,
            }],
        ),
    };

    let mut features = Vec::with_capacity(raw_features.len());
    for feature in raw_features {
        let Some(geometry) = feature.geometry else {
            tracing::debug!("Skipping GeoJSON feature without geometry");
            continue;
        };
        let geometry = geo::Geometry::<f64>::try_from(geometry.value)?;
        features.push(Feature {
            geometry,
            properties: feature.properties.unwrap_or_default(),
        });
    }

    Ok(FeatureSet::new(crs, features))
}

pub fn read_feature_collection(path: &Path) -> Result<FeatureSet> {
    let content = std::fs::read_to_string(path)?;
    parse_feature_collection(&content)
}

fn declared_crs(members: &JsonObject) -> Option<Epsg> {
    members
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?
        .parse()
        .ok()
}

pub fn write_feature_collection(path: &Path, features: &FeatureSet) -> Result<()> {
    let mut foreign_members = JsonObject::new();
    if let Some(crs) = features.crs {
        foreign_members.insert(
            "crs".to_string(),
            serde_json::json!({
                "type": "name",
                "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", crs.code()) }
            }),
        );
    }

    let collection = FeatureCollection {
        bbox: None,
        features: features
            .features
            .iter()
            .map(|feature| geojson::Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&feature.geometry))),
                id: None,
                properties: Some(feature.properties.clone()),
                foreign_members: None,
            })
            .collect(),
        foreign_members: if foreign_members.is_empty() {
            None
        } else {
            Some(foreign_members)
        },
    };

    let body = serde_json::to_string(&collection)?;
    std::fs::write(path, body).map_err(EtlError::IoError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Geometry, Point};
    use tempfile::TempDir;

    #[test]
    fn test_parse_collection_with_crs_member() {
        let content = r#"{
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32198"}},
            "features": [
                {"type": "Feature", "properties": {"feuillet": "21L14NE"},
                 "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}},
                {"type": "Feature", "properties": {}, "geometry": null}
            ]
        }"#;

        let set = parse_feature_collection(content).unwrap();
        assert_eq!(set.crs, Some(Epsg(32198)));
        assert_eq!(set.len(), 1);
        assert_eq!(set.features[0].property_str("feuillet").as_deref(), Some("21L14NE"));
    }

    #[test]
    fn test_write_then_read_keeps_crs_and_properties() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("temp_wfs_roads.geojson");
        let set = FeatureSet::new(
            Some(Epsg(32188)),
            vec![Feature::new(Geometry::Point(Point::new(300000.0, 5000000.0))).with_property("name", "A")],
        );

        write_feature_collection(&path, &set).unwrap();
        let back = read_feature_collection(&path).unwrap();
        assert_eq!(back.crs, Some(Epsg(32188)));
        assert_eq!(back.features[0].property_str("name").as_deref(), Some("A"));
    }

    #[test]
    fn test_collection_without_crs_reports_none() {
        let content = r#"{"type": "FeatureCollection", "features": []}"#;
        assert_eq!(parse_feature_collection(content).unwrap().crs, None);
    }
}
