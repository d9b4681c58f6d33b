#![allow(dead_code)]

use aoi_etl::adapters::geojson_io::write_feature_collection;
use aoi_etl::domain::model::{Epsg, Feature, FeatureSet, Zone};
use aoi_etl::domain::ports::RasterEngine;
use aoi_etl::{EtlError, Result, RunConfig};
use geo::{point, polygon, Geometry, MultiPolygon, Polygon};
use std::path::{Path, PathBuf};

pub const CELL: f64 = 0.25;

pub fn cell(x: f64, y: f64) -> Polygon<f64> {
    polygon![
        (x: x, y: y), (x: x + CELL, y: y), (x: x + CELL, y: y + CELL), (x: x, y: y + CELL), (x: x, y: y)
    ]
}

/// 21L14 的四個子圖幅 (2x2)，另有遠處的 31H05NE
pub fn write_tile_index(dir: &Path, with_urls: bool) -> PathBuf {
    let row = |code: &str, x: f64, y: f64| {
        let feature = Feature::new(Geometry::Polygon(cell(x, y))).with_property("feuillet", code);
        if with_urls {
            feature.with_property("lidar_url", format!("https://tiles.invalid/MNT_{}.tif", code))
        } else {
            feature
        }
    };
    let path = dir.join("tile_index.geojson");
    write_feature_collection(
        &path,
        &FeatureSet::new(
            Some(Epsg::WGS84),
            vec![
                row("21L14NO", -72.0, 46.25),
                row("21L14NE", -71.75, 46.25),
                row("21L14SO", -72.0, 46.0),
                row("21L14SE", -71.75, 46.0),
                row("31H05NE", -73.25, 45.25),
            ],
        ),
    )
    .unwrap();
    path
}

pub fn write_boundary(dir: &Path, name: &str, polygon: Polygon<f64>) -> PathBuf {
    let path = dir.join(name);
    write_feature_collection(
        &path,
        &FeatureSet::new(Some(Epsg::WGS84), vec![Feature::new(Geometry::Polygon(polygon))]),
    )
    .unwrap();
    path
}

/// AOI 內外各有要素的點圖層
pub fn write_points(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    write_feature_collection(
        &path,
        &FeatureSet::new(
            Some(Epsg::WGS84),
            vec![
                Feature::new(Geometry::Point(point!(x: -71.6, y: 46.4))).with_property("name", "inside"),
                Feature::new(Geometry::Point(point!(x: -71.9, y: 46.1))).with_property("name", "inside too"),
                Feature::new(Geometry::Point(point!(x: -60.0, y: 50.0))).with_property("name", "far away"),
            ],
        ),
    )
    .unwrap();
    path
}

pub fn run_config(output_dir: &Path, aoi_section: &str, tile_index: &Path, datasources: &str) -> RunConfig {
    let toml_src = format!(
        r#"
[project]
id = "TEST"
output_dir = "{output}"
generate_project = false

{aoi}

[tile_index]
path = "{index}"
layer = "tile_index"
crs = 4326

{datasources}
"#,
        output = output_dir.display(),
        aoi = aoi_section,
        index = tile_index.display(),
        datasources = datasources,
    );
    RunConfig::from_toml_str(&toml_src).unwrap()
}

pub fn area(geometry: &MultiPolygon<f64>) -> f64 {
    use geo::Area;
    geometry.unsigned_area()
}

/// 記錄呼叫但不產生影像的影像引擎
#[derive(Default)]
pub struct NoopRaster;

impl RasterEngine for NoopRaster {
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        if inputs.is_empty() {
            return Err(EtlError::RasterEngineError {
                message: "nothing to merge".to_string(),
            });
        }
        std::fs::write(output, b"mosaic")?;
        Ok(())
    }

    fn reproject(&self, _input: &Path, _target: Zone, output: &Path) -> Result<()> {
        std::fs::write(output, b"warped")?;
        Ok(())
    }

    fn clip(&self, _input: &Path, _mask: &MultiPolygon<f64>, _mask_crs: Epsg, output: &Path) -> Result<()> {
        std::fs::write(output, b"clipped")?;
        Ok(())
    }

    fn hillshade(&self, _input: &Path, output: &Path) -> Result<()> {
        std::fs::write(output, b"shade")?;
        Ok(())
    }
}
