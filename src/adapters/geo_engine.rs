//! Geometry engine backed by `geo` boolean operations and `proj4rs` with the
//! `crs-definitions` EPSG database.

use crate::domain::model::{Bounds, Epsg};
use crate::domain::ports::GeometryEngine;
use crate::utils::error::{EtlError, Result};
use geo::{
    BooleanOps, BoundingRect, Coord, Geometry, GeometryCollection, Intersects, LineString,
    MapCoords, MultiLineString, MultiPoint, MultiPolygon, Validation,
};
use proj4rs::proj::Proj;

#[derive(Debug, Default, Clone)]
pub struct GeoEngine;

impl GeoEngine {
    pub fn new() -> Self {
        Self
    }
}

/// PROJ4 definition for an EPSG code
pub fn proj_string(epsg: Epsg) -> Option<&'static str> {
    u16::try_from(epsg.code())
        .ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

pub fn is_geographic(epsg: Epsg) -> bool {
    match proj_string(epsg) {
        Some(definition) => definition.contains("+proj=longlat"),
        None => (4000..5000).contains(&epsg.code()),
    }
}

fn load_proj(epsg: Epsg) -> Result<Proj> {
    let definition = proj_string(epsg).ok_or_else(|| EtlError::ProjectionError {
        message: format!("{} is not in the EPSG definition database", epsg),
    })?;
    Proj::from_proj_string(definition).map_err(|e| EtlError::ProjectionError {
        message: format!("Invalid projection {}: {:?}", epsg, e),
    })
}

struct Transformer {
    source: Proj,
    target: Proj,
    source_geographic: bool,
    target_geographic: bool,
}

impl Transformer {
    fn new(from: Epsg, to: Epsg) -> Result<Self> {
        Ok(Self {
            source: load_proj(from)?,
            target: load_proj(to)?,
            source_geographic: is_geographic(from),
            target_geographic: is_geographic(to),
        })
    }

    fn apply(&self, coord: Coord<f64>) -> std::result::Result<Coord<f64>, String> {
        // proj4rs 的經緯度以弧度表示
        let mut point = if self.source_geographic {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        proj4rs::transform::transform(&self.source, &self.target, &mut point)
            .map_err(|e| format!("{:?}", e))?;
        let (x, y) = if self.target_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if x.is_finite() && y.is_finite() {
            Ok(Coord { x, y })
        } else {
            Err(format!("non-finite result for ({}, {})", coord.x, coord.y))
        }
    }
}

pub(crate) fn to_multi_polygon(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon.clone()])),
        Geometry::MultiPolygon(multi) => Some(multi.clone()),
        Geometry::Rect(rect) => Some(MultiPolygon::new(vec![rect.to_polygon()])),
        Geometry::Triangle(triangle) => Some(MultiPolygon::new(vec![triangle.to_polygon()])),
        Geometry::GeometryCollection(collection) => {
            let polygons: Vec<_> = collection
                .iter()
                .filter_map(to_multi_polygon)
                .flat_map(|multi| multi.0)
                .collect();
            if polygons.is_empty() {
                None
            } else {
                Some(MultiPolygon::new(polygons))
            }
        }
        _ => None,
    }
}

fn is_polygonal(geometry: &Geometry<f64>) -> bool {
    matches!(
        geometry,
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) | Geometry::Triangle(_)
    )
}

fn is_empty(geometry: &Geometry<f64>) -> bool {
    geometry.bounding_rect().is_none()
}

impl GeometryEngine for GeoEngine {
    fn reproject(&self, geometry: &Geometry<f64>, from: Epsg, to: Epsg) -> Result<Geometry<f64>> {
        if from == to || is_empty(geometry) {
            return Ok(geometry.clone());
        }
        let transformer = Transformer::new(from, to)?;
        let transformer = &transformer;
        geometry
            .try_map_coords(move |coord| transformer.apply(coord))
            .map_err(|message| EtlError::ProjectionError {
                message: format!("{} -> {}: {}", from, to, message),
            })
    }

    fn union(&self, geometries: &[Geometry<f64>]) -> MultiPolygon<f64> {
        geometries
            .iter()
            .filter_map(|geometry| {
                let polygons = to_multi_polygon(geometry);
                if polygons.is_none() {
                    tracing::debug!("Ignoring non-polygonal geometry in union");
                }
                polygons
            })
            .fold(MultiPolygon::new(vec![]), |acc, next| {
                if acc.0.is_empty() {
                    next.union(&MultiPolygon::new(vec![]))
                } else {
                    acc.union(&next)
                }
            })
    }

    fn is_valid(&self, geometry: &Geometry<f64>) -> bool {
        geometry.is_valid()
    }

    /// 零寬緩衝等價：與空集合做聯集以重建拓撲
    fn make_valid(&self, geometry: &Geometry<f64>) -> Geometry<f64> {
        match to_multi_polygon(geometry) {
            Some(polygons) if is_polygonal(geometry) => {
                Geometry::MultiPolygon(polygons.union(&MultiPolygon::new(vec![])))
            }
            _ => geometry.clone(),
        }
    }

    fn intersects(&self, a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
        a.intersects(b)
    }

    fn clip(&self, geometry: &Geometry<f64>, mask: &MultiPolygon<f64>) -> Result<Option<Geometry<f64>>> {
        if is_polygonal(geometry) && !geometry.is_valid() {
            return Err(EtlError::GeometryError {
                message: "invalid polygon topology in clip operand".to_string(),
            });
        }

        let clipped = match geometry {
            Geometry::Point(point) => mask.intersects(point).then(|| Geometry::Point(*point)),
            Geometry::MultiPoint(points) => {
                let kept: Vec<_> = points.iter().filter(|p| mask.intersects(*p)).copied().collect();
                (!kept.is_empty()).then(|| Geometry::MultiPoint(MultiPoint::new(kept)))
            }
            Geometry::Line(line) => {
                let lines = MultiLineString::new(vec![LineString::from(vec![line.start, line.end])]);
                non_empty_lines(mask.clip(&lines, false))
            }
            Geometry::LineString(line) => {
                non_empty_lines(mask.clip(&MultiLineString::new(vec![line.clone()]), false))
            }
            Geometry::MultiLineString(lines) => non_empty_lines(mask.clip(lines, false)),
            Geometry::GeometryCollection(collection) => {
                let mut parts = Vec::new();
                for member in collection.iter() {
                    if let Some(part) = self.clip(member, mask)? {
                        parts.push(part);
                    }
                }
                (!parts.is_empty()).then(|| Geometry::GeometryCollection(GeometryCollection(parts)))
            }
            polygonal => {
                let polygons = to_multi_polygon(polygonal).unwrap_or_else(|| MultiPolygon::new(vec![]));
                let result = polygons.intersection(mask);
                (!result.0.is_empty()).then_some(Geometry::MultiPolygon(result))
            }
        };
        Ok(clipped)
    }

    fn bounds(&self, geometry: &Geometry<f64>) -> Option<Bounds> {
        geometry.bounding_rect().map(Bounds::from_rect)
    }
}

fn non_empty_lines(lines: MultiLineString<f64>) -> Option<Geometry<f64>> {
    let kept: Vec<_> = lines.0.into_iter().filter(|line| line.0.len() >= 2).collect();
    (!kept.is_empty()).then(|| Geometry::MultiLineString(MultiLineString::new(kept)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Area, Point};

    fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ])
    }

    #[test]
    fn test_union_of_adjacent_squares_keeps_area() {
        let engine = GeoEngine::new();
        let merged = engine.union(&[square(0.0, 0.0, 1.0), square(1.0, 0.0, 1.0)]);
        assert!((merged.unsigned_area() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_clip_polygon_and_points() {
        let engine = GeoEngine::new();
        let mask = MultiPolygon::new(vec![match square(0.0, 0.0, 2.0) {
            Geometry::Polygon(p) => p,
            _ => unreachable!(),
        }]);

        let clipped = engine.clip(&square(1.0, 1.0, 2.0), &mask).unwrap().unwrap();
        let area = to_multi_polygon(&clipped).unwrap().unsigned_area();
        assert!((area - 1.0).abs() < 1e-9);

        let inside = Geometry::Point(Point::new(0.5, 0.5));
        let outside = Geometry::Point(Point::new(5.0, 5.0));
        assert!(engine.clip(&inside, &mask).unwrap().is_some());
        assert!(engine.clip(&outside, &mask).unwrap().is_none());
    }

    #[test]
    fn test_clip_rejects_invalid_polygon_then_make_valid_repairs() {
        let engine = GeoEngine::new();
        let bowtie = Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ]);
        let mask = MultiPolygon::new(vec![match square(-1.0, -1.0, 4.0) {
            Geometry::Polygon(p) => p,
            _ => unreachable!(),
        }]);
        assert!(!engine.is_valid(&bowtie));
        assert!(engine.clip(&bowtie, &mask).is_err());

        let repaired = engine.make_valid(&bowtie);
        assert!(engine.clip(&repaired, &mask).is_ok());
    }

    #[test]
    fn test_reproject_round_trip_mtm() {
        let engine = GeoEngine::new();
        let point = Geometry::Point(Point::new(-72.0, 46.0));
        let projected = engine.reproject(&point, Epsg::WGS84, Epsg(32188)).unwrap();
        let back = engine.reproject(&projected, Epsg(32188), Epsg::WGS84).unwrap();
        match back {
            Geometry::Point(p) => {
                assert!((p.x() + 72.0).abs() < 1e-6);
                assert!((p.y() - 46.0).abs() < 1e-6);
            }
            other => panic!("unexpected geometry {:?}", other),
        }
    }

    #[test]
    fn test_reproject_unknown_code_fails() {
        let engine = GeoEngine::new();
        let point = Geometry::Point(Point::new(0.0, 0.0));
        assert!(engine.reproject(&point, Epsg(4326), Epsg(1)).is_err());
    }

    #[test]
    fn test_reproject_empty_geometry_is_empty() {
        let engine = GeoEngine::new();
        let empty = Geometry::MultiPolygon(MultiPolygon::new(vec![]));
        let projected = engine.reproject(&empty, Epsg::WGS84, Epsg(32188)).unwrap();
        assert!(engine.bounds(&projected).is_none());
    }
}
