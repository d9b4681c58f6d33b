use crate::adapters::geo_engine::proj_string;
use crate::domain::model::{Epsg, Feature, FeatureSet};
use crate::domain::ports::LayerWriter;
use crate::utils::error::{EtlError, Result};
use geozero::wkb::GpkgWkb;
use geozero::{CoordDimensions, ToGeo, ToWkb};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};

const APPLICATION_ID: i32 = 0x4750_4B47;
const USER_VERSION: i32 = 10300;

const METADATA_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS gpkg_spatial_ref_sys (
    srs_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL PRIMARY KEY,
    organization TEXT NOT NULL,
    organization_coordsys_id INTEGER NOT NULL,
    definition TEXT NOT NULL,
    description TEXT
);
CREATE TABLE IF NOT EXISTS gpkg_contents (
    table_name TEXT NOT NULL PRIMARY KEY,
    data_type TEXT NOT NULL,
    identifier TEXT UNIQUE,
    description TEXT DEFAULT '',
    last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
    min_x DOUBLE, min_y DOUBLE, max_x DOUBLE, max_y DOUBLE,
    srs_id INTEGER
);
CREATE TABLE IF NOT EXISTS gpkg_geometry_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    geometry_type_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL,
    z TINYINT NOT NULL,
    m TINYINT NOT NULL,
    CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name)
);
INSERT OR IGNORE INTO gpkg_spatial_ref_sys VALUES
    ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', NULL),
    ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', NULL);
";

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    fn of(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(_) => Some(ColumnType::Integer),
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Some(ColumnType::Integer),
            serde_json::Value::Number(_) => Some(ColumnType::Real),
            _ => Some(ColumnType::Text),
        }
    }

    fn widen(self, other: ColumnType) -> ColumnType {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnType::Integer, ColumnType::Real) | (ColumnType::Real, ColumnType::Integer) => {
                ColumnType::Real
            }
            _ => ColumnType::Text,
        }
    }
}

fn json_to_sql(value: Option<&serde_json::Value>) -> Value {
    match value {
        None | Some(serde_json::Value::Null) => Value::Null,
        Some(serde_json::Value::Bool(b)) => Value::Integer(i64::from(*b)),
        Some(serde_json::Value::Number(n)) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map(Value::Real).unwrap_or(Value::Null),
        },
        Some(serde_json::Value::String(s)) => Value::Text(s.clone()),
        Some(other) => Value::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

/// GeoPackage 圖層容器 (讀取索引與寫入合併輸出)
pub struct GeoPackage {
    conn: Connection,
    path: PathBuf,
}

impl GeoPackage {
    /// 建立或開啟可寫入的 GeoPackage，不會清除既有圖層
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "application_id", APPLICATION_ID)?;
        conn.pragma_update(None, "user_version", USER_VERSION)?;
        conn.execute_batch(METADATA_SCHEMA)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EtlError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("GeoPackage not found: {}", path.display()),
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn feature_layers(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_name FROM gpkg_contents WHERE data_type = 'features' ORDER BY rowid",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn read_layer(&self, layer: &str) -> Result<FeatureSet> {
        let (geometry_column, srs_id): (String, i64) = self
            .conn
            .query_row(
                "SELECT column_name, srs_id FROM gpkg_geometry_columns WHERE lower(table_name) = lower(?1)",
                params![layer],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => EtlError::TileIndexError {
                    message: format!("Layer '{}' not found in {}", layer, self.path.display()),
                },
                other => EtlError::StoreError(other),
            })?;

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {}", quote_identifier(layer)))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([])?;

        let mut features = Vec::new();
        while let Some(row) = rows.next()? {
            let mut geometry = None;
            let mut properties = serde_json::Map::new();
            for (index, column) in columns.iter().enumerate() {
                let value = row.get_ref(index)?;
                if column.eq_ignore_ascii_case(&geometry_column) {
                    if let ValueRef::Blob(blob) = value {
                        geometry = Some(GpkgWkb(blob.to_vec()).to_geo().map_err(|e| {
                            EtlError::GeometryError {
                                message: format!("Cannot decode geometry in '{}': {}", layer, e),
                            }
                        })?);
                    }
                } else if !column.eq_ignore_ascii_case("fid") {
                    properties.insert(column.clone(), sql_to_json(value));
                }
            }
            if let Some(geometry) = geometry {
                features.push(Feature {
                    geometry,
                    properties,
                });
            }
        }

        let crs = (srs_id > 0).then(|| Epsg(srs_id as u32));
        Ok(FeatureSet::new(crs, features))
    }

    fn register_srs(&self, crs: Epsg) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO gpkg_spatial_ref_sys
                (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
             VALUES (?1, ?2, 'EPSG', ?2, ?3, NULL)",
            params![
                crs.to_string(),
                crs.code(),
                proj_string(crs).unwrap_or("undefined")
            ],
        )?;
        Ok(())
    }
}

impl LayerWriter for GeoPackage {
    fn write_layer(&mut self, name: &str, features: &FeatureSet, crs: Epsg) -> Result<usize> {
        let write_error = |e: rusqlite::Error| EtlError::WriteError {
            layer: name.to_string(),
            message: e.to_string(),
        };

        // 依出現順序收集欄位與型別
        let mut schema: Vec<(String, ColumnType)> = Vec::new();
        for feature in &features.features {
            for (key, value) in &feature.properties {
                let Some(kind) = ColumnType::of(value) else {
                    if !schema.iter().any(|(k, _)| k == key) {
                        schema.push((key.clone(), ColumnType::Text));
                    }
                    continue;
                };
                match schema.iter_mut().find(|(k, _)| k == key) {
                    Some((_, existing)) => *existing = existing.widen(kind),
                    None => schema.push((key.clone(), kind)),
                }
            }
        }

        self.register_srs(crs)?;

        let tx = self.conn.transaction().map_err(write_error)?;
        let table = quote_identifier(name);
        // SQLite 的表名不分大小寫，中繼資料也須一併清除
        tx.execute(&format!("DROP TABLE IF EXISTS {}", table), [])
            .map_err(write_error)?;
        tx.execute(
            "DELETE FROM gpkg_contents WHERE lower(table_name) = lower(?1)",
            params![name],
        )
        .map_err(write_error)?;
        tx.execute(
            "DELETE FROM gpkg_geometry_columns WHERE lower(table_name) = lower(?1)",
            params![name],
        )
        .map_err(write_error)?;

        let column_defs: String = schema
            .iter()
            .map(|(column, kind)| format!(", {} {}", quote_identifier(column), kind.sql()))
            .collect();
        tx.execute(
            &format!(
                "CREATE TABLE {} (fid INTEGER PRIMARY KEY AUTOINCREMENT, geom BLOB{})",
                table, column_defs
            ),
            [],
        )
        .map_err(write_error)?;

        let placeholders: String = (0..=schema.len())
            .map(|i| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let column_list: String = std::iter::once("geom".to_string())
            .chain(schema.iter().map(|(column, _)| quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut envelope: Option<(f64, f64, f64, f64)> = None;
        {
            let mut insert = tx
                .prepare(&format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table, column_list, placeholders
                ))
                .map_err(write_error)?;
            for feature in &features.features {
                let blob = feature
                    .geometry
                    .to_gpkg_wkb(CoordDimensions::xy(), Some(crs.code() as i32), vec![])
                    .map_err(|e| EtlError::WriteError {
                        layer: name.to_string(),
                        message: format!("geometry encoding failed: {}", e),
                    })?;
                if let Some(rect) = geo::BoundingRect::bounding_rect(&feature.geometry) {
                    envelope = Some(match envelope {
                        None => (rect.min().x, rect.min().y, rect.max().x, rect.max().y),
                        Some((a, b, c, d)) => (
                            a.min(rect.min().x),
                            b.min(rect.min().y),
                            c.max(rect.max().x),
                            d.max(rect.max().y),
                        ),
                    });
                }
                let mut values = vec![Value::Blob(blob)];
                values.extend(
                    schema
                        .iter()
                        .map(|(column, _)| json_to_sql(feature.properties.get(column))),
                );
                insert
                    .execute(rusqlite::params_from_iter(values))
                    .map_err(write_error)?;
            }
        }

        let (min_x, min_y, max_x, max_y) = match envelope {
            Some((a, b, c, d)) => (Some(a), Some(b), Some(c), Some(d)),
            None => (None, None, None, None),
        };
        tx.execute(
            "INSERT INTO gpkg_contents (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id)
             VALUES (?1, 'features', ?1, ?2, ?3, ?4, ?5, ?6)",
            params![name, min_x, min_y, max_x, max_y, crs.code()],
        )
        .map_err(write_error)?;
        tx.execute(
            "INSERT INTO gpkg_geometry_columns (table_name, column_name, geometry_type_name, srs_id, z, m)
             VALUES (?1, 'geom', 'GEOMETRY', ?2, 0, 0)",
            params![name, crs.code()],
        )
        .map_err(write_error)?;
        tx.commit().map_err(write_error)?;

        Ok(features.len())
    }

    fn layer_names(&self) -> Result<Vec<String>> {
        self.feature_layers()
    }
}
