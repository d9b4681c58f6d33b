use crate::adapters::geopackage::GeoPackage;
use crate::domain::ports::{ProjectComposer, ProjectRequest};
use crate::utils::error::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct ProjectLayer {
    name: String,
    kind: &'static str,
    source: String,
    style: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProjectManifest {
    name: String,
    crs: String,
    created: String,
    layers: Vec<ProjectLayer>,
}

/// 產生 JSON 專案清單並複製對應的 .qml 樣式檔
#[derive(Debug, Clone, Default)]
pub struct ManifestComposer {
    styles_dir: Option<PathBuf>,
}

impl ManifestComposer {
    pub fn new(styles_dir: Option<PathBuf>) -> Self {
        Self { styles_dir }
    }

    fn copy_style(&self, layer: &str, project_dir: &Path) -> Option<String> {
        let source = self.styles_dir.as_ref()?.join(format!("{}.qml", layer));
        if !source.exists() {
            return None;
        }
        let styles_out = project_dir.join("styles");
        let target = styles_out.join(format!("{}.qml", layer));
        let copied = std::fs::create_dir_all(&styles_out).and_then(|_| std::fs::copy(&source, &target));
        match copied {
            Ok(_) => Some(format!("styles/{}.qml", layer)),
            Err(e) => {
                tracing::warn!("⚠️ Could not copy style for '{}': {}", layer, e);
                None
            }
        }
    }
}

fn relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

impl ProjectComposer for ManifestComposer {
    fn compose(&self, request: &ProjectRequest) -> Result<PathBuf> {
        let mut layers = Vec::new();

        let store = GeoPackage::open_read_only(&request.store_path)?;
        for layer in store.feature_layers()? {
            layers.push(ProjectLayer {
                style: self.copy_style(&layer, &request.project_dir),
                source: format!(
                    "{}|layername={}",
                    relative(&request.store_path, &request.project_dir),
                    layer
                ),
                name: layer,
                kind: "vector",
            });
        }

        if request.imagery_dir.is_dir() {
            let mut rasters: Vec<PathBuf> = std::fs::read_dir(&request.imagery_dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.extension()
                        .and_then(|ext| ext.to_str())
                        .map(|ext| ext.eq_ignore_ascii_case("tif"))
                        .unwrap_or(false)
                })
                .collect();
            rasters.sort();
            for raster in rasters {
                let name = raster
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let style_key = if name.contains("Hillshade") { "hillshade" } else { "elevation" };
                layers.push(ProjectLayer {
                    style: self.copy_style(style_key, &request.project_dir),
                    source: relative(&raster, &request.project_dir),
                    name,
                    kind: "raster",
                });
            }
        }

        let manifest = ProjectManifest {
            name: request.name.clone(),
            crs: request.zone.to_string(),
            created: chrono::Local::now().to_rfc3339(),
            layers,
        };

        let output = request
            .project_dir
            .join(format!("{}_project.json", request.name));
        std::fs::write(&output, serde_json::to_string_pretty(&manifest)?)?;
        tracing::info!("🗺️ Project file written: {}", output.display());
        Ok(output)
    }
}
