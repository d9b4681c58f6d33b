use crate::domain::model::Zone;
use crate::utils::error::{EtlError, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

pub const TEMP_DIR_NAME: &str = "temp_files";
pub const SUMMARY_FILE_NAME: &str = "processing_summary.csv";

/// 執行結束時清除的暫存檔前綴
pub const TRANSIENT_PREFIXES: [&str; 8] = [
    "temp_filtered_",
    "temp_indexed_",
    "temp_wfs_",
    "temp_merged_",
    "temp_reproj_",
    "temp_unclipped_mosaic_",
    "temp_merged_mosaic_",
    "temp_aoi_",
];

/// 一次執行的輸出目錄配置
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    pub project_id: String,
    pub zone: Zone,
    pub date_tag: String,
    pub folder_name: String,
    pub project_dir: PathBuf,
    pub imagery_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub store_path: PathBuf,
}

impl OutputLayout {
    /// 名稱只由專案代碼、分區與日期決定
    pub fn plan(output_dir: &Path, project_id: &str, zone: Zone, date: NaiveDate) -> Self {
        let date_tag = date.format("%y%m%d").to_string();
        let short = zone.short_name();
        let folder_name = format!("{}_GIS_extract_ZONE{}_{}", project_id, short, date_tag);
        let project_dir = output_dir.join(&folder_name);
        let imagery_dir =
            project_dir.join(format!("{}_extract_imagery_ZONE{}_{}", project_id, short, date_tag));
        let temp_dir = project_dir.join(TEMP_DIR_NAME);
        let store_path = project_dir.join(format!("{}.gpkg", folder_name));

        Self {
            project_id: project_id.to_string(),
            zone,
            date_tag,
            folder_name,
            project_dir,
            imagery_dir,
            temp_dir,
            store_path,
        }
    }

    /// 建立目錄；重複呼叫不會失敗
    pub fn prepare(&self) -> Result<()> {
        for dir in [&self.project_dir, &self.imagery_dir, &self.temp_dir] {
            fs::create_dir_all(dir).map_err(|e| EtlError::OutputPreparationError {
                message: format!("cannot create {}: {}", dir.display(), e),
            })?;
        }
        tracing::info!("📁 Output folder: {}", self.project_dir.display());
        Ok(())
    }

    pub fn summary_path(&self) -> PathBuf {
        self.project_dir.join(SUMMARY_FILE_NAME)
    }

    pub fn raster_output(&self, base: &str) -> PathBuf {
        self.imagery_dir.join(format!(
            "{}_{}_ZONE{}_{}.tif",
            self.project_id,
            base,
            self.zone.short_name(),
            self.date_tag
        ))
    }

    pub fn hillshade_output(&self, suffix: &str) -> PathBuf {
        self.raster_output(&format!("Hillshade_{}", suffix))
    }

    pub fn source_workspace(&self, source_id: &str) -> SourceWorkspace {
        SourceWorkspace::new(&self.temp_dir, source_id)
    }

    /// 刪除已知前綴的暫存檔，目錄為空時一併移除
    pub fn cleanup_temp(&self) -> usize {
        let entries = match fs::read_dir(&self.temp_dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let transient = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| TRANSIENT_PREFIXES.iter().any(|prefix| name.starts_with(prefix)))
                .unwrap_or(false);
            if transient && path.is_file() {
                match fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!("⚠️ Could not delete {}: {}", path.display(), e),
                }
            }
        }

        let is_empty = fs::read_dir(&self.temp_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            if let Err(e) = fs::remove_dir(&self.temp_dir) {
                tracing::warn!("⚠️ Could not remove {}: {}", self.temp_dir.display(), e);
            }
        } else {
            tracing::info!("🧹 Temp folder kept (not empty): {}", self.temp_dir.display());
        }

        tracing::debug!("Removed {} transient file(s)", removed);
        removed
    }
}

/// 單一資料源擁有的暫存空間，離開作用域時刪除其追蹤的檔案
#[derive(Debug)]
pub struct SourceWorkspace {
    dir: PathBuf,
    source_id: String,
    tracked: Vec<PathBuf>,
}

impl SourceWorkspace {
    pub fn new(dir: &Path, source_id: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            source_id: source_id.to_string(),
            tracked: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// `{prefix}{source_id}.{ext}`
    pub fn temp_path(&mut self, prefix: &str, extension: &str) -> PathBuf {
        let path = self
            .dir
            .join(format!("{}{}.{}", prefix, self.source_id, extension));
        self.track(path.clone());
        path
    }

    /// 追蹤檔案，離開作用域時刪除
    pub fn track(&mut self, path: PathBuf) {
        if !self.tracked.contains(&path) {
            self.tracked.push(path);
        }
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.tracked
    }
}

impl Drop for SourceWorkspace {
    fn drop(&mut self) {
        for path in self.tracked.drain(..) {
            if path.is_file() {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!("⚠️ [{}] Could not delete {}: {}", self.source_id, path.display(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Epsg;
    use tempfile::TempDir;

    fn layout(root: &Path) -> OutputLayout {
        let zone = Zone::from_epsg(Epsg(32187)).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        OutputLayout::plan(root, "P42", zone, date)
    }

    #[test]
    fn test_layout_names() {
        let layout = layout(Path::new("/out"));
        assert_eq!(layout.folder_name, "P42_GIS_extract_ZONE7_240309");
        assert_eq!(
            layout.imagery_dir,
            PathBuf::from("/out/P42_GIS_extract_ZONE7_240309/P42_extract_imagery_ZONE7_240309")
        );
        assert_eq!(
            layout.store_path,
            PathBuf::from("/out/P42_GIS_extract_ZONE7_240309/P42_GIS_extract_ZONE7_240309.gpkg")
        );
        assert_eq!(
            layout.raster_output("MNT_21L14NE").file_name().unwrap(),
            "P42_MNT_21L14NE_ZONE7_240309.tif"
        );
        assert_eq!(
            layout.hillshade_output("MNT").file_name().unwrap(),
            "P42_Hillshade_MNT_ZONE7_240309.tif"
        );
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        layout.prepare().unwrap();
        fs::write(layout.project_dir.join("keep.txt"), "x").unwrap();
        layout.prepare().unwrap();
        assert!(layout.imagery_dir.is_dir());
        assert!(layout.temp_dir.is_dir());
    }

    #[test]
    fn test_cleanup_removes_transient_files_only() {
        let dir = TempDir::new().unwrap();
        let layout = layout(dir.path());
        layout.prepare().unwrap();
        fs::write(layout.temp_dir.join("temp_wfs_roads.geojson"), "{}").unwrap();
        fs::write(layout.temp_dir.join("temp_reproj_mnt.tif"), "x").unwrap();
        fs::write(layout.temp_dir.join("notes.txt"), "x").unwrap();

        assert_eq!(layout.cleanup_temp(), 2);
        assert!(layout.temp_dir.join("notes.txt").exists());

        fs::remove_file(layout.temp_dir.join("notes.txt")).unwrap();
        layout.cleanup_temp();
        assert!(!layout.temp_dir.exists());
    }

    #[test]
    fn test_source_workspace_releases_on_drop() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("notes.txt");
        let downloaded = dir.path().join("MNT_21L14NE.tif");
        let temp;
        {
            let mut workspace = SourceWorkspace::new(dir.path(), "lidar");
            temp = workspace.temp_path("temp_merged_", "geojson");
            assert_eq!(temp.file_name().unwrap(), "temp_merged_lidar.geojson");
            fs::write(&temp, "{}").unwrap();
            fs::write(&kept, "x").unwrap();
            fs::write(&downloaded, "x").unwrap();
            workspace.track(downloaded.clone());
            workspace.track(downloaded.clone());
            assert_eq!(workspace.tracked().len(), 2);
        }
        assert!(!temp.exists());
        assert!(!downloaded.exists());
        assert!(kept.exists());
    }
}
