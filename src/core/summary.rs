use crate::domain::model::{SourceOutcome, SourceStatus};
use crate::utils::error::Result;
use serde::Serialize;
use std::path::Path;

/// AOI 圖層本身的資料源種類
pub const AOI_KIND: &str = "aoi";

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    id: &'a str,
    name: &'a str,
    kind: &'a str,
    enabled: bool,
    status: &'static str,
    raw_count: usize,
    final_count: usize,
    priority: i64,
}

impl<'a> From<&'a SourceOutcome> for SummaryRow<'a> {
    fn from(outcome: &'a SourceOutcome) -> Self {
        Self {
            id: &outcome.id,
            name: &outcome.name,
            kind: &outcome.kind,
            enabled: outcome.enabled,
            status: outcome.status.label(),
            raw_count: outcome.raw_count,
            final_count: outcome.final_count,
            priority: outcome.priority,
        }
    }
}

/// 依序累積的處理結果，只能追加
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    outcomes: Vec<SourceOutcome>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: SourceOutcome) {
        tracing::debug!("Outcome [{}]: {}", outcome.id, outcome.status);
        self.outcomes.push(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// 執行順序
    pub fn outcomes(&self) -> &[SourceOutcome] {
        &self.outcomes
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_failure()).count()
    }

    /// 顯示順序：AOI/索引優先，其次 priority，再依 id
    pub fn sorted(&self) -> Vec<SourceOutcome> {
        let mut sorted = self.outcomes.clone();
        sorted.sort_by(|a, b| {
            let a_index = !is_aoi_entry(a);
            let b_index = !is_aoi_entry(b);
            a_index
                .cmp(&b_index)
                .then(a.priority.cmp(&b.priority))
                .then_with(|| a.id.cmp(&b.id))
        });
        sorted
    }

    pub fn log_table(&self) {
        let rows = self.sorted();
        let id_width = rows.iter().map(|o| o.id.len()).max().unwrap_or(2).max(2);
        let status_width = rows
            .iter()
            .map(|o| o.status.label().len())
            .max()
            .unwrap_or(6)
            .max(6);

        tracing::info!("📋 Processing summary");
        tracing::info!(
            "{:<id_width$}  {:<status_width$}  {:>8}  {:>8}  {:>8}",
            "id",
            "status",
            "raw",
            "final",
            "priority",
            id_width = id_width,
            status_width = status_width
        );
        for outcome in &rows {
            let line = format!(
                "{:<id_width$}  {:<status_width$}  {:>8}  {:>8}  {:>8}",
                outcome.id,
                outcome.status.label(),
                outcome.raw_count,
                outcome.final_count,
                outcome.priority,
                id_width = id_width,
                status_width = status_width
            );
            if outcome.status.is_failure() {
                tracing::warn!("{}", line);
            } else {
                tracing::info!("{}", line);
            }
        }
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for outcome in &self.sorted() {
            writer.serialize(SummaryRow::from(outcome))?;
        }
        writer.flush()?;
        tracing::info!("📝 Summary written: {}", path.display());
        Ok(())
    }
}

fn is_aoi_entry(outcome: &SourceOutcome) -> bool {
    outcome.kind == AOI_KIND || outcome.status == SourceStatus::IndexHandled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::SourceDescriptor;
    use tempfile::TempDir;

    fn outcome(id: &str, kind: &str, priority: i64, status: SourceStatus) -> SourceOutcome {
        let descriptor = SourceDescriptor {
            id: id.to_string(),
            name: id.to_uppercase(),
            kind: kind.to_string(),
            priority,
            output_layer_name: id.to_string(),
            declaration_index: 0,
        };
        SourceOutcome::new(&descriptor, true, status)
    }

    #[test]
    fn test_sorted_puts_aoi_first() {
        let mut summary = RunSummary::new();
        summary.push(outcome("roads", "wfs", 1, SourceStatus::Success));
        summary.push(outcome("lakes", "wfs", 1, SourceStatus::FetchFailed));
        summary.push(outcome("aoi_extent", AOI_KIND, 0, SourceStatus::Success));
        summary.push(outcome("index", "local_vector", 50, SourceStatus::IndexHandled));
        summary.push(outcome("dem", "tiled_raster", 0, SourceStatus::Success));

        let ids: Vec<String> = summary.sorted().into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["aoi_extent", "index", "dem", "lakes", "roads"]);
        assert_eq!(summary.outcomes()[0].id, "roads");
        assert_eq!(summary.failures(), 1);
    }

    #[test]
    fn test_write_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("processing_summary.csv");
        let mut summary = RunSummary::new();
        summary.push(outcome("roads", "wfs", 1, SourceStatus::Success).with_counts(12, 7));
        summary.write_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,name,kind,enabled,status,raw_count,final_count,priority"
        );
        assert_eq!(lines.next().unwrap(), "roads,ROADS,wfs,true,Success,12,7,1");
    }
}
