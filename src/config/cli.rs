use crate::config::toml_config::RunConfig;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "aoi-etl")]
#[command(about = "Resolve an area of interest and extract clipped GIS layers for it")]
pub struct CliArgs {
    /// Run configuration (TOML)
    pub config: PathBuf,

    #[arg(long, help = "Override project.output_dir")]
    pub output_dir: Option<PathBuf>,

    #[arg(long, help = "Force the projected zone, e.g. EPSG:32187")]
    pub custom_zone: Option<String>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log CPU/memory usage per stage")]
    pub monitor: bool,

    #[arg(long, help = "Skip project file generation")]
    pub no_project: bool,

    #[arg(long, help = "Resolve the AOI and print the source plan without writing outputs")]
    pub dry_run: bool,

    #[arg(long, help = "Also write logs to this file")]
    pub log_file: Option<PathBuf>,

    #[arg(long, help = "Emit logs as JSON")]
    pub json_logs: bool,
}

impl CliArgs {
    /// 命令列參數覆寫設定檔
    pub fn apply_to(&self, config: &mut RunConfig) {
        if let Some(dir) = &self.output_dir {
            config.project.output_dir = dir.clone();
        }
        if let Some(zone) = &self.custom_zone {
            config.projection.custom_zone = Some(zone.clone());
        }
        if self.no_project {
            config.project.generate_project = false;
        }
    }
}
