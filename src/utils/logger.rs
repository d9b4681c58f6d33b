use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn build_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aoi_etl=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aoi_etl=info"))
    }
}

/// 初始化 CLI 日誌，可選擇同時寫入檔案
pub fn init_cli_logger(verbose: bool, log_file: Option<&Path>) {
    let file_layer = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            ),
            Err(e) => {
                eprintln!("⚠️ Cannot open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(build_filter(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .with(file_layer)
        .init();
}

pub fn init_json_logger(verbose: bool) {
    tracing_subscriber::registry()
        .with(build_filter(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(), // 批次執行環境使用 JSON 格式
        )
        .init();
}
