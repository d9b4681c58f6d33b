use anyhow::Context;
use aoi_etl::utils::error::ErrorSeverity;
use aoi_etl::utils::{logger, validation::Validate};
use aoi_etl::{CliArgs, EtlError, ExtractionPipeline, RunConfig};
use clap::Parser;

fn exit_code(e: &EtlError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

fn report_error(stage: &str, e: &EtlError) -> i32 {
    tracing::error!(
        "❌ {} failed: {} (Category: {:?}, Severity: {:?})",
        stage,
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
    exit_code(e)
}

fn load_config(args: &CliArgs) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::from_file(&args.config)
        .with_context(|| format!("failed to load config file '{}'", args.config.display()))?;
    args.apply_to(&mut config);
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose, args.log_file.as_deref());
    }

    tracing::info!("🚀 Starting aoi-etl");
    tracing::info!("📁 Loading configuration from: {}", args.config.display());

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ {:#}", e);
            eprintln!("❌ {:#}", e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        std::process::exit(report_error("Configuration validation", &e).max(1));
    }
    tracing::info!(
        "✅ Configuration loaded: project '{}', {} data source(s)",
        config.project.id,
        config.datasources.len()
    );

    let pipeline = match ExtractionPipeline::new(config) {
        Ok(pipeline) => pipeline.with_monitoring(args.monitor),
        Err(e) => std::process::exit(report_error("Pipeline setup", &e).max(1)),
    };

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No output will be written");
        match pipeline.plan() {
            Ok(plan) => {
                println!("AOI: {} (zone {})", plan.aoi.display_name(), plan.aoi.target_zone());
                println!("Output: {}", plan.layout.project_dir.display());
                for source in &plan.sources {
                    println!(
                        "  [{}] {:<20} {:<16} priority {}",
                        if source.will_run { "run " } else { "skip" },
                        source.descriptor.id,
                        source.descriptor.kind,
                        source.descriptor.priority
                    );
                }
            }
            Err(e) => std::process::exit(report_error("AOI resolution", &e).max(1)),
        }
        return;
    }

    match pipeline.run().await {
        Ok(report) => {
            println!("✅ Extraction completed: {}", report.layout.project_dir.display());
            if report.has_source_failures() {
                println!(
                    "⚠️ {} source(s) failed, see {}",
                    report.summary.failures(),
                    report.layout.summary_path().display()
                );
            }
        }
        Err(e) => {
            let code = report_error("Extraction", &e);
            // AOI 解析或輸出目錄失敗時整體執行視為失敗
            let code = if e.is_run_fatal() { code.max(1) } else { code };
            if code > 0 {
                std::process::exit(code);
            }
        }
    }
}
