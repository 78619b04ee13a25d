//! ttml-translate - TTML subtitle translation workflow
//!
//! Entry point: loads configuration, pins the Google Cloud project identity,
//! then runs the translate or batch command.

use anyhow::{Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ttml_translate::cli::{Args, Commands};
use ttml_translate::config::{Config, parse_languages};
use ttml_translate::error::TtmlError;
use ttml_translate::gcp::{self, GcpContext};
use ttml_translate::publish::Publisher;
use ttml_translate::storage::GcsStore;
use ttml_translate::translate::{EngineFactory, EngineKind};
use ttml_translate::workflow::{RunReport, Workflow};

fn main() -> Result<()> {
    // .env never overrides variables already set in the environment
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    config.validate(!args.command.no_upload())?;

    // SAFETY: still single-threaded; neither the log writer nor the runtime exist yet.
    unsafe { gcp::force_process_identity(&config.gcp.project_id) };

    let _guard = setup_logging(args.verbose)?;
    info!("Starting ttml-translate for project {}", config.gcp.project_id);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(run(args.command, config))?;

    report.print_summary();
    if report.upload_failures() > 0 {
        info!("{} upload(s) failed; local outputs are kept", report.upload_failures());
    }
    if report.failed() > 0 {
        return Err(anyhow!(
            "{} of {} translation(s) failed",
            report.failed(),
            report.items.len()
        ));
    }

    info!("ttml-translate completed successfully");
    Ok(())
}

async fn run(command: Commands, config: Config) -> Result<RunReport> {
    let ctx = GcpContext::connect(&config.gcp).await?;

    let report = match command {
        Commands::Translate { file, lang, engine, output_dir, no_upload } => {
            info!("Translating subtitles: {}", file.display());
            let languages = target_languages(&lang)?;
            let workflow = build_workflow(&engine, output_dir, no_upload, &config, &ctx)?;
            workflow.process_single_file(&file, &languages).await?
        }
        Commands::Batch { dir, lang, engine, recursive, pattern, output_dir, no_upload } => {
            info!("Processing directory: {}", dir.display());
            let languages = target_languages(&lang)?;
            let workflow = build_workflow(&engine, output_dir, no_upload, &config, &ctx)?;
            workflow.process_directory(&dir, &languages, &pattern, recursive).await?
        }
    };

    Ok(report)
}

fn target_languages(list: &str) -> Result<Vec<String>> {
    let languages = parse_languages(list);
    if languages.is_empty() {
        return Err(TtmlError::Config("No target languages provided".to_string()).into());
    }
    Ok(languages)
}

fn build_workflow(
    engine: &str,
    output_dir: Option<PathBuf>,
    no_upload: bool,
    config: &Config,
    ctx: &GcpContext,
) -> Result<Workflow<GcsStore>> {
    let kind = EngineKind::parse(engine)?;
    let engine = EngineFactory::create(kind, config, ctx);
    let output_dir = output_dir.unwrap_or_else(|| Workflow::<GcsStore>::default_output_dir(kind.label()));

    let publisher = if no_upload {
        info!("Upload disabled, writing local files only");
        None
    } else {
        let storage = &config.storage;
        Some(Publisher::new(
            GcsStore::new(ctx.clone()),
            &storage.bucket_name,
            storage.prefix(),
            storage.bucket_location(Some(config.gcp.region.as_str())),
        ))
    };

    Ok(Workflow::new(engine, publisher, output_dir))
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".ttml-translate").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation; the guard flushes the file writer on drop
    let file_appender = rolling::daily(&log_dir, "ttml-translate.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("ttml-translate.log").display()
    );

    Ok(guard)
}
