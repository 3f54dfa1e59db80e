use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;

use playlist_export::config::{load_export_config, save_export_config, ExportConfig};
use playlist_export::ffmpeg::AudioFormat;
use playlist_export::paths::AppPaths;
use playlist_export::pipeline::{run_export, RunOptions};
use playlist_export::{tools, EngineError};

/// Export a streaming-service collection into a local, tagged audio library.
#[derive(Parser, Debug)]
#[command(name = "playlist_export", version)]
struct Cli {
    /// Collection URL to export
    url: Option<String>,

    /// State directory (config, ledger, tools, default library). Defaults to
    /// $PLAYLIST_EXPORT_BASE_DIR or ./.playlist_export
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Root directory of the audio library
    #[arg(long)]
    library_root: Option<PathBuf>,

    /// Parallel downloads
    #[arg(long)]
    workers: Option<usize>,

    /// Target audio format: mp3, m4a, opus, flac or wav
    #[arg(long, value_parser = parse_format)]
    format: Option<AudioFormat>,

    /// Show the browser window instead of running headless
    #[arg(long)]
    headful: bool,

    /// Endpoint of a running WebDriver server
    #[arg(long)]
    webdriver_url: Option<String>,

    /// Spawn this chromedriver binary instead of attaching to a running one
    #[arg(long)]
    chromedriver: Option<PathBuf>,

    /// Only process tracks listed in the failure ledger
    #[arg(long)]
    retry_failed: bool,

    /// Print ffmpeg and yt-dlp availability
    #[arg(long)]
    check_tools: bool,

    /// Download a static ffmpeg build into the tools directory
    #[arg(long)]
    install_ffmpeg: bool,

    /// Persist the effective configuration (after flag overrides)
    #[arg(long)]
    save_config: bool,
}

fn parse_format(value: &str) -> Result<AudioFormat, String> {
    AudioFormat::parse(value).ok_or_else(|| format!("unsupported audio format: {value}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err}");
            if err.is_setup_failure() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli) -> playlist_export::Result<ExitCode> {
    let paths = cli
        .base_dir
        .clone()
        .map(AppPaths::new)
        .unwrap_or_else(AppPaths::from_env);

    let mut config = load_export_config(&paths)?;
    apply_overrides(&cli, &mut config);

    if cli.save_config {
        save_export_config(&paths, &config)?;
        log::info!("saved configuration to {}", paths.config_path().display());
    }

    if cli.install_ffmpeg {
        let status = tools::install_ffmpeg_tools(&paths)?;
        print_json(&status)?;
    }

    if cli.check_tools {
        let report = tools::tools_report(
            &paths,
            config.acquisition.ffmpeg_path.clone(),
            config.acquisition.yt_dlp_path.clone(),
        );
        if !report.ready() {
            log::warn!("ffmpeg or yt-dlp is not usable; downloads will fail");
        }
        print_json(&report)?;
    }

    let Some(url) = cli.url.as_deref() else {
        if cli.save_config || cli.install_ffmpeg || cli.check_tools {
            return Ok(ExitCode::SUCCESS);
        }
        return Err(EngineError::Setup(
            "no collection URL given (try --help)".to_string(),
        ));
    };

    let summary = run_export(
        &paths,
        &config,
        url,
        RunOptions {
            retry_failed: cli.retry_failed,
        },
    )?;
    log::info!(
        "{}: {} acquired, {} already present, {} unresolved, {} failed",
        summary.collection,
        summary.acquired,
        summary.already_present,
        summary.unresolved,
        summary.failed
    );
    print_json(&summary)?;
    Ok(ExitCode::SUCCESS)
}

fn apply_overrides(cli: &Cli, config: &mut ExportConfig) {
    if let Some(root) = cli.library_root.clone() {
        config.acquisition.library_root = Some(root);
    }
    if let Some(workers) = cli.workers {
        config.acquisition.workers = workers;
    }
    if let Some(format) = cli.format {
        config.acquisition.audio_format = format;
    }
    if cli.headful {
        config.webdriver.headless = false;
    }
    if let Some(url) = cli.webdriver_url.clone() {
        config.webdriver.url = url;
    }
    if let Some(binary) = cli.chromedriver.clone() {
        config.webdriver.chromedriver_path = Some(binary);
    }
}

fn print_json(value: &impl Serialize) -> playlist_export::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
