use crate::paths::AppPaths;
use crate::ytdlp::YtDlp;
use crate::{EngineError, Result};
use serde::Serialize;
use std::ffi::OsStr;
use std::path::PathBuf;

const VERSION_PROBE_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone, Serialize)]
pub struct FfmpegToolsStatus {
    pub installed: bool,
    pub ffmpeg_path: String,
    pub ffmpeg_version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct YtDlpToolsStatus {
    pub available: bool,
    pub bundled_installed: bool,
    pub bundled_path: String,
    pub ytdlp_version: Option<String>,
}

/// What `--check-tools` prints.
#[derive(Debug, Clone, Serialize)]
pub struct ToolsReport {
    pub ffmpeg: FfmpegToolsStatus,
    pub yt_dlp: YtDlpToolsStatus,
}

impl ToolsReport {
    pub fn ready(&self) -> bool {
        self.ffmpeg.ffmpeg_version.is_some() && self.yt_dlp.available
    }
}

pub fn ffmpeg_tools_status(paths: &AppPaths, override_path: Option<PathBuf>) -> FfmpegToolsStatus {
    let bundled = paths.ffmpeg_bin_path();
    let program = override_path.unwrap_or_else(|| paths.ffmpeg_cmd());
    FfmpegToolsStatus {
        installed: bundled.exists(),
        ffmpeg_version: tool_version_first_line(&program, "-version"),
        ffmpeg_path: program.to_string_lossy().to_string(),
    }
}

pub fn ytdlp_tools_status(paths: &AppPaths, override_path: Option<PathBuf>) -> YtDlpToolsStatus {
    let bundled = paths.bundled_yt_dlp_path();
    let version = YtDlp::new(paths, override_path)
        .run(&["--version".to_string()], VERSION_PROBE_TIMEOUT_SECS)
        .ok()
        .and_then(|output| first_line(&output.stdout));

    YtDlpToolsStatus {
        available: version.is_some(),
        bundled_installed: bundled.exists(),
        bundled_path: bundled.to_string_lossy().to_string(),
        ytdlp_version: version,
    }
}

pub fn tools_report(
    paths: &AppPaths,
    ffmpeg_override: Option<PathBuf>,
    ytdlp_override: Option<PathBuf>,
) -> ToolsReport {
    ToolsReport {
        ffmpeg: ffmpeg_tools_status(paths, ffmpeg_override),
        yt_dlp: ytdlp_tools_status(paths, ytdlp_override),
    }
}

/// Downloads a static ffmpeg build into the tools directory.
pub fn install_ffmpeg_tools(paths: &AppPaths) -> Result<FfmpegToolsStatus> {
    paths.ensure_dirs()?;

    let destination = paths.ffmpeg_dir();
    std::fs::create_dir_all(&destination)?;

    let download_url = ffmpeg_sidecar::download::ffmpeg_download_url().map_err(install_failed)?;
    log::info!("downloading ffmpeg from {download_url}");
    let archive_path =
        ffmpeg_sidecar::download::download_ffmpeg_package(download_url, &destination)
            .map_err(install_failed)?;
    ffmpeg_sidecar::download::unpack_ffmpeg(&archive_path, &destination)
        .map_err(install_failed)?;

    let status = ffmpeg_tools_status(paths, None);
    if !status.installed {
        return Err(EngineError::Setup(format!(
            "ffmpeg archive unpacked but {} is missing",
            status.ffmpeg_path
        )));
    }
    Ok(status)
}

fn install_failed(err: impl std::fmt::Display) -> EngineError {
    EngineError::Setup(format!("ffmpeg install failed: {err}"))
}

fn tool_version_first_line(program: impl AsRef<OsStr>, arg: &str) -> Option<String> {
    let mut command = crate::cmd::command(program);
    command.arg(arg);
    let output = crate::cmd::run_with_timeout(&mut command, VERSION_PROBE_TIMEOUT_SECS).ok()?;
    if !output.status.success() {
        return None;
    }
    first_line(&output.stdout)
}

fn first_line(stdout: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stdout);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}
