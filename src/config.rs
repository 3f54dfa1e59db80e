use crate::ffmpeg::AudioFormat;
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub webdriver: WebDriverConfig,
    pub extraction: ExtractionConfig,
    pub resolver: ResolverConfig,
    pub acquisition: AcquisitionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    /// Endpoint of a running WebDriver server (chromedriver).
    pub url: String,
    /// When set, this chromedriver binary is spawned on the port from `url`.
    pub chromedriver_path: Option<PathBuf>,
    pub browser_binary: Option<PathBuf>,
    /// Browser profile to reuse, so a logged-in session can see private collections.
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    pub page_wait_secs: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9515".to_string(),
            chromedriver_path: None,
            browser_binary: None,
            user_data_dir: None,
            headless: true,
            page_wait_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub scroll_increment_px: i64,
    pub initial_settle_ms: u64,
    pub settle_ms: u64,
    pub max_passes: usize,
    pub write_page_snapshot: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            scroll_increment_px: 500,
            initial_settle_ms: 1000,
            settle_ms: 500,
            max_passes: 400,
            write_page_snapshot: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverBackend {
    Browser,
    YtDlp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub backend: ResolverBackend,
    /// Prefix the url-encoded query is appended to.
    pub search_url: String,
    pub result_selector: String,
    pub timeout_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            backend: ResolverBackend::Browser,
            search_url: "https://www.youtube.com/results?search_query=".to_string(),
            result_selector: "ytd-video-renderer a#video-title".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Defaults to `<base_dir>/library`.
    pub library_root: Option<PathBuf>,
    pub audio_format: AudioFormat,
    pub workers: usize,
    pub fetch_timeout_secs: u64,
    pub transcode_timeout_secs: u64,
    pub ffmpeg_path: Option<PathBuf>,
    pub yt_dlp_path: Option<PathBuf>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            library_root: None,
            audio_format: AudioFormat::Mp3,
            workers: 4,
            fetch_timeout_secs: 900,
            transcode_timeout_secs: 600,
            ffmpeg_path: None,
            yt_dlp_path: None,
        }
    }
}

const MAX_WORKERS: usize = 16;

impl ExportConfig {
    pub fn library_root(&self, paths: &AppPaths) -> PathBuf {
        self.acquisition
            .library_root
            .clone()
            .unwrap_or_else(|| paths.library_dir())
    }

    pub fn workers(&self) -> usize {
        self.acquisition.workers.clamp(1, MAX_WORKERS)
    }

    pub fn validate(&self) -> Result<()> {
        if self.extraction.scroll_increment_px <= 0 {
            return Err(EngineError::Config(
                "extraction.scroll_increment_px must be positive".to_string(),
            ));
        }
        if self.extraction.max_passes == 0 {
            return Err(EngineError::Config(
                "extraction.max_passes must be at least 1".to_string(),
            ));
        }
        if url::Url::parse(&self.webdriver.url).is_err() {
            return Err(EngineError::Config(format!(
                "webdriver.url is not a valid URL: {}",
                self.webdriver.url
            )));
        }
        Ok(())
    }
}

/// Loads `config/playlist_export.json`; a missing file yields the defaults.
pub fn load_export_config(paths: &AppPaths) -> Result<ExportConfig> {
    let path = paths.config_path();
    if !path.exists() {
        return Ok(ExportConfig::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: ExportConfig = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Config(format!(
            "failed to parse export config at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed)
}

pub fn save_export_config(paths: &AppPaths, config: &ExportConfig) -> Result<()> {
    let path = paths.config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}
