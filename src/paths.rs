use crate::track::Track;
use std::path::{Path, PathBuf};

/// Characters stripped from every name component before it reaches the filesystem.
pub const FORBIDDEN_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const BASE_DIR_ENV_VAR: &str = "PLAYLIST_EXPORT_BASE_DIR";
const DEFAULT_BASE_DIR: &str = ".playlist_export";
const FALLBACK_COLLECTION_DIR: &str = "Untitled collection";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// `PLAYLIST_EXPORT_BASE_DIR` when set, otherwise `./.playlist_export`.
    pub fn from_env() -> Self {
        if let Ok(v) = std::env::var(BASE_DIR_ENV_VAR) {
            let t = v.trim();
            if !t.is_empty() {
                return Self::new(PathBuf::from(t));
            }
        }
        Self::new(PathBuf::from(DEFAULT_BASE_DIR))
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir().join("playlist_export.json")
    }

    pub fn library_dir(&self) -> PathBuf {
        self.base_dir.join("library")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.logs_dir().join("failures.log")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    /// Most recent rendered page, rewritten on every extraction pass.
    pub fn page_snapshot_path(&self) -> PathBuf {
        self.cache_dir().join("last_page.html")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.base_dir.join("tmp")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir.join("tools")
    }

    pub fn ffmpeg_dir(&self) -> PathBuf {
        self.tools_dir().join("ffmpeg")
    }

    pub fn ffmpeg_bin_path(&self) -> PathBuf {
        let mut path = self.ffmpeg_dir().join("ffmpeg");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ffmpeg_cmd(&self) -> PathBuf {
        let path = self.ffmpeg_bin_path();
        if path.exists() {
            path
        } else {
            PathBuf::from("ffmpeg")
        }
    }

    pub fn bundled_yt_dlp_path(&self) -> PathBuf {
        let mut path = self.tools_dir().join("yt-dlp").join("yt-dlp");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.cache_dir())?;
        std::fs::create_dir_all(self.tmp_dir())?;
        std::fs::create_dir_all(self.tools_dir())?;
        Ok(())
    }
}

/// Where acquired audio lands: `<root>/<collection>/<name> - <artist>.<ext>`.
#[derive(Debug, Clone)]
pub struct LibraryLayout {
    pub root: PathBuf,
    pub extension: String,
}

impl LibraryLayout {
    pub fn new(root: PathBuf, extension: impl Into<String>) -> Self {
        Self {
            root,
            extension: extension.into(),
        }
    }

    pub fn collection_dir(&self, display_name: &str) -> PathBuf {
        let safe = sanitize_filename_component(display_name);
        if safe.is_empty() {
            self.root.join(FALLBACK_COLLECTION_DIR)
        } else {
            self.root.join(safe)
        }
    }

    pub fn destination_path(&self, display_name: &str, track: &Track) -> PathBuf {
        self.collection_dir(display_name)
            .join(track_file_name(track, &self.extension))
    }
}

pub fn track_file_name(track: &Track, extension: &str) -> String {
    format!(
        "{} - {}.{}",
        sanitize_filename_component(&track.name),
        sanitize_filename_component(&track.artist),
        extension.trim_start_matches('.')
    )
}

/// Strips [`FORBIDDEN_FILENAME_CHARS`] and control characters, then trims surrounding
/// whitespace and trailing dots.
pub fn sanitize_filename_component(input: &str) -> String {
    let out: String = input
        .chars()
        .filter(|ch| !FORBIDDEN_FILENAME_CHARS.contains(ch) && !ch.is_control())
        .collect();
    out.trim().trim_end_matches('.').trim_end().to_string()
}

pub fn path_is_nonempty_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
