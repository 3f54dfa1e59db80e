use crate::acquire::MediaFetcher;
use crate::cmd::{self, CommandRunError};
use crate::paths::AppPaths;
use crate::resolver::SearchSurface;
use crate::{EngineError, Result};
use std::path::{Path, PathBuf};
use std::process::Output;

/// Locates a working yt-dlp and runs it with a timeout.
#[derive(Debug, Clone)]
pub struct YtDlp {
    candidates: Vec<(PathBuf, Vec<String>)>,
}

impl YtDlp {
    /// Tries, in order: `override_path`, the bundled binary, `yt-dlp` on PATH, then the
    /// Python module through `python` and `python3`.
    pub fn new(paths: &AppPaths, override_path: Option<PathBuf>) -> Self {
        let mut candidates: Vec<(PathBuf, Vec<String>)> = Vec::new();
        if let Some(path) = override_path {
            candidates.push((path, Vec::new()));
        }
        let bundled = paths.bundled_yt_dlp_path();
        if bundled.exists() {
            candidates.push((bundled, Vec::new()));
        }
        candidates.push((PathBuf::from("yt-dlp"), Vec::new()));
        for python in ["python", "python3"] {
            candidates.push((
                PathBuf::from(python),
                vec!["-m".to_string(), "yt_dlp".to_string()],
            ));
        }
        Self { candidates }
    }

    pub fn run(&self, args: &[String], timeout_secs: u64) -> Result<Output> {
        let mut failures: Vec<String> = Vec::new();

        for (program, prefix) in &self.candidates {
            let mut command = cmd::command(program);
            command.args(prefix);
            command.args(args);
            let label = program.to_string_lossy();
            match cmd::run_with_timeout(&mut command, timeout_secs) {
                Ok(output) if output.status.success() => return Ok(output),
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    // `python -m yt_dlp` without the module installed is as good as missing.
                    if !prefix.is_empty() && stderr.contains("No module named") {
                        continue;
                    }
                    failures.push(format!(
                        "{label} failed (code={:?}): {}",
                        output.status.code(),
                        if stderr.is_empty() {
                            "unknown error".to_string()
                        } else {
                            stderr
                        }
                    ));
                }
                Err(CommandRunError::Spawn(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    continue;
                }
                Err(CommandRunError::Spawn(e)) => {
                    failures.push(format!("{label} could not start: {e}"));
                }
                Err(CommandRunError::Wait(e)) => {
                    failures.push(format!("{label} failed while running: {e}"));
                }
                Err(CommandRunError::TimedOut(limit)) => {
                    return Err(EngineError::ExternalToolTimedOut {
                        tool: "yt-dlp".to_string(),
                        secs: limit,
                    });
                }
            }
        }

        if failures.is_empty() {
            return Err(EngineError::ExternalToolMissing {
                tool: "yt-dlp".to_string(),
            });
        }
        Err(EngineError::ExternalToolFailed {
            tool: "yt-dlp".to_string(),
            code: None,
            stderr: failures.join(" | "),
        })
    }
}

/// Downloads the best audio stream behind a locator into a caller-owned work directory.
pub struct YtDlpFetcher {
    ytdlp: YtDlp,
    ffmpeg_location: Option<PathBuf>,
    timeout_secs: u64,
}

impl YtDlpFetcher {
    pub fn new(ytdlp: YtDlp, ffmpeg_location: Option<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            ytdlp,
            ffmpeg_location,
            timeout_secs,
        }
    }
}

impl MediaFetcher for YtDlpFetcher {
    fn fetch(&self, locator: &str, workdir: &Path) -> Result<PathBuf> {
        let mut args = fetch_args(locator, workdir);
        if let Some(ffmpeg) = self.ffmpeg_location.as_deref() {
            if ffmpeg.exists() {
                args.push("--ffmpeg-location".to_string());
                args.push(ffmpeg.to_string_lossy().to_string());
            }
        }

        let output = self.ytdlp.run(&args, self.timeout_secs)?;
        let reported = last_nonempty_line(&output.stdout).ok_or_else(|| {
            EngineError::Acquisition("yt-dlp did not report an output file".to_string())
        })?;

        let downloaded = PathBuf::from(reported);
        let downloaded = if downloaded.is_absolute() {
            downloaded
        } else {
            workdir.join(downloaded)
        };
        let meta = std::fs::metadata(&downloaded).map_err(|_| {
            EngineError::Acquisition(format!(
                "yt-dlp reported a missing file: {}",
                downloaded.display()
            ))
        })?;
        if meta.len() == 0 {
            return Err(EngineError::Acquisition(
                "yt-dlp downloaded an empty file".to_string(),
            ));
        }
        Ok(downloaded)
    }
}

fn fetch_args(locator: &str, workdir: &Path) -> Vec<String> {
    vec![
        "--no-playlist".to_string(),
        "--socket-timeout".to_string(),
        "30".to_string(),
        "--retries".to_string(),
        "3".to_string(),
        "--fragment-retries".to_string(),
        "3".to_string(),
        "--no-warnings".to_string(),
        "--no-progress".to_string(),
        "--no-part".to_string(),
        "-f".to_string(),
        "bestaudio/best".to_string(),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        "-P".to_string(),
        workdir.to_string_lossy().to_string(),
        "-o".to_string(),
        "source.%(ext)s".to_string(),
        locator.to_string(),
    ]
}

/// Search backend that asks yt-dlp for the first `ytsearch` hit instead of using the browser.
pub struct YtDlpSearch {
    ytdlp: YtDlp,
    timeout_secs: u64,
}

impl YtDlpSearch {
    pub fn new(ytdlp: YtDlp, timeout_secs: u64) -> Self {
        Self {
            ytdlp,
            timeout_secs,
        }
    }
}

impl SearchSurface for YtDlpSearch {
    fn first_result(&mut self, query: &str) -> Result<Option<String>> {
        let args = vec![
            "--flat-playlist".to_string(),
            "--no-warnings".to_string(),
            "--print".to_string(),
            "%(webpage_url,url)s".to_string(),
            format!("ytsearch1:{query}"),
        ];
        let output = self.ytdlp.run(&args, self.timeout_secs)?;
        Ok(first_locator_line(&output.stdout))
    }
}

fn last_nonempty_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}

fn first_locator_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && *line != "NA")
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_prefer_override_then_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let ytdlp = YtDlp::new(&paths, Some(PathBuf::from("/opt/yt-dlp")));
        let programs: Vec<String> = ytdlp
            .candidates
            .iter()
            .map(|(p, _)| p.to_string_lossy().to_string())
            .collect();
        assert_eq!(programs, vec!["/opt/yt-dlp", "yt-dlp", "python", "python3"]);
        assert_eq!(ytdlp.candidates[2].1, vec!["-m", "yt_dlp"]);
    }

    #[test]
    fn fetch_args_target_workdir_and_print_final_path() {
        let args = fetch_args("https://v.example/w?v=1", Path::new("/tmp/work"));
        let joined = args.join(" ");
        assert!(joined.contains("-P /tmp/work"));
        assert!(joined.contains("--print after_move:filepath"));
        assert_eq!(args.last().map(String::as_str), Some("https://v.example/w?v=1"));
    }

    #[test]
    fn stdout_parsing_skips_blank_and_na_lines() {
        assert_eq!(
            last_nonempty_line(b"\n/tmp/a.webm\n\n").as_deref(),
            Some("/tmp/a.webm")
        );
        assert_eq!(last_nonempty_line(b"\n \n"), None);
        assert_eq!(
            first_locator_line(b"NA\nhttps://www.youtube.com/watch?v=x\n").as_deref(),
            Some("https://www.youtube.com/watch?v=x")
        );
        assert_eq!(first_locator_line(b""), None);
    }
}
