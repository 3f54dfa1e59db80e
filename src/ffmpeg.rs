use crate::acquire::Transcoder;
use crate::cmd;
use crate::paths::AppPaths;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    #[default]
    Mp3,
    M4a,
    Opus,
    Flac,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Opus => "opus",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
        }
    }

    fn codec_args(&self) -> &'static [&'static str] {
        match self {
            AudioFormat::Mp3 => &["-c:a", "libmp3lame", "-q:a", "2"],
            AudioFormat::M4a => &["-c:a", "aac", "-b:a", "192k"],
            AudioFormat::Opus => &["-c:a", "libopus", "-b:a", "160k"],
            AudioFormat::Flac => &["-c:a", "flac"],
            AudioFormat::Wav => &["-c:a", "pcm_s16le"],
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "m4a" | "aac" => Some(AudioFormat::M4a),
            "opus" => Some(AudioFormat::Opus),
            "flac" => Some(AudioFormat::Flac),
            "wav" => Some(AudioFormat::Wav),
            _ => None,
        }
    }
}

/// Demuxes the audio stream of `input` and encodes it as `format` into `output`.
pub fn transcode_audio(
    ffmpeg: &Path,
    input: &Path,
    output: &Path,
    format: AudioFormat,
    timeout_secs: u64,
) -> Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut command = cmd::command(ffmpeg);
    command
        .args(["-nostdin", "-y", "-loglevel", "error"])
        .arg("-i")
        .arg(input)
        .args(["-vn", "-map", "0:a:0"])
        .args(format.codec_args())
        .arg(output);

    cmd::run_checked(&mut command, "ffmpeg", timeout_secs)?;
    Ok(())
}

pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    format: AudioFormat,
    timeout_secs: u64,
}

impl FfmpegTranscoder {
    /// Uses `override_path` when given, else the bundled binary, else `ffmpeg` on PATH.
    pub fn new(
        paths: &AppPaths,
        override_path: Option<PathBuf>,
        format: AudioFormat,
        timeout_secs: u64,
    ) -> Self {
        Self {
            ffmpeg: override_path.unwrap_or_else(|| paths.ffmpeg_cmd()),
            format,
            timeout_secs,
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        transcode_audio(&self.ffmpeg, input, output, self.format, self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_formats_case_insensitively() {
        assert_eq!(AudioFormat::parse("MP3"), Some(AudioFormat::Mp3));
        assert_eq!(AudioFormat::parse(" aac "), Some(AudioFormat::M4a));
        assert_eq!(AudioFormat::parse("ogg"), None);
    }

    #[test]
    fn every_format_has_a_codec() {
        for format in [
            AudioFormat::Mp3,
            AudioFormat::M4a,
            AudioFormat::Opus,
            AudioFormat::Flac,
            AudioFormat::Wav,
        ] {
            assert!(format.codec_args().contains(&"-c:a"));
            assert!(!format.extension().is_empty());
        }
    }

    #[test]
    fn missing_ffmpeg_is_reported_as_missing_tool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = transcode_audio(
            &dir.path().join("no-such-ffmpeg"),
            &dir.path().join("in.webm"),
            &dir.path().join("out.mp3"),
            AudioFormat::Mp3,
            5,
        )
        .expect_err("missing ffmpeg");
        assert!(
            matches!(err, crate::EngineError::ExternalToolMissing { .. }),
            "err={err:?}"
        );
    }
}
