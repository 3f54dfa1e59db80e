//! Append-only record of per-item failures.
//!
//! One failure per line: `name - artist | stage | detail`. Field separators appearing inside
//! values are backslash-escaped so the file can be read back when a retry run opts into it.

use crate::track::TrackKey;
use crate::Result;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const FIELD_SEP: &str = " | ";
const IDENTITY_SEP: &str = " - ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Acquire,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Acquire => "acquire",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "resolve" => Some(Stage::Resolve),
            "acquire" => Some(Stage::Acquire),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub identity: TrackKey,
    pub stage: Stage,
    pub detail: String,
}

impl LedgerEntry {
    pub fn new(identity: TrackKey, stage: Stage, detail: impl Into<String>) -> Self {
        Self {
            identity,
            stage,
            detail: detail.into(),
        }
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}{IDENTITY_SEP}{}{FIELD_SEP}{}{FIELD_SEP}{}",
            escape_identity_part(&self.identity.name),
            escape_identity_part(&self.identity.artist),
            self.stage.as_str(),
            escape_field(&self.detail)
        )
    }

    pub fn parse_line(line: &str) -> Option<Self> {
        let fields = split_unescaped(line, FIELD_SEP, 3);
        if fields.len() != 3 {
            return None;
        }
        let identity = split_unescaped(&fields[0], IDENTITY_SEP, 2);
        if identity.len() != 2 {
            return None;
        }
        let stage = Stage::parse(&fields[1])?;
        Some(Self {
            identity: TrackKey::new(unescape(&identity[0]), unescape(&identity[1])),
            stage,
            detail: unescape(&fields[2]),
        })
    }
}

pub struct FailureLedger {
    path: PathBuf,
    file: Mutex<File>,
    recorded: AtomicUsize,
}

impl FailureLedger {
    /// Opens `path` for appending, creating it and its parent directory if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            recorded: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries appended through this handle during the current run.
    pub fn recorded(&self) -> usize {
        self.recorded.load(Ordering::SeqCst)
    }

    /// Appends one entry and flushes it. Write errors are logged, never propagated.
    pub fn record(&self, entry: LedgerEntry) {
        log::warn!(
            "{} failed for {}: {}",
            entry.stage.as_str(),
            entry.identity,
            entry.detail
        );
        let line = entry.to_line();
        let mut file = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let written = writeln!(file, "{line}").and_then(|_| file.flush());
        match written {
            Ok(()) => {
                self.recorded.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => {
                log::error!(
                    "could not append to failure ledger {}: {err}",
                    self.path.display()
                );
            }
        }
    }
}

/// Reads every well-formed entry from a ledger file. A missing file yields no entries.
pub fn load_entries(path: &Path) -> Result<Vec<LedgerEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match LedgerEntry::parse_line(line) {
            Some(entry) => out.push(entry),
            None => log::warn!("skipping malformed ledger line {} in {}", idx + 1, path.display()),
        }
    }
    Ok(out)
}

/// Identities named anywhere in the ledger, regardless of stage.
pub fn failed_identities(path: &Path) -> Result<HashSet<TrackKey>> {
    Ok(load_entries(path)?
        .into_iter()
        .map(|entry| entry.identity)
        .collect())
}

fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\|"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

// Every hyphen is escaped, so the only unescaped " - " in an identity is the separator even
// when a name ends in " -" or an artist starts with "- ".
fn escape_identity_part(value: &str) -> String {
    escape_field(value).replace('-', "\\-")
}

/// Splits on `sep` occurrences that are not preceded by an escape, keeping escapes intact.
fn split_unescaped(input: &str, sep: &str, limit: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut rest = input;
    while let Some(ch) = rest.chars().next() {
        if ch == '\\' {
            current.push(ch);
            rest = &rest[1..];
            if let Some(next) = rest.chars().next() {
                current.push(next);
                rest = &rest[next.len_utf8()..];
            }
            continue;
        }
        if parts.len() + 1 < limit && rest.starts_with(sep) {
            parts.push(std::mem::take(&mut current));
            rest = &rest[sep.len()..];
            continue;
        }
        current.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    parts.push(current);
    parts
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
