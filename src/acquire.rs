use crate::ledger::{FailureLedger, LedgerEntry, Stage};
use crate::paths::{path_is_nonempty_file, LibraryLayout};
use crate::resolver::redact_url_for_log;
use crate::track::{AcquisitionResult, ResolvedTrack};
use crate::{EngineError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

/// Downloads the media behind a locator into `workdir` and returns the file it wrote.
pub trait MediaFetcher: Sync {
    fn fetch(&self, locator: &str, workdir: &Path) -> Result<PathBuf>;
}

/// Converts a downloaded container into the library's audio format.
pub trait Transcoder: Sync {
    fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

pub struct Acquirer<'a> {
    layout: &'a LibraryLayout,
    tmp_root: PathBuf,
    fetcher: &'a dyn MediaFetcher,
    transcoder: &'a dyn Transcoder,
    ledger: &'a FailureLedger,
}

impl<'a> Acquirer<'a> {
    pub fn new(
        layout: &'a LibraryLayout,
        tmp_root: PathBuf,
        fetcher: &'a dyn MediaFetcher,
        transcoder: &'a dyn Transcoder,
        ledger: &'a FailureLedger,
    ) -> Self {
        Self {
            layout,
            tmp_root,
            fetcher,
            transcoder,
            ledger,
        }
    }

    /// Fetches and transcodes one track into its library path.
    ///
    /// Unresolved tracks and tracks whose destination already exists are skipped without side
    /// effects and reported as not succeeded. Failures go to the ledger.
    pub fn acquire(&self, collection_name: &str, resolved: &ResolvedTrack) -> AcquisitionResult {
        let destination_path = self
            .layout
            .destination_path(collection_name, &resolved.track);
        let mut result = AcquisitionResult {
            track: resolved.track.clone(),
            destination_path,
            succeeded: false,
        };

        let Some(locator) = resolved.locator.as_deref() else {
            return result;
        };
        if result.destination_path.exists() {
            log::debug!("{} already present, skipping", result.destination_path.display());
            return result;
        }

        match self.fetch_and_transcode(locator, &result.destination_path) {
            Ok(()) => {
                log::info!("saved {}", result.destination_path.display());
                result.succeeded = true;
            }
            Err(err) => {
                self.ledger.record(LedgerEntry::new(
                    resolved.track.key(),
                    Stage::Acquire,
                    format!(
                        "{locator} -> {}: {err}",
                        result.destination_path.display()
                    ),
                ));
            }
        }
        result
    }

    fn fetch_and_transcode(&self, locator: &str, destination: &Path) -> Result<()> {
        std::fs::create_dir_all(&self.tmp_root)?;
        // Removed on drop, whichever way this function exits.
        let workdir = tempfile::Builder::new()
            .prefix("fetch-")
            .tempdir_in(&self.tmp_root)?;

        log::debug!("fetching {}", redact_url_for_log(locator));
        let fetched = self.fetcher.fetch(locator, workdir.path())?;

        let parent = destination.parent().ok_or_else(|| {
            EngineError::Acquisition(format!("destination has no parent: {}", destination.display()))
        })?;
        std::fs::create_dir_all(parent)?;

        // Staged next to the destination and renamed into place only once complete, so an
        // interrupted transcode never looks like a finished file on the next run.
        let staged = tempfile::Builder::new()
            .prefix(".partial-")
            .suffix(&format!(".{}", self.layout.extension.trim_start_matches('.')))
            .tempfile_in(parent)?;
        self.transcoder.transcode(&fetched, staged.path())?;
        if !path_is_nonempty_file(staged.path()) {
            return Err(EngineError::Acquisition(
                "transcoder produced an empty file".to_string(),
            ));
        }

        staged
            .persist(destination)
            .map_err(|e| EngineError::Io(e.error))?;
        relax_permissions(destination);
        Ok(())
    }

    /// Acquires `items` on up to `workers` threads. `after` runs on the worker thread for every
    /// result as soon as it is known; results come back in input order.
    pub fn acquire_all<F>(
        &self,
        collection_name: &str,
        items: &[ResolvedTrack],
        workers: usize,
        after: F,
    ) -> Vec<AcquisitionResult>
    where
        F: Fn(&AcquisitionResult) + Sync,
    {
        let next = AtomicUsize::new(0);
        let finished: Mutex<Vec<(usize, AcquisitionResult)>> =
            Mutex::new(Vec::with_capacity(items.len()));
        let workers = workers.clamp(1, items.len().max(1));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(idx) else {
                        break;
                    };
                    let result = self.acquire(collection_name, item);
                    after(&result);
                    finished
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push((idx, result));
                });
            }
        });

        let mut finished = finished
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        finished.sort_by_key(|(idx, _)| *idx);
        finished.into_iter().map(|(_, result)| result).collect()
    }
}

// Temp files are created owner-only; library files should read like any other download.
#[cfg(unix)]
fn relax_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644));
}

#[cfg(not(unix))]
fn relax_permissions(_path: &Path) {}
