//! Resolve, acquire and tag a collection, and the top-level export run that wires the browser,
//! the external tools and the library together.

use crate::acquire::{Acquirer, MediaFetcher, Transcoder};
use crate::browser::{BrowserSearch, CollectionPage};
use crate::config::{ExportConfig, ResolverBackend};
use crate::extractor::{extract, ExtractSettings};
use crate::ffmpeg::FfmpegTranscoder;
use crate::ledger::{failed_identities, FailureLedger, LedgerEntry, Stage};
use crate::paths::{AppPaths, LibraryLayout};
use crate::resolver::{Resolver, SearchSurface};
use crate::tagger;
use crate::track::{Collection, ResolvedTrack, Track, TrackKey};
use crate::webdriver::WebDriverSession;
use crate::ytdlp::{YtDlp, YtDlpFetcher, YtDlpSearch};
use crate::{EngineError, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub collection: String,
    /// Tracks considered this run, after any ledger filter.
    pub total: usize,
    pub already_present: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub acquired: usize,
    pub failed: usize,
    /// Tracks skipped because sanitization gave them the same file as an earlier track.
    pub destination_collisions: usize,
    pub ledger_entries: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Restrict the run to identities already present in the failure ledger.
    pub retry_failed: bool,
}

pub struct Pipeline<'a> {
    layout: &'a LibraryLayout,
    ledger: &'a FailureLedger,
    fetcher: &'a dyn MediaFetcher,
    transcoder: &'a dyn Transcoder,
    tmp_root: PathBuf,
    workers: usize,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        layout: &'a LibraryLayout,
        ledger: &'a FailureLedger,
        fetcher: &'a dyn MediaFetcher,
        transcoder: &'a dyn Transcoder,
        tmp_root: PathBuf,
        workers: usize,
    ) -> Self {
        Self {
            layout,
            ledger,
            fetcher,
            transcoder,
            tmp_root,
            workers: workers.max(1),
        }
    }

    /// Tracks whose destination already exists are skipped before any search. The rest are
    /// resolved one at a time, then acquired on the worker pool and tagged as each one lands.
    ///
    /// Distinct identities can sanitize to the same file name. Only the first of them (in
    /// artist, name order) is fetched; the others are ledgered as collisions, so no two
    /// workers ever write the same destination.
    pub fn run(
        &self,
        collection: &Collection,
        surface: &mut dyn SearchSurface,
        only: Option<&HashSet<TrackKey>>,
    ) -> RunSummary {
        let ledger_before = self.ledger.recorded();
        let display_name = collection.display_name.as_str();
        let mut summary = RunSummary {
            collection: display_name.to_string(),
            ..RunSummary::default()
        };

        let mut pending: Vec<&Track> = Vec::new();
        let mut claimed: HashMap<PathBuf, TrackKey> = HashMap::new();
        for track in collection.sorted_tracks() {
            if only.is_some_and(|keys| !keys.contains(&track.key())) {
                continue;
            }
            summary.total += 1;
            let destination = self.layout.destination_path(display_name, track);
            if let Some(owner) = claimed.get(&destination) {
                summary.destination_collisions += 1;
                self.ledger.record(LedgerEntry::new(
                    track.key(),
                    Stage::Acquire,
                    format!(
                        "destination {} already taken by {owner}",
                        destination.display()
                    ),
                ));
                continue;
            }
            claimed.insert(destination.clone(), track.key());
            if destination.exists() {
                summary.already_present += 1;
            } else {
                pending.push(track);
            }
        }
        log::info!(
            "{}: {} tracks, {} already in library, {} to fetch",
            display_name,
            summary.total,
            summary.already_present,
            pending.len()
        );

        let mut resolver = Resolver::new(surface, self.ledger);
        let resolved: Vec<ResolvedTrack> = pending
            .into_iter()
            .map(|track| resolver.resolve(track))
            .filter(|item| {
                if item.is_resolved() {
                    summary.resolved += 1;
                    true
                } else {
                    summary.unresolved += 1;
                    false
                }
            })
            .collect();

        let acquirer = Acquirer::new(
            self.layout,
            self.tmp_root.clone(),
            self.fetcher,
            self.transcoder,
            self.ledger,
        );
        let results = acquirer.acquire_all(display_name, &resolved, self.workers, |result| {
            if result.succeeded {
                tagger::tag(&result.destination_path, &result.track);
            }
        });

        summary.acquired = results.iter().filter(|r| r.succeeded).count();
        summary.failed = results.len() - summary.acquired;
        summary.ledger_entries = self.ledger.recorded() - ledger_before;
        summary
    }
}

/// One complete export of the collection at `url`.
///
/// Only setup problems (config, browser, collection page) come back as errors; every per-track
/// failure is ledgered and reflected in the summary.
pub fn run_export(
    paths: &AppPaths,
    config: &ExportConfig,
    url: &str,
    options: RunOptions,
) -> Result<RunSummary> {
    config.validate().map_err(|e| setup_failure("configuration rejected", e))?;
    paths.ensure_dirs().map_err(|e| {
        setup_failure(
            &format!("could not prepare {}", paths.base_dir.display()),
            e.into(),
        )
    })?;

    let ledger_path = paths.ledger_path();
    let only = if options.retry_failed {
        let keys = failed_identities(&ledger_path)
            .map_err(|e| setup_failure("could not read failure ledger", e))?;
        log::info!("retrying {} identities from {}", keys.len(), ledger_path.display());
        Some(keys)
    } else {
        None
    };
    let ledger = FailureLedger::open(&ledger_path)
        .map_err(|e| setup_failure("could not open failure ledger", e))?;

    let mut session = WebDriverSession::start(&config.webdriver)?;
    let extraction = {
        let mut page = CollectionPage::open(
            &mut session,
            url,
            Duration::from_secs(config.webdriver.page_wait_secs),
            Duration::from_millis(config.extraction.initial_settle_ms),
        )?;
        let header = page
            .header()
            .map_err(|e| setup_failure("could not read collection page", e))?;
        let settings =
            ExtractSettings::from_config(&config.extraction, Some(paths.page_snapshot_path()));
        extract(&mut page, header, &settings)
    };
    log::info!(
        "extracted {} tracks from {} in {} passes (converged={}, collisions={})",
        extraction.collection.len(),
        extraction.collection.display_name,
        extraction.passes,
        extraction.converged,
        extraction.collisions
    );

    let acquisition = &config.acquisition;
    let layout = LibraryLayout::new(
        config.library_root(paths),
        acquisition.audio_format.extension(),
    );
    let ytdlp = YtDlp::new(paths, acquisition.yt_dlp_path.clone());
    let fetcher = YtDlpFetcher::new(
        ytdlp.clone(),
        Some(
            acquisition
                .ffmpeg_path
                .clone()
                .unwrap_or_else(|| paths.ffmpeg_bin_path()),
        ),
        acquisition.fetch_timeout_secs,
    );
    let transcoder = FfmpegTranscoder::new(
        paths,
        acquisition.ffmpeg_path.clone(),
        acquisition.audio_format,
        acquisition.transcode_timeout_secs,
    );
    let pipeline = Pipeline::new(
        &layout,
        &ledger,
        &fetcher,
        &transcoder,
        paths.tmp_dir(),
        config.workers(),
    );

    let collection = &extraction.collection;
    let summary = match config.resolver.backend {
        ResolverBackend::Browser => {
            let mut search = BrowserSearch::new(&mut session, &config.resolver);
            pipeline.run(collection, &mut search, only.as_ref())
        }
        ResolverBackend::YtDlp => {
            let mut search = YtDlpSearch::new(ytdlp, config.resolver.timeout_secs);
            pipeline.run(collection, &mut search, only.as_ref())
        }
    };
    session.quit();

    if summary.ledger_entries > 0 {
        log::warn!(
            "{} failures recorded in {}",
            summary.ledger_entries,
            ledger.path().display()
        );
    }
    Ok(summary)
}

fn setup_failure(context: &str, err: EngineError) -> EngineError {
    match err {
        EngineError::Setup(_) => err,
        other => EngineError::Setup(format!("{context}: {other}")),
    }
}
