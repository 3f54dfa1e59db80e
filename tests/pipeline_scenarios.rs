use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use filetime::FileTime;
use lofty::{read_from_path, Accessor, TaggedFileExt};

use playlist_export::acquire::{MediaFetcher, Transcoder};
use playlist_export::ledger::{failed_identities, load_entries, FailureLedger, Stage};
use playlist_export::paths::LibraryLayout;
use playlist_export::pipeline::Pipeline;
use playlist_export::resolver::SearchSurface;
use playlist_export::track::{Collection, Track};
use playlist_export::{EngineError, Result};

struct ScriptedSearch {
    timeouts: HashSet<String>,
    queries: Vec<String>,
}

impl ScriptedSearch {
    fn new(timeouts: &[&str]) -> Self {
        Self {
            timeouts: timeouts.iter().map(|q| q.to_string()).collect(),
            queries: Vec::new(),
        }
    }
}

impl SearchSurface for ScriptedSearch {
    fn first_result(&mut self, query: &str) -> Result<Option<String>> {
        self.queries.push(query.to_string());
        if self.timeouts.contains(query) {
            return Err(EngineError::Resolution(
                "no result within 15s".to_string(),
            ));
        }
        let slug: String = query
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        Ok(Some(format!("https://video.example/watch/{slug}")))
    }
}

#[derive(Default)]
struct RecordingFetcher {
    failing: Mutex<HashSet<String>>,
    fetched: Mutex<Vec<String>>,
}

impl RecordingFetcher {
    fn fail(&self, locator: &str) {
        self.failing
            .lock()
            .expect("lock")
            .insert(locator.to_string());
    }

    fn heal(&self) {
        self.failing.lock().expect("lock").clear();
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().expect("lock").clone()
    }
}

impl MediaFetcher for RecordingFetcher {
    fn fetch(&self, locator: &str, workdir: &Path) -> Result<PathBuf> {
        self.fetched
            .lock()
            .expect("lock")
            .push(locator.to_string());
        if self.failing.lock().expect("lock").contains(locator) {
            return Err(EngineError::ExternalToolFailed {
                tool: "yt-dlp".to_string(),
                code: Some(1),
                stderr: "ERROR: Video unavailable".to_string(),
            });
        }
        let path = workdir.join("source.webm");
        std::fs::write(&path, b"container bytes")?;
        Ok(path)
    }
}

/// Stands in for ffmpeg by writing a short silent WAV the tagger can open.
#[derive(Default)]
struct WavTranscoder {
    runs: AtomicUsize,
}

impl Transcoder for WavTranscoder {
    fn transcode(&self, _input: &Path, output: &Path) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(output, spec)
            .map_err(|e| EngineError::Acquisition(e.to_string()))?;
        for _ in 0..400 {
            writer
                .write_sample(0i16)
                .map_err(|e| EngineError::Acquisition(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| EngineError::Acquisition(e.to_string()))?;
        Ok(())
    }
}

fn three_track_collection() -> Collection {
    Collection::from_tracks(
        "Road Trip",
        3,
        [
            Track::new("One", "A").with_album("First").with_track_num(1),
            Track::new("Two", "B").with_album("Second").with_track_num(2),
            Track::new("Three", "C").with_album("Third").with_track_num(3),
        ],
    )
}

fn assert_tagged(path: &Path, title: &str, artist: &str) {
    let tagged = read_from_path(path).expect("read tags");
    let tag = tagged.primary_tag().expect("primary tag");
    assert_eq!(tag.title().as_deref(), Some(title));
    assert_eq!(tag.artist().as_deref(), Some(artist));
}

#[test]
fn resolution_timeout_is_isolated_to_one_track() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = LibraryLayout::new(dir.path().join("library"), "wav");
    let ledger = FailureLedger::open(&dir.path().join("logs/failures.log")).expect("ledger");
    let fetcher = RecordingFetcher::default();
    let transcoder = WavTranscoder::default();
    let pipeline = Pipeline::new(
        &layout,
        &ledger,
        &fetcher,
        &transcoder,
        dir.path().join("tmp"),
        2,
    );
    let collection = three_track_collection();
    let mut search = ScriptedSearch::new(&["Two B"]);

    let summary = pipeline.run(&collection, &mut search, None);

    assert_eq!(summary.total, 3);
    assert_eq!(summary.resolved, 2);
    assert_eq!(summary.unresolved, 1);
    assert_eq!(summary.acquired, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.ledger_entries, 1);

    let album = dir.path().join("library").join("Road Trip");
    assert!(album.join("One - A.wav").is_file());
    assert!(album.join("Three - C.wav").is_file());
    assert!(!album.join("Two - B.wav").exists());

    let entries = load_entries(ledger.path()).expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].identity, Track::new("Two", "B").key());
    assert_eq!(entries[0].stage, Stage::Resolve);
}

fn audio_files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read_dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn unresolved_track_is_the_only_one_retried_on_the_next_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = LibraryLayout::new(dir.path().join("library"), "wav");
    let ledger = FailureLedger::open(&dir.path().join("logs/failures.log")).expect("ledger");
    let fetcher = RecordingFetcher::default();
    let transcoder = WavTranscoder::default();
    let pipeline = Pipeline::new(
        &layout,
        &ledger,
        &fetcher,
        &transcoder,
        dir.path().join("tmp"),
        3,
    );
    let collection = three_track_collection();
    let album = dir.path().join("library").join("Road Trip");

    let first = pipeline.run(&collection, &mut ScriptedSearch::new(&["Two B"]), None);
    assert_eq!(first.acquired, 2);
    assert_eq!(first.unresolved, 1);
    assert_eq!(first.ledger_entries, 1);
    assert_eq!(audio_files_in(&album), vec!["One - A.wav", "Three - C.wav"]);
    assert_tagged(&album.join("One - A.wav"), "One", "A");
    assert_tagged(&album.join("Three - C.wav"), "Three", "C");

    let entries = load_entries(ledger.path()).expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].identity, Track::new("Two", "B").key());
    assert_eq!(entries[0].stage, Stage::Resolve);

    let fetches_before = fetcher.fetched().len();
    assert_eq!(fetches_before, 2);

    let mut search = ScriptedSearch::new(&[]);
    let second = pipeline.run(&collection, &mut search, None);

    assert_eq!(search.queries, vec!["Two B"]);
    assert_eq!(
        fetcher.fetched()[fetches_before..].to_vec(),
        vec!["https://video.example/watch/Two-B".to_string()]
    );
    assert_eq!(second.already_present, 2);
    assert_eq!(second.acquired, 1);
    assert_eq!(second.ledger_entries, 0);
    assert_eq!(
        audio_files_in(&album),
        vec!["One - A.wav", "Three - C.wav", "Two - B.wav"]
    );
    assert_tagged(&album.join("Two - B.wav"), "Two", "B");
}

#[test]
fn tracks_sanitized_to_one_file_are_fetched_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = LibraryLayout::new(dir.path().join("library"), "wav");
    let ledger = FailureLedger::open(&dir.path().join("logs/failures.log")).expect("ledger");
    let fetcher = RecordingFetcher::default();
    let transcoder = WavTranscoder::default();
    let pipeline = Pipeline::new(
        &layout,
        &ledger,
        &fetcher,
        &transcoder,
        dir.path().join("tmp"),
        2,
    );
    let collection =
        Collection::from_tracks("Mix", 2, [Track::new("AC/DC", "X"), Track::new("ACDC", "X")]);

    let mut search = ScriptedSearch::new(&[]);
    let summary = pipeline.run(&collection, &mut search, None);

    assert_eq!(summary.total, 2);
    assert_eq!(summary.destination_collisions, 1);
    assert_eq!(summary.acquired, 1);
    assert_eq!(summary.ledger_entries, 1);
    assert_eq!(fetcher.fetched().len(), 1);
    assert_eq!(search.queries, vec!["AC/DC X"]);

    let album = dir.path().join("library").join("Mix");
    assert_eq!(audio_files_in(&album), vec!["ACDC - X.wav"]);
    assert_tagged(&album.join("ACDC - X.wav"), "AC/DC", "X");

    let entries = load_entries(ledger.path()).expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].identity, Track::new("ACDC", "X").key());
    assert!(entries[0].detail.contains("ACDC - X.wav"));
    assert!(entries[0].detail.contains("AC/DC - X"));
}

#[test]
fn rerun_only_reattempts_the_failed_track() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = LibraryLayout::new(dir.path().join("library"), "wav");
    let ledger = FailureLedger::open(&dir.path().join("logs/failures.log")).expect("ledger");
    let fetcher = RecordingFetcher::default();
    fetcher.fail("https://video.example/watch/Two-B");
    let transcoder = WavTranscoder::default();
    let pipeline = Pipeline::new(
        &layout,
        &ledger,
        &fetcher,
        &transcoder,
        dir.path().join("tmp"),
        3,
    );
    let collection = three_track_collection();

    let first = pipeline.run(&collection, &mut ScriptedSearch::new(&[]), None);
    assert_eq!(first.acquired, 2);
    assert_eq!(first.failed, 1);
    assert_eq!(first.ledger_entries, 1);

    let album = dir.path().join("library").join("Road Trip");
    let one = album.join("One - A.wav");
    let three = album.join("Three - C.wav");
    assert_tagged(&one, "One", "A");
    assert_tagged(&three, "Three", "C");
    assert!(!album.join("Two - B.wav").exists());

    let entries = load_entries(ledger.path()).expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].stage, Stage::Acquire);
    assert!(entries[0].detail.contains("https://video.example/watch/Two-B"));

    let pinned = FileTime::from_unix_time(1_500_000_000, 0);
    filetime::set_file_mtime(&one, pinned).expect("pin mtime");
    filetime::set_file_mtime(&three, pinned).expect("pin mtime");
    let fetches_before = fetcher.fetched().len();

    let mut search = ScriptedSearch::new(&[]);
    let second = pipeline.run(&collection, &mut search, None);

    assert_eq!(second.already_present, 2);
    assert_eq!(search.queries, vec!["Two B"]);
    assert_eq!(
        fetcher.fetched()[fetches_before..].to_vec(),
        vec!["https://video.example/watch/Two-B".to_string()]
    );
    for path in [&one, &three] {
        let meta = std::fs::metadata(path).expect("meta");
        assert_eq!(FileTime::from_last_modification_time(&meta), pinned);
    }
    assert_eq!(second.ledger_entries, 1);
    assert_eq!(load_entries(ledger.path()).expect("entries").len(), 2);
}

#[test]
fn ledger_filter_limits_run_to_failed_identities() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger_path = dir.path().join("logs/failures.log");
    let layout = LibraryLayout::new(dir.path().join("library"), "wav");
    let fetcher = RecordingFetcher::default();
    fetcher.fail("https://video.example/watch/Three-C");
    let transcoder = WavTranscoder::default();
    let collection = three_track_collection();

    {
        let ledger = FailureLedger::open(&ledger_path).expect("ledger");
        let pipeline = Pipeline::new(
            &layout,
            &ledger,
            &fetcher,
            &transcoder,
            dir.path().join("tmp"),
            1,
        );
        let summary = pipeline.run(&collection, &mut ScriptedSearch::new(&["Two B"]), None);
        assert_eq!(summary.acquired, 1);
        assert_eq!(summary.ledger_entries, 2);
    }

    // The library copy of "One" is gone, but it never failed, so a retry run ignores it.
    std::fs::remove_file(dir.path().join("library/Road Trip/One - A.wav")).expect("remove");
    fetcher.heal();

    let only = failed_identities(&ledger_path).expect("identities");
    assert_eq!(only.len(), 2);

    let ledger = FailureLedger::open(&ledger_path).expect("ledger");
    let pipeline = Pipeline::new(
        &layout,
        &ledger,
        &fetcher,
        &transcoder,
        dir.path().join("tmp"),
        2,
    );
    let mut search = ScriptedSearch::new(&[]);
    let summary = pipeline.run(&collection, &mut search, Some(&only));

    assert_eq!(summary.total, 2);
    assert_eq!(summary.acquired, 2);
    assert_eq!(summary.ledger_entries, 0);
    let mut queries = search.queries.clone();
    queries.sort();
    assert_eq!(queries, vec!["Three C", "Two B"]);
    assert!(!dir.path().join("library/Road Trip/One - A.wav").exists());
}

#[test]
fn empty_collection_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = LibraryLayout::new(dir.path().join("library"), "wav");
    let ledger = FailureLedger::open(&dir.path().join("failures.log")).expect("ledger");
    let fetcher = RecordingFetcher::default();
    let transcoder = WavTranscoder::default();
    let pipeline = Pipeline::new(
        &layout,
        &ledger,
        &fetcher,
        &transcoder,
        dir.path().join("tmp"),
        4,
    );
    let collection = Collection::new("Empty", 0, HashMap::new());

    let summary = pipeline.run(&collection, &mut ScriptedSearch::new(&[]), None);
    assert_eq!(summary.total, 0);
    assert_eq!(summary.acquired, 0);
    assert!(fetcher.fetched().is_empty());
    assert_eq!(transcoder.runs.load(Ordering::SeqCst), 0);
}
