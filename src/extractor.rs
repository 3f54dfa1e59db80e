//! Enumeration of a virtualized track list.
//!
//! The list view only renders a window of rows and replaces them while scrolling, so the full
//! collection is rebuilt by repeatedly snapshotting the rendered rows, merging them into a map
//! keyed by track identity, and scrolling on until a whole pass adds nothing new.

use crate::config::ExtractionConfig;
use crate::track::{Collection, Track, TrackKey};
use crate::{EngineError, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;
use url::Url;

const ROW_SELECTOR: &str = r#"div[data-testid="tracklist-row"]"#;
const TITLE_CELL_SELECTOR: &str = r#"div[aria-colindex="2"]"#;
const ALBUM_LINK_SELECTOR: &str = r#"div[aria-colindex="3"] a"#;
const POSITION_CELL_SELECTOR: &str = r#"div[aria-colindex="1"]"#;
const TITLE_META_SELECTOR: &str = r#"meta[name="twitter:title"]"#;
const COUNT_META_SELECTOR: &str = r#"meta[name="music:song_count"]"#;
const FALLBACK_DISPLAY_NAME: &str = "playlist";

/// The rendered window of a scrollable list.
pub trait ListView {
    /// Markup of the currently rendered rows (typically the whole page source).
    fn rendered_html(&mut self) -> Result<String>;

    fn scroll_by(&mut self, pixels: i64) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub scroll_increment_px: i64,
    pub settle: Duration,
    pub max_passes: usize,
    /// Each pass overwrites this file with the snapshot it parsed.
    pub snapshot_path: Option<PathBuf>,
}

impl ExtractSettings {
    pub fn from_config(config: &ExtractionConfig, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            scroll_increment_px: config.scroll_increment_px,
            settle: Duration::from_millis(config.settle_ms),
            max_passes: config.max_passes.max(1),
            snapshot_path: if config.write_page_snapshot {
                snapshot_path
            } else {
                None
            },
        }
    }
}

/// Page-level metadata published next to the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHeader {
    pub display_name: String,
    pub expected_count: usize,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub collection: Collection,
    pub passes: usize,
    /// False when the pass cap was hit or a snapshot could not be taken.
    pub converged: bool,
    /// Identities seen with conflicting album values; possibly distinct tracks merged.
    pub collisions: usize,
}

pub fn extract(
    view: &mut dyn ListView,
    header: CollectionHeader,
    settings: &ExtractSettings,
) -> Extraction {
    let mut items: HashMap<TrackKey, Track> = HashMap::new();
    let mut collided: HashSet<TrackKey> = HashSet::new();
    let mut passes = 0_usize;
    let mut converged = false;

    while passes < settings.max_passes {
        passes += 1;

        let html = match view.rendered_html() {
            Ok(html) => html,
            Err(err) => {
                log::warn!("snapshot failed on pass {passes}, keeping {} tracks: {err}", items.len());
                break;
            }
        };
        write_snapshot(settings, &html);

        let rows = parse_rendered_rows(&html);
        if passes == 1 && rows.is_empty() {
            log::warn!("{}", EngineError::Parse("no track rows rendered".to_string()));
        }

        let mut added = 0_usize;
        for track in rows {
            match items.entry(track.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(track);
                    added += 1;
                }
                Entry::Occupied(mut slot) => {
                    if merge_sighting(slot.get_mut(), track) && collided.insert(slot.key().clone()) {
                        log::warn!(
                            "possible identity collision: {} appears with different albums",
                            slot.key()
                        );
                    }
                }
            }
        }

        log::info!(
            "pass {passes}: +{added} tracks ({} of ~{})",
            items.len(),
            header.expected_count
        );

        if added == 0 {
            converged = true;
            break;
        }

        if let Err(err) = view.scroll_by(settings.scroll_increment_px) {
            log::warn!("scroll failed on pass {passes}, keeping {} tracks: {err}", items.len());
            break;
        }
        if !settings.settle.is_zero() {
            thread::sleep(settings.settle);
        }
    }

    if !converged && passes >= settings.max_passes {
        log::warn!(
            "list did not converge within {} passes; continuing with {} tracks",
            settings.max_passes,
            items.len()
        );
    }
    if items.len() != header.expected_count {
        log::info!(
            "collected {} tracks, page advertised {}",
            items.len(),
            header.expected_count
        );
    }

    Extraction {
        collection: Collection::new(header.display_name, header.expected_count, items),
        passes,
        converged,
        collisions: collided.len(),
    }
}

/// Fills gaps in `existing` from a later sighting. Returns true when both sightings carry
/// different albums.
fn merge_sighting(existing: &mut Track, later: Track) -> bool {
    let conflict = matches!(
        (existing.album.as_deref(), later.album.as_deref()),
        (Some(a), Some(b)) if a != b
    );
    if existing.album.is_none() {
        existing.album = later.album;
    }
    if existing.track_num.is_none() {
        existing.track_num = later.track_num;
    }
    conflict
}

fn write_snapshot(settings: &ExtractSettings, html: &str) {
    let Some(path) = settings.snapshot_path.as_deref() else {
        return;
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(err) = std::fs::write(path, html) {
        log::debug!("could not write page snapshot {}: {err}", path.display());
    }
}

/// Parses the rendered rows in document order.
///
/// A row without the expected title/artist structure ends the pass: whatever follows it is
/// treated as not rendered yet.
pub fn parse_rendered_rows(html: &str) -> Vec<Track> {
    let document = Html::parse_document(html);
    let selector_row = Selector::parse(ROW_SELECTOR).expect("valid row selector");

    let mut out = Vec::new();
    for row in document.select(&selector_row) {
        match parse_row(row) {
            Some(track) => out.push(track),
            None => break,
        }
    }
    out
}

fn parse_row(row: ElementRef<'_>) -> Option<Track> {
    let selector_title_cell = Selector::parse(TITLE_CELL_SELECTOR).expect("valid title selector");
    let selector_div = Selector::parse("div").expect("valid div selector");
    let selector_link = Selector::parse("a").expect("valid link selector");
    let selector_album = Selector::parse(ALBUM_LINK_SELECTOR).expect("valid album selector");
    let selector_position =
        Selector::parse(POSITION_CELL_SELECTOR).expect("valid position selector");

    let title_cell = row.select(&selector_title_cell).next()?;
    let name_artist = title_cell.select(&selector_div).next()?;
    let name = element_text(name_artist.select(&selector_div).next()?);
    let artist = element_text(name_artist.select(&selector_link).next()?);
    if name.is_empty() || artist.is_empty() {
        return None;
    }

    let mut track = Track::new(name, artist);
    track.album = row
        .select(&selector_album)
        .next()
        .map(element_text)
        .filter(|album| !album.is_empty());
    track.track_num = row
        .select(&selector_position)
        .next()
        .map(element_text)
        .and_then(|text| text.parse::<u32>().ok())
        .filter(|n| *n > 0);
    Some(track)
}

fn element_text(element: ElementRef<'_>) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"));
    let raw: String = element.text().collect();
    re.replace_all(raw.trim(), " ").into_owned()
}

/// Reads the collection title and advertised track count from the page metadata.
pub fn parse_collection_header(html: &str) -> Result<CollectionHeader> {
    let document = Html::parse_document(html);
    let selector_title = Selector::parse(TITLE_META_SELECTOR).expect("valid title meta selector");
    let selector_count = Selector::parse(COUNT_META_SELECTOR).expect("valid count meta selector");

    let display_name = document
        .select(&selector_title)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EngineError::Parse("collection title meta tag missing".to_string()))?
        .to_string();
    let expected_count = document
        .select(&selector_count)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or_else(|| EngineError::Parse("collection song count meta tag missing".to_string()))?;

    Ok(CollectionHeader {
        display_name,
        expected_count,
    })
}

/// Like [`parse_collection_header`] but never fails: missing metadata is logged and replaced
/// by the last path segment of `collection_url` and an expected count of zero.
pub fn collection_header_or_fallback(html: &str, collection_url: &str) -> CollectionHeader {
    match parse_collection_header(html) {
        Ok(header) => header,
        Err(err) => {
            log::warn!("{err}; falling back to a name derived from the URL");
            CollectionHeader {
                display_name: display_name_from_url(collection_url),
                expected_count: 0,
            }
        }
    }
}

fn display_name_from_url(collection_url: &str) -> String {
    Url::parse(collection_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string())
}
