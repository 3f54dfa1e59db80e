use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

/// Identity of a playlist entry. Two tracks with the same key are the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackKey {
    pub name: String,
    pub artist: String,
}

impl TrackKey {
    pub fn new(name: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artist: artist.into(),
        }
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.name, self.artist)
    }
}

/// One playlist entry as scraped from the list view.
///
/// Equality and hashing only look at `(name, artist)`; `album` and `track_num` are
/// descriptive and may differ between sightings of the same entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub track_num: Option<u32>,
}

impl Track {
    pub fn new(name: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artist: artist.into(),
            album: None,
            track_num: None,
        }
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    pub fn with_track_num(mut self, track_num: u32) -> Self {
        self.track_num = Some(track_num);
        self
    }

    pub fn key(&self) -> TrackKey {
        TrackKey::new(self.name.clone(), self.artist.clone())
    }

    /// Search query handed to the resolver.
    pub fn query(&self) -> String {
        format!("{} {}", self.name.trim(), self.artist.trim())
            .trim()
            .to_string()
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.artist == other.artist
    }
}

impl Eq for Track {}

impl Hash for Track {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.artist.hash(state);
    }
}

/// A fully enumerated collection. Built once by the extractor and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Collection {
    pub display_name: String,
    /// Advisory count published by the source page.
    pub expected_count: usize,
    items: HashMap<TrackKey, Track>,
}

impl Collection {
    pub fn new(
        display_name: impl Into<String>,
        expected_count: usize,
        items: HashMap<TrackKey, Track>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            expected_count,
            items,
        }
    }

    pub fn from_tracks(
        display_name: impl Into<String>,
        expected_count: usize,
        tracks: impl IntoIterator<Item = Track>,
    ) -> Self {
        let mut items = HashMap::new();
        for track in tracks {
            items.entry(track.key()).or_insert(track);
        }
        Self::new(display_name, expected_count, items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &TrackKey) -> bool {
        self.items.contains_key(key)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.items.values()
    }

    /// Tracks ordered by artist then name, so runs process items in a stable order.
    pub fn sorted_tracks(&self) -> Vec<&Track> {
        let mut out: Vec<&Track> = self.items.values().collect();
        out.sort_by(|a, b| {
            a.artist
                .cmp(&b.artist)
                .then_with(|| a.name.cmp(&b.name))
        });
        out
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedTrack {
    pub track: Track,
    pub locator: Option<String>,
}

impl ResolvedTrack {
    pub fn unresolved(track: Track) -> Self {
        Self {
            track,
            locator: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.locator.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionResult {
    pub track: Track,
    pub destination_path: PathBuf,
    pub succeeded: bool,
}
