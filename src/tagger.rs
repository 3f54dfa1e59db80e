use crate::track::Track;
use crate::{EngineError, Result};
use lofty::{read_from_path, Accessor, AudioFile, Tag, TagType, TaggedFileExt};
use std::path::Path;

/// Best-effort tagging of a freshly acquired file. Failures are logged and never surface: the
/// audio is already in place and usable untagged.
pub fn tag(path: &Path, track: &Track) {
    if let Err(err) = write_track_tags(path, track) {
        log::warn!("could not tag {}: {err}", path.display());
    }
}

/// Writes title, artist, album and track position. Unknown fields are left untouched.
pub fn write_track_tags(path: &Path, track: &Track) -> Result<()> {
    let mut tagged_file =
        read_from_path(path).map_err(|e| EngineError::Tag(format!("read tags: {e}")))?;

    let mut tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag(tag_type).is_none() {
        if let Some(existing) = tagged_file.first_tag() {
            tag_type = existing.tag_type();
        } else if let Some(default) = default_tag_type(path) {
            tag_type = default;
        }
    }
    if tagged_file.tag(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .tag_mut(tag_type)
        .ok_or_else(|| EngineError::Tag("create tag container".to_string()))?;

    if !track.name.trim().is_empty() {
        tag.set_title(track.name.clone());
    }
    if !track.artist.trim().is_empty() {
        tag.set_artist(track.artist.clone());
    }
    if let Some(album) = track.album.as_deref().filter(|a| !a.trim().is_empty()) {
        tag.set_album(album.to_string());
    }
    if let Some(position) = track.track_num.filter(|n| *n > 0) {
        tag.set_track(position);
    }

    tagged_file
        .save_to_path(path)
        .map_err(|e| EngineError::Tag(format!("write tags: {e}")))?;
    Ok(())
}

fn default_tag_type(path: &Path) -> Option<TagType> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let tag_type = match ext.as_str() {
        "flac" | "ogg" | "oga" | "opus" => TagType::VorbisComments,
        "mp4" | "m4a" | "m4b" | "aac" => TagType::Mp4Ilst,
        _ => TagType::Id3v2,
    };
    Some(tag_type)
}
