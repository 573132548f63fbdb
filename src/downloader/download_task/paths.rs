//! Target path and file extension derivation.

use crate::types::DownloadJob;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Directory used when an item has no usable artist name
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Directory used when an item has no album name
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Leading `.ext` of an extension candidate; anything after it is noise
static EXTENSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\.[A-Za-z0-9]+").ok());

/// File name suffix derived from a source URL
///
/// For `song.mp3.tmp` the folded part is `.mp3` (it stays in the base name) and the
/// extension is `.tmp`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedExtension {
    /// Text between the first and last period, kept as part of the base name
    pub folded: String,
    /// Extension including its leading period, lower-cased; empty if none
    pub extension: String,
}

impl ParsedExtension {
    /// Folded part followed by the extension
    pub fn suffix(&self) -> String {
        format!("{}{}", self.folded, self.extension)
    }
}

/// Replace characters that would split or escape a path segment
pub fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "." | ".." => "_".repeat(cleaned.len()),
        _ => cleaned,
    }
}

/// Last path segment of a URL, without query string or fragment
fn last_segment(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        return parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();
    }

    // Not an absolute URL: cut the query by hand
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/').next().unwrap_or_default().to_string()
}

/// Derive the file name suffix from a source URL
pub fn parse_extension(url: &str) -> ParsedExtension {
    let segment = last_segment(url);

    let (Some(first_dot), Some(last_dot)) = (segment.find('.'), segment.rfind('.')) else {
        return ParsedExtension::default();
    };

    let raw_extension = &segment[last_dot..];
    let extension = EXTENSION
        .as_ref()
        .and_then(|re| re.find(raw_extension))
        .map(|m| m.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    let folded = if first_dot == last_dot {
        String::new()
    } else {
        segment[first_dot..last_dot].to_string()
    };

    ParsedExtension { folded, extension }
}

/// `root / artist / album / title+suffix`, each segment sanitized
///
/// A blank title falls back to the item id, so the file name is never empty.
pub fn target_path(root: &Path, job: &DownloadJob) -> PathBuf {
    let item = &job.item;

    let artist = item.primary_artist_name().unwrap_or(UNKNOWN_ARTIST);
    let album = if item.album.name.trim().is_empty() {
        UNKNOWN_ALBUM
    } else {
        item.album.name.as_str()
    };
    let stem = if item.title.trim().is_empty() {
        item.id.as_str()
    } else {
        item.title.as_str()
    };
    let file_name = format!("{}{}", stem, parse_extension(&job.source_url).suffix());

    root.join(sanitize(artist))
        .join(sanitize(album))
        .join(sanitize(&file_name))
}
