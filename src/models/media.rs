//! Media classification for files handed to the relay.
//!
//! A file is classified once, from its name, when it enters the relay. The
//! rest of the pipeline matches on `MediaKind` instead of re-inspecting the
//! file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const VIDEO_EXTENSIONS: [&str; 11] = [
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "3gp", "mpeg", "mpg",
];
const AUDIO_EXTENSIONS: [&str; 6] = ["mp3", "m4a", "ogg", "flac", "wav", "opus"];
const PHOTO_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Document,
    Video,
    Audio,
    Photo,
}

impl MediaKind {
    pub fn from_file_name(name: &str) -> Self {
        match extension(name).as_deref() {
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext) => MediaKind::Video,
            Some(ext) if AUDIO_EXTENSIONS.contains(&ext) => MediaKind::Audio,
            Some(ext) if PHOTO_EXTENSIONS.contains(&ext) => MediaKind::Photo,
            _ => MediaKind::Document,
        }
    }
}

/// A local file selected for upload.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct MediaFile {
    pub kind: MediaKind,
    pub name: String,
    pub size: u64,
    pub path: PathBuf,
}

impl MediaFile {
    /// Classify `path`, using `name` for the file name when the caller knows
    /// a better one than the path's last segment.
    pub fn new(path: impl Into<PathBuf>, name: Option<&str>, size: u64) -> Self {
        let path = path.into();
        let name = name
            .map(str::to_string)
            .or_else(|| {
                path.file_name()
                    .map(|segment| segment.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "file".to_string());
        Self {
            kind: MediaKind::from_file_name(&name),
            name,
            size,
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Guess a MIME type from a key or file name, defaulting to octet-stream.
pub fn content_type_for(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
