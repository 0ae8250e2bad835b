//! Builds playlist entries from audio files on disk.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::prelude::Accessor;
use log::debug;

use crate::protocol::{EntryMetadata, PlaylistEntry};

pub const SUPPORTED_AUDIO_EXTENSIONS: [&str; 7] =
    ["mp3", "wav", "ogg", "flac", "aac", "m4a", "mp4"];

pub fn is_supported_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_AUDIO_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

pub fn mime_type_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("aac") => "audio/aac",
        Some("m4a") | Some("mp4") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

pub fn collect_audio_files_from_folder(folder_path: &Path) -> Vec<PathBuf> {
    let mut pending_directories = vec![folder_path.to_path_buf()];
    let mut tracks = Vec::new();

    while let Some(directory) = pending_directories.pop() {
        let entries = match std::fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Failed to read directory {}: {}", directory.display(), err);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                debug!("Failed to inspect {}", path.display());
                continue;
            };
            if file_type.is_dir() {
                pending_directories.push(path);
            } else if file_type.is_file() && is_supported_audio_file(&path) {
                tracks.push(path);
            }
        }
    }

    tracks.sort_unstable();
    tracks
}

/// Files from a mix of file and folder paths, deduplicated and sorted.
pub fn collect_audio_files_from_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut tracks = BTreeSet::new();
    for path in paths {
        if path.is_file() {
            if is_supported_audio_file(path) {
                tracks.insert(path.clone());
            }
        } else if path.is_dir() {
            tracks.extend(collect_audio_files_from_folder(path));
        }
    }
    tracks.into_iter().collect()
}

/// Describes one file as a playlist entry. Tag data is optional; files lofty
/// cannot parse still get an entry named after the file.
pub fn playlist_entry_for_file(path: &Path) -> Option<PlaylistEntry> {
    let file_metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => {
            debug!("Failed to stat {}: {}", path.display(), err);
            return None;
        }
    };
    let last_modified = file_metadata
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|since_epoch| since_epoch.as_millis() as u64)
        .unwrap_or(0);
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut name = file_name;
    let mut tags = BTreeSet::new();
    let mut duration_hint = None;
    match lofty::read_from_path(path) {
        Ok(tagged_file) => {
            let duration = tagged_file.properties().duration().as_secs_f64();
            if duration > 0.0 {
                duration_hint = Some(duration);
            }
            if let Some(tag) = tagged_file.primary_tag().or(tagged_file.first_tag()) {
                if let Some(title) = tag.title().map(|title| title.trim().to_string()) {
                    if !title.is_empty() {
                        name = title;
                    }
                }
                if let Some(genre) = tag.genre().map(|genre| genre.trim().to_string()) {
                    if !genre.is_empty() {
                        tags.insert(genre);
                    }
                }
            }
        }
        Err(err) => {
            debug!("No readable tags in {}: {}", path.display(), err);
        }
    }

    Some(PlaylistEntry {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        tags,
        folder_id: path
            .parent()
            .map(|parent| parent.to_string_lossy().to_string())
            .unwrap_or_default(),
        metadata: EntryMetadata {
            duration_hint,
            size: file_metadata.len(),
            mime_type: mime_type_for_path(path).to_string(),
            last_modified,
        },
    })
}

/// Entries for every supported file under `paths`, paired with their location.
pub fn discover_playlist_entries(paths: &[PathBuf]) -> Vec<(PlaylistEntry, PathBuf)> {
    collect_audio_files_from_paths(paths)
        .into_iter()
        .filter_map(|path| playlist_entry_for_file(&path).map(|entry| (entry, path)))
        .collect()
}
