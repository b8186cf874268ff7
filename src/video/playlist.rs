//! Clip discovery from the asset directory

use std::path::{Path, PathBuf};

/// Clips in a directory, sorted by file name, with a cursor
#[derive(Debug, Clone)]
pub struct VideoPlaylist {
    directory: PathBuf,
    extensions: Vec<String>,
    clips: Vec<PathBuf>,
    current_index: usize,
}

impl VideoPlaylist {
    /// List `directory` for files with one of `extensions` (case-insensitive)
    pub fn discover(directory: impl Into<PathBuf>, extensions: &[String]) -> Self {
        let mut playlist = Self {
            directory: directory.into(),
            extensions: extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect(),
            clips: Vec::new(),
            current_index: 0,
        };
        let count = playlist.rescan();
        if count == 0 {
            tracing::warn!("No clips found in {}", playlist.directory.display());
        } else {
            tracing::info!("Found {} clips in {}", count, playlist.directory.display());
        }
        playlist
    }

    /// Re-list the directory, keeping the cursor as is. Returns the clip count.
    pub fn rescan(&mut self) -> usize {
        self.clips = match std::fs::read_dir(&self.directory) {
            Ok(entries) => {
                let mut clips: Vec<PathBuf> = entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.is_file() && self.matches_extension(path))
                    .collect();
                clips.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
                clips
            }
            Err(e) => {
                tracing::warn!("Cannot list clip directory {}: {}", self.directory.display(), e);
                Vec::new()
            }
        };
        self.clips.len()
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn clips(&self) -> &[PathBuf] {
        &self.clips
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Clip under the cursor; `None` if the directory shrank past it
    pub fn current(&self) -> Option<&Path> {
        self.clips.get(self.current_index).map(PathBuf::as_path)
    }

    /// Move to the next clip, wrapping. Returns the new index.
    pub fn advance(&mut self) -> usize {
        if !self.clips.is_empty() {
            self.current_index = (self.current_index + 1) % self.clips.len();
        }
        self.current_index
    }

    /// Put the cursor back on the first clip
    pub fn rewind(&mut self) {
        self.current_index = 0;
    }
}
