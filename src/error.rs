// Error taxonomy for the catalog, transport, and acquisition pipeline
// Validation errors never leave state half-applied; playback and download
// errors carry enough context for the caller to offer a way out

use std::path::PathBuf;
use thiserror::Error;

use crate::audio::Song;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("playlist '{0}' already exists")]
    DuplicateName(String),

    #[error("playlist name cannot be empty")]
    EmptyName,

    #[error("song id '{id}' already exists in playlist '{playlist}'")]
    DuplicateId { playlist: String, id: String },

    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("playlist '{0}' not found")]
    PlaylistNotFound(String),

    #[error("song '{id}' not found in playlist '{playlist}'")]
    SongNotFound { playlist: String, id: String },
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The engine refused the file. The caller may drop the entry with
    /// `App::remove_broken`.
    #[error("cannot play '{}': {source}", song.file.display())]
    Load {
        song: Song,
        playlist: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("volume {0} is outside 0.0..=1.0")]
    VolumeOutOfRange(f32),

    #[error("volume '{0}' must be a number between 0 and 100")]
    InvalidVolumeInput(String),

    #[error("seek failed: {0}")]
    Seek(#[source] anyhow::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl PlaybackError {
    /// Playlist/id pair of the entry that failed to load, if any.
    pub fn broken_entry(&self) -> Option<(&str, &str)> {
        match self {
            PlaybackError::Load { song, playlist, .. } => Some((playlist.as_str(), song.id.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download URL cannot be empty")]
    EmptyUrl,

    #[error("playlist '{0}' not found")]
    UnknownPlaylist(String),

    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One file that could not be removed during a batch delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDeleteFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a best-effort batch of file deletions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<FileDeleteFailure>,
}

impl DeletionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
