// Acquisition pipeline: run an external downloader, find what it wrote, and
// hand the new files back to the control thread as songs to append

pub mod snapshot;
pub mod worker;

pub use snapshot::DirectorySnapshot;
pub use worker::{spawn_download, CancellationToken, DownloadHandle};

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::audio::{Catalog, Metadata, Song};
use crate::config::Settings;
use crate::error::DownloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    #[value(name = "youtube")]
    YouTube,
    Spotify,
}

impl SourceKind {
    pub fn template<'a>(&self, settings: &'a Settings) -> &'a str {
        match self {
            SourceKind::YouTube => &settings.youtube_cmd,
            SourceKind::Spotify => &settings.spotify_cmd,
        }
    }

    /// Spotify tools tend to skip or rewrite existing files, so their output
    /// is also matched by modification time.
    fn uses_mtime_filter(&self) -> bool {
        matches!(self, SourceKind::Spotify)
    }

    /// Spotify downloads are named after their title tag; YouTube ones keep
    /// the file name the tool chose.
    pub fn song_name(&self, file: &DownloadedFile) -> String {
        match (self, &file.metadata.title) {
            (SourceKind::Spotify, Some(title)) if !title.trim().is_empty() => title.trim().to_string(),
            _ => default_song_name(&file.path),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::YouTube => write!(f, "YouTube"),
            SourceKind::Spotify => write!(f, "Spotify"),
        }
    }
}

/// Substitute `{url}` and `{out}` into a command template.
pub fn render_command(template: &str, url: &str, out: &Path) -> String {
    template
        .replace("{url}", url)
        .replace("{out}", &out.to_string_lossy())
}

/// Everything a worker needs; built on the control thread.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub kind: SourceKind,
    pub url: String,
    pub playlist: String,
    pub out_dir: PathBuf,
    pub command: String,
}

impl DownloadRequest {
    pub fn new(kind: SourceKind, url: &str, playlist: &str, settings: &Settings) -> Result<Self, DownloadError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DownloadError::EmptyUrl);
        }
        let out_dir = settings.default_download_path.clone();

        Ok(Self {
            kind,
            url: url.to_string(),
            playlist: playlist.to_string(),
            command: render_command(kind.template(settings), url, &out_dir),
            out_dir,
        })
    }
}

/// A file the downloader produced, with its tags already read.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Succeeded(Vec<DownloadedFile>),
    /// The tool exited zero but left no new audio file behind.
    Ambiguous {
        already_exists: bool,
        /// A YouTube link found in the tool output, worth retrying with.
        alternate_url: Option<String>,
        output: String,
    },
    Failed {
        code: Option<i32>,
        output: String,
    },
    Cancelled,
    /// The tool could not be started or the directory could not be read.
    Error(String),
}

/// What a worker sends back over the hand-off channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadReport {
    pub kind: SourceKind,
    pub url: String,
    pub playlist: String,
    pub outcome: DownloadOutcome,
}

impl DownloadReport {
    /// Append the downloaded files to the target playlist, each under the
    /// next free id. Runs on the control thread.
    ///
    /// If the playlist went away while the download ran, nothing is added;
    /// the files stay on disk.
    pub fn apply_to(&self, catalog: &mut Catalog) -> Vec<Song> {
        let DownloadOutcome::Succeeded(files) = &self.outcome else {
            return Vec::new();
        };

        let mut added = Vec::new();
        for file in files {
            let id = match catalog.next_id(&self.playlist) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Dropping downloaded {}: {}", file.path.display(), e);
                    continue;
                }
            };
            let song = Song::new(id, self.kind.song_name(file), file.path.clone())
                .with_metadata(file.metadata.clone());

            match catalog.insert_song(&self.playlist, song) {
                Ok(song) => added.push(song.clone()),
                Err(e) => warn!("Dropping downloaded {}: {}", file.path.display(), e),
            }
        }

        info!("Added {} downloaded songs to '{}'", added.len(), self.playlist);
        added
    }
}

/// File stem, used as the song name when importing a file.
pub fn default_song_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Look through downloader output for hints on why nothing new appeared.
pub(crate) fn diagnose_empty_result(output: &str) -> (bool, Option<String>) {
    static YOUTUBE_URL: OnceLock<Option<Regex>> = OnceLock::new();

    let already_exists = output.to_lowercase().contains("file already exists");
    let alternate_url = YOUTUBE_URL
        .get_or_init(|| Regex::new(r"https://[^\s]*youtube[^\s]*").ok())
        .as_ref()
        .and_then(|re| re.find(output))
        .map(|m| m.as_str().to_string());

    (already_exists, alternate_url)
}
