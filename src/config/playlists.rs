use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::audio::Song;

/// On-disk shape: `{"playlists": {<name>: [{"id", "name", "file"}, ...]}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistDocument {
    #[serde(default)]
    pub playlists: IndexMap<String, Vec<Song>>,
}

/// Reads and writes the playlist document.
///
/// A missing or unparseable file is replaced by an empty document. That
/// recovery throws away whatever the broken file held; the warning in the log
/// is the only trace of it.
#[derive(Debug, Clone)]
pub struct PlaylistStore {
    path: PathBuf,
}

impl PlaylistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/soundify/playlists.json`
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(super::config_root()?.join("playlists.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<PlaylistDocument> {
        if !self.path.exists() {
            info!("No playlist file at {}, creating one", self.path.display());
            let doc = PlaylistDocument::default();
            self.save_or_warn(&doc);
            return Ok(doc);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;

        match serde_json::from_str::<PlaylistDocument>(&content) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                warn!(
                    "Playlist file {} is corrupt ({}); resetting it to an empty document",
                    self.path.display(),
                    e
                );
                let doc = PlaylistDocument::default();
                self.save_or_warn(&doc);
                Ok(doc)
            }
        }
    }

    pub fn save(&self, doc: &PlaylistDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(doc)?;
        fs::write(&self.path, content).with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }

    /// A store that cannot write still hands out the empty document; the
    /// next save gets another chance.
    fn save_or_warn(&self, doc: &PlaylistDocument) {
        if let Err(e) = self.save(doc) {
            warn!("Could not write {}: {:#}", self.path.display(), e);
        }
    }

    /// Write `playlists` with every song cut down to `{id, name, file}`.
    pub fn save_sanitized(&self, playlists: &IndexMap<String, Vec<Song>>) -> Result<()> {
        let doc = PlaylistDocument {
            playlists: playlists
                .iter()
                .map(|(name, songs)| (name.clone(), songs.iter().map(Song::sanitized).collect()))
                .collect(),
        };
        self.save(&doc)
    }
}
