// Persistent state: the playlist document and user settings, both JSON under
// the platform config directory unless a path is given explicitly

pub mod playlists;
pub mod settings;

pub use playlists::{PlaylistDocument, PlaylistStore};
pub use settings::{DeleteAnswer, Settings, SettingsStore};

use anyhow::Result;
use dirs::config_dir;
use std::path::PathBuf;

pub(crate) fn config_root() -> Result<PathBuf> {
    Ok(config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
        .join("soundify"))
}
