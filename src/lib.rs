// Soundify library - playlist catalog, playback transport and downloader
// driven acquisition, without any UI attached

pub mod app;      // control-thread orchestration
pub mod audio;    // songs, playlists, metadata, transport
pub mod config;   // playlist document and settings
pub mod download; // external downloader pipeline
pub mod error;

pub use app::App;
pub use audio::{Catalog, Metadata, Song, Transport};
pub use config::{PlaylistStore, Settings, SettingsStore};
pub use error::{CatalogError, DeletionReport, DownloadError, PlaybackError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
