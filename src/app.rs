// Control-thread owner of the catalog, the transport and both stores.
// Cross-component orderings live here: stop before remove, save after every
// structural change, downloads applied only when drained on this thread.

use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::audio::engine::{AudioEngine, Clock, PlaybackState, SystemClock};
use crate::audio::playlist::delete_files_best_effort;
use crate::audio::transport::{parse_volume_percent, Tick};
use crate::audio::{Catalog, MetadataExtractor, Song, Transport};
use crate::config::{DeleteAnswer, PlaylistStore, Settings, SettingsStore};
use crate::download::{default_song_name, spawn_download, DownloadHandle, DownloadReport, DownloadRequest, SourceKind};
use crate::error::{CatalogError, DeletionReport, DownloadError, PlaybackError};

pub struct App {
    catalog: Catalog,
    transport: Transport,
    settings: Settings,
    playlist_store: PlaylistStore,
    settings_store: SettingsStore,
    extractor: Arc<dyn MetadataExtractor>,
    downloads_tx: UnboundedSender<DownloadReport>,
    downloads_rx: UnboundedReceiver<DownloadReport>,
    downloads: Vec<DownloadHandle>,
    pending_reports: usize,
}

impl App {
    /// `settings` is what `settings_store` loaded; the store is kept for saves.
    pub fn open(
        playlist_store: PlaylistStore,
        settings_store: SettingsStore,
        settings: Settings,
        engine: Box<dyn AudioEngine>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> anyhow::Result<Self> {
        Self::open_with_clock(playlist_store, settings_store, settings, engine, Box::new(SystemClock), extractor)
    }

    pub fn open_with_clock(
        playlist_store: PlaylistStore,
        settings_store: SettingsStore,
        settings: Settings,
        engine: Box<dyn AudioEngine>,
        clock: Box<dyn Clock>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> anyhow::Result<Self> {
        let mut catalog = Catalog::from_document(playlist_store.load()?);
        catalog.attach_missing_metadata(extractor.as_ref());
        let transport = Transport::with_clock(engine, clock, settings.default_volume);
        let (downloads_tx, downloads_rx) = mpsc::unbounded_channel();

        info!(
            "Loaded {} playlists from {}",
            catalog.len(),
            playlist_store.path().display()
        );

        Ok(Self {
            catalog,
            transport,
            settings,
            playlist_store,
            settings_store,
            extractor,
            downloads_tx,
            downloads_rx,
            downloads: Vec::new(),
            pending_reports: 0,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether a failed `play` can be blamed on the entry rather than on a
    /// missing output device.
    pub fn has_output(&self) -> bool {
        self.transport.has_output()
    }

    /// Write the sanitized playlist document. Failures are logged.
    pub fn save(&self) -> bool {
        match self.playlist_store.save_sanitized(self.catalog.playlists()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save playlists: {:#}", e);
                false
            }
        }
    }

    /// Apply a partial settings object and persist the result.
    pub fn update_settings(&mut self, value: &Value) -> Vec<String> {
        let applied = self.settings.update_from_json(value);
        if !applied.is_empty() {
            self.settings_store.save(&self.settings);
        }
        applied
    }

    /// Ask (or not, per settings) whether files should go with a removal.
    pub fn confirm_file_deletion(&mut self, ask: impl FnOnce() -> DeleteAnswer) -> bool {
        self.settings_store.resolve_file_deletion(&mut self.settings, ask)
    }

    // playlists

    pub fn add_playlist(&mut self, name: &str) -> Result<(), CatalogError> {
        self.catalog.add_playlist(name)?;
        self.save();
        Ok(())
    }

    pub fn rename_playlist(&mut self, old: &str, new: &str) -> Result<(), CatalogError> {
        self.catalog.rename_playlist(old, new)?;
        self.transport.rename_playlist(old, new.trim());
        self.save();
        Ok(())
    }

    /// Remove a playlist, stopping playback first when it is playing from
    /// there or when its loaded file belongs to the playlist.
    pub fn remove_playlist(&mut self, name: &str, delete_files: bool) -> Result<DeletionReport, CatalogError> {
        let songs = self
            .catalog
            .songs(name)
            .ok_or_else(|| CatalogError::PlaylistNotFound(name.to_string()))?;

        let loaded_here = self
            .transport
            .current_song()
            .is_some_and(|current| songs.iter().any(|s| s.file == current.file));
        if loaded_here {
            self.transport.stop();
        }
        self.transport.release_playlist(name);

        let (_, report) = self.catalog.remove_playlist(name, delete_files)?;
        self.save();
        Ok(report)
    }

    // songs

    pub fn add_song(&mut self, playlist: &str, id: &str, name: &str, file: impl Into<PathBuf>) -> Result<Song, CatalogError> {
        let id = self.catalog.add_song(playlist, id, name, file)?.id.clone();
        self.catalog.attach_metadata(playlist, &id, self.extractor.as_ref())?;
        self.save();
        self.song(playlist, &id)
    }

    /// Add a file under the next free id and its base name unless told
    /// otherwise.
    pub fn import_file(
        &mut self,
        playlist: &str,
        file: impl Into<PathBuf>,
        id: Option<&str>,
        name: Option<&str>,
    ) -> Result<Song, CatalogError> {
        let file = file.into();
        let id = match id {
            Some(id) => id.to_string(),
            None => self.catalog.next_id(playlist)?,
        };
        let name = name.map(str::to_string).unwrap_or_else(|| default_song_name(&file));
        self.add_song(playlist, &id, &name, file)
    }

    pub fn edit_song(&mut self, playlist: &str, old_id: &str, new_id: &str, new_name: &str) -> Result<Song, CatalogError> {
        let song = self.catalog.edit_song(playlist, old_id, new_id, new_name)?.clone();
        self.transport.refresh_current(playlist, old_id, &song, &self.catalog);
        self.save();
        Ok(song)
    }

    /// Remove a song, unloading it from the transport first if loaded.
    pub fn remove_song(&mut self, playlist: &str, id: &str, delete_file: bool) -> Result<(Song, DeletionReport), CatalogError> {
        self.song(playlist, id)?;
        if self.transport.is_loaded(playlist, id) {
            self.transport.stop();
        }

        let song = self.catalog.remove_song(playlist, id)?;
        let report = if delete_file {
            delete_files_best_effort([song.file.as_path()])
        } else {
            DeletionReport::default()
        };
        self.save();
        Ok((song, report))
    }

    /// Drop the entry a failed `play` pointed at. Files are left alone.
    pub fn remove_broken(&mut self, err: &PlaybackError) -> Result<Option<Song>, CatalogError> {
        let Some((playlist, id)) = err.broken_entry() else {
            return Ok(None);
        };
        let (playlist, id) = (playlist.to_string(), id.to_string());
        let (song, _) = self.remove_song(&playlist, &id, false)?;
        info!("Removed unplayable '{}' from '{}'", song.name, playlist);
        Ok(Some(song))
    }

    fn song(&self, playlist: &str, id: &str) -> Result<Song, CatalogError> {
        if !self.catalog.contains_playlist(playlist) {
            return Err(CatalogError::PlaylistNotFound(playlist.to_string()));
        }
        self.catalog
            .song(playlist, id)
            .cloned()
            .ok_or_else(|| CatalogError::SongNotFound {
                playlist: playlist.to_string(),
                id: id.to_string(),
            })
    }

    // transport

    pub fn play(&mut self, playlist: &str, id: &str) -> Result<Song, PlaybackError> {
        let song = self.song(playlist, id)?;
        self.transport.play(&song, playlist, &self.catalog)?;
        Ok(song)
    }

    /// Start at the first song (id order) of a playlist.
    pub fn play_first(&mut self, playlist: &str) -> Result<Option<Song>, PlaybackError> {
        let Some(first) = self.catalog.sorted_songs(playlist).into_iter().next() else {
            return Ok(None);
        };
        self.transport.play(&first, playlist, &self.catalog)?;
        Ok(Some(first))
    }

    pub fn toggle_pause(&mut self) -> Result<PlaybackState, PlaybackError> {
        self.transport.toggle_pause()
    }

    pub fn seek(&mut self, position: f64) -> Result<bool, PlaybackError> {
        self.transport.seek(position)
    }

    pub fn next(&mut self) -> Result<Option<Song>, PlaybackError> {
        self.transport.next(&self.catalog)
    }

    pub fn previous(&mut self) -> Result<Option<Song>, PlaybackError> {
        self.transport.previous(&self.catalog)
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.transport.set_shuffle(shuffle);
    }

    /// Volume from a 0-100 percentage typed by the user.
    pub fn set_volume_percent(&mut self, input: &str) -> Result<f32, PlaybackError> {
        let fraction = parse_volume_percent(input)?;
        self.transport.set_volume(fraction)?;
        Ok(fraction)
    }

    /// One poll cycle; call every ~200 ms.
    pub fn tick(&mut self) -> Result<Tick, PlaybackError> {
        self.transport.poll(&self.catalog)
    }

    pub fn stop(&mut self) {
        self.transport.stop();
    }

    // downloads

    pub fn start_download(&mut self, kind: SourceKind, url: &str, playlist: &str) -> Result<(), DownloadError> {
        if !self.catalog.contains_playlist(playlist) {
            return Err(DownloadError::UnknownPlaylist(playlist.to_string()));
        }
        let request = DownloadRequest::new(kind, url, playlist, &self.settings)?;

        let handle = spawn_download(request, Arc::clone(&self.extractor), self.downloads_tx.clone());
        self.downloads.push(handle);
        self.pending_reports += 1;
        Ok(())
    }

    pub fn active_downloads(&self) -> usize {
        self.pending_reports
    }

    pub fn cancel_downloads(&self) {
        for handle in &self.downloads {
            handle.cancel();
        }
    }

    /// Wait for the next finished download, if any are still running.
    pub async fn recv_download(&mut self) -> Option<DownloadReport> {
        if self.pending_reports == 0 {
            return None;
        }
        let report = self.downloads_rx.recv().await?;
        self.pending_reports -= 1;
        self.downloads.retain(|h| !h.is_finished());
        Some(report)
    }

    /// Append a finished download's files to its playlist and save.
    pub fn apply_download(&mut self, report: &DownloadReport) -> Vec<Song> {
        let added = report.apply_to(&mut self.catalog);
        if !added.is_empty() {
            self.save();
        }
        added
    }

    /// Apply every report that is ready without blocking. Reports that added
    /// nothing (failures, cancellations, ambiguous runs) come back with an
    /// empty song list for the caller to surface.
    pub fn drain_downloads(&mut self) -> Vec<(DownloadReport, Vec<Song>)> {
        let mut drained = Vec::new();
        while let Ok(report) = self.downloads_rx.try_recv() {
            self.pending_reports = self.pending_reports.saturating_sub(1);
            let added = self.apply_download(&report);
            drained.push((report, added));
        }
        self.downloads.retain(|h| !h.is_finished());
        drained
    }

    /// Stop playback, cancel downloads and write both documents.
    pub fn shutdown(&mut self) {
        self.transport.stop();
        self.cancel_downloads();
        for handle in self.downloads.drain(..) {
            handle.join();
        }
        self.save();
        self.settings_store.save(&self.settings);
        info!("Shut down cleanly");
    }
}
