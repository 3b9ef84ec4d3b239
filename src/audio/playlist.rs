use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::metadata::MetadataExtractor;
use super::track::{Metadata, Song};
use crate::config::PlaylistDocument;
use crate::error::{CatalogError, DeletionReport, FileDeleteFailure};

/// In-memory playlists, keyed by name in creation order.
///
/// Every mutation validates first and only then touches state, so a returned
/// error always means nothing changed. Persisting is left to the caller.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    playlists: IndexMap<String, Vec<Song>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: PlaylistDocument) -> Self {
        Self {
            playlists: doc.playlists,
        }
    }

    pub fn playlists(&self) -> &IndexMap<String, Vec<Song>> {
        &self.playlists
    }

    pub fn playlist_names(&self) -> impl Iterator<Item = &str> {
        self.playlists.keys().map(String::as_str)
    }

    pub fn contains_playlist(&self, name: &str) -> bool {
        self.playlists.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlists.is_empty()
    }

    /// Songs in stored (insertion) order.
    pub fn songs(&self, playlist: &str) -> Option<&[Song]> {
        self.playlists.get(playlist).map(Vec::as_slice)
    }

    /// Songs in display order, i.e. by numeric id.
    pub fn sorted_songs(&self, playlist: &str) -> Vec<Song> {
        let mut songs = self.playlists.get(playlist).cloned().unwrap_or_default();
        songs.sort_by(Song::display_order);
        songs
    }

    pub fn song(&self, playlist: &str, id: &str) -> Option<&Song> {
        self.playlists.get(playlist)?.iter().find(|s| s.id == id)
    }

    /// Default id for the next song: one past the highest numeric id.
    pub fn next_id(&self, playlist: &str) -> Result<String, CatalogError> {
        let songs = self.playlist(playlist)?;
        let next = songs.iter().filter_map(Song::numeric_id).max().map_or(1, |max| max + 1);
        Ok(next.to_string())
    }

    pub fn add_playlist(&mut self, name: &str) -> Result<(), CatalogError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CatalogError::EmptyName);
        }
        if self.playlists.contains_key(name) {
            return Err(CatalogError::DuplicateName(name.to_string()));
        }

        self.playlists.insert(name.to_string(), Vec::new());
        info!("Created new playlist: '{}'", name);
        Ok(())
    }

    /// Renaming to the current name is a no-op. The playlist keeps its place.
    pub fn rename_playlist(&mut self, old: &str, new: &str) -> Result<(), CatalogError> {
        let new = new.trim();
        if new.is_empty() {
            return Err(CatalogError::EmptyName);
        }
        let index = self
            .playlists
            .get_index_of(old)
            .ok_or_else(|| CatalogError::PlaylistNotFound(old.to_string()))?;
        if new == old {
            return Ok(());
        }
        if self.playlists.contains_key(new) {
            return Err(CatalogError::DuplicateName(new.to_string()));
        }

        if let Some(songs) = self.playlists.shift_remove(old) {
            self.playlists.shift_insert(index, new.to_string(), songs);
        }
        info!("Renamed playlist '{}' to '{}'", old, new);
        Ok(())
    }

    /// Drop a playlist, optionally deleting its songs' files. File failures
    /// are collected in the report and never stop the batch.
    pub fn remove_playlist(
        &mut self,
        name: &str,
        delete_files: bool,
    ) -> Result<(Vec<Song>, DeletionReport), CatalogError> {
        let songs = self
            .playlists
            .shift_remove(name)
            .ok_or_else(|| CatalogError::PlaylistNotFound(name.to_string()))?;
        info!("Deleted playlist: '{}' ({} songs)", name, songs.len());

        let report = if delete_files {
            delete_files_best_effort(songs.iter().map(|s| s.file.as_path()))
        } else {
            DeletionReport::default()
        };

        Ok((songs, report))
    }

    pub fn add_song(
        &mut self,
        playlist: &str,
        id: &str,
        name: &str,
        file: impl Into<PathBuf>,
    ) -> Result<&Song, CatalogError> {
        self.insert_song(playlist, Song::new(id.trim(), name.trim(), file))
    }

    /// Add a fully built song (metadata included) after the usual checks.
    pub fn insert_song(&mut self, playlist: &str, song: Song) -> Result<&Song, CatalogError> {
        validate_fields(&song.id, &song.name)?;
        let songs = self.playlist_mut(playlist)?;
        if songs.iter().any(|s| s.id == song.id) {
            return Err(CatalogError::DuplicateId {
                playlist: playlist.to_string(),
                id: song.id,
            });
        }

        info!("Added song '{}' ({}) to playlist '{}'", song.name, song.id, playlist);
        songs.push(song);
        Ok(&songs[songs.len() - 1])
    }

    pub fn edit_song(
        &mut self,
        playlist: &str,
        old_id: &str,
        new_id: &str,
        new_name: &str,
    ) -> Result<&Song, CatalogError> {
        let (new_id, new_name) = (new_id.trim(), new_name.trim());
        validate_fields(new_id, new_name)?;

        let songs = self.playlist_mut(playlist)?;
        let index = songs
            .iter()
            .position(|s| s.id == old_id)
            .ok_or_else(|| CatalogError::SongNotFound {
                playlist: playlist.to_string(),
                id: old_id.to_string(),
            })?;
        if new_id != old_id && songs.iter().any(|s| s.id == new_id) {
            return Err(CatalogError::DuplicateId {
                playlist: playlist.to_string(),
                id: new_id.to_string(),
            });
        }

        let song = &mut songs[index];
        song.id = new_id.to_string();
        song.name = new_name.to_string();
        debug!("Edited song {} -> {} in '{}'", old_id, new_id, playlist);
        Ok(song)
    }

    /// Remove by id. The caller unloads the song from the transport first.
    pub fn remove_song(&mut self, playlist: &str, id: &str) -> Result<Song, CatalogError> {
        let songs = self.playlist_mut(playlist)?;
        let index = songs
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| CatalogError::SongNotFound {
                playlist: playlist.to_string(),
                id: id.to_string(),
            })?;

        let song = songs.remove(index);
        info!("Removed song '{}' from playlist '{}'", song.name, playlist);
        Ok(song)
    }

    pub fn attach_metadata(
        &mut self,
        playlist: &str,
        id: &str,
        extractor: &dyn MetadataExtractor,
    ) -> Result<&Metadata, CatalogError> {
        let song = self
            .playlist_mut(playlist)?
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CatalogError::SongNotFound {
                playlist: playlist.to_string(),
                id: id.to_string(),
            })?;

        Ok(song.metadata.insert(extractor.extract(&song.file)))
    }

    /// Fill the metadata cache for every song that lacks one. Returns how
    /// many songs were looked at.
    pub fn attach_missing_metadata(&mut self, extractor: &dyn MetadataExtractor) -> usize {
        let mut filled = 0;
        for song in self.playlists.values_mut().flatten() {
            if song.metadata.as_ref().map_or(true, Metadata::is_empty) {
                song.metadata = Some(extractor.extract(&song.file));
                filled += 1;
            }
        }
        debug!("Extracted metadata for {} songs", filled);
        filled
    }

    fn playlist(&self, name: &str) -> Result<&Vec<Song>, CatalogError> {
        self.playlists
            .get(name)
            .ok_or_else(|| CatalogError::PlaylistNotFound(name.to_string()))
    }

    fn playlist_mut(&mut self, name: &str) -> Result<&mut Vec<Song>, CatalogError> {
        self.playlists
            .get_mut(name)
            .ok_or_else(|| CatalogError::PlaylistNotFound(name.to_string()))
    }
}

fn validate_fields(id: &str, name: &str) -> Result<(), CatalogError> {
    if id.trim().is_empty() {
        return Err(CatalogError::EmptyField("song id"));
    }
    if name.trim().is_empty() {
        return Err(CatalogError::EmptyField("song name"));
    }
    Ok(())
}

/// Delete each existing file, logging and collecting failures.
pub fn delete_files_best_effort<'a>(paths: impl IntoIterator<Item = &'a Path>) -> DeletionReport {
    let mut report = DeletionReport::default();

    for path in paths {
        if !path.exists() {
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => {
                info!("Deleted file {}", path.display());
                report.deleted.push(path.to_path_buf());
            }
            Err(e) => {
                warn!("Error deleting file {}: {}", path.display(), e);
                report.failed.push(FileDeleteFailure {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Metadata;

    fn catalog_with(name: &str, ids: &[&str]) -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_playlist(name).unwrap();
        for id in ids {
            catalog.add_song(name, id, &format!("song {id}"), format!("{id}.mp3")).unwrap();
        }
        catalog
    }

    struct FixedExtractor;

    impl MetadataExtractor for FixedExtractor {
        fn extract(&self, path: &Path) -> Metadata {
            Metadata {
                title: Some(path.display().to_string()),
                duration: Some(42),
                ..Default::default()
            }
        }
    }

    #[test]
    fn add_playlist_rejects_duplicates_and_blanks() {
        let mut catalog = catalog_with("Rock", &[]);
        assert_eq!(
            catalog.add_playlist("Rock"),
            Err(CatalogError::DuplicateName("Rock".into()))
        );
        assert_eq!(catalog.add_playlist("   "), Err(CatalogError::EmptyName));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn identity_rename_is_noop() {
        let mut catalog = catalog_with("Mix", &["1", "2"]);
        assert_eq!(catalog.rename_playlist("Mix", "Mix"), Ok(()));
        assert_eq!(catalog.songs("Mix").unwrap().len(), 2);
    }

    #[test]
    fn rename_keeps_position_and_songs() {
        let mut catalog = catalog_with("A", &["1"]);
        catalog.add_playlist("B").unwrap();
        catalog.add_playlist("C").unwrap();

        catalog.rename_playlist("B", "Bee").unwrap();
        let names: Vec<_> = catalog.playlist_names().collect();
        assert_eq!(names, ["A", "Bee", "C"]);

        assert_eq!(
            catalog.rename_playlist("A", "C"),
            Err(CatalogError::DuplicateName("C".into()))
        );
        assert_eq!(catalog.rename_playlist("A", " "), Err(CatalogError::EmptyName));
        assert_eq!(catalog.songs("A").unwrap().len(), 1);
    }

    #[test]
    fn duplicate_id_leaves_single_song() {
        let mut catalog = catalog_with("P", &[]);
        catalog.add_song("P", "1", "first", "a.mp3").unwrap();
        let err = catalog.add_song("P", "1", "second", "b.mp3").unwrap_err();

        assert_eq!(
            err,
            CatalogError::DuplicateId {
                playlist: "P".into(),
                id: "1".into()
            }
        );
        let songs = catalog.songs("P").unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].name, "first");
    }

    #[test]
    fn add_song_requires_fields() {
        let mut catalog = catalog_with("P", &[]);
        assert_eq!(
            catalog.add_song("P", " ", "x", "x.mp3").unwrap_err(),
            CatalogError::EmptyField("song id")
        );
        assert_eq!(
            catalog.add_song("P", "1", "", "x.mp3").unwrap_err(),
            CatalogError::EmptyField("song name")
        );
        assert!(matches!(
            catalog.add_song("Nope", "1", "x", "x.mp3"),
            Err(CatalogError::PlaylistNotFound(_))
        ));
        assert!(catalog.songs("P").unwrap().is_empty());
    }

    #[test]
    fn edit_song_collision_rules() {
        let mut catalog = catalog_with("P", &["1", "2"]);

        // same id, new name is fine
        catalog.edit_song("P", "1", "1", "renamed").unwrap();
        assert_eq!(catalog.song("P", "1").unwrap().name, "renamed");

        let err = catalog.edit_song("P", "1", "2", "clash").unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateId { .. }));
        assert_eq!(catalog.song("P", "1").unwrap().name, "renamed");

        catalog.edit_song("P", "2", "7", "seven").unwrap();
        assert!(catalog.song("P", "2").is_none());
        assert_eq!(catalog.song("P", "7").unwrap().name, "seven");
    }

    #[test]
    fn sorted_songs_follow_numeric_ids() {
        let catalog = catalog_with("P", &["10", "9", "1"]);
        let ids: Vec<_> = catalog.sorted_songs("P").into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["1", "9", "10"]);
    }

    #[test]
    fn next_id_skips_past_highest() {
        let catalog = catalog_with("P", &["1", "5", "x"]);
        assert_eq!(catalog.next_id("P").unwrap(), "6");

        let empty = catalog_with("E", &[]);
        assert_eq!(empty.next_id("E").unwrap(), "1");
    }

    #[test]
    fn remove_song_by_id() {
        let mut catalog = catalog_with("P", &["1", "2"]);
        let removed = catalog.remove_song("P", "1").unwrap();
        assert_eq!(removed.id, "1");
        assert!(matches!(
            catalog.remove_song("P", "1"),
            Err(CatalogError::SongNotFound { .. })
        ));
        assert_eq!(catalog.songs("P").unwrap().len(), 1);
    }

    #[test]
    fn remove_playlist_deletes_files_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.mp3");
        fs::write(&real, b"x").unwrap();
        // a directory where a file should be: remove_file fails on it
        let stubborn = dir.path().join("stubborn.mp3");
        fs::create_dir(&stubborn).unwrap();

        let mut catalog = Catalog::new();
        catalog.add_playlist("P").unwrap();
        catalog.add_song("P", "1", "stubborn", &stubborn).unwrap();
        catalog.add_song("P", "2", "real", &real).unwrap();
        catalog.add_song("P", "3", "gone", dir.path().join("gone.mp3")).unwrap();

        let (songs, report) = catalog.remove_playlist("P", true).unwrap();
        assert_eq!(songs.len(), 3);
        assert_eq!(report.deleted, vec![real.clone()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, stubborn);
        assert!(!real.exists());
        assert!(!catalog.contains_playlist("P"));
    }

    #[test]
    fn remove_playlist_can_keep_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("keep.mp3");
        fs::write(&file, b"x").unwrap();

        let mut catalog = Catalog::new();
        catalog.add_playlist("P").unwrap();
        catalog.add_song("P", "1", "keep", &file).unwrap();

        let (_, report) = catalog.remove_playlist("P", false).unwrap();
        assert!(report.is_clean());
        assert!(file.exists());
    }

    #[test]
    fn metadata_stays_in_memory() {
        let mut catalog = catalog_with("P", &["1", "2"]);
        let meta = catalog.attach_metadata("P", "1", &FixedExtractor).unwrap();
        assert_eq!(meta.duration, Some(42));

        assert_eq!(catalog.attach_missing_metadata(&FixedExtractor), 1);
        assert!(catalog.songs("P").unwrap().iter().all(|s| s.metadata.is_some()));

        let json = serde_json::to_value(catalog.playlists()).unwrap();
        assert_eq!(json["P"][0], serde_json::json!({"id": "1", "name": "song 1", "file": "1.mp3"}));
    }
}
