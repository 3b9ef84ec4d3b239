use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::engine::{AudioEngine, Clock, PlaybackState, SystemClock};
use super::playlist::Catalog;
use super::track::Song;
use crate::error::PlaybackError;

/// Everything the transport knows about the loaded song. Never persisted.
///
/// `paused_position` is `Some` exactly while `is_paused` is set.
#[derive(Debug, Clone)]
pub struct TransportState {
    pub current_song: Option<Song>,
    pub playlist: Option<String>,
    pub is_paused: bool,
    pub start_time: Instant,
    pub seek_offset: f64,
    pub paused_position: Option<f64>,
    pub current_index: Option<usize>,
    pub duration: Option<f64>,
    pub shuffle: bool,
    pub volume: f32,
    /// Bumped by every successful `play`; lets a caller discard snapshots
    /// taken before the most recent load.
    pub generation: u64,
}

impl TransportState {
    fn new(now: Instant, volume: f32) -> Self {
        Self {
            current_song: None,
            playlist: None,
            is_paused: false,
            start_time: now,
            seek_offset: 0.0,
            paused_position: None,
            current_index: None,
            duration: None,
            shuffle: false,
            volume,
            generation: 0,
        }
    }

    pub fn playback_state(&self) -> PlaybackState {
        match (&self.current_song, self.is_paused) {
            (None, _) => PlaybackState::Stopped,
            (Some(_), true) => PlaybackState::Paused,
            (Some(_), false) => PlaybackState::Playing,
        }
    }
}

/// Elapsed play position at `now`, in seconds.
pub fn compute_position(state: &TransportState, now: Instant) -> f64 {
    if state.current_song.is_none() {
        return 0.0;
    }
    match state.paused_position {
        Some(pos) if state.is_paused => pos,
        _ => now.saturating_duration_since(state.start_time).as_secs_f64() + state.seek_offset,
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Idle,
    Position { elapsed: f64, duration: Option<f64> },
    /// End of track reached; this song is now playing.
    Advanced(Song),
}

/// Held while the poller writes the position indicator. Seeks that arrive
/// meanwhile are the indicator echoing back and are dropped.
pub struct UpdateGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct Transport {
    engine: Box<dyn AudioEngine>,
    clock: Box<dyn Clock>,
    state: TransportState,
    updating: Arc<AtomicBool>,
}

impl Transport {
    pub fn new(engine: Box<dyn AudioEngine>, volume: f32) -> Self {
        Self::with_clock(engine, Box::new(SystemClock), volume)
    }

    pub fn with_clock(mut engine: Box<dyn AudioEngine>, clock: Box<dyn Clock>, volume: f32) -> Self {
        let volume = if (0.0..=1.0).contains(&volume) { volume } else { 0.5 };
        engine.set_volume(volume);
        let state = TransportState::new(clock.now(), volume);

        Self {
            engine,
            clock,
            state,
            updating: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> &TransportState {
        &self.state
    }

    pub fn current_song(&self) -> Option<&Song> {
        self.state.current_song.as_ref()
    }

    pub fn position(&self) -> f64 {
        compute_position(&self.state, self.clock.now())
    }

    pub fn has_output(&self) -> bool {
        self.engine.has_output()
    }

    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.state.shuffle = shuffle;
    }

    /// Is `id` from `playlist` the loaded song?
    pub fn is_loaded(&self, playlist: &str, id: &str) -> bool {
        self.state.playlist.as_deref() == Some(playlist)
            && self.state.current_song.as_ref().is_some_and(|s| s.id == id)
    }

    pub fn is_playing_from(&self, playlist: &str) -> bool {
        self.state.current_song.is_some() && self.state.playlist.as_deref() == Some(playlist)
    }

    /// Load and start `song`, superseding any pause or seek state.
    ///
    /// On a load failure the transport is left idle and the error names the
    /// entry so the caller can offer to remove it.
    pub fn play(&mut self, song: &Song, playlist: &str, catalog: &Catalog) -> Result<(), PlaybackError> {
        if let Err(source) = self.engine.load(&song.file) {
            warn!("Cannot play '{}': {}", song.file.display(), source);
            self.unload();
            return Err(PlaybackError::Load {
                song: song.clone(),
                playlist: playlist.to_string(),
                source,
            });
        }
        if let Err(source) = self.engine.play() {
            self.unload();
            return Err(PlaybackError::Load {
                song: song.clone(),
                playlist: playlist.to_string(),
                source,
            });
        }

        let duration = song
            .duration_seconds()
            .map(|d| d as f64)
            .or_else(|| self.engine.probe_duration(&song.file));

        let now = self.clock.now();
        let state = &mut self.state;
        state.current_song = Some(song.clone());
        state.playlist = Some(playlist.to_string());
        state.start_time = now;
        state.seek_offset = 0.0;
        state.paused_position = None;
        state.is_paused = false;
        state.duration = duration;
        state.current_index = catalog
            .sorted_songs(playlist)
            .iter()
            .position(|s| s.id == song.id);
        state.generation += 1;

        info!("Playing '{}' from '{}'", song.name, playlist);
        Ok(())
    }

    pub fn toggle_pause(&mut self) -> Result<PlaybackState, PlaybackError> {
        if self.state.current_song.is_none() {
            debug!("No song is currently playing");
            return Err(PlaybackError::NothingPlaying);
        }

        let now = self.clock.now();
        if self.state.is_paused {
            self.engine.unpause();
            self.state.start_time = now;
            self.state.seek_offset = self.state.paused_position.take().unwrap_or(self.state.seek_offset);
            self.state.is_paused = false;
            debug!("Song unpaused at {:.1}s", self.state.seek_offset);
        } else {
            self.engine.pause();
            let pos = compute_position(&self.state, now);
            self.state.paused_position = Some(pos);
            self.state.is_paused = true;
            debug!("Song paused at {:.1}s", pos);
        }

        Ok(self.state.playback_state())
    }

    /// Take the guard while writing the position to a UI control.
    pub fn begin_update(&self) -> UpdateGuard {
        self.updating.store(true, Ordering::SeqCst);
        UpdateGuard {
            flag: Arc::clone(&self.updating),
        }
    }

    /// Move the play cursor. Returns `Ok(false)` when the request was the
    /// poller's own write and was ignored.
    pub fn seek(&mut self, position: f64) -> Result<bool, PlaybackError> {
        if self.updating.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if self.state.current_song.is_none() {
            return Err(PlaybackError::NothingPlaying);
        }

        let mut position = position.max(0.0);
        if let Some(duration) = self.state.duration {
            position = position.min(duration);
        }

        self.engine.set_position(position).map_err(PlaybackError::Seek)?;
        self.state.start_time = self.clock.now();
        self.state.seek_offset = position;
        if self.state.is_paused {
            self.state.paused_position = Some(position);
        }
        debug!("Seeked to {:.1}s", position);
        Ok(true)
    }

    /// Advance within the current playlist. `Ok(None)` when there is nothing
    /// to advance to.
    pub fn next(&mut self, catalog: &Catalog) -> Result<Option<Song>, PlaybackError> {
        self.step(catalog, Direction::Forward)
    }

    pub fn previous(&mut self, catalog: &Catalog) -> Result<Option<Song>, PlaybackError> {
        self.step(catalog, Direction::Backward)
    }

    fn step(&mut self, catalog: &Catalog, direction: Direction) -> Result<Option<Song>, PlaybackError> {
        let Some(playlist) = self.state.playlist.clone() else {
            return Ok(None);
        };
        let songs = catalog.sorted_songs(&playlist);
        let Some(song) = self.pick(&songs, direction) else {
            return Ok(None);
        };

        self.play(&song, &playlist, catalog)?;
        Ok(Some(song))
    }

    fn pick(&self, songs: &[Song], direction: Direction) -> Option<Song> {
        if songs.len() <= 1 {
            return songs.first().cloned();
        }

        let current = self.state.current_song.as_ref();
        if self.state.shuffle {
            let others: Vec<&Song> = songs
                .iter()
                .filter(|s| current.map_or(true, |c| c.id != s.id))
                .collect();
            return others.choose(&mut rand::thread_rng()).map(|s| (*s).clone());
        }

        let Some(current) = current else {
            return songs.first().cloned();
        };
        // The list may have changed since `play`; the loaded id wins over the saved slot
        let len = songs.len();
        let index = songs
            .iter()
            .position(|s| s.id == current.id)
            .or(self.state.current_index)
            .unwrap_or(0)
            % len;
        let next = match direction {
            Direction::Forward => (index + 1) % len,
            Direction::Backward => (index + len - 1) % len,
        };
        songs.get(next).cloned()
    }

    pub fn set_volume(&mut self, fraction: f32) -> Result<(), PlaybackError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(PlaybackError::VolumeOutOfRange(fraction));
        }
        self.engine.set_volume(fraction);
        self.state.volume = fraction;
        Ok(())
    }

    /// One cycle of the fixed-cadence poll. Auto-advances when the engine
    /// has drained and the elapsed time has reached the end of the track.
    pub fn poll(&mut self, catalog: &Catalog) -> Result<Tick, PlaybackError> {
        if self.state.current_song.is_none() {
            return Ok(Tick::Idle);
        }

        let elapsed = self.position();
        let duration = self.state.duration;
        let at_end = match duration {
            Some(total) => elapsed >= total - 1.0,
            // No known length: only trust the engine once playback had a moment to start
            None => elapsed >= 1.0,
        };

        if !self.state.is_paused && !self.engine.is_busy() && at_end {
            debug!("End of track at {:.1}s, advancing", elapsed);
            if let Some(song) = self.next(catalog)? {
                return Ok(Tick::Advanced(song));
            }
        }

        Ok(Tick::Position { elapsed, duration })
    }

    /// Stop and forget the loaded song. The playlist stays selected.
    pub fn stop(&mut self) {
        if self.state.current_song.is_some() {
            debug!("Stopping playback");
        }
        self.unload();
    }

    /// Keep following a playlist whose name changed.
    pub fn rename_playlist(&mut self, old: &str, new: &str) {
        if self.state.playlist.as_deref() == Some(old) {
            self.state.playlist = Some(new.to_string());
        }
    }

    /// Follow an edit of the loaded song's id or name.
    pub fn refresh_current(&mut self, playlist: &str, old_id: &str, song: &Song, catalog: &Catalog) {
        if self.is_loaded(playlist, old_id) {
            self.state.current_song = Some(song.clone());
            self.state.current_index = catalog
                .sorted_songs(playlist)
                .iter()
                .position(|s| s.id == song.id);
        }
    }

    /// Stop and drop the playlist selection entirely.
    pub fn release_playlist(&mut self, playlist: &str) {
        if self.state.playlist.as_deref() == Some(playlist) {
            self.unload();
            self.state.playlist = None;
        }
    }

    fn unload(&mut self) {
        self.engine.stop();
        let state = &mut self.state;
        state.current_song = None;
        state.is_paused = false;
        state.paused_position = None;
        state.seek_offset = 0.0;
        state.current_index = None;
        state.duration = None;
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// Parse a percentage typed by the user into a volume fraction.
pub fn parse_volume_percent(input: &str) -> Result<f32, PlaybackError> {
    let percent: f32 = input
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse()
        .map_err(|_| PlaybackError::InvalidVolumeInput(input.to_string()))?;

    if !(0.0..=100.0).contains(&percent) {
        return Err(PlaybackError::InvalidVolumeInput(input.to_string()));
    }
    Ok(percent / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::engine::testing::{ManualClock, ScriptedEngine};
    use crate::audio::Metadata;

    fn catalog(name: &str, songs: &[(&str, &str)]) -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_playlist(name).unwrap();
        for (id, file) in songs {
            catalog.add_song(name, id, &format!("song {id}"), *file).unwrap();
        }
        catalog
    }

    fn transport(engine: &ScriptedEngine, clock: &ManualClock) -> Transport {
        Transport::with_clock(Box::new(engine.clone()), Box::new(clock.clone()), 0.5)
    }

    fn song(catalog: &Catalog, playlist: &str, id: &str) -> Song {
        catalog.song(playlist, id).unwrap().clone()
    }

    #[test]
    fn pause_resume_keeps_position_continuous() {
        let (engine, clock) = (ScriptedEngine::new(), ManualClock::new());
        let catalog = catalog("P", &[("1", "a.mp3")]);
        let mut t = transport(&engine, &clock);

        t.play(&song(&catalog, "P", "1"), "P", &catalog).unwrap();
        clock.advance(10.0);
        assert_eq!(t.toggle_pause().unwrap(), PlaybackState::Paused);
        assert_eq!(t.state().paused_position, Some(10.0));

        // time spent paused does not count
        clock.advance(30.0);
        assert!((t.position() - 10.0).abs() < 1e-6);

        assert_eq!(t.toggle_pause().unwrap(), PlaybackState::Playing);
        assert!(!t.state().is_paused);
        assert_eq!(t.state().paused_position, None);
        clock.advance(2.5);
        assert!((t.position() - 12.5).abs() < 1e-6);
    }

    #[test]
    fn toggle_without_song_reports_nothing_playing() {
        let mut t = transport(&ScriptedEngine::new(), &ManualClock::new());
        assert!(matches!(t.toggle_pause(), Err(PlaybackError::NothingPlaying)));
        assert_eq!(t.state().playback_state(), PlaybackState::Stopped);
    }

    #[test]
    fn sequential_next_wraps_around() {
        let (engine, clock) = (ScriptedEngine::new(), ManualClock::new());
        let catalog = catalog("P", &[("1", "a.mp3"), ("2", "b.mp3"), ("3", "c.mp3")]);
        let mut t = transport(&engine, &clock);

        t.play(&song(&catalog, "P", "1"), "P", &catalog).unwrap();
        assert_eq!(t.state().current_index, Some(0));

        let mut visited = Vec::new();
        for _ in 0..3 {
            t.next(&catalog).unwrap();
            visited.push(t.state().current_index.unwrap());
        }
        assert_eq!(visited, [1, 2, 0]);

        t.previous(&catalog).unwrap();
        assert_eq!(t.current_song().unwrap().id, "3");
    }

    #[test]
    fn shuffle_on_single_song_replays_it() {
        let (engine, clock) = (ScriptedEngine::new(), ManualClock::new());
        let catalog = catalog("P", &[("1", "a.mp3")]);
        let mut t = transport(&engine, &clock);
        t.set_shuffle(true);

        t.play(&song(&catalog, "P", "1"), "P", &catalog).unwrap();
        for _ in 0..5 {
            let next = t.next(&catalog).unwrap().unwrap();
            assert_eq!(next.id, "1");
        }
    }

    #[test]
    fn shuffle_never_repeats_current() {
        let (engine, clock) = (ScriptedEngine::new(), ManualClock::new());
        let catalog = catalog("P", &[("1", "a.mp3"), ("2", "b.mp3"), ("3", "c.mp3")]);
        let mut t = transport(&engine, &clock);
        t.set_shuffle(true);

        t.play(&song(&catalog, "P", "2"), "P", &catalog).unwrap();
        for _ in 0..20 {
            let before = t.current_song().unwrap().id.clone();
            let after = t.next(&catalog).unwrap().unwrap();
            assert_ne!(before, after.id);
        }
    }

    #[test]
    fn next_on_empty_playlist_is_noop() {
        let (engine, clock) = (ScriptedEngine::new(), ManualClock::new());
        let mut catalog = catalog("P", &[("1", "a.mp3")]);
        let mut t = transport(&engine, &clock);
        t.play(&song(&catalog, "P", "1"), "P", &catalog).unwrap();

        catalog.remove_song("P", "1").unwrap();
        assert_eq!(t.next(&catalog).unwrap(), None);
        assert_eq!(t.current_song().unwrap().id, "1");
    }

    #[test]
    fn end_of_track_advances_to_next_id() {
        let engine = ScriptedEngine::new().with_duration("a.mp3", 180.0);
        let clock = ManualClock::new();
        let catalog = catalog("Test", &[("1", "a.mp3"), ("2", "b.mp3")]);
        let mut t = transport(&engine, &clock);

        t.play(&song(&catalog, "Test", "1"), "Test", &catalog).unwrap();
        clock.advance(100.0);
        assert!(matches!(t.poll(&catalog).unwrap(), Tick::Position { .. }));

        // drained early but elapsed short of the end: stay put
        engine.finish();
        assert!(matches!(t.poll(&catalog).unwrap(), Tick::Position { .. }));
        assert_eq!(t.current_song().unwrap().id, "1");

        clock.advance(79.5);
        match t.poll(&catalog).unwrap() {
            Tick::Advanced(song) => assert_eq!(song.id, "2"),
            other => panic!("expected advance, got {other:?}"),
        }
        assert_eq!(engine.loaded().unwrap().to_str(), Some("b.mp3"));
        assert_eq!(t.position(), 0.0);
    }

    #[test]
    fn busy_engine_is_not_advanced() {
        let engine = ScriptedEngine::new();
        let clock = ManualClock::new();
        let mut catalog = catalog("P", &[("1", "a.mp3"), ("2", "b.mp3")]);
        catalog
            .attach_metadata("P", "1", &FixedDuration(60))
            .unwrap();
        let mut t = transport(&engine, &clock);

        t.play(&song(&catalog, "P", "1"), "P", &catalog).unwrap();
        assert_eq!(t.state().duration, Some(60.0));
        clock.advance(90.0);
        assert!(matches!(t.poll(&catalog).unwrap(), Tick::Position { .. }));
        assert_eq!(t.current_song().unwrap().id, "1");
    }

    #[test]
    fn seek_is_ignored_while_poller_writes() {
        let (engine, clock) = (ScriptedEngine::new(), ManualClock::new());
        let catalog = catalog("P", &[("1", "a.mp3")]);
        let mut t = transport(&engine, &clock);
        t.play(&song(&catalog, "P", "1"), "P", &catalog).unwrap();

        {
            let _guard = t.begin_update();
            assert!(!t.seek(42.0).unwrap());
        }
        assert!(!engine.calls().iter().any(|c| c.starts_with("seek")));

        assert!(t.seek(42.0).unwrap());
        clock.advance(1.0);
        assert!((t.position() - 43.0).abs() < 1e-6);
    }

    #[test]
    fn seek_while_paused_moves_paused_position() {
        let (engine, clock) = (ScriptedEngine::new(), ManualClock::new());
        let catalog = catalog("P", &[("1", "a.mp3")]);
        let mut t = transport(&engine, &clock);
        t.play(&song(&catalog, "P", "1"), "P", &catalog).unwrap();
        t.toggle_pause().unwrap();

        t.seek(30.0).unwrap();
        clock.advance(5.0);
        assert_eq!(t.position(), 30.0);
    }

    #[test]
    fn broken_file_leaves_transport_idle() {
        let engine = ScriptedEngine::new().with_broken("bad.mp3");
        let clock = ManualClock::new();
        let catalog = catalog("P", &[("1", "a.mp3"), ("2", "bad.mp3")]);
        let mut t = transport(&engine, &clock);
        t.play(&song(&catalog, "P", "1"), "P", &catalog).unwrap();

        let err = t.play(&song(&catalog, "P", "2"), "P", &catalog).unwrap_err();
        assert_eq!(err.broken_entry(), Some(("P", "2")));
        assert_eq!(t.state().playback_state(), PlaybackState::Stopped);
        assert_eq!(t.state().playlist.as_deref(), Some("P"));
    }

    #[test]
    fn volume_bounds() {
        let engine = ScriptedEngine::new();
        let mut t = transport(&engine, &ManualClock::new());

        assert!(matches!(t.set_volume(1.5), Err(PlaybackError::VolumeOutOfRange(_))));
        assert!(matches!(t.set_volume(-0.1), Err(PlaybackError::VolumeOutOfRange(_))));
        t.set_volume(0.25).unwrap();
        assert_eq!(t.state().volume, 0.25);
        assert!(engine.calls().contains(&"volume 0.25".to_string()));

        assert_eq!(parse_volume_percent("80").unwrap(), 0.8);
        assert_eq!(parse_volume_percent(" 100% ").unwrap(), 1.0);
        assert!(parse_volume_percent("101").is_err());
        assert!(parse_volume_percent("-1").is_err());
        assert!(parse_volume_percent("loud").is_err());
    }

    #[test]
    fn play_supersedes_pause_and_seek() {
        let (engine, clock) = (ScriptedEngine::new(), ManualClock::new());
        let catalog = catalog("P", &[("1", "a.mp3"), ("2", "b.mp3")]);
        let mut t = transport(&engine, &clock);

        t.play(&song(&catalog, "P", "1"), "P", &catalog).unwrap();
        t.seek(50.0).unwrap();
        t.toggle_pause().unwrap();
        let generation = t.state().generation;

        t.play(&song(&catalog, "P", "2"), "P", &catalog).unwrap();
        let state = t.state();
        assert!(!state.is_paused);
        assert_eq!(state.paused_position, None);
        assert_eq!(state.seek_offset, 0.0);
        assert_eq!(state.current_index, Some(1));
        assert_eq!(state.generation, generation + 1);
    }

    #[test]
    fn next_follows_loaded_song_after_earlier_removal() {
        let (engine, clock) = (ScriptedEngine::new(), ManualClock::new());
        let mut catalog = catalog("P", &[("1", "a.mp3"), ("2", "b.mp3"), ("3", "c.mp3"), ("4", "d.mp3")]);
        let mut t = transport(&engine, &clock);
        t.play(&song(&catalog, "P", "3"), "P", &catalog).unwrap();
        assert_eq!(t.state().current_index, Some(2));

        catalog.remove_song("P", "1").unwrap();
        assert_eq!(t.next(&catalog).unwrap().unwrap().id, "4");
        assert_eq!(t.previous(&catalog).unwrap().unwrap().id, "3");
    }

    #[test]
    fn next_follows_renumbered_song() {
        let (engine, clock) = (ScriptedEngine::new(), ManualClock::new());
        let mut catalog = catalog("P", &[("1", "a.mp3"), ("2", "b.mp3"), ("3", "c.mp3")]);
        let mut t = transport(&engine, &clock);
        t.play(&song(&catalog, "P", "1"), "P", &catalog).unwrap();

        let edited = catalog.edit_song("P", "1", "9", "song 9").unwrap().clone();
        t.refresh_current("P", "1", &edited, &catalog);
        assert_eq!(t.state().current_index, Some(2));

        // 9 is last now, so next wraps to the lowest id
        assert_eq!(t.next(&catalog).unwrap().unwrap().id, "2");
    }

    struct FixedDuration(u64);

    impl crate::audio::MetadataExtractor for FixedDuration {
        fn extract(&self, _path: &std::path::Path) -> Metadata {
            Metadata {
                duration: Some(self.0),
                ..Default::default()
            }
        }
    }
}
