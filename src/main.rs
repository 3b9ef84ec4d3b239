// Soundify - headless front end for the playlist player
// Every subcommand opens the stores, does one thing, and saves on the way out

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use soundify::audio::engine::{AudioEngine, HeadlessEngine};
use soundify::audio::transport::Tick;
use soundify::audio::{format_time, TagExtractor};
use soundify::download::{DownloadOutcome, SourceKind};
use soundify::{App, PlaylistStore, SettingsStore};

#[derive(Parser)]
#[command(name = "soundify", version = soundify::VERSION)]
#[command(about = "Playlist music player with YouTube and Spotify downloads")]
struct Args {
    /// Enable developer logging (stderr + debug output)
    #[arg(long)]
    dev: bool,

    /// Directory holding playlists.json and settings.json
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List playlists
    Playlists,
    /// List the songs of a playlist in id order
    Songs { playlist: String },
    AddPlaylist { name: String },
    RenamePlaylist { old: String, new: String },
    RemovePlaylist {
        name: String,
        /// Also delete the songs' files from disk
        #[arg(long)]
        delete_files: bool,
    },
    /// Add an audio file to a playlist
    Import {
        playlist: String,
        file: PathBuf,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    EditSong {
        playlist: String,
        id: String,
        #[arg(long)]
        new_id: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    RemoveSong {
        playlist: String,
        id: String,
        #[arg(long)]
        delete_file: bool,
    },
    /// Play a playlist until interrupted
    Play {
        playlist: String,
        /// Song to start from (defaults to the first)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        shuffle: bool,
        /// Volume in percent, 0-100
        #[arg(long)]
        volume: Option<String>,
    },
    /// Fetch a track with the configured downloader and add it to a playlist
    Download {
        #[arg(value_enum)]
        source: SourceKind,
        url: String,
        playlist: String,
    },
    /// Print the effective settings
    Settings,
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

const DEBUG_FILTER: &str = "info,soundify=debug";

/// Logging starts before any file is read so load warnings are kept. The
/// filter is reloadable because `debug_mode` is only known after that.
fn init_logging(dev: bool) -> Result<(WorkerGuard, FilterHandle)> {
    let log_dir = dirs::data_dir()
        .map(|dir| dir.join("soundify").join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(&log_dir, "soundify.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if dev { DEBUG_FILTER } else { "info,soundify=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let (filter, handle) = reload::Layer::new(filter);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false);
    let stderr_layer = dev.then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok((guard, handle))
}

/// Turn on debug output for `debug_mode` unless `RUST_LOG` or `--dev`
/// already decided the filter.
fn apply_debug_mode(handle: &FilterHandle, dev: bool, debug_mode: bool) {
    if !debug_mode || dev || std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return;
    }
    if let Err(e) = handle.reload(EnvFilter::new(DEBUG_FILTER)) {
        warn!("Could not enable debug logging: {}", e);
    }
}

fn stores(config_dir: Option<&Path>) -> Result<(PlaylistStore, SettingsStore)> {
    Ok(match config_dir {
        Some(dir) => (
            PlaylistStore::new(dir.join("playlists.json")),
            SettingsStore::new(dir.join("settings.json")),
        ),
        None => (PlaylistStore::default_location()?, SettingsStore::default_location()?),
    })
}

#[cfg(feature = "audio")]
fn output_engine(volume: f32) -> Box<dyn AudioEngine> {
    match soundify::audio::engine::RodioEngine::new(volume) {
        Ok(engine) => Box::new(engine),
        Err(e) => {
            warn!("No audio output: {}", e);
            Box::new(HeadlessEngine)
        }
    }
}

#[cfg(not(feature = "audio"))]
fn output_engine(_volume: f32) -> Box<dyn AudioEngine> {
    warn!("Built without the `audio` feature");
    Box::new(HeadlessEngine)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (playlist_store, settings_store) = stores(args.config_dir.as_deref())?;

    let (_guard, filter) = init_logging(args.dev)?;
    info!("Soundify {} starting", soundify::VERSION);

    let settings = settings_store.load();
    apply_debug_mode(&filter, args.dev, settings.debug_mode);

    // Only `play` needs a real device
    let engine: Box<dyn AudioEngine> = if matches!(args.command, Command::Play { .. }) {
        output_engine(settings.default_volume)
    } else {
        Box::new(HeadlessEngine)
    };
    let mut app = App::open(
        playlist_store,
        settings_store,
        settings,
        engine,
        Arc::new(TagExtractor::new()),
    )?;

    let result = run(&mut app, args.command).await;
    app.shutdown();

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn run(app: &mut App, command: Command) -> Result<()> {
    match command {
        Command::Playlists => {
            for name in app.catalog().playlist_names() {
                let count = app.catalog().songs(name).map_or(0, <[_]>::len);
                println!("{name} ({count} songs)");
            }
        }
        Command::Songs { playlist } => {
            if !app.catalog().contains_playlist(&playlist) {
                anyhow::bail!("playlist '{}' not found", playlist);
            }
            for song in app.catalog().sorted_songs(&playlist) {
                let length = song
                    .duration_seconds()
                    .map(|d| format_time(d as f64))
                    .unwrap_or_else(|| "--:--".to_string());
                println!("{:>4}  {}  [{}]  {}", song.id, song.display_title(), length, song.display_artist());
            }
        }
        Command::AddPlaylist { name } => app.add_playlist(&name)?,
        Command::RenamePlaylist { old, new } => app.rename_playlist(&old, &new)?,
        Command::RemovePlaylist { name, delete_files } => {
            let report = app.remove_playlist(&name, delete_files)?;
            for failure in &report.failed {
                eprintln!("could not delete {}: {}", failure.path.display(), failure.reason);
            }
            println!("Removed '{}' ({} files deleted)", name, report.deleted.len());
        }
        Command::Import { playlist, file, id, name } => {
            let song = app.import_file(&playlist, file, id.as_deref(), name.as_deref())?;
            println!("Added {} '{}' to '{}'", song.id, song.name, playlist);
        }
        Command::EditSong { playlist, id, new_id, name } => {
            let current = app
                .catalog()
                .song(&playlist, &id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("song '{}' not found in '{}'", id, playlist))?;
            let new_id = new_id.unwrap_or_else(|| current.id.clone());
            let name = name.unwrap_or_else(|| current.name.clone());
            let song = app.edit_song(&playlist, &id, &new_id, &name)?;
            println!("Song is now {} '{}'", song.id, song.name);
        }
        Command::RemoveSong { playlist, id, delete_file } => {
            let (song, report) = app.remove_song(&playlist, &id, delete_file)?;
            for failure in &report.failed {
                eprintln!("could not delete {}: {}", failure.path.display(), failure.reason);
            }
            println!("Removed '{}'", song.name);
        }
        Command::Play { playlist, id, shuffle, volume } => {
            if let Some(volume) = volume {
                app.set_volume_percent(&volume)?;
            }
            app.set_shuffle(shuffle);
            play(app, &playlist, id.as_deref()).await?;
        }
        Command::Download { source, url, playlist } => download(app, source, &url, &playlist).await?,
        Command::Settings => println!("{}", serde_json::to_string_pretty(app.settings())?),
    }
    Ok(())
}

async fn play(app: &mut App, playlist: &str, id: Option<&str>) -> Result<()> {
    if !app.has_output() {
        anyhow::bail!("no audio output device available");
    }
    let first = match id {
        Some(id) => Some(app.play(playlist, id)?),
        None => app.play_first(playlist)?,
    };
    let Some(first) = first else {
        println!("'{}' is empty", playlist);
        return Ok(());
    };
    println!("▶ {} - {}", first.display_title(), first.display_artist());

    let mut interval = tokio::time::interval(Duration::from_millis(200));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => match app.tick() {
                Ok(Tick::Advanced(song)) => println!("▶ {} - {}", song.display_title(), song.display_artist()),
                Ok(Tick::Position { .. }) => {}
                Ok(Tick::Idle) => break,
                Err(e) => {
                    if let Some((playlist, id)) = e.broken_entry().filter(|_| app.has_output()) {
                        eprintln!("{e}\nremove it with: soundify remove-song '{playlist}' '{id}'");
                    }
                    return Err(e.into());
                }
            },
            _ = &mut ctrl_c => {
                println!();
                break;
            }
        }
    }

    app.stop();
    Ok(())
}

async fn download(app: &mut App, source: SourceKind, url: &str, playlist: &str) -> Result<()> {
    app.start_download(source, url, playlist)?;
    println!("Downloading from {source}...");

    let finished = tokio::select! {
        report = app.recv_download() => Some(report),
        _ = tokio::signal::ctrl_c() => None,
    };
    let report = match finished {
        Some(report) => report,
        None => {
            app.cancel_downloads();
            app.recv_download().await
        }
    };
    let Some(report) = report else {
        return Ok(());
    };

    match &report.outcome {
        DownloadOutcome::Succeeded(_) => {
            for song in app.apply_download(&report) {
                println!("Added {} '{}' to '{}'", song.id, song.name, playlist);
            }
        }
        DownloadOutcome::Ambiguous {
            already_exists,
            alternate_url,
            ..
        } => {
            if *already_exists {
                println!("The file already exists; nothing new was added.");
            } else {
                println!("The downloader finished but no new audio file appeared.");
            }
            if let Some(alt) = alternate_url {
                println!("Try the YouTube source instead: soundify download youtube '{alt}' '{playlist}'");
            }
        }
        DownloadOutcome::Failed { code, output } => {
            anyhow::bail!("download failed (exit code {:?}):\n{}", code, output.trim());
        }
        DownloadOutcome::Cancelled => println!("Download cancelled"),
        DownloadOutcome::Error(message) => anyhow::bail!("download failed: {}", message),
    }
    Ok(())
}
