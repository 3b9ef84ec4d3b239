use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_YOUTUBE_CMD: &str =
    r#"yt-dlp -x --audio-format mp3 --audio-quality 0 -o "{out}/%(title)s.%(ext)s" {url}"#;
pub const DEFAULT_SPOTIFY_CMD: &str = r#"spotdl {url} --output "{out}" --bitrate 192k"#;

/// User preferences. Passed explicitly to whatever needs them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub default_download_path: PathBuf,
    pub debug_mode: bool,
    pub audio_output_device: String,
    pub youtube_cmd: String,
    pub spotify_cmd: String,
    pub ask_on_delete: bool,
    pub default_volume: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_download_path: dirs::audio_dir()
                .map(|dir| dir.join("Soundify"))
                .unwrap_or_else(|| PathBuf::from("Sound")),
            debug_mode: false,
            audio_output_device: String::new(),
            youtube_cmd: DEFAULT_YOUTUBE_CMD.to_string(),
            spotify_cmd: DEFAULT_SPOTIFY_CMD.to_string(),
            ask_on_delete: true,
            default_volume: 0.5,
        }
    }
}

impl Settings {
    /// Overlay the known keys of a JSON object onto `self`.
    ///
    /// Unknown keys and values of the wrong type are skipped one by one, so a
    /// file written by an older or newer build still loads. Returns the keys
    /// that were applied.
    pub fn update_from_json(&mut self, value: &Value) -> Vec<String> {
        let Some(map) = value.as_object() else {
            warn!("Settings document is not a JSON object, ignoring it");
            return Vec::new();
        };

        let mut applied = Vec::new();
        for (key, value) in map {
            let ok = match key.as_str() {
                "default_download_path" => assign(&mut self.default_download_path, key, value),
                "debug_mode" => assign(&mut self.debug_mode, key, value),
                "audio_output_device" => assign(&mut self.audio_output_device, key, value),
                "youtube_cmd" => assign(&mut self.youtube_cmd, key, value),
                "spotify_cmd" => assign(&mut self.spotify_cmd, key, value),
                "ask_on_delete" => assign(&mut self.ask_on_delete, key, value),
                "default_volume" => match serde_json::from_value::<f32>(value.clone()) {
                    Ok(v) if (0.0..=1.0).contains(&v) => {
                        self.default_volume = v;
                        true
                    }
                    _ => {
                        warn!("Ignoring default_volume {}: expected a number in 0.0..=1.0", value);
                        false
                    }
                },
                _ => {
                    debug!("Ignoring unknown setting '{}'", key);
                    false
                }
            };
            if ok {
                applied.push(key.clone());
            }
        }
        applied
    }
}

fn assign<T: DeserializeOwned>(slot: &mut T, key: &str, value: &Value) -> bool {
    match serde_json::from_value(value.clone()) {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(e) => {
            warn!("Ignoring setting '{}': {}", key, e);
            false
        }
    }
}

/// Answer to "delete the files too?" when the user is still being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteAnswer {
    pub delete_files: bool,
    pub stop_asking: bool,
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/soundify/settings.json`
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(super::config_root()?.join("settings.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Defaults merged with whatever the file holds. A missing file is
    /// written out; an unreadable one is logged and left alone.
    pub fn load(&self) -> Settings {
        let mut settings = Settings::default();

        if !self.path.exists() {
            info!("No settings file at {}, writing defaults", self.path.display());
            self.save(&settings);
            return settings;
        }

        match self.read_json() {
            Ok(value) => {
                let applied = settings.update_from_json(&value);
                debug!("Loaded {} settings from {}", applied.len(), self.path.display());
            }
            Err(e) => warn!("Failed to load settings: {:#}", e),
        }
        settings
    }

    fn read_json(&self) -> Result<Value> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write every field. Failures are logged and reported as `false`.
    pub fn save(&self, settings: &Settings) -> bool {
        match self.try_save(settings) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save settings: {:#}", e);
                false
            }
        }
    }

    fn try_save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, content).with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }

    /// Decide whether a removal should also delete files.
    ///
    /// While `ask_on_delete` is set the question goes to `ask`; choosing to
    /// stop asking is saved at once and holds for later removals. With asking
    /// off, files are deleted.
    pub fn resolve_file_deletion(
        &self,
        settings: &mut Settings,
        ask: impl FnOnce() -> DeleteAnswer,
    ) -> bool {
        if !settings.ask_on_delete {
            return true;
        }

        let answer = ask();
        if answer.stop_asking {
            settings.ask_on_delete = false;
            self.save(settings);
        }
        answer.delete_files
    }
}
