// Audio engine boundary. The transport is the only owner of an engine; the
// rodio backend is one implementation, tests script their own.

use anyhow::Result;
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

pub trait AudioEngine {
    /// Decode `path` and queue it, replacing whatever was loaded.
    fn load(&mut self, path: &Path) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn unpause(&mut self);
    /// Stop and drop the loaded source.
    fn stop(&mut self);
    fn set_position(&mut self, seconds: f64) -> Result<()>;
    fn set_volume(&mut self, fraction: f32);
    /// True while audio is actually being produced (false when paused or drained).
    fn is_busy(&self) -> bool;
    fn probe_duration(&self, path: &Path) -> Option<f64>;

    /// False when loads can never succeed because there is no device.
    fn has_output(&self) -> bool {
        true
    }
}

/// Source of "now" for elapsed-time arithmetic.
pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Used when nothing will be played, or no output device exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessEngine;

impl AudioEngine for HeadlessEngine {
    fn load(&mut self, _path: &Path) -> Result<()> {
        anyhow::bail!("no audio output available")
    }

    fn play(&mut self) -> Result<()> {
        anyhow::bail!("no audio output available")
    }

    fn pause(&mut self) {}

    fn unpause(&mut self) {}

    fn stop(&mut self) {}

    fn set_position(&mut self, _seconds: f64) -> Result<()> {
        anyhow::bail!("no audio output available")
    }

    fn set_volume(&mut self, _fraction: f32) {}

    fn is_busy(&self) -> bool {
        false
    }

    fn probe_duration(&self, _path: &Path) -> Option<f64> {
        None
    }

    fn has_output(&self) -> bool {
        false
    }
}

#[cfg(feature = "audio")]
pub use self::rodio_backend::RodioEngine;

#[cfg(feature = "audio")]
mod rodio_backend {
    use super::AudioEngine;
    use anyhow::Result;
    use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;
    use std::time::Duration;
    use tracing::debug;

    pub struct RodioEngine {
        _stream: OutputStream,
        stream_handle: OutputStreamHandle,
        sink: Option<Sink>,
        volume: f32,
    }

    impl RodioEngine {
        pub fn new(volume: f32) -> Result<Self> {
            let (stream, stream_handle) = OutputStream::try_default()?;

            Ok(Self {
                _stream: stream,
                stream_handle,
                sink: None,
                volume: volume.clamp(0.0, 1.0),
            })
        }

        fn decode(path: &Path) -> Result<Decoder<BufReader<File>>> {
            let file = File::open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open audio file: {}", e))?;

            Decoder::new(BufReader::new(file)).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to decode audio file '{}': {}. This file may be corrupted or use an unsupported format.",
                    path.display(),
                    e
                )
            })
        }
    }

    impl AudioEngine for RodioEngine {
        fn load(&mut self, path: &Path) -> Result<()> {
            self.stop();

            let source = Self::decode(path)?;
            let sink = Sink::try_new(&self.stream_handle)?;
            sink.set_volume(self.volume);
            sink.pause();
            sink.append(source);

            self.sink = Some(sink);
            debug!("Loaded {}", path.display());
            Ok(())
        }

        fn play(&mut self) -> Result<()> {
            let sink = self
                .sink
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("No audio loaded"))?;
            sink.play();
            Ok(())
        }

        fn pause(&mut self) {
            if let Some(sink) = self.sink.as_ref() {
                sink.pause();
            }
        }

        fn unpause(&mut self) {
            if let Some(sink) = self.sink.as_ref() {
                sink.play();
            }
        }

        fn stop(&mut self) {
            if let Some(sink) = self.sink.take() {
                sink.stop();
            }
        }

        fn set_position(&mut self, seconds: f64) -> Result<()> {
            let sink = self
                .sink
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("No audio loaded"))?;
            sink.try_seek(Duration::from_secs_f64(seconds.max(0.0)))
                .map_err(|e| anyhow::anyhow!("{:?}", e))
        }

        fn set_volume(&mut self, fraction: f32) {
            self.volume = fraction;
            if let Some(sink) = self.sink.as_ref() {
                sink.set_volume(fraction);
            }
        }

        fn is_busy(&self) -> bool {
            self.sink
                .as_ref()
                .map(|sink| !sink.empty() && !sink.is_paused())
                .unwrap_or(false)
        }

        fn probe_duration(&self, path: &Path) -> Option<f64> {
            Self::decode(path)
                .ok()
                .and_then(|source| source.total_duration())
                .map(|d| d.as_secs_f64())
        }
    }
}
