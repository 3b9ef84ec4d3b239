// Best-effort tag reading. Extraction never fails: an unreadable file just
// yields an emptier record, so callers can treat metadata as a pure cache.

use super::{AudioFormat, Metadata};
use id3::TagLike;
use std::path::Path;
use tracing::debug;

/// Boundary to whatever reads tags out of media files.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Metadata;
}

/// Reads ID3 (mp3, wav) and MP4 atoms (m4a/aac), falling back to guessing
/// artist and title from `Artist - Title` style file names.
#[derive(Debug, Clone, Default)]
pub struct TagExtractor;

impl TagExtractor {
    pub fn new() -> Self {
        Self
    }

    fn read_tags(&self, path: &Path) -> anyhow::Result<Metadata> {
        match AudioFormat::from_path(path) {
            AudioFormat::Mp3 => self.extract_id3_metadata(id3::Tag::read_from_path(path)?),
            AudioFormat::Wav => self.extract_id3_metadata(id3::Tag::read_from_wav_path(path)?),
            AudioFormat::Mp4 => self.extract_mp4_metadata(path),
            _ => Ok(Metadata::default()),
        }
    }

    fn extract_id3_metadata(&self, tag: id3::Tag) -> anyhow::Result<Metadata> {
        Ok(Metadata {
            title: tag.title().map(|s| s.to_string()),
            artist: tag.artist().map(|s| s.to_string()),
            album: tag.album().map(|s| s.to_string()),
            // TLEN is milliseconds
            duration: tag.duration().map(|ms| u64::from(ms) / 1000),
            cover_data: tag.pictures().next().map(|p| p.data.clone()),
            lyrics: tag.lyrics().next().map(|l| l.text.clone()),
            genre: tag.genre().map(|s| s.to_string()),
        })
    }

    fn extract_mp4_metadata(&self, path: &Path) -> anyhow::Result<Metadata> {
        let tag = mp4ameta::Tag::read_from_path(path)?;

        Ok(Metadata {
            title: tag.title().map(|s| s.to_string()),
            artist: tag.artist().map(|s| s.to_string()),
            album: tag.album().map(|s| s.to_string()),
            duration: tag.duration().map(|d| d.as_secs()),
            cover_data: tag.artwork().map(|img| img.data.to_vec()),
            lyrics: tag.lyrics().map(|s| s.to_string()),
            genre: tag.genre().map(|s| s.to_string()),
        })
    }

    /// Feature-gated duration probing using symphonia codec
    #[cfg(feature = "probe")]
    fn probe_duration_with_symphonia(&self, path: &Path) -> anyhow::Result<u64> {
        use std::fs::File;
        use symphonia::core::formats::FormatOptions;
        use symphonia::core::io::MediaSourceStream;
        use symphonia::core::meta::MetadataOptions;
        use symphonia::core::probe::Hint;

        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();

        let probed = symphonia::default::get_probe().format(&hint, mss, &fmt_opts, &meta_opts)?;

        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow::anyhow!("No supported audio tracks found"))?;

        match (track.codec_params.time_base, track.codec_params.n_frames) {
            (Some(time_base), Some(n_frames)) => Ok(time_base.calc_time(n_frames).seconds),
            _ => Err(anyhow::anyhow!("Could not determine duration from file")),
        }
    }
}

impl MetadataExtractor for TagExtractor {
    fn extract(&self, path: &Path) -> Metadata {
        let mut meta = match self.read_tags(path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!("No readable tags in {}: {}", path.display(), e);
                Metadata::default()
            }
        };

        if meta.title.is_none() || meta.artist.is_none() {
            if let Some((artist, title)) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(infer_from_filename)
            {
                meta.artist.get_or_insert(artist);
                meta.title.get_or_insert(title);
            }
        }

        #[cfg(feature = "probe")]
        if meta.duration.is_none() {
            if let Ok(secs) = self.probe_duration_with_symphonia(path) {
                meta.duration = Some(secs);
            }
        }

        meta
    }
}

const DELIMITERS: [&str; 4] = [" - ", " – ", " | ", " ~ "];

const NOISE: [&str; 12] = [
    "(Official Audio)",
    "(Official Video)",
    "(Official Music Video)",
    "(Official Lyric Video)",
    "(Audio)",
    "(Video)",
    "(Lyric Video)",
    "(Music Video)",
    "[Official Audio]",
    "[Official Video]",
    "[Audio]",
    "[Video]",
];

/// Guess `(artist, title)` from a downloader-style file name such as
/// `Artist - Title (Official Video).mp3` or `03 - Artist - Title.m4a`.
pub fn infer_from_filename(file_name: &str) -> Option<(String, String)> {
    let stem = match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    };

    let (left, right) = split_once_any(stem)?;

    // Leading track number: "03 - Artist - Title"
    let (left, right) = if left.trim().chars().all(|c| c.is_ascii_digit()) {
        split_once_any(right)?
    } else {
        (left, right)
    };

    let artist = clean_text(left);
    let title = clean_text(right);
    if artist.chars().count() < 2 || title.chars().count() < 2 {
        return None;
    }

    Some((artist, title))
}

fn split_once_any(s: &str) -> Option<(&str, &str)> {
    DELIMITERS
        .iter()
        .filter_map(|d| s.find(d).map(|pos| (pos, d.len())))
        .min_by_key(|(pos, _)| *pos)
        .map(|(pos, len)| (&s[..pos], &s[pos + len..]))
}

fn clean_text(text: &str) -> String {
    let mut cleaned = text.to_string();
    for noise in NOISE {
        cleaned = cleaned.replace(noise, "");
    }

    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .to_string()
}
