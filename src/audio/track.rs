use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A playlist entry. Only `id`, `name` and `file` are ever persisted; the
/// metadata is a cache rebuilt from the file's tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub name: String,
    pub file: PathBuf,
    #[serde(skip)]
    pub metadata: Option<Metadata>,
}

/// Descriptive data read from a file's tags. Never authoritative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<u64>, // whole seconds
    pub cover_data: Option<Vec<u8>>,
    pub lyrics: Option<String>,
    pub genre: Option<String>,
}

impl Song {
    pub fn new(id: impl Into<String>, name: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            file: file.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn numeric_id(&self) -> Option<u64> {
        self.id.trim().parse().ok()
    }

    /// Display order: numeric ids ascending, then anything non-numeric by text.
    pub fn display_order(a: &Song, b: &Song) -> Ordering {
        match (a.numeric_id(), b.numeric_id()) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.id.cmp(&b.id)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        }
    }

    /// Same entry, ignoring whatever metadata is cached on either side.
    pub fn same_entry(&self, other: &Song) -> bool {
        self.id == other.id && self.name == other.name && self.file == other.file
    }

    /// Copy without the metadata cache, as it is written to disk.
    pub fn sanitized(&self) -> Song {
        Song::new(self.id.clone(), self.name.clone(), self.file.clone())
    }

    pub fn duration_seconds(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(|m| m.duration).filter(|d| *d > 0)
    }

    pub fn display_title(&self) -> String {
        self.metadata
            .as_ref()
            .and_then(|m| m.title.clone())
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn display_artist(&self) -> String {
        self.metadata
            .as_ref()
            .map(Metadata::display_artist)
            .unwrap_or_else(|| "Unknown Artist".to_string())
    }
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        *self == Metadata::default()
    }

    pub fn display_title(&self, file: &Path) -> String {
        self.title.clone().unwrap_or_else(|| {
            file.file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("Unknown")
                .to_string()
        })
    }

    /// Multi-artist tags come through as `a/b`.
    pub fn display_artist(&self) -> String {
        self.artist
            .as_deref()
            .map(|a| a.replace('/', ", "))
            .unwrap_or_else(|| "Unknown Artist".to_string())
    }

    /// Lyrics as shown to a reader: leading `Lyrics:` / `[Intro]` preambles
    /// dropped and quoted phrases turned into parentheticals.
    pub fn display_lyrics(&self) -> Option<String> {
        static PREAMBLE: OnceLock<Option<Regex>> = OnceLock::new();
        static INTRO: OnceLock<Option<Regex>> = OnceLock::new();
        static QUOTED: OnceLock<Option<Regex>> = OnceLock::new();

        let raw = self.lyrics.as_deref()?;
        let preamble = PREAMBLE.get_or_init(|| Regex::new(r"(?s)Lyrics[:\s]*(.*)").ok());
        let intro = INTRO.get_or_init(|| Regex::new(r"(?s)\[Intro\][:\s]*(.*)").ok());
        let quoted = QUOTED.get_or_init(|| Regex::new(r#"["“”]([^"“”]*?)["“”]"#).ok());

        let body = [preamble, intro]
            .into_iter()
            .flatten()
            .find_map(|re| re.captures(raw))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| raw.to_string());

        match quoted {
            Some(re) => Some(re.replace_all(&body, "($1)").into_owned()),
            None => Some(body),
        }
    }
}
