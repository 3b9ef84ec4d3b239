use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::audio::AudioFormat;

/// Audio files directly inside a directory, with their modification times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectorySnapshot {
    files: HashMap<PathBuf, Option<SystemTime>>,
}

impl DirectorySnapshot {
    /// List `dir` one level deep. A missing directory is an empty snapshot.
    pub fn capture(dir: &Path) -> Self {
        let files = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| AudioFormat::from_path(entry.path()).is_supported())
            .map(|entry| {
                let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
                (entry.into_path(), modified)
            })
            .collect();

        Self { files }
    }

    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            files: paths.into_iter().map(|p| (p.into(), None)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Files in `self` that are absent from `before`, plus, when `since` is
    /// given, files modified at or after it. Sorted by path.
    pub fn new_since(&self, before: &DirectorySnapshot, since: Option<SystemTime>) -> Vec<PathBuf> {
        let mut fresh: Vec<PathBuf> = self
            .files
            .iter()
            .filter(|(path, modified)| {
                let added = !before.contains(path);
                let touched = matches!((since, modified), (Some(since), Some(m)) if *m >= since);
                added || touched
            })
            .map(|(path, _)| path.clone())
            .collect();
        fresh.sort();
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn diff_reports_only_new_file() {
        let before = DirectorySnapshot::from_paths(["x.mp3"]);
        let after = DirectorySnapshot::from_paths(["x.mp3", "y.mp3"]);
        assert_eq!(after.new_since(&before, None), vec![PathBuf::from("y.mp3")]);
    }

    #[test]
    fn capture_skips_non_audio_and_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"").unwrap();
        fs::write(dir.path().join("b.M4A"), b"").unwrap();
        fs::write(dir.path().join("c.part"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("d.mp3"), b"").unwrap();

        let snap = DirectorySnapshot::capture(dir.path());
        assert_eq!(snap.len(), 2);
        assert!(snap.contains(&dir.path().join("a.mp3")));
        assert!(snap.contains(&dir.path().join("b.M4A")));
    }

    #[test]
    fn missing_directory_is_empty() {
        let snap = DirectorySnapshot::capture(Path::new("/no/such/soundify/dir"));
        assert!(snap.is_empty());
    }

    #[test]
    fn mtime_filter_reports_recently_modified() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.mp3");
        fs::write(&old, b"v1").unwrap();
        let before = DirectorySnapshot::capture(dir.path());

        let since = SystemTime::now() - Duration::from_secs(60);
        fs::write(&old, b"v2").unwrap();
        let after = DirectorySnapshot::capture(dir.path());

        assert!(after.new_since(&before, None).is_empty());
        assert_eq!(after.new_since(&before, Some(since)), vec![old]);

        let later = SystemTime::now() + Duration::from_secs(3600);
        assert!(after.new_since(&before, Some(later)).is_empty());
    }
}
