use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::{diagnose_empty_result, DirectorySnapshot, DownloadOutcome, DownloadReport, DownloadRequest, DownloadedFile};
use crate::audio::MetadataExtractor;
use crate::error::DownloadError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared stop flag, checked by the worker between process polls.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Control-side handle to one running download.
pub struct DownloadHandle {
    token: CancellationToken,
    thread: JoinHandle<()>,
}

impl DownloadHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("Download worker panicked");
        }
    }
}

/// Start `request` on its own thread. The report arrives on `tx` once the
/// tool exits or is cancelled; the worker never touches the catalog.
pub fn spawn_download(
    request: DownloadRequest,
    extractor: Arc<dyn MetadataExtractor>,
    tx: UnboundedSender<DownloadReport>,
) -> DownloadHandle {
    let token = CancellationToken::new();
    let worker_token = token.clone();

    let thread = thread::spawn(move || {
        let outcome = run(&request, extractor.as_ref(), &worker_token);
        let report = DownloadReport {
            kind: request.kind,
            url: request.url,
            playlist: request.playlist,
            outcome,
        };
        if tx.send(report).is_err() {
            warn!("Download finished after the receiver went away");
        }
    });

    DownloadHandle { token, thread }
}

/// Blocking body of a download. Public so callers without a channel can run
/// it inline.
pub fn run(request: &DownloadRequest, extractor: &dyn MetadataExtractor, token: &CancellationToken) -> DownloadOutcome {
    match execute(request, extractor, token) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("{} download failed: {}", request.kind, e);
            DownloadOutcome::Error(e.to_string())
        }
    }
}

fn execute(
    request: &DownloadRequest,
    extractor: &dyn MetadataExtractor,
    token: &CancellationToken,
) -> Result<DownloadOutcome, DownloadError> {
    std::fs::create_dir_all(&request.out_dir).map_err(|source| DownloadError::Io {
        path: request.out_dir.clone(),
        source,
    })?;

    let before = DirectorySnapshot::capture(&request.out_dir);
    let started = SystemTime::now();
    info!("Starting {} download: {}", request.kind, request.command);

    let mut child = shell(&request.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| DownloadError::Spawn {
            command: request.command.clone(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        if token.is_cancelled() {
            terminate(&mut child);
            info!("{} download cancelled", request.kind);
            return Ok(DownloadOutcome::Cancelled);
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                terminate(&mut child);
                return Err(DownloadError::Io {
                    path: request.out_dir.clone(),
                    source: e,
                });
            }
        }
    };

    let output = [join_output(stdout), join_output(stderr)]
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if !status.success() {
        warn!("{} download exited with {}", request.kind, status);
        return Ok(DownloadOutcome::Failed {
            code: status.code(),
            output,
        });
    }

    let after = DirectorySnapshot::capture(&request.out_dir);
    let since = request.kind.uses_mtime_filter().then_some(started);
    let new_files = after.new_since(&before, since);

    if new_files.is_empty() {
        let (already_exists, alternate_url) = diagnose_empty_result(&output);
        warn!(
            "{} download finished but no new audio file appeared (already exists: {})",
            request.kind, already_exists
        );
        return Ok(DownloadOutcome::Ambiguous {
            already_exists,
            alternate_url,
            output,
        });
    }

    let files = new_files
        .into_iter()
        .map(|path| {
            debug!("New file {}", path.display());
            DownloadedFile {
                metadata: extractor.extract(&path),
                path,
            }
        })
        .collect();

    Ok(DownloadOutcome::Succeeded(files))
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

fn terminate(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("kill: {}", e);
    }
    let _ = child.wait();
}

/// Read a pipe to the end on a helper thread so the child never blocks on a
/// full buffer.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }))
}

fn join_output(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::audio::Metadata;
    use crate::download::SourceKind;
    use std::path::{Path, PathBuf};
    use std::time::Instant;

    struct NameOnly;

    impl MetadataExtractor for NameOnly {
        fn extract(&self, path: &Path) -> Metadata {
            Metadata {
                title: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
                ..Default::default()
            }
        }
    }

    fn request(kind: SourceKind, out: &Path, command: &str) -> DownloadRequest {
        DownloadRequest {
            kind,
            url: "https://example.invalid/track".into(),
            playlist: "P".into(),
            out_dir: out.to_path_buf(),
            command: command.into(),
        }
    }

    #[test]
    fn new_file_is_reported_with_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.mp3"), b"old").unwrap();
        let out = dir.path().display().to_string();

        let req = request(SourceKind::YouTube, dir.path(), &format!("printf data > '{out}/y.mp3'"));
        match run(&req, &NameOnly, &CancellationToken::new()) {
            DownloadOutcome::Succeeded(files) => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].path, dir.path().join("y.mp3"));
                assert_eq!(files[0].metadata.title.as_deref(), Some("y"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_zero_exit_is_failure_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(SourceKind::YouTube, dir.path(), "echo 'ERROR: bad url' >&2; exit 3");

        match run(&req, &NameOnly, &CancellationToken::new()) {
            DownloadOutcome::Failed { code, output } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("bad url"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_exit_without_files_is_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(
            SourceKind::Spotify,
            dir.path(),
            "echo 'Skipping X (file already exists) https://www.youtube.com/watch?v=q1'",
        );

        match run(&req, &NameOnly, &CancellationToken::new()) {
            DownloadOutcome::Ambiguous {
                already_exists,
                alternate_url,
                ..
            } => {
                assert!(already_exists);
                assert_eq!(alternate_url.as_deref(), Some("https://www.youtube.com/watch?v=q1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancel_kills_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().display().to_string();
        let req = request(
            SourceKind::YouTube,
            dir.path(),
            &format!("sleep 30; printf data > '{out}/late.mp3'"),
        );

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_download(req, Arc::new(NameOnly), tx);
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        handle.cancel();
        handle.join();
        assert!(started.elapsed() < Duration::from_secs(10));

        let report = rx.try_recv().unwrap();
        assert_eq!(report.outcome, DownloadOutcome::Cancelled);
        assert!(!PathBuf::from(&out).join("late.mp3").exists());
    }

    #[test]
    fn missing_tool_is_a_failure_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(SourceKind::YouTube, dir.path(), "definitely-not-a-downloader-xyz {url}");

        assert!(matches!(
            run(&req, &NameOnly, &CancellationToken::new()),
            DownloadOutcome::Failed { code: Some(127), .. }
        ));
    }
}
