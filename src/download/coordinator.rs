// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore, oneshot};
use tracing::{debug, error, info, warn};

use super::format::{AudioFormat, artifact_path, sanitize_content_id};
use super::tool::Materializer;
use crate::error::MaterializeError;
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};

/// Work directory below the audio directory used while downloading
pub const WORK_DIR_NAME: &str = "temp_downloads";

/// Default number of downloads allowed to run at once
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

type DownloadResult = Result<PathBuf, MaterializeError>;

/// Resolves once a materialization attempt has finished
///
/// Unlike a bare "done" marker the result says whether the artifact
/// actually exists.
#[derive(Debug)]
pub struct Completion {
    state: CompletionState,
}

#[derive(Debug)]
enum CompletionState {
    Ready(PathBuf),
    Pending {
        content_id: String,
        receiver: oneshot::Receiver<DownloadResult>,
    },
}

impl Completion {
    fn ready(path: PathBuf) -> Self {
        Self {
            state: CompletionState::Ready(path),
        }
    }

    /// Whether the artifact already existed when requested
    pub fn is_ready(&self) -> bool {
        matches!(self.state, CompletionState::Ready(_))
    }

    /// Wait for the attempt and return the artifact path
    pub async fn wait(self) -> DownloadResult {
        match self.state {
            CompletionState::Ready(path) => Ok(path),
            CompletionState::Pending {
                content_id,
                receiver,
            } => receiver
                .await
                .unwrap_or_else(|_| Err(MaterializeError::Aborted(content_id))),
        }
    }
}

/// Single-flight download coordinator
///
/// Per content id at most one materialization runs at a time. Callers that
/// queue behind a running download re-check the filesystem once they get
/// the lock, so they fast-path to the freshly written artifact. Locks are
/// created lazily and kept for the lifetime of the coordinator.
pub struct DownloadCoordinator {
    audio_dir: PathBuf,
    work_dir: PathBuf,
    materializer: Arc<dyn Materializer>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    slots: Arc<Semaphore>,
    reporter: SharedProgressReporter,
}

impl DownloadCoordinator {
    pub fn new(audio_dir: impl Into<PathBuf>, materializer: Arc<dyn Materializer>) -> Self {
        let audio_dir = audio_dir.into();
        Self {
            work_dir: audio_dir.join(WORK_DIR_NAME),
            audio_dir,
            materializer,
            locks: Mutex::new(HashMap::new()),
            slots: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
            reporter: NoopReporter::shared(),
        }
    }

    /// Limit concurrent materializations across all content ids
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.slots = Arc::new(Semaphore::new(max_concurrent.max(1)));
        self
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    pub fn artifact_path(&self, content_id: &str, format: AudioFormat) -> PathBuf {
        artifact_path(&self.audio_dir, content_id, format)
    }

    async fn lock_for(&self, content_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(content_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Ensure the artifact for `content_id` exists or is being produced
    ///
    /// Returns the sanitized content id and a completion for the attempt.
    /// When the artifact is already on disk the completion is ready.
    pub async fn materialize(
        &self,
        content_id: &str,
        format: AudioFormat,
    ) -> Result<(String, Completion), MaterializeError> {
        let content_id = sanitize_content_id(content_id)?;
        let target = self.artifact_path(&content_id, format);

        let guard = self.lock_for(&content_id).await.lock_owned().await;

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            drop(guard);
            debug!(content_id = %content_id, path = %target.display(), "Artifact already present");
            return Ok((content_id, Completion::ready(target)));
        }

        let (sender, receiver) = oneshot::channel();
        let materializer = Arc::clone(&self.materializer);
        let slots = Arc::clone(&self.slots);
        let reporter = Arc::clone(&self.reporter);
        let work_dir = self.work_dir.clone();
        let id = content_id.clone();

        tokio::spawn(async move {
            // Held until the attempt is over so queued callers re-check afterwards
            let _guard = guard;

            let result = match slots.acquire_owned().await {
                Ok(_permit) => {
                    reporter.report(ProgressEvent::DownloadStarting {
                        content_id: id.clone(),
                    });
                    info!(content_id = %id, %format, "Materializing artifact");
                    run_download(materializer.as_ref(), &work_dir, &id, format, &target).await
                }
                Err(_) => Err(MaterializeError::Aborted(id.clone())),
            };

            match &result {
                Ok(path) => {
                    info!(content_id = %id, path = %path.display(), "Artifact ready");
                    reporter.report(ProgressEvent::DownloadCompleted {
                        content_id: id.clone(),
                        path: path.clone(),
                    });
                }
                Err(e) => {
                    error!(content_id = %id, error = %e, "Materialization failed");
                    reporter.report(ProgressEvent::DownloadFailed {
                        content_id: id.clone(),
                        error: e.to_string(),
                    });
                }
            }

            // The requester may have gone away; the artifact is still kept
            let _ = sender.send(result);
        });

        Ok((
            content_id.clone(),
            Completion {
                state: CompletionState::Pending {
                    content_id,
                    receiver,
                },
            },
        ))
    }

    /// Delete the artifact for `content_id` so the next request rebuilds it
    ///
    /// Takes the per-id lock, so a running download finishes first and no
    /// caller sees the file vanish between the existence check and the
    /// returned completion. Returns whether a file was removed.
    pub async fn invalidate(
        &self,
        content_id: &str,
        format: AudioFormat,
    ) -> Result<bool, MaterializeError> {
        let content_id = sanitize_content_id(content_id)?;
        let target = self.artifact_path(&content_id, format);
        let _guard = self.lock_for(&content_id).await.lock_owned().await;

        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                debug!(content_id = %content_id, path = %target.display(), "Discarded artifact");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MaterializeError::Io {
                path: target,
                source: e,
            }),
        }
    }

    /// Remove leftovers of interrupted downloads from the work directory
    ///
    /// Meant to run at startup before any download is requested.
    pub async fn clean_work_dir(&self) -> Result<usize, MaterializeError> {
        let io_error = |source| MaterializeError::Io {
            path: self.work_dir.clone(),
            source,
        };

        let mut entries = match tokio::fs::read_dir(&self.work_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove leftover download"),
            }
        }

        if removed > 0 {
            info!(count = removed, "Removed leftovers of interrupted downloads");
            self.reporter
                .report(ProgressEvent::PartialFilesCleanedUp { count: removed });
        }
        Ok(removed)
    }
}

/// Run the tool inside the work directory, then move the result into place
async fn run_download(
    materializer: &dyn Materializer,
    work_dir: &Path,
    content_id: &str,
    format: AudioFormat,
    target: &Path,
) -> DownloadResult {
    tokio::fs::create_dir_all(work_dir)
        .await
        .map_err(|e| MaterializeError::Io {
            path: work_dir.to_path_buf(),
            source: e,
        })?;

    let produced = materializer
        .materialize(content_id, format, work_dir)
        .await?;

    match tokio::fs::rename(&produced, target).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MaterializeError::MissingArtifact(produced));
        }
        Err(e) => {
            return Err(MaterializeError::Io {
                path: target.to_path_buf(),
                source: e,
            });
        }
    }

    if !tokio::fs::try_exists(target).await.unwrap_or(false) {
        return Err(MaterializeError::MissingArtifact(target.to_path_buf()));
    }
    Ok(target.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::testing::RecordingReporter;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Writes a small file after a delay and counts invocations
    #[derive(Default)]
    struct FakeTool {
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        fail: bool,
        skip_write: bool,
    }

    #[async_trait]
    impl Materializer for FakeTool {
        async fn materialize(
            &self,
            content_id: &str,
            format: AudioFormat,
            work_dir: &Path,
        ) -> Result<PathBuf, MaterializeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now_running, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(MaterializeError::ToolFailed {
                    content_id: content_id.to_string(),
                    exit_code: Some(1),
                    stderr: "ERROR: Video unavailable".to_string(),
                });
            }

            let path = work_dir.join(format!("{content_id}.{}", format.extension()));
            if !self.skip_write {
                tokio::fs::write(&path, b"audio").await.unwrap();
            }
            Ok(path)
        }
    }

    #[tokio::test]
    async fn concurrent_requests_download_once() {
        let dir = tempdir().unwrap();
        let tool = Arc::new(FakeTool::default());
        let coordinator = Arc::new(DownloadCoordinator::new(dir.path(), tool.clone()));

        let requests = (0..8).map(|_| {
            let coordinator = Arc::clone(&coordinator);
            async move {
                let (_, completion) = coordinator
                    .materialize("abc", AudioFormat::M4a)
                    .await
                    .unwrap();
                completion.wait().await
            }
        });
        let results = join_all(requests).await;

        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        let expected = dir.path().join("abc.m4a");
        for result in results {
            assert_eq!(result.unwrap(), expected);
        }
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn existing_artifact_takes_fast_path() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("abc.mp3"), b"audio").unwrap();
        let tool = Arc::new(FakeTool::default());
        let coordinator = DownloadCoordinator::new(dir.path(), tool.clone());

        let (id, completion) = coordinator
            .materialize("abc.mp3", AudioFormat::Mp3)
            .await
            .unwrap();

        assert_eq!(id, "abc");
        assert!(completion.is_ready());
        assert_eq!(completion.wait().await.unwrap(), dir.path().join("abc.mp3"));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_is_reported_and_lock_released() {
        let dir = tempdir().unwrap();
        let tool = Arc::new(FakeTool {
            fail: true,
            ..Default::default()
        });
        let reporter = Arc::new(RecordingReporter::default());
        let coordinator =
            DownloadCoordinator::new(dir.path(), tool.clone()).with_reporter(reporter.clone());

        let (_, completion) = coordinator
            .materialize("abc", AudioFormat::M4a)
            .await
            .unwrap();
        assert!(matches!(
            completion.wait().await,
            Err(MaterializeError::ToolFailed { .. })
        ));

        // A later request retries instead of deadlocking
        let (_, completion) = coordinator
            .materialize("abc", AudioFormat::M4a)
            .await
            .unwrap();
        assert!(completion.wait().await.is_err());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);

        assert!(
            reporter
                .events()
                .iter()
                .any(|e| matches!(e, ProgressEvent::DownloadFailed { .. }))
        );
    }

    #[tokio::test]
    async fn missing_output_is_a_failure() {
        let dir = tempdir().unwrap();
        let tool = Arc::new(FakeTool {
            skip_write: true,
            ..Default::default()
        });
        let coordinator = DownloadCoordinator::new(dir.path(), tool);

        let (_, completion) = coordinator
            .materialize("abc", AudioFormat::M4a)
            .await
            .unwrap();
        assert!(matches!(
            completion.wait().await,
            Err(MaterializeError::MissingArtifact(_))
        ));
        assert!(!dir.path().join("abc.m4a").exists());
    }

    #[tokio::test]
    async fn concurrency_cap_applies_across_ids() {
        let dir = tempdir().unwrap();
        let tool = Arc::new(FakeTool::default());
        let coordinator =
            Arc::new(DownloadCoordinator::new(dir.path(), tool.clone()).with_max_concurrent(1));

        let requests = ["a", "b", "c"].into_iter().map(|id| {
            let coordinator = Arc::clone(&coordinator);
            async move {
                let (_, completion) = coordinator.materialize(id, AudioFormat::M4a).await.unwrap();
                completion.wait().await
            }
        });
        for result in join_all(requests).await {
            assert!(result.is_ok());
        }

        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
        assert_eq!(tool.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_waits_for_running_download() {
        let dir = tempdir().unwrap();
        let tool = Arc::new(FakeTool::default());
        let coordinator = DownloadCoordinator::new(dir.path(), tool.clone());

        let (_, completion) = coordinator
            .materialize("abc", AudioFormat::M4a)
            .await
            .unwrap();
        // the download still holds the lock, so the file exists once we get it
        assert!(coordinator.invalidate("abc", AudioFormat::M4a).await.unwrap());

        assert_eq!(
            completion.wait().await.unwrap(),
            dir.path().join("abc.m4a")
        );
        assert!(!dir.path().join("abc.m4a").exists());
        assert!(!coordinator.invalidate("abc", AudioFormat::M4a).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected() {
        let dir = tempdir().unwrap();
        let coordinator = DownloadCoordinator::new(dir.path(), Arc::new(FakeTool::default()));

        assert!(matches!(
            coordinator.materialize("../secret", AudioFormat::M4a).await,
            Err(MaterializeError::InvalidContentId(_))
        ));
        assert!(matches!(
            coordinator.invalidate("../secret", AudioFormat::M4a).await,
            Err(MaterializeError::InvalidContentId(_))
        ));
    }

    #[tokio::test]
    async fn clean_work_dir_removes_leftovers() {
        let dir = tempdir().unwrap();
        let work_dir = dir.path().join(WORK_DIR_NAME);
        std::fs::create_dir_all(&work_dir).unwrap();
        std::fs::write(work_dir.join("abc.m4a.part"), b"half").unwrap();
        std::fs::write(work_dir.join("def.webm"), b"half").unwrap();
        std::fs::write(dir.path().join("done.m4a"), b"audio").unwrap();

        let reporter = Arc::new(RecordingReporter::default());
        let coordinator = DownloadCoordinator::new(dir.path(), Arc::new(FakeTool::default()))
            .with_reporter(reporter.clone());

        assert_eq!(coordinator.clean_work_dir().await.unwrap(), 2);
        assert!(dir.path().join("done.m4a").exists());
        assert!(matches!(
            reporter.events().as_slice(),
            [ProgressEvent::PartialFilesCleanedUp { count: 2 }]
        ));
    }

    #[tokio::test]
    async fn clean_work_dir_without_directory() {
        let dir = tempdir().unwrap();
        let coordinator = DownloadCoordinator::new(dir.path(), Arc::new(FakeTool::default()));
        assert_eq!(coordinator.clean_work_dir().await.unwrap(), 0);
    }
}
