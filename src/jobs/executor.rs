//! Job executor: runs one transformation per session in the background.
//!
//! `submit` validates the request, moves the session to `processing` and
//! returns immediately. The job itself waits for a worker permit, runs the
//! tool, and records `complete` or `error`. Failures never escape the job.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result, StorageError, ToolError};
use crate::session::model::{Artifact, StatusUpdate, StoredFile};
use crate::session::store::SessionStore;
use crate::storage::{self, SessionStorage};
use crate::tools::archive;
use crate::tools::{ToolKind, TransformOutput, TransformRequest, Transformer};

/// Schedules transformations onto a bounded pool.
#[derive(Clone)]
pub struct JobExecutor {
    store: Arc<SessionStore>,
    storage: SessionStorage,
    transformer: Arc<dyn Transformer>,
    permits: Arc<Semaphore>,
    max_jobs: usize,
}

impl JobExecutor {
    pub fn new(
        store: Arc<SessionStore>,
        storage: SessionStorage,
        transformer: Arc<dyn Transformer>,
        max_concurrent_jobs: usize,
    ) -> Self {
        let max_jobs = max_concurrent_jobs.max(1);
        Self {
            store,
            storage,
            transformer,
            permits: Arc::new(Semaphore::new(max_jobs)),
            max_jobs,
        }
    }

    /// Accept a job for a session and start it in the background.
    ///
    /// The tool identifier is only interpreted by the job, so an unknown tool
    /// is accepted here and reported through the session's `error` status.
    /// The returned handle may be ignored.
    pub async fn submit(&self, id: Uuid, tool: &str, file_ids: &[String]) -> Result<JoinHandle<()>> {
        if file_ids.is_empty() {
            // Unknown sessions still report NotFound first.
            self.store.get(id).await?;
            return Err(Error::InvalidInput("no files given".to_string()));
        }

        let files = self.store.begin_processing(id, file_ids).await?;
        info!(session_id = %id, tool, files = files.len(), "Job accepted");

        let job = Job {
            id,
            tool: tool.to_string(),
            files,
            store: Arc::clone(&self.store),
            storage: self.storage.clone(),
            transformer: Arc::clone(&self.transformer),
        };
        let permits = Arc::clone(&self.permits);

        Ok(tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                job.record(Err("worker pool closed".to_string())).await;
                return;
            };
            job.run().await;
        }))
    }

    /// Jobs currently holding a worker permit.
    pub fn running(&self) -> usize {
        self.max_jobs.saturating_sub(self.permits.available_permits())
    }
}

/// One accepted job.
struct Job {
    id: Uuid,
    tool: String,
    files: Vec<StoredFile>,
    store: Arc<SessionStore>,
    storage: SessionStorage,
    transformer: Arc<dyn Transformer>,
}

impl Job {
    async fn run(self) {
        let id = self.id;
        let start = std::time::Instant::now();

        // Run the transformation on its own task so a panic is caught here.
        let worker = {
            let (tool, files) = (self.tool.clone(), self.files.clone());
            let (storage, transformer) = (self.storage.clone(), Arc::clone(&self.transformer));
            tokio::spawn(async move { transform(id, &tool, &files, &storage, &*transformer).await })
        };

        let outcome = match worker.await {
            Ok(Ok(artifact)) => Ok(artifact),
            Ok(Err(e)) => {
                error!(session_id = %id, tool = %self.tool, error = %e, "Job failed");
                Err(format!("'{}' failed: {}", self.tool, e))
            }
            Err(e) => {
                error!(session_id = %id, tool = %self.tool, error = %e, "Job panicked");
                Err(format!("'{}' failed unexpectedly", self.tool))
            }
        };

        if outcome.is_ok() {
            info!(
                session_id = %id,
                tool = %self.tool,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Job complete"
            );
        }
        self.record(outcome).await;
    }

    /// Store the job's outcome on the session.
    async fn record(&self, outcome: std::result::Result<Artifact, String>) {
        let update = match outcome {
            Ok(artifact) => StatusUpdate::Complete(artifact),
            Err(message) => StatusUpdate::Error(message),
        };

        match self.store.set_status(self.id, update).await {
            Ok(()) => {}
            Err(Error::NotFound { .. }) => {
                // Reaped while running; keep storage and registry in step.
                warn!(session_id = %self.id, "Session vanished before job finished");
                if let Err(e) = self.storage.remove_session(self.id).await {
                    warn!(session_id = %self.id, error = %e, "Failed to remove orphaned storage");
                }
            }
            Err(e) => warn!(session_id = %self.id, error = %e, "Failed to record job outcome"),
        }
    }
}

/// Resolve the tool, run it, and move the result into place.
///
/// On failure no output is left in the session directory.
async fn transform(
    id: Uuid,
    tool: &str,
    files: &[StoredFile],
    storage: &SessionStorage,
    transformer: &dyn Transformer,
) -> Result<Artifact> {
    let kind: ToolKind = tool.parse()?;
    kind.check_inputs(files.len())?;

    let first_name = files.first().map(|f| f.original_name.as_str()).unwrap_or("");
    let name = kind.output_name(first_name, id);
    let final_path = storage.resolve(id, &name)?;

    let dir = storage.session_dir(id);
    let request = TransformRequest {
        kind,
        inputs: files.iter().map(|f| f.path.clone()).collect(),
        output: dir.join(format!("output_{id}.tmp")),
        work_dir: dir.join(format!("work_{id}")),
    };

    tokio::fs::create_dir_all(&request.work_dir)
        .await
        .map_err(|e| StorageError::io("create", &request.work_dir, e))?;

    let result = produce(transformer, &request, &final_path).await;

    // Scratch space never outlives the job.
    cleanup(&request.output).await;
    if let Err(e) = storage::remove_dir(&request.work_dir).await {
        warn!(session_id = %id, error = %e, "Failed to remove work directory");
    }
    if result.is_err() {
        cleanup(&final_path).await;
    }

    result.map(|()| Artifact {
        name,
        path: final_path,
    })
}

async fn produce(
    transformer: &dyn Transformer,
    request: &TransformRequest,
    final_path: &Path,
) -> Result<()> {
    let output = transformer.transform(request).await?;
    output.verify(request.kind).await?;

    let produced = match output {
        TransformOutput::File(path) => path,
        TransformOutput::Pages(pages) => {
            archive::bundle(pages, request.output.clone()).await?;
            request.output.clone()
        }
    };

    if !tokio::fs::try_exists(&produced).await.unwrap_or(false) {
        return Err(ToolError::MissingOutput {
            tool: request.kind.to_string(),
            path: produced,
        }
        .into());
    }

    tokio::fs::rename(&produced, final_path)
        .await
        .map_err(|e| StorageError::io("rename", &produced, e))?;
    Ok(())
}

async fn cleanup(path: &Path) {
    if let Err(e) = storage::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove partial output");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::session::model::SessionStatus;

    /// Concatenates inputs; fails for `compress`; pages for `split`.
    struct StubTransformer {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl StubTransformer {
        fn new() -> Arc<Self> {
            Self::with_delay(Duration::ZERO)
        }

        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl Transformer for StubTransformer {
        async fn transform(&self, req: &TransformRequest) -> std::result::Result<TransformOutput, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match req.kind {
                ToolKind::Compress => {
                    // Leave a partial file behind, then fail.
                    tokio::fs::write(&req.output, b"partial").await?;
                    Err(ToolError::NonZeroExit {
                        program: "gs".into(),
                        code: 1,
                        stderr: "corrupt input".into(),
                    })
                }
                ToolKind::Split => {
                    let mut pages = Vec::new();
                    for i in 1..=3 {
                        let p = req.work_dir.join(format!("page_{i}.pdf"));
                        tokio::fs::write(&p, format!("page {i}")).await?;
                        pages.push(p);
                    }
                    Ok(TransformOutput::Pages(pages))
                }
                ToolKind::Pdfa => Ok(TransformOutput::File(req.output.clone())),
                _ => {
                    let mut joined = Vec::new();
                    for input in &req.inputs {
                        joined.extend(tokio::fs::read(input).await?);
                    }
                    tokio::fs::write(&req.output, joined).await?;
                    Ok(TransformOutput::File(req.output.clone()))
                }
            }
        }
    }

    struct Fixture {
        _tmp: TempDir,
        store: Arc<SessionStore>,
        storage: SessionStorage,
        executor: JobExecutor,
    }

    fn fixture(transformer: Arc<dyn Transformer>, max_jobs: usize) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let store = SessionStore::new();
        let storage = SessionStorage::new(tmp.path());
        let executor = JobExecutor::new(Arc::clone(&store), storage.clone(), transformer, max_jobs);
        Fixture {
            _tmp: tmp,
            store,
            storage,
            executor,
        }
    }

    async fn session_with_files(f: &Fixture, files: &[(&str, &str)]) -> (Uuid, Vec<String>) {
        let id = f.store.create().await;
        f.storage.create_session(id).await.unwrap();
        let mut ids = Vec::new();
        for (i, (name, body)) in files.iter().enumerate() {
            let file_id = format!("f{i}");
            let path = f.storage.write_file(id, &format!("{file_id}.pdf"), body.as_bytes()).await.unwrap();
            f.store
                .add_file(
                    id,
                    file_id.clone(),
                    StoredFile {
                        path,
                        original_name: name.to_string(),
                        size: body.len() as u64,
                    },
                )
                .await
                .unwrap();
            ids.push(file_id);
        }
        (id, ids)
    }

    #[tokio::test]
    async fn merge_completes_in_declared_order() {
        let f = fixture(StubTransformer::new(), 2);
        let (id, ids) = session_with_files(&f, &[("a.pdf", "AAA"), ("b.pdf", "BBB")]).await;

        let reversed = vec![ids[1].clone(), ids[0].clone()];
        let handle = f.executor.submit(id, "merge", &reversed).await.unwrap();
        handle.await.unwrap();

        let session = f.store.get(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Complete);
        let artifact = session.result.unwrap();
        assert_eq!(artifact.name, format!("merged_{id}.pdf"));
        assert_eq!(tokio::fs::read(&artifact.path).await.unwrap(), b"BBBAAA");
        assert!(!f.storage.session_dir(id).join(format!("output_{id}.tmp")).exists());
        assert!(!f.storage.session_dir(id).join(format!("work_{id}")).exists());
    }

    #[tokio::test]
    async fn job_runs_in_background_and_checks_output() {
        let f = fixture(StubTransformer::with_delay(Duration::from_millis(200)), 1);
        let (id, ids) = session_with_files(&f, &[("a.pdf", "A")]).await;

        let handle = f.executor.submit(id, "pdfa", &ids).await.unwrap();
        assert_eq!(f.store.get(id).await.unwrap().status, SessionStatus::Processing);
        handle.await.unwrap();
        // The stub reports output it never wrote.
        let session = f.store.get(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn second_execute_is_rejected_and_first_unaffected() {
        let stub = StubTransformer::with_delay(Duration::from_millis(50));
        let f = fixture(stub.clone(), 2);
        let (id, ids) = session_with_files(&f, &[("a.pdf", "A")]).await;

        let handle = f.executor.submit(id, "merge", &ids).await.unwrap();
        let err = f.executor.submit(id, "merge", &ids).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionConflict { .. }));

        handle.await.unwrap();
        assert_eq!(f.store.get(id).await.unwrap().status, SessionStatus::Complete);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);

        let err = f.executor.submit(id, "merge", &ids).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionConflict { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_ends_in_error() {
        let stub = StubTransformer::new();
        let f = fixture(stub.clone(), 1);
        let (id, ids) = session_with_files(&f, &[("a.pdf", "A")]).await;

        f.executor.submit(id, "shred", &ids).await.unwrap().await.unwrap();

        let snap = f.store.snapshot(id).await.unwrap();
        assert_eq!(snap.status, SessionStatus::Error);
        assert!(snap.message.unwrap().contains("Unknown tool 'shred'"));
        assert!(snap.download_url.is_none());
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_failure_leaves_no_partial_output() {
        let f = fixture(StubTransformer::new(), 1);
        let (id, ids) = session_with_files(&f, &[("report.pdf", "A")]).await;

        f.executor.submit(id, "compress", &ids).await.unwrap().await.unwrap();

        let session = f.store.get(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert!(session.result.is_none());
        assert!(session.error_message.unwrap().contains("corrupt input"));
        let dir = f.storage.session_dir(id);
        assert!(!dir.join(format!("output_{id}.tmp")).exists());
        assert!(!dir.join(format!("report_compressed_{id}.pdf")).exists());
    }

    #[tokio::test]
    async fn multi_output_tool_produces_archive() {
        let f = fixture(StubTransformer::new(), 1);
        let (id, ids) = session_with_files(&f, &[("book.pdf", "A")]).await;

        f.executor.submit(id, "split", &ids).await.unwrap().await.unwrap();

        let artifact = f.store.get(id).await.unwrap().result.unwrap();
        assert_eq!(artifact.name, format!("book_split_{id}.zip"));
        let file = std::fs::File::open(&artifact.path).unwrap();
        assert_eq!(zip::ZipArchive::new(file).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn wrong_input_count_ends_in_error() {
        let f = fixture(StubTransformer::new(), 1);
        let (id, ids) = session_with_files(&f, &[("a.pdf", "A"), ("b.pdf", "B")]).await;

        f.executor.submit(id, "split", &ids).await.unwrap().await.unwrap();
        let snap = f.store.snapshot(id).await.unwrap();
        assert_eq!(snap.status, SessionStatus::Error);
        assert!(snap.message.unwrap().contains("exactly one"));
    }

    #[tokio::test]
    async fn empty_file_list_is_invalid_input() {
        let f = fixture(StubTransformer::new(), 1);
        let (id, _) = session_with_files(&f, &[]).await;
        let err = f.executor.submit(id, "merge", &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(f.store.get(id).await.unwrap().status, SessionStatus::Created);

        let err = f.executor.submit(Uuid::new_v4(), "merge", &[]).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn sessions_run_concurrently() {
        let f = fixture(StubTransformer::with_delay(Duration::from_millis(200)), 4);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let (id, ids) = session_with_files(&f, &[("a.pdf", "A")]).await;
            handles.push((id, f.executor.submit(id, "merge", &ids).await.unwrap()));
        }

        let start = std::time::Instant::now();
        for (_, h) in handles.iter_mut() {
            h.await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(700));
        for (id, _) in &handles {
            assert_eq!(f.store.get(*id).await.unwrap().status, SessionStatus::Complete);
        }
    }

    #[tokio::test]
    async fn reaped_session_storage_is_removed_on_completion() {
        let f = fixture(StubTransformer::with_delay(Duration::from_millis(50)), 1);
        let (id, ids) = session_with_files(&f, &[("a.pdf", "A")]).await;

        let handle = f.executor.submit(id, "merge", &ids).await.unwrap();
        f.store.remove(id).await;
        handle.await.unwrap();

        assert!(!f.storage.session_dir(id).exists());
    }
}
