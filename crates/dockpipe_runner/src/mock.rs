//! Mock container engine for testing.
//!
//! Provides a configurable in-memory implementation of the ContainerEngine
//! trait for use in tests without requiring an actual Docker engine.

use std::collections::HashMap;
use std::io;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::stream;
use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncWrite;
use uuid::Uuid;

use crate::config::ExecConfig;
use crate::engine::{
    ContainerEngine, ExecSession, ExecStatus, ImageRecord, PrivilegeFn, PullProgress, PullStream,
};
use crate::error::{RunnerError, RunnerResult};
use crate::hijack::HijackedConnection;

/// Shared in-memory sink that records writes and half-closes.
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    shutdowns: Arc<AtomicUsize>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Contents as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data.lock()).into_owned()
    }

    /// Number of times the buffer was shut down.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for CaptureBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.data.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub target: Option<String>,
}

#[derive(Debug, Clone)]
struct MockExec {
    session: ExecSession,
    running: bool,
    exit_code: Option<i64>,
    size: Option<(u16, u16)>,
    /// Inspections left before the process reports its exit.
    pending_inspects: usize,
}

/// Mock container engine for testing.
///
/// Exec sessions replay a scripted output stream and record whatever the
/// relay writes to them; images live in an in-memory table.
#[derive(Clone)]
pub struct MockEngine {
    /// Whether ping succeeds.
    available: Arc<RwLock<bool>>,
    /// Containers that accept exec sessions.
    containers: Arc<RwLock<Vec<String>>>,
    /// Exec sessions by id.
    execs: Arc<RwLock<HashMap<String, MockExec>>>,
    /// Bytes every attached session emits.
    exec_output: Arc<RwLock<Vec<u8>>>,
    /// Exit code every session reports once attached.
    exit_code: Arc<RwLock<i64>>,
    /// Inspections an attached session stays running for.
    running_inspects: Arc<RwLock<usize>>,
    /// Input written by relays.
    stdin: CaptureBuffer,
    /// Images the engine has cached.
    images: Arc<RwLock<Vec<ImageRecord>>>,
    /// Images a pull can fetch, by reference.
    registry: Arc<RwLock<HashMap<String, ImageRecord>>>,
    /// References whose registry rejects anonymous pulls.
    private_refs: Arc<RwLock<Vec<String>>>,
    /// Images referenced by containers.
    images_in_use: Arc<RwLock<Vec<String>>>,
    /// Simulated list failure.
    list_failure: Arc<RwLock<Option<String>>>,
    /// Captured calls for verification.
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    exec_counter: Arc<AtomicUsize>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a new mock engine.
    pub fn new() -> Self {
        Self {
            available: Arc::new(RwLock::new(true)),
            containers: Arc::new(RwLock::new(Vec::new())),
            execs: Arc::new(RwLock::new(HashMap::new())),
            exec_output: Arc::new(RwLock::new(Vec::new())),
            exit_code: Arc::new(RwLock::new(0)),
            running_inspects: Arc::new(RwLock::new(0)),
            stdin: CaptureBuffer::new(),
            images: Arc::new(RwLock::new(Vec::new())),
            registry: Arc::new(RwLock::new(HashMap::new())),
            private_refs: Arc::new(RwLock::new(Vec::new())),
            images_in_use: Arc::new(RwLock::new(Vec::new())),
            list_failure: Arc::new(RwLock::new(None)),
            captured_calls: Arc::new(RwLock::new(Vec::new())),
            exec_counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set whether the engine answers pings.
    pub fn set_available(self, available: bool) -> Self {
        *self.available.write() = available;
        self
    }

    /// Register a running container.
    pub fn add_container(self, id: impl Into<String>) -> Self {
        self.containers.write().push(id.into());
        self
    }

    /// Bytes emitted on the read side of every attached session.
    pub fn with_exec_output(self, output: impl Into<Vec<u8>>) -> Self {
        *self.exec_output.write() = output.into();
        self
    }

    /// Exit code reported by sessions after they were attached.
    pub fn with_exit_code(self, code: i64) -> Self {
        *self.exit_code.write() = code;
        self
    }

    /// Keep attached sessions running for the first `count` inspections.
    pub fn with_running_inspects(self, count: usize) -> Self {
        *self.running_inspects.write() = count;
        self
    }

    /// Add a cached image.
    pub fn add_image(self, id: impl Into<String>, tags: &[&str]) -> Self {
        self.images.write().push(ImageRecord {
            id: id.into(),
            repo_tags: tags.iter().map(|t| t.to_string()).collect(),
            size: 1024,
            virtual_size: 1024,
        });
        self
    }

    /// Make `reference` pullable; the pulled image gets `id` and the tag `reference`.
    pub fn add_registry_image(self, reference: impl Into<String>, id: impl Into<String>) -> Self {
        let reference = reference.into();
        self.registry.write().insert(
            reference.clone(),
            ImageRecord {
                id: id.into(),
                repo_tags: vec![reference],
                size: 2048,
                virtual_size: 2048,
            },
        );
        self
    }

    /// Require credentials when pulling `reference`.
    pub fn require_credentials(self, reference: impl Into<String>) -> Self {
        self.private_refs.write().push(reference.into());
        self
    }

    /// Mark an image as used by a container.
    pub fn mark_in_use(self, id: impl Into<String>) -> Self {
        self.images_in_use.write().push(id.into());
        self
    }

    /// Make list calls fail.
    pub fn fail_list(self, message: impl Into<String>) -> Self {
        *self.list_failure.write() = Some(message.into());
        self
    }

    /// Everything relays wrote to attached sessions.
    pub fn stdin(&self) -> CaptureBuffer {
        self.stdin.clone()
    }

    /// Last tty size set on an exec, as (rows, cols).
    pub fn exec_size(&self, exec_id: &str) -> Option<(u16, u16)> {
        self.execs.read().get(exec_id).and_then(|e| e.size)
    }

    /// Ids of cached images.
    pub fn image_ids(&self) -> Vec<String> {
        self.images.read().iter().map(|i| i.id.clone()).collect()
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Check if a specific method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls.read().iter().any(|c| c.method == method)
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    fn record_call(&self, method: &str, target: Option<&str>) {
        self.captured_calls.write().push(CapturedCall {
            method: method.to_string(),
            target: target.map(str::to_string),
        });
    }

    fn find_image(&self, name: &str) -> Option<ImageRecord> {
        let qualified = format!("{}:latest", name);
        self.images
            .read()
            .iter()
            .find(|i| {
                i.id == name || i.repo_tags.iter().any(|t| t == name || *t == qualified)
            })
            .cloned()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn ping(&self) -> RunnerResult<()> {
        self.record_call("ping", None);
        if *self.available.read() {
            Ok(())
        } else {
            Err(RunnerError::RemoteUnavailable("mock engine is down".into()))
        }
    }

    async fn create_exec(&self, config: &ExecConfig) -> RunnerResult<ExecSession> {
        self.record_call("create_exec", Some(&config.container_id));
        config.validate()?;

        if !self.containers.read().contains(&config.container_id) {
            return Err(RunnerError::NotFound(format!(
                "No such container: {}",
                config.container_id
            )));
        }

        let seq = self.exec_counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock-exec-{}-{}", seq, Uuid::new_v4().simple());
        let session = ExecSession::from_config(id.clone(), config);

        self.execs.write().insert(
            id,
            MockExec {
                session: session.clone(),
                running: false,
                exit_code: None,
                size: None,
                pending_inspects: 0,
            },
        );
        Ok(session)
    }

    async fn attach_exec(&self, session: &ExecSession) -> RunnerResult<HijackedConnection> {
        self.record_call("attach_exec", Some(&session.id));

        let mut execs = self.execs.write();
        let exec = execs
            .get_mut(&session.id)
            .ok_or_else(|| RunnerError::NotFound(format!("No such exec instance: {}", session.id)))?;
        exec.pending_inspects = *self.running_inspects.read();
        if exec.pending_inspects == 0 {
            exec.running = false;
            exec.exit_code = Some(*self.exit_code.read());
        } else {
            exec.running = true;
        }

        let output = Cursor::new(self.exec_output.read().clone());
        Ok(HijackedConnection::new(output, self.stdin.clone()))
    }

    async fn inspect_exec(&self, exec_id: &str) -> RunnerResult<ExecStatus> {
        self.record_call("inspect_exec", Some(exec_id));

        let mut execs = self.execs.write();
        let exec = execs
            .get_mut(exec_id)
            .ok_or_else(|| RunnerError::NotFound(format!("No such exec instance: {}", exec_id)))?;

        let status = ExecStatus {
            id: exec.session.id.clone(),
            container_id: exec.session.container_id.clone(),
            running: exec.running,
            exit_code: exec.exit_code,
            pid: Some(4242),
            tty: exec.session.tty,
        };

        if exec.running && exec.pending_inspects > 0 {
            exec.pending_inspects -= 1;
            if exec.pending_inspects == 0 {
                exec.running = false;
                exec.exit_code = Some(*self.exit_code.read());
            }
        }
        Ok(status)
    }

    async fn resize_exec(&self, exec_id: &str, rows: u16, cols: u16) -> RunnerResult<()> {
        self.record_call("resize_exec", Some(exec_id));

        let mut execs = self.execs.write();
        let exec = execs
            .get_mut(exec_id)
            .ok_or_else(|| RunnerError::NotFound(format!("No such exec instance: {}", exec_id)))?;
        exec.size = Some((rows, cols));
        Ok(())
    }

    async fn list_images(&self) -> RunnerResult<Vec<ImageRecord>> {
        self.record_call("list_images", None);
        if let Some(message) = self.list_failure.read().clone() {
            return Err(RunnerError::RemoteUnavailable(message));
        }
        Ok(self.images.read().clone())
    }

    async fn inspect_image(&self, image: &str) -> RunnerResult<ImageRecord> {
        self.record_call("inspect_image", Some(image));
        self.find_image(image)
            .ok_or_else(|| RunnerError::NotFound(format!("No such image: {}", image)))
    }

    async fn pull_image(&self, reference: &str, privilege: PrivilegeFn) -> RunnerResult<PullStream> {
        self.record_call("pull_image", Some(reference));

        if self.private_refs.read().iter().any(|r| r == reference) {
            privilege()?;
        }

        let record = self.registry.read().get(reference).cloned().ok_or_else(|| {
            RunnerError::NotFound(format!("pull access denied for {}", reference))
        })?;

        let layer = record.id.clone();
        self.images.write().push(record);

        let progress = vec![
            Ok(PullProgress {
                id: Some(layer.clone()),
                status: Some("Pulling fs layer".into()),
                ..Default::default()
            }),
            Ok(PullProgress {
                id: Some(layer),
                status: Some("Pull complete".into()),
                ..Default::default()
            }),
        ];
        Ok(Box::pin(stream::iter(progress)))
    }

    async fn remove_image(&self, image: &str, _force: bool, _prune: bool) -> RunnerResult<()> {
        self.record_call("remove_image", Some(image));

        let record = self
            .find_image(image)
            .ok_or_else(|| RunnerError::NotFound(format!("No such image: {}", image)))?;
        if self.images_in_use.read().contains(&record.id) {
            return Err(RunnerError::InUse(format!(
                "image {} is being used by a running container",
                image
            )));
        }

        self.images.write().retain(|i| i.id != record.id);
        Ok(())
    }
}
