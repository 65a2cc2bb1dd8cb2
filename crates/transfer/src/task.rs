//! A single upload or download and the async driver that runs it.
//!
//! Status and progress live behind one lock together with the event sender,
//! so every event is emitted in the order the state changes happened and
//! nothing can follow the terminal event: the sender is dropped with it.

use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use futures_util::{StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use seaclient_api::{
    ApiClient, Prefetch, RedirectResolver, RedirectTracker, TransferRequest, Url, endpoints,
    redirect_target,
};
use serde::Serialize;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::allocator::LocalPathAllocator;
use crate::events::{TaskErrorKind, TaskEvent, TaskHandle, TaskKind};
use crate::progress::ProgressCounter;
use crate::state::{StateMachine, TaskStatus, Transition};
use crate::{DEFAULT_MAX_REDIRECTS, TransferError};

/// Per-task tunables.
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    /// Bound on HTTP redirects followed by one task. The URL named by a
    /// prefetch body is only checked for loops.
    pub max_redirects: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// What to transfer and where the local side lives.
#[derive(Debug, Clone)]
pub struct TaskParams {
    pub kind: TaskKind,
    pub request: TransferRequest,
    /// Target directory for downloads, source file for uploads.
    pub local_path: PathBuf,
}

impl TaskParams {
    pub fn download(request: TransferRequest, dir: impl Into<PathBuf>) -> Self {
        Self {
            kind: TaskKind::Download,
            request,
            local_path: dir.into(),
        }
    }

    pub fn upload(request: TransferRequest, source: impl Into<PathBuf>) -> Self {
        Self {
            kind: TaskKind::Upload,
            request,
            local_path: source.into(),
        }
    }
}

/// Point-in-time copy of a task's observable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    pub handle: TaskHandle,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub repo_id: String,
    pub path: String,
    pub file_name: String,
    pub revision: Option<String>,
    pub remote_url: Option<String>,
    pub local_path: Option<PathBuf>,
    pub processed_bytes: u64,
    pub total_bytes: u64,
    pub auto_redirect_pending: bool,
    /// Set once the task is aborted.
    pub error: Option<TaskErrorKind>,
}

struct TaskState {
    machine: StateMachine,
    progress: ProgressCounter,
    remote_url: Option<Url>,
    local_path: Option<PathBuf>,
    error: Option<TaskErrorKind>,
    events: Option<mpsc::UnboundedSender<TaskEvent>>,
}

impl TaskState {
    fn emit(&mut self, event: TaskEvent) {
        let terminal = event.is_terminal();
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
        if terminal {
            self.events = None;
        }
    }
}

/// One in-flight transfer.
pub struct TransferTask {
    handle: TaskHandle,
    params: TaskParams,
    client: Arc<ApiClient>,
    options: TransferOptions,
    allocator: LocalPathAllocator,
    cancel: CancellationToken,
    state: RwLock<TaskState>,
}

impl std::fmt::Debug for TransferTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferTask")
            .field("handle", &self.handle)
            .field("kind", &self.params.kind)
            .field("status", &self.status())
            .finish()
    }
}

impl TransferTask {
    /// Creates a task in `Fresh` state together with its event receiver.
    ///
    /// The channel exists from the start so no event is lost before the
    /// receiver is read.
    pub fn new(
        handle: TaskHandle,
        params: TaskParams,
        client: Arc<ApiClient>,
        options: TransferOptions,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let prefetch = params.request.resolved_url.is_none();
        let local_path = match params.kind {
            TaskKind::Upload => Some(params.local_path.clone()),
            TaskKind::Download => None,
        };
        let task = Arc::new(Self {
            handle,
            params,
            client,
            options,
            allocator: LocalPathAllocator::new(),
            cancel: CancellationToken::new(),
            state: RwLock::new(TaskState {
                machine: StateMachine::new(),
                progress: ProgressCounter::new(prefetch),
                remote_url: None,
                local_path,
                error: None,
                events: Some(tx),
            }),
        });
        (task, rx)
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    pub fn kind(&self) -> TaskKind {
        self.params.kind
    }

    pub fn status(&self) -> TaskStatus {
        self.read(|s| s.machine.status())
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let req = &self.params.request;
        self.read(|s| TaskSnapshot {
            handle: self.handle,
            kind: self.params.kind,
            status: s.machine.status(),
            repo_id: req.repo_id.clone(),
            path: req.path.clone(),
            file_name: req.file_name.clone(),
            revision: req.revision.clone(),
            remote_url: s.remote_url.as_ref().map(Url::to_string),
            local_path: s.local_path.clone(),
            processed_bytes: s.progress.processed(),
            total_bytes: s.progress.total(),
            auto_redirect_pending: s.progress.auto_redirect_pending(),
            error: s.error,
        })
    }

    /// Requests cancellation.
    ///
    /// Returns `false` when the task already terminated; no event is
    /// emitted in that case. Otherwise the task ends with
    /// `Aborted { error: NoError }` once the driver observes the request.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        if state.machine.apply(Transition::CancelRequested).is_err() {
            return false;
        }
        debug!(handle = %self.handle, "cancel requested");
        self.cancel.cancel();
        true
    }

    /// Terminates a task whose worker context went away before it ran.
    pub fn mark_worker_lost(&self) {
        let mut state = self.lock();
        if state.machine.apply(Transition::WorkerLost).is_ok() {
            warn!(handle = %self.handle, "worker context unavailable");
            state.error = Some(TaskErrorKind::Unknown);
            state.emit(TaskEvent::Aborted {
                error: TaskErrorKind::Unknown,
                reason: "worker context unavailable".into(),
            });
        }
    }

    /// Drives the task to `Finished` or `Aborted`.
    pub async fn run(self: Arc<Self>) {
        info!(
            handle = %self.handle,
            kind = ?self.params.kind,
            repo = %self.params.request.repo_id,
            file = %self.params.request.file_name,
            "task started"
        );

        let outcome = match self.params.kind {
            TaskKind::Download => self.download().await,
            TaskKind::Upload => self.upload().await,
        };

        match outcome {
            Ok(path) => self.finish(path),
            Err(e) => self.abort(e),
        }
    }

    async fn download(&self) -> Result<PathBuf, TransferError> {
        let mut url = self.start_url(endpoints::download_url)?;
        let mut tracker = RedirectTracker::new(self.options.max_redirects, &url);
        if self.params.request.resolved_url.is_none() {
            url = self.resolve(url, &mut tracker).await?;
        }

        let mut target = self
            .cancellable(
                self.allocator
                    .allocate(&self.params.local_path, &self.params.request.file_name),
            )
            .await??;
        self.local_ready(target.path(), None)?;

        let token = &self.params.request.auth_token;
        loop {
            let resp = self
                .cancellable(self.client.get(url.clone(), token).send())
                .await??;

            if let Some(next) = redirect_target(&resp, &url) {
                let next = next?;
                self.advance(Transition::RedirectReceived)?;
                tracker.follow(&next)?;
                let file = target.file()?;
                file.set_len(0).await?;
                file.seek(SeekFrom::Start(0)).await?;
                self.accept_redirect(&next, None)?;
                url = next;
                continue;
            }

            let status = resp.status();
            if !status.is_success() {
                return Err(TransferError::Status {
                    status: status.as_u16(),
                });
            }
            self.set_total(resp.content_length());

            let file = target.file()?;
            let mut body = resp.bytes_stream();
            loop {
                let chunk = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                    chunk = body.next() => chunk,
                };
                let Some(chunk) = chunk else { break };
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                self.record_progress(chunk.len() as u64);
            }
            file.flush().await?;
            break;
        }

        self.complete()?;
        Ok(target.keep())
    }

    async fn upload(self: &Arc<Self>) -> Result<PathBuf, TransferError> {
        let mut url = self.start_url(endpoints::upload_link_url)?;
        let mut tracker = RedirectTracker::new(self.options.max_redirects, &url);
        if self.params.request.resolved_url.is_none() {
            url = self.resolve(url, &mut tracker).await?;
        }

        let (source, len) = self
            .cancellable(self.allocator.validate_source(&self.params.local_path))
            .await??;
        self.local_ready(&source, Some(len))?;

        let token = &self.params.request.auth_token;
        loop {
            let form = self.upload_form(&source, len).await?;
            let resp = self
                .cancellable(self.client.post(url.clone(), token).multipart(form).send())
                .await??;

            if let Some(next) = redirect_target(&resp, &url) {
                let next = next?;
                self.advance(Transition::RedirectReceived)?;
                tracker.follow(&next)?;
                self.accept_redirect(&next, Some(len))?;
                url = next;
                continue;
            }

            let status = resp.status();
            let reply = self.cancellable(resp.bytes()).await??;
            if !status.is_success() {
                let body = String::from_utf8_lossy(&reply);
                debug!(handle = %self.handle, %body, "upload rejected");
                return Err(TransferError::Status {
                    status: status.as_u16(),
                });
            }
            break;
        }

        self.complete()?;
        Ok(source)
    }

    /// Multipart body with a single part named after the file; the source
    /// is reopened for every attempt.
    async fn upload_form(
        self: &Arc<Self>,
        source: &Path,
        len: u64,
    ) -> Result<Form, TransferError> {
        let file = tokio::fs::File::open(source).await?;
        let task = Arc::clone(self);
        let stream = ReaderStream::new(file)
            .inspect_ok(move |chunk| task.record_progress(chunk.len() as u64));
        let part = Part::stream_with_length(reqwest::Body::wrap_stream(stream), len)
            .mime_str("application/octet-stream")?;
        Ok(Form::new()
            .percent_encode_noop()
            .part(endpoints::part_name(&self.params.request.file_name), part))
    }

    /// Initial URL, entering `Prefetching` or, for pre-resolved requests,
    /// `Prefetched`.
    fn start_url(
        &self,
        endpoint: fn(&Url, &TransferRequest) -> Result<Url, seaclient_api::ApiError>,
    ) -> Result<Url, TransferError> {
        let resolved = self.params.request.resolved_url.clone();
        let prefetch = resolved.is_none();
        let url = match resolved {
            Some(url) => url,
            None => endpoint(self.client.base_url(), &self.params.request)?,
        };

        let mut state = self.lock();
        state.machine.apply(Transition::Run { prefetch })?;
        state.remote_url = Some(url.clone());
        debug!(handle = %self.handle, %url, status = ?state.machine.status(), "run");
        Ok(url)
    }

    /// Prefetch loop: follows HTTP redirects until a body names the
    /// transfer URL.
    async fn resolve(
        &self,
        start: Url,
        tracker: &mut RedirectTracker,
    ) -> Result<Url, TransferError> {
        let resolver = RedirectResolver::new(&self.client);
        let token = &self.params.request.auth_token;
        let mut url = start;
        loop {
            match self.cancellable(resolver.prefetch(&url, token)).await?? {
                Prefetch::Redirect(next) => {
                    self.advance(Transition::RedirectReceived)?;
                    tracker.follow(&next)?;
                    self.accept_redirect(&next, None)?;
                    url = next;
                }
                Prefetch::Resolved(target) => {
                    tracker.visit(&target)?;
                    let mut state = self.lock();
                    state.machine.apply(Transition::PrefetchResolved)?;
                    state.progress.confirm_url();
                    state.remote_url = Some(target.clone());
                    debug!(handle = %self.handle, url = %target, "prefetch resolved");
                    return Ok(target);
                }
            }
        }
    }

    async fn cancellable<F, T>(&self, fut: F) -> Result<T, TransferError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            out = fut => Ok(out),
        }
    }

    fn advance(&self, transition: Transition) -> Result<TaskStatus, TransferError> {
        let mut state = self.lock();
        let status = state.machine.apply(transition)?;
        debug!(handle = %self.handle, ?transition, ?status, "transition");
        Ok(status)
    }

    fn local_ready(&self, path: &Path, total: Option<u64>) -> Result<(), TransferError> {
        let mut state = self.lock();
        state.machine.apply(Transition::LocalReady)?;
        state.local_path = Some(path.to_path_buf());
        state.progress.set_total(total);
        state.emit(TaskEvent::Started);
        debug!(handle = %self.handle, path = %path.display(), "local side ready");
        Ok(())
    }

    /// Completes a redirect: new attempt, counters reset.
    fn accept_redirect(&self, next: &Url, total: Option<u64>) -> Result<(), TransferError> {
        let mut state = self.lock();
        let status = state.machine.apply(Transition::RedirectAccepted)?;
        state.progress.restart();
        state.progress.set_total(total);
        state.remote_url = Some(next.clone());
        state.emit(TaskEvent::Redirected {
            url: next.to_string(),
        });
        debug!(handle = %self.handle, url = %next, ?status, "redirected");
        Ok(())
    }

    fn set_total(&self, total: Option<u64>) {
        self.lock().progress.set_total(total);
    }

    fn record_progress(&self, bytes: u64) {
        let mut state = self.lock();
        if state.machine.status() != TaskStatus::Processing {
            return;
        }
        state.progress.advance(bytes);
        if state.progress.reporting() {
            let event = TaskEvent::Progress {
                processed: state.progress.processed(),
                total: state.progress.total(),
            };
            state.emit(event);
        }
    }

    /// Marks success. When the size was unknown, a last progress event
    /// carries the final total.
    fn complete(&self) -> Result<(), TransferError> {
        let mut state = self.lock();
        state.machine.apply(Transition::TransferComplete)?;
        if state.progress.complete() && state.progress.reporting() {
            let event = TaskEvent::Progress {
                processed: state.progress.processed(),
                total: state.progress.total(),
            };
            state.emit(event);
        }
        Ok(())
    }

    fn finish(&self, path: PathBuf) {
        let mut state = self.lock();
        info!(
            handle = %self.handle,
            path = %path.display(),
            bytes = state.progress.processed(),
            "task finished"
        );
        state.local_path = Some(path.clone());
        state.emit(TaskEvent::Finished { local_path: path });
    }

    fn abort(&self, err: TransferError) {
        let mut state = self.lock();
        let error = if state.machine.status() == TaskStatus::Canceling {
            TaskErrorKind::NoError
        } else {
            err.kind()
        };
        if state.machine.apply(Transition::Fail).is_err() {
            return;
        }
        state.error = Some(error);

        if error == TaskErrorKind::NoError {
            info!(handle = %self.handle, "task canceled");
        } else {
            warn!(handle = %self.handle, error = %err, kind = ?error, "task aborted");
        }
        let reason = match error {
            TaskErrorKind::NoError => "canceled".to_string(),
            _ => err.to_string(),
        };
        state.emit(TaskEvent::Aborted { error, reason });
    }

    fn lock(&self) -> RwLockWriteGuard<'_, TaskState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, f: impl FnOnce(&TaskState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}
