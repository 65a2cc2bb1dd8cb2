//! Transfer registry.
//!
//! Owns every task created through it, indexed by handle, and one worker
//! thread running a current-thread tokio runtime on which all tasks execute.
//! Callers never block on transfer work: creating a task only queues it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use seaclient_api::{ApiClient, TransferRequest, Url};
use seaclient_transfer::{
    TaskEvent, TaskHandle, TaskSnapshot, TaskParams, TransferOptions, TransferTask,
};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::RegistryError;

/// How long shutdown waits for canceled tasks to wind down.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct TaskEntry {
    task: Arc<TransferTask>,
    events: Option<mpsc::UnboundedReceiver<TaskEvent>>,
}

/// Handle-indexed collection of transfer tasks plus their worker.
pub struct TransferRegistry {
    client: Arc<ApiClient>,
    options: TransferOptions,
    download_dir: PathBuf,
    tasks: Mutex<Vec<TaskEntry>>,
    commands: Option<mpsc::UnboundedSender<Arc<TransferTask>>>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for TransferRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRegistry")
            .field("download_dir", &self.download_dir)
            .field("tasks", &self.len())
            .finish()
    }
}

impl TransferRegistry {
    /// Starts the worker thread.
    pub fn new(
        client: ApiClient,
        download_dir: impl Into<PathBuf>,
        options: TransferOptions,
    ) -> Result<Self, RegistryError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (commands, queue) = mpsc::unbounded_channel();
        let worker = std::thread::Builder::new()
            .name("seaclient-transfer".into())
            .spawn(move || runtime.block_on(worker_loop(queue)))?;

        Ok(Self {
            client: Arc::new(client),
            options,
            download_dir: download_dir.into(),
            tasks: Mutex::new(Vec::new()),
            commands: Some(commands),
            worker: Some(worker),
        })
    }

    /// Builds the API client and registry from a loaded configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self, RegistryError> {
        let client = ApiClient::new(&config.client_options())?;
        Self::new(client, &config.download_dir, config.transfer_options())
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Downloads `path/file_name` of a repository into the download directory.
    pub fn create_download_task(
        &self,
        repo_id: &str,
        path: &str,
        file_name: &str,
    ) -> TaskHandle {
        let request = self.client.transfer_request(repo_id, path, file_name);
        self.add(TaskParams::download(request, &self.download_dir))
    }

    /// Like [`create_download_task`](Self::create_download_task), pinned to a
    /// commit.
    pub fn create_download_task_at_revision(
        &self,
        repo_id: &str,
        path: &str,
        file_name: &str,
        revision: &str,
    ) -> TaskHandle {
        let request = self
            .client
            .transfer_request(repo_id, path, file_name)
            .with_revision(revision);
        self.add(TaskParams::download(request, &self.download_dir))
    }

    /// Downloads from a URL that needs no prefetch.
    pub fn create_direct_download_task(&self, url: Url, file_name: &str) -> TaskHandle {
        let request = TransferRequest::new("", "/", file_name, self.client.token())
            .with_resolved_url(url);
        self.add(TaskParams::download(request, &self.download_dir))
    }

    /// Uploads `source` into `path` of a repository as `file_name`.
    ///
    /// The source is checked here so obvious mistakes fail without creating
    /// a task; the task checks again when it runs.
    pub fn create_upload_task(
        &self,
        repo_id: &str,
        path: &str,
        file_name: &str,
        source: &Path,
    ) -> Result<TaskHandle, RegistryError> {
        if !source.is_file() {
            return Err(RegistryError::SourceMissing(source.to_path_buf()));
        }
        let request = self.client.transfer_request(repo_id, path, file_name);
        Ok(self.add(TaskParams::upload(request, source)))
    }

    /// Snapshot of a task.
    pub fn get_task(&self, handle: TaskHandle) -> Result<TaskSnapshot, RegistryError> {
        self.task(handle).map(|task| task.snapshot())
    }

    /// Shared reference to a task.
    pub fn task(&self, handle: TaskHandle) -> Result<Arc<TransferTask>, RegistryError> {
        self.lock()
            .get(handle.0)
            .map(|entry| Arc::clone(&entry.task))
            .ok_or(RegistryError::UnknownHandle(handle))
    }

    /// Takes the task's event receiver. Returns `None` if already taken.
    pub fn take_events(
        &self,
        handle: TaskHandle,
    ) -> Result<Option<mpsc::UnboundedReceiver<TaskEvent>>, RegistryError> {
        self.lock()
            .get_mut(handle.0)
            .map(|entry| entry.events.take())
            .ok_or(RegistryError::UnknownHandle(handle))
    }

    /// Requests cancellation. `Ok(false)` if the task had already ended.
    pub fn cancel(&self, handle: TaskHandle) -> Result<bool, RegistryError> {
        self.task(handle).map(|task| task.cancel())
    }

    /// Snapshots of all tasks, in handle order.
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.lock().iter().map(|entry| entry.task.snapshot()).collect()
    }

    /// Number of tasks created so far. Tasks are kept until the registry is
    /// dropped, so this only grows.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&self, params: TaskParams) -> TaskHandle {
        let task = {
            let mut tasks = self.lock();
            let handle = TaskHandle(tasks.len());
            let (task, events) =
                TransferTask::new(handle, params, Arc::clone(&self.client), self.options);
            tasks.push(TaskEntry {
                task: Arc::clone(&task),
                events: Some(events),
            });
            task
        };

        let handle = task.handle();
        debug!(%handle, kind = ?task.kind(), "task created");
        let queued = self
            .commands
            .as_ref()
            .is_some_and(|tx| tx.send(Arc::clone(&task)).is_ok());
        if !queued {
            task.mark_worker_lost();
        }
        handle
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TransferRegistry {
    fn drop(&mut self) {
        let live = self
            .lock()
            .iter()
            .filter(|entry| entry.task.cancel())
            .count();
        if live > 0 {
            info!(live, "canceling in-flight transfers");
        }

        // Closing the queue lets the worker drain and exit.
        self.commands.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("transfer worker panicked");
            }
        }
    }
}

async fn worker_loop(mut queue: mpsc::UnboundedReceiver<Arc<TransferTask>>) {
    let tracker = TaskTracker::new();
    while let Some(task) = queue.recv().await {
        tracker.spawn(task.run());
    }

    tracker.close();
    if tokio::time::timeout(DRAIN_TIMEOUT, tracker.wait())
        .await
        .is_err()
    {
        warn!(remaining = tracker.len(), "transfer tasks still running at shutdown");
    }
    debug!("transfer worker stopped");
}
