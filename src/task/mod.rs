//! Job-coordinator integration.
//!
//! A coordinator hands the factory an opaque parameter map, gets back a
//! [`Task`], and later calls [`Task::run`] with a cancellation token, a task
//! ID and a result sink. Parameters are parsed into [`TaskParams`] and the
//! resulting [`RunConfig`] is validated once, at the factory boundary.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::adapters::{HttpUploader, UploadError, Uploader};
use crate::core::supervisor::{run_supervised, RunError};
use crate::core::terminator::ProcessTerminator;
use crate::domain::{RunConfig, ValidationError};

/// Result-value key carrying the retrieval URL of the uploaded archive
pub const RESULT_ZIP_URL: &str = "ZipURL";

/// Errors from building or running a task
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Invalid task parameters: {0}")]
    InvalidParams(#[source] serde_json::Error),

    #[error("Invalid task ID '{0}': must be a plain file name")]
    InvalidTaskId(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to create task work directory: {0}")]
    WorkDir(#[source] std::io::Error),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Recognised keys of a coordinator parameter map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskParams {
    /// Upload base URL for this run, overriding the factory default
    #[serde(default, alias = "LogFileServer")]
    pub log_file_server: Option<String>,

    /// Extra arguments for the target executable
    #[serde(default, alias = "Args")]
    pub args: Vec<String>,
}

impl TaskParams {
    pub fn from_map(params: &Map<String, Value>) -> Result<Self, TaskError> {
        serde_json::from_value(Value::Object(params.clone())).map_err(TaskError::InvalidParams)
    }
}

/// The one record a task writes to its result sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: String,
    pub success: bool,
    /// Present on success only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_values: Option<Map<String, Value>>,
}

impl TaskResult {
    pub fn succeeded(id: impl Into<String>, zip_url: impl Into<String>) -> Self {
        let mut values = Map::new();
        values.insert(RESULT_ZIP_URL.to_string(), Value::String(zip_url.into()));
        Self {
            id: id.into(),
            success: true,
            result_values: Some(values),
        }
    }

    pub fn failed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            result_values: None,
        }
    }

    /// Retrieval URL, if the run succeeded
    pub fn zip_url(&self) -> Option<&str> {
        self.result_values.as_ref()?.get(RESULT_ZIP_URL)?.as_str()
    }
}

/// A unit of work the coordinator can run once
#[async_trait]
pub trait Task: Send {
    /// Run to completion and write exactly one [`TaskResult`] to `results`
    async fn run(
        self: Box<Self>,
        cancel: CancellationToken,
        task_id: String,
        results: mpsc::Sender<TaskResult>,
    );
}

/// Builds tasks from coordinator parameter maps
pub trait TaskFactory: Send + Sync {
    fn new_task(&self, params: &Map<String, Value>) -> Result<Box<dyn Task>, TaskError>;
}

/// Output layout overrides applied to every run a factory creates
#[derive(Debug, Clone, Default)]
pub struct RunLayout {
    pub output_root: Option<PathBuf>,
    pub log_file_name: Option<String>,
    /// Tracked directories plus the one holding the log
    pub tracked_dirs: Option<(Vec<String>, String)>,
}

impl RunLayout {
    fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(root) = &self.output_root {
            config = config.with_output_root(root);
        }
        if let Some(name) = &self.log_file_name {
            config = config.with_log_file_name(name);
        }
        if let Some((dirs, log_dir)) = &self.tracked_dirs {
            config = config.with_tracked_dirs(dirs.clone(), log_dir);
        }
        config
    }
}

/// Factory for supervised runs of one executable
pub struct SupervisedRunFactory {
    executable: PathBuf,
    timeout: Duration,
    layout: RunLayout,
    uploader: HttpUploader,
    retain_failed_uploads: Option<PathBuf>,
    terminator: Arc<dyn ProcessTerminator>,
}

impl SupervisedRunFactory {
    /// Fails if the executable or timeout is unusable
    pub fn new(
        executable: impl Into<PathBuf>,
        timeout: Duration,
        uploader: HttpUploader,
        terminator: Arc<dyn ProcessTerminator>,
    ) -> Result<Self, TaskError> {
        let factory = Self {
            executable: executable.into(),
            timeout,
            layout: RunLayout::default(),
            uploader,
            retain_failed_uploads: None,
            terminator,
        };
        factory.run_config(Vec::new()).validate()?;
        Ok(factory)
    }

    pub fn with_layout(mut self, layout: RunLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Keep archives whose upload failed in `dir` instead of discarding them
    pub fn retain_failed_uploads(mut self, dir: impl Into<PathBuf>) -> Self {
        self.retain_failed_uploads = Some(dir.into());
        self
    }

    fn run_config(&self, extra_args: Vec<String>) -> RunConfig {
        // The archive path is assigned per run, once the task ID is known
        let config = RunConfig::new(&self.executable, self.timeout, extra_args, PathBuf::new());
        self.layout.apply(config)
    }

    fn uploader_for(&self, params: &TaskParams) -> HttpUploader {
        match params.log_file_server.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => self.uploader.with_base_url(url),
            None => self.uploader.clone(),
        }
    }

    /// Typed variant of [`TaskFactory::new_task`]
    pub fn build(&self, params: TaskParams) -> Result<SupervisedRunTask, TaskError> {
        let uploader = self.uploader_for(&params);
        let config = self.run_config(params.args);
        config.validate()?;
        Ok(SupervisedRunTask {
            config,
            uploader: Arc::new(uploader),
            retain_failed_uploads: self.retain_failed_uploads.clone(),
            terminator: self.terminator.clone(),
        })
    }
}

impl TaskFactory for SupervisedRunFactory {
    fn new_task(&self, params: &Map<String, Value>) -> Result<Box<dyn Task>, TaskError> {
        let params = TaskParams::from_map(params)?;
        Ok(Box::new(self.build(params)?))
    }
}

/// One validated supervised run, ready to execute
pub struct SupervisedRunTask {
    config: RunConfig,
    uploader: Arc<dyn Uploader>,
    retain_failed_uploads: Option<PathBuf>,
    terminator: Arc<dyn ProcessTerminator>,
}

impl SupervisedRunTask {
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    async fn execute(&self, cancel: CancellationToken, task_id: &str) -> Result<String, TaskError> {
        if task_id.is_empty() || task_id.contains(['/', '\\']) || task_id == ".." {
            return Err(TaskError::InvalidTaskId(task_id.to_string()));
        }

        let workdir = TempDir::new().map_err(TaskError::WorkDir)?;
        let mut config = self.config.clone();
        config.archive_path = workdir.path().join(format!("{}.zip", task_id));

        let report = run_supervised(&config, cancel, self.terminator.clone()).await?;
        info!(
            outcome = %report.outcome,
            exit_code = ?report.exit_code,
            files = report.snapshot.copied.len(),
            "run finished"
        );

        match self.uploader.upload(&report.archive_path).await {
            Ok(url) => Ok(url),
            Err(e) => {
                if let Some(dir) = &self.retain_failed_uploads {
                    retain_archive(&report.archive_path, dir).await;
                }
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Task for SupervisedRunTask {
    async fn run(
        self: Box<Self>,
        cancel: CancellationToken,
        task_id: String,
        results: mpsc::Sender<TaskResult>,
    ) {
        let span = info_span!("task", task_id = %task_id);
        async move {
            info!(uploader = self.uploader.name(), "task started");
            let result = match self.execute(cancel, &task_id).await {
                Ok(url) => {
                    info!(url = %url, "task succeeded");
                    TaskResult::succeeded(&task_id, url)
                }
                Err(e) => {
                    error!(error = %e, "task failed");
                    TaskResult::failed(&task_id)
                }
            };
            if results.send(result).await.is_err() {
                warn!("result sink closed before the result was delivered");
            }
        }
        .instrument(span)
        .await
    }
}

/// Move an archive out of its temporary directory so a failed upload can be retried
async fn retain_archive(archive: &Path, dir: &Path) {
    let Some(name) = archive.file_name() else {
        return;
    };
    let destination = dir.join(name);

    let moved = async {
        tokio::fs::create_dir_all(dir).await?;
        if tokio::fs::rename(archive, &destination).await.is_err() {
            // Different filesystem
            tokio::fs::copy(archive, &destination).await?;
        }
        Ok::<_, std::io::Error>(())
    }
    .await;

    match moved {
        Ok(()) => warn!(path = %destination.display(), "upload failed; archive retained"),
        Err(e) => error!(path = %destination.display(), error = %e, "failed to retain archive"),
    }
}
