use crate::error::RegistryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io::Write, path::{Path, PathBuf}, time::Duration};
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus { Processing, Downloading, Rendering, Completed, Error }

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Downloading => "downloading",
            JobStatus::Rendering => "rendering",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    fn stage(self) -> u8 {
        match self {
            JobStatus::Processing => 0,
            JobStatus::Downloading => 1,
            JobStatus::Rendering => 2,
            JobStatus::Completed | JobStatus::Error => 3,
        }
    }

    /// Whether a job in `self` may be moved to `next`. Re-entering the same
    /// non-terminal stage is allowed so progress and message can change.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.stage() >= self.stage()
    }
}

/// Present only on completed jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub video_url: String,
    pub duration: f64,
    pub audio_replaced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_id: String) -> Self {
        Self {
            job_id,
            status: JobStatus::Processing,
            progress: 0,
            message: "Job queued".into(),
            result: None,
            created_at: Utc::now(),
        }
    }
}

/// The mutable part of a job, written by the task that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub result: Option<JobResult>,
}

impl JobState {
    pub fn stage(status: JobStatus, progress: u8, message: impl Into<String>) -> Self {
        Self { status, progress, message: message.into(), result: None }
    }

    pub fn completed(result: JobResult) -> Self {
        Self { status: JobStatus::Completed, progress: 100, message: "Reel ready".into(), result: Some(result) }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { status: JobStatus::Error, progress: 0, message: message.into(), result: None }
    }
}

/// Short opaque job token: 64 random bits as lowercase hex.
pub fn new_job_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Process-wide job table, mirrored to a snapshot file after every mutation.
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
    snapshot: Option<PathBuf>,
    retention: chrono::Duration,
    // Orders snapshot writes so an older map never lands after a newer one.
    persist_lock: Mutex<()>,
}

impl JobRegistry {
    /// Registry without a snapshot file.
    pub fn in_memory(retention: Duration) -> Self {
        Self::with_jobs(HashMap::new(), None, retention)
    }

    fn with_jobs(jobs: HashMap<String, Job>, snapshot: Option<PathBuf>, retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(jobs),
            snapshot,
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
            persist_lock: Mutex::new(()),
        }
    }

    /// Load the registry from `path`. A missing file yields an empty registry and an
    /// unreadable one is logged and discarded. Jobs caught mid-pipeline by the restart
    /// are marked as errors since nothing will finish them.
    pub async fn restore(path: PathBuf, retention: Duration) -> Self {
        let mut jobs: HashMap<String, Job> = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "job snapshot is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "job snapshot unreadable, starting empty");
                HashMap::new()
            }
        };

        let mut interrupted = 0usize;
        for job in jobs.values_mut().filter(|j| !j.status.is_terminal()) {
            job.status = JobStatus::Error;
            job.progress = 0;
            job.message = "Job interrupted by service restart".into();
            interrupted += 1;
        }
        info!(restored = jobs.len(), interrupted, "job registry restored");

        let registry = Self::with_jobs(jobs, Some(path), retention);
        if interrupted > 0 {
            registry.persist_logged().await;
        }
        registry
    }

    pub async fn create(&self, job: Job) -> Result<(), RegistryError> {
        {
            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&job.job_id) {
                return Err(RegistryError::Duplicate(job.job_id));
            }
            debug!(job_id = %job.job_id, "job created");
            jobs.insert(job.job_id.clone(), job);
        }
        self.persist_logged().await;
        Ok(())
    }

    /// Overwrite a job's mutable fields. Terminal jobs and backward moves are rejected.
    pub async fn update(&self, id: &str, state: JobState) -> Result<Job, RegistryError> {
        let updated = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            if !job.status.can_advance_to(state.status) {
                return Err(RegistryError::InvalidTransition {
                    id: id.to_string(),
                    from: job.status.as_str(),
                    to: state.status.as_str(),
                });
            }
            job.progress = match state.status {
                JobStatus::Error => state.progress,
                _ => state.progress.max(job.progress).min(100),
            };
            job.status = state.status;
            job.message = state.message;
            job.result = state.result;
            job.clone()
        };
        self.persist_logged().await;
        Ok(updated)
    }

    pub async fn get(&self, id: &str) -> Result<Job, RegistryError> {
        self.jobs.read().await.get(id).cloned().ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Drop every job created more than the retention window before `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let Some(horizon) = now.checked_sub_signed(self.retention) else { return 0 };
        let removed = {
            let mut jobs = self.jobs.write().await;
            let before = jobs.len();
            jobs.retain(|_, job| job.created_at >= horizon);
            before - jobs.len()
        };
        if removed > 0 {
            info!(removed, "expired jobs swept");
            self.persist_logged().await;
        }
        removed
    }

    /// Jobs that have not reached a terminal state.
    pub async fn active_count(&self) -> usize {
        self.jobs.read().await.values().filter(|j| !j.status.is_terminal()).count()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Write the whole table to the snapshot file through a temporary sibling that
    /// atomically replaces it.
    pub async fn persist(&self) -> Result<(), RegistryError> {
        let Some(path) = self.snapshot.clone() else { return Ok(()) };
        let _order = self.persist_lock.lock().await;
        let encoded = {
            let jobs = self.jobs.read().await;
            serde_json::to_vec(&*jobs)?
        };
        tokio::task::spawn_blocking(move || write_replacing(&path, &encoded))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist job registry");
        }
    }
}

fn write_replacing(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
