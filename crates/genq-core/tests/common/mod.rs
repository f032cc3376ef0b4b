//! Shared fixtures for scheduler integration tests: a scripted provider, an
//! artifact store that can be told to fail, and instance construction over a
//! temp state database.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tokio::sync::watch;

use genq_core::artifact::{ArtifactPage, ArtifactRef, ArtifactStore, PersistError};
use genq_core::config::{ProviderEndpoint, ProviderEntry, ProvidersConfig, QueueConfig};
use genq_core::job::{ImageParams, Job, JobPayload, JobStatus};
use genq_core::provider::{
    GenerationProvider, PollReport, ProviderError, ProviderSet, Submitted,
};
use genq_core::scheduler::{SchedulerContext, SchedulerParts};
use genq_core::state_db::StateDb;
use genq_core::store::JobStore;
use genq_core::sync::SyncHub;

pub const PROVIDER_ID: &str = "mock";

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Provider double. Submissions hand out `T1`, `T2`, ... and can be held
/// or made to fail. Polls replay a per-task script, then report Pending.
pub struct MockProvider {
    gate: watch::Sender<bool>,
    submit_error: Mutex<Option<String>>,
    submits: AtomicUsize,
    polls: Mutex<HashMap<String, usize>>,
    scripts: Mutex<HashMap<String, VecDeque<Result<PollReport, String>>>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            gate,
            submit_error: Mutex::new(None),
            submits: AtomicUsize::new(0),
            polls: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
        })
    }

    pub fn hold_submissions(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_submissions(&self) {
        self.gate.send_replace(true);
    }

    pub fn fail_submissions(&self, message: &str) {
        *self.submit_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn script(&self, task_id: &str, steps: Vec<Result<PollReport, String>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self, task_id: &str) -> usize {
        self.polls.lock().unwrap().get(task_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    async fn submit(
        &self,
        _endpoint: &ProviderEndpoint,
        _payload: &JobPayload,
    ) -> Result<Submitted, ProviderError> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = self.submit_error.lock().unwrap().clone() {
            return Err(ProviderError::Rejected(message));
        }
        Ok(Submitted {
            task_id: format!("T{n}"),
            progress: None,
        })
    }

    async fn poll(
        &self,
        _endpoint: &ProviderEndpoint,
        task_id: &str,
    ) -> Result<PollReport, ProviderError> {
        *self
            .polls
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default() += 1;
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(task_id)
            .and_then(|q| q.pop_front());
        match step {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(ProviderError::InvalidResponse(message)),
            None => Ok(PollReport::pending(None)),
        }
    }
}

/// Artifact store double: records what it persisted, fails on demand and
/// can be held so a persist call stays in flight.
#[derive(Default)]
pub struct MockArtifacts {
    pub fail: AtomicBool,
    pub hold: AtomicBool,
    pub started: AtomicUsize,
    pub persisted: Mutex<Vec<ArtifactRef>>,
}

#[async_trait]
impl ArtifactStore for MockArtifacts {
    async fn persist(&self, refs: &[ArtifactRef]) -> Result<Vec<String>, PersistError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        while self.hold.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PersistError::UnsupportedSource("bucket unavailable".to_string()));
        }
        self.persisted.lock().unwrap().extend(refs.iter().cloned());
        Ok(refs
            .iter()
            .map(|r| format!("saved://{}", r.source_url))
            .collect())
    }

    async fn list(
        &self,
        _prefix: &str,
        _page_size: usize,
        _cursor: Option<&str>,
    ) -> Result<ArtifactPage, PersistError> {
        Ok(ArtifactPage::default())
    }

    async fn delete(&self, _key: &str) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Queue settings for tests: per-job polling far in the future so tests
/// step polls by hand with `poll_job_once`.
pub fn settings(image: usize, video: usize) -> QueueConfig {
    QueueConfig {
        image_concurrency: image,
        video_concurrency: video,
        poll_interval_ms: 3_600_000,
        ..QueueConfig::default()
    }
}

pub fn providers_config(api_key: &str) -> ProvidersConfig {
    ProvidersConfig {
        providers: vec![ProviderEntry {
            id: PROVIDER_ID.to_string(),
            name: "Mock".to_string(),
            base_url: "http://mock.invalid".to_string(),
            api_key: api_key.to_string(),
        }],
        selected: Some(PROVIDER_ID.to_string()),
    }
}

/// One shared "origin": state database, hub and adapter doubles.
pub struct World {
    pub db: StateDb,
    pub hub: SyncHub,
    pub provider: Arc<MockProvider>,
    pub artifacts: Arc<MockArtifacts>,
    _dir: TempDir,
}

impl World {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = StateDb::open_at(dir.path().join("state.db")).await.unwrap();
        Self {
            db,
            hub: SyncHub::default(),
            provider: MockProvider::new(),
            artifacts: Arc::new(MockArtifacts::default()),
            _dir: dir,
        }
    }

    pub fn store(&self) -> JobStore {
        JobStore::new(self.db.clone())
    }

    pub async fn seed(&self, jobs: &[Job]) {
        self.store().save_all(jobs).await.unwrap();
    }

    pub fn instance_with(&self, settings: QueueConfig, api_key: &str) -> Arc<SchedulerContext> {
        self.instance_on(self.hub.clone(), settings, api_key)
    }

    /// An instance with a hub of its own, like a scheduler in another
    /// process: it shares only the state database with the others.
    pub fn instance_isolated(&self, settings: QueueConfig) -> Arc<SchedulerContext> {
        self.instance_on(SyncHub::default(), settings, "k")
    }

    fn instance_on(
        &self,
        hub: SyncHub,
        settings: QueueConfig,
        api_key: &str,
    ) -> Arc<SchedulerContext> {
        let provider: Arc<dyn GenerationProvider> = self.provider.clone();
        SchedulerContext::new(SchedulerParts {
            db: self.db.clone(),
            hub,
            settings,
            providers_config: providers_config(api_key),
            providers: ProviderSet {
                image: provider.clone(),
                video: provider,
            },
            artifacts: self.artifacts.clone(),
        })
    }

    /// A started instance with the given capacities.
    pub async fn start(&self, image: usize, video: usize) -> Arc<SchedulerContext> {
        let ctx = self.instance_with(settings(image, video), "k");
        ctx.start().await;
        ctx
    }
}

pub fn image_params(prompt: &str) -> ImageParams {
    ImageParams {
        prompt: prompt.to_string(),
        ..ImageParams::default()
    }
}

/// A job that already has a remote task, as a previous leader left it.
pub fn processing_job(task_id: &str, timeout_at: i64) -> Job {
    let mut job = Job::new(
        JobPayload::image(image_params(task_id)),
        Some(PROVIDER_ID.to_string()),
        now_ms(),
        600_000,
    );
    job.status = JobStatus::Processing;
    job.task_id = Some(task_id.to_string());
    job.progress = 10;
    job.timeout_at = timeout_at;
    job
}

pub fn count(jobs: &[Job], status: JobStatus) -> usize {
    jobs.iter().filter(|j| j.status == status).count()
}

/// Wait up to five seconds for `check` to hold.
pub async fn eventually<F: FnMut() -> bool>(what: &str, mut check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
