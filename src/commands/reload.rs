//! Hot reload coordination
//!
//! Polls the module source for edits and, when one is seen, rebuilds and
//! reloads the module on a background task. At most one reload runs at a
//! time: a change seen while busy is not queued, but stays unconsumed so the
//! first poll after the running reload finishes picks it up.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::task::JoinHandle;

use super::build::{BuildError, BuildStep};
use crate::audio::plugin::{LoadError, ModuleHandle, ModuleHost};

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("reload worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadState {
    Idle,
    Reloading,
}

impl ReloadState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ReloadState::Reloading,
            _ => ReloadState::Idle,
        }
    }
}

pub type ReloadTask = JoinHandle<Result<Arc<ModuleHandle>, ReloadError>>;

/// Result of one look at the watched file
#[derive(Debug)]
pub enum PollOutcome {
    Unchanged,
    /// The file changed and a reload was started
    Started(ReloadTask),
    /// The file changed but a reload is already running
    Busy,
    /// The file could not be stat'ed
    Missing,
}

/// Where the coordinator watches and what it loads
#[derive(Debug, Clone)]
pub struct ReloadSettings {
    /// File whose modification time triggers a reload
    pub watch_path: PathBuf,
    /// Binary handed to the loader
    pub binary_path: PathBuf,
    pub build: Option<BuildStep>,
    pub poll_interval: Duration,
}

pub struct ReloadCoordinator {
    host: Arc<ModuleHost>,
    settings: ReloadSettings,
    state: AtomicU8,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Returns the coordinator to Idle when the reload task ends, however it ends
struct IdleOnDrop<'a>(&'a ReloadCoordinator);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

impl ReloadCoordinator {
    pub fn new(host: Arc<ModuleHost>, settings: ReloadSettings) -> Self {
        Self {
            host,
            settings,
            state: AtomicU8::new(ReloadState::Idle as u8),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ReloadState {
        ReloadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn settings(&self) -> &ReloadSettings {
        &self.settings
    }

    /// Idle -> Reloading. Returns false if a reload is already running.
    pub fn try_begin(&self) -> bool {
        self.state
            .compare_exchange(
                ReloadState::Idle as u8,
                ReloadState::Reloading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Reloading -> Idle
    pub fn finish(&self) {
        self.state.store(ReloadState::Idle as u8, Ordering::Release);
    }

    /// Start a build + load on a background task if none is running.
    ///
    /// Returns `None` when the gate is closed. The task resets the state to
    /// Idle when it ends, whether the reload succeeded, failed or panicked.
    pub fn begin_reload(self: &Arc<Self>) -> Option<ReloadTask> {
        if !self.try_begin() {
            return None;
        }

        let coordinator = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _idle = IdleOnDrop(&coordinator);
            let result = coordinator.run_reload().await;
            match &result {
                Ok(handle) => {
                    coordinator.completed.fetch_add(1, Ordering::Relaxed);
                    log::info!("Reload complete (generation {})", handle.generation());
                }
                Err(e) => {
                    coordinator.failed.fetch_add(1, Ordering::Relaxed);
                    log::error!("Reload failed, previous module stays live: {}", e);
                }
            }
            result
        }))
    }

    /// Manually requested reload, through the same gate as file changes
    pub fn trigger(self: &Arc<Self>) -> Option<ReloadTask> {
        let task = self.begin_reload();
        if task.is_none() {
            log::info!("Reload already in progress, ignoring request");
        }
        task
    }

    async fn run_reload(&self) -> Result<Arc<ModuleHandle>, ReloadError> {
        if let Some(build) = &self.settings.build {
            build.run().await?;
        }

        let host = Arc::clone(&self.host);
        let path = self.settings.binary_path.clone();
        let handle = tokio::task::spawn_blocking(move || host.load(&path))
            .await
            .map_err(|e| ReloadError::Worker(e.to_string()))??;
        Ok(handle)
    }

    /// Modification time of the watched file
    pub fn current_mtime(&self) -> Option<SystemTime> {
        modified(&self.settings.watch_path)
    }

    /// Compare the watched file against `baseline` and start a reload if it
    /// changed. The baseline only advances when a reload actually starts.
    pub fn poll_once(self: &Arc<Self>, baseline: &mut Option<SystemTime>) -> PollOutcome {
        let Some(mtime) = self.current_mtime() else {
            return PollOutcome::Missing;
        };
        if *baseline == Some(mtime) {
            return PollOutcome::Unchanged;
        }

        match self.begin_reload() {
            Some(task) => {
                *baseline = Some(mtime);
                PollOutcome::Started(task)
            }
            None => PollOutcome::Busy,
        }
    }

    /// Poll forever. Abort the returned task to stop watching.
    pub fn watch(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut baseline = self.current_mtime();
            let mut ticker = tokio::time::interval(self.settings.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            log::info!(
                "Watching {:?} every {:?}",
                self.settings.watch_path,
                self.settings.poll_interval
            );

            let mut reported_missing = false;
            loop {
                ticker.tick().await;
                match self.poll_once(&mut baseline) {
                    PollOutcome::Started(_) => {
                        reported_missing = false;
                        log::info!("Change detected in {:?}, reloading", self.settings.watch_path);
                    }
                    PollOutcome::Busy => {
                        log::debug!("Change detected while a reload is running, deferring");
                    }
                    PollOutcome::Missing if !reported_missing => {
                        reported_missing = true;
                        log::warn!("Watched file {:?} is not accessible", self.settings.watch_path);
                    }
                    PollOutcome::Missing | PollOutcome::Unchanged => {}
                }
            }
        })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
