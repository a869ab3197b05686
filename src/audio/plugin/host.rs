//! Module loader
//!
//! `ModuleHost::load` turns a module binary into the live module:
//! shadow-copy, open, resolve, create, install, retire the previous one.
//! Any failure before the install leaves the live module untouched.

use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::abi::EntryPoints;
use super::module::{LoadError, ModuleHandle};
use super::slot::LiveModule;
use crate::audio::params::ParameterChannel;

/// Directory (under the system temp dir) holding shadow copies
const SCRATCH_DIR_NAME: &str = "hotdsp-modules";

/// Module state as shown to the control surface
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModuleStatus {
    /// Source of the live module, if any
    pub live: Option<String>,
    pub generation: Option<u64>,
    /// Last load failure; cleared by the next successful load
    pub last_error: Option<String>,
    pub loads: u64,
    pub failures: u64,
}

/// Where loaded binaries are opened from
#[derive(Debug, Clone)]
pub enum ShadowCopy {
    /// Open a private copy under this directory, so repeated loads of the
    /// same path never hit the dynamic loader's cache
    Directory(PathBuf),
    /// Open the given path directly
    Disabled,
}

impl ShadowCopy {
    /// `$TMPDIR/hotdsp-modules`
    pub fn temp_dir() -> Self {
        Self::Directory(std::env::temp_dir().join(SCRATCH_DIR_NAME))
    }
}

pub struct ModuleHost {
    live: Arc<LiveModule>,
    params: Arc<ParameterChannel>,
    shadow: ShadowCopy,
    next_generation: AtomicU64,
    status: RwLock<ModuleStatus>,
}

impl ModuleHost {
    pub fn new(live: Arc<LiveModule>, params: Arc<ParameterChannel>, shadow: ShadowCopy) -> Self {
        Self {
            live,
            params,
            shadow,
            next_generation: AtomicU64::new(1),
            status: RwLock::new(ModuleStatus::default()),
        }
    }

    pub fn live(&self) -> &Arc<LiveModule> {
        &self.live
    }

    pub fn params(&self) -> &Arc<ParameterChannel> {
        &self.params
    }

    pub fn status(&self) -> ModuleStatus {
        self.status.read().clone()
    }

    /// Load the module binary at `path` and make it live.
    ///
    /// The new instance is created before the previous one is touched; the
    /// previous one is destroyed and its library closed only after the new
    /// handle is installed and the audio thread has let go of the old one.
    pub fn load(&self, path: &Path) -> Result<Arc<ModuleHandle>, LoadError> {
        log::info!("Loading module from: {:?}", path);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        let opened = self.shadow_copy(path).and_then(|(open_path, copy)| {
            ModuleHandle::open(&open_path, path, copy, Arc::clone(&self.params), generation)
        });

        match opened {
            Ok(handle) => Ok(self.install(handle)),
            Err(e) => {
                log::error!("Module load failed, keeping previous module: {}", e);
                let mut status = self.status.write();
                status.last_error = Some(e.to_string());
                status.failures += 1;
                Err(e)
            }
        }
    }

    /// Make in-process entry points the live module
    pub fn load_builtin(
        &self,
        name: &str,
        entry: EntryPoints,
    ) -> Result<Arc<ModuleHandle>, LoadError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let handle = ModuleHandle::from_entry_points(
            entry,
            Arc::clone(&self.params),
            Path::new(name),
            generation,
        )?;
        Ok(self.install(handle))
    }

    fn install(&self, handle: ModuleHandle) -> Arc<ModuleHandle> {
        let handle = Arc::new(handle);
        let previous = self.live.install(Arc::clone(&handle));

        {
            let mut status = self.status.write();
            status.live = Some(handle.source().display().to_string());
            status.generation = Some(handle.generation());
            status.last_error = None;
            status.loads += 1;
        }

        if let Some(previous) = previous {
            LiveModule::retire(previous);
        }

        log::info!(
            "Module reloaded: {:?} (generation {})",
            handle.source(),
            handle.generation()
        );
        handle
    }

    /// Retire the live module, leaving the slot empty
    pub fn unload(&self) {
        if let Some(previous) = self.live.take() {
            LiveModule::retire(previous);
        }
        let mut status = self.status.write();
        status.live = None;
        status.generation = None;
    }

    /// Copy the binary into the scratch directory under a unique name.
    /// Returns the path to open and the copy to delete later.
    fn shadow_copy(&self, path: &Path) -> Result<(PathBuf, Option<PathBuf>), LoadError> {
        let dir = match &self.shadow {
            ShadowCopy::Disabled => return Ok((path.to_path_buf(), None)),
            ShadowCopy::Directory(dir) => dir,
        };

        let open_failed = |reason: String| LoadError::OpenFailed {
            path: path.to_path_buf(),
            reason,
        };

        let stem = path
            .file_stem()
            .ok_or_else(|| open_failed("invalid module path".to_string()))?
            .to_string_lossy();

        std::fs::create_dir_all(dir)
            .map_err(|e| open_failed(format!("failed to create scratch dir: {}", e)))?;

        let mut name = format!("{}-{}", stem, uuid::Uuid::new_v4().simple());
        if let Some(ext) = path.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        let copy = dir.join(name);

        log::debug!("Copying module to scratch: {:?} -> {:?}", path, copy);
        std::fs::copy(path, &copy).map_err(|e| open_failed(e.to_string()))?;

        Ok((copy.clone(), Some(copy)))
    }
}

/// Remove shadow copies left behind by previous runs
pub fn cleanup_scratch_dir(shadow: &ShadowCopy) {
    let ShadowCopy::Directory(dir) = shadow else {
        return;
    };
    if !dir.exists() {
        return;
    }

    log::info!("Cleaning up stale module copies in {:?}", dir);

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                if let Err(e) = std::fs::remove_file(&path) {
                    log::warn!("Failed to remove stale module copy {:?}: {}", path, e);
                }
            }
        }
    }
}
