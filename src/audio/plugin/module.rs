//! Loaded module handle
//!
//! Binds a library reference, the instance state it created and its entry
//! points into one value. The handle owns the state: `destroyPlugin` runs
//! exactly once, from `Drop`, and the library is closed only after it
//! returns.

use libloading::{Library, Symbol};
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::abi::{
    symbol_bytes, CreateFn, DestroyFn, EntryPoints, ProcessFn, CREATE_SYMBOL, DESTROY_SYMBOL,
    PROCESS_SYMBOL,
};
use crate::audio::params::ParameterChannel;

/// Why a module could not be loaded. The live module is never affected.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open module {}: {reason}", .path.display())]
    OpenFailed { path: PathBuf, reason: String },

    #[error("module {} does not export `{symbol}`", .path.display())]
    MissingSymbol { path: PathBuf, symbol: &'static str },

    #[error("module {} returned a null instance from `{symbol}`", .path.display())]
    NullInstance { path: PathBuf, symbol: &'static str },
}

/// A module instance ready to process audio
pub struct ModuleHandle {
    entry: EntryPoints,
    state: *mut c_void,
    /// Keeps the parameter block alive for as long as the module may read it
    _params: Arc<ParameterChannel>,
    source: PathBuf,
    generation: u64,
    /// `None` for in-process entry points
    library: Option<Library>,
    /// Shadow copy the library was opened from, removed after close
    shadow_copy: Option<PathBuf>,
}

// Safety: the state pointer is owned exclusively by this handle. The audio
// thread is the only caller of `process`, and `destroy` only runs from Drop,
// once every other reference to the handle is gone.
unsafe impl Send for ModuleHandle {}
unsafe impl Sync for ModuleHandle {}

impl ModuleHandle {
    /// Open a library, resolve its entry points and create an instance.
    ///
    /// `shadow_copy` is the file to delete once the library is closed, if
    /// `library_path` is a private copy of the module binary.
    pub(crate) fn open(
        library_path: &Path,
        source: &Path,
        shadow_copy: Option<PathBuf>,
        params: Arc<ParameterChannel>,
        generation: u64,
    ) -> Result<Self, LoadError> {
        let cleanup = |err: LoadError| {
            if let Some(copy) = &shadow_copy {
                let _ = std::fs::remove_file(copy);
            }
            err
        };

        // Safety: running a module's initialisers is the point of loading it
        let library = unsafe { Library::new(library_path) }.map_err(|e| {
            cleanup(LoadError::OpenFailed {
                path: source.to_path_buf(),
                reason: e.to_string(),
            })
        })?;

        let entry = match Self::resolve(&library, source) {
            Ok(entry) => entry,
            Err(e) => {
                drop(library);
                return Err(cleanup(e));
            }
        };

        let mut handle = match Self::from_entry_points(entry, params, source, generation) {
            Ok(handle) => handle,
            Err(e) => {
                drop(library);
                return Err(cleanup(e));
            }
        };
        handle.library = Some(library);
        handle.shadow_copy = shadow_copy;
        Ok(handle)
    }

    fn resolve(library: &Library, source: &Path) -> Result<EntryPoints, LoadError> {
        let missing = |symbol| LoadError::MissingSymbol {
            path: source.to_path_buf(),
            symbol,
        };

        // Safety: the signatures are the module ABI; the fn pointers are
        // only called while `library` is kept alive by the handle
        unsafe {
            let create: Symbol<CreateFn> = library
                .get(&symbol_bytes(CREATE_SYMBOL))
                .map_err(|_| missing(CREATE_SYMBOL))?;
            let destroy: Symbol<DestroyFn> = library
                .get(&symbol_bytes(DESTROY_SYMBOL))
                .map_err(|_| missing(DESTROY_SYMBOL))?;
            let process: Symbol<ProcessFn> = library
                .get(&symbol_bytes(PROCESS_SYMBOL))
                .map_err(|_| missing(PROCESS_SYMBOL))?;

            Ok(EntryPoints {
                create: *create,
                destroy: *destroy,
                process: Some(*process),
            })
        }
    }

    /// Create an instance from entry points that live in this process
    pub fn from_entry_points(
        entry: EntryPoints,
        params: Arc<ParameterChannel>,
        source: &Path,
        generation: u64,
    ) -> Result<Self, LoadError> {
        // Safety: `params` outlives the instance (held in `_params`)
        let state = unsafe { (entry.create)(Arc::as_ptr(&params)) };
        if state.is_null() {
            return Err(LoadError::NullInstance {
                path: source.to_path_buf(),
                symbol: CREATE_SYMBOL,
            });
        }

        Ok(Self {
            entry,
            state,
            _params: params,
            source: source.to_path_buf(),
            generation,
            library: None,
            shadow_copy: None,
        })
    }

    /// Path the module was loaded from (the original, not the shadow copy)
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Monotonic load counter assigned by the host
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_native(&self) -> bool {
        self.library.is_some()
    }

    /// Whether `process` would produce audio
    #[inline]
    pub fn can_process(&self) -> bool {
        self.entry.process.is_some() && !self.state.is_null()
    }

    /// Run the module over `out`. Returns false (and leaves `out` alone) if
    /// the module cannot process.
    #[inline]
    pub fn process(&self, out: &mut [f32]) -> bool {
        match self.entry.process {
            Some(process) if !self.state.is_null() => {
                // Safety: `out` is valid for `out.len()` writes and the state
                // belongs to this handle until Drop
                unsafe { process(self.state, out.as_mut_ptr(), out.len() as u32) };
                true
            }
            _ => false,
        }
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        log::info!(
            "Unloading module generation {} ({:?})",
            self.generation,
            self.source
        );

        if !self.state.is_null() {
            // Safety: the state came from this module's create and is
            // destroyed exactly once
            unsafe { (self.entry.destroy)(self.state) };
            self.state = std::ptr::null_mut();
        }

        // Close the library only after its destroy has returned
        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                log::warn!("Failed to close module library: {}", e);
            }
        }

        if let Some(copy) = self.shadow_copy.take() {
            if let Err(e) = std::fs::remove_file(&copy) {
                log::debug!("Could not remove shadow copy {:?}: {}", copy, e);
            }
        }
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("source", &self.source)
            .field("generation", &self.generation)
            .field("native", &self.is_native())
            .field("can_process", &self.can_process())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counters {
        created: AtomicUsize,
        destroyed: AtomicUsize,
    }

    static COUNTERS: Counters = Counters {
        created: AtomicUsize::new(0),
        destroyed: AtomicUsize::new(0),
    };

    unsafe extern "C" fn counted_create(_params: *const ParameterChannel) -> *mut c_void {
        COUNTERS.created.fetch_add(1, Ordering::SeqCst);
        Box::into_raw(Box::new(0.25f32)) as *mut c_void
    }

    unsafe extern "C" fn counted_destroy(state: *mut c_void) {
        COUNTERS.destroyed.fetch_add(1, Ordering::SeqCst);
        drop(Box::from_raw(state as *mut f32));
    }

    unsafe extern "C" fn constant_process(state: *mut c_void, out: *mut f32, frames: u32) {
        let value = *(state as *const f32);
        std::slice::from_raw_parts_mut(out, frames as usize).fill(value);
    }

    unsafe extern "C" fn null_create(_params: *const ParameterChannel) -> *mut c_void {
        std::ptr::null_mut()
    }

    #[test]
    fn test_in_process_lifecycle() {
        let entry = EntryPoints {
            create: counted_create,
            destroy: counted_destroy,
            process: Some(constant_process),
        };
        let created = COUNTERS.created.load(Ordering::SeqCst);
        let destroyed = COUNTERS.destroyed.load(Ordering::SeqCst);

        let handle = ModuleHandle::from_entry_points(
            entry,
            Arc::new(ParameterChannel::default()),
            Path::new("constant"),
            7,
        )
        .unwrap();
        assert_eq!(COUNTERS.created.load(Ordering::SeqCst), created + 1);
        assert!(handle.can_process());
        assert!(!handle.is_native());
        assert_eq!(handle.generation(), 7);

        let mut out = [0.0f32; 8];
        assert!(handle.process(&mut out));
        assert_eq!(out, [0.25; 8]);

        drop(handle);
        assert_eq!(COUNTERS.destroyed.load(Ordering::SeqCst), destroyed + 1);
    }

    #[test]
    fn test_missing_process_renders_nothing() {
        let entry = EntryPoints {
            create: counted_create,
            destroy: counted_destroy,
            process: None,
        };
        let handle = ModuleHandle::from_entry_points(
            entry,
            Arc::new(ParameterChannel::default()),
            Path::new("no-process"),
            1,
        )
        .unwrap();
        assert!(!handle.can_process());

        let mut out = [0.5f32; 4];
        assert!(!handle.process(&mut out));
        assert_eq!(out, [0.5; 4]);
    }

    #[test]
    fn test_null_instance_rejected() {
        let entry = EntryPoints {
            create: null_create,
            destroy: counted_destroy,
            process: Some(constant_process),
        };
        let result = ModuleHandle::from_entry_points(
            entry,
            Arc::new(ParameterChannel::default()),
            Path::new("null"),
            1,
        );
        assert!(matches!(result, Err(LoadError::NullInstance { .. })));
    }

    #[test]
    fn test_open_missing_file() {
        let result = ModuleHandle::open(
            Path::new("/definitely/not/here/libplugin.so"),
            Path::new("/definitely/not/here/libplugin.so"),
            None,
            Arc::new(ParameterChannel::default()),
            1,
        );
        assert!(matches!(result, Err(LoadError::OpenFailed { .. })));
    }
}
