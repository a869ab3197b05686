//! The live module slot
//!
//! Publishes the current [`ModuleHandle`] to the audio thread through an
//! `ArcSwapOption`. The audio thread only ever loads; the host swaps in a
//! fully constructed handle and then retires the previous one off the audio
//! thread.

use arc_swap::{ArcSwapOption, Guard};
use std::sync::Arc;
use std::time::Duration;

use super::module::ModuleHandle;

/// How often `retire` checks whether the audio thread let go of a handle
const RETIRE_POLL: Duration = Duration::from_millis(1);

#[derive(Default)]
pub struct LiveModule {
    current: ArcSwapOption<ModuleHandle>,
}

impl LiveModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Real-time safe read of the live handle
    #[inline]
    pub fn load(&self) -> Guard<Option<Arc<ModuleHandle>>> {
        self.current.load()
    }

    /// The live handle, as an owned reference. Not for the audio thread.
    pub fn current(&self) -> Option<Arc<ModuleHandle>> {
        self.current.load_full()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn generation(&self) -> Option<u64> {
        self.current.load().as_ref().map(|m| m.generation())
    }

    /// Make `handle` live and return the one it replaced
    pub fn install(&self, handle: Arc<ModuleHandle>) -> Option<Arc<ModuleHandle>> {
        self.current.swap(Some(handle))
    }

    /// Empty the slot and return what was live
    pub fn take(&self) -> Option<Arc<ModuleHandle>> {
        self.current.swap(None)
    }

    /// Drop a replaced handle once nobody else references it.
    ///
    /// The audio thread may still be inside `process` on the old handle for
    /// up to one callback period after the swap. Waiting for the last
    /// reference keeps `destroy` and the library close off the audio thread.
    pub fn retire(old: Arc<ModuleHandle>) {
        let mut old = old;
        loop {
            match Arc::try_unwrap(old) {
                Ok(handle) => {
                    drop(handle);
                    return;
                }
                Err(still_shared) => {
                    old = still_shared;
                    std::thread::sleep(RETIRE_POLL);
                }
            }
        }
    }
}

impl std::fmt::Debug for LiveModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveModule")
            .field("current", &*self.current.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::params::ParameterChannel;
    use crate::audio::plugin::sine;
    use std::path::Path;

    fn sine_handle(generation: u64) -> Arc<ModuleHandle> {
        Arc::new(
            ModuleHandle::from_entry_points(
                sine::entry_points(),
                Arc::new(ParameterChannel::default()),
                Path::new("sine"),
                generation,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_install_returns_previous() {
        let live = LiveModule::new();
        assert!(!live.is_loaded());

        assert!(live.install(sine_handle(1)).is_none());
        assert_eq!(live.generation(), Some(1));

        let old = live.install(sine_handle(2)).unwrap();
        assert_eq!(old.generation(), 1);
        assert_eq!(live.generation(), Some(2));

        LiveModule::retire(old);
        assert_eq!(live.take().map(|m| m.generation()), Some(2));
        assert!(!live.is_loaded());
    }

    #[test]
    fn test_retire_waits_for_readers() {
        let live = Arc::new(LiveModule::new());
        live.install(sine_handle(1));

        let reader = live.current().unwrap();
        let old = live.install(sine_handle(2)).unwrap();

        let retiring = std::thread::spawn(move || LiveModule::retire(old));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!retiring.is_finished());

        drop(reader);
        retiring.join().unwrap();
    }
}
