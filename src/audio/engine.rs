//! Real-time rendering
//!
//! [`AudioCallbackEngine::render`] is what the transport calls every audio
//! period. It never allocates, locks or logs: the live module comes from an
//! arc-swap load, metering goes through atomics, and the rendered block is
//! appended to the [`HistoryRing`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use super::history::HistoryRing;
use super::plugin::LiveModule;

/// Smoothing applied to the output peak meter per block
const LEVEL_SMOOTHING: f32 = 0.1;

/// Helper to store f32 in AtomicU32
#[inline]
fn f32_to_u32(f: f32) -> u32 {
    f.to_bits()
}

/// Helper to load f32 from AtomicU32
#[inline]
fn u32_to_f32(u: u32) -> f32 {
    f32::from_bits(u)
}

/// The host side of the audio callback
pub struct AudioCallbackEngine {
    live: Arc<LiveModule>,
    history: Arc<HistoryRing>,
    // Output level for metering - AtomicU32 with f32 bit pattern for lock-free access
    output_level: AtomicU32,
    // Set when the limiter engages, cleared when read
    clipping: AtomicBool,
}

impl AudioCallbackEngine {
    pub fn new(live: Arc<LiveModule>, history: Arc<HistoryRing>) -> Self {
        Self {
            live,
            history,
            output_level: AtomicU32::new(f32_to_u32(0.0)),
            clipping: AtomicBool::new(false),
        }
    }

    pub fn history(&self) -> &Arc<HistoryRing> {
        &self.history
    }

    /// Render one block of mono frames into `output`.
    ///
    /// With no live module, or one that cannot process, the block is
    /// silence. Whatever ends up in `output` is also appended to the
    /// history ring.
    pub fn render(&self, output: &mut [f32]) {
        let processed = {
            let guard = self.live.load();
            match guard.as_ref() {
                Some(module) => module.process(output),
                None => false,
            }
        };

        if !processed {
            output.fill(0.0);
        }

        // Safety limiter: modules are user code under active editing, so
        // NaN/inf become silence and everything else is kept within [-1, 1]
        let mut clipped = false;
        let mut peak = 0.0f32;
        for sample in output.iter_mut() {
            if !sample.is_finite() {
                *sample = 0.0;
                clipped = true;
            } else if *sample > 1.0 || *sample < -1.0 {
                *sample = sample.clamp(-1.0, 1.0);
                clipped = true;
            }
            peak = peak.max(sample.abs());
        }
        if clipped {
            self.clipping.store(true, Ordering::Relaxed);
        }

        let current = u32_to_f32(self.output_level.load(Ordering::Relaxed));
        let level = current * (1.0 - LEVEL_SMOOTHING) + peak * LEVEL_SMOOTHING;
        self.output_level.store(f32_to_u32(level), Ordering::Relaxed);

        self.history.write(output);
    }

    /// Smoothed output peak (0.0 - 1.0)
    pub fn output_level(&self) -> f32 {
        u32_to_f32(self.output_level.load(Ordering::Relaxed))
    }

    /// Get and clear the clipping indicator
    pub fn take_clipping(&self) -> bool {
        self.clipping.swap(false, Ordering::Relaxed)
    }
}

#[cfg(feature = "device")]
pub use stream::AudioEngine;

#[cfg(feature = "device")]
mod stream {
    use cpal::traits::{DeviceTrait, StreamTrait};
    use std::sync::Arc;

    use super::AudioCallbackEngine;
    use crate::audio::device::{get_output_device, get_supported_config};
    use crate::config::AudioConfig;

    /// A running output stream feeding the callback engine
    pub struct AudioEngine {
        _stream: cpal::Stream,
        sample_rate: u32,
        channels: u16,
    }

    impl AudioEngine {
        /// Open the output device named in `config` (or the default one)
        /// without starting it. Returns the negotiated stream config.
        pub fn negotiate(config: &AudioConfig) -> Result<(cpal::Device, cpal::StreamConfig), String> {
            let device = get_output_device(config.device.as_deref())?;
            let stream_config = get_supported_config(&device, config)?;
            Ok((device, stream_config))
        }

        /// Build and start the output stream.
        ///
        /// The callback renders mono blocks of at most `block_frames` frames
        /// and copies each frame to every device channel.
        pub fn start(
            device: &cpal::Device,
            stream_config: &cpal::StreamConfig,
            engine: Arc<AudioCallbackEngine>,
            block_frames: usize,
        ) -> Result<Self, String> {
            let sample_rate = stream_config.sample_rate.0;
            let channels = stream_config.channels.max(1);
            let channel_count = channels as usize;

            log::info!(
                "Starting audio engine: {} Hz, {} channels, {} frame blocks",
                sample_rate,
                channels,
                block_frames
            );

            // Pre-allocated so the callback never allocates
            let block_frames = block_frames.max(1);
            let mut scratch = vec![0.0f32; block_frames];

            let stream = device
                .build_output_stream(
                    stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for chunk in data.chunks_mut(block_frames * channel_count) {
                            let frames = chunk.len() / channel_count;
                            let block = &mut scratch[..frames];
                            engine.render(block);

                            for (frame, &sample) in chunk.chunks_mut(channel_count).zip(block.iter()) {
                                frame.fill(sample);
                            }
                        }
                    },
                    move |err| {
                        log::error!("Audio stream error: {}", err);
                    },
                    None, // No timeout
                )
                .map_err(|e| format!("Failed to build output stream: {}", e))?;

            stream
                .play()
                .map_err(|e| format!("Failed to start stream: {}", e))?;

            Ok(Self {
                _stream: stream,
                sample_rate,
                channels,
            })
        }

        pub fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        pub fn channels(&self) -> u16 {
            self.channels
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::params::{ParamDefaults, ParameterChannel};
    use crate::audio::plugin::{sine, EntryPoints, ModuleHandle};
    use approx::assert_abs_diff_eq;
    use std::ffi::c_void;
    use std::path::Path;

    fn engine_with(live: Arc<LiveModule>) -> AudioCallbackEngine {
        AudioCallbackEngine::new(live, Arc::new(HistoryRing::new(48_000, 256)))
    }

    fn install(live: &LiveModule, entry: EntryPoints, params: Arc<ParameterChannel>) {
        let handle = ModuleHandle::from_entry_points(entry, params, Path::new("test"), 1).unwrap();
        live.install(Arc::new(handle));
    }

    unsafe extern "C" fn loud_create(_params: *const ParameterChannel) -> *mut c_void {
        Box::into_raw(Box::new(())) as *mut c_void
    }

    unsafe extern "C" fn loud_destroy(state: *mut c_void) {
        drop(Box::from_raw(state as *mut ()));
    }

    unsafe extern "C" fn loud_process(_state: *mut c_void, out: *mut f32, frames: u32) {
        let out = std::slice::from_raw_parts_mut(out, frames as usize);
        for (i, s) in out.iter_mut().enumerate() {
            *s = match i % 3 {
                0 => 2.0,
                1 => f32::NAN,
                _ => -0.5,
            };
        }
    }

    #[test]
    fn test_no_module_renders_silence() {
        let engine = engine_with(Arc::new(LiveModule::new()));
        let mut out = vec![0.7f32; 256];
        engine.render(&mut out);
        assert_eq!(out.len(), 256);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(engine.history().read_window(256).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_unset_process_renders_silence() {
        let live = Arc::new(LiveModule::new());
        let entry = EntryPoints {
            process: None,
            ..sine::entry_points()
        };
        install(&live, entry, Arc::new(ParameterChannel::default()));

        let engine = engine_with(live);
        let mut out = vec![0.3f32; 128];
        engine.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_sine_scenario() {
        let params = Arc::new(ParameterChannel::new(
            ParamDefaults {
                frequency: 440.0,
                gain: 1.0,
                bypass: false,
            },
            48_000,
        ));
        let live = Arc::new(LiveModule::new());
        install(&live, sine::entry_points(), Arc::clone(&params));

        let engine = engine_with(live);
        let mut out = vec![0.0f32; 48_000];
        engine.render(&mut out);

        let sum: f64 = out.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let rms = (sum / out.len() as f64).sqrt();
        assert_abs_diff_eq!(rms, 0.707, epsilon = 2e-3);
        assert!(!engine.take_clipping());

        // Everything rendered is in the history, in order
        let history = engine.history().read_window(1000);
        assert_eq!(history[..], out[out.len() - 1000..]);
    }

    #[test]
    fn test_bypass_scenario() {
        let params = Arc::new(ParameterChannel::new(
            ParamDefaults {
                frequency: 880.0,
                gain: 0.9,
                bypass: true,
            },
            48_000,
        ));
        let live = Arc::new(LiveModule::new());
        install(&live, sine::entry_points(), params);

        let engine = engine_with(live);
        let mut out = vec![1.0f32; 1024];
        engine.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_limiter_and_clip_flag() {
        let live = Arc::new(LiveModule::new());
        let entry = EntryPoints {
            create: loud_create,
            destroy: loud_destroy,
            process: Some(loud_process),
        };
        install(&live, entry, Arc::new(ParameterChannel::default()));

        let engine = engine_with(live);
        let mut out = vec![0.0f32; 9];
        engine.render(&mut out);

        assert_eq!(&out[..3], &[1.0, 0.0, -0.5]);
        assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        assert!(engine.take_clipping());
        assert!(!engine.take_clipping());
        assert!(engine.output_level() > 0.0);
    }
}
