//! Rolling history of produced frames
//!
//! The audio thread is the only writer. Readers (status display, snapshot
//! export) never coordinate with it beyond loading the cursor: samples live
//! in `AtomicU32` slots as f32 bit patterns, so a reader can see a stale
//! frame but never a torn one.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Fixed-capacity circular buffer with an atomic write cursor
pub struct HistoryRing {
    slots: Box<[AtomicU32]>,
    /// Next slot to be written, always < capacity
    write_cursor: AtomicUsize,
    /// Largest block the writer appends in one call
    period_frames: usize,
    /// Total frames ever written, for fill reporting
    frames_written: AtomicU64,
}

impl HistoryRing {
    /// Ring holding `record_frames` of history plus one period of headroom
    pub fn new(record_frames: usize, period_frames: usize) -> Self {
        let period_frames = period_frames.max(1);
        let capacity = record_frames.max(1) + period_frames;
        let slots = (0..capacity)
            .map(|_| AtomicU32::new(0.0f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            write_cursor: AtomicUsize::new(0),
            period_frames,
            frames_written: AtomicU64::new(0),
        }
    }

    /// `record_seconds × sample_rate` frames of history
    pub fn for_duration(record_seconds: u32, sample_rate: u32, period_frames: usize) -> Self {
        Self::new(record_seconds as usize * sample_rate as usize, period_frames)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn period_frames(&self) -> usize {
        self.period_frames
    }

    /// Frames available to a snapshot: everything but the write headroom
    pub fn recorded_frames(&self) -> usize {
        self.capacity() - self.period_frames
    }

    pub fn write_cursor(&self) -> usize {
        self.write_cursor.load(Ordering::Acquire)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Fraction of the snapshot window holding real audio (0.0 - 1.0)
    pub fn fill_ratio(&self) -> f32 {
        let recorded = self.recorded_frames() as u64;
        self.frames_written().min(recorded) as f32 / recorded as f32
    }

    /// Append one block. Must only be called from the single writer.
    ///
    /// Slots are stored first; the cursor is published afterwards, so a
    /// reader that sees the new cursor also sees the new samples.
    pub fn write(&self, frames: &[f32]) {
        let capacity = self.capacity();
        // Only the newest `capacity` frames can survive anyway
        let frames = &frames[frames.len().saturating_sub(capacity)..];

        let mut cursor = self.write_cursor.load(Ordering::Relaxed);
        for &sample in frames {
            self.slots[cursor].store(sample.to_bits(), Ordering::Relaxed);
            cursor += 1;
            if cursor == capacity {
                cursor = 0;
            }
        }

        self.write_cursor.store(cursor, Ordering::Release);
        self.frames_written
            .fetch_add(frames.len() as u64, Ordering::Relaxed);
    }

    /// Copy the newest `length` frames, oldest first.
    ///
    /// `length` is clamped to `capacity - 1` so the slot about to be written
    /// is never part of the window.
    pub fn read_window(&self, length: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; length.min(self.capacity() - 1)];
        self.read_window_into(&mut out);
        out
    }

    /// Fill `out` with the newest frames, oldest first. Returns the number
    /// of frames copied.
    pub fn read_window_into(&self, out: &mut [f32]) -> usize {
        let capacity = self.capacity();
        let length = out.len().min(capacity - 1);
        let cursor = self.write_cursor.load(Ordering::Acquire);

        let mut index = (cursor + capacity - length) % capacity;
        for slot in out[..length].iter_mut() {
            *slot = f32::from_bits(self.slots[index].load(Ordering::Relaxed));
            index += 1;
            if index == capacity {
                index = 0;
            }
        }
        length
    }

    /// The full snapshot window: starts one period ahead of the cursor,
    /// skipping the region most likely being written
    pub fn snapshot(&self) -> Vec<f32> {
        self.read_window(self.recorded_frames())
    }
}

impl std::fmt::Debug for HistoryRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRing")
            .field("capacity", &self.capacity())
            .field("period_frames", &self.period_frames)
            .field("write_cursor", &self.write_cursor())
            .finish()
    }
}
