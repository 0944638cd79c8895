use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Progress reported by the bridged tool through SET_PROGRESS.
///
/// Written by the server thread, polled from anywhere else.
#[derive(Debug, Default)]
pub struct Progress {
    percent: AtomicU8,
    elapsed_ms: AtomicU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percent: u8,
    pub elapsed_ms: u32,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Acquire)
    }

    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: self.percent(),
            elapsed_ms: self.elapsed_ms(),
        }
    }

    /// Store raw wire values; percent is clamped to 0..=100, elapsed to >= 0
    pub fn update(&self, percent: i32, elapsed_ms: i32) {
        self.percent.store(percent.clamp(0, 100) as u8, Ordering::Release);
        self.elapsed_ms.store(elapsed_ms.max(0) as u32, Ordering::Release);
    }

    pub fn reset(&self) {
        self.update(0, 0);
    }
}
