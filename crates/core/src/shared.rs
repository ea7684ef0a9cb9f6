//! Handler-to-foreground signalling. Handlers are plain `fn()`s, so the only
//! way they can publish anything is through `static` atomics like this one.

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Default)]
pub struct SharedCounter(AtomicU32);

impl SharedCounter {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) -> u32 {
        self.0.swap(0, Ordering::SeqCst)
    }
}
