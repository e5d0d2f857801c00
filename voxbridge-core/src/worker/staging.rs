//! Reusable native staging buffer for waveform hand-off.

use tracing::debug;

use crate::engine::{HeapAddr, SpeechEngine};
use crate::error::Result;

/// At most one live native allocation, resized only when the chunk size changes.
#[derive(Debug, Default)]
pub struct StagingBuffer {
    addr: Option<HeapAddr>,
    size: usize,
}

impl StagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a block of exactly `size` bytes, reusing the current one when
    /// it already fits. A differently sized block is freed first.
    pub fn ensure<E: SpeechEngine>(&mut self, engine: &mut E, size: usize) -> Result<HeapAddr> {
        if let Some(addr) = self.addr {
            if self.size == size {
                return Ok(addr);
            }
        }
        self.release(engine);
        let addr = engine.allocate(size)?;
        self.addr = Some(addr);
        self.size = size;
        debug!(bytes = size, "allocated staging buffer");
        Ok(addr)
    }

    /// Free the block if one is live. Safe to call repeatedly.
    pub fn release<E: SpeechEngine>(&mut self, engine: &mut E) {
        if let Some(addr) = self.addr.take() {
            engine.free(addr);
            debug!(bytes = self.size, "freed staging buffer");
            self.size = 0;
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.addr.is_some()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
