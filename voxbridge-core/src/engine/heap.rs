//! Simulated native heap backing the staging buffer of in-process engines.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{Result, VoxError};

/// Opaque address of a native allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapAddr(pub u32);

const ALIGN: u32 = 8;

/// Address-keyed f32 blocks with explicit allocate/free.
#[derive(Debug)]
pub struct NativeHeap {
    blocks: HashMap<HeapAddr, Vec<f32>>,
    next: u32,
}

impl NativeHeap {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            next: ALIGN,
        }
    }

    pub fn allocate(&mut self, bytes: usize) -> Result<HeapAddr> {
        let span = u32::try_from(bytes)
            .ok()
            .and_then(|b| b.checked_add(ALIGN - 1))
            .map(|b| b / ALIGN * ALIGN)
            .ok_or_else(|| VoxError::Engine(format!("allocation of {bytes} bytes too large")))?;
        let addr = HeapAddr(self.next);
        self.next = self
            .next
            .checked_add(span.max(ALIGN))
            .ok_or_else(|| VoxError::Engine("native heap exhausted".into()))?;
        self.blocks
            .insert(addr, vec![0.0; bytes / std::mem::size_of::<f32>()]);
        Ok(addr)
    }

    /// Release a block. Returns `false` (and logs) for an unknown address.
    pub fn free(&mut self, addr: HeapAddr) -> bool {
        let freed = self.blocks.remove(&addr).is_some();
        if !freed {
            warn!(addr = addr.0, "free of unknown native address");
        }
        freed
    }

    pub fn write(&mut self, addr: HeapAddr, samples: &[f32]) -> Result<()> {
        let block = self
            .blocks
            .get_mut(&addr)
            .ok_or_else(|| VoxError::Engine(format!("write to unknown address {}", addr.0)))?;
        if samples.len() > block.len() {
            return Err(VoxError::Engine(format!(
                "write of {} samples overflows block of {}",
                samples.len(),
                block.len()
            )));
        }
        block[..samples.len()].copy_from_slice(samples);
        Ok(())
    }

    pub fn read(&self, addr: HeapAddr, count: usize) -> Result<&[f32]> {
        let block = self
            .blocks
            .get(&addr)
            .ok_or_else(|| VoxError::Engine(format!("read from unknown address {}", addr.0)))?;
        block.get(..count).ok_or_else(|| {
            VoxError::Engine(format!(
                "read of {count} samples past block of {}",
                block.len()
            ))
        })
    }

    /// Number of live allocations.
    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }
}

impl Default for NativeHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_do_not_overlap() {
        let mut heap = NativeHeap::new();
        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(4).unwrap();
        assert!(b.0 >= a.0 + 16);
        assert_eq!(a.0 % ALIGN, 0);
        assert_eq!(b.0 % ALIGN, 0);
        assert_eq!(heap.live_blocks(), 2);
    }

    #[test]
    fn write_then_read_back() {
        let mut heap = NativeHeap::new();
        let addr = heap.allocate(3 * 4).unwrap();
        heap.write(addr, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(heap.read(addr, 3).unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn overflowing_write_is_rejected() {
        let mut heap = NativeHeap::new();
        let addr = heap.allocate(4).unwrap();
        assert!(heap.write(addr, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn double_free_is_reported_not_fatal() {
        let mut heap = NativeHeap::new();
        let addr = heap.allocate(8).unwrap();
        assert!(heap.free(addr));
        assert!(!heap.free(addr));
        assert_eq!(heap.live_blocks(), 0);
    }
}
