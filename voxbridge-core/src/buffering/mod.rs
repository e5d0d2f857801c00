//! Lock-free SPSC ring buffer between the device callback and the capture pump.
//!
//! The device callback only ever calls `push_slice`, which never blocks or
//! allocates. Fixed-size slicing happens on the consumer side.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Written by the device callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Drained by the capture pump.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
/// The pump drains every few milliseconds, so this only matters when the
/// foreground runtime stalls.
pub const RING_CAPACITY: usize = 1 << 20;

/// Fresh ring for one capture session.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
