//! Lock-free SPSC ring buffer for audio samples.
//!
//! This is the ingestion queue between the real-time capture callback and the
//! processing loop. `ringbuf::HeapRb<f32>` provides a wait-free `push_slice`
//! safe to call from the audio callback; when the ring is full the excess
//! samples of a push are rejected (newest-rejected policy) and counted by the
//! caller.

pub mod window;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half — held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half — held by the pipeline thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^21 = 2 097 152 f32 samples ≈ 43.7 s at 48 kHz.
/// Absorbs classifier latency spikes without dropping capture blocks.
pub const RING_CAPACITY: usize = 1 << 21;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
///
/// # Panics
/// Never panics — `HeapRb` construction cannot fail for reasonable capacities.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
