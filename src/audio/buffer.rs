//! Lock-free sample ring between the mixer and an output callback
//!
//! Single producer (the mixer thread) and single consumer (the audio
//! callback). Overflow drops the newest samples; underrun yields silence.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct SampleRing {
    queue: ArrayQueue<i16>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push as many samples as fit; returns how many were accepted
    pub fn push_slice(&self, samples: &[i16]) -> usize {
        for (pushed, &sample) in samples.iter().enumerate() {
            if self.queue.push(sample).is_err() {
                self.overflow_count
                    .fetch_add(samples.len() - pushed, Ordering::Relaxed);
                return pushed;
            }
        }
        samples.len()
    }

    /// Fill `out` from the ring, padding with silence on underrun
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let mut filled = 0;
        for slot in out.iter_mut() {
            match self.queue.pop() {
                Some(sample) => {
                    *slot = sample;
                    filled += 1;
                }
                None => *slot = 0,
            }
        }
        if filled < out.len() && filled > 0 {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        filled
    }

    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

pub type SharedSampleRing = Arc<SampleRing>;

pub fn create_shared_ring(capacity: usize) -> SharedSampleRing {
    Arc::new(SampleRing::new(capacity))
}
