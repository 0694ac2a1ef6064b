//! FIFO of nav PCM waiting to be mixed into music

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct NavQueue {
    chunks: VecDeque<Vec<i16>>,
    /// Read position inside the front chunk
    offset: usize,
    queued: usize,
}

impl NavQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Vec<i16>) {
        if chunk.is_empty() {
            return;
        }
        self.queued += chunk.len();
        self.chunks.push_back(chunk);
    }

    #[inline]
    pub fn pop_sample(&mut self) -> Option<i16> {
        let front = self.chunks.front()?;
        let sample = front[self.offset];
        self.offset += 1;
        if self.offset >= front.len() {
            self.chunks.pop_front();
            self.offset = 0;
        }
        self.queued -= 1;
        Some(sample)
    }

    /// Samples not yet consumed
    pub fn len(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.offset = 0;
        self.queued = 0;
    }
}
