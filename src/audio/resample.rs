//! Linear resampling and channel remapping for device format mismatches

use crate::audio::fade::clamp16;

/// Streaming linear interpolator over interleaved i16 frames
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    /// Read position in input frames, relative to `prev`
    pos: f64,
    prev: Vec<f32>,
    primed: bool,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        Self {
            from_rate: from_rate.max(1),
            to_rate: to_rate.max(1),
            channels,
            pos: 0.0,
            prev: vec![0.0; channels],
            primed: false,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    pub fn process(&mut self, input: &[i16], out: &mut Vec<i16>) {
        let ch = self.channels;
        let frames = input.len() / ch;
        if frames == 0 {
            return;
        }
        if self.is_passthrough() {
            out.extend_from_slice(&input[..frames * ch]);
            return;
        }

        if !self.primed {
            for c in 0..ch {
                self.prev[c] = input[c] as f32;
            }
            self.primed = true;
        }

        let step = self.from_rate as f64 / self.to_rate as f64;
        let prev = &self.prev;
        let frame = |k: usize, c: usize| -> f32 {
            if k == 0 {
                prev[c]
            } else {
                input[(k - 1) * ch + c] as f32
            }
        };

        while self.pos < frames as f64 {
            let k = self.pos.floor() as usize;
            let frac = (self.pos - k as f64) as f32;
            for c in 0..ch {
                let a = frame(k, c);
                let b = frame(k + 1, c);
                out.push(clamp16(a + (b - a) * frac));
            }
            self.pos += step;
        }
        self.pos -= frames as f64;

        let last = (frames - 1) * ch;
        for c in 0..ch {
            self.prev[c] = input[last + c] as f32;
        }
    }
}

/// Map interleaved frames between channel counts
///
/// Mono is duplicated upward; wider input is averaged down to mono or
/// truncated to the first `to` channels.
pub fn remix(input: &[i16], from: u16, to: u16, out: &mut Vec<i16>) {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    if from == to {
        out.extend_from_slice(input);
        return;
    }
    for frame in input.chunks_exact(from) {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / from as i32) as i16);
        } else {
            for c in 0..to {
                out.push(frame.get(c).copied().unwrap_or(0));
            }
        }
    }
}
