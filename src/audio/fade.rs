//! Gain math and the music fade ramp

use crate::protocol::types::AudioFormat;

const MIN_DB: f32 = -60.0;
const MAX_DB: f32 = 0.0;

/// Music gain while a nav prompt is audible
pub const DUCK_GAIN: f32 = 0.2;

pub const RAMP_DOWN_MS: u32 = 500;
pub const RAMP_UP_MS: u32 = 1500;

const EPSILON: f32 = 1e-4;

/// Map a 0..1 volume onto a -60..0 dB curve. Zero volume is exactly silent.
pub fn gain_from_volume(volume: f32) -> f32 {
    if volume.is_nan() || volume <= 0.0 {
        return 0.0;
    }
    let volume = volume.min(1.0);
    let db = MIN_DB + (MAX_DB - MIN_DB) * volume;
    10f32.powf(db / 20.0)
}

/// Interleaved samples covering `ms` of audio, at least one
pub fn ramp_samples(ms: u32, format: AudioFormat) -> usize {
    let samples = (ms as f64 / 1000.0) * format.sample_rate as f64 * format.channels as f64;
    (samples.round() as usize).max(1)
}

#[inline]
pub fn clamp16(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FadePhase {
    /// Holding `current`
    Idle,
    /// A ramp is wanted but its length waits for the next chunk's format
    Armed { target: f32 },
    Running { target: f32, remaining: usize },
}

/// Music gain envelope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeState {
    pub current: f32,
    pub phase: FadePhase,
}

impl Default for FadeState {
    fn default() -> Self {
        Self::silent()
    }
}

impl FadeState {
    /// Start from silence, heading for full volume
    pub fn silent() -> Self {
        Self {
            current: 0.0,
            phase: FadePhase::Armed { target: 1.0 },
        }
    }

    pub fn target(&self) -> f32 {
        match self.phase {
            FadePhase::Idle => self.current,
            FadePhase::Armed { target } | FadePhase::Running { target, .. } => target,
        }
    }

    pub fn arm(&mut self, target: f32) {
        self.phase = FadePhase::Armed { target };
    }

    /// Restart from zero toward `target`
    pub fn arm_from_zero(&mut self, target: f32) {
        self.current = 0.0;
        self.arm(target);
    }

    /// Re-arm when the wanted target differs from where the envelope is going
    pub fn retarget(&mut self, target: f32) {
        let stale = match self.phase {
            FadePhase::Idle => (self.current - target).abs() > EPSILON,
            FadePhase::Armed { target: t } => (t - target).abs() > EPSILON,
            FadePhase::Running { target: t, remaining } => {
                (t - target).abs() > EPSILON || (remaining == 0 && (self.current - t).abs() > EPSILON)
            }
        };
        if stale {
            self.arm(target);
        }
    }

    /// Turn an armed ramp into a running one for the given layout
    pub fn begin(&mut self, format: AudioFormat) {
        if let FadePhase::Armed { target } = self.phase {
            let ms = if target < self.current { RAMP_DOWN_MS } else { RAMP_UP_MS };
            self.phase = FadePhase::Running {
                target,
                remaining: ramp_samples(ms, format),
            };
        }
    }

    /// Gain for the next interleaved sample
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        if let FadePhase::Running { target, remaining } = self.phase {
            if remaining <= 1 {
                self.current = target;
                self.phase = FadePhase::Idle;
            } else {
                self.current += (target - self.current) / remaining as f32;
                self.phase = FadePhase::Running {
                    target,
                    remaining: remaining - 1,
                };
            }
        }
        self.current
    }
}
