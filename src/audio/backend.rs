//! Seams between the mixer, its host and the audio hardware

use serde::Serialize;

use crate::config::MixerSettings;
use crate::error::AudioError;
use crate::protocol::types::AudioFormat;

/// One output sink exists per distinct PCM layout
pub type SinkKey = AudioFormat;

/// Receives captured microphone PCM (mono, 16 kHz)
pub type MicCallback = Box<dyn Fn(Vec<i16>) + Send + Sync + 'static>;

/// Channel name used for visualizer chunks
pub const VISUALIZER_CHANNEL: &str = "audio-visualizer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionKind {
    Call,
    Siri,
    Nav,
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiEvent {
    Attention { kind: AttentionKind, active: bool },
}

/// Everything the mixer needs from the application around it
pub trait MixerHost: Send + Sync {
    /// Read on every decision, so changes apply immediately
    fn config(&self) -> MixerSettings;

    fn send_ui_event(&self, event: UiEvent);

    fn send_chunked(&self, channel: &str, data: &[u8], chunk_size: usize, extra: Option<serde_json::Value>);

    /// Called from the capture thread; must only forward
    fn send_mic_pcm(&self, samples: Vec<i16>);
}

/// Writes PCM to the hardware
pub trait PcmSink: Send {
    fn write(&mut self, samples: &[i16]);

    fn stop(&mut self);
}

pub trait MicCapture: Send {
    fn stop(&mut self);
}

/// Factory for sinks and microphone sources
pub trait AudioBackend: Send {
    fn open_sink(&mut self, key: SinkKey) -> Result<Box<dyn PcmSink>, AudioError>;

    fn open_mic(&mut self, callback: MicCallback) -> Result<Box<dyn MicCapture>, AudioError>;
}

/// Backend that accepts everything and plays nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

struct NullSink;

impl PcmSink for NullSink {
    fn write(&mut self, _samples: &[i16]) {}

    fn stop(&mut self) {}
}

struct NullMic;

impl MicCapture for NullMic {
    fn stop(&mut self) {}
}

impl AudioBackend for NullBackend {
    fn open_sink(&mut self, _key: SinkKey) -> Result<Box<dyn PcmSink>, AudioError> {
        Ok(Box::new(NullSink))
    }

    fn open_mic(&mut self, _callback: MicCallback) -> Result<Box<dyn MicCapture>, AudioError> {
        Ok(Box::new(NullMic))
    }
}

/// Little-endian bytes of the mono downmix, as sent to the visualizer
pub fn downmix_to_mono_bytes(samples: &[i16], channels: u16) -> Vec<u8> {
    let channels = channels.max(1) as usize;
    let mut out = Vec::with_capacity(samples.len() / channels * 2);
    for frame in samples.chunks_exact(channels) {
        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
        let mono = (sum / channels as i32) as i16;
        out.extend_from_slice(&mono.to_le_bytes());
    }
    out
}
