//! Microphone capture for Siri and phone calls

use cpal::traits::DeviceTrait;
use cpal::StreamConfig;

use crate::audio::backend::{MicCallback, MicCapture};
use crate::audio::device::default_input_device;
use crate::audio::playback::StreamThread;
use crate::audio::resample::{remix, LinearResampler};
use crate::error::AudioError;

/// Sample rate of PCM sent back to the adapter
pub const MIC_SAMPLE_RATE: u32 = 16_000;

/// Samples per mic callback forwarded to the link (20 ms)
const MIC_CHUNK: usize = 320;

/// Default input device, downmixed to mono and resampled to 16 kHz
pub struct CpalMic {
    thread: StreamThread,
}

impl CpalMic {
    pub fn start(callback: MicCallback) -> Result<Self, AudioError> {
        let device = default_input_device()?;
        let config: StreamConfig = device.default_input_config()?.config();
        let channels = config.channels;
        tracing::debug!(
            "Mic {} at {} Hz/{}ch",
            device.name,
            config.sample_rate.0,
            channels
        );

        let thread = StreamThread::spawn("mic-capture".to_string(), move || {
            let cpal_device = device.into_inner();
            let mut resampler = LinearResampler::new(config.sample_rate.0, MIC_SAMPLE_RATE, 1);
            let mut captured: Vec<i16> = Vec::new();
            let mut mono: Vec<i16> = Vec::new();
            let mut pending: Vec<i16> = Vec::with_capacity(MIC_CHUNK * 2);

            cpal_device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        captured.clear();
                        captured.extend(data.iter().map(|&s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16));
                        mono.clear();
                        remix(&captured, channels, 1, &mut mono);
                        resampler.process(&mono, &mut pending);

                        while pending.len() >= MIC_CHUNK {
                            let chunk: Vec<i16> = pending.drain(..MIC_CHUNK).collect();
                            callback(chunk);
                        }
                    },
                    |err| tracing::error!("Mic stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::StreamError(e.to_string()))
        })?;

        Ok(Self { thread })
    }
}

impl MicCapture for CpalMic {
    fn stop(&mut self) {
        self.thread.stop();
    }
}
