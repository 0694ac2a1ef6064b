//! cpal output sinks
//!
//! cpal streams are not `Send`, so each sink owns a dedicated thread
//! that builds the stream and keeps it alive until stopped.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::backend::{AudioBackend, MicCallback, MicCapture, PcmSink, SinkKey};
use crate::audio::capture::CpalMic;
use crate::audio::buffer::{create_shared_ring, SharedSampleRing};
use crate::audio::device::output_device;
use crate::audio::resample::{remix, LinearResampler};
use crate::error::AudioError;

/// Seconds of audio a sink may buffer ahead of the device
const SINK_BUFFER_SECONDS: usize = 2;

const KEEPALIVE_POLL: Duration = Duration::from_millis(10);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Plays through the host's output device and records from its default input
#[derive(Debug, Default, Clone)]
pub struct CpalBackend {
    /// Output device name; `None` uses the host default
    pub output_device: Option<String>,
}

impl CpalBackend {
    pub fn new(output_device: Option<String>) -> Self {
        Self { output_device }
    }
}

impl AudioBackend for CpalBackend {
    fn open_sink(&mut self, key: SinkKey) -> Result<Box<dyn PcmSink>, AudioError> {
        Ok(Box::new(CpalSink::open(self.output_device.as_deref(), key)?))
    }

    fn open_mic(&mut self, callback: MicCallback) -> Result<Box<dyn MicCapture>, AudioError> {
        Ok(Box::new(CpalMic::start(callback)?))
    }
}

/// Keeps a stream thread alive until `running` drops
pub(crate) struct StreamThread {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn `build` on its own thread and wait until the stream plays
    pub(crate) fn spawn<F>(name: String, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream
                        .play()
                        .map(|_| stream)
                        .map_err(|e| AudioError::StreamError(e.to_string()))
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(KEEPALIVE_POLL);
                }
                drop(stream);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut thread = Self {
            running,
            thread_handle: Some(handle),
        };
        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(thread),
            Ok(Err(e)) => {
                thread.stop();
                Err(e)
            }
            Err(_) => {
                thread.stop();
                Err(AudioError::StreamError("stream did not start".to_string()))
            }
        }
    }

    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One output stream fed through a sample ring
pub struct CpalSink {
    key: SinkKey,
    device_config: StreamConfig,
    ring: SharedSampleRing,
    resampler: LinearResampler,
    remixed: Vec<i16>,
    resampled: Vec<i16>,
    thread: StreamThread,
}

impl CpalSink {
    pub fn open(device_name: Option<&str>, key: SinkKey) -> Result<Self, AudioError> {
        let device = output_device(device_name)?;

        let device_config = if device.supports_output(key.sample_rate, key.channels) {
            StreamConfig {
                channels: key.channels,
                sample_rate: cpal::SampleRate(key.sample_rate),
                buffer_size: cpal::BufferSize::Default,
            }
        } else {
            let default = device
                .inner()
                .default_output_config()
                .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
            tracing::debug!(
                "{} does not play {} Hz/{}ch, converting to {} Hz/{}ch",
                device.name,
                key.sample_rate,
                key.channels,
                default.sample_rate().0,
                default.channels()
            );
            default.config()
        };

        let capacity =
            device_config.sample_rate.0 as usize * device_config.channels as usize * SINK_BUFFER_SECONDS;
        let ring = create_shared_ring(capacity);
        let ring_for_callback = ring.clone();
        let config = device_config.clone();
        let name = format!("sink-{}hz-{}ch", key.sample_rate, key.channels);

        let thread = StreamThread::spawn(name, move || {
            let cpal_device = device.into_inner();
            let mut scratch: Vec<i16> = Vec::new();
            cpal_device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0);
                        ring_for_callback.pop_into(&mut scratch);
                        for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                            *out = sample as f32 / 32768.0;
                        }
                    },
                    |err| tracing::error!("Output stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::StreamError(e.to_string()))
        })?;

        Ok(Self {
            key,
            resampler: LinearResampler::new(key.sample_rate, device_config.sample_rate.0, device_config.channels),
            device_config,
            ring,
            remixed: Vec::new(),
            resampled: Vec::new(),
            thread,
        })
    }
}

impl PcmSink for CpalSink {
    fn write(&mut self, samples: &[i16]) {
        self.remixed.clear();
        remix(samples, self.key.channels, self.device_config.channels, &mut self.remixed);
        self.resampled.clear();
        self.resampler.process(&self.remixed, &mut self.resampled);

        let accepted = self.ring.push_slice(&self.resampled);
        if accepted < self.resampled.len() {
            tracing::trace!("Sink overflow, dropped {} samples", self.resampled.len() - accepted);
        }
    }

    fn stop(&mut self) {
        self.thread.stop();
        self.ring.clear();
        tracing::debug!(
            "Sink {} Hz/{}ch stopped ({} overflows, {} underruns)",
            self.key.sample_rate,
            self.key.channels,
            self.ring.overflow_count(),
            self.ring.underrun_count()
        );
    }
}
