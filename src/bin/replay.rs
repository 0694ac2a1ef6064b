//! Capture Replay
//!
//! Feeds the inbound frames of a capture file through the audio mixer
//! and plays them on this machine, paced by the recorded timestamps.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carlink_core::{
    audio::{device::list_output_devices, AudioMixer, CpalBackend, MixerHost, StreamVolumes, UiEvent},
    config::{AppConfig, MixerSettings},
    link::{CaptureReader, Direction},
    protocol::{decode_header, decode_message, DecodedMessage},
};

/// Longest pause honoured between two frames
const MAX_GAP: Duration = Duration::from_secs(2);

/// Host that logs what the mixer would send to the UI
struct LoggingHost {
    settings: MixerSettings,
}

impl MixerHost for LoggingHost {
    fn config(&self) -> MixerSettings {
        self.settings.clone()
    }

    fn send_ui_event(&self, event: UiEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!("UI event: {}", json),
            Err(e) => tracing::warn!("Cannot serialize UI event: {}", e),
        }
    }

    fn send_chunked(&self, _channel: &str, _data: &[u8], _chunk_size: usize, _extra: Option<serde_json::Value>) {}

    fn send_mic_pcm(&self, samples: Vec<i16>) {
        tracing::trace!("Mic chunk of {} samples", samples.len());
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        println!("Usage: carlink-replay <capture-file> [output-device]");
        println!("\n=== Output Devices ===");
        for name in list_output_devices() {
            println!("  {}", name);
        }
        bail!("no capture file given");
    };
    let output_device = args.next();

    let config = AppConfig::load_default().unwrap_or_else(|e| {
        tracing::warn!("Config unavailable ({}), using defaults", e);
        AppConfig::default()
    });

    let host = Arc::new(LoggingHost {
        settings: config.mixer_settings(),
    });
    let mut mixer = AudioMixer::new(host, Box::new(CpalBackend::new(output_device)));
    mixer.set_initial_volumes(StreamVolumes::from(&config.mixer).into());

    let reader = CaptureReader::open(&path).with_context(|| format!("opening {}", path.display()))?;
    tracing::info!("Replaying {}", path.display());

    let mut last_timestamp = None;
    let mut frames = 0usize;
    let mut skipped = 0usize;

    for record in reader {
        let record = record.context("reading capture")?;
        if record.direction != Direction::Inbound {
            continue;
        }

        if let Some(previous) = last_timestamp {
            let gap = (record.timestamp - previous).to_std().unwrap_or_default();
            std::thread::sleep(gap.min(MAX_GAP));
        }
        last_timestamp = Some(record.timestamp);

        let message = match decode_header(&record.header).and_then(|h| decode_message(&h, record.payload.clone())) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Skipping frame: {}", e);
                skipped += 1;
                continue;
            }
        };

        match &message {
            DecodedMessage::AudioData(_) | DecodedMessage::VideoData(_) | DecodedMessage::NaviVideoData(_) => {}
            other => tracing::debug!("{:?}", other),
        }
        mixer.handle_message(&message);
        frames += 1;
    }

    mixer.reset_for_session_stop();
    tracing::info!("Replay finished: {} frames, {} skipped", frames, skipped);
    Ok(())
}
