//! # Carlink Core
//!
//! USB link to a CarPlay / Android Auto wireless adapter, plus the audio
//! session mixer that turns the adapter's audio stream into host playback.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          USB ADAPTER ("dongle")                        │
//! └──────────────────────────────┬────────────────────────────────────────┘
//!                  bulk IN       │        bulk OUT
//!                                ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                     Dongle Link (link::dongle)                         │
//! │  ┌──────────────┐   ┌──────────────┐   ┌─────────────────────────┐    │
//! │  │  Read Loop   │   │  Send Lock   │   │ Heartbeat / WifiPair    │    │
//! │  │ header+body  │   │ (serialized) │   │ timers                  │    │
//! │  └──────┬───────┘   └──────▲───────┘   └───────────┬─────────────┘    │
//! │         │                  │                       │                  │
//! │         ▼                  │                       │                  │
//! │  ┌──────────────────────────────────────────────────────────────┐     │
//! │  │        Wire Codec (protocol) - 16 byte header + payload      │     │
//! │  └──────────────────────────────────────────────────────────────┘     │
//! └─────────┬─────────────────────────────────────────────────────────────┘
//!           │ LinkHandler::on_message
//!           ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                    Audio Session Mixer (audio::mixer)                  │
//! │   classify ──► Music (fade + nav mix) ──► PcmSink per format           │
//! │            ──► Nav / Siri / Call ──────► PcmSink per format            │
//! │   Siri / Call ──► mic capture ──► MixerHost::send_mic_pcm              │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mic PCM returns to the adapter through [`link::MicForwarder`], which
//! turns each chunk into a `MicAudio` frame on the link.

pub mod audio;
pub mod config;
pub mod error;
pub mod link;
pub mod protocol;

pub use error::{Error, Result};

