//! Audio session mixer
//!
//! Routes every inbound audio frame to a logical stream and an output
//! sink. Music is gate-muted until its start delay and warmup pass, then
//! faded in, ducked under nav prompts and mixed with queued nav PCM.
//!
//! All state is owned by one [`AudioMixer`] and mutated only from
//! `handle_*` calls, which the host must not run concurrently.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::backend::{
    downmix_to_mono_bytes, AttentionKind, AudioBackend, MicCapture, MixerHost, PcmSink, SinkKey, UiEvent,
    VISUALIZER_CHANNEL,
};
use crate::audio::fade::{clamp16, gain_from_volume, FadeState, DUCK_GAIN};
use crate::audio::nav_queue::NavQueue;
use crate::audio::stream::{classify, LogicalStream};
use crate::config::{MixerConfig, MixerSettings};
use crate::protocol::inbound::{AudioData, AudioPayload, DecodedMessage};
use crate::protocol::types::{AudioCommand, AudioFormat};

/// Silence between music chunks that forces a sink restart
pub const GAP_RESYNC_THRESHOLD: Duration = Duration::from_millis(500);

/// Per-stream volume, 0..1
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamVolumes {
    pub music: f32,
    pub nav: f32,
    pub siri: f32,
    pub call: f32,
}

impl Default for StreamVolumes {
    fn default() -> Self {
        Self {
            music: 1.0,
            nav: 1.0,
            siri: 1.0,
            call: 1.0,
        }
    }
}

impl From<&MixerConfig> for StreamVolumes {
    fn from(config: &MixerConfig) -> Self {
        Self {
            music: config.music_volume,
            nav: config.nav_volume,
            siri: config.siri_volume,
            call: config.call_volume,
        }
    }
}

impl StreamVolumes {
    pub fn get(&self, stream: LogicalStream) -> f32 {
        match stream {
            LogicalStream::Music => self.music,
            LogicalStream::Nav => self.nav,
            LogicalStream::Siri => self.siri,
            LogicalStream::Call => self.call,
        }
    }

    pub fn set(&mut self, stream: LogicalStream, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        match stream {
            LogicalStream::Music => self.music = volume,
            LogicalStream::Nav => self.nav = volume,
            LogicalStream::Siri => self.siri = volume,
            LogicalStream::Call => self.call = volume,
        }
    }
}

/// Partial volume update; absent streams keep their value
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct StreamVolumesUpdate {
    pub music: Option<f32>,
    pub nav: Option<f32>,
    pub siri: Option<f32>,
    pub call: Option<f32>,
}

impl From<StreamVolumes> for StreamVolumesUpdate {
    fn from(volumes: StreamVolumes) -> Self {
        Self {
            music: Some(volumes.music),
            nav: Some(volumes.nav),
            siri: Some(volumes.siri),
            call: Some(volumes.call),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Attention {
    call: bool,
    siri: bool,
    nav: bool,
}

impl Attention {
    fn flag(&mut self, kind: AttentionKind) -> &mut bool {
        match kind {
            AttentionKind::Call => &mut self.call,
            AttentionKind::Siri => &mut self.siri,
            AttentionKind::Nav => &mut self.nav,
        }
    }
}

/// Observable mixer state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixerSnapshot {
    pub media_active: bool,
    pub siri_active: bool,
    pub phonecall_active: bool,
    pub nav_active: bool,
    pub audio_open_armed: bool,
    pub music_gate_muted: bool,
    pub fade_current: f32,
    pub fade_target: f32,
    pub nav_queued: usize,
    pub open_sinks: usize,
    pub mic_active: bool,
}

pub struct AudioMixer {
    host: Arc<dyn MixerHost>,
    backend: Box<dyn AudioBackend>,
    volumes: StreamVolumes,
    sinks: HashMap<SinkKey, Box<dyn PcmSink>>,
    /// Sink each stream wrote to most recently
    last_sink: HashMap<LogicalStream, SinkKey>,
    fade: FadeState,
    media_active: bool,
    siri_active: bool,
    call_active: bool,
    nav_active: bool,
    audio_open_armed: bool,
    music_gate_muted: bool,
    attention: Attention,
    ramp_start_at: Option<Instant>,
    warmup_until: Option<Instant>,
    nav_hold_until: Option<Instant>,
    last_music_at: Option<Instant>,
    nav_queue: NavQueue,
    mic: Option<Box<dyn MicCapture>>,
    visualizer_enabled: bool,
    scratch: Vec<i16>,
}

impl AudioMixer {
    pub fn new(host: Arc<dyn MixerHost>, backend: Box<dyn AudioBackend>) -> Self {
        Self {
            host,
            backend,
            volumes: StreamVolumes::default(),
            sinks: HashMap::new(),
            last_sink: HashMap::new(),
            fade: FadeState::silent(),
            media_active: false,
            siri_active: false,
            call_active: false,
            nav_active: false,
            audio_open_armed: false,
            music_gate_muted: true,
            attention: Attention::default(),
            ramp_start_at: None,
            warmup_until: None,
            nav_hold_until: None,
            last_music_at: None,
            nav_queue: NavQueue::new(),
            mic: None,
            visualizer_enabled: false,
            scratch: Vec::new(),
        }
    }

    pub fn volumes(&self) -> StreamVolumes {
        self.volumes
    }

    pub fn set_stream_volume(&mut self, stream: LogicalStream, volume: f32) {
        self.volumes.set(stream, volume);
        tracing::debug!("{} volume set to {:.2}", stream, self.volumes.get(stream));
    }

    pub fn set_initial_volumes(&mut self, update: StreamVolumesUpdate) {
        let pairs = [
            (LogicalStream::Music, update.music),
            (LogicalStream::Nav, update.nav),
            (LogicalStream::Siri, update.siri),
            (LogicalStream::Call, update.call),
        ];
        for (stream, volume) in pairs {
            if let Some(volume) = volume {
                self.volumes.set(stream, volume);
            }
        }
    }

    pub fn set_visualizer_enabled(&mut self, enabled: bool) {
        self.visualizer_enabled = enabled;
    }

    pub fn reset_for_session_start(&mut self) {
        tracing::info!("Resetting mixer for session start");
        self.reset();
    }

    pub fn reset_for_session_stop(&mut self) {
        tracing::info!("Resetting mixer for session stop");
        self.reset();
    }

    pub fn snapshot(&self) -> MixerSnapshot {
        MixerSnapshot {
            media_active: self.media_active,
            siri_active: self.siri_active,
            phonecall_active: self.call_active,
            nav_active: self.nav_active,
            audio_open_armed: self.audio_open_armed,
            music_gate_muted: self.music_gate_muted,
            fade_current: self.fade.current,
            fade_target: self.fade.target(),
            nav_queued: self.nav_queue.len(),
            open_sinks: self.sinks.len(),
            mic_active: self.mic.is_some(),
        }
    }

    /// Feed any link message; session boundaries reset the mixer
    pub fn handle_message(&mut self, message: &DecodedMessage) {
        match message {
            DecodedMessage::AudioData(audio) => self.handle_audio_data(audio),
            DecodedMessage::Plugged { .. } => self.reset_for_session_start(),
            DecodedMessage::Unplugged => self.reset_for_session_stop(),
            _ => {}
        }
    }

    pub fn handle_audio_data(&mut self, audio: &AudioData) {
        self.handle_audio_data_at(audio, Instant::now());
    }

    /// Same as [`handle_audio_data`](Self::handle_audio_data) with an explicit clock
    pub fn handle_audio_data_at(&mut self, audio: &AudioData, now: Instant) {
        match &audio.payload {
            AudioPayload::Command(command) => self.handle_command(*command, now),
            AudioPayload::VolumeDuration(duration) => {
                tracing::debug!("Volume {:.2} over {:.2}s (type {})", audio.volume, duration, audio.audio_type);
            }
            AudioPayload::Pcm(samples) => self.handle_pcm(audio, samples, now),
        }
    }

    fn handle_command(&mut self, command: AudioCommand, now: Instant) {
        tracing::debug!("Audio command {:?}", command);
        let settings = self.host.config();

        match command {
            AudioCommand::OutputStart => {
                if !self.media_active {
                    self.audio_open_armed = true;
                }
            }
            AudioCommand::OutputStop => self.audio_open_armed = false,
            AudioCommand::MediaStart => {
                if self.audio_open_armed {
                    self.audio_open_armed = false;
                    self.begin_music(now, &settings);
                } else if !self.media_active {
                    tracing::debug!("Media start without output start");
                    self.begin_music(now, &settings);
                }
            }
            AudioCommand::MediaStop => self.end_music(),
            AudioCommand::NaviStart | AudioCommand::TurnByTurnStart => {
                self.set_attention(AttentionKind::Nav, true);
                self.nav_active = true;
                self.nav_queue.clear();
                if self.music_foreground() {
                    self.fade.arm(DUCK_GAIN);
                }
            }
            AudioCommand::NaviStop | AudioCommand::TurnByTurnStop => {
                self.set_attention(AttentionKind::Nav, false);
                self.nav_active = false;
                self.nav_queue.clear();
                self.nav_hold_until = Some(now + settings.nav_resume_delay);
                if !self.media_active {
                    self.stop_stream(LogicalStream::Nav);
                }
            }
            AudioCommand::SiriStart => {
                self.set_attention(AttentionKind::Siri, true);
                self.begin_voice(LogicalStream::Siri, &settings);
            }
            AudioCommand::SiriStop => {
                self.set_attention(AttentionKind::Siri, false);
                self.end_voice(LogicalStream::Siri);
            }
            AudioCommand::IncomingCallRing => self.set_attention(AttentionKind::Call, true),
            AudioCommand::PhonecallStart => {
                self.set_attention(AttentionKind::Call, true);
                self.begin_voice(LogicalStream::Call, &settings);
            }
            AudioCommand::PhonecallStop => {
                self.set_attention(AttentionKind::Call, false);
                self.end_voice(LogicalStream::Call);
            }
            AudioCommand::InputConfig
            | AudioCommand::AlertStart
            | AudioCommand::AlertStop
            | AudioCommand::Unknown(_) => {}
        }
    }

    fn set_attention(&mut self, kind: AttentionKind, active: bool) {
        let flag = self.attention.flag(kind);
        if *flag == active {
            return;
        }
        *flag = active;
        self.host.send_ui_event(UiEvent::Attention { kind, active });
    }

    fn music_foreground(&self) -> bool {
        self.media_active && !self.siri_active && !self.call_active
    }

    fn desired_target(&self, now: Instant) -> f32 {
        let holding = self.nav_hold_until.map_or(false, |until| now < until);
        if self.nav_active || holding {
            DUCK_GAIN
        } else {
            1.0
        }
    }

    fn mute_music(&mut self) {
        self.fade = FadeState::silent();
        self.music_gate_muted = true;
    }

    fn begin_music(&mut self, now: Instant, settings: &MixerSettings) {
        self.media_active = true;
        self.ramp_start_at = Some(now + settings.media_delay + settings.warmup);
        self.mute_music();
    }

    fn end_music(&mut self) {
        self.media_active = false;
        self.ramp_start_at = None;
        self.last_music_at = None;
        self.nav_queue.clear();
        self.mute_music();
        self.stop_stream(LogicalStream::Music);
    }

    fn begin_voice(&mut self, stream: LogicalStream, settings: &MixerSettings) {
        if settings.audio_transfer_mode {
            tracing::debug!("{} start ignored: audio transfer mode", stream);
            return;
        }
        match stream {
            LogicalStream::Siri => self.siri_active = true,
            LogicalStream::Call => self.call_active = true,
            _ => return,
        }
        self.mute_music();
        self.start_mic();
    }

    fn end_voice(&mut self, stream: LogicalStream) {
        match stream {
            LogicalStream::Siri => self.siri_active = false,
            LogicalStream::Call => self.call_active = false,
            _ => return,
        }
        self.stop_stream(stream);
        if !self.siri_active && !self.call_active {
            self.stop_mic();
        }
    }

    fn start_mic(&mut self) {
        if self.mic.is_some() {
            return;
        }
        let host = Arc::clone(&self.host);
        match self.backend.open_mic(Box::new(move |pcm| host.send_mic_pcm(pcm))) {
            Ok(mic) => {
                tracing::debug!("Microphone capture started");
                self.mic = Some(mic);
            }
            Err(e) => tracing::warn!("Microphone unavailable: {}", e),
        }
    }

    fn stop_mic(&mut self) {
        if let Some(mut mic) = self.mic.take() {
            mic.stop();
            tracing::debug!("Microphone capture stopped");
        }
    }

    fn handle_pcm(&mut self, audio: &AudioData, samples: &[i16], now: Instant) {
        let Some(stream) = classify(audio, self.siri_active, self.call_active) else {
            tracing::trace!("Dropping stray voice frame ({} samples)", samples.len());
            return;
        };
        let Some(format) = audio.format() else {
            tracing::debug!("Unknown decode type {}", audio.decode_type);
            return;
        };

        match stream {
            LogicalStream::Music => self.process_music(samples, format, now),
            LogicalStream::Nav => self.process_nav(samples, format),
            LogicalStream::Siri | LogicalStream::Call => self.play_direct(stream, samples, format),
        }
    }

    fn process_nav(&mut self, samples: &[i16], format: AudioFormat) {
        let mixing = self.music_foreground()
            && self.nav_active
            && self.last_sink.get(&LogicalStream::Music) == Some(&format);
        if mixing {
            self.nav_queue.push(samples.to_vec());
        } else {
            self.play_direct(LogicalStream::Nav, samples, format);
        }
    }

    fn play_direct(&mut self, stream: LogicalStream, samples: &[i16], format: AudioFormat) {
        let gain = gain_from_volume(self.volumes.get(stream));
        let mut out = std::mem::take(&mut self.scratch);
        out.clear();
        out.extend(samples.iter().map(|&s| clamp16(s as f32 * gain)));
        self.write(stream, format, &out);
        self.scratch = out;
    }

    fn process_music(&mut self, samples: &[i16], format: AudioFormat, now: Instant) {
        let settings = self.host.config();

        if let Some(last) = self.last_music_at {
            let gap = now.saturating_duration_since(last);
            if gap > GAP_RESYNC_THRESHOLD {
                tracing::debug!("Music gap of {:?}, resyncing output", gap);
                self.stop_stream(LogicalStream::Music);
                self.mute_music();
                self.warmup_until = Some(now + settings.warmup);
            }
        }
        self.last_music_at = Some(now);

        let gated = self.ramp_start_at.max(self.warmup_until).map_or(false, |until| now < until);
        let mut out = std::mem::take(&mut self.scratch);
        out.clear();

        if !self.music_foreground() || gated {
            self.music_gate_muted = true;
            out.resize(samples.len(), 0);
            // Queued nav prompts still play during the warmup gate; only
            // the music itself is zero-filled until the gate opens.
            if self.music_foreground() && self.nav_active {
                self.mix_nav_only(&mut out);
            }
        } else {
            let target = self.desired_target(now);
            if self.music_gate_muted {
                self.music_gate_muted = false;
                self.fade.arm_from_zero(target);
            } else {
                self.fade.retarget(target);
            }
            self.fade.begin(format);

            let music_gain = gain_from_volume(self.volumes.music);
            let nav_gain = self.nav_gain();
            let mix_nav = nav_gain > 0.0 && !self.nav_queue.is_empty();

            out.reserve(samples.len());
            for &sample in samples {
                let mut value = sample as f32 * self.fade.next_gain() * music_gain;
                if mix_nav {
                    if let Some(nav) = self.nav_queue.pop_sample() {
                        value += nav as f32 * nav_gain;
                    }
                }
                out.push(clamp16(value));
            }
        }

        self.write(LogicalStream::Music, format, &out);
        self.scratch = out;
    }

    fn nav_gain(&self) -> f32 {
        if self.nav_active {
            gain_from_volume(self.volumes.nav)
        } else {
            0.0
        }
    }

    /// Nav prompts stay audible while music is still gate-muted
    fn mix_nav_only(&mut self, out: &mut [i16]) {
        let nav_gain = self.nav_gain();
        if nav_gain <= 0.0 {
            return;
        }
        for slot in out.iter_mut() {
            match self.nav_queue.pop_sample() {
                Some(nav) => *slot = clamp16(nav as f32 * nav_gain),
                None => break,
            }
        }
    }

    fn write(&mut self, stream: LogicalStream, key: SinkKey, samples: &[i16]) {
        if !self.sinks.contains_key(&key) {
            match self.backend.open_sink(key) {
                Ok(sink) => {
                    tracing::debug!("Opened {} Hz/{}ch sink for {}", key.sample_rate, key.channels, stream);
                    self.sinks.insert(key, sink);
                }
                Err(e) => {
                    tracing::warn!("Cannot open {} Hz/{}ch sink: {}", key.sample_rate, key.channels, e);
                    return;
                }
            }
        }
        self.last_sink.insert(stream, key);
        if let Some(sink) = self.sinks.get_mut(&key) {
            sink.write(samples);
        }

        if self.visualizer_enabled {
            let chunk_size = self.host.config().visualizer_chunk_size;
            let mono = downmix_to_mono_bytes(samples, key.channels);
            let extra = serde_json::json!({ "stream": stream.name(), "sampleRate": key.sample_rate });
            self.host.send_chunked(VISUALIZER_CHANNEL, &mono, chunk_size, Some(extra));
        }
    }

    /// Tear down the sink `stream` last wrote to
    fn stop_stream(&mut self, stream: LogicalStream) {
        let Some(key) = self.last_sink.remove(&stream) else {
            return;
        };
        if let Some(mut sink) = self.sinks.remove(&key) {
            sink.stop();
            tracing::debug!("Stopped {} Hz/{}ch sink of {}", key.sample_rate, key.channels, stream);
        }
    }

    fn stop_all_sinks(&mut self) {
        for (_, mut sink) in self.sinks.drain() {
            sink.stop();
        }
        self.last_sink.clear();
    }

    fn reset(&mut self) {
        self.stop_all_sinks();
        self.stop_mic();
        self.fade = FadeState::silent();
        self.media_active = false;
        self.siri_active = false;
        self.call_active = false;
        self.nav_active = false;
        self.audio_open_armed = false;
        self.music_gate_muted = true;
        self.attention = Attention::default();
        self.ramp_start_at = None;
        self.warmup_until = None;
        self.nav_hold_until = None;
        self.last_music_at = None;
        self.nav_queue.clear();
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        self.stop_all_sinks();
        self.stop_mic();
    }
}
