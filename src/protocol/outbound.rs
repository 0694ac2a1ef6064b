//! Host → adapter messages

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::config::DongleConfig;
use crate::protocol::header::{put_header, HEADER_SIZE};
use crate::protocol::types::{Command, MessageType, MultiTouchAction, TouchAction, AUDIO_TYPE_MIC, MIC_DECODE_TYPE};

/// Fixed-point range of single-touch coordinates
pub const TOUCH_SCALE: f32 = 10_000.0;

/// One contact of a multi-touch frame, coordinates normalized to [0,1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub x: f32,
    pub y: f32,
    pub action: MultiTouchAction,
    pub id: u32,
}

/// Video/session parameters of the `Open` handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: u32,
    pub packet_max: u32,
    pub i_box_version: u32,
    pub phone_work_mode: u32,
}

impl OpenSettings {
    pub const WIRE_SIZE: usize = 28;
}

impl From<&DongleConfig> for OpenSettings {
    fn from(config: &DongleConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            format: config.format,
            packet_max: config.packet_max,
            i_box_version: config.i_box_version,
            phone_work_mode: config.phone_work_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NaviScreenInfo {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// JSON body of the `BoxSettings` message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxSettings {
    #[serde(rename = "mediaDelay")]
    pub media_delay: u32,
    #[serde(rename = "syncTime")]
    pub sync_time: i64,
    #[serde(rename = "androidAutoSizeW")]
    pub android_auto_width: u32,
    #[serde(rename = "androidAutoSizeH")]
    pub android_auto_height: u32,
    #[serde(rename = "WiFiChannel")]
    pub wifi_channel: u32,
    #[serde(rename = "mediaSound")]
    pub media_sound: u32,
    #[serde(rename = "callQuality")]
    pub call_quality: u32,
    #[serde(rename = "autoPlay")]
    pub auto_play: bool,
    #[serde(rename = "autoConn")]
    pub auto_connect: bool,
    #[serde(rename = "wifiName")]
    pub wifi_name: String,
    #[serde(rename = "btName")]
    pub bt_name: String,
    #[serde(rename = "boxName")]
    pub box_name: String,
    #[serde(rename = "OemName")]
    pub car_name: String,
    #[serde(rename = "naviScreenInfo", skip_serializing_if = "Option::is_none")]
    pub navi_screen: Option<NaviScreenInfo>,
}

impl BoxSettings {
    /// Build from config; `sync_time` is unix seconds
    pub fn from_config(config: &DongleConfig, sync_time: i64) -> Self {
        Self {
            media_delay: config.media_delay_ms,
            sync_time,
            android_auto_width: config.width,
            android_auto_height: config.height,
            wifi_channel: config.wifi_channel,
            media_sound: config.media_sound,
            call_quality: config.call_quality,
            auto_play: config.auto_play,
            auto_connect: config.auto_connect,
            wifi_name: config.box_name.clone(),
            bt_name: config.box_name.clone(),
            box_name: config.box_name.clone(),
            car_name: config.car_name.clone(),
            navi_screen: config.nav_screen.as_ref().map(|nav| NaviScreenInfo {
                width: nav.width,
                height: nav.height,
                fps: nav.fps,
            }),
        }
    }
}

/// Messages the host sends to the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Open(OpenSettings),
    Command(Command),
    Touch { action: TouchAction, x: f32, y: f32 },
    MultiTouch(Vec<TouchPoint>),
    /// Captured microphone PCM, 16 kHz mono
    MicAudio(Vec<i16>),
    SendFile { path: String, content: Bytes },
    BoxSettings(BoxSettings),
    HeartBeat,
    DisconnectPhone,
    CloseDongle,
}

impl OutboundMessage {
    pub fn send_number(path: &str, value: u32) -> Self {
        Self::SendFile {
            path: path.to_string(),
            content: Bytes::copy_from_slice(&value.to_le_bytes()),
        }
    }

    pub fn send_bool(path: &str, value: bool) -> Self {
        Self::send_number(path, value as u32)
    }

    pub fn send_string(path: &str, value: &str) -> Self {
        Self::SendFile {
            path: path.to_string(),
            content: Bytes::copy_from_slice(value.as_bytes()),
        }
    }

    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Open(_) => MessageType::Open,
            Self::Command(_) => MessageType::Command,
            Self::Touch { .. } => MessageType::Touch,
            Self::MultiTouch(_) => MessageType::MultiTouch,
            Self::MicAudio(_) => MessageType::AudioData,
            Self::SendFile { .. } => MessageType::SendFile,
            Self::BoxSettings(_) => MessageType::BoxSettings,
            Self::HeartBeat => MessageType::HeartBeat,
            Self::DisconnectPhone => MessageType::DisconnectPhone,
            Self::CloseDongle => MessageType::CloseDongle,
        }
    }

    /// Short description for logs and captures
    pub fn name(&self) -> String {
        match self {
            Self::Command(cmd) => format!("Command({:?})", cmd),
            Self::SendFile { path, .. } => format!("SendFile({})", path),
            other => format!("{:?}", other.msg_type()),
        }
    }

    /// Serialize the type-specific payload
    pub fn payload(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.put_payload(&mut buf);
        buf.freeze()
    }

    fn put_payload(&self, buf: &mut BytesMut) {
        match self {
            Self::Open(open) => {
                buf.reserve(OpenSettings::WIRE_SIZE);
                buf.put_u32_le(open.width);
                buf.put_u32_le(open.height);
                buf.put_u32_le(open.fps);
                buf.put_u32_le(open.format);
                buf.put_u32_le(open.packet_max);
                buf.put_u32_le(open.i_box_version);
                buf.put_u32_le(open.phone_work_mode);
            }
            Self::Command(cmd) => buf.put_u32_le(cmd.value()),
            Self::Touch { action, x, y } => {
                buf.put_u32_le(*action as u32);
                buf.put_u32_le(scale_touch(*x));
                buf.put_u32_le(scale_touch(*y));
                buf.put_u32_le(0);
            }
            Self::MultiTouch(points) => {
                buf.reserve(points.len() * 16);
                for point in points {
                    buf.put_f32_le(point.x);
                    buf.put_f32_le(point.y);
                    buf.put_u32_le(point.action as u32);
                    buf.put_u32_le(point.id);
                }
            }
            Self::MicAudio(pcm) => {
                buf.reserve(12 + pcm.len() * 2);
                buf.put_u32_le(MIC_DECODE_TYPE);
                buf.put_f32_le(0.0);
                buf.put_u32_le(AUDIO_TYPE_MIC);
                for sample in pcm {
                    buf.put_i16_le(*sample);
                }
            }
            Self::SendFile { path, content } => {
                buf.put_u32_le(path.len() as u32 + 1);
                buf.put_slice(path.as_bytes());
                buf.put_u8(0);
                buf.put_u32_le(content.len() as u32);
                buf.put_slice(content);
            }
            Self::BoxSettings(settings) => {
                // Serializing plain structs of strings and numbers cannot fail
                let json = serde_json::to_vec(settings).unwrap_or_default();
                buf.put_slice(&json);
            }
            Self::HeartBeat | Self::DisconnectPhone | Self::CloseDongle => {}
        }
    }
}

/// Normalized [0,1] coordinate to the 0..=10000 fixed-point range
pub fn scale_touch(value: f32) -> u32 {
    let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    (clamped * TOUCH_SCALE).round() as u32
}

/// A fully framed outbound message
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub header: Bytes,
    pub payload: Bytes,
    /// Header and payload concatenated into one transfer
    pub bytes: Bytes,
}

/// Header plus payload for one transfer
pub fn encode_message(message: &OutboundMessage) -> EncodedFrame {
    let payload = message.payload();
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    put_header(&mut buf, message.msg_type().code(), payload.len());
    buf.put_slice(&payload);
    let bytes = buf.freeze();
    EncodedFrame {
        header: bytes.slice(..HEADER_SIZE),
        payload,
        bytes,
    }
}
