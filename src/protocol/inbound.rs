//! Adapter → host messages

use bytes::{Buf, Bytes};

use crate::error::ProtocolError;
use crate::protocol::header::Header;
use crate::protocol::outbound::OpenSettings;
use crate::protocol::types::{AudioCommand, AudioFormat, Command, MessageType, AUDIO_TYPE_MIC};

/// Size of the sub-header preceding video frame bytes
pub const VIDEO_HEADER_SIZE: usize = 20;

/// Size of the sub-header preceding audio payloads
pub const AUDIO_HEADER_SIZE: usize = 12;

/// One encoded video frame (main or navigation screen)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub flags: u32,
    pub length: u32,
    pub unknown: u32,
    pub data: Bytes,
}

/// What follows the 12-byte audio sub-header
#[derive(Debug, Clone, PartialEq)]
pub enum AudioPayload {
    Command(AudioCommand),
    VolumeDuration(f32),
    Pcm(Vec<i16>),
}

/// Audio frame on the shared audio channel
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    pub decode_type: u32,
    pub volume: f32,
    pub audio_type: u32,
    pub payload: AudioPayload,
}

impl AudioData {
    pub fn command(decode_type: u32, audio_type: u32, command: AudioCommand) -> Self {
        Self {
            decode_type,
            volume: 0.0,
            audio_type,
            payload: AudioPayload::Command(command),
        }
    }

    pub fn pcm(decode_type: u32, audio_type: u32, samples: Vec<i16>) -> Self {
        Self {
            decode_type,
            volume: 0.0,
            audio_type,
            payload: AudioPayload::Pcm(samples),
        }
    }

    pub fn format(&self) -> Option<AudioFormat> {
        AudioFormat::from_decode_type(self.decode_type)
    }
}

/// Now-playing metadata
#[derive(Debug, Clone, PartialEq)]
pub enum MediaData {
    Json(serde_json::Value),
    AlbumCover(Bytes),
    Unknown { kind: u32, data: Bytes },
}

/// Every message the adapter may send, fully decoded
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Opened(OpenSettings),
    Plugged { phone_type: u32, wifi: Option<u32> },
    Unplugged,
    Phase(u32),
    VideoData(VideoFrame),
    NaviVideoData(VideoFrame),
    AudioData(AudioData),
    MediaData(MediaData),
    Command(Command),
    SoftwareVersion(String),
    BoxInfo(serde_json::Value),
    BluetoothAddress(String),
    BluetoothPin(String),
    BluetoothDeviceName(String),
    WifiDeviceName(String),
    BluetoothPairedList(String),
    HiCarLink(String),
    ManufacturerInfo { a: u32, b: u32 },
    BoxUpdateProgress(i32),
    BoxUpdateState(i32),
    HeartBeat,
    /// Unrecognized or proprietary type, kept raw
    VendorBlob { msg_type: u32, data: Bytes },
}

impl DecodedMessage {
    pub fn is_vendor_blob(&self) -> bool {
        matches!(self, Self::VendorBlob { .. })
    }
}

fn need(payload: &Bytes, len: usize, kind: &'static str) -> Result<(), ProtocolError> {
    if payload.len() < len {
        return Err(ProtocolError::ShortPayload {
            kind,
            len: payload.len(),
        });
    }
    Ok(())
}

fn ascii(payload: &[u8]) -> String {
    let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

fn json(payload: &[u8]) -> Result<serde_json::Value, ProtocolError> {
    let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
    serde_json::from_slice(&payload[..end]).map_err(|e| ProtocolError::Json(e.to_string()))
}

fn video(mut payload: Bytes) -> Result<VideoFrame, ProtocolError> {
    need(&payload, VIDEO_HEADER_SIZE, "video")?;
    let width = payload.get_u32_le();
    let height = payload.get_u32_le();
    let flags = payload.get_u32_le();
    let length = payload.get_u32_le();
    let unknown = payload.get_u32_le();
    Ok(VideoFrame {
        width,
        height,
        flags,
        length,
        unknown,
        data: payload,
    })
}

fn audio(mut payload: Bytes) -> Result<AudioData, ProtocolError> {
    need(&payload, AUDIO_HEADER_SIZE, "audio")?;
    let decode_type = payload.get_u32_le();
    let volume = payload.get_f32_le();
    let audio_type = payload.get_u32_le();

    let payload = match payload.len() {
        _ if audio_type == AUDIO_TYPE_MIC => AudioPayload::Pcm(pcm(&payload)),
        1 => AudioPayload::Command(AudioCommand::from_u8(payload[0])),
        4 => AudioPayload::VolumeDuration(payload.get_f32_le()),
        _ => AudioPayload::Pcm(pcm(&payload)),
    };

    Ok(AudioData {
        decode_type,
        volume,
        audio_type,
        payload,
    })
}

fn pcm(payload: &[u8]) -> Vec<i16> {
    payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn media(mut payload: Bytes) -> Result<MediaData, ProtocolError> {
    need(&payload, 4, "media")?;
    let kind = payload.get_u32_le();
    Ok(match kind {
        1 => MediaData::Json(json(&payload)?),
        3 => MediaData::AlbumCover(payload),
        _ => MediaData::Unknown { kind, data: payload },
    })
}

/// Decode a payload according to its header type
///
/// Unrecognized types yield [`DecodedMessage::VendorBlob`] instead of an error.
pub fn decode_message(header: &Header, mut payload: Bytes) -> Result<DecodedMessage, ProtocolError> {
    if payload.len() != header.payload_len() {
        return Err(ProtocolError::PayloadLength {
            expected: header.payload_len(),
            actual: payload.len(),
        });
    }

    let Some(msg_type) = MessageType::from_u32(header.msg_type) else {
        return Ok(DecodedMessage::VendorBlob {
            msg_type: header.msg_type,
            data: payload,
        });
    };

    let message = match msg_type {
        MessageType::Open => {
            need(&payload, OpenSettings::WIRE_SIZE, "open")?;
            DecodedMessage::Opened(OpenSettings {
                width: payload.get_u32_le(),
                height: payload.get_u32_le(),
                fps: payload.get_u32_le(),
                format: payload.get_u32_le(),
                packet_max: payload.get_u32_le(),
                i_box_version: payload.get_u32_le(),
                phone_work_mode: payload.get_u32_le(),
            })
        }
        MessageType::Plugged => {
            need(&payload, 4, "plugged")?;
            let phone_type = payload.get_u32_le();
            let wifi = (payload.len() >= 4).then(|| payload.get_u32_le());
            DecodedMessage::Plugged { phone_type, wifi }
        }
        MessageType::Unplugged => DecodedMessage::Unplugged,
        MessageType::Phase => {
            need(&payload, 4, "phase")?;
            DecodedMessage::Phase(payload.get_u32_le())
        }
        MessageType::VideoData => DecodedMessage::VideoData(video(payload)?),
        MessageType::NaviVideoData => DecodedMessage::NaviVideoData(video(payload)?),
        MessageType::AudioData => DecodedMessage::AudioData(audio(payload)?),
        MessageType::MediaData => DecodedMessage::MediaData(media(payload)?),
        MessageType::Command => {
            need(&payload, 4, "command")?;
            DecodedMessage::Command(Command::from_u32(payload.get_u32_le()))
        }
        MessageType::SoftwareVersion => DecodedMessage::SoftwareVersion(ascii(&payload)),
        MessageType::BoxSettings => DecodedMessage::BoxInfo(json(&payload)?),
        MessageType::BluetoothAddress => DecodedMessage::BluetoothAddress(ascii(&payload)),
        MessageType::BluetoothPin => DecodedMessage::BluetoothPin(ascii(&payload)),
        MessageType::BluetoothDeviceName => DecodedMessage::BluetoothDeviceName(ascii(&payload)),
        MessageType::WifiDeviceName => DecodedMessage::WifiDeviceName(ascii(&payload)),
        MessageType::BluetoothPairedList => DecodedMessage::BluetoothPairedList(ascii(&payload)),
        MessageType::HiCarLink => DecodedMessage::HiCarLink(ascii(&payload)),
        MessageType::ManufacturerInfo => {
            need(&payload, 8, "manufacturer info")?;
            DecodedMessage::ManufacturerInfo {
                a: payload.get_u32_le(),
                b: payload.get_u32_le(),
            }
        }
        MessageType::BoxUpdateProgress => {
            need(&payload, 4, "update progress")?;
            DecodedMessage::BoxUpdateProgress(payload.get_i32_le())
        }
        MessageType::BoxUpdateState => {
            need(&payload, 4, "update state")?;
            DecodedMessage::BoxUpdateState(payload.get_i32_le())
        }
        MessageType::HeartBeat => DecodedMessage::HeartBeat,
        // Host-to-adapter types are never expected inbound
        MessageType::Touch
        | MessageType::MultiTouch
        | MessageType::SendFile
        | MessageType::LogoType
        | MessageType::DisconnectPhone
        | MessageType::CloseDongle => DecodedMessage::VendorBlob {
            msg_type: header.msg_type,
            data: payload,
        },
    };

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::header::{decode_header, HEADER_SIZE};
    use crate::protocol::outbound::{encode_message, OutboundMessage};
    use bytes::{BufMut, BytesMut};
    use proptest::prelude::*;

    fn roundtrip(message: &OutboundMessage) -> DecodedMessage {
        let frame = encode_message(message);
        let header = decode_header(&frame.bytes).unwrap();
        assert_eq!(header.msg_type, message.msg_type().code());
        decode_message(&header, frame.bytes.slice(HEADER_SIZE..)).unwrap()
    }

    fn frame(msg_type: u32, payload: &[u8]) -> (Header, Bytes) {
        (Header::new(msg_type, payload.len() as u32), Bytes::copy_from_slice(payload))
    }

    #[test]
    fn test_command_roundtrip() {
        let decoded = roundtrip(&OutboundMessage::Command(Command::Wifi5g));
        assert_eq!(decoded, DecodedMessage::Command(Command::Wifi5g));
    }

    #[test]
    fn test_open_roundtrip() {
        let open = OpenSettings {
            width: 1280,
            height: 720,
            fps: 60,
            format: 5,
            packet_max: 49152,
            i_box_version: 2,
            phone_work_mode: 2,
        };
        assert_eq!(roundtrip(&OutboundMessage::Open(open)), DecodedMessage::Opened(open));
    }

    #[test]
    fn test_mic_audio_roundtrip() {
        let pcm = vec![0, 1, -1, i16::MAX, i16::MIN];
        let decoded = roundtrip(&OutboundMessage::MicAudio(pcm.clone()));
        let DecodedMessage::AudioData(audio) = decoded else {
            panic!("expected audio");
        };
        assert_eq!(audio.decode_type, 5);
        assert_eq!(audio.audio_type, 3);
        assert_eq!(audio.payload, AudioPayload::Pcm(pcm));
    }

    #[test]
    fn test_two_sample_mic_audio_is_pcm() {
        let decoded = roundtrip(&OutboundMessage::MicAudio(vec![100, -100]));
        let DecodedMessage::AudioData(audio) = decoded else {
            panic!("expected audio");
        };
        assert_eq!(audio.payload, AudioPayload::Pcm(vec![100, -100]));
    }

    proptest! {
        #[test]
        fn prop_command_roundtrip(value in any::<u32>()) {
            let command = Command::from_u32(value);
            prop_assert_eq!(roundtrip(&OutboundMessage::Command(command)), DecodedMessage::Command(command));
        }

        #[test]
        fn prop_open_roundtrip(width in 1u32..4096, height in 1u32..4096, fps in 1u32..120) {
            let open = OpenSettings {
                width,
                height,
                fps,
                format: 5,
                packet_max: 49152,
                i_box_version: 2,
                phone_work_mode: 2,
            };
            prop_assert_eq!(roundtrip(&OutboundMessage::Open(open)), DecodedMessage::Opened(open));
        }

        #[test]
        fn prop_box_settings_roundtrip(media_delay in 0u32..5000, sync_time in 0i64..4_000_000_000, name in "[A-Za-z0-9 ]{0,16}") {
            let config = crate::config::DongleConfig {
                media_delay_ms: media_delay,
                box_name: name,
                ..Default::default()
            };
            let settings = crate::protocol::outbound::BoxSettings::from_config(&config, sync_time);
            let expected = serde_json::to_value(&settings).unwrap();
            prop_assert_eq!(roundtrip(&OutboundMessage::BoxSettings(settings)), DecodedMessage::BoxInfo(expected));
        }

        #[test]
        fn prop_mic_audio_roundtrip(pcm in prop::collection::vec(any::<i16>(), 0..600)) {
            let decoded = roundtrip(&OutboundMessage::MicAudio(pcm.clone()));
            prop_assert_eq!(decoded, DecodedMessage::AudioData(AudioData::pcm(5, 3, pcm)));
        }
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        assert_eq!(roundtrip(&OutboundMessage::HeartBeat), DecodedMessage::HeartBeat);
    }

    #[test]
    fn test_audio_command_and_volume() {
        let mut payload = BytesMut::new();
        payload.put_u32_le(4);
        payload.put_f32_le(1.0);
        payload.put_u32_le(1);
        payload.put_u8(10);
        let (header, bytes) = frame(0x07, &payload);
        assert_eq!(
            decode_message(&header, bytes).unwrap(),
            DecodedMessage::AudioData(AudioData {
                decode_type: 4,
                volume: 1.0,
                audio_type: 1,
                payload: AudioPayload::Command(AudioCommand::MediaStart),
            })
        );

        let mut payload = BytesMut::new();
        payload.put_u32_le(4);
        payload.put_f32_le(0.2);
        payload.put_u32_le(2);
        payload.put_f32_le(0.5);
        let (header, bytes) = frame(0x07, &payload);
        let DecodedMessage::AudioData(audio) = decode_message(&header, bytes).unwrap() else {
            panic!("expected audio");
        };
        assert_eq!(audio.payload, AudioPayload::VolumeDuration(0.5));
    }

    #[test]
    fn test_unknown_type_is_vendor_blob() {
        let (header, bytes) = frame(0x25, &[1, 2, 3]);
        let decoded = decode_message(&header, bytes).unwrap();
        assert!(decoded.is_vendor_blob());
        assert_eq!(
            decoded,
            DecodedMessage::VendorBlob {
                msg_type: 0x25,
                data: Bytes::from_static(&[1, 2, 3]),
            }
        );
    }

    #[test]
    fn test_strings_are_nul_trimmed() {
        let (header, bytes) = frame(0xCC, b"2025.02.25.1521CAY\0\0\0");
        assert_eq!(
            decode_message(&header, bytes).unwrap(),
            DecodedMessage::SoftwareVersion("2025.02.25.1521CAY".into())
        );
    }

    #[test]
    fn test_box_info_json() {
        let (header, bytes) = frame(0x19, br#"{"uuid":"abc","MFD":"20240101"}"#);
        let DecodedMessage::BoxInfo(info) = decode_message(&header, bytes).unwrap() else {
            panic!("expected box info");
        };
        assert_eq!(info["uuid"], "abc");
    }

    #[test]
    fn test_plugged_optional_wifi() {
        let (header, bytes) = frame(0x02, &3u32.to_le_bytes());
        assert_eq!(
            decode_message(&header, bytes).unwrap(),
            DecodedMessage::Plugged { phone_type: 3, wifi: None }
        );

        let mut payload = BytesMut::new();
        payload.put_u32_le(5);
        payload.put_u32_le(1);
        let (header, bytes) = frame(0x02, &payload);
        assert_eq!(
            decode_message(&header, bytes).unwrap(),
            DecodedMessage::Plugged { phone_type: 5, wifi: Some(1) }
        );
    }

    #[test]
    fn test_video_frame() {
        let mut payload = BytesMut::new();
        for value in [800u32, 480, 0, 3, 0] {
            payload.put_u32_le(value);
        }
        payload.put_slice(&[0, 0, 1]);
        let (header, bytes) = frame(0x06, &payload);
        let DecodedMessage::VideoData(video) = decode_message(&header, bytes).unwrap() else {
            panic!("expected video");
        };
        assert_eq!((video.width, video.height), (800, 480));
        assert_eq!(&video.data[..], &[0, 0, 1]);
    }

    #[test]
    fn test_short_and_mismatched_payloads() {
        let (header, bytes) = frame(0x08, &[1, 2]);
        assert!(matches!(
            decode_message(&header, bytes),
            Err(ProtocolError::ShortPayload { kind: "command", len: 2 })
        ));

        let header = Header::new(0x08, 4);
        assert_eq!(
            decode_message(&header, Bytes::from_static(&[1])),
            Err(ProtocolError::PayloadLength { expected: 4, actual: 1 })
        );
    }
}
