//! Logical stream classification
//!
//! Music, Siri and call audio share `audioType == 1`. Which one a frame
//! belongs to depends on the session flags at the time it is handled.

use serde::Serialize;
use std::fmt;

use crate::protocol::inbound::AudioData;
use crate::protocol::types::{AUDIO_TYPE_NAV, STRAY_VOICE_DECODE_TYPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalStream {
    Music,
    Nav,
    Siri,
    Call,
}

impl LogicalStream {
    pub const ALL: [LogicalStream; 4] = [Self::Music, Self::Nav, Self::Siri, Self::Call];

    pub fn name(self) -> &'static str {
        match self {
            Self::Music => "music",
            Self::Nav => "nav",
            Self::Siri => "siri",
            Self::Call => "call",
        }
    }
}

impl fmt::Display for LogicalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Narrowband layouts used for Siri and telephony
pub fn is_voice_decode_type(decode_type: u32) -> bool {
    matches!(decode_type, 3 | 5 | 6 | 7)
}

/// Pick the logical stream of a PCM frame
///
/// Returns `None` for a stray voice frame that arrives while neither Siri
/// nor a call is active.
pub fn classify(audio: &AudioData, siri_active: bool, call_active: bool) -> Option<LogicalStream> {
    if audio.audio_type == AUDIO_TYPE_NAV {
        return Some(LogicalStream::Nav);
    }

    if is_voice_decode_type(audio.decode_type) {
        if call_active {
            return Some(LogicalStream::Call);
        }
        if siri_active {
            return Some(LogicalStream::Siri);
        }
        if audio.decode_type == STRAY_VOICE_DECODE_TYPE {
            return None;
        }
    }
    Some(LogicalStream::Music)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(decode_type: u32, audio_type: u32) -> AudioData {
        AudioData::pcm(decode_type, audio_type, vec![0; 4])
    }

    #[test]
    fn test_nav_by_audio_type() {
        assert_eq!(classify(&pcm(2, 2), false, false), Some(LogicalStream::Nav));
        assert_eq!(classify(&pcm(5, 2), true, true), Some(LogicalStream::Nav));
    }

    #[test]
    fn test_main_channel_follows_session_flags() {
        assert_eq!(classify(&pcm(4, 1), false, false), Some(LogicalStream::Music));
        assert_eq!(classify(&pcm(5, 1), true, false), Some(LogicalStream::Siri));
        assert_eq!(classify(&pcm(3, 1), false, true), Some(LogicalStream::Call));
        assert_eq!(classify(&pcm(5, 1), true, true), Some(LogicalStream::Call));
        // Music layouts stay music even under Siri
        assert_eq!(classify(&pcm(4, 1), true, false), Some(LogicalStream::Music));
    }

    #[test]
    fn test_stray_voice_dropped() {
        assert_eq!(classify(&pcm(5, 1), false, false), None);
        assert_eq!(classify(&pcm(5, 0), false, false), None);
        assert_eq!(classify(&pcm(3, 1), false, false), Some(LogicalStream::Music));
    }
}
