//! Numeric tables of the adapter protocol

/// Frame type codes carried at header offset 8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    Open = 0x01,
    Plugged = 0x02,
    Phase = 0x03,
    Unplugged = 0x04,
    Touch = 0x05,
    VideoData = 0x06,
    AudioData = 0x07,
    Command = 0x08,
    LogoType = 0x09,
    BluetoothAddress = 0x0A,
    BluetoothPin = 0x0C,
    BluetoothDeviceName = 0x0D,
    WifiDeviceName = 0x0E,
    DisconnectPhone = 0x0F,
    BluetoothPairedList = 0x12,
    ManufacturerInfo = 0x14,
    CloseDongle = 0x15,
    MultiTouch = 0x17,
    HiCarLink = 0x18,
    BoxSettings = 0x19,
    MediaData = 0x2A,
    NaviVideoData = 0x2C,
    SendFile = 0x99,
    HeartBeat = 0xAA,
    BoxUpdateProgress = 0xB1,
    BoxUpdateState = 0xBB,
    SoftwareVersion = 0xCC,
}

impl MessageType {
    pub fn from_u32(value: u32) -> Option<Self> {
        use MessageType::*;
        Some(match value {
            0x01 => Open,
            0x02 => Plugged,
            0x03 => Phase,
            0x04 => Unplugged,
            0x05 => Touch,
            0x06 => VideoData,
            0x07 => AudioData,
            0x08 => Command,
            0x09 => LogoType,
            0x0A => BluetoothAddress,
            0x0C => BluetoothPin,
            0x0D => BluetoothDeviceName,
            0x0E => WifiDeviceName,
            0x0F => DisconnectPhone,
            0x12 => BluetoothPairedList,
            0x14 => ManufacturerInfo,
            0x15 => CloseDongle,
            0x17 => MultiTouch,
            0x18 => HiCarLink,
            0x19 => BoxSettings,
            0x2A => MediaData,
            0x2C => NaviVideoData,
            0x99 => SendFile,
            0xAA => HeartBeat,
            0xB1 => BoxUpdateProgress,
            0xBB => BoxUpdateState,
            0xCC => SoftwareVersion,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// Human readable name for a raw type code, used in logs and captures
pub fn type_name(code: u32) -> String {
    match MessageType::from_u32(code) {
        Some(t) => format!("{:?}", t),
        None => format!("Vendor({:#04x})", code),
    }
}

macro_rules! command_table {
    ($($name:ident = $value:literal),* $(,)?) => {
        /// Values of the 4-byte `Command` payload
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Command {
            $($name,)*
            Unknown(u32),
        }

        impl Command {
            pub fn from_u32(value: u32) -> Self {
                match value {
                    $($value => Self::$name,)*
                    other => Self::Unknown(other),
                }
            }

            pub fn value(self) -> u32 {
                match self {
                    $(Self::$name => $value,)*
                    Self::Unknown(v) => v,
                }
            }
        }
    };
}

command_table! {
    StartRecordAudio = 1,
    StopRecordAudio = 2,
    RequestHostUi = 3,
    Siri = 5,
    Mic = 7,
    Frame = 12,
    BoxMic = 15,
    EnableNightMode = 16,
    DisableNightMode = 17,
    AudioTransferOn = 22,
    AudioTransferOff = 23,
    Wifi24g = 24,
    Wifi5g = 25,
    Left = 100,
    Right = 101,
    SelectDown = 104,
    SelectUp = 105,
    Back = 106,
    Home = 200,
    Play = 201,
    Pause = 202,
    PlayOrPause = 203,
    Next = 204,
    Prev = 205,
    AcceptPhone = 300,
    RejectPhone = 301,
    RequestVideoFocus = 500,
    ReleaseVideoFocus = 501,
    WifiEnable = 1000,
    AutoConnectEnable = 1001,
    WifiConnect = 1002,
    ScanningDevice = 1003,
    DeviceFound = 1004,
    DeviceNotFound = 1005,
    ConnectDeviceFailed = 1006,
    BtConnected = 1007,
    BtDisconnected = 1008,
    WifiConnected = 1009,
    WifiDisconnected = 1010,
    BtPairStart = 1011,
    WifiPair = 1012,
}

/// Control values carried in a 1-byte audio payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCommand {
    OutputStart,
    OutputStop,
    InputConfig,
    PhonecallStart,
    PhonecallStop,
    NaviStart,
    NaviStop,
    SiriStart,
    SiriStop,
    MediaStart,
    MediaStop,
    AlertStart,
    AlertStop,
    IncomingCallRing,
    TurnByTurnStart,
    TurnByTurnStop,
    Unknown(u8),
}

impl AudioCommand {
    pub fn from_u8(value: u8) -> Self {
        use AudioCommand::*;
        match value {
            1 => OutputStart,
            2 => OutputStop,
            3 => InputConfig,
            4 => PhonecallStart,
            5 => PhonecallStop,
            6 => NaviStart,
            7 => NaviStop,
            8 => SiriStart,
            9 => SiriStop,
            10 => MediaStart,
            11 => MediaStop,
            12 => AlertStart,
            13 => AlertStop,
            14 => IncomingCallRing,
            16 => TurnByTurnStart,
            17 => TurnByTurnStop,
            other => Unknown(other),
        }
    }

    pub fn value(self) -> u8 {
        use AudioCommand::*;
        match self {
            OutputStart => 1,
            OutputStop => 2,
            InputConfig => 3,
            PhonecallStart => 4,
            PhonecallStop => 5,
            NaviStart => 6,
            NaviStop => 7,
            SiriStart => 8,
            SiriStop => 9,
            MediaStart => 10,
            MediaStop => 11,
            AlertStart => 12,
            AlertStop => 13,
            IncomingCallRing => 14,
            TurnByTurnStart => 16,
            TurnByTurnStop => 17,
            Unknown(v) => v,
        }
    }
}

/// Single-touch action codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchAction {
    Down = 14,
    Move = 15,
    Up = 16,
}

/// Multi-touch action codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiTouchAction {
    Up = 0,
    Down = 1,
    Move = 2,
}

/// PCM layout of an audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }

    /// Map a wire `decodeType` to its PCM layout
    pub fn from_decode_type(decode_type: u32) -> Option<Self> {
        Some(match decode_type {
            1 | 2 => Self::new(44100, 2),
            3 => Self::new(8000, 1),
            4 => Self::new(48000, 2),
            5 => Self::new(16000, 1),
            6 => Self::new(24000, 1),
            7 => Self::new(16000, 2),
            _ => return None,
        })
    }
}

/// Voice decode type dropped when neither Siri nor a call is active
pub const STRAY_VOICE_DECODE_TYPE: u32 = 5;

/// Wire `audioType` of the navigation channel
pub const AUDIO_TYPE_NAV: u32 = 2;

/// Wire `audioType` of the shared main/phone channel
pub const AUDIO_TYPE_MAIN: u32 = 1;

/// Wire `audioType` of microphone uplink frames; their body is always PCM
pub const AUDIO_TYPE_MIC: u32 = 3;

/// Wire `decodeType` of microphone uplink frames (16 kHz mono)
pub const MIC_DECODE_TYPE: u32 = 5;
