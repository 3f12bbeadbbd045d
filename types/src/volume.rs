//! Volume types, gain profiles and the stream/device info handed to the HAL.

use crate::device::AudioDeviceInfo;
use serde::{Deserialize, Serialize};

/// Highest level a volume slider reaches unless the HAL says otherwise.
pub const VOLUME_LEVEL_MAX: u32 = 15;

wire_enum! {
    /// User volume slider a stream belongs to.
    pub enum VolumeType {
        System = 0 => "SYSTEM",
        Notification = 1 => "NOTIFICATION",
        Alarm = 2 => "ALARM",
        Ringtone = 3 => "RINGTONE",
        Media = 4 => "MEDIA",
        Call = 5 => "CALL",
        Voip = 6 => "VOIP",
        Voice = 7 => "VOICE",
        Svoice = 8 => "SVOICE",
        /// Fixed acoustic level, unaffected by mute-all
        Fixed = 9 => "FIXED",
    }
}

impl VolumeType {
    /// Rank in the primary-volume list, lower wins.
    pub fn primary_priority(self) -> u32 {
        match self {
            VolumeType::System => 6,
            VolumeType::Notification => 5,
            VolumeType::Alarm => 4,
            VolumeType::Ringtone => 2,
            VolumeType::Media => 3,
            VolumeType::Call => 0,
            VolumeType::Voip => 1,
            VolumeType::Voice => 8,
            VolumeType::Svoice => 7,
            VolumeType::Fixed => 9,
        }
    }
}

wire_enum! {
    /// Volume-key owner categories published to the platform.
    pub enum PrimaryVolumeType {
        Call = 0 => "CALL",
        Voip = 1 => "VOIP",
        Ringtone = 2 => "RINGTONE",
        Media = 3 => "MEDIA",
        Alarm = 4 => "ALARM",
        Notification = 5 => "NOTIFICATION",
        System = 6 => "SYSTEM",
        ExtJava = 7 => "EXT_JAVA",
        Fixed = 8 => "FIXED",
        /// Also the rank given to capture streams
        Max = 9 => "MAX",
    }
}

wire_enum! {
    /// Fixed HAL-side gain profile.
    pub enum GainType {
        Default = 0 => "DEFAULT",
        Dialer = 1 => "DIALER",
        Touch = 2 => "TOUCH",
        Af = 3 => "AF",
        Shutter1 = 4 => "SHUTTER1",
        Shutter2 = 5 => "SHUTTER2",
        Camcoding = 6 => "CAMCODING",
        Midi = 7 => "MIDI",
        Booting = 8 => "BOOTING",
        Video = 9 => "VIDEO",
        Tts = 10 => "TTS",
        Tone = 11 => "TONE",
    }
}

impl GainType {
    pub fn is_shutter(self) -> bool {
        matches!(self, GainType::Shutter1 | GainType::Shutter2)
    }
}

wire_enum! {
    /// Direction of a volume fade.
    pub enum FadeDirection {
        Down = 0 => "DOWN",
        Up = 1 => "UP",
    }
}

/// Packed volume/gain selector used by the keytone pipe.
///
/// The volume type sits in the low byte and the gain type in bits 8-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig(pub u32);

impl VolumeConfig {
    pub fn new(volume_type: VolumeType, gain_type: GainType) -> Self {
        VolumeConfig(volume_type.as_u32() | (gain_type.as_u32() << 8))
    }

    pub fn volume_type_raw(self) -> u32 {
        self.0 & 0x0000_00ff
    }

    pub fn gain_type_raw(self) -> u32 {
        (self.0 & 0x0000_ff00) >> 8
    }

    pub fn volume_type(self) -> Option<VolumeType> {
        VolumeType::from_u32(self.volume_type_raw())
    }

    pub fn gain_type(self) -> Option<GainType> {
        GainType::from_u32(self.gain_type_raw())
    }
}

/// Stream half of the HAL info block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub name: Option<String>,
    pub samplerate: u32,
    pub channels: u8,
    pub volume_type: VolumeType,
    pub gain_type: GainType,
}

/// Everything the HAL gets to know about a stream and the device it plays on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub device: Option<AudioDeviceInfo>,
    pub stream: StreamInfo,
}

impl AudioInfo {
    /// Info carrying only a gain profile, as used for one-shot samples.
    pub fn with_gain(volume_type: VolumeType, gain_type: GainType) -> Self {
        Self {
            device: None,
            stream: StreamInfo {
                name: None,
                samplerate: 0,
                channels: 0,
                volume_type,
                gain_type,
            },
        }
    }
}
