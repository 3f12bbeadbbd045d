//! Device definitions: directions, logical input/output devices and the
//! descriptor the HAL uses to name hardware.

use serde::{Deserialize, Serialize};

wire_enum! {
    /// Stream or device direction.
    pub enum Direction {
        None = 0 => "NONE",
        /// Capture
        In = 1 => "IN",
        /// Playback
        Out = 2 => "OUT",
    }
}

wire_enum! {
    /// Logical input device.
    pub enum DeviceIn {
        None = 0 => "NONE",
        Mic = 1 => "MIC",
        WiredAccessory = 2 => "WIRED",
        BtSco = 3 => "BT_SCO",
    }
}

wire_enum! {
    /// Logical output device.
    pub enum DeviceOut {
        None = 0 => "NONE",
        Speaker = 1 => "SPEAKER",
        Receiver = 2 => "RECEIVER",
        WiredAccessory = 3 => "WIRED",
        BtSco = 4 => "BT_SCO",
        BtA2dp = 5 => "BT_A2DP",
        Dock = 6 => "DOCK",
        Hdmi = 7 => "HDMI",
        Mirroring = 8 => "MIRRORING",
        UsbAudio = 9 => "USB_AUDIO",
        MultimediaDock = 10 => "MULTIMEDIA_DOCK",
    }
}

impl DeviceOut {
    pub fn is_bluetooth(self) -> bool {
        matches!(self, DeviceOut::BtA2dp | DeviceOut::BtSco)
    }
}

wire_enum! {
    /// Device driver family.
    pub enum DeviceApi {
        Unknown = 0 => "unknown",
        Alsa = 1 => "alsa",
        Bluez = 2 => "bluez",
    }
}

impl DeviceApi {
    /// Parse the `device.api` property value.
    pub fn from_prop(value: &str) -> DeviceApi {
        match value {
            "alsa" => DeviceApi::Alsa,
            "bluez" => DeviceApi::Bluez,
            _ => DeviceApi::Unknown,
        }
    }
}

wire_enum! {
    /// Cradle status reported by the platform.
    pub enum DockType {
        None = 0 => "NONE",
        Desk = 1 => "DESK",
        Car = 2 => "CAR",
        Audio = 7 => "AUDIO",
        Smart = 8 => "SMART",
    }
}

/// One open parameter passed with a load/open device request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeviceParam {
    Channels(u32),
    SampleRate(u32),
    FragmentSize(u32),
    FragmentNb(u32),
    StartThreshold(i32),
    UseMmap(bool),
    UseTsched(bool),
    TschedBufSize(u32),
    SuspendTimeout(u32),
    AlternateRate(u32),
}

/// Api-specific part of a device descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceDetail {
    #[default]
    None,
    Alsa {
        card_name: Option<String>,
        card_idx: u32,
        device_idx: u32,
    },
    Bluez {
        protocol: Option<String>,
        nrec: u32,
    },
}

/// Descriptor of a hardware device, built from property lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub api: DeviceApi,
    pub direction: Direction,
    pub name: Option<String>,
    pub is_default: bool,
    pub detail: DeviceDetail,
}

impl AudioDeviceInfo {
    /// ALSA device `hw:card,device`.
    pub fn alsa(direction: Direction, card_idx: u32, device_idx: u32) -> Self {
        Self {
            api: DeviceApi::Alsa,
            direction,
            name: None,
            is_default: false,
            detail: DeviceDetail::Alsa {
                card_name: None,
                card_idx,
                device_idx,
            },
        }
    }

    /// Bluetooth device speaking `protocol` (e.g. `a2dp`, `sco`).
    pub fn bluez(direction: Direction, protocol: impl Into<String>, nrec: u32) -> Self {
        Self {
            api: DeviceApi::Bluez,
            direction,
            name: None,
            is_default: false,
            detail: DeviceDetail::Bluez {
                protocol: Some(protocol.into()),
                nrec,
            },
        }
    }

    pub fn with_card_name(mut self, name: impl Into<String>) -> Self {
        if let DeviceDetail::Alsa { card_name, .. } = &mut self.detail {
            *card_name = Some(name.into());
        }
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn card_name(&self) -> Option<&str> {
        match &self.detail {
            DeviceDetail::Alsa { card_name, .. } => card_name.as_deref(),
            _ => None,
        }
    }

    /// Structural identity used for "already loaded" checks.
    ///
    /// ALSA devices match on device index plus either card name or card
    /// index; Bluetooth devices match on protocol and NREC.
    pub fn same_device(&self, other: &AudioDeviceInfo) -> bool {
        if self.direction != other.direction {
            return false;
        }

        match (&self.detail, &other.detail) {
            (
                DeviceDetail::Alsa {
                    card_name: name_a,
                    card_idx: card_a,
                    device_idx: dev_a,
                },
                DeviceDetail::Alsa {
                    card_name: name_b,
                    card_idx: card_b,
                    device_idx: dev_b,
                },
            ) => {
                let same_card = matches!((name_a, name_b), (Some(a), Some(b)) if a == b)
                    || card_a == card_b;
                same_card && dev_a == dev_b
            }
            (
                DeviceDetail::Bluez {
                    protocol: proto_a,
                    nrec: nrec_a,
                },
                DeviceDetail::Bluez {
                    protocol: proto_b,
                    nrec: nrec_b,
                },
            ) => proto_a == proto_b && nrec_a == nrec_b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alsa_identity_by_index() {
        let a = AudioDeviceInfo::alsa(Direction::Out, 0, 0);
        let b = AudioDeviceInfo::alsa(Direction::Out, 0, 0).with_name("ignored");
        assert!(a.same_device(&b));
        assert!(!a.same_device(&AudioDeviceInfo::alsa(Direction::Out, 0, 3)));
        assert!(!a.same_device(&AudioDeviceInfo::alsa(Direction::In, 0, 0)));
    }

    #[test]
    fn test_alsa_identity_by_card_name() {
        let a = AudioDeviceInfo::alsa(Direction::Out, 0, 1).with_card_name("VIRTUALAUDIO");
        let b = AudioDeviceInfo::alsa(Direction::Out, 5, 1).with_card_name("VIRTUALAUDIO");
        assert!(a.same_device(&b));
    }

    #[test]
    fn test_bluez_identity() {
        let a = AudioDeviceInfo::bluez(Direction::Out, "a2dp", 0);
        assert!(a.same_device(&AudioDeviceInfo::bluez(Direction::Out, "a2dp", 0)));
        assert!(!a.same_device(&AudioDeviceInfo::bluez(Direction::Out, "a2dp", 1)));
        assert!(!a.same_device(&AudioDeviceInfo::alsa(Direction::Out, 0, 0)));
    }

    #[test]
    fn test_api_from_prop() {
        assert_eq!(DeviceApi::from_prop("bluez"), DeviceApi::Bluez);
        assert_eq!(DeviceApi::from_prop("voip"), DeviceApi::Unknown);
    }
}
