//! Events published by the policy engine.

use crate::device::{DeviceIn, DeviceOut, Direction};
use crate::session::{Session, Subsession};
use crate::volume::VolumeType;
use serde::{Deserialize, Serialize};

/// Event types broadcast to every observer of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PolicyEvent {
    /// A session started or ended
    SessionChanged {
        session: Session,
        subsession: Subsession,
    },
    /// The sub-session or its options changed
    SubsessionChanged { subsession: Subsession, options: u32 },
    /// The HAL was asked for a new route
    RouteChanged {
        device_in: DeviceIn,
        device_out: DeviceOut,
        route_flags: u32,
    },
    /// A volume slider moved
    VolumeLevelChanged { volume_type: VolumeType, level: u32 },
    /// A mute state was set through the volume controller
    MuteChanged {
        stream_idx: Option<u32>,
        volume_type: Option<VolumeType>,
        direction: Direction,
        mute: bool,
    },
    /// Global mute-all toggled
    MuteAllChanged { enabled: bool },
    /// Owner of the volume keys changed.
    ///
    /// `-1` means no stream, `-2` means only capture streams.
    PrimaryVolumeChanged { volume_type: i32 },
    /// The primary capture source started or stopped recording
    CaptureStatusChanged { recording: bool },
    /// Burst-shot playback started or stopped
    BurstShotChanged { active: bool },
    /// Seamless voice wake-up was switched on the codec
    SeamlessVoiceChanged { enabled: bool },
    /// A hardware device module was loaded
    DeviceLoaded { name: String },
    /// A hardware device module was unloaded
    DeviceUnloaded { name: String },
    /// A keytone record was played
    KeytonePlayed { filename: String },
}

impl PolicyEvent {
    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            PolicyEvent::SessionChanged {
                session,
                subsession,
            } => format!("Session changed to {} ({})", session, subsession),
            PolicyEvent::SubsessionChanged {
                subsession,
                options,
            } => format!("Sub-session changed to {} opt 0x{:x}", subsession, options),
            PolicyEvent::RouteChanged {
                device_in,
                device_out,
                route_flags,
            } => format!(
                "Route set in:{} out:{} flag:0x{:x}",
                device_in, device_out, route_flags
            ),
            PolicyEvent::VolumeLevelChanged { volume_type, level } => {
                format!("Volume {} set to level {}", volume_type, level)
            }
            PolicyEvent::MuteChanged {
                stream_idx,
                volume_type,
                direction,
                mute,
            } => {
                let target = match (stream_idx, volume_type) {
                    (Some(idx), _) => format!("stream {}", idx),
                    (None, Some(vt)) => format!("type {}", vt),
                    (None, None) => "device".to_string(),
                };
                format!(
                    "{} {} for {}",
                    if *mute { "Muted" } else { "Unmuted" },
                    direction,
                    target
                )
            }
            PolicyEvent::MuteAllChanged { enabled } => format!("Mute-all {}", enabled),
            PolicyEvent::PrimaryVolumeChanged { volume_type } => {
                format!("Primary volume type is now {}", volume_type)
            }
            PolicyEvent::CaptureStatusChanged { recording } => {
                format!("Capture status {}", recording)
            }
            PolicyEvent::BurstShotChanged { active } => format!("Burst-shot {}", active),
            PolicyEvent::SeamlessVoiceChanged { enabled } => {
                format!("Seamless voice wake-up {}", enabled)
            }
            PolicyEvent::DeviceLoaded { name } => format!("Device {} loaded", name),
            PolicyEvent::DeviceUnloaded { name } => format!("Device {} unloaded", name),
            PolicyEvent::KeytonePlayed { filename } => format!("Keytone {} played", filename),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = PolicyEvent::PrimaryVolumeChanged { volume_type: -2 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"PrimaryVolumeChanged","data":{"volume_type":-2}}"#
        );
        let back: PolicyEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_description() {
        let event = PolicyEvent::RouteChanged {
            device_in: DeviceIn::Mic,
            device_out: DeviceOut::Speaker,
            route_flags: 0x2,
        };
        assert_eq!(event.description(), "Route set in:MIC out:SPEAKER flag:0x2");
    }
}
