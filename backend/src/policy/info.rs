//! Building the HAL info block from stream and device properties.

use super::PolicyEngine;
use crate::core::{Proplist, SampleSpec};
use crate::error::{AudioError, AudioResult};
use audio_policy_types::names::props;
use audio_policy_types::{
    AudioDeviceInfo, AudioInfo, DeviceApi, DeviceDetail, Direction, GainType, StreamInfo,
    StreamPolicy, VolumeType,
};

/// Volume type a stream declared, if any.
pub fn volume_type_of(proplist: &Proplist) -> Option<VolumeType> {
    proplist
        .get_u32(props::MEDIA_VOLUME_TYPE)
        .and_then(VolumeType::from_u32)
}

pub fn gain_type_of(proplist: &Proplist) -> GainType {
    proplist
        .get_u32(props::MEDIA_GAIN_TYPE)
        .and_then(GainType::from_u32)
        .unwrap_or(GainType::Default)
}

pub fn policy_of(proplist: &Proplist) -> Option<StreamPolicy> {
    proplist.gets(props::MEDIA_POLICY).map(StreamPolicy::from_tag)
}

/// Stream half of the info block. `Undefined` when the stream carries no
/// volume type.
pub fn stream_info(proplist: &Proplist, spec: &SampleSpec) -> AudioResult<StreamInfo> {
    let volume_type = match proplist.gets(props::MEDIA_VOLUME_TYPE) {
        None => return Err(AudioError::Undefined),
        Some(raw) => raw
            .parse::<u32>()
            .ok()
            .and_then(VolumeType::from_u32)
            .ok_or(AudioError::Parameter)?,
    };

    Ok(StreamInfo {
        name: proplist.gets(props::MEDIA_NAME).map(str::to_string),
        samplerate: spec.rate,
        channels: spec.channels,
        volume_type,
        gain_type: gain_type_of(proplist),
    })
}

/// Device descriptor of a sink or source, read back from its properties.
///
/// Devices without a `device.api` (null, combined) have no descriptor.
pub fn device_info(proplist: &Proplist, direction: Direction) -> Option<AudioDeviceInfo> {
    let api = DeviceApi::from_prop(proplist.gets(props::DEVICE_API)?);
    let detail = match api {
        DeviceApi::Alsa => DeviceDetail::Alsa {
            card_name: proplist.gets(props::ALSA_CARD_NAME).map(str::to_string),
            card_idx: proplist.get_u32(props::ALSA_CARD).unwrap_or(0),
            device_idx: proplist.get_u32(props::ALSA_DEVICE).unwrap_or(0),
        },
        DeviceApi::Bluez => DeviceDetail::Bluez {
            protocol: proplist.gets(props::BLUETOOTH_PROTOCOL).map(str::to_string),
            nrec: proplist.get_u32(props::BLUETOOTH_NREC).unwrap_or(0),
        },
        DeviceApi::Unknown => DeviceDetail::None,
    };

    Some(AudioDeviceInfo {
        api,
        direction,
        name: proplist.gets(props::DEVICE_STRING).map(str::to_string),
        is_default: false,
        detail,
    })
}

impl PolicyEngine {
    /// Info block of sink-input `idx` on the sink it really plays on.
    pub(crate) fn playback_info(&self, idx: u32) -> AudioResult<AudioInfo> {
        let input = self.core.sink_input(idx).ok_or(AudioError::Parameter)?;
        let stream = stream_info(&input.proplist, &input.spec)?;
        let device = self
            .core
            .real_master_sink(idx)
            .and_then(|sink| self.core.sink(sink))
            .and_then(|sink| device_info(&sink.proplist, Direction::Out));
        Ok(AudioInfo { device, stream })
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_info_requires_volume_type() {
        let mut proplist = Proplist::new();
        proplist.sets(props::MEDIA_NAME, "music");
        assert_eq!(
            stream_info(&proplist, &SampleSpec::default()),
            Err(AudioError::Undefined)
        );

        proplist.sets(props::MEDIA_VOLUME_TYPE, "42");
        assert_eq!(
            stream_info(&proplist, &SampleSpec::default()),
            Err(AudioError::Parameter)
        );

        proplist.sets(props::MEDIA_VOLUME_TYPE, "4");
        let info = stream_info(&proplist, &SampleSpec::new(48000, 1)).unwrap();
        assert_eq!(info.volume_type, VolumeType::Media);
        assert_eq!(info.gain_type, GainType::Default);
        assert_eq!(info.samplerate, 48000);
        assert_eq!(info.name.as_deref(), Some("music"));
    }

    #[test]
    fn test_alsa_device_info() {
        let mut proplist = Proplist::new();
        proplist.sets(props::DEVICE_API, "alsa");
        proplist.sets(props::DEVICE_STRING, "hw:0,3");
        proplist.sets(props::ALSA_CARD, "0");
        proplist.sets(props::ALSA_DEVICE, "3");

        let info = device_info(&proplist, Direction::Out).unwrap();
        assert!(info.same_device(&AudioDeviceInfo::alsa(Direction::Out, 0, 3)));
        assert_eq!(info.name.as_deref(), Some("hw:0,3"));
        assert!(device_info(&Proplist::new(), Direction::Out).is_none());
    }

    #[test]
    fn test_bluez_device_info() {
        let mut proplist = Proplist::new();
        proplist.sets(props::DEVICE_API, "bluez");
        proplist.sets(props::BLUETOOTH_PROTOCOL, "sco");
        proplist.sets(props::BLUETOOTH_NREC, "1");

        let info = device_info(&proplist, Direction::In).unwrap();
        assert!(info.same_device(&AudioDeviceInfo::bluez(Direction::In, "sco", 1)));
    }
}
