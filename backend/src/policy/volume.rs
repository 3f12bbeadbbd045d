//! Volume and mute controller.
//!
//! Levels are persisted by the HAL per volume type. A stream's software
//! volume is always re-derived from its type's level through the HAL's
//! `get_volume_value`, unless the HAL answers `UseHwControl`, in which case
//! the hardware already applied it and the software path is skipped.

use super::PolicyEngine;
use crate::core::Proplist;
use crate::error::{bound, AudioError, AudioResult, HalStatus};
use audio_policy_types::names::props;
use audio_policy_types::{Direction, PolicyEvent, VolumeType};
use tracing::{debug, error, info, warn};

/// Volume type a stream declared. `Undefined` when it declared none,
/// `Parameter` when the value is not a volume type.
fn declared_volume_type(proplist: &Proplist) -> AudioResult<VolumeType> {
    let raw = proplist
        .gets(props::MEDIA_VOLUME_TYPE)
        .ok_or(AudioError::Undefined)?;
    raw.parse::<u32>()
        .ok()
        .and_then(VolumeType::from_u32)
        .ok_or(AudioError::Parameter)
}

impl PolicyEngine {
    /// Resolve the volume type of a request: the explicit one, else the one
    /// the addressed stream declared.
    fn resolve_volume_type(
        &self,
        stream: Option<u32>,
        volume_type: Option<VolumeType>,
    ) -> AudioResult<VolumeType> {
        match (volume_type, stream) {
            (Some(volume_type), _) => Ok(volume_type),
            (None, None) => Err(AudioError::Parameter),
            (None, Some(idx)) => {
                let Some(input) = self.core.sink_input(idx) else {
                    warn!("stream[{}] doesn't exist", idx);
                    return Err(AudioError::Parameter);
                };
                declared_volume_type(&input.proplist).inspect_err(|_| {
                    debug!("stream[{}] doesn't have a valid volume type", idx);
                })
            }
        }
    }

    /// Sink-inputs a request addresses: the one stream, or every stream of
    /// the volume type. Streams without a usable info block are skipped.
    fn addressed_inputs(&self, stream: Option<u32>, volume_type: VolumeType) -> Vec<u32> {
        match stream {
            Some(idx) => {
                if self.playback_info(idx).is_ok() {
                    vec![idx]
                } else {
                    Vec::new()
                }
            }
            None => self
                .core
                .sink_input_indices()
                .into_iter()
                .filter(|idx| {
                    self.playback_info(*idx)
                        .is_ok_and(|info| info.stream.volume_type == volume_type)
                })
                .collect(),
        }
    }

    pub fn get_volume_level_max(&self, volume_type: VolumeType) -> AudioResult<u32> {
        let max = bound(self.hal.get_volume_level_max(volume_type))
            .inspect_err(|e| error!("get_volume_level_max returns error: {}", e))?
            .unwrap_or(0);
        info!("get volume level max type:{} level:{}", volume_type, max);
        Ok(max)
    }

    /// Level of `volume_type`, or of the type stream `stream` declared when
    /// no type is given.
    pub fn get_volume_level(
        &self,
        stream: Option<u32>,
        volume_type: Option<VolumeType>,
    ) -> AudioResult<(VolumeType, u32)> {
        let volume_type = self.resolve_volume_type(stream, volume_type)?;
        let level = match bound(self.hal.get_volume_level(volume_type)) {
            Ok(level) => level.unwrap_or(0),
            Err(e) => {
                warn!("get_volume_level for {} returns error: {}", volume_type, e);
                0
            }
        };
        info!(
            "get_volume_level stream_idx:{:?} type:{} level:{}",
            stream, volume_type, level
        );
        Ok((volume_type, level))
    }

    /// Persist `level` for `volume_type` and re-derive the volume of the
    /// addressed streams.
    pub fn set_volume_level(
        &mut self,
        stream: Option<u32>,
        volume_type: Option<VolumeType>,
        level: u32,
    ) -> AudioResult {
        info!(
            "set_volume_level stream_idx:{:?} type:{:?} level:{}",
            stream, volume_type, level
        );
        if let Some(volume_type) = volume_type {
            if let Err(e) = bound(self.hal.set_volume_level(None, volume_type, level)) {
                warn!("storing level {} for {} failed: {}", level, volume_type, e);
            }
        }

        let status = self.update_volume(stream, volume_type, Some(level))?;
        if let Ok(volume_type) = self.resolve_volume_type(stream, volume_type) {
            self.publish(PolicyEvent::VolumeLevelChanged { volume_type, level });
        }
        Ok(status)
    }

    /// Apply `level` (or the stored level when `None`) to the addressed
    /// streams. A stream without a volume type is left alone.
    pub(crate) fn update_volume(
        &mut self,
        stream: Option<u32>,
        volume_type: Option<VolumeType>,
        level: Option<u32>,
    ) -> AudioResult {
        let (volume_type, level) = match (volume_type, level) {
            (Some(volume_type), Some(level)) => (volume_type, level),
            (volume_type, level) => match self.get_volume_level(stream, volume_type) {
                Ok((volume_type, stored)) => (volume_type, level.unwrap_or(stored)),
                Err(AudioError::Undefined) => return Ok(HalStatus::Ok),
                Err(e) => return Err(e),
            },
        };

        if self.core.muteall && volume_type != VolumeType::Fixed {
            debug!(
                "muting stream_idx:{:?} type:{} while mute-all is on",
                stream, volume_type
            );
            if self.set_mute(stream, Some(volume_type), Direction::Out, true)?
                == HalStatus::UseHwControl
            {
                return Ok(HalStatus::UseHwControl);
            }
        }

        if stream.is_none() {
            bound(self.hal.set_volume_level(None, volume_type, level))
                .inspect_err(|e| error!("set_volume_level returns error: {}", e))?;
        }

        let mut status = HalStatus::Ok;
        for idx in self.addressed_inputs(stream, volume_type) {
            let info = self.playback_info(idx)?;
            let stream_type = info.stream.volume_type;

            status = bound(self.hal.set_volume_level(Some(&info), stream_type, level))
                .inspect_err(|e| error!("set_volume_level for sink-input[{}]: {}", idx, e))?
                .unwrap_or(HalStatus::Ok);

            let mut linear = 1.0;
            if status != HalStatus::UseHwControl {
                if let Some(value) = bound(self.hal.get_volume_value(&info, stream_type, level))
                    .inspect_err(|e| warn!("get_volume_value for sink-input[{}]: {}", idx, e))?
                {
                    linear = value;
                }
            }
            if let Some(input) = self.core.sink_input_mut(idx) {
                input.volume = linear;
            }
        }
        Ok(status)
    }

    /// Apply a raw linear `value`, scaled by each stream's HAL gain.
    pub(crate) fn update_volume_by_value(
        &mut self,
        stream: Option<u32>,
        volume_type: VolumeType,
        value: f64,
    ) -> AudioResult {
        let mut status = HalStatus::Ok;
        for idx in self.addressed_inputs(stream, volume_type) {
            let info = self.playback_info(idx)?;
            let stream_type = info.stream.volume_type;

            let gain = bound(self.hal.get_gain_value(&info, stream_type))
                .inspect_err(|e| warn!("get_gain_value for sink-input[{}]: {}", idx, e))?
                .unwrap_or(1.0);
            let mut volume = value * gain;

            status = bound(self.hal.set_volume_value(&info, stream_type, &mut volume))
                .inspect_err(|e| error!("set_volume_value for sink-input[{}]: {}", idx, e))?
                .unwrap_or(HalStatus::Ok);

            if let Some(input) = self.core.sink_input_mut(idx) {
                input.volume = if status == HalStatus::UseHwControl {
                    1.0
                } else {
                    volume
                };
            }
        }
        Ok(status)
    }

    /// Re-apply the stored level of every volume type.
    pub fn update_volume_all(&mut self) -> AudioResult {
        info!("update_volume");
        for volume_type in VolumeType::ALL.iter().copied() {
            let level = bound(self.hal.get_volume_level(volume_type))
                .ok()
                .flatten()
                .unwrap_or(0);
            if let Err(e) = self.update_volume(None, Some(volume_type), Some(level)) {
                warn!("updating {} failed: {}", volume_type, e);
            }
        }
        Ok(HalStatus::Ok)
    }

    /// Mute state of one stream, or of a volume type as the HAL stores it.
    pub fn get_mute(
        &self,
        stream: Option<u32>,
        volume_type: Option<VolumeType>,
        direction: Direction,
    ) -> AudioResult<bool> {
        let mut mute = false;

        if stream.is_none() {
            let volume_type = volume_type.ok_or(AudioError::Parameter)?;
            if let Some((_, hal_mute)) = bound(self.hal.get_mute(None, volume_type, direction))
                .inspect_err(|e| error!("get_mute returns error: {}", e))?
            {
                mute = hal_mute;
            }
        } else if direction == Direction::Out {
            let volume_type = self.resolve_volume_type(stream, volume_type)?;
            if let Some(idx) = self.addressed_inputs(stream, volume_type).first().copied() {
                let info = self.playback_info(idx)?;
                match bound(self.hal.get_mute(Some(&info), info.stream.volume_type, direction))
                    .inspect_err(|e| error!("get_mute for sink-input[{}]: {}", idx, e))?
                {
                    Some((HalStatus::UseHwControl, hal_mute)) => mute = hal_mute,
                    _ => {
                        mute = self.core.sink_input(idx).is_some_and(|input| input.muted);
                    }
                }
            }
        }

        info!(
            "get mute stream_idx:{:?} type:{:?} direction:{} mute:{}",
            stream, volume_type, direction, mute
        );
        Ok(mute)
    }

    /// Mute or unmute one stream or every stream of a volume type.
    ///
    /// Capture mute of the call type is remembered so that it can be
    /// restored after a route change. While mute-all is on, unmuting any
    /// playback type except `Fixed` is ignored.
    pub fn set_mute(
        &mut self,
        stream: Option<u32>,
        volume_type: Option<VolumeType>,
        direction: Direction,
        mute: bool,
    ) -> AudioResult {
        info!(
            "set_mute stream_idx:{:?} type:{:?} direction:{} mute:{}",
            stream, volume_type, direction, mute
        );
        let volume_type = self.resolve_volume_type(stream, volume_type)?;

        if volume_type == VolumeType::Call && direction == Direction::In {
            self.call_muted = mute;
        }

        if self.core.muteall && !mute && direction == Direction::Out && volume_type != VolumeType::Fixed
        {
            info!("set_mute is ignored by muteall");
            return Ok(HalStatus::Ok);
        }

        let mut status = HalStatus::Ok;
        if stream.is_none() {
            match bound(self.hal.set_mute(None, volume_type, direction, mute)) {
                Ok(Some(HalStatus::UseHwControl)) => {
                    info!("set_mute handled by hardware, mute:{}", mute);
                    self.publish_mute(stream, volume_type, direction, mute);
                    return Ok(HalStatus::UseHwControl);
                }
                Ok(_) => {}
                Err(e) => {
                    error!("set_mute returns error: {}", e);
                    return Err(e);
                }
            }
        }

        if direction == Direction::Out {
            for idx in self.addressed_inputs(stream, volume_type) {
                let info = self.playback_info(idx)?;
                status = bound(self.hal.set_mute(
                    Some(&info),
                    info.stream.volume_type,
                    direction,
                    mute,
                ))
                .inspect_err(|e| error!("set_mute for sink-input[{}]: {}", idx, e))?
                .unwrap_or(HalStatus::Ok);

                if let Some(input) = self.core.sink_input_mut(idx) {
                    input.muted = mute;
                }
            }
        }

        self.publish_mute(stream, volume_type, direction, mute);
        Ok(status)
    }

    fn publish_mute(
        &self,
        stream: Option<u32>,
        volume_type: VolumeType,
        direction: Direction,
        mute: bool,
    ) {
        self.publish(PolicyEvent::MuteChanged {
            stream_idx: stream,
            volume_type: Some(volume_type),
            direction,
            mute,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{engine, engine_with, play};
    use super::*;
    use crate::config::PolicyConfig;
    use crate::hal::soft::HalCall;

    #[test]
    fn test_level_round_trip() {
        let (mut engine, _probe) = engine();
        let max = engine.get_volume_level_max(VolumeType::Media).unwrap();
        assert_eq!(max, 15);

        for level in [0, 7, max] {
            engine
                .set_volume_level(None, Some(VolumeType::Media), level)
                .unwrap();
            assert_eq!(
                engine.get_volume_level(None, Some(VolumeType::Media)).unwrap(),
                (VolumeType::Media, level)
            );
        }
    }

    #[test]
    fn test_level_applies_linear_volume() {
        let (mut engine, _probe) = engine();
        let media = play(&mut engine, "auto", VolumeType::Media);
        let alarm = play(&mut engine, "auto", VolumeType::Alarm);
        let alarm_volume = engine.core().sink_input(alarm).unwrap().volume;

        engine
            .set_volume_level(None, Some(VolumeType::Media), 3)
            .unwrap();
        let volume = engine.core().sink_input(media).unwrap().volume;
        assert!((volume - 3.0 / 15.0).abs() < 1e-9);
        assert_eq!(engine.core().sink_input(alarm).unwrap().volume, alarm_volume);
    }

    #[test]
    fn test_stream_type_resolution() {
        let (mut engine, _probe) = engine();
        let media = play(&mut engine, "auto", VolumeType::Media);
        let (volume_type, _) = engine.get_volume_level(Some(media), None).unwrap();
        assert_eq!(volume_type, VolumeType::Media);

        assert_eq!(
            engine.get_volume_level(Some(999), None),
            Err(AudioError::Parameter)
        );
        assert_eq!(engine.get_volume_level(None, None), Err(AudioError::Parameter));

        let untyped = engine
            .create_sink_input(crate::core::SinkInputNewData::new(
                Proplist::new(),
                Default::default(),
            ))
            .unwrap();
        assert_eq!(
            engine.get_volume_level(Some(untyped), None),
            Err(AudioError::Undefined)
        );
        // Re-deriving an untyped stream is a no-op
        assert_eq!(engine.update_volume(Some(untyped), None, None), Ok(HalStatus::Ok));
    }

    #[test]
    fn test_hw_control_skips_software_volume() {
        let config = PolicyConfig::default();
        let (mut engine, probe) = engine_with(config);
        let media = play(&mut engine, "auto", VolumeType::Media);
        probe.set_use_hw_control(true);

        let status = engine
            .set_volume_level(None, Some(VolumeType::Media), 2)
            .unwrap();
        assert_eq!(status, HalStatus::UseHwControl);
        assert_eq!(engine.core().sink_input(media).unwrap().volume, 1.0);
    }

    #[test]
    fn test_by_value_uses_stream_gain() {
        let (mut engine, _probe) = engine();
        let media = play(&mut engine, "auto", VolumeType::Media);
        let other = play(&mut engine, "auto", VolumeType::Media);
        engine
            .update_volume_by_value(None, VolumeType::Media, 0.4)
            .unwrap();
        // Each stream gets the value times its own gain, no compounding
        assert!((engine.core().sink_input(media).unwrap().volume - 0.4).abs() < 1e-9);
        assert!((engine.core().sink_input(other).unwrap().volume - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_call_capture_mute_is_remembered() {
        let (mut engine, probe) = engine();
        engine
            .set_mute(None, Some(VolumeType::Call), Direction::In, true)
            .unwrap();
        assert!(engine.call_muted());
        assert!(engine
            .get_mute(None, Some(VolumeType::Call), Direction::In)
            .unwrap());
        assert!(probe.calls().contains(&HalCall::SetMute {
            stream: None,
            volume_type: VolumeType::Call,
            direction: Direction::In,
            mute: true,
        }));
    }

    #[test]
    fn test_unmute_ignored_under_muteall() {
        let (mut engine, _probe) = engine();
        let media = play(&mut engine, "auto", VolumeType::Media);
        engine.set_muteall(true);
        assert!(engine.core().sink_input(media).unwrap().muted);

        engine
            .set_mute(Some(media), None, Direction::Out, false)
            .unwrap();
        assert!(engine.core().sink_input(media).unwrap().muted);
        assert!(engine.get_mute(Some(media), None, Direction::Out).unwrap());

        engine.set_muteall(false);
        assert!(!engine.core().sink_input(media).unwrap().muted);
    }
}
