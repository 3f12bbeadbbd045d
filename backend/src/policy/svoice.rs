//! Seamless voice wake-up.
//!
//! The codec listens for the wake-up keyword while nothing else uses the
//! primary ALSA path. The engine switches detection on and off as calls,
//! recordings and media playback come and go.

use super::info::volume_type_of;
use super::PolicyEngine;
use crate::core::DeviceState;
use crate::error::{bound, AudioResult, HalStatus};
use audio_policy_types::names;
use audio_policy_types::{PolicyEvent, VolumeType};
use tracing::{debug, error, info, warn};

const MIXER_BACKLOG_SIZE: &str = "Backlog size";
const MIXER_LOAD_ACOUSTIC_MODEL: &str = "Load acoustic model";

/// Detection mode that loads the acoustic model first.
const DETECT_WITH_MODEL_LOAD: i32 = 1;
/// Detection mode reusing a previously loaded model.
const DETECT_WITHOUT_MODEL_LOAD: i32 = 4;
const HIBERNATE: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeamlessVoice {
    /// A client asked for wake-up detection
    pub requested: bool,
    /// Detection is running on the codec
    pub enabled: bool,
    /// Seamless recording is in progress
    pub seamless_onoff: bool,
    pub keyword_length: u32,
    pub load_fw: u32,
}

impl Default for SeamlessVoice {
    fn default() -> Self {
        Self {
            requested: false,
            enabled: false,
            seamless_onoff: false,
            keyword_length: 200,
            load_fw: 1,
        }
    }
}

fn is_media_or_alarm(volume_type: Option<VolumeType>) -> bool {
    matches!(volume_type, Some(VolumeType::Media | VolumeType::Alarm))
}

impl PolicyEngine {
    pub fn seamless_voice(&self) -> &SeamlessVoice {
        &self.svoice
    }

    /// First media or alarm stream that is playing on a running sink.
    /// With `alsa_only` only streams on ALSA sinks count.
    pub(crate) fn media_playing(&self, alsa_only: bool) -> Option<u32> {
        self.core.sink_inputs().find_map(|input| {
            if !is_media_or_alarm(volume_type_of(&input.proplist)) || !input.state.is_active() {
                return None;
            }
            let sink_idx = self.core.real_master_sink(input.index)?;
            let sink = self.core.sink(sink_idx)?;
            if alsa_only && sink.api() != Some("alsa") {
                return None;
            }
            (self.core.sink_state(sink_idx) == Some(DeviceState::Running)).then_some(input.index)
        })
    }

    fn primary_capture_running(&self) -> bool {
        self.core
            .source_index(names::SOURCE_ALSA)
            .and_then(|idx| self.core.source_state(idx))
            == Some(DeviceState::Running)
    }

    /// Switch wake-up detection on the codec. Only a `UseHwControl` answer
    /// from the mixer commits the new state.
    pub(crate) fn enable_seamless_voice(&mut self, enable: bool) -> AudioResult {
        if enable {
            if self.route.session.is_call() {
                warn!("Skip enable [seamless voice] during voice call");
                return Ok(HalStatus::Ok);
            }
            if self.primary_capture_running() {
                warn!("Skip enable [seamless voice] during recording");
                return Ok(HalStatus::Ok);
            }
            if self.media_playing(true).is_some() {
                warn!("Skip enable [seamless voice] during media playback");
                return Ok(HalStatus::Ok);
            }
        } else if self.svoice.seamless_onoff {
            warn!("Skip disable [seamless voice] during seamless recording");
            return Ok(HalStatus::Ok);
        }

        if enable {
            let length = i32::try_from(self.svoice.keyword_length).unwrap_or(i32::MAX);
            match bound(self.hal.set_mixer_value_integer(MIXER_BACKLOG_SIZE, length)) {
                Ok(Some(HalStatus::UseHwControl)) => {
                    info!("Setting mixer '{}'={} success", MIXER_BACKLOG_SIZE, length)
                }
                _ => error!("Setting mixer '{}'={} failed", MIXER_BACKLOG_SIZE, length),
            }
        }

        let mode = match (enable, self.svoice.load_fw > 0) {
            (false, _) => HIBERNATE,
            (true, true) => DETECT_WITH_MODEL_LOAD,
            (true, false) => DETECT_WITHOUT_MODEL_LOAD,
        };
        let status = bound(self.hal.set_mixer_value_integer(MIXER_LOAD_ACOUSTIC_MODEL, mode));
        match status {
            Ok(Some(HalStatus::UseHwControl)) => {
                info!("Setting mixer '{}'={} success", MIXER_LOAD_ACOUSTIC_MODEL, mode);
                self.svoice.enabled = enable;
                self.publish(PolicyEvent::SeamlessVoiceChanged { enabled: enable });
                Ok(HalStatus::UseHwControl)
            }
            Ok(_) => {
                error!("Setting mixer '{}'={} failed", MIXER_LOAD_ACOUSTIC_MODEL, mode);
                Ok(HalStatus::Ok)
            }
            Err(e) => {
                error!("Setting mixer '{}'={} failed: {}", MIXER_LOAD_ACOUSTIC_MODEL, mode, e);
                Err(e)
            }
        }
    }

    pub fn svoice_wakeup_enable(&mut self, enable: bool) {
        if enable == self.svoice.enabled {
            info!(
                "seamless voice is already {}",
                if enable { "enabled" } else { "disabled" }
            );
            return;
        }
        self.svoice.requested = enable;
        if !enable && self.svoice.seamless_onoff {
            warn!("Skip disable [seamless voice] during seamless recording");
            return;
        }
        if let Err(e) = self.enable_seamless_voice(enable) {
            error!("seamless voice {} failed: {}", enable, e);
        }
    }

    pub fn svoice_seamless_onoff(&mut self, on: bool) {
        if on == self.svoice.seamless_onoff {
            return;
        }
        if on && !self.svoice.requested {
            error!("seamless recording started while wake-up is not requested");
        }
        self.svoice.seamless_onoff = on;
    }

    /// Tune the wake-up engine. Names match by prefix.
    pub fn svoice_set_param(&mut self, name: &str, value: u32) {
        if names::has_prefix(name, "keyword length") {
            self.svoice.keyword_length = value;
            info!("svoice keyword length set to {}", value);
        } else if names::has_prefix(name, "mode change") {
            info!("svoice mode change ({}) is not supported by this engine", value);
        } else if names::has_prefix(name, "load firmware") {
            self.svoice.load_fw = value;
            info!("svoice load firmware set to {}", value);
        } else {
            error!("unknown svoice param {}={}", name, value);
        }
    }

    /// Re-evaluate detection when an ALSA sink starts or stops playing.
    pub(crate) fn svoice_on_sink_state(&mut self, sink: u32) {
        if !self.svoice.requested {
            return;
        }
        let Some(sink_ref) = self.core.sink(sink) else {
            return;
        };
        if sink_ref.api() != Some("alsa") {
            return;
        }
        let state = self.core.sink_state(sink);

        let decision = self
            .core
            .sink_inputs()
            .filter(|input| is_media_or_alarm(volume_type_of(&input.proplist)))
            .filter(|input| self.core.real_master_sink(input.index) == Some(sink))
            .find_map(|input| {
                let active = input.state.is_active();
                if active && state == Some(DeviceState::Running) {
                    Some(false)
                } else if !active && state == Some(DeviceState::Idle) {
                    Some(true)
                } else {
                    None
                }
            });

        match decision {
            Some(false) if self.svoice.enabled => {
                debug!("media started on sink {}, disabling seamless voice", sink);
                let _ = self.enable_seamless_voice(false);
            }
            Some(true) if !self.svoice.enabled => {
                debug!("media stopped on sink {}, enabling seamless voice", sink);
                let _ = self.enable_seamless_voice(true);
            }
            _ => {}
        }
    }

    /// Re-evaluate detection when the primary capture source changes state.
    pub(crate) fn svoice_on_source_state(&mut self, source: u32) {
        if !self.svoice.requested {
            return;
        }
        if self.core.source(source).map(|s| s.name.as_str()) != Some(names::SOURCE_ALSA) {
            return;
        }
        let running = self.core.source_state(source) == Some(DeviceState::Running);
        if running && self.svoice.enabled {
            let _ = self.enable_seamless_voice(false);
        } else if !running && !self.svoice.enabled {
            let _ = self.enable_seamless_voice(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{engine, play};
    use super::*;
    use crate::core::SourceOutputNewData;
    use audio_policy_types::Session;

    #[test]
    fn test_enable_writes_mixer() {
        let (mut engine, probe) = engine();
        engine.svoice_wakeup_enable(true);
        assert!(engine.seamless_voice().requested);
        assert!(engine.seamless_voice().enabled);
        assert_eq!(probe.mixer_value(MIXER_BACKLOG_SIZE).as_deref(), Some("200"));
        assert_eq!(probe.mixer_value(MIXER_LOAD_ACOUSTIC_MODEL).as_deref(), Some("1"));

        engine.svoice_wakeup_enable(false);
        assert!(!engine.seamless_voice().enabled);
        assert_eq!(probe.mixer_value(MIXER_LOAD_ACOUSTIC_MODEL).as_deref(), Some("0"));
    }

    #[test]
    fn test_params() {
        let (mut engine, probe) = engine();
        engine.svoice_set_param("keyword length", 120);
        engine.svoice_set_param("load firmware", 0);
        engine.svoice_set_param("bogus", 9);
        engine.svoice_wakeup_enable(true);
        assert_eq!(probe.mixer_value(MIXER_BACKLOG_SIZE).as_deref(), Some("120"));
        assert_eq!(probe.mixer_value(MIXER_LOAD_ACOUSTIC_MODEL).as_deref(), Some("4"));
    }

    #[test]
    fn test_skipped_during_media_playback() {
        let (mut engine, _probe) = engine();
        play(&mut engine, "auto", VolumeType::Media);
        engine.svoice_wakeup_enable(true);
        assert!(engine.seamless_voice().requested);
        assert!(!engine.seamless_voice().enabled);
    }

    #[test]
    fn test_recording_toggles_detection() {
        let (mut engine, _probe) = engine();
        engine.svoice_wakeup_enable(true);
        assert!(engine.seamless_voice().enabled);

        let output = engine
            .create_source_output(SourceOutputNewData::default())
            .unwrap();
        assert!(!engine.seamless_voice().enabled);

        engine.unlink_source_output(output);
        assert!(engine.seamless_voice().enabled);
    }

    #[test]
    fn test_disable_blocked_by_seamless_recording() {
        let (mut engine, _probe) = engine();
        engine.svoice_wakeup_enable(true);
        engine.svoice_seamless_onoff(true);
        engine.svoice_wakeup_enable(false);
        assert!(!engine.seamless_voice().requested);
        assert!(engine.seamless_voice().enabled);
    }

    #[test]
    fn test_call_session_suspends_detection() {
        let (mut engine, _probe) = engine();
        engine.svoice_wakeup_enable(true);
        engine.set_session(Session::Voicecall, true).unwrap();
        assert!(!engine.seamless_voice().enabled);
        engine.set_session(Session::Voicecall, false).unwrap();
        assert!(engine.seamless_voice().enabled);
    }
}
