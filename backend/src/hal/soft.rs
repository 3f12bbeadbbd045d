//! Software HAL.
//!
//! Keeps volume levels, mute states and mixer controls in memory and records
//! every hardware-facing call, so the engine can run without a codec and
//! tests can inspect what the engine asked for.

use super::{AudioHal, PcmHandle};
use crate::config::HalConfig;
use crate::error::{AudioError, AudioResult, HalStatus};
use crate::policy::queue::DeviceCallbacks;
use audio_policy_types::command::{CUSTOM_EQ_BAND_MAX, CUSTOM_EXT_PARAM_MAX, DHA_GAIN_NUM};
use audio_policy_types::{
    AudioInfo, DeviceIn, DeviceOut, Direction, GainType, RouteFlags, Session, SessionCommand,
    Subsession, VolumeType,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A hardware-facing request the engine made.
#[derive(Debug, Clone, PartialEq)]
pub enum HalCall {
    Init,
    Deinit,
    Reset,
    SetSession {
        session: Session,
        subsession: Subsession,
        command: SessionCommand,
    },
    SetRoute {
        session: Session,
        subsession: Subsession,
        device_in: DeviceIn,
        device_out: DeviceOut,
        flags: RouteFlags,
    },
    SetVolumeLevel {
        stream: Option<String>,
        volume_type: VolumeType,
        level: u32,
    },
    SetVolumeValue {
        stream: Option<String>,
        volume_type: VolumeType,
        value: f64,
    },
    SetMute {
        stream: Option<String>,
        volume_type: VolumeType,
        direction: Direction,
        mute: bool,
    },
    SetMixer {
        name: String,
        value: String,
    },
    PcmOpen(String),
    PcmClose(PcmHandle),
    /// A post-processing effect parameter (`vsp`, `soundalive`, `dha`)
    Effect {
        name: &'static str,
        stream: Option<String>,
        values: Vec<u32>,
    },
}

fn gain_of(gain_type: GainType) -> f64 {
    match gain_type {
        GainType::Touch => 0.5,
        GainType::Tone => 0.8,
        _ => 1.0,
    }
}

#[derive(Default)]
struct SoftHalState {
    levels: HashMap<VolumeType, u32>,
    mutes: HashMap<(VolumeType, Direction), bool>,
    mixer: HashMap<String, String>,
    pcms: HashMap<u32, String>,
    next_pcm: u32,
    use_hw_control: bool,
    calls: Vec<HalCall>,
    callbacks: Option<DeviceCallbacks>,
}

/// In-memory HAL backend.
pub struct SoftHal {
    level_max: u32,
    state: Arc<Mutex<SoftHalState>>,
}

impl SoftHal {
    pub fn new(config: &HalConfig) -> Self {
        let level_max = config.volume_level_max.max(1);
        let levels = VolumeType::ALL
            .iter()
            .map(|vt| (*vt, level_max / 2))
            .collect();

        Self {
            level_max,
            state: Arc::new(Mutex::new(SoftHalState {
                levels,
                use_hw_control: config.use_hw_control,
                ..Default::default()
            })),
        }
    }

    /// Handle for inspecting the backend after it was boxed into the engine.
    pub fn probe(&self) -> SoftHalProbe {
        SoftHalProbe {
            state: self.state.clone(),
        }
    }

    fn applied(&self) -> HalStatus {
        if self.state.lock().use_hw_control {
            HalStatus::UseHwControl
        } else {
            HalStatus::Ok
        }
    }

    fn record(&self, call: HalCall) {
        self.state.lock().calls.push(call);
    }

    fn effect(&self, name: &'static str, info: &AudioInfo, values: Vec<u32>) -> AudioResult {
        self.record(HalCall::Effect {
            name,
            stream: info.stream.name.clone(),
            values,
        });
        Ok(HalStatus::Ok)
    }
}

impl AudioHal for SoftHal {
    fn name(&self) -> &str {
        "soft"
    }

    fn init(&mut self) -> AudioResult {
        info!("Software HAL initialized (max level {})", self.level_max);
        self.record(HalCall::Init);
        Ok(HalStatus::Ok)
    }

    fn deinit(&mut self) -> AudioResult {
        let mut state = self.state.lock();
        state.callbacks = None;
        state.calls.push(HalCall::Deinit);
        Ok(HalStatus::Ok)
    }

    fn reset(&mut self) -> AudioResult {
        self.record(HalCall::Reset);
        Ok(HalStatus::Ok)
    }

    fn set_callback(&mut self, callbacks: DeviceCallbacks) -> AudioResult {
        self.state.lock().callbacks = Some(callbacks);
        Ok(HalStatus::Ok)
    }

    fn get_volume_level_max(&self, _volume_type: VolumeType) -> AudioResult<u32> {
        Ok(self.level_max)
    }

    fn get_volume_level(&self, volume_type: VolumeType) -> AudioResult<u32> {
        self.state
            .lock()
            .levels
            .get(&volume_type)
            .copied()
            .ok_or(AudioError::Undefined)
    }

    fn get_volume_value(
        &self,
        info: &AudioInfo,
        _volume_type: VolumeType,
        level: u32,
    ) -> AudioResult<f64> {
        if level > self.level_max {
            return Err(AudioError::Parameter);
        }
        Ok(level as f64 / self.level_max as f64 * gain_of(info.stream.gain_type))
    }

    fn set_volume_level(
        &mut self,
        info: Option<&AudioInfo>,
        volume_type: VolumeType,
        level: u32,
    ) -> AudioResult {
        if level > self.level_max {
            return Err(AudioError::Parameter);
        }
        let status = self.applied();
        let mut state = self.state.lock();
        state.levels.insert(volume_type, level);
        state.calls.push(HalCall::SetVolumeLevel {
            stream: info.and_then(|i| i.stream.name.clone()),
            volume_type,
            level,
        });
        Ok(status)
    }

    fn set_volume_value(
        &mut self,
        info: &AudioInfo,
        volume_type: VolumeType,
        value: &mut f64,
    ) -> AudioResult {
        *value = value.clamp(0.0, 1.0);
        self.record(HalCall::SetVolumeValue {
            stream: info.stream.name.clone(),
            volume_type,
            value: *value,
        });
        Ok(self.applied())
    }

    fn get_gain_value(&self, info: &AudioInfo, _volume_type: VolumeType) -> AudioResult<f64> {
        Ok(gain_of(info.stream.gain_type))
    }

    fn get_mute(
        &self,
        _info: Option<&AudioInfo>,
        volume_type: VolumeType,
        direction: Direction,
    ) -> AudioResult<(HalStatus, bool)> {
        let muted = self
            .state
            .lock()
            .mutes
            .get(&(volume_type, direction))
            .copied()
            .unwrap_or(false);
        Ok((self.applied(), muted))
    }

    fn set_mute(
        &mut self,
        info: Option<&AudioInfo>,
        volume_type: VolumeType,
        direction: Direction,
        mute: bool,
    ) -> AudioResult {
        let status = self.applied();
        let mut state = self.state.lock();
        if info.is_none() {
            state.mutes.insert((volume_type, direction), mute);
        }
        state.calls.push(HalCall::SetMute {
            stream: info.and_then(|i| i.stream.name.clone()),
            volume_type,
            direction,
            mute,
        });
        Ok(status)
    }

    fn set_session(
        &mut self,
        session: Session,
        subsession: Subsession,
        command: SessionCommand,
    ) -> AudioResult {
        debug!("HAL session {} sub {} cmd {}", session, subsession, command);
        self.record(HalCall::SetSession {
            session,
            subsession,
            command,
        });
        Ok(HalStatus::Ok)
    }

    fn set_route(
        &mut self,
        session: Session,
        subsession: Subsession,
        device_in: DeviceIn,
        device_out: DeviceOut,
        flags: RouteFlags,
    ) -> AudioResult {
        debug!(
            "HAL route session {} in {} out {} flags {}",
            session, device_in, device_out, flags
        );
        self.record(HalCall::SetRoute {
            session,
            subsession,
            device_in,
            device_out,
            flags,
        });
        Ok(HalStatus::Ok)
    }

    fn alsa_pcm_open(&mut self, device: &str, _direction: Direction) -> AudioResult<PcmHandle> {
        let mut state = self.state.lock();
        if state.pcms.values().any(|open| open == device) {
            return Err(AudioError::Resource);
        }
        state.next_pcm += 1;
        let handle = PcmHandle(state.next_pcm);
        state.pcms.insert(handle.0, device.to_string());
        state.calls.push(HalCall::PcmOpen(device.to_string()));
        Ok(handle)
    }

    fn alsa_pcm_close(&mut self, pcm: PcmHandle) -> AudioResult {
        let mut state = self.state.lock();
        if state.pcms.remove(&pcm.0).is_none() {
            return Err(AudioError::Parameter);
        }
        state.calls.push(HalCall::PcmClose(pcm));
        Ok(HalStatus::Ok)
    }

    fn set_mixer_value_integer(&mut self, name: &str, value: i32) -> AudioResult {
        let mut state = self.state.lock();
        state.mixer.insert(name.to_string(), value.to_string());
        state.calls.push(HalCall::SetMixer {
            name: name.to_string(),
            value: value.to_string(),
        });
        // Mixer writes always go straight to the codec.
        Ok(HalStatus::UseHwControl)
    }

    fn set_mixer_value_string(&mut self, name: &str, value: &str) -> AudioResult {
        let mut state = self.state.lock();
        state.mixer.insert(name.to_string(), value.to_string());
        state.calls.push(HalCall::SetMixer {
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(HalStatus::UseHwControl)
    }

    fn set_vsp(&mut self, info: &AudioInfo, value: u32) -> AudioResult {
        self.effect("vsp", info, vec![value])
    }

    fn set_soundalive_filter_action(&mut self, info: &AudioInfo, value: u32) -> AudioResult {
        self.effect("soundalive_filter_action", info, vec![value])
    }

    fn set_soundalive_preset_mode(&mut self, info: &AudioInfo, value: u32) -> AudioResult {
        self.effect("soundalive_preset_mode", info, vec![value])
    }

    fn set_soundalive_equalizer(
        &mut self,
        info: &AudioInfo,
        eq: &[u32; CUSTOM_EQ_BAND_MAX],
    ) -> AudioResult {
        self.effect("soundalive_equalizer", info, eq.to_vec())
    }

    fn set_soundalive_extend(
        &mut self,
        info: &AudioInfo,
        ext: &[u32; CUSTOM_EXT_PARAM_MAX],
    ) -> AudioResult {
        self.effect("soundalive_extend", info, ext.to_vec())
    }

    fn set_soundalive_device(&mut self, info: &AudioInfo, value: u32) -> AudioResult {
        self.effect("soundalive_device", info, vec![value])
    }

    fn set_soundalive_square(&mut self, info: &AudioInfo, row: u32, col: u32) -> AudioResult {
        self.effect("soundalive_square", info, vec![row, col])
    }

    fn set_dha_param(
        &mut self,
        info: &AudioInfo,
        onoff: bool,
        gain: &[u32; DHA_GAIN_NUM],
    ) -> AudioResult {
        let mut values = vec![onoff as u32];
        values.extend_from_slice(gain);
        self.effect("dha", info, values)
    }
}

/// Read access to a [`SoftHal`] that has been handed to the engine.
#[derive(Clone)]
pub struct SoftHalProbe {
    state: Arc<Mutex<SoftHalState>>,
}

impl SoftHalProbe {
    /// Every recorded call, oldest first.
    pub fn calls(&self) -> Vec<HalCall> {
        self.state.lock().calls.clone()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Only the `set_route` calls.
    pub fn route_calls(&self) -> Vec<HalCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, HalCall::SetRoute { .. }))
            .collect()
    }

    pub fn mixer_value(&self, name: &str) -> Option<String> {
        self.state.lock().mixer.get(name).cloned()
    }

    pub fn level(&self, volume_type: VolumeType) -> Option<u32> {
        self.state.lock().levels.get(&volume_type).copied()
    }

    pub fn set_use_hw_control(&self, enabled: bool) {
        self.state.lock().use_hw_control = enabled;
    }

    /// Device callbacks the engine registered, as a HAL worker would use them.
    pub fn callbacks(&self) -> Option<DeviceCallbacks> {
        self.state.lock().callbacks.clone()
    }
}
