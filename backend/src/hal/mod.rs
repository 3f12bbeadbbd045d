//! Hardware abstraction layer.
//!
//! The engine talks to the mixer, route and volume hardware only through the
//! [`AudioHal`] trait. Every entry point has a default body answering
//! [`AudioError::NotImplemented`], so a backend only implements what its
//! hardware supports and the engine skips the rest.

pub mod soft;

use crate::config::HalConfig;
use crate::error::{AudioError, AudioResult, HalStatus};
use crate::policy::queue::DeviceCallbacks;
use audio_policy_types::command::{CUSTOM_EQ_BAND_MAX, CUSTOM_EXT_PARAM_MAX, DHA_GAIN_NUM};
use audio_policy_types::{
    AudioInfo, DeviceIn, DeviceOut, Direction, RouteFlags, Session, SessionCommand, Subsession,
    VolumeType,
};

/// Handle of an ALSA PCM opened through the HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmHandle(pub u32);

/// Operations a hardware backend may provide.
#[allow(unused_variables)]
pub trait AudioHal: Send {
    /// Backend name, published in the shared-state registry.
    fn name(&self) -> &str;

    fn init(&mut self) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn deinit(&mut self) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn reset(&mut self) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    /// Hand the backend the device lifecycle entry points it may call from
    /// its own threads.
    fn set_callback(&mut self, callbacks: DeviceCallbacks) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn get_volume_level_max(&self, volume_type: VolumeType) -> AudioResult<u32> {
        Err(AudioError::NotImplemented)
    }

    fn get_volume_level(&self, volume_type: VolumeType) -> AudioResult<u32> {
        Err(AudioError::NotImplemented)
    }

    /// Linear gain of `level` for the stream described by `info`.
    fn get_volume_value(
        &self,
        info: &AudioInfo,
        volume_type: VolumeType,
        level: u32,
    ) -> AudioResult<f64> {
        Err(AudioError::NotImplemented)
    }

    /// Persist `level`. With `info` set the level also applies to that stream.
    fn set_volume_level(
        &mut self,
        info: Option<&AudioInfo>,
        volume_type: VolumeType,
        level: u32,
    ) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    /// Apply a raw linear value. The backend may adjust `value` in place.
    fn set_volume_value(
        &mut self,
        info: &AudioInfo,
        volume_type: VolumeType,
        value: &mut f64,
    ) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn get_gain_value(&self, info: &AudioInfo, volume_type: VolumeType) -> AudioResult<f64> {
        Err(AudioError::NotImplemented)
    }

    fn get_mute(
        &self,
        info: Option<&AudioInfo>,
        volume_type: VolumeType,
        direction: Direction,
    ) -> AudioResult<(HalStatus, bool)> {
        Err(AudioError::NotImplemented)
    }

    fn set_mute(
        &mut self,
        info: Option<&AudioInfo>,
        volume_type: VolumeType,
        direction: Direction,
        mute: bool,
    ) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_session(
        &mut self,
        session: Session,
        subsession: Subsession,
        command: SessionCommand,
    ) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_route(
        &mut self,
        session: Session,
        subsession: Subsession,
        device_in: DeviceIn,
        device_out: DeviceOut,
        flags: RouteFlags,
    ) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn alsa_pcm_open(&mut self, device: &str, direction: Direction) -> AudioResult<PcmHandle> {
        Err(AudioError::NotImplemented)
    }

    fn alsa_pcm_close(&mut self, pcm: PcmHandle) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_mixer_value_integer(&mut self, name: &str, value: i32) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_mixer_value_string(&mut self, name: &str, value: &str) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_vsp(&mut self, info: &AudioInfo, value: u32) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_soundalive_filter_action(&mut self, info: &AudioInfo, value: u32) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_soundalive_preset_mode(&mut self, info: &AudioInfo, value: u32) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_soundalive_equalizer(
        &mut self,
        info: &AudioInfo,
        eq: &[u32; CUSTOM_EQ_BAND_MAX],
    ) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_soundalive_extend(
        &mut self,
        info: &AudioInfo,
        ext: &[u32; CUSTOM_EXT_PARAM_MAX],
    ) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_soundalive_device(&mut self, info: &AudioInfo, value: u32) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_soundalive_square(&mut self, info: &AudioInfo, row: u32, col: u32) -> AudioResult {
        Err(AudioError::NotImplemented)
    }

    fn set_dha_param(
        &mut self,
        info: &AudioInfo,
        onoff: bool,
        gain: &[u32; DHA_GAIN_NUM],
    ) -> AudioResult {
        Err(AudioError::NotImplemented)
    }
}

/// Backend with no capabilities at all. Every feature degrades to a no-op.
#[derive(Debug, Default)]
pub struct NullHal;

impl AudioHal for NullHal {
    fn name(&self) -> &str {
        "null"
    }
}

type HalConstructor = fn(&HalConfig) -> Box<dyn AudioHal>;

/// Backends that can be selected by name.
const BACKENDS: &[(&str, HalConstructor)] = &[("soft", soft_backend), ("null", null_backend)];

fn soft_backend(config: &HalConfig) -> Box<dyn AudioHal> {
    Box::new(soft::SoftHal::new(config))
}

fn null_backend(_config: &HalConfig) -> Box<dyn AudioHal> {
    Box::new(NullHal)
}

/// Names of the known backends.
pub fn available_backends() -> impl Iterator<Item = &'static str> {
    BACKENDS.iter().map(|(name, _)| *name)
}

/// Instantiate the backend called `name`.
pub fn load(name: &str, config: &HalConfig) -> Option<Box<dyn AudioHal>> {
    BACKENDS
        .iter()
        .find(|(backend, _)| *backend == name)
        .map(|(_, construct)| construct(config))
}
