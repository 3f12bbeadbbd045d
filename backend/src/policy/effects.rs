//! Global output settings and per-stream post-processing.

use super::info::{gain_type_of, policy_of};
use super::PolicyEngine;
use crate::error::bound;
use audio_policy_types::command::{CUSTOM_EQ_BAND_MAX, CUSTOM_EXT_PARAM_MAX, DHA_GAIN_NUM};
use audio_policy_types::{Direction, GainType, PolicyEvent, StreamPolicy, VolumeType};
use tracing::{debug, info, warn};

const BALANCE_EPSILON: f64 = 0.000_000_01;

/// Post-processing parameter addressed to one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectParam {
    /// Variable speed playback
    Vsp(u32),
    FilterAction(u32),
    PresetMode(u32),
    Equalizer([u32; CUSTOM_EQ_BAND_MAX]),
    Extend([u32; CUSTOM_EXT_PARAM_MAX]),
    Device(u32),
    Square { row: u32, col: u32 },
    /// Hearing-aid gain curve
    Dha {
        onoff: bool,
        gain: [u32; DHA_GAIN_NUM],
    },
}

impl EffectParam {
    pub fn name(&self) -> &'static str {
        match self {
            EffectParam::Vsp(_) => "vsp",
            EffectParam::FilterAction(_) => "soundalive_filter_action",
            EffectParam::PresetMode(_) => "soundalive_preset_mode",
            EffectParam::Equalizer(_) => "soundalive_equalizer",
            EffectParam::Extend(_) => "soundalive_extend",
            EffectParam::Device(_) => "soundalive_device",
            EffectParam::Square { .. } => "soundalive_square",
            EffectParam::Dha { .. } => "dha",
        }
    }
}

/// Left/right balance of a stereo channel volume, in `[-1, 1]`.
pub fn stereo_balance(volumes: &[u32]) -> f64 {
    let (left, right) = match volumes {
        [left, right, ..] => (f64::from(*left), f64::from(*right)),
        _ => return 0.0,
    };
    if left == right {
        0.0
    } else if left > right {
        -1.0 + right / left
    } else {
        1.0 - left / right
    }
}

/// Rescale the first two channels of `volumes` to `balance`, keeping the
/// louder side's level.
pub fn apply_balance(volumes: &mut [u32], balance: f64) {
    let [left, right, ..] = volumes else {
        return;
    };
    let loudest = f64::from((*left).max(*right));
    if balance <= 0.0 {
        *right = ((balance + 1.0) * loudest).round() as u32;
        *left = loudest as u32;
    } else {
        *left = ((1.0 - balance) * loudest).round() as u32;
        *right = loudest as u32;
    }
}

impl PolicyEngine {
    /// Hand an effect parameter for stream `idx` to the HAL. Streams the
    /// HAL cannot describe are skipped.
    pub fn set_effect(&mut self, idx: u32, param: EffectParam) {
        if self.core.sink_input(idx).is_none() {
            return;
        }
        let info = match self.playback_info(idx) {
            Ok(info) => info,
            Err(_) => {
                debug!("skip {} to sink-input[{}]", param.name(), idx);
                return;
            }
        };

        let result = match &param {
            EffectParam::Vsp(value) => self.hal.set_vsp(&info, *value),
            EffectParam::FilterAction(value) => {
                self.hal.set_soundalive_filter_action(&info, *value)
            }
            EffectParam::PresetMode(value) => self.hal.set_soundalive_preset_mode(&info, *value),
            EffectParam::Equalizer(eq) => self.hal.set_soundalive_equalizer(&info, eq),
            EffectParam::Extend(ext) => self.hal.set_soundalive_extend(&info, ext),
            EffectParam::Device(value) => self.hal.set_soundalive_device(&info, *value),
            EffectParam::Square { row, col } => {
                self.hal.set_soundalive_square(&info, *row, *col)
            }
            EffectParam::Dha { onoff, gain } => self.hal.set_dha_param(&info, *onoff, gain),
        };
        if let Err(e) = bound(result) {
            warn!("{} on sink-input[{}] failed: {}", param.name(), idx, e);
        }
    }

    pub fn set_mono(&mut self, enable: bool) {
        if enable == self.core.is_mono {
            debug!("No changes in mono value = {}", enable);
            return;
        }
        debug!("new mono value = {}", enable);
        self.core.is_mono = enable;
    }

    /// Apply the balance of `volumes` to every sink. Returns false when the
    /// balance did not change.
    pub fn set_balance(&mut self, volumes: &[u32]) -> bool {
        let balance = stereo_balance(volumes);
        if (self.balance - balance).abs() <= BALANCE_EPSILON {
            debug!("No changes in balance value = [{}]", self.balance);
            return false;
        }
        debug!("new balance value = [{}]", balance);
        self.balance = balance;

        for sink in self.core.sink_indices() {
            let Some(mut channels) = self.core.sink(sink).map(|s| s.channel_volumes.clone()) else {
                continue;
            };
            apply_balance(&mut channels, balance);
            self.core.set_channel_volumes(sink, channels);
        }
        true
    }

    /// Mute or unmute every output volume type and every stream.
    ///
    /// The booting sound keeps playing through a mute.
    pub fn set_muteall(&mut self, enable: bool) {
        if enable == self.core.muteall {
            debug!("No changes in muteall value = {}", enable);
            return;
        }
        info!("new muteall value = {}", enable);

        // Unmutes are ignored while muteall is set, so clear it first.
        if !enable {
            self.core.muteall = false;
        }
        for volume_type in VolumeType::ALL.iter().copied() {
            if let Err(e) = self.set_mute(None, Some(volume_type), Direction::Out, enable) {
                debug!("muteall: set_mute {} failed: {}", volume_type, e);
            }
        }
        for idx in self.core.sink_input_indices() {
            let Some(input) = self.core.sink_input_mut(idx) else {
                continue;
            };
            let booting = gain_type_of(&input.proplist) == GainType::Booting;
            input.muted = enable && !booting;
        }
        if enable {
            self.core.muteall = true;
        }
        self.publish(PolicyEvent::MuteAllChanged { enabled: enable });
    }

    pub fn muteall(&self) -> bool {
        self.core.muteall
    }

    /// False while a high-latency stream already sits on the high-latency
    /// sink.
    pub fn is_available_high_latency(&self) -> bool {
        let taken = self.core.sink_inputs().any(|input| {
            policy_of(&input.proplist) == Some(StreamPolicy::HighLatency)
                && input
                    .sink
                    .and_then(|s| self.core.sink(s))
                    .is_some_and(|s| s.is_high_latency())
        });
        if taken {
            info!("high latency is exists");
        }
        !taken
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{engine, play};
    use super::*;
    use crate::core::VOLUME_NORM;
    use crate::hal::soft::HalCall;

    #[test]
    fn test_balance_math() {
        assert_eq!(stereo_balance(&[100, 100]), 0.0);
        assert!((stereo_balance(&[100, 50]) + 0.5).abs() < 1e-9);
        assert!((stereo_balance(&[50, 100]) - 0.5).abs() < 1e-9);
        assert_eq!(stereo_balance(&[100]), 0.0);

        let mut volumes = [1000, 1000];
        apply_balance(&mut volumes, 0.5);
        assert_eq!(volumes, [500, 1000]);
        apply_balance(&mut volumes, -0.25);
        assert_eq!(volumes, [1000, 750]);
    }

    #[test]
    fn test_set_balance_applies_to_sinks() {
        let (mut engine, _probe) = engine();
        assert!(engine.set_balance(&[VOLUME_NORM / 2, VOLUME_NORM]));
        assert!(!engine.set_balance(&[VOLUME_NORM / 2, VOLUME_NORM]));
        assert!((engine.balance() - 0.5).abs() < 1e-9);

        let alsa = engine
            .core()
            .sink_index(audio_policy_types::names::SINK_ALSA)
            .unwrap();
        let channels = &engine.core().sink(alsa).unwrap().channel_volumes;
        assert!(channels[0] < channels[1]);
    }

    #[test]
    fn test_muteall_spares_booting_sound() {
        let (mut engine, probe) = engine();
        let music = play(&mut engine, "auto", VolumeType::Media);
        let boot = super::super::tests::stream_props(
            "boot",
            "auto",
            VolumeType::Fixed,
            GainType::Booting,
        );
        let boot = engine
            .create_sink_input(crate::core::SinkInputNewData::new(boot, Default::default()))
            .unwrap();

        engine.set_muteall(true);
        assert!(engine.muteall());
        assert!(engine.core().sink_input(music).unwrap().muted);
        assert!(!engine.core().sink_input(boot).unwrap().muted);
        assert!(probe
            .calls()
            .iter()
            .any(|c| matches!(c, HalCall::SetMute { volume_type: VolumeType::Media, mute: true, .. })));

        engine.set_muteall(false);
        assert!(!engine.muteall());
        assert!(!engine.core().sink_input(music).unwrap().muted);
        assert!(probe
            .calls()
            .iter()
            .any(|c| matches!(c, HalCall::SetMute { volume_type: VolumeType::Media, mute: false, .. })));
    }

    #[test]
    fn test_effects_reach_hal() {
        let (mut engine, probe) = engine();
        let idx = play(&mut engine, "auto", VolumeType::Media);
        probe.clear_calls();

        engine.set_effect(idx, EffectParam::Vsp(3));
        engine.set_effect(idx, EffectParam::Square { row: 1, col: 2 });
        engine.set_effect(
            idx,
            EffectParam::Dha {
                onoff: true,
                gain: [7; DHA_GAIN_NUM],
            },
        );
        engine.set_effect(999, EffectParam::Vsp(1));

        let effects: Vec<(&str, Vec<u32>)> = probe
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                HalCall::Effect { name, values, .. } => Some((name, values)),
                _ => None,
            })
            .collect();
        assert_eq!(effects.len(), 3);
        assert_eq!(effects[0], ("vsp", vec![3]));
        assert_eq!(effects[1], ("soundalive_square", vec![1, 2]));
        assert_eq!(effects[2].1.len(), DHA_GAIN_NUM + 1);
    }

    #[test]
    fn test_high_latency_availability() {
        let (mut engine, _probe) = engine();
        assert!(engine.is_available_high_latency());
        engine.set_mono(true);
        assert!(engine.core().is_mono);
    }
}
