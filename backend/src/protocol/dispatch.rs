//! Extension command decoding and execution.
//!
//! A request frame is `u32 tag`, `u32 subcommand` and the subcommand's
//! fields. Every well-formed request gets exactly one reply frame
//! (`REPLY`, tag, payload); a request that cannot be decoded gets an
//! `ERROR` frame carrying `ERR_PROTOCOL` and nothing else happens.

use super::tagstruct::{TagError, TagReader, TagWriter};
use crate::policy::{EffectParam, PolicyEngine};
use crate::error::AudioError;
use audio_policy_types::command::{
    COMMAND_ERROR, COMMAND_REPLY, CUSTOM_EQ_BAND_MAX, CUSTOM_EXT_PARAM_MAX, DHA_GAIN_NUM,
    ERR_PROTOCOL, EXT_VERSION,
};
use audio_policy_types::{
    BtBandwidth, CallNetworkType, DeviceIn, DeviceOut, Direction, FadeDirection, GainType,
    Session, Subcommand, Subsession, SubsessionOptions, VolumeType, INVALID_INDEX,
};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error("unknown subcommand {0}")]
    UnknownSubcommand(u32),
    #[error("{field} value {value} is out of range")]
    OutOfRange { field: &'static str, value: u32 },
    #[error("{0} must not be a null string")]
    NullString(&'static str),
}

/// A decoded extension request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Test,
    PlaySample {
        name: String,
        volume_type: u32,
        gain_type: u32,
        level: u32,
    },
    PlaySampleContinuously {
        name: String,
        start: bool,
        volume_type: u32,
        gain_type: u32,
        level: u32,
        interval: Duration,
    },
    Mono(bool),
    Balance(Vec<u32>),
    Muteall(bool),
    SvoiceWakeupEnable(u32),
    SvoiceSeamlessOnoff(u32),
    SvoiceSetParam { name: String, value: u32 },
    SetUseCase,
    SetSession { session: Session, start: bool },
    SetSubsession {
        subsession: Subsession,
        options: SubsessionOptions,
    },
    SetActiveDevice {
        device_in: DeviceIn,
        device_out: DeviceOut,
    },
    Reset,
    GetVolumeLevelMax { volume_type: u32 },
    GetVolumeLevel { stream: u32, volume_type: u32 },
    SetVolumeLevel {
        stream: u32,
        volume_type: u32,
        level: u32,
    },
    UpdateVolume,
    GetMute {
        stream: u32,
        volume_type: u32,
        direction: u32,
    },
    SetMute {
        stream: u32,
        volume_type: u32,
        direction: u32,
        mute: bool,
    },
    VolumeFade {
        stream: u32,
        direction: FadeDirection,
        duration_ms: u32,
    },
    IsAvailableHighLatency,
    UnloadHdmi,
    SetCallNetworkType(CallNetworkType),
    SetCallNrec(u32),
    SetCallExtraVolume(u32),
    SetBluetoothBandwidth(BtBandwidth),
    SetBluetoothNrec(u32),
    Effect { stream: u32, param: EffectParam },
}

fn wire_value<T>(
    field: &'static str,
    value: u32,
    decode: fn(u32) -> Option<T>,
) -> Result<T, DispatchError> {
    decode(value).ok_or(DispatchError::OutOfRange { field, value })
}

fn string(r: &mut TagReader, field: &'static str) -> Result<String, DispatchError> {
    r.get_string()?.ok_or(DispatchError::NullString(field))
}

fn u32_array<const N: usize>(r: &mut TagReader) -> Result<[u32; N], DispatchError> {
    let mut values = [0; N];
    for v in values.iter_mut() {
        *v = r.get_u32()?;
    }
    Ok(values)
}

impl Request {
    /// Read the fields of `subcommand` from `r`.
    pub fn decode(subcommand: u32, r: &mut TagReader) -> Result<Self, DispatchError> {
        let command =
            Subcommand::from_u32(subcommand).ok_or(DispatchError::UnknownSubcommand(subcommand))?;

        let request = match command {
            Subcommand::Test => {
                r.expect_eof()?;
                Request::Test
            }
            Subcommand::PlaySample => {
                let request = Request::PlaySample {
                    name: string(r, "sample name")?,
                    volume_type: r.get_u32()?,
                    gain_type: r.get_u32()?,
                    level: r.get_u32()?,
                };
                r.expect_eof()?;
                request
            }
            Subcommand::PlaySampleContinuously => {
                let request = Request::PlaySampleContinuously {
                    name: string(r, "sample name")?,
                    start: r.get_boolean()?,
                    volume_type: r.get_u32()?,
                    gain_type: r.get_u32()?,
                    level: r.get_u32()?,
                    interval: Duration::from_micros(r.get_usec()?),
                };
                r.expect_eof()?;
                request
            }
            Subcommand::Mono => Request::Mono(r.get_boolean()?),
            Subcommand::Balance => Request::Balance(r.get_cvolume()?),
            Subcommand::Muteall => Request::Muteall(r.get_boolean()?),
            Subcommand::SvoiceWakeupEnable => Request::SvoiceWakeupEnable(r.get_u32()?),
            Subcommand::SvoiceSeamlessOnoff => Request::SvoiceSeamlessOnoff(r.get_u32()?),
            Subcommand::SvoiceSetParam => Request::SvoiceSetParam {
                name: string(r, "svoice parameter")?,
                value: r.get_u32()?,
            },
            Subcommand::SetUseCase => Request::SetUseCase,
            Subcommand::SetSession => Request::SetSession {
                session: wire_value("session", r.get_u32()?, Session::from_u32)?,
                start: r.get_u32()? != 0,
            },
            Subcommand::SetSubsession => Request::SetSubsession {
                subsession: wire_value("subsession", r.get_u32()?, Subsession::from_u32)?,
                options: SubsessionOptions::from_bits_retain(r.get_u32()?),
            },
            Subcommand::SetActiveDevice => Request::SetActiveDevice {
                device_in: wire_value("device_in", r.get_u32()?, DeviceIn::from_u32)?,
                device_out: wire_value("device_out", r.get_u32()?, DeviceOut::from_u32)?,
            },
            Subcommand::Reset => Request::Reset,
            Subcommand::GetVolumeLevelMax => Request::GetVolumeLevelMax {
                volume_type: r.get_u32()?,
            },
            Subcommand::GetVolumeLevel => Request::GetVolumeLevel {
                stream: r.get_u32()?,
                volume_type: r.get_u32()?,
            },
            Subcommand::SetVolumeLevel => Request::SetVolumeLevel {
                stream: r.get_u32()?,
                volume_type: r.get_u32()?,
                level: r.get_u32()?,
            },
            Subcommand::UpdateVolume => Request::UpdateVolume,
            Subcommand::GetMute => Request::GetMute {
                stream: r.get_u32()?,
                volume_type: r.get_u32()?,
                direction: r.get_u32()?,
            },
            Subcommand::SetMute => Request::SetMute {
                stream: r.get_u32()?,
                volume_type: r.get_u32()?,
                direction: r.get_u32()?,
                mute: r.get_u32()? != 0,
            },
            Subcommand::VolumeFade => Request::VolumeFade {
                stream: r.get_u32()?,
                direction: wire_value("fade direction", r.get_u32()?, FadeDirection::from_u32)?,
                duration_ms: r.get_u32()?,
            },
            Subcommand::IsAvailableHighLatency => Request::IsAvailableHighLatency,
            Subcommand::UnloadHdmi => Request::UnloadHdmi,
            Subcommand::SetCallNetworkType => Request::SetCallNetworkType(wire_value(
                "call network type",
                r.get_u32()?,
                CallNetworkType::from_u32,
            )?),
            Subcommand::SetCallNrec => Request::SetCallNrec(r.get_u32()?),
            Subcommand::SetCallExtraVolume => Request::SetCallExtraVolume(r.get_u32()?),
            Subcommand::SetBluetoothBandwidth => Request::SetBluetoothBandwidth(wire_value(
                "bluetooth bandwidth",
                r.get_u32()?,
                BtBandwidth::from_u32,
            )?),
            Subcommand::SetBluetoothNrec => Request::SetBluetoothNrec(r.get_u32()?),
            Subcommand::VspSpeed => Request::Effect {
                stream: r.get_u32()?,
                param: EffectParam::Vsp(r.get_u32()?),
            },
            Subcommand::SaFilterAction => Request::Effect {
                stream: r.get_u32()?,
                param: EffectParam::FilterAction(r.get_u32()?),
            },
            Subcommand::SaPresetMode => Request::Effect {
                stream: r.get_u32()?,
                param: EffectParam::PresetMode(r.get_u32()?),
            },
            Subcommand::SaEq => Request::Effect {
                stream: r.get_u32()?,
                param: EffectParam::Equalizer(u32_array::<CUSTOM_EQ_BAND_MAX>(r)?),
            },
            Subcommand::SaExtend => Request::Effect {
                stream: r.get_u32()?,
                param: EffectParam::Extend(u32_array::<CUSTOM_EXT_PARAM_MAX>(r)?),
            },
            Subcommand::SaDevice => Request::Effect {
                stream: r.get_u32()?,
                param: EffectParam::Device(r.get_u32()?),
            },
            Subcommand::SaSquare => Request::Effect {
                stream: r.get_u32()?,
                param: EffectParam::Square {
                    row: r.get_u32()?,
                    col: r.get_u32()?,
                },
            },
            Subcommand::DhaParam => Request::Effect {
                stream: r.get_u32()?,
                param: EffectParam::Dha {
                    onoff: r.get_u32()? != 0,
                    gain: u32_array::<DHA_GAIN_NUM>(r)?,
                },
            },
        };
        Ok(request)
    }
}

/// `INVALID_INDEX` on the wire means "not given".
fn given(value: u32) -> Option<u32> {
    (value != INVALID_INDEX).then_some(value)
}

fn volume_type_arg(value: u32) -> Result<Option<VolumeType>, AudioError> {
    match given(value) {
        None => Ok(None),
        Some(raw) => VolumeType::from_u32(raw)
            .map(Some)
            .ok_or(AudioError::Parameter),
    }
}

fn direction_arg(value: u32) -> Result<Direction, AudioError> {
    Direction::from_u32(value).ok_or(AudioError::Parameter)
}

fn sample_profile(volume_type: u32, gain_type: u32) -> Result<(VolumeType, GainType), AudioError> {
    let volume_type = VolumeType::from_u32(volume_type).ok_or(AudioError::Parameter)?;
    let gain_type = GainType::from_u32(gain_type).ok_or(AudioError::Parameter)?;
    Ok((volume_type, gain_type))
}

/// Run `request` and return the reply payload, if the subcommand has one.
///
/// Engine failures are logged and turned into the subcommand's neutral
/// payload; they never fail the request.
pub fn execute(engine: &mut PolicyEngine, request: Request) -> Option<u32> {
    match request {
        Request::Test => Some(EXT_VERSION),

        Request::PlaySample {
            name,
            volume_type,
            gain_type,
            level,
        } => {
            let played = sample_profile(volume_type, gain_type).and_then(|(vt, gt)| {
                engine.play_sample(&name, vt, gt, level)
            });
            Some(played.unwrap_or_else(|e| {
                warn!("play_sample {} failed: {}", name, e);
                INVALID_INDEX
            }))
        }

        Request::PlaySampleContinuously {
            name,
            start,
            volume_type,
            gain_type,
            level,
            interval,
        } => {
            let mut stream = INVALID_INDEX;
            if start {
                if engine.burst_shot_running() {
                    warn!("play_sample_continuously is in running state - do nothing");
                } else {
                    info!(
                        "play_sample_continuously start. name({}), type({},{}), level({}), interval({:?})",
                        name, volume_type, gain_type, level, interval
                    );
                    match sample_profile(volume_type, gain_type).and_then(|(vt, gt)| {
                        engine.play_sample_continuously(&name, vt, gt, level, interval)
                    }) {
                        Ok(idx) => stream = idx,
                        Err(e) => warn!("play_sample_continuously {} failed: {}", name, e),
                    }
                }
            } else if engine.burst_shot_running() {
                info!("play_sample_continuously end.");
                engine.stop_sample_continuously();
            } else {
                error!(
                    "play sample continuously unknown command. name({}), start({})",
                    name, start
                );
            }
            Some(stream)
        }

        Request::Mono(enable) => {
            engine.set_mono(enable);
            None
        }
        Request::Balance(volumes) => {
            engine.set_balance(&volumes);
            None
        }
        Request::Muteall(enable) => {
            engine.set_muteall(enable);
            None
        }

        Request::SvoiceWakeupEnable(enable) => {
            engine.svoice_wakeup_enable(enable == 1);
            None
        }
        Request::SvoiceSeamlessOnoff(onoff) => {
            engine.svoice_seamless_onoff(onoff == 1);
            None
        }
        Request::SvoiceSetParam { name, value } => {
            engine.svoice_set_param(&name, value);
            None
        }

        Request::SetUseCase | Request::UnloadHdmi => None,

        Request::SetSession { session, start } => {
            if let Err(e) = engine.set_session(session, start) {
                warn!("set_session {} failed: {}", session, e);
            }
            None
        }
        Request::SetSubsession {
            subsession,
            options,
        } => {
            if let Err(e) = engine.set_subsession(subsession, options) {
                warn!("set_subsession {} failed: {}", subsession, e);
            }
            None
        }
        Request::SetActiveDevice {
            device_in,
            device_out,
        } => {
            let need_update = engine
                .set_active_device(device_in, device_out)
                .unwrap_or_else(|e| {
                    warn!("set_active_device {}/{} failed: {}", device_in, device_out, e);
                    false
                });
            Some(u32::from(need_update))
        }
        Request::Reset => {
            if let Err(e) = engine.reset() {
                warn!("reset failed: {}", e);
            }
            None
        }

        Request::GetVolumeLevelMax { volume_type } => {
            let max = VolumeType::from_u32(volume_type)
                .ok_or(AudioError::Parameter)
                .and_then(|vt| engine.get_volume_level_max(vt));
            Some(max.unwrap_or_else(|e| {
                warn!("get_volume_level_max {} failed: {}", volume_type, e);
                0
            }))
        }
        Request::GetVolumeLevel {
            stream,
            volume_type,
        } => {
            let level = volume_type_arg(volume_type)
                .and_then(|vt| engine.get_volume_level(given(stream), vt))
                .map(|(_, level)| level);
            Some(level.unwrap_or_else(|e| {
                debug!("get_volume_level {}/{} failed: {}", stream, volume_type, e);
                0
            }))
        }
        Request::SetVolumeLevel {
            stream,
            volume_type,
            level,
        } => {
            let result = volume_type_arg(volume_type)
                .and_then(|vt| engine.set_volume_level(given(stream), vt, level));
            if let Err(e) = result {
                warn!("set_volume_level {}/{} failed: {}", stream, volume_type, e);
            }
            None
        }
        Request::UpdateVolume => {
            if let Err(e) = engine.update_volume_all() {
                warn!("update_volume failed: {}", e);
            }
            None
        }
        Request::GetMute {
            stream,
            volume_type,
            direction,
        } => {
            let mute = volume_type_arg(volume_type).and_then(|vt| {
                engine.get_mute(given(stream), vt, direction_arg(direction)?)
            });
            Some(u32::from(mute.unwrap_or_else(|e| {
                debug!("get_mute {}/{} failed: {}", stream, volume_type, e);
                false
            })))
        }
        Request::SetMute {
            stream,
            volume_type,
            direction,
            mute,
        } => {
            let result = volume_type_arg(volume_type).and_then(|vt| {
                engine.set_mute(given(stream), vt, direction_arg(direction)?, mute)
            });
            if let Err(e) = result {
                warn!("set_mute {}/{} failed: {}", stream, volume_type, e);
            }
            None
        }
        Request::VolumeFade {
            stream,
            direction,
            duration_ms,
        } => {
            if let Err(e) = engine.volume_fade(stream, direction, duration_ms) {
                debug!("volume_fade on {} refused: {}", stream, e);
            }
            None
        }
        Request::IsAvailableHighLatency => {
            Some(u32::from(engine.is_available_high_latency()))
        }

        Request::SetCallNetworkType(call_type) => {
            engine.set_call_network_type(call_type);
            Some(call_type.as_u32())
        }
        Request::SetCallNrec(nrec) => {
            engine.set_call_nrec(nrec);
            Some(nrec)
        }
        Request::SetCallExtraVolume(extra) => {
            engine.set_call_extra_volume(extra);
            Some(extra)
        }
        Request::SetBluetoothBandwidth(bandwidth) => {
            engine.set_bt_bandwidth(bandwidth);
            Some(bandwidth.as_u32())
        }
        Request::SetBluetoothNrec(nrec) => {
            engine.set_bt_nrec(nrec);
            Some(nrec)
        }

        Request::Effect { stream, param } => {
            engine.set_effect(stream, param);
            None
        }
    }
}

/// Decode `frame`, run it and build the reply frame.
pub fn handle_frame(engine: &mut PolicyEngine, frame: Bytes) -> Bytes {
    let mut r = TagReader::new(frame);
    let tag = match r.get_u32() {
        Ok(tag) => tag,
        Err(e) => {
            error!("protocol error: no request tag: {}", e);
            return error_frame(INVALID_INDEX);
        }
    };

    let request = r
        .get_u32()
        .map_err(DispatchError::from)
        .and_then(|subcommand| Request::decode(subcommand, &mut r));
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            error!("protocol error in request {}: {}", tag, e);
            return error_frame(tag);
        }
    };
    debug!("request {}: {:?}", tag, request);

    let mut reply = TagWriter::new();
    reply.put_u32(COMMAND_REPLY).put_u32(tag);
    if let Some(payload) = execute(engine, request) {
        reply.put_u32(payload);
    }
    reply.freeze()
}

pub fn error_frame(tag: u32) -> Bytes {
    let mut reply = TagWriter::new();
    reply
        .put_u32(COMMAND_ERROR)
        .put_u32(tag)
        .put_u32(ERR_PROTOCOL);
    reply.freeze()
}
