//! Session, sub-session and active device handling.

use super::PolicyEngine;
use crate::error::{bound, AudioResult, HalStatus};
use audio_policy_types::{
    BtBandwidth, CallNetworkType, DeviceIn, DeviceOut, Direction, PolicyEvent, RouteFlags,
    Session, SessionCommand, Subsession, SubsessionOptions, VolumeType,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

impl PolicyEngine {
    /// Start or end `session`.
    ///
    /// Entering or leaving an alarm or notification session re-routes
    /// immediately, since those ring on both outputs. Any other change
    /// leaves the route to the next `set_active_device`.
    pub fn set_session(&mut self, session: Session, start: bool) -> AudioResult {
        let prev_session = self.route.session;
        info!(
            "set_session:{} {} (current:{},{})",
            session,
            if start { "start" } else { "end" },
            self.route.session,
            self.route.subsession
        );

        if start {
            self.route.session = session;
            self.route.subsession = match session {
                Session::Voicecall | Session::Videocall => {
                    if self.svoice.requested && self.svoice.enabled {
                        info!("Disable [seamless voice] when call session is created");
                        let _ = self.enable_seamless_voice(false);
                    }
                    self.call_muted = false;
                    Subsession::Media
                }
                Session::Voip => Subsession::Voice,
                Session::VoiceRecognition => Subsession::Init,
                _ => Subsession::None,
            };
            if let Err(e) = bound(self.hal.set_session(
                session,
                self.route.subsession,
                SessionCommand::Start,
            )) {
                warn!("HAL set_session start failed: {}", e);
            }
        } else {
            if let Err(e) = bound(self.hal.set_session(
                session,
                self.route.subsession,
                SessionCommand::End,
            )) {
                warn!("HAL set_session end failed: {}", e);
            }
            self.route.session = Session::Media;
            self.route.subsession = Subsession::None;

            if prev_session.is_call() && self.svoice.requested && !self.svoice.enabled {
                let _ = self.enable_seamless_voice(true);
            }
        }

        let need_route = prev_session != session
            && (session.uses_dual_output() || prev_session.uses_dual_output());
        if need_route {
            info!("switch route for dual output session change");
            let flags = self.current_route_flags();
            self.hal_set_route(self.route.device_in, self.route.device_out, flags);
            self.route.active_route_flag = Some(flags);
        } else {
            self.route.active_route_flag = None;
        }

        self.publish(PolicyEvent::SessionChanged {
            session: self.route.session,
            subsession: self.route.subsession,
        });
        Ok(HalStatus::Ok)
    }

    /// Refine the current session. Options only apply to the
    /// voice-recognition sub-sessions.
    pub fn set_subsession(
        &mut self,
        subsession: Subsession,
        options: SubsessionOptions,
    ) -> AudioResult {
        info!(
            "set_subsession:{}->{} opt:{:x}->{:x} (session:{})",
            self.route.subsession,
            subsession,
            self.route.subsession_opt.bits(),
            options.bits(),
            self.route.session
        );
        if self.route.subsession == subsession && self.route.subsession_opt == options {
            debug!(
                "duplicated request is ignored subsession({}) opt(0x{:x})",
                subsession,
                options.bits()
            );
            return Ok(HalStatus::Ok);
        }

        self.route.subsession = subsession;
        self.route.subsession_opt = match subsession {
            Subsession::VrNormal | Subsession::VrDrive => options,
            _ => SubsessionOptions::empty(),
        };
        if let Err(e) = bound(self.hal.set_session(
            self.route.session,
            subsession,
            SessionCommand::Subsession,
        )) {
            warn!("HAL set_session subsession failed: {}", e);
        }

        self.publish(PolicyEvent::SubsessionChanged {
            subsession,
            options: self.route.subsession_opt.bits(),
        });
        Ok(HalStatus::Ok)
    }

    fn hal_set_route(&mut self, device_in: DeviceIn, device_out: DeviceOut, flags: RouteFlags) {
        if let Err(e) = bound(self.hal.set_route(
            self.route.session,
            self.route.subsession,
            device_in,
            device_out,
            flags,
        )) {
            error!("HAL set_route failed: {}", e);
        }
    }

    /// Select the active input and output devices.
    ///
    /// Streams marked by the previous output switch are muted around the
    /// HAL route change and restored afterwards. Returns whether observers
    /// should treat this as a volume change, which is not the case when
    /// the output stays the same.
    pub fn set_active_device(
        &mut self,
        device_in: DeviceIn,
        device_out: DeviceOut,
    ) -> AudioResult<bool> {
        let old_out = self.route.device_out;
        let flags = self.current_route_flags();
        info!(
            "set_active_device session:{},{} in:{}->{} out:{}->{} flag:{:?}->{} muteall:{} call_muted:{}",
            self.route.session,
            self.route.subsession,
            self.route.device_in,
            device_in,
            old_out,
            device_out,
            self.route.active_route_flag,
            flags,
            self.core.muteall,
            self.call_muted
        );

        if self.route.device_in == device_in
            && self.route.device_out == device_out
            && self.route.active_route_flag == Some(flags)
        {
            debug!(
                "duplicated request is ignored in({}) out({}) flag({})",
                device_in, device_out, flags
            );
            return Ok(false);
        }
        let need_update = old_out != device_out;

        let switching: Vec<u32> = self
            .core
            .sink_input_indices()
            .into_iter()
            .filter(|idx| self.stream_marks(*idx).device_switching)
            .collect();
        for idx in &switching {
            if let Err(e) = self.set_mute(Some(*idx), None, Direction::Out, true) {
                warn!("muting stream[{}] before route change failed: {}", idx, e);
            }
        }
        if !switching.is_empty() && self.config.ucm_sleep_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.ucm_sleep_ms));
        }

        self.hal_set_route(device_in, device_out, flags);

        for idx in switching {
            self.marks_mut(idx).device_switching = false;
            if let Err(e) = self.update_volume(Some(idx), None, None) {
                warn!("restoring volume of stream[{}] failed: {}", idx, e);
            }
            if let Err(e) = self.set_mute(Some(idx), None, Direction::Out, false) {
                warn!("unmuting stream[{}] after route change failed: {}", idx, e);
            }
        }

        if device_out != DeviceOut::None && old_out != device_out && !self.route.session.is_call()
        {
            let unmuted: Vec<u32> = self
                .core
                .sink_inputs()
                .filter(|input| !input.muted)
                .map(|input| input.index)
                .collect();
            for idx in unmuted {
                self.marks_mut(idx).device_switching = true;
            }
        }

        if device_in != DeviceIn::None {
            self.route.device_in = device_in;
        }
        if device_out != DeviceOut::None {
            self.route.device_out = device_out;
        }
        self.route.active_route_flag = Some(flags);

        if self.route.session == Session::Voicecall {
            if self.core.muteall {
                let _ = self.set_mute(None, Some(VolumeType::Call), Direction::Out, true);
            }
            let call_muted = self.call_muted;
            let _ = self.set_mute(None, Some(VolumeType::Call), Direction::In, call_muted);
        }

        if self.svoice.requested && old_out.is_bluetooth() != device_out.is_bluetooth() {
            if self.media_playing(false).is_some() {
                if device_out.is_bluetooth() && !self.svoice.enabled {
                    info!("enable [seamless voice] as BT connected during playback");
                    let _ = self.enable_seamless_voice(true);
                } else if !device_out.is_bluetooth() && self.svoice.enabled {
                    info!("disable [seamless voice] as BT disconnected during playback");
                    let _ = self.enable_seamless_voice(false);
                }
            }
        }

        self.publish(PolicyEvent::RouteChanged {
            device_in: self.route.device_in,
            device_out: self.route.device_out,
            route_flags: flags.bits(),
        });
        Ok(need_update)
    }

    pub fn set_call_network_type(&mut self, call_type: CallNetworkType) {
        debug!("new network type is {}", call_type);
        self.route.call_type = call_type;
    }

    pub fn set_call_nrec(&mut self, nrec: u32) {
        debug!("new call noise reduction is {}", nrec != 0);
        self.route.call_nrec = nrec;
    }

    pub fn set_call_extra_volume(&mut self, extra_volume: u32) {
        debug!("new call extra volume is {}", extra_volume != 0);
        self.route.call_extra_volume = extra_volume;
    }

    pub fn set_bt_bandwidth(&mut self, bandwidth: BtBandwidth) {
        debug!("bt bandwidth is {}", bandwidth);
        self.route.bt_bandwidth = bandwidth;
    }

    pub fn set_bt_nrec(&mut self, nrec: u32) {
        debug!("bt nrec is {}", nrec);
        self.route.bt_nrec = nrec;
    }

    /// Ask the HAL to reset its codec state.
    pub fn reset(&mut self) -> AudioResult {
        debug!("reset");
        match bound(self.hal.reset()) {
            Ok(status) => Ok(status.unwrap_or(HalStatus::Ok)),
            Err(e) => {
                error!("HAL reset failed: {}", e);
                Err(e)
            }
        }
    }
}
