//! Route flag resolution.

use audio_policy_types::{
    BtBandwidth, CallNetworkType, DeviceIn, DeviceOut, RouteFlags, Session, Subsession,
    SubsessionOptions,
};

/// Session, device and call settings owned by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteState {
    pub session: Session,
    pub subsession: Subsession,
    pub subsession_opt: SubsessionOptions,
    pub device_in: DeviceIn,
    pub device_out: DeviceOut,
    /// Flags last sent to the HAL. `None` forces the next route call.
    pub active_route_flag: Option<RouteFlags>,
    pub call_type: CallNetworkType,
    pub call_nrec: u32,
    pub call_extra_volume: u32,
    pub bt_bandwidth: BtBandwidth,
    pub bt_nrec: u32,
}

impl Default for RouteState {
    fn default() -> Self {
        Self {
            session: Session::Media,
            subsession: Subsession::None,
            subsession_opt: SubsessionOptions::empty(),
            device_in: DeviceIn::None,
            device_out: DeviceOut::None,
            active_route_flag: None,
            call_type: CallNetworkType::None,
            call_nrec: 0,
            call_extra_volume: 0,
            bt_bandwidth: BtBandwidth::Nb,
            bt_nrec: 0,
        }
    }
}

/// Everything the route flags depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInputs {
    pub session: Session,
    pub subsession: Subsession,
    pub subsession_opt: SubsessionOptions,
    pub call_type: CallNetworkType,
    pub call_nrec: u32,
    pub call_extra_volume: u32,
    pub bt_bandwidth: BtBandwidth,
    pub bt_nrec: u32,
    /// Sound is switched off on the device
    pub mute_policy: bool,
    pub recording: bool,
    pub seamless_wakeup: bool,
}

impl RouteInputs {
    pub fn from_state(
        state: &RouteState,
        mute_policy: bool,
        recording: bool,
        seamless_wakeup: bool,
    ) -> Self {
        Self {
            session: state.session,
            subsession: state.subsession,
            subsession_opt: state.subsession_opt,
            call_type: state.call_type,
            call_nrec: state.call_nrec,
            call_extra_volume: state.call_extra_volume,
            bt_bandwidth: state.bt_bandwidth,
            bt_nrec: state.bt_nrec,
            mute_policy,
            recording,
            seamless_wakeup,
        }
    }
}

/// Ringing paths: mute policy wins, otherwise ring on both outputs unless
/// something records.
fn ring_flags(inputs: &RouteInputs) -> RouteFlags {
    if inputs.mute_policy {
        RouteFlags::MUTE_POLICY
    } else if !inputs.recording {
        RouteFlags::DUAL_OUT
    } else {
        RouteFlags::empty()
    }
}

fn bt_flags(inputs: &RouteInputs) -> RouteFlags {
    let mut flags = inputs.bt_bandwidth.route_mask();
    if inputs.bt_nrec > 0 {
        flags |= RouteFlags::BT_NREC;
    }
    flags
}

/// Derive the flags passed to the HAL's `set_route`.
pub fn compute_route_flags(inputs: &RouteInputs) -> RouteFlags {
    let mut flags = RouteFlags::empty();

    match inputs.session {
        Session::Voicecall | Session::Videocall => {
            if inputs.call_type != CallNetworkType::None {
                flags |= inputs.call_type.route_mask();
            }
            flags |= bt_flags(inputs);

            if inputs.subsession == Subsession::Ringtone {
                flags |= ring_flags(inputs);
            } else {
                if inputs.call_nrec == 1 {
                    flags |= RouteFlags::NOISE_REDUCTION;
                }
                if inputs.call_extra_volume == 1 {
                    flags |= RouteFlags::EXTRA_VOL;
                }
                if inputs.call_type.is_wideband() {
                    flags |= RouteFlags::NETWORK_WB;
                }
            }
        }
        Session::Notification => flags |= ring_flags(inputs),
        Session::Alarm => {
            if !inputs.recording {
                flags |= RouteFlags::DUAL_OUT;
            }
        }
        _ => {}
    }

    if inputs.session == Session::VoiceRecognition
        && inputs.subsession_opt.contains(SubsessionOptions::SVOICE)
    {
        if inputs.subsession_opt.contains(SubsessionOptions::COMMAND) {
            flags |= RouteFlags::SVOICE_COMMAND;
        } else if inputs.subsession_opt.contains(SubsessionOptions::WAKEUP) {
            flags |= RouteFlags::SVOICE_WAKEUP;
        }
        flags |= bt_flags(inputs);
    }

    match inputs.subsession {
        Subsession::Init => flags |= RouteFlags::INIT,
        Subsession::MonoRec => flags |= RouteFlags::MONO,
        Subsession::VrNormal => flags |= RouteFlags::VR_NORMAL,
        _ => {}
    }

    if inputs.seamless_wakeup {
        flags |= RouteFlags::SVOICE_SEAMLESS_WAKEUP;
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(session: Session, subsession: Subsession) -> RouteInputs {
        RouteInputs::from_state(
            &RouteState {
                session,
                subsession,
                ..RouteState::default()
            },
            false,
            false,
            false,
        )
    }

    #[test]
    fn test_media_has_no_flags() {
        assert_eq!(
            compute_route_flags(&inputs(Session::Media, Subsession::None)),
            RouteFlags::empty()
        );
    }

    #[test]
    fn test_call_precedence() {
        let mut i = inputs(Session::Voicecall, Subsession::Voice);
        i.call_type = CallNetworkType::CompanionWb;
        i.bt_bandwidth = BtBandwidth::Wb;
        i.bt_nrec = 1;
        i.call_nrec = 1;
        i.call_extra_volume = 2;

        let flags = compute_route_flags(&i);
        assert_eq!(
            flags,
            RouteFlags::NETWORK_TYPE_COMPANION
                | RouteFlags::NETWORK_WB
                | RouteFlags::BT_WB
                | RouteFlags::BT_NREC
                | RouteFlags::NOISE_REDUCTION
        );
    }

    #[test]
    fn test_ringtone_in_call() {
        let mut i = inputs(Session::Voicecall, Subsession::Ringtone);
        i.call_nrec = 1;
        assert_eq!(compute_route_flags(&i), RouteFlags::DUAL_OUT);

        i.recording = true;
        assert_eq!(compute_route_flags(&i), RouteFlags::empty());

        i.mute_policy = true;
        assert_eq!(compute_route_flags(&i), RouteFlags::MUTE_POLICY);
    }

    #[test]
    fn test_notification_and_alarm() {
        let mut n = inputs(Session::Notification, Subsession::None);
        n.mute_policy = true;
        assert_eq!(compute_route_flags(&n), RouteFlags::MUTE_POLICY);

        let mut a = inputs(Session::Alarm, Subsession::None);
        a.mute_policy = true;
        assert_eq!(compute_route_flags(&a), RouteFlags::DUAL_OUT);
        a.recording = true;
        assert_eq!(compute_route_flags(&a), RouteFlags::empty());
    }

    #[test]
    fn test_svoice_only_in_voice_recognition() {
        let mut vr = inputs(Session::VoiceRecognition, Subsession::VrNormal);
        vr.subsession_opt = SubsessionOptions::SVOICE | SubsessionOptions::COMMAND;
        vr.bt_nrec = 1;
        assert_eq!(
            compute_route_flags(&vr),
            RouteFlags::SVOICE_COMMAND | RouteFlags::BT_NREC | RouteFlags::VR_NORMAL
        );

        vr.subsession_opt = SubsessionOptions::SVOICE | SubsessionOptions::WAKEUP;
        assert!(compute_route_flags(&vr).contains(RouteFlags::SVOICE_WAKEUP));

        // The option without SVOICE contributes nothing
        vr.subsession_opt = SubsessionOptions::WAKEUP;
        assert_eq!(compute_route_flags(&vr), RouteFlags::VR_NORMAL);

        let mut media = inputs(Session::Media, Subsession::None);
        media.subsession_opt = SubsessionOptions::SVOICE | SubsessionOptions::COMMAND;
        media.bt_nrec = 1;
        assert_eq!(compute_route_flags(&media), RouteFlags::empty());
    }

    #[test]
    fn test_subsession_bits_any_session() {
        assert_eq!(
            compute_route_flags(&inputs(Session::Camcorder, Subsession::MonoRec)),
            RouteFlags::MONO
        );
        assert_eq!(
            compute_route_flags(&inputs(Session::Media, Subsession::Init)),
            RouteFlags::INIT
        );
        let mut seamless = inputs(Session::Media, Subsession::None);
        seamless.seamless_wakeup = true;
        assert_eq!(
            compute_route_flags(&seamless),
            RouteFlags::SVOICE_SEAMLESS_WAKEUP
        );
    }

    #[test]
    fn test_total_and_within_documented_bits() {
        for session in Session::ALL {
            for subsession in Subsession::ALL {
                for call_type in CallNetworkType::ALL {
                    for mute_policy in [false, true] {
                        let mut i = inputs(*session, *subsession);
                        i.call_type = *call_type;
                        i.mute_policy = mute_policy;
                        i.bt_bandwidth = BtBandwidth::Wb;
                        i.subsession_opt = SubsessionOptions::SVOICE | SubsessionOptions::WAKEUP;
                        let first = compute_route_flags(&i);
                        assert_eq!(first, compute_route_flags(&i));
                        assert!(RouteFlags::all().contains(first));
                    }
                }
            }
        }
    }
}
