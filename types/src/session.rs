//! Session and sub-session definitions.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

wire_enum! {
    /// High-level use mode. Exactly one is active at a time.
    pub enum Session {
        Media = 0 => "MEDIA",
        Voicecall = 1 => "VOICECALL",
        Videocall = 2 => "VIDEOCALL",
        Voip = 3 => "VOIP",
        Fmradio = 4 => "FMRADIO",
        Camcorder = 5 => "CAMCORDER",
        Notification = 6 => "NOTIFICATION",
        Alarm = 7 => "ALARM",
        Emergency = 8 => "EMERGENCY",
        VoiceRecognition = 9 => "VOICE_RECOGNITION",
    }
}

impl Session {
    /// Voice or video call.
    pub fn is_call(self) -> bool {
        matches!(self, Session::Voicecall | Session::Videocall)
    }

    /// Any session that carries a two-way conversation.
    pub fn is_communication(self) -> bool {
        self.is_call() || self == Session::Voip
    }

    /// Sessions that ring through speaker and headset at the same time.
    pub fn uses_dual_output(self) -> bool {
        matches!(self, Session::Alarm | Session::Notification)
    }
}

wire_enum! {
    /// Refinement of the active session.
    pub enum Subsession {
        None = 0 => "NONE",
        Voice = 1 => "VOICE",
        Ringtone = 2 => "RINGTONE",
        /// Media path inside a call, distinct from the idle `None` of the media session
        Media = 3 => "MEDIA",
        Init = 4 => "VR_INIT",
        VrNormal = 5 => "VR_NORMAL",
        VrDrive = 6 => "VR_DRIVE",
        StereoRec = 7 => "STEREO_REC",
        StereoInterviewRec = 8 => "STEREO_INTERVIEW_REC",
        StereoConversationRec = 9 => "STEREO_CONVERSATION_REC",
        MonoRec = 10 => "MONO_REC",
        Voice3g = 11 => "VOICE_3G",
        AmPlay = 12 => "AM_PLAY",
        AmRec = 13 => "AM_REC",
        VcForwarding = 14 => "VC_FORWARDING",
    }
}

wire_enum! {
    /// Command passed to the HAL together with a session change.
    pub enum SessionCommand {
        Start = 0 => "START",
        Subsession = 1 => "SUBSESSION",
        End = 2 => "END",
    }
}

bitflags! {
    /// Sub-session option bits. Only meaningful for voice-recognition sub-sessions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SubsessionOptions: u32 {
        const SVOICE = 0x0000_0001;
        const WAKEUP = 0x0000_0010;
        const COMMAND = 0x0000_0020;
    }
}
