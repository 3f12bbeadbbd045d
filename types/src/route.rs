//! Route flags and the call/Bluetooth settings that feed them.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Bitmask passed to the HAL's `set_route`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct RouteFlags: u32 {
        const MUTE_POLICY = 0x0000_0001;
        const DUAL_OUT = 0x0000_0002;
        const NOISE_REDUCTION = 0x0000_0010;
        const EXTRA_VOL = 0x0000_0020;
        const NETWORK_WB = 0x0000_0040;
        const BT_WB = 0x0000_0100;
        const BT_NREC = 0x0000_0200;
        const INIT = 0x0000_0400;
        const MONO = 0x0000_0800;
        const VR_NORMAL = 0x0000_1000;
        const SVOICE_COMMAND = 0x0001_0000;
        const SVOICE_WAKEUP = 0x0002_0000;
        const VOICE_COMMAND = 0x0004_0000;
        const SVOICE_SEAMLESS_WAKEUP = 0x0008_0000;
        const NETWORK_TYPE_COMPANION = 0x0010_0000;
        const NETWORK_TYPE_VOLTE = 0x0020_0000;
    }
}

impl std::fmt::Display for RouteFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.bits())
    }
}

wire_enum! {
    /// Network carrying the current call.
    pub enum CallNetworkType {
        None = 0 => "NONE",
        VoicecallNb = 1 => "VOICECALL_NB",
        VoicecallWb = 2 => "VOICECALL_WB",
        CompanionNb = 3 => "COMPANION_NB",
        CompanionWb = 4 => "COMPANION_WB",
        Volte = 5 => "VOLTE",
    }
}

impl CallNetworkType {
    pub fn is_wideband(self) -> bool {
        matches!(self, CallNetworkType::VoicecallWb | CallNetworkType::CompanionWb)
    }

    /// Route bits contributed by the network type.
    pub fn route_mask(self) -> RouteFlags {
        match self {
            CallNetworkType::VoicecallNb => RouteFlags::empty(),
            CallNetworkType::VoicecallWb => RouteFlags::NETWORK_WB,
            CallNetworkType::CompanionNb => RouteFlags::NETWORK_TYPE_COMPANION,
            CallNetworkType::CompanionWb => {
                RouteFlags::NETWORK_TYPE_COMPANION | RouteFlags::NETWORK_WB
            }
            CallNetworkType::Volte => RouteFlags::NETWORK_TYPE_VOLTE,
            CallNetworkType::None => RouteFlags::empty(),
        }
    }
}

wire_enum! {
    /// Bluetooth headset bandwidth.
    pub enum BtBandwidth {
        Nb = 0 => "NB",
        Wb = 1 => "WB",
    }
}

impl BtBandwidth {
    pub fn route_mask(self) -> RouteFlags {
        match self {
            BtBandwidth::Wb => RouteFlags::BT_WB,
            BtBandwidth::Nb => RouteFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_ops() {
        let mut flags = RouteFlags::DUAL_OUT;
        flags |= RouteFlags::BT_NREC;
        assert!(flags.contains(RouteFlags::DUAL_OUT));
        assert!(flags.contains(RouteFlags::BT_NREC));
        assert!(!flags.contains(RouteFlags::MUTE_POLICY));
        assert_eq!(flags.bits(), 0x202);
        assert_eq!(flags.to_string(), "0x202");
        assert_eq!(RouteFlags::from_bits(0x4), None);
    }

    #[test]
    fn test_network_masks() {
        assert_eq!(CallNetworkType::VoicecallNb.route_mask(), RouteFlags::empty());
        assert_eq!(
            CallNetworkType::CompanionWb.route_mask(),
            RouteFlags::NETWORK_TYPE_COMPANION | RouteFlags::NETWORK_WB
        );
        assert!(RouteFlags::all().contains(CallNetworkType::Volte.route_mask()));
    }
}
