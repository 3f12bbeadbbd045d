//! Extension command numbers and reply codes.

/// Reply frame command.
pub const COMMAND_REPLY: u32 = 2;
/// Error frame command.
pub const COMMAND_ERROR: u32 = 0;
/// Error code sent for malformed requests.
pub const ERR_PROTOCOL: u32 = 7;
/// Version answered to `Test`.
pub const EXT_VERSION: u32 = 1;

/// Number of bands in a SoundAlive custom equalizer.
pub const CUSTOM_EQ_BAND_MAX: usize = 9;
/// Number of SoundAlive extension parameters.
pub const CUSTOM_EXT_PARAM_MAX: usize = 5;
/// Number of DHA gain values.
pub const DHA_GAIN_NUM: usize = 12;

wire_enum! {
    /// Extension subcommand selector.
    pub enum Subcommand {
        Test = 0 => "TEST",
        PlaySample = 1 => "PLAY_SAMPLE",
        PlaySampleContinuously = 2 => "PLAY_SAMPLE_CONTINUOUSLY",
        Mono = 3 => "MONO",
        Balance = 4 => "BALANCE",
        Muteall = 5 => "MUTEALL",
        SvoiceWakeupEnable = 6 => "SVOICE_WAKEUP_ENABLE",
        SvoiceSeamlessOnoff = 7 => "SVOICE_SEAMLESS_ONOFF",
        SvoiceSetParam = 8 => "SVOICE_SET_PARAM",
        SetUseCase = 9 => "SET_USE_CASE",
        SetSession = 10 => "SET_SESSION",
        SetSubsession = 11 => "SET_SUBSESSION",
        SetActiveDevice = 12 => "SET_ACTIVE_DEVICE",
        Reset = 13 => "RESET",
        GetVolumeLevelMax = 14 => "GET_VOLUME_LEVEL_MAX",
        GetVolumeLevel = 15 => "GET_VOLUME_LEVEL",
        SetVolumeLevel = 16 => "SET_VOLUME_LEVEL",
        UpdateVolume = 17 => "UPDATE_VOLUME",
        GetMute = 18 => "GET_MUTE",
        SetMute = 19 => "SET_MUTE",
        VolumeFade = 20 => "VOLUME_FADE",
        IsAvailableHighLatency = 21 => "IS_AVAILABLE_HIGH_LATENCY",
        UnloadHdmi = 22 => "UNLOAD_HDMI",
        SetCallNetworkType = 23 => "SET_CALL_NETWORK_TYPE",
        SetCallNrec = 24 => "SET_CALL_NREC",
        SetCallExtraVolume = 25 => "SET_CALL_EXTRA_VOLUME",
        SetBluetoothBandwidth = 26 => "SET_BLUETOOTH_BANDWIDTH",
        SetBluetoothNrec = 27 => "SET_BLUETOOTH_NREC",
        VspSpeed = 28 => "VSP_SPEED",
        SaFilterAction = 29 => "SA_FILTER_ACTION",
        SaPresetMode = 30 => "SA_PRESET_MODE",
        SaEq = 31 => "SA_EQ",
        SaExtend = 32 => "SA_EXTEND",
        SaDevice = 33 => "SA_DEVICE",
        SaSquare = 34 => "SA_SQUARE",
        DhaParam = 35 => "DHA_PARAM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommand_numbering() {
        assert_eq!(Subcommand::SetSession.as_u32(), 10);
        assert_eq!(Subcommand::VolumeFade.as_u32(), 20);
        assert_eq!(Subcommand::DhaParam.as_u32(), 35);
        assert_eq!(Subcommand::ALL.len(), 36);
        assert_eq!(Subcommand::from_u32(36), None);
    }
}
