//! Well-known sink, source, module and property names.

pub const SINK_NULL: &str = "null";
pub const SOURCE_NULL: &str = "null";

pub const SINK_ALSA: &str = "alsa_output.0.analog-stereo";
pub const SINK_ALSA_UHQA: &str = "alsa_output.0.analog-stereo-uhqa";
pub const SINK_HDMI: &str = "alsa_output.1.analog-stereo";
pub const SINK_HDMI_UHQA: &str = "alsa_output.1.analog-stereo-uhqa";
pub const SINK_VOIP: &str = "alsa_output.3.analog-stereo";
pub const SINK_HIGH_LATENCY: &str = "alsa_output.4.analog-stereo";
pub const SINK_HIGH_LATENCY_UHQA: &str = "alsa_output.4.analog-stereo-uhqa";
pub const SINK_VIRTUAL: &str = "alsa_output.virtual.analog-stereo";
pub const SINK_COMBINED: &str = "combined";
pub const AEC_SINK: &str = "alsa_output.0.analog-stereo.echo-cancel";

pub const SOURCE_ALSA: &str = "alsa_input.0.analog-stereo";
pub const SOURCE_VOIP: &str = "alsa_input.3.analog-stereo";
pub const SOURCE_MIRRORING: &str = "alsa_input.8.analog-stereo";
pub const SOURCE_VIRTUAL: &str = "alsa_input.virtual.analog-stereo";
pub const AEC_SOURCE: &str = "alsa_input.0.analog-stereo.echo-cancel";
pub const ALSA_MONITOR_SOURCE: &str = "alsa_output.0.analog-stereo.monitor";

/// ALSA card names that get a `virtual` device name instead of an index.
pub const ALSA_VIRTUAL_CARD: &str = "VIRTUALAUDIO";
pub const ALSA_SAUDIOVOIP_CARD: &str = "saudiovoip";

pub const MODULE_ALSA_SINK: &str = "module-alsa-sink";
pub const MODULE_ALSA_SOURCE: &str = "module-alsa-source";
pub const MODULE_BLUEZ_SINK: &str = "module-bluez-sink";
pub const MODULE_BLUEZ_SOURCE: &str = "module-bluez-source";
pub const MODULE_COMBINE: &str = "module-combine";
pub const MODULE_NULL_SINK: &str = "module-null-sink";
pub const MODULE_NULL_SOURCE: &str = "module-null-source";

/// Name of the sample registered for the boot sound.
pub const BOOTING_SAMPLE: &str = "booting";

/// Shared-state keys the bound HAL is published under.
pub const SHARED_HAL_DATA: &str = "tizen-audio-data";
pub const SHARED_HAL_INTERFACE: &str = "tizen-audio-interface";

/// Stream and device property keys.
pub mod props {
    pub const MEDIA_NAME: &str = "media.name";
    pub const MEDIA_ROLE: &str = "media.role";
    pub const MEDIA_POLICY: &str = "media.policy";
    pub const MEDIA_POLICY_IGNORE_PRESET_SINK: &str = "media.policy.ignore_preset_sink";
    pub const MEDIA_VOLUME_TYPE: &str = "media.tizen_volume_type";
    pub const MEDIA_GAIN_TYPE: &str = "media.tizen_gain_type";
    pub const EVENT_ID: &str = "event.id";

    pub const DEVICE_API: &str = "device.api";
    pub const DEVICE_STRING: &str = "device.string";
    pub const DEVICE_BUS: &str = "device.bus";
    pub const DEVICE_MASTER_DEVICE: &str = "device.master_device";
    pub const DEVICE_DESCRIPTION: &str = "device.description";

    pub const ALSA_CARD: &str = "alsa.card";
    pub const ALSA_DEVICE: &str = "alsa.device";
    pub const ALSA_CARD_NAME: &str = "alsa.card_name";

    pub const BLUETOOTH_PROTOCOL: &str = "bluetooth.protocol";
    pub const BLUETOOTH_NREC: &str = "bluetooth.nrec";

    pub const SUSPEND_TIMEOUT: &str = "module-suspend-on-idle.timeout";

    /// Role marking internal filter streams the policy never moves.
    pub const ROLE_FILTER: &str = "filter";
}

/// True when `name` is `base` or one of its suffixed variants.
pub fn has_prefix(name: &str, base: &str) -> bool {
    name.starts_with(base)
}
