//! Device lifecycle: load, open, close and unload hardware device modules.
//!
//! A device is found again by the structural identity of its descriptor,
//! never by a handle, because every request carries a freshly built one.

use super::info::device_info;
use super::queue::{DeviceEvent, DeviceEventKind};
use super::PolicyEngine;
use crate::core::StreamState;
use crate::error::{AudioError, AudioResult, HalStatus};
use audio_policy_types::names::{self, props};
use audio_policy_types::{
    AudioDeviceInfo, DeviceApi, DeviceDetail, DeviceParam, Direction, PolicyEvent,
};
use std::fmt::Write;
use tracing::{debug, error, info, warn};

/// Object name a device is registered under.
pub fn device_object_name(device: &AudioDeviceInfo) -> String {
    let out = device.direction == Direction::Out;
    match &device.detail {
        DeviceDetail::Alsa { device_idx, .. } => {
            let card = device.card_name().unwrap_or_default();
            if card.starts_with(names::ALSA_VIRTUAL_CARD) {
                if out { names::SINK_VIRTUAL } else { names::SOURCE_VIRTUAL }.to_string()
            } else if card.starts_with(names::ALSA_SAUDIOVOIP_CARD) {
                if out { names::SINK_VOIP } else { names::SOURCE_VOIP }.to_string()
            } else if out {
                format!("alsa_output.{}.analog-stereo", device_idx)
            } else {
                format!("alsa_input.{}.analog-stereo", device_idx)
            }
        }
        DeviceDetail::Bluez { protocol, .. } => format!(
            "bluez_{}.{}",
            if out { "sink" } else { "source" },
            protocol.as_deref().unwrap_or("unknown")
        ),
        DeviceDetail::None => {
            if out { "unknown_sink" } else { "unknown_source" }.to_string()
        }
    }
}

/// Module arguments that instantiate `device` under `name`.
fn device_module_args(
    device: &AudioDeviceInfo,
    name: &str,
    params: &[DeviceParam],
    default_fragment_size: u32,
    default_tsched_buffer_size: u32,
) -> String {
    let kind = if device.direction == Direction::Out {
        "sink"
    } else {
        "source"
    };
    let mut args = format!("{}_name=\"{}\"", kind, name);

    let device_string = match (&device.name, &device.detail) {
        (Some(name), _) => Some(name.clone()),
        (
            None,
            DeviceDetail::Alsa {
                card_idx,
                device_idx,
                ..
            },
        ) => Some(format!("hw:{},{}", card_idx, device_idx)),
        (None, _) => None,
    };
    if let Some(device_string) = device_string {
        let _ = write!(args, " device=\"{}\"", device_string);
    }

    let mut fragment_size = None;
    let mut tsched = false;
    let mut tsched_buffer_size = None;
    let mut properties = Vec::new();

    for param in params {
        match *param {
            DeviceParam::Channels(v) => {
                let _ = write!(args, " channels={}", v);
            }
            DeviceParam::SampleRate(v) => {
                let _ = write!(args, " rate={}", v);
            }
            DeviceParam::FragmentSize(v) => fragment_size = Some(v),
            DeviceParam::FragmentNb(v) => {
                let _ = write!(args, " fragments={}", v);
            }
            DeviceParam::StartThreshold(v) => {
                let _ = write!(args, " start_threshold={}", v);
            }
            DeviceParam::UseMmap(v) => {
                let _ = write!(args, " mmap={}", u8::from(v));
            }
            DeviceParam::UseTsched(v) => {
                tsched = v;
                let _ = write!(args, " tsched={}", u8::from(v));
            }
            DeviceParam::TschedBufSize(v) => tsched_buffer_size = Some(v),
            DeviceParam::SuspendTimeout(v) => {
                properties.push(format!("{}={}", props::SUSPEND_TIMEOUT, v));
            }
            DeviceParam::AlternateRate(v) => {
                let _ = write!(args, " alternate_rate={}", v);
            }
        }
    }

    if device.direction == Direction::In && fragment_size.is_none() {
        fragment_size = Some(default_fragment_size);
    }
    if let Some(v) = fragment_size {
        let _ = write!(args, " fragment_size={}", v);
    }
    if device.direction == Direction::Out && tsched && tsched_buffer_size.is_none() {
        tsched_buffer_size = Some(default_tsched_buffer_size);
    }
    if let Some(v) = tsched_buffer_size {
        let _ = write!(args, " tsched_buffer_size={}", v);
    }

    match &device.detail {
        DeviceDetail::Alsa {
            card_name,
            card_idx,
            device_idx,
        } => {
            if let Some(card_name) = card_name {
                properties.push(format!("{}='{}'", props::ALSA_CARD_NAME, card_name));
            }
            properties.push(format!("{}={}", props::ALSA_CARD, card_idx));
            properties.push(format!("{}={}", props::ALSA_DEVICE, device_idx));
        }
        DeviceDetail::Bluez { nrec, .. } => {
            properties.push(format!("{}={}", props::BLUETOOTH_NREC, nrec));
        }
        DeviceDetail::None => {}
    }
    if !properties.is_empty() {
        let _ = write!(args, " {}_properties=\"{}\"", kind, properties.join(" "));
    }

    args
}

fn device_module(device: &AudioDeviceInfo) -> Option<&'static str> {
    match (device.api, device.direction) {
        (DeviceApi::Alsa, Direction::Out) => Some(names::MODULE_ALSA_SINK),
        (DeviceApi::Alsa, Direction::In) => Some(names::MODULE_ALSA_SOURCE),
        (DeviceApi::Bluez, Direction::Out) => Some(names::MODULE_BLUEZ_SINK),
        (DeviceApi::Bluez, Direction::In) => Some(names::MODULE_BLUEZ_SOURCE),
        _ => None,
    }
}

impl PolicyEngine {
    /// Loaded sink matching `device`.
    pub(crate) fn find_sink_for(&self, device: &AudioDeviceInfo) -> Option<u32> {
        self.core
            .sinks()
            .find(|sink| {
                device_info(&sink.proplist, Direction::Out).is_some_and(|d| d.same_device(device))
            })
            .map(|sink| sink.index)
    }

    /// Loaded source matching `device`. Monitors never match.
    pub(crate) fn find_source_for(&self, device: &AudioDeviceInfo) -> Option<u32> {
        self.core
            .sources()
            .filter(|source| source.monitor_of.is_none())
            .find(|source| {
                device_info(&source.proplist, Direction::In).is_some_and(|d| d.same_device(device))
            })
            .map(|source| source.index)
    }

    fn is_device_loaded(&self, device: &AudioDeviceInfo) -> bool {
        match device.direction {
            Direction::Out => self.find_sink_for(device).is_some(),
            _ => self.find_source_for(device).is_some(),
        }
    }

    /// Instantiate the module for `device` unless an identical device is
    /// already loaded. A failed load is only logged.
    pub fn load_device(&mut self, device: &AudioDeviceInfo, params: &[DeviceParam]) -> AudioResult {
        if device.direction == Direction::None {
            return Err(AudioError::Parameter);
        }
        let name = device_object_name(device);
        if self.is_device_loaded(device) {
            debug!("{} is already loaded", name);
            return Ok(HalStatus::Ok);
        }

        let Some(module) = device_module(device) else {
            error!("Cannot load device {}: unknown api {}", name, device.api);
            return Ok(HalStatus::Ok);
        };
        let args = device_module_args(
            device,
            &name,
            params,
            self.config.fragment_size_or_default(),
            self.config.tsched_buffer_size_or_default(),
        );
        match self.load_module(module, &args) {
            Ok(_) => {
                info!("Loaded {} with {}", name, args);
                self.publish(PolicyEvent::DeviceLoaded { name });
            }
            Err(e) => error!("Failed to load {} with {}: {}", module, args, e),
        }
        Ok(HalStatus::Ok)
    }

    /// Load `device` if needed and make it the default when it is the
    /// requested default or nothing real is open. Streams follow it, and
    /// streams corked by an earlier close resume.
    pub fn open_device(&mut self, device: &AudioDeviceInfo, params: &[DeviceParam]) -> AudioResult {
        self.load_device(device, params)?;
        let name = device_object_name(device);

        match device.direction {
            Direction::Out => self.open_sink(&name, device.is_default),
            Direction::In => self.open_source(&name, device.is_default),
            Direction::None => return Err(AudioError::Parameter),
        }
        self.settle();
        Ok(HalStatus::Ok)
    }

    fn open_sink(&mut self, name: &str, is_default: bool) {
        let null = self.core.null_sink_index();
        let default = self.core.default_sink_index();
        if !(default == null || is_default) {
            return;
        }
        let Some(sink) = self.core.sink_index(name) else {
            warn!("Sink {} is not loaded", name);
            return;
        };

        if default != Some(sink) {
            info!("Set default sink to {}", name);
            self.core.set_default_sink(Some(sink));
        }
        if !self.suspend_sink(sink, false) {
            warn!("Sink {} could not be resumed", name);
        }

        for idx in self.core.sink_input_indices() {
            let Some(input) = self.core.sink_input(idx) else {
                continue;
            };
            if input.sink.is_none() || input.proplist.is_filter() {
                continue;
            }
            self.move_sink_input(idx, sink);
            if self.stream_marks(idx).corked_by_device_switch {
                self.marks_mut(idx).corked_by_device_switch = false;
                debug!("Uncork sink-input[{}]", idx);
                self.cork_sink_input(idx, false);
            }
        }
    }

    fn open_source(&mut self, name: &str, is_default: bool) {
        let null = self.core.null_source_index();
        let default = self.core.default_source_index();
        if !(default == null || is_default) {
            return;
        }
        let Some(source) = self.core.source_index(name) else {
            warn!("Source {} is not loaded", name);
            return;
        };

        if default != Some(source) {
            info!("Set default source to {}", name);
            self.core.set_default_source(Some(source));
        }
        self.core.suspend_source(source, false);

        for idx in self.core.source_output_indices() {
            let Some(output) = self.core.source_output(idx) else {
                continue;
            };
            if output.source.is_none() || output.proplist.is_filter() {
                continue;
            }
            self.move_source_output(idx, source);
            if self.corked_outputs.remove(&idx) {
                debug!("Uncork source-output[{}]", idx);
                self.cork_source_output(idx, false);
            }
        }
    }

    /// Park every stream on the null devices and suspend all hardware.
    pub fn close_all_devices(&mut self) -> AudioResult {
        let null_source = self.core.null_source_index();
        let null_sink = self.core.null_sink_index();
        self.core.set_default_source(null_source);
        self.core.set_default_sink(null_sink);

        for idx in self.core.source_output_indices() {
            let Some(output) = self.core.source_output(idx) else {
                continue;
            };
            if output.source.is_none() || output.proplist.is_filter() {
                continue;
            }
            if output.state == StreamState::Running {
                self.corked_outputs.insert(idx);
                self.cork_source_output(idx, true);
            }
            if let Some(null) = null_source {
                self.move_source_output(idx, null);
            }
        }
        for source in self.core.source_indices() {
            self.core.suspend_source(source, true);
        }

        for idx in self.core.sink_input_indices() {
            let Some(input) = self.core.sink_input(idx) else {
                continue;
            };
            if input.sink.is_none() || input.proplist.is_filter() {
                continue;
            }
            if input.state == StreamState::Running {
                self.marks_mut(idx).corked_by_device_switch = true;
                self.cork_sink_input(idx, true);
            }
            if let Some(null) = null_sink {
                self.move_sink_input(idx, null);
            }
        }
        for sink in self.core.sink_indices() {
            self.suspend_sink(sink, true);
        }

        self.settle();
        Ok(HalStatus::Ok)
    }

    /// Move the streams of `device` to the null device and suspend it. The
    /// module stays loaded.
    pub fn close_device(&mut self, device: &AudioDeviceInfo) -> AudioResult {
        match device.direction {
            Direction::Out => {
                let Some(sink) = self.find_sink_for(device) else {
                    warn!("close: no sink for {}", device_object_name(device));
                    return Ok(HalStatus::Ok);
                };
                self.close_sink(sink);
            }
            Direction::In => {
                let Some(source) = self.find_source_for(device) else {
                    warn!("close: no source for {}", device_object_name(device));
                    return Ok(HalStatus::Ok);
                };
                self.close_source(source);
            }
            Direction::None => return Err(AudioError::Parameter),
        }
        self.settle();
        Ok(HalStatus::Ok)
    }

    fn close_sink(&mut self, sink: u32) {
        let null = self.core.null_sink_index();
        if self.core.default_sink_index() == Some(sink) {
            self.core.set_default_sink(null);
        }

        for idx in self.core.sink_input_indices() {
            if self.core.real_master_sink(idx) != Some(sink) {
                continue;
            }
            let Some(input) = self.core.sink_input(idx) else {
                continue;
            };
            if input.proplist.is_filter() {
                continue;
            }
            if input.state == StreamState::Running {
                self.marks_mut(idx).corked_by_device_switch = true;
                self.cork_sink_input(idx, true);
            }
            if let Some(null) = null {
                self.move_sink_input(idx, null);
            }
        }
        self.suspend_sink(sink, true);
    }

    fn close_source(&mut self, source: u32) {
        let null = self.core.null_source_index();
        if self.core.default_source_index() == Some(source) {
            self.core.set_default_source(null);
        }

        for idx in self.core.source_output_indices() {
            if self.core.real_master_source(idx) != Some(source) {
                continue;
            }
            let Some(output) = self.core.source_output(idx) else {
                continue;
            };
            if output.proplist.is_filter() {
                continue;
            }
            if output.state == StreamState::Running {
                self.corked_outputs.insert(idx);
                self.cork_source_output(idx, true);
            }
            if let Some(null) = null {
                self.move_source_output(idx, null);
            }
        }
        self.core.suspend_source(source, true);
    }

    /// Close `device` and tear its module down.
    pub fn unload_device(&mut self, device: &AudioDeviceInfo) -> AudioResult {
        let (found, module) = match device.direction {
            Direction::Out => {
                let sink = self.find_sink_for(device);
                if let Some(sink) = sink {
                    self.close_sink(sink);
                }
                (sink, sink.and_then(|s| self.core.sink(s)).and_then(|s| s.module))
            }
            Direction::In => {
                let source = self.find_source_for(device);
                if let Some(source) = source {
                    self.close_source(source);
                }
                (
                    source,
                    source.and_then(|s| self.core.source(s)).and_then(|s| s.module),
                )
            }
            Direction::None => return Err(AudioError::Parameter),
        };

        let name = device_object_name(device);
        match (found, module) {
            (None, _) => warn!("unload: {} is not loaded", name),
            (Some(_), None) => warn!("unload: {} has no module", name),
            (Some(_), Some(module)) => match self.unload_module(module) {
                Ok(()) => {
                    info!("Unloaded {}", name);
                    self.publish(PolicyEvent::DeviceUnloaded { name });
                }
                Err(e) => error!("Failed to unload {}: {}", name, e),
            },
        }
        self.settle();
        Ok(HalStatus::Ok)
    }

    /// Apply one queued lifecycle request.
    pub(crate) fn apply_device_event(&mut self, event: &DeviceEvent) -> AudioResult {
        let device = match (&event.device, event.kind) {
            (_, DeviceEventKind::CloseAll) => return self.close_all_devices(),
            (Some(device), _) => device,
            (None, kind) => {
                error!("{} without a device", kind.as_str());
                return Err(AudioError::Parameter);
            }
        };

        match event.kind {
            DeviceEventKind::Load => self.load_device(device, &event.params),
            DeviceEventKind::Open => self.open_device(device, &event.params),
            DeviceEventKind::Close => self.close_device(device),
            DeviceEventKind::Unload => self.unload_device(device),
            DeviceEventKind::CloseAll => self.close_all_devices(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{engine, play};
    use super::*;
    use audio_policy_types::VolumeType;

    #[test]
    fn test_object_names() {
        let out = AudioDeviceInfo::alsa(Direction::Out, 0, 4);
        assert_eq!(device_object_name(&out), names::SINK_HIGH_LATENCY);
        let voip = AudioDeviceInfo::alsa(Direction::In, 1, 0).with_card_name("saudiovoip");
        assert_eq!(device_object_name(&voip), names::SOURCE_VOIP);
        let virt = AudioDeviceInfo::alsa(Direction::Out, 2, 0).with_card_name("VIRTUALAUDIO0");
        assert_eq!(device_object_name(&virt), names::SINK_VIRTUAL);
        let sco = AudioDeviceInfo::bluez(Direction::In, "sco", 1);
        assert_eq!(device_object_name(&sco), "bluez_source.sco");
    }

    #[test]
    fn test_module_args() {
        let device = AudioDeviceInfo::alsa(Direction::In, 0, 0);
        let args = device_module_args(
            &device,
            names::SOURCE_ALSA,
            &[DeviceParam::SampleRate(48000), DeviceParam::SuspendTimeout(0)],
            8192,
            16384,
        );
        assert!(args.contains("source_name=\"alsa_input.0.analog-stereo\""));
        assert!(args.contains("device=\"hw:0,0\""));
        assert!(args.contains(" rate=48000"));
        assert!(args.contains(" fragment_size=8192"));
        assert!(args.contains("module-suspend-on-idle.timeout=0"));
        assert!(!args.contains("tsched_buffer_size"));

        let out = AudioDeviceInfo::alsa(Direction::Out, 0, 0);
        let args = device_module_args(&out, "x", &[DeviceParam::UseTsched(true)], 8192, 16384);
        assert!(args.contains(" tsched=1"));
        assert!(args.contains(" tsched_buffer_size=16384"));
        assert!(!args.contains("fragment_size"));
    }

    #[test]
    fn test_second_load_is_noop() {
        let (mut engine, _probe) = engine();
        let modules = engine.core().modules().count();
        let device = AudioDeviceInfo::alsa(Direction::Out, 0, 0);
        engine.load_device(&device, &[]).unwrap();
        assert_eq!(engine.core().modules().count(), modules);
    }

    #[test]
    fn test_close_parks_and_open_resumes() {
        let (mut engine, _probe) = engine();
        let device = AudioDeviceInfo::alsa(Direction::Out, 0, 0);
        let alsa = engine.core().sink_index(names::SINK_ALSA).unwrap();
        let null = engine.core().null_sink_index().unwrap();
        let idx = play(&mut engine, "auto", VolumeType::Media);

        engine.close_device(&device).unwrap();
        let input = engine.core().sink_input(idx).unwrap();
        assert_eq!(input.sink, Some(null));
        assert_eq!(input.state, StreamState::Corked);
        assert!(engine.stream_marks(idx).corked_by_device_switch);
        assert!(engine.core().sink(alsa).unwrap().suspended);
        assert_eq!(engine.core().default_sink_index(), Some(null));

        engine.open_device(&device.as_default(), &[]).unwrap();
        let input = engine.core().sink_input(idx).unwrap();
        assert_eq!(input.sink, Some(alsa));
        assert_eq!(input.state, StreamState::Running);
        assert!(!engine.stream_marks(idx).corked_by_device_switch);
        assert!(!engine.core().sink(alsa).unwrap().suspended);
    }

    #[test]
    fn test_close_all_then_reopen_source() {
        let (mut engine, _probe) = engine();
        let out = engine
            .create_source_output(crate::core::SourceOutputNewData::default())
            .unwrap();
        engine.close_all_devices().unwrap();

        let null = engine.core().null_source_index();
        assert_eq!(engine.core().source_output(out).unwrap().source, null);
        assert_eq!(
            engine.core().source_output(out).unwrap().state,
            StreamState::Corked
        );
        assert!(!engine.capture_status());

        let mic = AudioDeviceInfo::alsa(Direction::In, 0, 0);
        engine.open_device(&mic, &[]).unwrap();
        let primary = engine.core().source_index(names::SOURCE_ALSA);
        assert_eq!(engine.core().source_output(out).unwrap().source, primary);
        assert_eq!(
            engine.core().source_output(out).unwrap().state,
            StreamState::Running
        );
    }

    #[test]
    fn test_unload_removes_module() {
        let (mut engine, _probe) = engine();
        let bt = AudioDeviceInfo::bluez(Direction::Out, "a2dp", 0);
        engine.load_device(&bt, &[]).unwrap();
        assert!(engine.find_sink_for(&bt).is_some());

        let mut rx = engine.events().subscribe();
        engine.unload_device(&bt).unwrap();
        assert!(engine.find_sink_for(&bt).is_none());
        assert!(engine.core().sink_index("bluez_sink.a2dp").is_none());
        assert_eq!(
            rx.try_recv().ok(),
            Some(PolicyEvent::DeviceUnloaded {
                name: "bluez_sink.a2dp".to_string()
            })
        );
    }

    #[test]
    fn test_direction_none_rejected() {
        let (mut engine, _probe) = engine();
        let mut device = AudioDeviceInfo::alsa(Direction::Out, 0, 0);
        device.direction = Direction::None;
        assert_eq!(engine.load_device(&device, &[]), Err(AudioError::Parameter));
    }
}
