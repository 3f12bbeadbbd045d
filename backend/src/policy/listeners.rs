//! Lifecycle listeners and subscription handlers.
//!
//! The listeners pick devices and initial volumes for new streams, keep the
//! primary-volume list current, follow hot-plugged and removed sinks, and
//! silence streams while they move between sinks.

use super::effects::apply_balance;
use super::hooks::{HookEvent, HookKind};
use super::info::{device_info, policy_of, stream_info, volume_type_of};
use super::primary::PrimaryKey;
use super::select::UHQA_BASE_SAMPLING_RATE;
use super::PolicyEngine;
use crate::core::{DeviceState, Proplist, SampleSpec, StreamState};
use crate::error::{bound, HalStatus};
use audio_policy_types::names::{self, props};
use audio_policy_types::{
    AudioInfo, DeviceOut, Direction, DockType, PolicyEvent, PrimaryVolumeType, StreamPolicy,
    VolumeType,
};
use tracing::{debug, error, info, warn};

impl PolicyEngine {
    pub(crate) fn register_hooks(&mut self) {
        let hooks = &mut self.hooks;
        hooks.connect(HookKind::SinkInputNew, "sink-input-new", on_sink_input_new);
        hooks.connect(
            HookKind::SinkInputUnlinkPost,
            "sink-input-unlink-post",
            on_sink_input_unlink_post,
        );
        hooks.connect(HookKind::SinkInputPut, "sink-input-put", on_sink_input_put);
        hooks.connect(
            HookKind::SinkInputStateChanged,
            "sink-input-state-changed",
            on_sink_input_state_changed,
        );
        hooks.connect(HookKind::SourceOutputNew, "source-output-new", on_source_output_new);
        hooks.connect(
            HookKind::SourceOutputUnlinkPost,
            "source-output-unlink-post",
            on_source_output_unlink_post,
        );
        hooks.connect(HookKind::SourceOutputPut, "source-output-put", on_source_output_put);
        if self.config.on_hotplug {
            hooks.connect(HookKind::SinkPut, "sink-put", on_sink_put);
        }
        hooks.connect(HookKind::SinkUnlink, "sink-unlink", on_sink_unlink);
        hooks.connect(HookKind::SinkUnlinkPost, "sink-unlink-post", on_sink_unlink_post);
        hooks.connect(
            HookKind::SinkInputMoveStart,
            "sink-input-move-start",
            on_sink_input_move_start,
        );
        hooks.connect(
            HookKind::SinkInputMoveFinish,
            "sink-input-move-finish",
            on_sink_input_move_finish,
        );
        hooks.connect(HookKind::SinkStateChanged, "sink-state-changed", on_sink_state_changed);
        hooks.connect(
            HookKind::SourceStateChanged,
            "source-state-changed",
            on_source_state_changed,
        );
    }

    /// Policy a stream is routed by, switched to its UHQA variant for
    /// high-rate `auto` and `high-latency` streams.
    fn routing_policy(&self, proplist: &Proplist, spec: &SampleSpec) -> StreamPolicy {
        let policy = policy_of(proplist).unwrap_or(StreamPolicy::Auto);
        if self.config.uhqa && spec.rate >= UHQA_BASE_SAMPLING_RATE && policy.has_uhqa_variant() {
            policy.uhqa_variant()
        } else {
            policy
        }
    }

    /// Sink `sink` really plays on, following `device.master_device`.
    fn master_of_sink(&self, sink: u32) -> u32 {
        self.core
            .sink(sink)
            .and_then(|s| s.proplist.gets(props::DEVICE_MASTER_DEVICE))
            .and_then(|master| self.core.sink_index(master))
            .unwrap_or(sink)
    }

    /// Re-home every stream after the default sink changed.
    pub(crate) fn on_server_changed(&mut self) {
        let Some(def) = self.core.default_sink_index() else {
            warn!("No default sink");
            return;
        };
        let def_is_null = Some(def) == self.core.null_sink_index();
        info!(
            "default sink is now [{}]",
            self.core.sink(def).map(|s| s.name.as_str()).unwrap_or("?")
        );

        for idx in self.core.sink_input_indices() {
            let Some(input) = self.core.sink_input(idx) else {
                continue;
            };
            let Some(current) = input.sink else {
                continue;
            };
            if input.proplist.is_filter() {
                continue;
            }

            if def_is_null {
                if current != def {
                    debug!("Moving sink-input[{}] from [{}] to null", idx, current);
                    self.move_sink_input(idx, def);
                    continue;
                }
                warn!(
                    "sink-input[{}] already on the null sink, looking for a proper sink",
                    idx
                );
            }

            let policy = self.routing_policy(&input.proplist, &input.spec);
            if let Some(target) = self.select_sink(&policy, Some(idx), true) {
                self.move_sink_input(idx, target);
            }
        }
        info!("All moved to proper sink finished");
    }

    /// The high-latency sink starting to run re-derives its streams' volume.
    pub(crate) fn on_sink_changed(&mut self, sink: u32) {
        let is_high_latency = self
            .core
            .sink(sink)
            .is_some_and(|s| s.name == names::SINK_HIGH_LATENCY);
        if !is_high_latency || self.core.sink_state(sink) != Some(DeviceState::Running) {
            return;
        }
        for idx in self.core.inputs_of_sink(sink) {
            if let Err(e) = self.update_volume(Some(idx), None, None) {
                debug!("update_volume for stream[{}] returns error: {}", idx, e);
            }
        }
    }

    /// Track whether the primary capture source is recording.
    pub(crate) fn on_source_changed(&mut self, source: u32) {
        let is_primary = self
            .core
            .source(source)
            .is_some_and(|s| s.name == names::SOURCE_ALSA);
        if !is_primary {
            return;
        }
        let recording = self.core.source_state(source) == Some(DeviceState::Running);
        if recording != self.capture_status {
            debug!("capture status {} -> {}", self.capture_status, recording);
            self.capture_status = recording;
            self.publish(PolicyEvent::CaptureStatusChanged { recording });
        }
    }
}

fn role_for(gain_type: audio_policy_types::GainType) -> &'static str {
    if gain_type.is_shutter() {
        "phone"
    } else {
        "music"
    }
}

/// Pick the sink and the initial volume of a new stream.
fn on_sink_input_new(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    let HookEvent::SinkInputNew(data) = event else {
        return;
    };
    let Some(tag) = data.proplist.gets(props::MEDIA_POLICY) else {
        debug!(
            "Not setting device for stream [{}], because it lacks policy.",
            data.proplist.gets(props::MEDIA_NAME).unwrap_or("(null)")
        );
        return;
    };
    let mut policy = StreamPolicy::from_tag(tag);
    let ignore_preset_sink = data
        .proplist
        .gets(props::MEDIA_POLICY_IGNORE_PRESET_SINK)
        .is_some_and(|v| v.starts_with("yes"));

    if data.sink.is_none() || ignore_preset_sink {
        if engine.config.uhqa
            && data.spec.rate >= UHQA_BASE_SAMPLING_RATE
            && policy.has_uhqa_variant()
        {
            info!("UHQA stream arrived");
            engine.create_uhqa_sink(&policy);
            policy = policy.uhqa_variant();
        }
        match engine.select_sink(&policy, None, true) {
            Some(sink) => data.sink = Some(sink),
            None => {
                error!("no sink for new stream with policy {}", policy);
                return;
            }
        }
    }
    let Some(sink) = data.sink else {
        return;
    };

    let stream = match stream_info(&data.proplist, &data.spec) {
        Ok(stream) => stream,
        Err(e) => {
            debug!("no stream info for new sink-input: {}", e);
            return;
        }
    };
    let device = engine
        .core
        .sink(engine.master_of_sink(sink))
        .and_then(|s| device_info(&s.proplist, Direction::Out));
    let info = AudioInfo { device, stream };
    let volume_type = info.stream.volume_type;

    if !data.proplist.is_filter() {
        data.proplist
            .sets(props::MEDIA_ROLE, role_for(info.stream.gain_type));
    }

    let level = bound(engine.hal.get_volume_level(volume_type))
        .ok()
        .flatten()
        .unwrap_or(0);

    let status = match bound(engine.hal.set_volume_level(Some(&info), volume_type, level)) {
        Ok(status) => status.unwrap_or(HalStatus::Ok),
        Err(e) => {
            warn!("set_volume_level for new sink-input returns error: {}", e);
            return;
        }
    };
    let linear = if status == HalStatus::UseHwControl {
        1.0
    } else {
        match bound(engine.hal.get_volume_value(&info, volume_type, level)) {
            Ok(value) => value.unwrap_or(1.0),
            Err(e) => {
                warn!("get_volume_value for new sink-input returns error: {}", e);
                return;
            }
        }
    };

    if data.volume.is_none() {
        data.volume = Some(linear);
    }
    if engine.core.muteall && volume_type != VolumeType::Fixed {
        data.muted = true;
    }

    info!(
        "new [{}] policy[{}] ch[{}] rate[{}] volume&gain[{},{}] level[{}] sink[{}]",
        info.stream.name.as_deref().unwrap_or("(null)"),
        policy,
        info.stream.channels,
        info.stream.samplerate,
        volume_type,
        info.stream.gain_type,
        level,
        engine.core.sink(sink).map(|s| s.name.as_str()).unwrap_or("null")
    );
}

fn on_sink_input_unlink_post(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    let HookEvent::SinkInputUnlinkPost(input) = event else {
        return;
    };
    if input.proplist.contains(props::MEDIA_VOLUME_TYPE) {
        engine.remove_primary(PrimaryKey::SinkInput(input.index));
    }
}

fn on_sink_input_put(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    let HookEvent::SinkInputPut(idx) = *event else {
        return;
    };
    let Some(input) = engine.core.sink_input(idx) else {
        return;
    };
    // Streams created corked take the volume keys once they start.
    if input.state == StreamState::Corked {
        return;
    }
    if let Some(volume_type) = input.proplist.get_u32(props::MEDIA_VOLUME_TYPE) {
        engine.add_primary(PrimaryKey::SinkInput(idx), volume_type);
    }
}

fn on_sink_input_state_changed(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    let HookEvent::SinkInputStateChanged(idx) = *event else {
        return;
    };
    let Some(input) = engine.core.sink_input(idx) else {
        return;
    };
    let state = input.state;
    let policy = policy_of(&input.proplist);

    if let Some(volume_type) = input.proplist.get_u32(props::MEDIA_VOLUME_TYPE) {
        match state {
            // fmradio keeps the media keys through a fake corked stream
            StreamState::Corked if policy != Some(StreamPolicy::FmRadio) => {
                engine.remove_primary(PrimaryKey::SinkInput(idx));
            }
            StreamState::Running | StreamState::Drained => {
                engine.add_primary(PrimaryKey::SinkInput(idx), volume_type);
            }
            _ => {}
        }
    }

    if !engine.config.uhqa || state != StreamState::Running {
        return;
    }
    let Some(policy) = policy else {
        return;
    };
    let Some(input) = engine.core.sink_input(idx) else {
        return;
    };
    let current = input.sink;

    let mut uhqa_target = None;
    if input.spec.rate >= UHQA_BASE_SAMPLING_RATE && policy.has_uhqa_variant() {
        uhqa_target = engine.select_sink(&policy.uhqa_variant(), Some(idx), true);
        if let Some(target) = uhqa_target.filter(|t| Some(*t) != current) {
            debug!("Moving sink-input[{}] to UHQA sink[{}]", idx, target);
            engine.move_sink_input(idx, target);
        }
    }

    let normal = engine.select_sink(&policy, Some(idx), true);
    if let (Some(target), Some(normal)) = (uhqa_target, normal) {
        if target != normal {
            for other in engine.core.inputs_of_sink(normal) {
                let is_filter = engine
                    .core
                    .sink_input(other)
                    .is_some_and(|i| i.proplist.is_filter());
                if !is_filter {
                    engine.move_sink_input(other, target);
                }
            }
        }
    }
}

fn on_source_output_new(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    let HookEvent::SourceOutputNew(data) = event else {
        return;
    };
    if data.source.is_some() {
        debug!("Not setting device for capture stream, because already set.");
        return;
    }
    let Some(policy) = policy_of(&data.proplist) else {
        debug!(
            "Not setting device for capture stream [{}], because it lacks policy.",
            data.proplist.gets(props::MEDIA_NAME).unwrap_or("(null)")
        );
        return;
    };
    data.source = engine.select_source(&policy);
    debug!("set source of source-output to [{:?}]", data.source);
}

fn on_source_output_unlink_post(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    if let HookEvent::SourceOutputUnlinkPost(output) = event {
        engine.remove_primary(PrimaryKey::SourceOutput(output.index));
    }
}

fn on_source_output_put(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    if let HookEvent::SourceOutputPut(idx) = *event {
        engine.add_primary(
            PrimaryKey::SourceOutput(idx),
            PrimaryVolumeType::Max.as_u32(),
        );
    }
}

/// Follow a hot-plugged USB sink and restore the balance on new BT/USB
/// sinks.
fn on_sink_put(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    let HookEvent::SinkPut(sink) = *event else {
        return;
    };
    let Some(sink_ref) = engine.core.sink(sink) else {
        return;
    };
    let is_bt = sink_ref.is_bluez();
    let is_usb_alsa = sink_ref.is_usb_alsa();
    debug!("is_bt({}), is_usb_alsa({})", is_bt, is_usb_alsa);
    if !is_bt && !is_usb_alsa {
        return;
    }

    let mut need_move = true;
    let mut device_out = DeviceOut::BtA2dp;
    if engine.route.session.is_communication() {
        info!(
            "current session is communication mode [{}], no need to move",
            engine.route.session
        );
        need_move = false;
    } else if is_usb_alsa {
        match engine.env.dock {
            DockType::Desk | DockType::Car => device_out = DeviceOut::Dock,
            DockType::Audio => device_out = DeviceOut::MultimediaDock,
            DockType::Smart => need_move = false,
            DockType::None => {
                info!("This device might be general USB Headset");
                device_out = DeviceOut::UsbAudio;
            }
        }
    }
    if is_bt {
        // The platform switches route and volume for A2DP itself.
        info!("new bluetooth sink is detected, route is left to the sound server");
        need_move = false;
    }

    if need_move {
        let mut routed = true;
        if engine.route.device_out != device_out {
            let flags = engine.current_route_flags();
            let route = &engine.route;
            let result = bound(engine.hal.set_route(
                route.session,
                route.subsession,
                route.device_in,
                device_out,
                flags,
            ));
            match result {
                Ok(_) => engine.route.active_route_flag = Some(flags),
                Err(e) => {
                    debug!(
                        "route failed, session({}) device_out({}): {}",
                        engine.route.session, device_out, e
                    );
                    routed = false;
                }
            }
        }

        if routed {
            info!(
                "set default sink to sink[{}], active_device_out({}), device_out({})",
                sink, engine.route.device_out, device_out
            );
            engine.core.set_default_sink(Some(sink));
            engine.route.device_out = device_out;
            move_to_new_sink(engine, sink);
        }
    }

    let Some(mut channels) = engine.core.sink(sink).map(|s| s.channel_volumes.clone()) else {
        return;
    };
    apply_balance(&mut channels, engine.balance);
    engine.core.set_channel_volumes(sink, channels);
}

fn move_to_new_sink(engine: &mut PolicyEngine, sink: u32) {
    for idx in engine.core.sink_input_indices() {
        let Some(input) = engine.core.sink_input(idx) else {
            continue;
        };
        match input.sink {
            None => continue,
            Some(current) if current == sink => continue,
            Some(_) => {}
        }
        if input.state == StreamState::Init || input.proplist.is_filter() {
            continue;
        }
        let policy = engine.routing_policy(&input.proplist, &input.spec);
        match engine.select_sink(&policy, Some(idx), true) {
            Some(target) => {
                engine.move_sink_input(idx, target);
            }
            None => debug!("Can't move sink-input[{}]", idx),
        }
    }
}

/// A Bluetooth sink is going away: park its streams on the null sink and
/// re-route alarms.
fn on_sink_unlink(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    let HookEvent::SinkUnlink(sink) = *event else {
        return;
    };
    let Some(sink_ref) = engine.core.sink(sink) else {
        return;
    };
    if !sink_ref.is_bluez() {
        debug!("sink[{}][{}] unlinked but not a bluez", sink_ref.name, sink);
        return;
    }
    debug!("bt_off_idx was [{:?}], now set to [{}]", engine.bt_off_idx, sink);
    engine.bt_off_idx = Some(sink);
    let null = engine.core.null_sink_index();

    for idx in engine.core.sink_input_indices() {
        let Some(input) = engine.core.sink_input(idx) else {
            continue;
        };
        let Some(current) = input.sink.and_then(|s| engine.core.sink(s)) else {
            continue;
        };
        if input.proplist.is_filter() {
            continue;
        }
        if current.name != names::SINK_COMBINED && !current.is_bluez() {
            continue;
        }

        // Alarms must not go silent when the headset drops.
        let target = if volume_type_of(&input.proplist) == Some(VolumeType::Alarm) {
            engine.select_sink(&StreamPolicy::Auto, Some(idx), false).or(null)
        } else {
            null
        };
        match target {
            Some(target) => {
                info!("stream[{}] moves to sink[{}]", idx, target);
                engine.move_sink_input(idx, target);
            }
            None => warn!("no sink to park stream[{}]", idx),
        }
    }

    if let Some(module) = engine.module_combined.take() {
        debug!("unloading combined sink module {}", module);
        if let Err(e) = engine.unload_module(module) {
            warn!("Failed to unload combined sink: {}", e);
        }
    }
}

fn on_sink_unlink_post(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    let HookEvent::SinkUnlinkPost(sink) = event else {
        return;
    };
    if sink.is_bluez() {
        engine.bt_off_idx = None;
        debug!("bt_off_idx is cleared");
    }
}

fn on_sink_input_move_start(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    let HookEvent::SinkInputMoveStart(idx) = *event else {
        return;
    };
    debug!("sink-input [{}] moving: trying to mute", idx);
    if let Err(e) = engine.set_mute(Some(idx), None, Direction::Out, true) {
        warn!("set_mute(1) for stream[{}] returns error: {}", idx, e);
    }
}

fn on_sink_input_move_finish(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    let HookEvent::SinkInputMoveFinish(idx) = *event else {
        return;
    };
    // Moves caused by a Bluetooth sink going away stay muted.
    if engine.bt_off_idx.is_some() || engine.core.muteall {
        debug!(
            "sink-input [{}] moved, skip un-mute (bt_off_idx {:?})",
            idx, engine.bt_off_idx
        );
        return;
    }
    if let Err(e) = engine.update_volume(Some(idx), None, None) {
        debug!("update_volume for stream[{}] returns error: {}", idx, e);
    }
    if let Err(e) = engine.set_mute(Some(idx), None, Direction::Out, false) {
        debug!("set_mute(0) for stream[{}] returns error: {}", idx, e);
    }
}

fn on_sink_state_changed(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    if let HookEvent::SinkStateChanged(sink) = *event {
        engine.svoice_on_sink_state(sink);
    }
}

fn on_source_state_changed(engine: &mut PolicyEngine, event: &mut HookEvent<'_>) {
    if let HookEvent::SourceStateChanged(source) = *event {
        engine.svoice_on_source_state(source);
    }
}
