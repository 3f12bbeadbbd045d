//! Audio policy engine.
//!
//! [`PolicyEngine`] owns the audio-core model and the HAL. It decides, for
//! every stream and every device transition, which sink or source is used and
//! at what volume, and it sequences mute, route and volume changes so that
//! device switches stay silent.
//!
//! All engine methods run on a single thread. HAL worker threads reach the
//! engine only through the [`queue::DeviceEventQueue`], which the owning
//! thread drains with [`PolicyEngine::drain_device_events`].

pub mod device;
pub mod effects;
pub mod fade;
pub mod graph;
pub mod hooks;
pub mod info;
pub mod listeners;
pub mod primary;
pub mod queue;
pub mod route;
pub mod sample;
pub mod select;
pub mod session;
pub mod svoice;
pub mod timer;
pub mod volume;

use crate::config::{PolicyConfig, SamplesConfig};
use crate::core::{AudioCore, CoreEvent};
use crate::error::{bound, CoreError};
use crate::events::EventBroadcaster;
use crate::hal::{AudioHal, PcmHandle};
use audio_policy_types::names;
use audio_policy_types::{DockType, PolicyEvent, RouteFlags};
use fade::FadeSession;
use hooks::{HookEvent, HookRegistry};
use parking_lot::Mutex;
use primary::PrimaryVolumeList;
use queue::{DeviceCallbacks, DeviceEventQueue};
use route::{compute_route_flags, RouteInputs, RouteState};
use sample::BurstShot;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use svoice::SeamlessVoice;
use timer::{TimerKind, TimerQueue};
use tracing::{debug, error, info};

pub use effects::EffectParam;

/// Transient per-stream state shared between hooks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamMarks {
    /// Muted until the pending route change completes
    pub device_switching: bool,
    /// Corked because its device was closed; uncorked when a device opens
    pub corked_by_device_switch: bool,
    /// A fade-down ran on this stream
    pub faded_down: bool,
}

/// Platform settings the engine reads but does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Environment {
    /// Sound switched off by the user (mute policy)
    pub sound_off: bool,
    pub dock: DockType,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            sound_off: false,
            dock: DockType::None,
        }
    }
}

pub struct PolicyEngine {
    core: AudioCore,
    hal: Box<dyn AudioHal>,
    config: PolicyConfig,
    samples: SamplesConfig,
    hooks: HookRegistry,

    route: RouteState,
    call_muted: bool,
    balance: f64,
    /// Bluetooth sink currently being unlinked
    bt_off_idx: Option<u32>,
    module_combined: Option<u32>,
    /// Playback PCMs held by ALSA sinks
    pcms: HashMap<u32, PcmHandle>,
    primary: PrimaryVolumeList,
    marks: HashMap<u32, StreamMarks>,
    /// Source-outputs corked by a device close
    corked_outputs: HashSet<u32>,
    fades: HashMap<u32, FadeSession>,
    burst: Arc<Mutex<BurstShot>>,
    svoice: SeamlessVoice,
    timers: TimerQueue,

    device_queue: Arc<DeviceEventQueue>,
    events: EventBroadcaster,
    env: Environment,
    capture_status: bool,
    settling: bool,
}

impl PolicyEngine {
    /// Build the engine around `hal`.
    ///
    /// The calling thread becomes the engine thread: device requests issued
    /// from it run without blocking, requests from any other thread wait
    /// until this thread drains them.
    pub fn new(
        mut hal: Box<dyn AudioHal>,
        config: PolicyConfig,
        samples: SamplesConfig,
        events: EventBroadcaster,
    ) -> Self {
        match bound(hal.init()) {
            Ok(Some(_)) => info!("HAL {} initialized", hal.name()),
            Ok(None) => debug!("HAL {} has no init", hal.name()),
            Err(e) => error!("HAL {} init failed: {}", hal.name(), e),
        }

        let mut core = AudioCore::new();
        core.shared_set(names::SHARED_HAL_DATA, hal.name());
        core.shared_set(names::SHARED_HAL_INTERFACE, hal.name());

        let device_queue = Arc::new(DeviceEventQueue::new());
        let callbacks = DeviceCallbacks::new(device_queue.clone(), std::thread::current().id());
        if let Err(e) = bound(hal.set_callback(callbacks)) {
            error!("HAL set_callback failed: {}", e);
        }

        let mut engine = Self {
            core,
            hal,
            config,
            samples,
            hooks: HookRegistry::new(),
            route: RouteState::default(),
            call_muted: false,
            balance: 0.0,
            bt_off_idx: None,
            module_combined: None,
            pcms: HashMap::new(),
            primary: PrimaryVolumeList::new(),
            marks: HashMap::new(),
            corked_outputs: HashSet::new(),
            fades: HashMap::new(),
            burst: Arc::new(Mutex::new(BurstShot::default())),
            svoice: SeamlessVoice::default(),
            timers: TimerQueue::new(),
            device_queue,
            events,
            env: Environment::default(),
            capture_status: false,
            settling: false,
        };
        engine.register_hooks();
        engine.publish_primary_volume();
        engine
    }

    /// Create the `null` sink and source every routing decision falls back to.
    pub fn create_null_devices(&mut self) -> Result<(), CoreError> {
        if self.core.null_sink_index().is_none() {
            self.load_module(names::MODULE_NULL_SINK, "")?;
        }
        if self.core.null_source_index().is_none() {
            self.load_module(names::MODULE_NULL_SOURCE, "")?;
        }
        Ok(())
    }

    /// Deinitialize the HAL. The engine must not be used afterwards.
    pub fn shutdown(&mut self) {
        self.timers = TimerQueue::new();
        if let Err(e) = bound(self.hal.deinit()) {
            error!("HAL deinit failed: {}", e);
        }
        info!("Policy engine stopped");
    }

    pub fn core(&self) -> &AudioCore {
        &self.core
    }

    pub fn route(&self) -> &RouteState {
        &self.route
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    pub fn call_muted(&self) -> bool {
        self.call_muted
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Whether the primary capture source is recording.
    pub fn capture_status(&self) -> bool {
        self.capture_status
    }

    pub fn environment(&self) -> Environment {
        self.env
    }

    pub fn stream_marks(&self, idx: u32) -> StreamMarks {
        self.marks.get(&idx).copied().unwrap_or_default()
    }

    pub fn set_sound_off(&mut self, sound_off: bool) {
        self.env.sound_off = sound_off;
    }

    pub fn set_dock_type(&mut self, dock: DockType) {
        self.env.dock = dock;
    }

    /// Queue fed by the device callbacks handed to the HAL.
    pub fn device_queue(&self) -> Arc<DeviceEventQueue> {
        self.device_queue.clone()
    }

    /// Flags `set_route` would receive for the current state.
    pub fn current_route_flags(&self) -> RouteFlags {
        compute_route_flags(&RouteInputs::from_state(
            &self.route,
            self.env.sound_off,
            self.capture_status,
            self.svoice.enabled,
        ))
    }

    pub(crate) fn marks_mut(&mut self, idx: u32) -> &mut StreamMarks {
        self.marks.entry(idx).or_default()
    }

    /// Apply every queued device request in FIFO order, completing each
    /// waiting producer once its request's effects are visible.
    pub fn drain_device_events(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.device_queue.pop() {
            debug!("Dispatching {}", event.kind.as_str());
            let result = self.apply_device_event(&event);
            self.settle();
            if let Some(completion) = &event.completion {
                completion.complete(result);
            }
            handled += 1;
        }
        handled
    }

    /// Earliest pending fade, burst-shot or sample deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fire every timer due at `now`.
    pub fn run_due_timers(&mut self, now: Instant) {
        while let Some(kind) = self.timers.pop_due(now) {
            match kind {
                TimerKind::Fade(idx) => self.fade_tick(idx, now),
                TimerKind::BurstShot => self.burst_tick(now),
                TimerKind::SampleEnd(idx) => self.sample_end(idx),
            }
            self.settle();
        }
    }

    /// Pump core notifications until the graph is quiet.
    ///
    /// Device state changes run the state-changed hooks; server, sink and
    /// source changes run the subscription handlers.
    pub fn settle(&mut self) {
        if self.settling {
            return;
        }
        self.settling = true;
        loop {
            self.core.refresh();
            let Some(event) = self.core.pop_event() else {
                break;
            };
            match event {
                CoreEvent::ServerChanged => self.on_server_changed(),
                CoreEvent::SinkStateChanged(idx) => {
                    self.fire(&mut HookEvent::SinkStateChanged(idx));
                    self.on_sink_changed(idx);
                }
                CoreEvent::SourceStateChanged(idx) => {
                    self.fire(&mut HookEvent::SourceStateChanged(idx));
                    self.on_source_changed(idx);
                }
            }
        }
        self.settling = false;
    }

    pub(crate) fn publish(&self, event: PolicyEvent) {
        self.events.broadcast(event);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::core::{Proplist, SampleSpec, SinkInputNewData};
    use crate::hal::soft::{SoftHal, SoftHalProbe};
    use audio_policy_types::names::props;
    use audio_policy_types::{AudioDeviceInfo, Direction, GainType, VolumeType};

    /// Engine on a software HAL with null devices plus the primary ALSA sink
    /// and source opened.
    pub(crate) fn engine() -> (PolicyEngine, SoftHalProbe) {
        engine_with(PolicyConfig::default())
    }

    pub(crate) fn engine_with(config: PolicyConfig) -> (PolicyEngine, SoftHalProbe) {
        let hal = SoftHal::new(&HalConfig::default());
        let probe = hal.probe();
        let mut engine = PolicyEngine::new(
            Box::new(hal),
            config,
            SamplesConfig::default(),
            EventBroadcaster::default(),
        );
        engine.create_null_devices().unwrap();
        engine
            .open_device(
                &AudioDeviceInfo::alsa(Direction::Out, 0, 0)
                    .with_name("hw:0,0")
                    .as_default(),
                &[],
            )
            .unwrap();
        engine
            .open_device(
                &AudioDeviceInfo::alsa(Direction::In, 0, 0)
                    .with_name("hw:0,0")
                    .as_default(),
                &[],
            )
            .unwrap();
        probe.clear_calls();
        (engine, probe)
    }

    pub(crate) fn stream_props(
        name: &str,
        policy: &str,
        volume_type: VolumeType,
        gain_type: GainType,
    ) -> Proplist {
        let mut proplist = Proplist::new();
        proplist.sets(props::MEDIA_NAME, name);
        proplist.sets(props::MEDIA_POLICY, policy);
        proplist.sets(props::MEDIA_VOLUME_TYPE, volume_type.as_u32().to_string());
        proplist.sets(props::MEDIA_GAIN_TYPE, gain_type.as_u32().to_string());
        proplist
    }

    /// Create and link a running stream.
    pub(crate) fn play(engine: &mut PolicyEngine, policy: &str, volume_type: VolumeType) -> u32 {
        let data = SinkInputNewData::new(
            stream_props("test", policy, volume_type, GainType::Default),
            SampleSpec::new(44100, 2),
        );
        engine.create_sink_input(data).unwrap()
    }

    #[test]
    fn test_new_engine_publishes_hal() {
        let (engine, probe) = engine();
        assert_eq!(
            engine.core().shared_get(names::SHARED_HAL_DATA),
            Some("soft")
        );
        assert!(probe.callbacks().is_some());
        assert_eq!(engine.hooks.len(), 14);
    }

    #[test]
    fn test_settle_tracks_capture_status() {
        let (mut engine, _probe) = engine();
        let mut rx = engine.events().subscribe();
        let output = engine
            .create_source_output(crate::core::SourceOutputNewData::default())
            .unwrap();
        assert!(engine.capture_status());
        assert!(
            std::iter::from_fn(|| rx.try_recv().ok())
                .any(|e| e == PolicyEvent::CaptureStatusChanged { recording: true })
        );

        engine.unlink_source_output(output);
        assert!(!engine.capture_status());
    }
}
