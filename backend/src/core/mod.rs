//! In-process model of the audio server object graph.
//!
//! Holds sinks, sources, streams, modules and samples. The model only keeps
//! the graph consistent; every policy decision and hook dispatch lives in
//! [`crate::policy`], which wraps the mutating calls here.

pub mod modargs;
pub mod sound_file;

use crate::error::CoreError;
use audio_policy_types::names::{self, props};
use bytes::Bytes;
use modargs::ModArgs;
use sound_file::SoundChunk;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Unity volume in the core's fixed-point channel volume scale.
pub const VOLUME_NORM: u32 = 0x10000;

/// String property list attached to every object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proplist(BTreeMap<String, String>);

impl Proplist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a whitespace separated `key=value` list.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Ok(Self(modargs::tokenize(s)?.into_iter().collect()))
    }

    pub fn gets(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn sets(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn unset(&mut self, key: &str) -> bool {
        self.0.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.gets(key).and_then(|v| v.trim().parse().ok())
    }

    /// Copy every entry of `other` over this list.
    pub fn update(&mut self, other: &Proplist) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True when the stream is an internal filter stream.
    pub fn is_filter(&self) -> bool {
        self.gets(props::MEDIA_ROLE) == Some(props::ROLE_FILTER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S16Le,
    S24Le,
    S32Le,
    S24_32Le,
}

impl SampleFormat {
    pub fn bytes(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16Le => 2,
            SampleFormat::S24Le => 3,
            SampleFormat::S32Le | SampleFormat::S24_32Le => 4,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "u8" => Some(SampleFormat::U8),
            "s16le" => Some(SampleFormat::S16Le),
            "s24le" => Some(SampleFormat::S24Le),
            "s32le" => Some(SampleFormat::S32Le),
            "s24-32le" => Some(SampleFormat::S24_32Le),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16Le => "s16le",
            SampleFormat::S24Le => "s24le",
            SampleFormat::S32Le => "s32le",
            SampleFormat::S24_32Le => "s24-32le",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u8,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            format: SampleFormat::S16Le,
            rate: 44100,
            channels: 2,
        }
    }
}

impl SampleSpec {
    pub fn new(rate: u32, channels: u8) -> Self {
        Self {
            rate,
            channels,
            ..Self::default()
        }
    }

    pub fn frame_size(&self) -> usize {
        self.format.bytes() * self.channels.max(1) as usize
    }

    pub fn bytes_to_duration(&self, len: usize) -> Duration {
        let frames = (len / self.frame_size()) as u64;
        Duration::from_micros(frames * 1_000_000 / self.rate.max(1) as u64)
    }
}

/// Derived state of a sink or source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Running,
    Idle,
    Suspended,
}

/// State of a sink-input or source-output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created, not linked yet
    Init,
    Running,
    Drained,
    Corked,
}

impl StreamState {
    /// Linked and producing or consuming audio.
    pub fn is_active(self) -> bool {
        matches!(self, StreamState::Running | StreamState::Drained)
    }
}

#[derive(Debug, Clone)]
pub struct Sink {
    pub index: u32,
    pub name: String,
    pub module: Option<u32>,
    pub proplist: Proplist,
    pub spec: SampleSpec,
    pub suspended: bool,
    /// Per-channel volume, `VOLUME_NORM` is unity
    pub channel_volumes: Vec<u32>,
    pub monitor: Option<u32>,
}

impl Sink {
    pub fn api(&self) -> Option<&str> {
        self.proplist.gets(props::DEVICE_API)
    }

    pub fn is_bluez(&self) -> bool {
        self.api() == Some("bluez")
    }

    pub fn is_usb_alsa(&self) -> bool {
        self.api() == Some("alsa") && self.proplist.gets(props::DEVICE_BUS) == Some("usb")
    }

    pub fn is_hdmi(&self) -> bool {
        names::has_prefix(&self.name, names::SINK_HDMI)
    }

    pub fn is_high_latency(&self) -> bool {
        names::has_prefix(&self.name, names::SINK_HIGH_LATENCY)
    }

    pub fn is_alsa(&self) -> bool {
        names::has_prefix(&self.name, names::SINK_ALSA)
    }
}

#[derive(Debug, Clone)]
pub struct Source {
    pub index: u32,
    pub name: String,
    pub module: Option<u32>,
    pub proplist: Proplist,
    pub spec: SampleSpec,
    pub suspended: bool,
    /// Sink this source monitors
    pub monitor_of: Option<u32>,
}

/// Bounded FIFO of audio chunks fed to a sink-input.
#[derive(Debug, Clone)]
pub struct RefillQueue {
    chunks: VecDeque<Bytes>,
    length: usize,
    capacity: usize,
}

impl RefillQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            length: 0,
            capacity,
        }
    }

    /// Append `chunk`. Fails without queuing when it would overflow.
    pub fn push(&mut self, chunk: Bytes) -> Result<(), usize> {
        if self.length + chunk.len() > self.capacity {
            return Err(self.capacity - self.length);
        }
        self.length += chunk.len();
        self.chunks.push_back(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[derive(Debug, Clone)]
pub struct SinkInput {
    pub index: u32,
    pub sink: Option<u32>,
    pub proplist: Proplist,
    pub spec: SampleSpec,
    /// Linear software volume
    pub volume: f64,
    pub muted: bool,
    pub state: StreamState,
    /// Kill the stream instead of keeping it when its sink suspends
    pub kill_on_suspend: bool,
    pub refill: Option<RefillQueue>,
    /// Sample this stream plays, if any
    pub sample: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceOutput {
    pub index: u32,
    pub source: Option<u32>,
    pub proplist: Proplist,
    pub spec: SampleSpec,
    pub state: StreamState,
}

/// Everything a sink-input is created from. Hooks may rewrite it before the
/// stream exists.
#[derive(Debug, Clone, Default)]
pub struct SinkInputNewData {
    pub proplist: Proplist,
    pub spec: SampleSpec,
    pub sink: Option<u32>,
    pub volume: Option<f64>,
    pub muted: bool,
    pub start_corked: bool,
    pub kill_on_suspend: bool,
    pub refill: Option<RefillQueue>,
    pub sample: Option<String>,
}

impl SinkInputNewData {
    pub fn new(proplist: Proplist, spec: SampleSpec) -> Self {
        Self {
            proplist,
            spec,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceOutputNewData {
    pub proplist: Proplist,
    pub spec: SampleSpec,
    pub source: Option<u32>,
    pub start_corked: bool,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub index: u32,
    pub name: String,
    pub args: String,
    pub sinks: Vec<u32>,
    pub sources: Vec<u32>,
}

/// Cached sound sample.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub filename: Option<PathBuf>,
    /// Loaded from `filename` on first use
    pub lazy: bool,
    pub chunk: Option<SoundChunk>,
}

/// Change notifications queued by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreEvent {
    /// Default sink or source changed
    ServerChanged,
    SinkStateChanged(u32),
    SourceStateChanged(u32),
}

const DEVICE_MODARGS: &[&str] = &[
    "device",
    "rate",
    "channels",
    "format",
    "fragment_size",
    "fragments",
    "mmap",
    "tsched",
    "tsched_buffer_size",
    "start_threshold",
    "alternate_rate",
];

#[derive(Debug, Default)]
pub struct AudioCore {
    sinks: BTreeMap<u32, Sink>,
    sources: BTreeMap<u32, Source>,
    sink_inputs: BTreeMap<u32, SinkInput>,
    source_outputs: BTreeMap<u32, SourceOutput>,
    modules: BTreeMap<u32, Module>,
    samples: BTreeMap<String, Sample>,
    shared: BTreeMap<String, String>,

    next_sink: u32,
    next_source: u32,
    next_sink_input: u32,
    next_source_output: u32,
    next_module: u32,

    default_sink: Option<u32>,
    default_source: Option<u32>,

    sink_states: BTreeMap<u32, DeviceState>,
    source_states: BTreeMap<u32, DeviceState>,
    events: VecDeque<CoreEvent>,

    pub muteall: bool,
    pub is_mono: bool,
}

impl AudioCore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- lookups ---------------------------------------------------------

    pub fn sink(&self, idx: u32) -> Option<&Sink> {
        self.sinks.get(&idx)
    }

    pub fn sink_mut(&mut self, idx: u32) -> Option<&mut Sink> {
        self.sinks.get_mut(&idx)
    }

    pub fn sink_by_name(&self, name: &str) -> Option<&Sink> {
        self.sinks.values().find(|s| s.name == name)
    }

    pub fn sink_index(&self, name: &str) -> Option<u32> {
        self.sink_by_name(name).map(|s| s.index)
    }

    pub fn sinks(&self) -> impl Iterator<Item = &Sink> {
        self.sinks.values()
    }

    pub fn sink_indices(&self) -> Vec<u32> {
        self.sinks.keys().copied().collect()
    }

    pub fn source(&self, idx: u32) -> Option<&Source> {
        self.sources.get(&idx)
    }

    pub fn source_by_name(&self, name: &str) -> Option<&Source> {
        self.sources.values().find(|s| s.name == name)
    }

    pub fn source_index(&self, name: &str) -> Option<u32> {
        self.source_by_name(name).map(|s| s.index)
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn source_indices(&self) -> Vec<u32> {
        self.sources.keys().copied().collect()
    }

    pub fn sink_input(&self, idx: u32) -> Option<&SinkInput> {
        self.sink_inputs.get(&idx)
    }

    pub fn sink_input_mut(&mut self, idx: u32) -> Option<&mut SinkInput> {
        self.sink_inputs.get_mut(&idx)
    }

    pub fn sink_inputs(&self) -> impl Iterator<Item = &SinkInput> {
        self.sink_inputs.values()
    }

    pub fn sink_input_indices(&self) -> Vec<u32> {
        self.sink_inputs.keys().copied().collect()
    }

    /// Inputs currently attached to `sink`, in index order.
    pub fn inputs_of_sink(&self, sink: u32) -> Vec<u32> {
        self.sink_inputs
            .values()
            .filter(|i| i.sink == Some(sink))
            .map(|i| i.index)
            .collect()
    }

    /// Number of linked, uncorked inputs on `sink`.
    pub fn sink_used_by(&self, sink: u32) -> usize {
        self.sink_inputs
            .values()
            .filter(|i| i.sink == Some(sink) && i.state.is_active())
            .count()
    }

    pub fn source_output(&self, idx: u32) -> Option<&SourceOutput> {
        self.source_outputs.get(&idx)
    }

    pub fn source_output_mut(&mut self, idx: u32) -> Option<&mut SourceOutput> {
        self.source_outputs.get_mut(&idx)
    }

    pub fn source_outputs(&self) -> impl Iterator<Item = &SourceOutput> {
        self.source_outputs.values()
    }

    pub fn source_output_indices(&self) -> Vec<u32> {
        self.source_outputs.keys().copied().collect()
    }

    pub fn module(&self, idx: u32) -> Option<&Module> {
        self.modules.get(&idx)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    /// Sink the input really plays on, following `device.master_device`.
    pub fn real_master_sink(&self, input: u32) -> Option<u32> {
        let sink = self.sink(self.sink_input(input)?.sink?)?;
        match sink.proplist.gets(props::DEVICE_MASTER_DEVICE) {
            Some(master) => self.sink_index(master),
            None => Some(sink.index),
        }
    }

    pub fn real_master_source(&self, output: u32) -> Option<u32> {
        let source = self.source(self.source_output(output)?.source?)?;
        match source.proplist.gets(props::DEVICE_MASTER_DEVICE) {
            Some(master) => self.source_index(master),
            None => Some(source.index),
        }
    }

    // ---- defaults --------------------------------------------------------

    /// Explicit default sink, or the first real sink when none is set.
    pub fn default_sink_index(&self) -> Option<u32> {
        self.default_sink.or_else(|| {
            self.sinks
                .values()
                .find(|s| s.name != names::SINK_NULL)
                .or_else(|| self.sink_by_name(names::SINK_NULL))
                .map(|s| s.index)
        })
    }

    pub fn default_sink(&self) -> Option<&Sink> {
        self.default_sink_index().and_then(|idx| self.sink(idx))
    }

    pub fn set_default_sink(&mut self, idx: Option<u32>) {
        let before = self.default_sink_index();
        self.default_sink = idx.filter(|i| self.sinks.contains_key(i));
        if self.default_sink_index() != before {
            self.events.push_back(CoreEvent::ServerChanged);
        }
    }

    pub fn default_source_index(&self) -> Option<u32> {
        self.default_source.or_else(|| {
            self.sources
                .values()
                .find(|s| s.name != names::SOURCE_NULL && s.monitor_of.is_none())
                .or_else(|| self.source_by_name(names::SOURCE_NULL))
                .map(|s| s.index)
        })
    }

    pub fn default_source(&self) -> Option<&Source> {
        self.default_source_index().and_then(|idx| self.source(idx))
    }

    pub fn set_default_source(&mut self, idx: Option<u32>) {
        let before = self.default_source_index();
        self.default_source = idx.filter(|i| self.sources.contains_key(i));
        if self.default_source_index() != before {
            self.events.push_back(CoreEvent::ServerChanged);
        }
    }

    pub fn null_sink_index(&self) -> Option<u32> {
        self.sink_index(names::SINK_NULL)
    }

    pub fn null_source_index(&self) -> Option<u32> {
        self.source_index(names::SOURCE_NULL)
    }

    // ---- states ----------------------------------------------------------

    pub fn sink_state(&self, idx: u32) -> Option<DeviceState> {
        let sink = self.sink(idx)?;
        Some(if sink.suspended {
            DeviceState::Suspended
        } else if self.sink_used_by(idx) > 0 {
            DeviceState::Running
        } else {
            DeviceState::Idle
        })
    }

    pub fn source_state(&self, idx: u32) -> Option<DeviceState> {
        let source = self.source(idx)?;
        let used = self
            .source_outputs
            .values()
            .any(|o| o.source == Some(idx) && o.state.is_active());
        Some(if source.suspended {
            DeviceState::Suspended
        } else if used {
            DeviceState::Running
        } else {
            DeviceState::Idle
        })
    }

    /// Recompute device states and queue a change event for each one that
    /// moved since the last call.
    pub fn refresh(&mut self) {
        for idx in self.sink_indices() {
            if let Some(state) = self.sink_state(idx) {
                let previous = self.sink_states.insert(idx, state);
                if previous.is_some_and(|p| p != state) {
                    debug!("Sink {} is now {:?}", idx, state);
                    self.events.push_back(CoreEvent::SinkStateChanged(idx));
                }
            }
        }
        for idx in self.source_indices() {
            if let Some(state) = self.source_state(idx) {
                let previous = self.source_states.insert(idx, state);
                if previous.is_some_and(|p| p != state) {
                    debug!("Source {} is now {:?}", idx, state);
                    self.events.push_back(CoreEvent::SourceStateChanged(idx));
                }
            }
        }
    }

    pub fn pop_event(&mut self) -> Option<CoreEvent> {
        self.events.pop_front()
    }

    pub fn suspend_sink(&mut self, idx: u32, suspend: bool) -> bool {
        match self.sinks.get_mut(&idx) {
            Some(sink) => {
                sink.suspended = suspend;
                true
            }
            None => false,
        }
    }

    pub fn suspend_source(&mut self, idx: u32, suspend: bool) -> bool {
        match self.sources.get_mut(&idx) {
            Some(source) => {
                source.suspended = suspend;
                true
            }
            None => false,
        }
    }

    // ---- modules ---------------------------------------------------------

    /// Instantiate module `name` with `args`, creating its devices.
    pub fn load_module(&mut self, name: &str, args: &str) -> Result<u32, CoreError> {
        let index = self.next_module;
        let mut module = Module {
            index,
            name: name.to_string(),
            args: args.to_string(),
            sinks: Vec::new(),
            sources: Vec::new(),
        };

        match name {
            names::MODULE_ALSA_SINK | names::MODULE_BLUEZ_SINK => {
                let valid: Vec<&str> = ["sink_name", "sink_properties"]
                    .iter()
                    .chain(DEVICE_MODARGS)
                    .copied()
                    .collect();
                let ma = ModArgs::parse(args, &valid)?;
                let api = if name == names::MODULE_ALSA_SINK { "alsa" } else { "bluez" };
                let device = ma.get("device").unwrap_or("default").to_string();
                let sink_name = ma
                    .get("sink_name")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}_output.{}", api, device));
                let spec = spec_from_args(&ma)?;
                let mut proplist = device_proplist(api, &device, &sink_name);
                if let Some(extra) = ma.get("sink_properties") {
                    proplist.update(&Proplist::parse(extra)?);
                }
                let sink = self.add_sink(&sink_name, Some(index), proplist, spec)?;
                module.sinks.push(sink);
            }
            names::MODULE_ALSA_SOURCE | names::MODULE_BLUEZ_SOURCE => {
                let valid: Vec<&str> = ["source_name", "source_properties"]
                    .iter()
                    .chain(DEVICE_MODARGS)
                    .copied()
                    .collect();
                let ma = ModArgs::parse(args, &valid)?;
                let api = if name == names::MODULE_ALSA_SOURCE { "alsa" } else { "bluez" };
                let device = ma.get("device").unwrap_or("default").to_string();
                let source_name = ma
                    .get("source_name")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}_input.{}", api, device));
                let spec = spec_from_args(&ma)?;
                let mut proplist = device_proplist(api, &device, &source_name);
                if let Some(extra) = ma.get("source_properties") {
                    proplist.update(&Proplist::parse(extra)?);
                }
                let source = self.add_source(&source_name, Some(index), proplist, spec, None)?;
                module.sources.push(source);
            }
            names::MODULE_COMBINE => {
                let ma = ModArgs::parse(args, &["sink_name", "slaves", "sink_properties"])?;
                let sink_name = ma.get("sink_name").unwrap_or(names::SINK_COMBINED).to_string();
                let mut proplist = Proplist::new();
                if let Some(slaves) = ma.get("slaves") {
                    proplist.sets("combine.slaves", slaves);
                }
                if let Some(extra) = ma.get("sink_properties") {
                    proplist.update(&Proplist::parse(extra)?);
                }
                let sink = self.add_sink(&sink_name, Some(index), proplist, SampleSpec::default())?;
                module.sinks.push(sink);
            }
            names::MODULE_NULL_SINK => {
                let ma = ModArgs::parse(
                    args,
                    &["sink_name", "sink_properties", "rate", "channels", "format"],
                )?;
                let sink_name = ma.get("sink_name").unwrap_or(names::SINK_NULL).to_string();
                let spec = spec_from_args(&ma)?;
                let mut proplist = Proplist::new();
                if let Some(extra) = ma.get("sink_properties") {
                    proplist.update(&Proplist::parse(extra)?);
                }
                let sink = self.add_sink(&sink_name, Some(index), proplist, spec)?;
                module.sinks.push(sink);
            }
            names::MODULE_NULL_SOURCE => {
                let ma = ModArgs::parse(
                    args,
                    &["source_name", "source_properties", "rate", "channels", "format"],
                )?;
                let source_name = ma.get("source_name").unwrap_or(names::SOURCE_NULL).to_string();
                let spec = spec_from_args(&ma)?;
                let mut proplist = Proplist::new();
                if let Some(extra) = ma.get("source_properties") {
                    proplist.update(&Proplist::parse(extra)?);
                }
                let source = self.add_source(&source_name, Some(index), proplist, spec, None)?;
                module.sources.push(source);
            }
            other => return Err(CoreError::UnknownModule(other.to_string())),
        }

        info!("Loaded module #{} {} {}", index, name, args);
        self.next_module += 1;
        self.modules.insert(index, module);
        Ok(index)
    }

    /// Forget the module record. Its devices must already be removed.
    pub fn remove_module(&mut self, idx: u32) -> Option<Module> {
        let module = self.modules.remove(&idx)?;
        info!("Unloaded module #{} {}", idx, module.name);
        Some(module)
    }

    fn add_sink(
        &mut self,
        name: &str,
        module: Option<u32>,
        proplist: Proplist,
        spec: SampleSpec,
    ) -> Result<u32, CoreError> {
        if self.sink_by_name(name).is_some() {
            return Err(CoreError::DuplicateName(name.to_string()));
        }

        let index = self.next_sink;
        self.next_sink += 1;

        let mut monitor_props = Proplist::new();
        monitor_props.sets("device.class", "monitor");
        let monitor = self.add_source(
            &format!("{}.monitor", name),
            module,
            monitor_props,
            spec,
            Some(index),
        )?;

        self.sinks.insert(
            index,
            Sink {
                index,
                name: name.to_string(),
                module,
                proplist,
                spec,
                suspended: false,
                channel_volumes: vec![VOLUME_NORM; spec.channels as usize],
                monitor: Some(monitor),
            },
        );
        self.sink_states.insert(index, DeviceState::Idle);
        debug!("Created sink #{} {}", index, name);
        Ok(index)
    }

    fn add_source(
        &mut self,
        name: &str,
        module: Option<u32>,
        proplist: Proplist,
        spec: SampleSpec,
        monitor_of: Option<u32>,
    ) -> Result<u32, CoreError> {
        if self.source_by_name(name).is_some() {
            return Err(CoreError::DuplicateName(name.to_string()));
        }

        let index = self.next_source;
        self.next_source += 1;
        self.sources.insert(
            index,
            Source {
                index,
                name: name.to_string(),
                module,
                proplist,
                spec,
                suspended: false,
                monitor_of,
            },
        );
        self.source_states.insert(index, DeviceState::Idle);
        debug!("Created source #{} {}", index, name);
        Ok(index)
    }

    /// Drop a sink and its monitor source. Streams still attached lose
    /// their device.
    pub fn remove_sink(&mut self, idx: u32) -> Option<Sink> {
        let sink = self.sinks.remove(&idx)?;
        self.sink_states.remove(&idx);

        for input in self.sink_inputs.values_mut() {
            if input.sink == Some(idx) {
                warn!("Sink-input {} lost sink {}", input.index, sink.name);
                input.sink = None;
            }
        }
        if let Some(monitor) = sink.monitor {
            self.remove_source(monitor);
        }
        if self.default_sink == Some(idx) {
            self.default_sink = None;
            self.events.push_back(CoreEvent::ServerChanged);
        }
        Some(sink)
    }

    pub fn remove_source(&mut self, idx: u32) -> Option<Source> {
        let source = self.sources.remove(&idx)?;
        self.source_states.remove(&idx);

        for output in self.source_outputs.values_mut() {
            if output.source == Some(idx) {
                output.source = None;
            }
        }
        if self.default_source == Some(idx) {
            self.default_source = None;
            self.events.push_back(CoreEvent::ServerChanged);
        }
        Some(source)
    }

    pub fn set_channel_volumes(&mut self, sink: u32, volumes: Vec<u32>) -> bool {
        match self.sinks.get_mut(&sink) {
            Some(s) => {
                s.channel_volumes = volumes;
                true
            }
            None => false,
        }
    }

    // ---- streams ---------------------------------------------------------

    pub fn create_sink_input(&mut self, data: SinkInputNewData) -> u32 {
        let index = self.next_sink_input;
        self.next_sink_input += 1;
        self.sink_inputs.insert(
            index,
            SinkInput {
                index,
                sink: data.sink,
                proplist: data.proplist,
                spec: data.spec,
                volume: data.volume.unwrap_or(1.0),
                muted: data.muted,
                state: StreamState::Init,
                kill_on_suspend: data.kill_on_suspend,
                refill: data.refill,
                sample: data.sample,
            },
        );
        index
    }

    pub fn remove_sink_input(&mut self, idx: u32) -> Option<SinkInput> {
        self.sink_inputs.remove(&idx)
    }

    pub fn set_sink_input_state(&mut self, idx: u32, state: StreamState) -> Option<StreamState> {
        let input = self.sink_inputs.get_mut(&idx)?;
        Some(std::mem::replace(&mut input.state, state))
    }

    pub fn set_sink_input_sink(&mut self, idx: u32, sink: u32) -> bool {
        if !self.sinks.contains_key(&sink) {
            return false;
        }
        match self.sink_inputs.get_mut(&idx) {
            Some(input) => {
                input.sink = Some(sink);
                true
            }
            None => false,
        }
    }

    pub fn create_source_output(&mut self, data: SourceOutputNewData) -> u32 {
        let index = self.next_source_output;
        self.next_source_output += 1;
        self.source_outputs.insert(
            index,
            SourceOutput {
                index,
                source: data.source,
                proplist: data.proplist,
                spec: data.spec,
                state: StreamState::Init,
            },
        );
        index
    }

    pub fn remove_source_output(&mut self, idx: u32) -> Option<SourceOutput> {
        self.source_outputs.remove(&idx)
    }

    pub fn set_source_output_state(
        &mut self,
        idx: u32,
        state: StreamState,
    ) -> Option<StreamState> {
        let output = self.source_outputs.get_mut(&idx)?;
        Some(std::mem::replace(&mut output.state, state))
    }

    pub fn set_source_output_source(&mut self, idx: u32, source: u32) -> bool {
        if !self.sources.contains_key(&source) {
            return false;
        }
        match self.source_outputs.get_mut(&idx) {
            Some(output) => {
                output.source = Some(source);
                true
            }
            None => false,
        }
    }

    // ---- samples ---------------------------------------------------------

    /// Register a sample loaded from `filename` on first use.
    pub fn add_lazy_sample(&mut self, name: &str, filename: PathBuf) {
        self.samples.insert(
            name.to_string(),
            Sample {
                name: name.to_string(),
                filename: Some(filename),
                lazy: true,
                chunk: None,
            },
        );
    }

    pub fn add_sample(&mut self, name: &str, chunk: SoundChunk) {
        self.samples.insert(
            name.to_string(),
            Sample {
                name: name.to_string(),
                filename: None,
                lazy: false,
                chunk: Some(chunk),
            },
        );
    }

    pub fn has_sample(&self, name: &str) -> bool {
        self.samples.contains_key(name)
    }

    pub fn remove_sample(&mut self, name: &str) -> Option<Sample> {
        self.samples.remove(name)
    }

    pub fn sample_names(&self) -> impl Iterator<Item = &str> {
        self.samples.keys().map(String::as_str)
    }

    /// Audio of sample `name`, loading it from disk if needed.
    pub fn load_sample(&mut self, name: &str) -> Result<SoundChunk, CoreError> {
        let sample = self
            .samples
            .get_mut(name)
            .ok_or_else(|| CoreError::no_entity("sample", name))?;

        if let Some(chunk) = &sample.chunk {
            return Ok(chunk.clone());
        }

        let filename = sample
            .filename
            .clone()
            .ok_or_else(|| CoreError::no_entity("sample file", name))?;
        let chunk = sound_file::load(&filename).map_err(|source| CoreError::SampleLoad {
            name: name.to_string(),
            source,
        })?;
        debug!("Loaded sample {} from {}", name, filename.display());
        sample.chunk = Some(chunk.clone());
        Ok(chunk)
    }

    // ---- shared state ----------------------------------------------------

    pub fn shared_set(&mut self, key: &str, value: impl Into<String>) {
        self.shared.insert(key.to_string(), value.into());
    }

    pub fn shared_get(&self, key: &str) -> Option<&str> {
        self.shared.get(key).map(String::as_str)
    }
}

fn spec_from_args(ma: &ModArgs) -> Result<SampleSpec, CoreError> {
    let mut spec = SampleSpec::default();
    if let Some(rate) = ma.get_u32("rate")? {
        spec.rate = rate;
    }
    if let Some(channels) = ma.get_u32("channels")? {
        spec.channels = u8::try_from(channels)
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| CoreError::BadModuleArgs(format!("invalid channels {}", channels)))?;
    }
    if let Some(format) = ma.get("format") {
        spec.format = SampleFormat::parse(format)
            .ok_or_else(|| CoreError::BadModuleArgs(format!("invalid format {}", format)))?;
    }
    Ok(spec)
}

/// Base properties of a hardware device object.
fn device_proplist(api: &str, device: &str, object_name: &str) -> Proplist {
    let mut proplist = Proplist::new();
    proplist.sets(props::DEVICE_API, api);
    proplist.sets(props::DEVICE_STRING, device);

    if api == "alsa" {
        if let Some((card, dev)) = device
            .strip_prefix("hw:")
            .and_then(|rest| rest.split_once(','))
        {
            proplist.sets(props::ALSA_CARD, card);
            proplist.sets(props::ALSA_DEVICE, dev);
        }
    } else if let Some((_, protocol)) = object_name.split_once('.') {
        proplist.sets(props::BLUETOOTH_PROTOCOL, protocol);
    }

    proplist
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_with_null() -> AudioCore {
        let mut core = AudioCore::new();
        core.load_module(names::MODULE_NULL_SINK, "").unwrap();
        core.load_module(names::MODULE_NULL_SOURCE, "").unwrap();
        core
    }

    #[test]
    fn test_alsa_sink_properties() {
        let mut core = core_with_null();
        let module = core
            .load_module(
                names::MODULE_ALSA_SINK,
                r#"sink_name="alsa_output.0.analog-stereo" device="hw:0,3" sink_properties="alsa.card_name=saudio device.bus=usb" "#,
            )
            .unwrap();

        let sink = core.sink_by_name(names::SINK_ALSA).unwrap();
        assert_eq!(sink.module, Some(module));
        assert_eq!(sink.proplist.gets(props::DEVICE_API), Some("alsa"));
        assert_eq!(sink.proplist.gets(props::ALSA_CARD), Some("0"));
        assert_eq!(sink.proplist.gets(props::ALSA_DEVICE), Some("3"));
        assert_eq!(sink.proplist.gets(props::ALSA_CARD_NAME), Some("saudio"));
        assert!(sink.is_usb_alsa());
        assert!(sink.is_alsa());
        assert!(core.source_by_name(names::ALSA_MONITOR_SOURCE).is_some());
    }

    #[test]
    fn test_bluez_protocol_from_name() {
        let mut core = core_with_null();
        core.load_module(names::MODULE_BLUEZ_SINK, "sink_name=bluez_sink.a2dp")
            .unwrap();
        let sink = core.sink_by_name("bluez_sink.a2dp").unwrap();
        assert!(sink.is_bluez());
        assert_eq!(sink.proplist.gets(props::BLUETOOTH_PROTOCOL), Some("a2dp"));
    }

    #[test]
    fn test_unknown_module_and_duplicates() {
        let mut core = core_with_null();
        assert!(matches!(
            core.load_module("module-echo", ""),
            Err(CoreError::UnknownModule(_))
        ));
        assert!(matches!(
            core.load_module(names::MODULE_NULL_SINK, ""),
            Err(CoreError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_states_and_events() {
        let mut core = core_with_null();
        core.load_module(names::MODULE_ALSA_SINK, "sink_name=alsa_output.0.analog-stereo device=hw:0,0")
            .unwrap();
        let sink = core.sink_index(names::SINK_ALSA).unwrap();
        core.refresh();
        while core.pop_event().is_some() {}

        let input = core.create_sink_input(SinkInputNewData {
            sink: Some(sink),
            ..SinkInputNewData::default()
        });
        assert_eq!(core.sink_state(sink), Some(DeviceState::Idle));

        core.set_sink_input_state(input, StreamState::Running);
        core.refresh();
        assert_eq!(core.sink_state(sink), Some(DeviceState::Running));
        assert_eq!(core.pop_event(), Some(CoreEvent::SinkStateChanged(sink)));
        assert_eq!(core.pop_event(), None);

        core.suspend_sink(sink, true);
        core.refresh();
        assert_eq!(core.sink_state(sink), Some(DeviceState::Suspended));
    }

    #[test]
    fn test_default_sink_falls_back() {
        let mut core = core_with_null();
        let null = core.null_sink_index().unwrap();
        core.set_default_sink(Some(null));
        assert_eq!(core.pop_event(), None);

        core.load_module(names::MODULE_ALSA_SINK, "sink_name=alsa_output.0.analog-stereo")
            .unwrap();
        let alsa = core.sink_index(names::SINK_ALSA).unwrap();
        core.set_default_sink(Some(alsa));
        assert_eq!(core.pop_event(), Some(CoreEvent::ServerChanged));

        core.remove_sink(alsa);
        assert_eq!(core.pop_event(), Some(CoreEvent::ServerChanged));
        assert_eq!(core.default_sink_index(), Some(null));
    }

    #[test]
    fn test_real_master_sink() {
        let mut core = core_with_null();
        core.load_module(names::MODULE_ALSA_SINK, "sink_name=alsa_output.0.analog-stereo")
            .unwrap();
        core.load_module(
            names::MODULE_NULL_SINK,
            r#"sink_name=alsa_output.0.analog-stereo.echo-cancel sink_properties="device.master_device=alsa_output.0.analog-stereo""#,
        )
        .unwrap();
        let alsa = core.sink_index(names::SINK_ALSA).unwrap();
        let aec = core.sink_index(names::AEC_SINK).unwrap();

        let input = core.create_sink_input(SinkInputNewData {
            sink: Some(aec),
            ..SinkInputNewData::default()
        });
        assert_eq!(core.real_master_sink(input), Some(alsa));
    }

    #[test]
    fn test_refill_queue_overflow() {
        let mut queue = RefillQueue::new(8);
        assert!(queue.push(Bytes::from_static(&[0; 4])).is_ok());
        assert!(queue.push(Bytes::from_static(&[0; 4])).is_ok());
        assert_eq!(queue.push(Bytes::from_static(&[0; 1])), Err(0));
        assert_eq!(queue.len(), 8);
        assert_eq!(queue.chunk_count(), 2);
    }

    #[test]
    fn test_lazy_sample_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tap.wav");
        std::fs::write(&path, sound_file::tests::wav_bytes(8000, 1, 80)).unwrap();

        let mut core = AudioCore::new();
        core.add_lazy_sample("tap", path);
        let chunk = core.load_sample("tap").unwrap();
        assert_eq!(chunk.len(), 160);
        assert!(matches!(
            core.load_sample("missing"),
            Err(CoreError::NoEntity { .. })
        ));
    }
}
