//! Object-graph mutations that run the lifecycle hooks.
//!
//! The core only stores sinks, sources and streams. Everything that creates,
//! links, moves or removes one of them goes through these wrappers so the
//! registered listeners see each transition in the order the audio server
//! would report it.

use super::hooks::HookEvent;
use super::info::policy_of;
use super::timer::TimerKind;
use super::PolicyEngine;
use crate::core::{DeviceState, SinkInput, SinkInputNewData, SourceOutputNewData, StreamState};
use crate::error::{bound, CoreError};
use crate::hal::PcmHandle;
use audio_policy_types::names::props;
use audio_policy_types::{Direction, StreamPolicy};
use tracing::{debug, error, info, warn};

impl PolicyEngine {
    // ---- modules ---------------------------------------------------------

    /// Load module `name` and announce every sink it created.
    pub fn load_module(&mut self, name: &str, args: &str) -> Result<u32, CoreError> {
        let module = self.core.load_module(name, args)?;
        let sinks = self
            .core
            .module(module)
            .map(|m| m.sinks.clone())
            .unwrap_or_default();

        for sink in sinks {
            if !self.open_sink_pcm(sink) {
                self.core.suspend_sink(sink, true);
            }
            self.fire(&mut HookEvent::SinkPut(sink));
        }
        self.settle();
        Ok(module)
    }

    /// Tear down module `idx` and every device it owns.
    pub fn unload_module(&mut self, idx: u32) -> Result<(), CoreError> {
        let module = self
            .core
            .module(idx)
            .cloned()
            .ok_or_else(|| CoreError::no_entity("module", idx))?;
        if self.module_combined == Some(idx) {
            self.module_combined = None;
        }

        for sink in module.sinks {
            self.unlink_sink(sink);
        }
        for source in module.sources {
            self.core.remove_source(source);
        }
        self.core.remove_module(idx);
        self.settle();
        Ok(())
    }

    fn unlink_sink(&mut self, sink: u32) {
        if self.core.sink(sink).is_none() {
            return;
        }
        self.fire(&mut HookEvent::SinkUnlink(sink));
        self.close_sink_pcm(sink);

        let Some(removed) = self.core.remove_sink(sink) else {
            return;
        };
        let orphans: Vec<u32> = self
            .core
            .sink_inputs()
            .filter(|i| i.sink.is_none() && i.state != StreamState::Init)
            .map(|i| i.index)
            .collect();

        self.fire(&mut HookEvent::SinkUnlinkPost(&removed));

        if self.config.on_rescue {
            for idx in orphans {
                self.rescue_sink_input(idx);
            }
        }
    }

    /// Find a new home for a stream whose sink went away.
    fn rescue_sink_input(&mut self, idx: u32) {
        let Some(input) = self.core.sink_input(idx) else {
            return;
        };
        if input.sink.is_some() || input.proplist.is_filter() {
            return;
        }
        let policy = policy_of(&input.proplist).unwrap_or(StreamPolicy::Auto);

        let target = self
            .select_sink(&policy, Some(idx), true)
            .or_else(|| self.core.default_sink_index());
        match target {
            Some(sink) => {
                info!("Rescuing sink-input[{}] onto sink[{}]", idx, sink);
                self.move_sink_input(idx, sink);
            }
            None => warn!("No sink to rescue sink-input[{}]", idx),
        }
    }

    // ---- playback PCMs ---------------------------------------------------

    /// ALSA device string of a sink that owns a playback PCM.
    fn sink_pcm_device(&self, sink: u32) -> Option<String> {
        let sink = self.core.sink(sink)?;
        if sink.api() != Some("alsa") {
            return None;
        }
        sink.proplist.gets(props::DEVICE_STRING).map(str::to_string)
    }

    fn open_sink_pcm(&mut self, sink: u32) -> bool {
        if self.pcms.contains_key(&sink) {
            return true;
        }
        let Some(device) = self.sink_pcm_device(sink) else {
            return true;
        };
        match bound(self.hal.alsa_pcm_open(&device, Direction::Out)) {
            Ok(Some(pcm)) => {
                debug!("Opened pcm {:?} ({}) for sink[{}]", pcm, device, sink);
                self.pcms.insert(sink, pcm);
                true
            }
            Ok(None) => true,
            Err(e) => {
                error!("Failed to open pcm {} for sink[{}]: {}", device, sink, e);
                false
            }
        }
    }

    fn close_sink_pcm(&mut self, sink: u32) {
        let Some(pcm): Option<PcmHandle> = self.pcms.remove(&sink) else {
            return;
        };
        if let Err(e) = bound(self.hal.alsa_pcm_close(pcm)) {
            warn!("Failed to close pcm {:?} of sink[{}]: {}", pcm, sink, e);
        }
    }

    /// Suspend or resume a sink, releasing its PCM while suspended.
    ///
    /// Suspending also kills the streams that asked not to survive it.
    /// Resuming fails, leaving the sink suspended, when the PCM is held
    /// elsewhere.
    pub(crate) fn suspend_sink(&mut self, sink: u32, suspend: bool) -> bool {
        let Some(current) = self.core.sink(sink).map(|s| s.suspended) else {
            return false;
        };
        if current == suspend {
            return true;
        }

        if suspend {
            self.core.suspend_sink(sink, true);
            self.close_sink_pcm(sink);
            let doomed: Vec<u32> = self
                .core
                .inputs_of_sink(sink)
                .into_iter()
                .filter(|idx| {
                    self.core
                        .sink_input(*idx)
                        .is_some_and(|i| i.kill_on_suspend)
                })
                .collect();
            for idx in doomed {
                info!("Killing sink-input[{}] on suspended sink[{}]", idx, sink);
                self.unlink_sink_input(idx);
            }
            true
        } else {
            if !self.open_sink_pcm(sink) {
                return false;
            }
            self.core.suspend_sink(sink, false);
            true
        }
    }

    pub(crate) fn sink_is_suspended(&self, sink: u32) -> bool {
        self.core.sink_state(sink) == Some(DeviceState::Suspended)
    }

    // ---- sink-inputs -----------------------------------------------------

    /// Create a sink-input without linking it. Runs the new-stream hooks,
    /// which pick the sink and the initial volume.
    pub fn new_sink_input(&mut self, mut data: SinkInputNewData) -> Result<u32, CoreError> {
        self.fire(&mut HookEvent::SinkInputNew(&mut data));

        let sink = data
            .sink
            .or_else(|| self.core.default_sink_index())
            .ok_or(CoreError::NoSink)?;
        if data.kill_on_suspend && self.sink_is_suspended(sink) {
            warn!("Sink[{}] is suspended, not creating the stream", sink);
            return Err(CoreError::NoSink);
        }
        data.sink = Some(sink);
        Ok(self.core.create_sink_input(data))
    }

    /// Link a sink-input created by [`PolicyEngine::new_sink_input`].
    pub fn put_sink_input(&mut self, idx: u32, corked: bool) -> Result<(), CoreError> {
        let state = if corked {
            StreamState::Corked
        } else {
            StreamState::Running
        };
        match self.core.sink_input(idx).map(|i| i.state) {
            None => return Err(CoreError::no_entity("sink-input", idx)),
            Some(StreamState::Init) => {}
            Some(_) => return Ok(()),
        }
        self.core.set_sink_input_state(idx, state);
        self.fire(&mut HookEvent::SinkInputPut(idx));
        self.settle();
        Ok(())
    }

    /// Create and link a sink-input in one go.
    pub fn create_sink_input(&mut self, data: SinkInputNewData) -> Result<u32, CoreError> {
        let corked = data.start_corked;
        let idx = self.new_sink_input(data)?;
        self.put_sink_input(idx, corked)?;
        Ok(idx)
    }

    pub fn set_sink_input_state(&mut self, idx: u32, state: StreamState) -> bool {
        match self.core.set_sink_input_state(idx, state) {
            None => false,
            Some(previous) => {
                if previous != state && previous != StreamState::Init {
                    self.fire(&mut HookEvent::SinkInputStateChanged(idx));
                }
                self.settle();
                true
            }
        }
    }

    pub fn cork_sink_input(&mut self, idx: u32, cork: bool) -> bool {
        let state = if cork {
            StreamState::Corked
        } else {
            StreamState::Running
        };
        self.set_sink_input_state(idx, state)
    }

    /// Move a linked sink-input to `sink`, running the move hooks.
    pub fn move_sink_input(&mut self, idx: u32, sink: u32) -> bool {
        let Some(input) = self.core.sink_input(idx) else {
            return false;
        };
        if input.sink == Some(sink) {
            return true;
        }
        if self.core.sink(sink).is_none() {
            warn!("Cannot move sink-input[{}]: no sink[{}]", idx, sink);
            return false;
        }

        debug!("Moving sink-input[{}] from {:?} to [{}]", idx, input.sink, sink);
        self.fire(&mut HookEvent::SinkInputMoveStart(idx));
        self.core.set_sink_input_sink(idx, sink);
        self.fire(&mut HookEvent::SinkInputMoveFinish(idx));
        true
    }

    /// Remove a sink-input and forget every piece of engine state about it.
    pub fn unlink_sink_input(&mut self, idx: u32) -> Option<SinkInput> {
        let input = self.core.remove_sink_input(idx)?;
        self.marks.remove(&idx);
        if self.fades.remove(&idx).is_some() {
            self.timers.cancel(TimerKind::Fade(idx));
        }
        self.timers.cancel(TimerKind::SampleEnd(idx));

        self.fire(&mut HookEvent::SinkInputUnlinkPost(&input));
        self.settle();
        Some(input)
    }

    // ---- source-outputs --------------------------------------------------

    pub fn create_source_output(
        &mut self,
        mut data: SourceOutputNewData,
    ) -> Result<u32, CoreError> {
        self.fire(&mut HookEvent::SourceOutputNew(&mut data));

        let source = data
            .source
            .or_else(|| self.core.default_source_index())
            .ok_or(CoreError::NoSource)?;
        data.source = Some(source);
        let corked = data.start_corked;
        let idx = self.core.create_source_output(data);

        let state = if corked {
            StreamState::Corked
        } else {
            StreamState::Running
        };
        self.core.set_source_output_state(idx, state);
        self.fire(&mut HookEvent::SourceOutputPut(idx));
        self.settle();
        Ok(idx)
    }

    pub fn cork_source_output(&mut self, idx: u32, cork: bool) -> bool {
        let state = if cork {
            StreamState::Corked
        } else {
            StreamState::Running
        };
        let changed = self.core.set_source_output_state(idx, state).is_some();
        self.settle();
        changed
    }

    pub fn move_source_output(&mut self, idx: u32, source: u32) -> bool {
        let moved = self.core.set_source_output_source(idx, source);
        if moved {
            debug!("Moved source-output[{}] to [{}]", idx, source);
        }
        moved
    }

    pub fn unlink_source_output(&mut self, idx: u32) -> bool {
        let Some(output) = self.core.remove_source_output(idx) else {
            return false;
        };
        self.corked_outputs.remove(&idx);
        self.fire(&mut HookEvent::SourceOutputUnlinkPost(&output));
        self.settle();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{engine, play};
    use super::*;
    use crate::hal::soft::HalCall;
    use audio_policy_types::names;
    use audio_policy_types::VolumeType;

    #[test]
    fn test_create_links_running_stream() {
        let (mut engine, _probe) = engine();
        let idx = play(&mut engine, "auto", VolumeType::Media);
        let input = engine.core().sink_input(idx).unwrap();
        assert_eq!(input.state, StreamState::Running);
        assert_eq!(engine.primary_volume_type(), VolumeType::Media.as_u32() as i32);
    }

    #[test]
    fn test_unlink_clears_primary_and_marks() {
        let (mut engine, _probe) = engine();
        let idx = play(&mut engine, "auto", VolumeType::Media);
        engine.marks_mut(idx).device_switching = true;

        assert!(engine.unlink_sink_input(idx).is_some());
        assert_eq!(engine.stream_marks(idx), Default::default());
        assert_eq!(engine.primary_volume_type(), -1);
        assert!(engine.unlink_sink_input(idx).is_none());
    }

    #[test]
    fn test_move_runs_mute_hooks() {
        let (mut engine, probe) = engine();
        let idx = play(&mut engine, "auto", VolumeType::Media);
        let null = engine.core().null_sink_index().unwrap();
        probe.clear_calls();

        assert!(engine.move_sink_input(idx, null));
        let mutes: Vec<bool> = probe
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                HalCall::SetMute { mute, .. } => Some(mute),
                _ => None,
            })
            .collect();
        assert_eq!(mutes, vec![true, false]);
        assert_eq!(engine.core().sink_input(idx).unwrap().sink, Some(null));
    }

    #[test]
    fn test_unload_rescues_orphans() {
        let (mut engine, _probe) = engine();
        let module = engine
            .load_module(names::MODULE_NULL_SINK, "sink_name=scratch")
            .unwrap();
        let scratch = engine.core().sink_index("scratch").unwrap();

        let idx = play(&mut engine, "auto", VolumeType::Media);
        engine.move_sink_input(idx, scratch);
        engine.unload_module(module).unwrap();

        let alsa = engine.core().sink_index(names::SINK_ALSA);
        assert_eq!(engine.core().sink_input(idx).unwrap().sink, alsa);
    }

    #[test]
    fn test_suspend_releases_pcm() {
        let (mut engine, probe) = engine();
        let alsa = engine.core().sink_index(names::SINK_ALSA).unwrap();

        assert!(engine.suspend_sink(alsa, true));
        assert!(probe.calls().iter().any(|c| matches!(c, HalCall::PcmClose(_))));
        probe.clear_calls();

        assert!(engine.suspend_sink(alsa, false));
        assert_eq!(probe.calls(), vec![HalCall::PcmOpen("hw:0,0".to_string())]);
    }

    #[test]
    fn test_resume_fails_while_pcm_is_held() {
        let (mut engine, _probe) = engine();
        let alsa = engine.core().sink_index(names::SINK_ALSA).unwrap();
        assert!(engine.suspend_sink(alsa, true));

        engine
            .load_module(names::MODULE_ALSA_SINK, "sink_name=twin device=hw:0,0")
            .unwrap();
        let twin = engine.core().sink_index("twin").unwrap();
        assert!(!engine.core().sink(twin).unwrap().suspended);

        assert!(!engine.suspend_sink(alsa, false));
        assert!(engine.core().sink(alsa).unwrap().suspended);
    }

    #[test]
    fn test_kill_on_suspend() {
        let (mut engine, _probe) = engine();
        let alsa = engine.core().sink_index(names::SINK_ALSA).unwrap();
        let mut data = SinkInputNewData::new(
            super::super::tests::stream_props(
                "shutter",
                "auto",
                VolumeType::System,
                audio_policy_types::GainType::Default,
            ),
            Default::default(),
        );
        data.kill_on_suspend = true;
        let idx = engine.create_sink_input(data).unwrap();

        engine.suspend_sink(alsa, true);
        assert!(engine.core().sink_input(idx).is_none());
    }

    #[test]
    fn test_source_output_requires_source() {
        let (mut engine, _probe) = engine();
        let out = engine
            .create_source_output(SourceOutputNewData::default())
            .unwrap();
        let primary = engine.core().source_index(names::SOURCE_ALSA);
        assert_eq!(engine.core().source_output(out).unwrap().source, primary);
        assert!(engine.unlink_source_output(out));
        assert!(!engine.unlink_source_output(out));
    }
}
