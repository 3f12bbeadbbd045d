//! One-shot samples and burst-shot playback.
//!
//! Burst-shot plays the same sample over and over (camera shutter) through a
//! single corked stream whose refill queue gets one more copy per tick. The
//! first few ticks fire faster so the first shots are not late.

use super::timer::TimerKind;
use super::PolicyEngine;
use crate::core::{Proplist, RefillQueue, SinkInputNewData};
use crate::error::{bound, AudioError, AudioResult};
use audio_policy_types::names::{self, props};
use audio_policy_types::{AudioInfo, GainType, PolicyEvent, VolumeType};
use bytes::Bytes;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const BURST_DEFAULT_INTERVAL: Duration = Duration::from_millis(90);
/// Refill queue capacity, in sample lengths
pub const BURST_QUEUE_SAMPLES: usize = 35;
const BURST_BOOST_FACTOR: u32 = 4;
/// Prefix of the sample names [`PolicyEngine::play_file`] caches files under
pub const FILE_SAMPLE_PREFIX: &str = "SIMPLE_PLAY_";

/// Burst-shot session, guarded by the engine's burst mutex.
#[derive(Debug, Default)]
pub struct BurstShot {
    pub is_running: bool,
    pub stream: Option<u32>,
    /// One copy of the sample audio
    pub chunk: Option<Bytes>,
    pub interval: Duration,
    /// Divides the interval while above 1
    pub factor: u32,
    /// Ticks run so far
    pub count: u32,
}

fn sample_props(volume_type: VolumeType, gain_type: GainType) -> Proplist {
    let mut proplist = Proplist::new();
    proplist.sets(props::MEDIA_VOLUME_TYPE, volume_type.as_u32().to_string());
    proplist.sets(props::MEDIA_GAIN_TYPE, gain_type.as_u32().to_string());
    let policy = if volume_type == VolumeType::Fixed {
        "phone"
    } else {
        "auto"
    };
    proplist.sets(props::MEDIA_POLICY, policy);
    proplist.sets(props::MEDIA_POLICY_IGNORE_PRESET_SINK, "yes");
    proplist
}

impl PolicyEngine {
    fn sample_volume(&self, volume_type: VolumeType, gain_type: GainType, level: u32) -> AudioResult<f64> {
        let info = AudioInfo::with_gain(volume_type, gain_type);
        let value = bound(self.hal.get_volume_value(&info, volume_type, level)).inspect_err(|e| {
            error!(
                "get_volume_value for sample failed: type {} gain {} level {}: {}",
                volume_type, gain_type, level, e
            )
        })?;
        Ok(value.unwrap_or(1.0))
    }

    /// Play sample `name` once on the default sink and return the new
    /// stream index. The stream goes away when the sample has played.
    pub fn play_sample(
        &mut self,
        name: &str,
        volume_type: VolumeType,
        gain_type: GainType,
        level: u32,
    ) -> AudioResult<u32> {
        let volume = self.sample_volume(volume_type, gain_type, level)?;

        let registered = name == names::BOOTING_SAMPLE && !self.core.has_sample(name);
        if registered {
            let path = self.samples.booting_sound_path.clone();
            info!("Registering {} sample from {}", name, path.display());
            self.core.add_lazy_sample(name, path);
        }

        let result = self.start_sample(name, sample_props(volume_type, gain_type), Some(volume));

        if registered {
            self.core.remove_sample(name);
        }
        result
    }

    /// Register every `*.wav` in `dir` as a lazily loaded sample named
    /// after the file stem. Returns how many were registered.
    pub fn register_sample_dir(&mut self, dir: &Path) -> std::io::Result<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("wav") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            debug!("Registering sample {} from {}", name, path.display());
            self.core.add_lazy_sample(name, path.clone());
            count += 1;
        }
        Ok(count)
    }

    /// Play the sound file at `path` once on the default sink.
    ///
    /// The file is cached as a lazy sample under a name derived from its
    /// path. The stream volume is left to the new-stream hook, which looks
    /// the level up for `volume_type`.
    pub fn play_file(
        &mut self,
        path: &Path,
        volume_type: VolumeType,
        gain_type: GainType,
    ) -> AudioResult<u32> {
        let name = format!("{}{}", FILE_SAMPLE_PREFIX, path.display());
        if self.core.has_sample(&name) {
            debug!("Found cached sample for {}", path.display());
        } else {
            self.core.add_lazy_sample(&name, path.to_path_buf());
        }

        let mut proplist = sample_props(volume_type, gain_type);
        proplist.sets(props::MEDIA_POLICY, "auto");
        self.start_sample(&name, proplist, None)
    }

    fn start_sample(
        &mut self,
        name: &str,
        proplist: Proplist,
        volume: Option<f64>,
    ) -> AudioResult<u32> {
        let sink = self.core.default_sink_index().ok_or_else(|| {
            error!("No default sink to play sample {}", name);
            AudioError::Undefined
        })?;
        let chunk = self.core.load_sample(name).map_err(|e| {
            error!("play_sample failed: {}", e);
            AudioError::Undefined
        })?;

        let mut data = SinkInputNewData::new(proplist, chunk.spec);
        data.sink = Some(sink);
        data.volume = volume;
        data.sample = Some(name.to_string());
        let idx = self.create_sink_input(data).map_err(|e| {
            error!("play_sample {} failed: {}", name, e);
            AudioError::Undefined
        })?;

        debug!("Playing sample {} on stream {} for {:?}", name, idx, chunk.duration());
        self.timers
            .schedule_in(Instant::now(), chunk.duration(), TimerKind::SampleEnd(idx));
        Ok(idx)
    }

    /// A one-shot sample stream finished playing.
    pub(crate) fn sample_end(&mut self, idx: u32) {
        let is_sample = self
            .core
            .sink_input(idx)
            .is_some_and(|input| input.sample.is_some());
        if is_sample {
            debug!("Sample stream {} drained", idx);
            self.unlink_sink_input(idx);
        }
    }

    pub fn burst_shot_running(&self) -> bool {
        self.burst.lock().is_running
    }

    /// Start burst-shot playback of sample `name`. A zero `interval` picks
    /// the default. Refused while another burst is running.
    pub fn play_sample_continuously(
        &mut self,
        name: &str,
        volume_type: VolumeType,
        gain_type: GainType,
        level: u32,
        interval: Duration,
    ) -> AudioResult<u32> {
        let burst = self.burst.clone();
        let mut shot = burst.lock();
        if shot.is_running {
            warn!("play_sample_continuously is in running state - do nothing");
            return Err(AudioError::Resource);
        }
        if shot.stream.is_some() {
            // Stopped but not yet torn down by its tick
            self.finish_burst(&mut shot);
        }

        let mut proplist = sample_props(volume_type, gain_type);
        proplist.sets(props::MEDIA_NAME, name);
        proplist.sets(props::EVENT_ID, name);

        let sink = self.core.default_sink_index().ok_or_else(|| {
            error!("No default sink for burst-shot");
            AudioError::Undefined
        })?;
        let volume = self.sample_volume(volume_type, gain_type, level)?;
        let chunk = self.core.load_sample(name).map_err(|e| {
            error!("burst-shot sample: {}", e);
            AudioError::Undefined
        })?;
        if chunk.is_empty() {
            error!("burst-shot sample {} is empty", name);
            return Err(AudioError::Undefined);
        }

        let mut queue = RefillQueue::new(chunk.len() * BURST_QUEUE_SAMPLES);
        queue
            .push(chunk.data.clone())
            .map_err(|_| AudioError::Resource)?;

        let mut data = SinkInputNewData::new(proplist, chunk.spec);
        data.sink = Some(sink);
        data.volume = Some(volume);
        data.start_corked = true;
        data.kill_on_suspend = true;
        data.refill = Some(queue);
        data.sample = Some(name.to_string());
        let idx = self.new_sink_input(data).map_err(|e| {
            error!("burst-shot stream for {} failed: {}", name, e);
            AudioError::Undefined
        })?;

        let interval = if interval.is_zero() {
            BURST_DEFAULT_INTERVAL
        } else {
            interval
        };
        *shot = BurstShot {
            is_running: true,
            stream: Some(idx),
            chunk: Some(chunk.data),
            interval,
            factor: BURST_BOOST_FACTOR - 1,
            count: 0,
        };
        self.timers.cancel(TimerKind::BurstShot);
        self.timers.schedule(Instant::now(), TimerKind::BurstShot);

        info!(
            "burst-shot start: {} stream {} type {} gain {} level {} interval {:?}",
            name, idx, volume_type, gain_type, level, interval
        );
        self.publish(PolicyEvent::BurstShotChanged { active: true });
        Ok(idx)
    }

    /// Ask the running burst to stop. The next tick tears it down.
    pub fn stop_sample_continuously(&mut self) {
        let mut shot = self.burst.lock();
        if !shot.is_running {
            warn!("burst-shot is not running");
            return;
        }
        info!("burst-shot stop requested");
        shot.is_running = false;
    }

    pub(crate) fn burst_tick(&mut self, now: Instant) {
        let burst = self.burst.clone();
        let mut shot = burst.lock();

        let alive = shot
            .stream
            .is_some_and(|idx| self.core.sink_input(idx).is_some());
        if shot.is_running && !alive {
            error!("burst-shot stream {:?} vanished, cleaning up", shot.stream);
            shot.is_running = false;
        }

        if shot.is_running {
            let Some(idx) = shot.stream else {
                return;
            };
            let interval = if shot.factor > 1 {
                shot.interval / shot.factor
            } else {
                shot.interval
            };

            if shot.count == 0 {
                if let Err(e) = self.put_sink_input(idx, false) {
                    error!("burst-shot put of stream {} failed: {}", idx, e);
                }
            } else if let Some(chunk) = shot.chunk.clone() {
                let pushed = self
                    .core
                    .sink_input_mut(idx)
                    .and_then(|input| input.refill.as_mut())
                    .map(|queue| queue.push(chunk));
                if let Some(Err(room)) = pushed {
                    warn!("burst-shot queue full ({} bytes left)", room);
                }
            }
            shot.count += 1;
            self.timers.schedule_in(now, interval, TimerKind::BurstShot);
            if shot.factor > 1 {
                shot.factor -= 1;
            }
            return;
        }

        self.finish_burst(&mut shot);
    }

    /// Mute and unlink the stream of a stopped burst and reset the session.
    fn finish_burst(&mut self, shot: &mut BurstShot) {
        let alive = shot
            .stream
            .filter(|idx| self.core.sink_input(*idx).is_some());
        if let Some(idx) = alive {
            if shot.count > 1 {
                if let Some(input) = self.core.sink_input_mut(idx) {
                    input.muted = true;
                }
            }
            self.unlink_sink_input(idx);
        }
        info!("burst-shot stopped after {} ticks", shot.count);
        *shot = BurstShot::default();
        self.timers.cancel(TimerKind::BurstShot);
        self.publish(PolicyEvent::BurstShotChanged { active: false });
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::engine;
    use super::*;
    use crate::config::SamplesConfig;
    use crate::core::sound_file::{parse, tests::wav_bytes};
    use crate::core::StreamState;
    use tempfile::TempDir;

    fn add_shutter(engine: &mut PolicyEngine) {
        let chunk = parse(&wav_bytes(44100, 2, 4410)).unwrap();
        engine.core.add_sample("shutter", chunk);
    }

    #[test]
    fn test_play_sample_then_drain() {
        let (mut engine, _probe) = engine();
        add_shutter(&mut engine);

        let idx = engine
            .play_sample("shutter", VolumeType::System, GainType::Touch, 15)
            .unwrap();
        let input = engine.core().sink_input(idx).unwrap();
        assert!((input.volume - 0.5).abs() < 1e-9);
        assert_eq!(input.state, StreamState::Running);
        assert_eq!(input.proplist.gets(props::MEDIA_POLICY), Some("auto"));

        engine.run_due_timers(Instant::now() + Duration::from_millis(200));
        assert!(engine.core().sink_input(idx).is_none());
    }

    #[test]
    fn test_play_missing_sample() {
        let (mut engine, _probe) = engine();
        assert_eq!(
            engine.play_sample("nope", VolumeType::System, GainType::Default, 3),
            Err(AudioError::Undefined)
        );
        assert_eq!(
            engine.play_sample("nope", VolumeType::System, GainType::Default, 99),
            Err(AudioError::Parameter)
        );
    }

    #[test]
    fn test_booting_sample_is_temporary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("poweron.wav");
        std::fs::write(&path, wav_bytes(22050, 1, 2205)).unwrap();

        let (mut engine, _probe) = engine();
        engine.samples = SamplesConfig {
            booting_sound_path: path,
            directory: None,
        };
        let idx = engine
            .play_sample(names::BOOTING_SAMPLE, VolumeType::Fixed, GainType::Booting, 5)
            .unwrap();
        let input = engine.core().sink_input(idx).unwrap();
        assert_eq!(input.proplist.gets(props::MEDIA_POLICY), Some("phone"));
        assert!(!engine.core().has_sample(names::BOOTING_SAMPLE));
    }

    #[test]
    fn test_play_file_caches_sample() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tap.wav");
        std::fs::write(&path, wav_bytes(44100, 2, 441)).unwrap();

        let (mut engine, _probe) = engine();
        let idx = engine
            .play_file(&path, VolumeType::Fixed, GainType::Touch)
            .unwrap();
        let input = engine.core().sink_input(idx).unwrap();
        assert_eq!(input.proplist.gets(props::MEDIA_POLICY), Some("auto"));
        let name = format!("{}{}", FILE_SAMPLE_PREFIX, path.display());
        assert!(engine.core().has_sample(&name));

        assert!(engine
            .play_file(&path, VolumeType::Fixed, GainType::Touch)
            .is_ok());
        assert_eq!(
            engine.play_file(
                &dir.path().join("missing.wav"),
                VolumeType::System,
                GainType::Touch
            ),
            Err(AudioError::Undefined)
        );
    }

    #[test]
    fn test_register_sample_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shutter.wav"), wav_bytes(44100, 2, 441)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not audio").unwrap();

        let (mut engine, _probe) = engine();
        assert_eq!(engine.register_sample_dir(dir.path()).unwrap(), 1);
        assert!(engine.core().has_sample("shutter"));
        assert!(!engine.core().has_sample("notes"));
        assert!(engine
            .play_sample("shutter", VolumeType::System, GainType::Shutter1, 3)
            .is_ok());
    }

    #[test]
    fn test_burst_shot_boosts_then_stops() {
        let (mut engine, _probe) = engine();
        add_shutter(&mut engine);
        let mut rx = engine.events().subscribe();

        let idx = engine
            .play_sample_continuously(
                "shutter",
                VolumeType::System,
                GainType::Shutter1,
                7,
                Duration::from_millis(90),
            )
            .unwrap();
        assert!(engine.burst_shot_running());
        assert_eq!(
            engine.core().sink_input(idx).unwrap().state,
            StreamState::Init
        );
        assert_eq!(
            engine.play_sample_continuously(
                "shutter",
                VolumeType::System,
                GainType::Shutter1,
                7,
                Duration::ZERO
            ),
            Err(AudioError::Resource)
        );

        let start = Instant::now();
        engine.run_due_timers(start);
        assert_eq!(
            engine.core().sink_input(idx).unwrap().state,
            StreamState::Running
        );
        assert_eq!(
            engine.next_deadline(),
            Some(start + Duration::from_millis(30))
        );

        let mut now = start;
        for _ in 0..3 {
            now = engine.next_deadline().unwrap();
            engine.run_due_timers(now);
        }
        let queue = engine.core().sink_input(idx).unwrap().refill.clone().unwrap();
        assert_eq!(queue.chunk_count(), 4);
        assert_eq!(engine.next_deadline(), Some(now + Duration::from_millis(90)));

        engine.stop_sample_continuously();
        engine.run_due_timers(engine.next_deadline().unwrap());
        assert!(!engine.burst_shot_running());
        assert!(engine.core().sink_input(idx).is_none());
        assert!(engine.next_deadline().is_none());
        assert!(std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| e == PolicyEvent::BurstShotChanged { active: false }));
    }

    #[test]
    fn test_burst_cleans_up_vanished_stream() {
        let (mut engine, _probe) = engine();
        add_shutter(&mut engine);
        let idx = engine
            .play_sample_continuously(
                "shutter",
                VolumeType::System,
                GainType::Shutter2,
                7,
                Duration::ZERO,
            )
            .unwrap();
        engine.run_due_timers(Instant::now());
        engine.unlink_sink_input(idx);

        engine.run_due_timers(Instant::now() + Duration::from_secs(1));
        assert!(!engine.burst_shot_running());
        assert!(engine.next_deadline().is_none());
    }

    #[test]
    fn test_burst_restart_before_teardown() {
        let (mut engine, _probe) = engine();
        add_shutter(&mut engine);
        let start = |engine: &mut PolicyEngine| {
            engine
                .play_sample_continuously(
                    "shutter",
                    VolumeType::System,
                    GainType::Shutter1,
                    7,
                    Duration::ZERO,
                )
                .unwrap()
        };

        let first = start(&mut engine);
        let now = Instant::now();
        engine.run_due_timers(now);
        engine.run_due_timers(engine.next_deadline().unwrap());
        engine.stop_sample_continuously();

        let second = start(&mut engine);
        assert_ne!(first, second);
        assert!(engine.core().sink_input(first).is_none());
        assert!(engine.burst_shot_running());

        engine.stop_sample_continuously();
        while let Some(deadline) = engine.next_deadline() {
            engine.run_due_timers(deadline);
        }
        assert!(engine.core().sink_input(second).is_none());
        assert!(!engine.burst_shot_running());
    }
}
