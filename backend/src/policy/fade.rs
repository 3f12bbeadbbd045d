//! Volume fades.
//!
//! A fade walks a stream's linear volume through a five point ramp, one
//! point per timer tick. The first tick fires immediately; after the last
//! point one more tick releases the session.

use super::timer::TimerKind;
use super::PolicyEngine;
use crate::error::{bound, AudioError, AudioResult, HalStatus};
use audio_policy_types::{FadeDirection, VolumeType};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub const FADING_COUNT: usize = 5;

/// Ramp of `FADING_COUNT` evenly spaced points from `src` to `dst`.
pub fn fade_ramp(src: f64, dst: f64) -> [f64; FADING_COUNT] {
    let step = (dst - src) / (FADING_COUNT - 1) as f64;
    let mut ramp = [src; FADING_COUNT];
    for i in 1..FADING_COUNT - 1 {
        ramp[i] = ramp[i - 1] + step;
    }
    ramp[FADING_COUNT - 1] = dst;
    ramp
}

#[derive(Debug, Clone, PartialEq)]
pub struct FadeSession {
    pub stream: u32,
    pub volume_type: VolumeType,
    pub direction: FadeDirection,
    pub interval: Duration,
    /// Points left to apply
    pub count: usize,
    pub ramp: [f64; FADING_COUNT],
}

impl PolicyEngine {
    /// Start fading stream `idx` down to silence or back up to its level
    /// over `duration_ms`. Any refusal is reported as `Undefined`.
    pub fn volume_fade(
        &mut self,
        idx: u32,
        direction: FadeDirection,
        duration_ms: u32,
    ) -> AudioResult {
        self.start_fade(idx, direction, duration_ms)
            .map_err(|_| AudioError::Undefined)
    }

    fn start_fade(&mut self, idx: u32, direction: FadeDirection, duration_ms: u32) -> AudioResult {
        if self.core.muteall {
            info!("muteall state. skip fading");
            return Err(AudioError::Undefined);
        }
        let Some(input) = self.core.sink_input(idx) else {
            error!("not found sink input. stream_idx({})", idx);
            return Err(AudioError::Undefined);
        };
        if input
            .sink
            .and_then(|s| self.core.sink(s))
            .is_some_and(|s| s.is_high_latency())
        {
            info!("stream uses high-latency sink. skip fading");
            return Err(AudioError::Undefined);
        }
        let faded_down = self.stream_marks(idx).faded_down;
        if faded_down && direction == FadeDirection::Down {
            error!("already adjust fadedown");
            return Err(AudioError::Undefined);
        }

        let (volume_type, level) = self.get_volume_level(Some(idx), None).inspect_err(|_| {
            error!("not found sink input volume_type. stream_idx({})", idx);
        })?;
        let info = self.playback_info(idx)?;

        let (src, dst) = match direction {
            FadeDirection::Down => {
                let src = bound(self.hal.get_volume_value(&info, volume_type, level))?
                    .unwrap_or(1.0);
                let dst = bound(self.hal.get_volume_value(&info, volume_type, 0))?.unwrap_or(1.0);
                self.marks_mut(idx).faded_down = true;
                (src, dst)
            }
            FadeDirection::Up => {
                let src = self.core.sink_input(idx).map(|i| i.volume).unwrap_or(0.0);
                let dst = bound(self.hal.get_volume_value(&info, volume_type, level))?
                    .unwrap_or(1.0);
                self.marks_mut(idx).faded_down = false;
                (src, dst)
            }
        };

        let session = FadeSession {
            stream: idx,
            volume_type,
            direction,
            interval: Duration::from_millis(u64::from(duration_ms) / FADING_COUNT as u64),
            count: FADING_COUNT,
            ramp: fade_ramp(src, dst),
        };
        info!(
            "fading stream_idx({}) {} duration({}) interval({:?}) ramp {:?}",
            idx, direction, duration_ms, session.interval, session.ramp
        );

        self.timers.cancel(TimerKind::Fade(idx));
        self.fades.insert(idx, session);
        self.timers.schedule(Instant::now(), TimerKind::Fade(idx));
        Ok(HalStatus::Ok)
    }

    /// Apply the next ramp point of the fade on stream `idx`.
    pub(crate) fn fade_tick(&mut self, idx: u32, now: Instant) {
        let Some(session) = self.fades.get_mut(&idx) else {
            return;
        };
        if session.count == 0 {
            self.fades.remove(&idx);
            return;
        }

        let value = session.ramp[FADING_COUNT - session.count];
        let volume_type = session.volume_type;
        let interval = session.interval;
        session.count -= 1;

        if self.core.sink_input(idx).is_none() {
            warn!("fading stream {} is gone", idx);
            self.fades.remove(&idx);
            return;
        }
        if let Err(e) = self.update_volume_by_value(Some(idx), volume_type, value) {
            warn!("fade step on stream {} failed: {}", idx, e);
        }
        self.timers.schedule_in(now, interval, TimerKind::Fade(idx));
    }

    pub fn is_fading(&self, idx: u32) -> bool {
        self.fades.contains_key(&idx)
    }
}
