//! Sink and source selection by policy tag.

use super::PolicyEngine;
use audio_policy_types::names::{self, props};
use audio_policy_types::{StreamPolicy, Subsession};
use tracing::{debug, error, info, warn};

/// Sample rate from which a stream counts as ultra-high-quality audio.
pub const UHQA_BASE_SAMPLING_RATE: u32 = 96000;
const UHQA_SAMPLING_RATE: u32 = 192000;
const UHQA_START_THRESHOLD: i32 = 4096;

impl PolicyEngine {
    fn sink_by_name(&self, name: &str) -> Option<u32> {
        self.core.sink_index(name)
    }

    fn bt_sink(&self) -> Option<u32> {
        self.core.sinks().find(|s| s.is_bluez()).map(|s| s.index)
    }

    fn default_is_hdmi(&self) -> bool {
        self.core.default_sink().is_some_and(|s| s.is_hdmi())
    }

    /// Another `high-latency` stream than `except` already plays on the
    /// high-latency sink.
    pub(crate) fn high_latency_busy(&self, except: Option<u32>) -> bool {
        self.core.sink_inputs().any(|input| {
            Some(input.index) != except
                && input.proplist.gets(props::MEDIA_POLICY) == Some(StreamPolicy::HighLatency.as_str())
                && input
                    .sink
                    .and_then(|s| self.core.sink(s))
                    .is_some_and(|s| s.is_high_latency())
        })
    }

    /// Move every non-filter input of `from` onto `to`.
    fn move_all_inputs(&mut self, from: u32, to: u32) {
        for idx in self.core.inputs_of_sink(from) {
            if self
                .core
                .sink_input(idx)
                .is_some_and(|i| i.proplist.is_filter())
            {
                continue;
            }
            self.move_sink_input(idx, to);
        }
    }

    fn suspend_sink_if_running(&mut self, idx: u32) {
        if !self.sink_is_suspended(idx) {
            self.suspend_sink(idx, true);
        }
    }

    fn resume_sink_if_suspended(&mut self, idx: u32) {
        if self.sink_is_suspended(idx) && !self.suspend_sink(idx, false) {
            warn!("Sink[{}] stays suspended", idx);
        }
    }

    /// Hand the hardware from the normal sink to its UHQA twin, if the twin
    /// exists. The normal sink is suspended first so the PCM is never held
    /// twice.
    pub(crate) fn switch_to_uhqa_sink(&mut self, policy: &StreamPolicy) -> Option<u32> {
        let (uhqa, normal) = if self.default_is_hdmi() {
            (names::SINK_HDMI_UHQA, names::SINK_HDMI)
        } else if *policy == StreamPolicy::HighLatencyUhqa {
            (names::SINK_HIGH_LATENCY_UHQA, names::SINK_HIGH_LATENCY)
        } else if *policy == StreamPolicy::AutoUhqa {
            (names::SINK_ALSA_UHQA, names::SINK_ALSA)
        } else {
            return None;
        };

        let normal = self.sink_by_name(normal);
        let Some(uhqa) = self.sink_by_name(uhqa) else {
            return normal;
        };

        if let Some(normal) = normal {
            self.suspend_sink_if_running(normal);
            self.move_all_inputs(normal, uhqa);
        }
        self.resume_sink_if_suspended(uhqa);
        Some(uhqa)
    }

    /// Give the hardware back to the normal sink unless its UHQA twin is
    /// still in use.
    pub(crate) fn switch_to_normal_sink(&mut self, policy: &StreamPolicy) -> Option<u32> {
        let (uhqa, normal_name) = match policy {
            StreamPolicy::Phone | StreamPolicy::All => (names::SINK_ALSA_UHQA, names::SINK_ALSA),
            _ if self.default_is_hdmi() => (names::SINK_HDMI_UHQA, names::SINK_HDMI),
            StreamPolicy::HighLatency => (names::SINK_HIGH_LATENCY_UHQA, names::SINK_HIGH_LATENCY),
            _ => (names::SINK_ALSA_UHQA, names::SINK_ALSA),
        };
        let uhqa = self.sink_by_name(uhqa);

        if let Some(uhqa) = uhqa {
            if self.core.sink_used_by(uhqa) > 0 {
                return Some(uhqa);
            }
        }

        let Some(normal) = self.sink_by_name(normal_name) else {
            warn!("The {} sink is null", normal_name);
            return uhqa;
        };

        if let Some(uhqa) = uhqa {
            self.suspend_sink_if_running(uhqa);
            self.move_all_inputs(uhqa, normal);
        }
        self.resume_sink_if_suspended(normal);
        Some(normal)
    }

    /// Sink a stream with `policy` should play on.
    ///
    /// `candidate` is the stream being re-routed, excluded when looking for
    /// a busy high-latency sink. Bluetooth sinks are considered only with
    /// `check_bt`.
    pub(crate) fn select_sink(
        &mut self,
        policy: &StreamPolicy,
        candidate: Option<u32>,
        check_bt: bool,
    ) -> Option<u32> {
        let bt_sink = if check_bt { self.bt_sink() } else { None };

        let Some(def) = self.core.default_sink_index() else {
            warn!("No default sink");
            return None;
        };
        if Some(def) == self.core.null_sink_index() {
            return Some(def);
        }
        let uhqa = self.config.uhqa;

        let sink = match policy {
            StreamPolicy::All => match bt_sink {
                Some(bt) => {
                    if self.module_combined.is_none() {
                        info!("combined sink is not prepared, now load-modules...");
                        let bt_name = self
                            .core
                            .sink(bt)
                            .map(|s| s.name.clone())
                            .unwrap_or_default();
                        let args = format!(
                            "sink_name={} slaves=\"{},{}\"",
                            names::SINK_COMBINED,
                            bt_name,
                            names::SINK_ALSA
                        );
                        match self.load_module(names::MODULE_COMBINE, &args) {
                            Ok(module) => self.module_combined = Some(module),
                            Err(e) => error!("Failed to load combined sink: {}", e),
                        }
                    }
                    self.sink_by_name(names::SINK_COMBINED)
                }
                None if uhqa => self.switch_to_normal_sink(policy),
                None => self.sink_by_name(names::SINK_ALSA),
            },
            StreamPolicy::Phone => {
                let aec = if self.route.subsession == Subsession::Ringtone {
                    self.sink_by_name(names::AEC_SINK)
                } else {
                    None
                };
                match aec {
                    Some(aec) => Some(aec),
                    None if uhqa => self.switch_to_normal_sink(policy),
                    None => self.sink_by_name(names::SINK_ALSA),
                }
            }
            StreamPolicy::Voip => self
                .sink_by_name(names::SINK_VOIP)
                .or_else(|| {
                    info!("VOIP sink is not available, try to use AEC sink");
                    self.sink_by_name(names::AEC_SINK)
                })
                .or_else(|| {
                    info!("AEC sink is not available, set to default sink");
                    Some(def)
                }),
            _ => self.select_auto_sink(policy, candidate, check_bt, def),
        };

        debug!(
            "policy[{}] current default[{}] bt_sink[{:?}] selected_sink[{:?}]",
            policy, def, bt_sink, sink
        );
        sink
    }

    fn select_auto_sink(
        &mut self,
        policy: &StreamPolicy,
        candidate: Option<u32>,
        check_bt: bool,
        def: u32,
    ) -> Option<u32> {
        let uhqa = self.config.uhqa;
        let Some(default) = self.core.sink(def) else {
            return None;
        };

        if check_bt && default.is_bluez() {
            return Some(def);
        }
        if default.is_usb_alsa() {
            return Some(def);
        }
        if default.is_hdmi() {
            if !uhqa {
                return Some(def);
            }
            return if policy.is_uhqa() {
                self.switch_to_uhqa_sink(policy)
            } else {
                self.switch_to_normal_sink(policy)
            };
        }

        let mut sink = None;
        if matches!(
            policy,
            StreamPolicy::HighLatency | StreamPolicy::HighLatencyUhqa
        ) && (uhqa || *policy == StreamPolicy::HighLatency)
        {
            let busy = self.high_latency_busy(candidate);
            if uhqa {
                if *policy == StreamPolicy::HighLatencyUhqa {
                    sink = self.switch_to_uhqa_sink(policy);
                }
                if !busy && sink.is_none() {
                    sink = self.switch_to_normal_sink(policy);
                }
            } else if !busy {
                sink = self.sink_by_name(names::SINK_HIGH_LATENCY);
            }
        }

        if sink.is_none() {
            if uhqa {
                if *policy == StreamPolicy::AutoUhqa {
                    sink = self.switch_to_uhqa_sink(policy);
                }
                if sink.is_none() {
                    sink = self.switch_to_normal_sink(&StreamPolicy::Auto);
                }
            } else {
                sink = self.sink_by_name(names::SINK_ALSA);
            }
        }
        sink
    }

    /// Create the UHQA twin of the sink `policy` routes to, suspending the
    /// normal sink first. Does nothing when the twin already exists.
    pub(crate) fn create_uhqa_sink(&mut self, policy: &StreamPolicy) {
        info!("Creating UHQA sink policy ={}", policy);
        let (uhqa_name, normal_name, device, start_threshold) = match policy {
            StreamPolicy::HighLatency => (
                names::SINK_HIGH_LATENCY_UHQA,
                names::SINK_HIGH_LATENCY,
                "hw:0,4",
                UHQA_START_THRESHOLD,
            ),
            StreamPolicy::Auto => (names::SINK_ALSA_UHQA, names::SINK_ALSA, "hw:0,0", -1),
            _ => return,
        };

        if self.sink_by_name(uhqa_name).is_some() {
            info!("UHQA sink already created, policy ={}", policy);
            return;
        }

        if let Some(normal) = self.sink_by_name(normal_name) {
            self.suspend_sink(normal, true);
        }

        let args = format!(
            "sink_name=\"{}\" device=\"{}\" rate={} channels=2 \
             sink_properties=\"module-suspend-on-idle.timeout=0\" format=s24-32le \
             start_threshold={} alternate_rate={}",
            uhqa_name, device, UHQA_SAMPLING_RATE, start_threshold, UHQA_SAMPLING_RATE
        );
        match self.load_module(names::MODULE_ALSA_SINK, &args) {
            Ok(_) => info!("module loaded for {}", args),
            Err(e) => error!("Failed to Load module-alsa-sink: {}: {}", uhqa_name, e),
        }
    }

    /// Source a capture stream with `policy` should record from.
    pub(crate) fn select_source(&self, policy: &StreamPolicy) -> Option<u32> {
        let Some(def) = self.core.default_source_index() else {
            warn!("No default source");
            return None;
        };
        if Some(def) == self.core.null_source_index() {
            return Some(def);
        }

        let by_name = |name: &str| self.core.source_index(name);
        let source = match policy {
            StreamPolicy::Voip => by_name(names::SOURCE_VOIP)
                .or_else(|| {
                    info!("VOIP source is not available, try to use AEC source");
                    by_name(names::AEC_SOURCE)
                })
                .unwrap_or(def),
            StreamPolicy::Mirroring => by_name(names::SOURCE_MIRRORING)
                .or_else(|| {
                    info!("MIRRORING source is not available, try to use ALSA MONITOR SOURCE");
                    by_name(names::ALSA_MONITOR_SOURCE)
                })
                .unwrap_or(def),
            StreamPolicy::Loopback => by_name(names::ALSA_MONITOR_SOURCE).unwrap_or(def),
            _ => {
                let aec = if self.route.subsession == Subsession::Ringtone {
                    by_name(names::AEC_SOURCE)
                } else {
                    None
                };
                aec.unwrap_or(def)
            }
        };

        debug!("selected source : [{}]", source);
        Some(source)
    }
}
