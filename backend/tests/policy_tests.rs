//! End-to-end checks of the policy engine on the software HAL.

use audio_policy::config::{HalConfig, PolicyConfig, SamplesConfig};
use audio_policy::core::{Proplist, SampleSpec, SinkInputNewData};
use audio_policy::events::EventBroadcaster;
use audio_policy::hal::soft::{HalCall, SoftHal, SoftHalProbe};
use audio_policy::hal::AudioHal;
use audio_policy::PolicyEngine;
use audio_policy_types::names::{self, props};
use audio_policy_types::{
    AudioDeviceInfo, AudioInfo, BtBandwidth, DeviceIn, DeviceOut, Direction, GainType,
    PolicyEvent, RouteFlags, Session, Subsession, VolumeType,
};
use std::time::Duration;

fn engine() -> (PolicyEngine, SoftHalProbe) {
    let hal = SoftHal::new(&HalConfig::default());
    let probe = hal.probe();
    let mut engine = PolicyEngine::new(
        Box::new(hal),
        PolicyConfig::default(),
        SamplesConfig::default(),
        EventBroadcaster::default(),
    );
    engine.create_null_devices().unwrap();
    for direction in [Direction::Out, Direction::In] {
        engine
            .open_device(
                &AudioDeviceInfo::alsa(direction, 0, 0)
                    .with_name("hw:0,0")
                    .as_default(),
                &[],
            )
            .unwrap();
    }
    probe.clear_calls();
    (engine, probe)
}

fn play(engine: &mut PolicyEngine, policy: &str, volume_type: VolumeType) -> u32 {
    let mut proplist = Proplist::new();
    proplist.sets(props::MEDIA_NAME, "test");
    proplist.sets(props::MEDIA_POLICY, policy);
    proplist.sets(props::MEDIA_VOLUME_TYPE, volume_type.as_u32().to_string());
    proplist.sets(props::MEDIA_GAIN_TYPE, GainType::Default.as_u32().to_string());
    engine
        .create_sink_input(SinkInputNewData::new(proplist, SampleSpec::new(44100, 2)))
        .unwrap()
}

#[test]
fn test_auto_stream_lands_on_primary_sink() {
    let (mut engine, _probe) = engine();
    engine
        .set_volume_level(None, Some(VolumeType::Media), 9)
        .unwrap();

    let idx = play(&mut engine, "auto", VolumeType::Media);
    let input = engine.core().sink_input(idx).unwrap();
    assert_eq!(input.sink, engine.core().sink_index(names::SINK_ALSA));

    let reference = SoftHal::new(&HalConfig::default());
    let expected = reference
        .get_volume_value(
            &AudioInfo::with_gain(VolumeType::Media, GainType::Default),
            VolumeType::Media,
            9,
        )
        .unwrap();
    assert!((input.volume - expected).abs() < 1e-9);
}

#[test]
fn test_call_session_resets_call_mute() {
    let (mut engine, probe) = engine();
    engine.set_active_device(DeviceIn::Mic, DeviceOut::Speaker).unwrap();
    engine.set_bt_bandwidth(BtBandwidth::Wb);
    engine.set_bt_nrec(1);

    engine.set_session(Session::Voicecall, true).unwrap();
    assert_eq!(engine.route().session, Session::Voicecall);
    assert_eq!(engine.route().subsession, Subsession::Media);
    assert_ne!(engine.route().subsession, Subsession::None);
    assert!(!engine.call_muted());

    probe.clear_calls();
    engine
        .set_active_device(DeviceIn::BtSco, DeviceOut::BtSco)
        .unwrap();
    let flags = probe
        .route_calls()
        .into_iter()
        .find_map(|call| match call {
            HalCall::SetRoute { flags, .. } => Some(flags),
            _ => None,
        })
        .unwrap();
    assert!(flags.contains(RouteFlags::BT_WB));
    assert!(flags.contains(RouteFlags::BT_NREC));
}

#[test]
fn test_duplicate_active_device_is_ignored() {
    let (mut engine, probe) = engine();
    assert_eq!(
        engine.set_active_device(DeviceIn::Mic, DeviceOut::Receiver),
        Ok(true)
    );
    let routes = probe.route_calls().len();
    assert_eq!(
        engine.set_active_device(DeviceIn::Mic, DeviceOut::Receiver),
        Ok(false)
    );
    assert_eq!(probe.route_calls().len(), routes);
}

#[test]
fn test_bt_loss_keeps_alarm_audible() {
    let (mut engine, _probe) = engine();
    engine
        .load_device(&AudioDeviceInfo::bluez(Direction::Out, "a2dp", 0), &[])
        .unwrap();
    let bt = engine.core().sinks().find(|s| s.is_bluez()).unwrap().index;

    let alarm = play(&mut engine, "all", VolumeType::Alarm);
    let ring = play(&mut engine, "all", VolumeType::Notification);
    let combined = engine.core().sink_index(names::SINK_COMBINED);
    assert!(combined.is_some());
    assert_eq!(engine.core().sink_input(alarm).unwrap().sink, combined);
    assert_eq!(engine.core().sink_input(ring).unwrap().sink, combined);

    let module = engine.core().sink(bt).unwrap().module.unwrap();
    engine.unload_module(module).unwrap();

    let alsa = engine.core().sink_index(names::SINK_ALSA);
    assert_eq!(engine.core().sink_input(alarm).unwrap().sink, alsa);
    assert_eq!(
        engine.core().sink_input(ring).unwrap().sink,
        engine.core().null_sink_index()
    );
    assert!(engine.core().sink_index(names::SINK_COMBINED).is_none());
}

#[test]
fn test_same_device_loads_once() {
    let (mut engine, _probe) = engine();
    let device = AudioDeviceInfo::alsa(Direction::Out, 1, 2).with_name("hw:1,2");
    let modules = engine.core().modules().count();

    engine.load_device(&device, &[]).unwrap();
    assert_eq!(engine.core().modules().count(), modules + 1);
    engine.load_device(&device, &[]).unwrap();
    assert_eq!(engine.core().modules().count(), modules + 1);
}

#[test]
fn test_worker_requests_apply_in_order() {
    let (mut engine, probe) = engine();
    let queue = engine.device_queue();
    let callbacks = probe.callbacks().unwrap();
    let mut rx = engine.events().subscribe();

    let mut workers = Vec::new();
    for card in 1..=3u32 {
        let callbacks = callbacks.clone();
        let device = AudioDeviceInfo::alsa(Direction::Out, card, card)
            .with_name(format!("hw:{},{}", card, card));
        workers.push(std::thread::spawn(move || callbacks.load_device(device, Vec::new())));

        // One request in flight per worker keeps the enqueue order fixed
        while queue.len() < card as usize {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    assert!(workers.iter().all(|w| !w.is_finished()));

    assert_eq!(engine.drain_device_events(), 3);
    for worker in workers {
        assert!(worker.join().unwrap().is_ok());
    }

    let loaded: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|event| match event {
            PolicyEvent::DeviceLoaded { name } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(
        loaded,
        vec![
            "alsa_output.1.analog-stereo",
            "alsa_output.2.analog-stereo",
            "alsa_output.3.analog-stereo",
        ]
    );
    for name in &loaded {
        assert!(engine.core().sink_index(name).is_some());
    }
}

#[test]
fn test_worker_sees_its_own_effect() {
    let (mut engine, probe) = engine();
    let queue = engine.device_queue();
    let callbacks = probe.callbacks().unwrap();
    let device = AudioDeviceInfo::alsa(Direction::Out, 4, 1).with_name("hw:4,1");

    let worker = std::thread::spawn(move || callbacks.load_device(device, Vec::new()));
    while queue.is_empty() {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(engine.core().sink_index("alsa_output.1.analog-stereo").is_none());

    engine.drain_device_events();
    assert!(worker.join().unwrap().is_ok());
    assert!(engine.core().sink_index("alsa_output.1.analog-stereo").is_some());
    assert!(!queue.is_armed());
}

#[test]
fn test_worker_returns_after_its_load_applied() {
    let (mut engine, probe) = engine();
    let callbacks = probe.callbacks().unwrap();
    let device = AudioDeviceInfo::alsa(Direction::Out, 5, 6).with_name("hw:5,6");

    let worker = std::thread::spawn(move || callbacks.load_device(device, Vec::new()));
    while !worker.is_finished() {
        engine.drain_device_events();
        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(worker.join().unwrap().is_ok());
    assert!(engine.core().sink_index("alsa_output.6.analog-stereo").is_some());
}
