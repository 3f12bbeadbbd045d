//! Daemon wiring.
//!
//! The policy engine lives on its own thread with a current-thread runtime.
//! Socket clients and the keytone reader run on the caller's runtime and
//! reach the engine through channels, so every engine call happens on the
//! thread that built it.

use crate::config::Config;
use crate::events::EventBroadcaster;
use crate::hal;
use crate::keytone::{self, KeytoneOutcome, KeytonePlayer, KeytoneRequest};
use crate::policy::PolicyEngine;
use crate::protocol::{handle_frame, CommandRequest, CommandServer};
use anyhow::{anyhow, Context};
use audio_policy_types::{AudioDeviceInfo, Direction};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

const COMMAND_QUEUE: usize = 64;
const KEYTONE_QUEUE: usize = 16;
/// Wake-up used when no timer is pending
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Running daemon. Dropping it without [`Daemon::shutdown`] leaves the
/// engine thread running until the process exits.
pub struct Daemon {
    shutdown: watch::Sender<bool>,
    engine_thread: Option<JoinHandle<()>>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    events: EventBroadcaster,
}

impl Daemon {
    /// Start the engine thread, the command server and the keytone reader.
    ///
    /// Returns once the engine has opened its devices, or with the error
    /// that stopped it.
    pub async fn start(config: Config, events: EventBroadcaster) -> anyhow::Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (keytone_tx, keytone_rx) = mpsc::channel(KEYTONE_QUEUE);

        let server = CommandServer::bind(&config.server.socket_path).with_context(|| {
            format!(
                "Failed to bind command socket {}",
                config.server.socket_path.display()
            )
        })?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let engine_thread = {
            let config = config.clone();
            let events = events.clone();
            let shutdown = shutdown_rx.clone();
            std::thread::Builder::new()
                .name("policy-main".to_string())
                .spawn(move || {
                    engine_thread(config, events, command_rx, keytone_rx, shutdown, ready_tx)
                })
                .context("Failed to spawn engine thread")?
        };
        ready_rx
            .await
            .map_err(|_| anyhow!("Engine thread exited during start-up"))??;

        let mut tasks = vec![
            tokio::spawn(server.run(command_tx, shutdown_rx.clone())),
            tokio::spawn(trace_events(events.clone(), shutdown_rx.clone())),
        ];

        if config.keytone.enabled {
            match keytone::open_pipe(&config.keytone) {
                Ok(receiver) => tasks.push(tokio::spawn(keytone::read_records(
                    receiver,
                    keytone_tx,
                    shutdown_rx,
                ))),
                Err(e) => warn!("Keytone pipe disabled: {}", e),
            }
        } else {
            info!("Keytone pipe disabled by configuration");
        }

        Ok(Self {
            shutdown: shutdown_tx,
            engine_thread: Some(engine_thread),
            tasks,
            events,
        })
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Stop accepting work, shut the engine down and wait for it.
    pub async fn shutdown(mut self) {
        info!("Shutting down audio policy daemon");
        let _ = self.shutdown.send(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Daemon task failed: {}", e);
            }
        }
        if let Some(thread) = self.engine_thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                error!("Engine thread panicked");
            }
        }
    }
}

/// Log every published event as one JSON line at debug level.
async fn trace_events(events: EventBroadcaster, mut shutdown: watch::Receiver<bool>) {
    let stream = events.subscribe_json();
    tokio::pin!(stream);
    loop {
        tokio::select! {
            line = stream.next() => match line {
                Some(line) => debug!(event = %line, "policy event"),
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Build the engine and bring up its devices. Runs on the engine thread.
pub fn build_engine(config: &Config, events: EventBroadcaster) -> anyhow::Result<PolicyEngine> {
    let backend = hal::load(&config.hal.backend, &config.hal).ok_or_else(|| {
        anyhow!(
            "Unknown HAL backend '{}' (available: {})",
            config.hal.backend,
            hal::available_backends().collect::<Vec<_>>().join(", ")
        )
    })?;

    let mut engine = PolicyEngine::new(
        backend,
        config.policy.clone(),
        config.samples.clone(),
        events,
    );
    engine
        .create_null_devices()
        .context("Failed to create null devices")?;

    for direction in [Direction::Out, Direction::In] {
        let device = AudioDeviceInfo::alsa(direction, 0, 0)
            .with_name("hw:0,0")
            .as_default();
        if let Err(e) = engine.open_device(&device, &[]) {
            warn!("Primary {} device not opened: {}", direction, e);
        }
    }

    if let Some(dir) = &config.samples.directory {
        match engine.register_sample_dir(dir) {
            Ok(count) => info!("Registered {} samples from {}", count, dir.display()),
            Err(e) => warn!("Cannot read sample directory {}: {}", dir.display(), e),
        }
    }
    Ok(engine)
}

fn engine_thread(
    config: Config,
    events: EventBroadcaster,
    commands: mpsc::Receiver<CommandRequest>,
    keytones: mpsc::Receiver<KeytoneRequest>,
    shutdown: watch::Receiver<bool>,
    ready: oneshot::Sender<anyhow::Result<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(anyhow!("Failed to build engine runtime: {}", e)));
            return;
        }
    };

    let engine = match build_engine(&config, events) {
        Ok(engine) => engine,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    runtime.block_on(run_engine(engine, commands, keytones, shutdown));
}

/// Main loop of the engine thread.
pub async fn run_engine(
    mut engine: PolicyEngine,
    mut commands: mpsc::Receiver<CommandRequest>,
    mut keytones: mpsc::Receiver<KeytoneRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let queue = engine.device_queue();
    let mut player = KeytonePlayer::new(Instant::now());
    info!("Policy engine running");

    loop {
        if queue.is_armed() {
            engine.drain_device_events();
        }
        let deadline = engine.next_deadline();
        let wake = deadline.unwrap_or_else(|| Instant::now() + IDLE_WAIT);

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = queue.armed() => {
                let handled = engine.drain_device_events();
                debug!("Drained {} device events", handled);
            }
            Some(request) = commands.recv() => {
                let reply = handle_frame(&mut engine, request.frame);
                if request.reply.send(reply).is_err() {
                    debug!("Command client left before the reply");
                }
            }
            Some(KeytoneRequest { record, received_at }) = keytones.recv() => {
                match player.handle(&mut engine, &record, received_at) {
                    Ok(KeytoneOutcome::Played(idx)) => debug!("Keytone on stream {}", idx),
                    Ok(outcome) => debug!("Keytone {} skipped: {:?}", record.filename, outcome),
                    Err(e) => error!("Keytone {} failed: {}", record.filename, e),
                }
            }
            _ = tokio::time::sleep_until(wake.into()), if deadline.is_some() => {
                engine.run_due_timers(Instant::now());
            }
        }
    }

    engine.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HalConfig, KeytoneConfig, ServerConfig};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, backend: &str) -> Config {
        Config {
            hal: HalConfig {
                backend: backend.to_string(),
                ..HalConfig::default()
            },
            server: ServerConfig {
                socket_path: dir.path().join("policy.sock"),
            },
            keytone: KeytoneConfig {
                enabled: false,
                ..KeytoneConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_build_engine_opens_primary_devices() {
        let dir = TempDir::new().unwrap();
        let engine = build_engine(&test_config(&dir, "soft"), EventBroadcaster::default()).unwrap();
        let core = engine.core();
        assert!(core.null_sink_index().is_some());
        assert!(core.null_source_index().is_some());
        assert_ne!(core.default_sink_index(), core.null_sink_index());
    }

    #[test]
    fn test_build_engine_on_null_backend() {
        let dir = TempDir::new().unwrap();
        let engine = build_engine(&test_config(&dir, "null"), EventBroadcaster::default()).unwrap();
        assert!(engine.core().null_sink_index().is_some());
    }

    #[test]
    fn test_unknown_backend_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = build_engine(&test_config(&dir, "dsp"), EventBroadcaster::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("soft, null"));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, "soft");
        let socket = config.server.socket_path.clone();

        let daemon = Daemon::start(config, EventBroadcaster::default())
            .await
            .unwrap();
        assert!(socket.exists());
        daemon.shutdown().await;
        assert!(!socket.exists());
    }
}
