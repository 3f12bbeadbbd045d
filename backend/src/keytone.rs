//! Keytone pipe.
//!
//! Clients write fixed-size records to a FIFO: a NUL-padded file name
//! followed by a packed [`VolumeConfig`] in host byte order. Every record
//! plays the file once through the default sink.

use crate::config::KeytoneConfig;
use crate::core::DeviceState;
use crate::error::AudioError;
use crate::policy::PolicyEngine;
use audio_policy_types::{GainType, PolicyEvent, VolumeConfig};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Bytes reserved for the file name.
pub const FILENAME_LEN: usize = 1024;
/// Bytes in one record.
pub const RECORD_LEN: usize = FILENAME_LEN + 4;
/// Touch tones closer together than this are dropped.
pub const TOUCH_MIN_INTERVAL: Duration = Duration::from_micros(25_000);

const FIFO_MODE: libc::mode_t = 0o660;
const ACCESS_MODE: u32 = 0o666;

#[derive(Debug, Error)]
pub enum KeytoneError {
    #[error("Failed to set up keytone pipe {path}: {source}")]
    Fifo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("keytone record is {0} bytes, expected {RECORD_LEN}")]
    RecordLength(usize),
    #[error("keytone record has an empty file name")]
    EmptyFilename,
    #[error("keytone file name is not valid UTF-8")]
    InvalidFilename,
    #[error("unknown volume type {0}")]
    VolumeType(u32),
    #[error("unknown gain type {0}")]
    GainType(u32),
    #[error("failed to play keytone: {0}")]
    Play(#[from] AudioError),
}

/// One request read from the pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeytoneRecord {
    pub filename: String,
    pub volume_config: VolumeConfig,
}

impl KeytoneRecord {
    pub fn new(filename: impl Into<String>, volume_config: VolumeConfig) -> Self {
        Self {
            filename: filename.into(),
            volume_config,
        }
    }

    /// Decode one record. The name ends at the first NUL.
    pub fn decode(buf: &[u8]) -> Result<Self, KeytoneError> {
        if buf.len() != RECORD_LEN {
            return Err(KeytoneError::RecordLength(buf.len()));
        }
        let (name, config) = buf.split_at(FILENAME_LEN);
        let end = name.iter().position(|b| *b == 0).unwrap_or(FILENAME_LEN);
        if end == 0 {
            return Err(KeytoneError::EmptyFilename);
        }
        let filename = std::str::from_utf8(&name[..end])
            .map_err(|_| KeytoneError::InvalidFilename)?
            .to_string();
        let mut raw = [0u8; 4];
        raw.copy_from_slice(config);
        Ok(Self {
            filename,
            volume_config: VolumeConfig(u32::from_ne_bytes(raw)),
        })
    }

    /// Encode the record the way clients write it. Names longer than the
    /// field are cut so one NUL always remains.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        let name = self.filename.as_bytes();
        let len = name.len().min(FILENAME_LEN - 1);
        buf[..len].copy_from_slice(&name[..len]);
        buf[FILENAME_LEN..].copy_from_slice(&self.volume_config.0.to_ne_bytes());
        buf
    }

    pub fn is_touch(&self) -> bool {
        self.volume_config.gain_type_raw() == GainType::Touch.as_u32()
    }
}

/// A record stamped with the time it was read off the pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeytoneRequest {
    pub record: KeytoneRecord,
    pub received_at: Instant,
}

/// What became of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeytoneOutcome {
    Played(u32),
    /// Touch tone too close to the previous record
    TooQuick,
    /// Touch tone while the default source is recording
    Recording,
}

/// Plays records on the engine thread and applies the drop rules.
#[derive(Debug)]
pub struct KeytonePlayer {
    /// Arrival of the previous record of any kind
    before: Instant,
}

impl KeytonePlayer {
    pub fn new(now: Instant) -> Self {
        Self { before: now }
    }

    /// Handle a record that was read off the pipe at `now`.
    pub fn handle(
        &mut self,
        engine: &mut PolicyEngine,
        record: &KeytoneRecord,
        now: Instant,
    ) -> Result<KeytoneOutcome, KeytoneError> {
        let diff = now.saturating_duration_since(self.before);
        self.before = now;

        if record.is_touch() {
            if diff < TOUCH_MIN_INTERVAL {
                info!("Skip playing keytone, requested again after {:?}", diff);
                return Ok(KeytoneOutcome::TooQuick);
            }
            if default_source_recording(engine) {
                info!("Skip playing keytone while recording");
                return Ok(KeytoneOutcome::Recording);
            }
        }

        let config = record.volume_config;
        let volume_type = config
            .volume_type()
            .ok_or(KeytoneError::VolumeType(config.volume_type_raw()))?;
        let gain_type = config
            .gain_type()
            .ok_or(KeytoneError::GainType(config.gain_type_raw()))?;

        info!(
            "Keytone {} type {} gain {} after {:?}",
            record.filename, volume_type, gain_type, diff
        );
        let idx = engine.play_file(Path::new(&record.filename), volume_type, gain_type)?;
        engine.events().broadcast(PolicyEvent::KeytonePlayed {
            filename: record.filename.clone(),
        });
        Ok(KeytoneOutcome::Played(idx))
    }
}

fn default_source_recording(engine: &PolicyEngine) -> bool {
    let core = engine.core();
    core.default_source_index()
        .and_then(|idx| core.source_state(idx))
        == Some(DeviceState::Running)
}

/// Create the FIFO at `path` and open it for reading.
///
/// An existing node is reused. The node is made writable for everyone in
/// the keytone group.
pub fn open_pipe(config: &KeytoneConfig) -> Result<pipe::Receiver, KeytoneError> {
    let path = &config.pipe_path;
    let fifo_err = |source: io::Error| KeytoneError::Fifo {
        path: path.clone(),
        source,
    };

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| fifo_err(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
    // SAFETY: c_path is a valid NUL-terminated string for the whole call
    let created = unsafe {
        let mask = libc::umask(0);
        let rc = libc::mkfifo(c_path.as_ptr(), FIFO_MODE);
        libc::umask(mask);
        rc
    };
    if created < 0 {
        let e = io::Error::last_os_error();
        if e.kind() == io::ErrorKind::AlreadyExists {
            debug!("Reusing keytone pipe {}", path.display());
        } else {
            warn!("mkfifo {} failed: {}", path.display(), e);
        }
    }

    // Opened read-write so the pipe never reports hangup between writers
    let receiver = pipe::OpenOptions::new()
        .read_write(true)
        .open_receiver(path)
        .map_err(fifo_err)?;

    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(ACCESS_MODE)) {
        warn!("Changing keytone access mode failed: {}", e);
    }
    if let Err(e) = std::os::unix::fs::chown(path, None, Some(config.group_id)) {
        warn!("Changing keytone group to {} failed: {}", config.group_id, e);
    }

    info!("Keytone pipe ready at {}", path.display());
    Ok(receiver)
}

/// Read records from `receiver` and forward them to the engine thread until
/// shutdown or until the engine goes away.
pub async fn read_records(
    mut receiver: pipe::Receiver,
    records: mpsc::Sender<KeytoneRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; RECORD_LEN];
    loop {
        tokio::select! {
            read = receiver.read_exact(&mut buf) => {
                if let Err(e) = read {
                    error!("Lost keytone pipe: {}", e);
                    break;
                }
                let received_at = Instant::now();
                match KeytoneRecord::decode(&buf) {
                    Ok(record) => {
                        let request = KeytoneRequest { record, received_at };
                        if records.send(request).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping keytone record: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Keytone reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sound_file::tests::wav_bytes;
    use crate::core::SourceOutputNewData;
    use crate::policy::tests::engine;
    use audio_policy_types::VolumeType;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    fn touch(path: &Path) -> KeytoneRecord {
        KeytoneRecord::new(
            path.to_string_lossy(),
            VolumeConfig::new(VolumeType::System, GainType::Touch),
        )
    }

    fn tone_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("tap.wav");
        std::fs::write(&path, wav_bytes(44100, 2, 441)).unwrap();
        path
    }

    #[test]
    fn test_record_layout() {
        let record = KeytoneRecord::new("/usr/share/tap.wav", VolumeConfig(0x0206));
        let buf = record.encode();
        assert_eq!(&buf[..18], b"/usr/share/tap.wav");
        assert_eq!(buf[18], 0);
        assert_eq!(&buf[FILENAME_LEN..], &0x0206u32.to_ne_bytes());

        let decoded = KeytoneRecord::decode(&buf).unwrap();
        assert_eq!(decoded, record);
        assert!(decoded.is_touch());
        assert_eq!(decoded.volume_config.volume_type(), Some(VolumeType::System));
    }

    #[test]
    fn test_bad_records() {
        assert!(matches!(
            KeytoneRecord::decode(&[0u8; 16]),
            Err(KeytoneError::RecordLength(16))
        ));
        assert!(matches!(
            KeytoneRecord::decode(&[0u8; RECORD_LEN]),
            Err(KeytoneError::EmptyFilename)
        ));
        let mut buf = [0u8; RECORD_LEN];
        buf[0] = 0xff;
        assert!(matches!(
            KeytoneRecord::decode(&buf),
            Err(KeytoneError::InvalidFilename)
        ));
    }

    #[test]
    fn test_quick_touch_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = tone_file(&dir);
        let (mut engine, _probe) = engine();
        let mut rx = engine.events().subscribe();

        let start = Instant::now();
        let mut player = KeytonePlayer::new(start);
        let first = start + Duration::from_millis(100);
        assert!(matches!(
            player.handle(&mut engine, &touch(&path), first),
            Ok(KeytoneOutcome::Played(_))
        ));
        assert!(matches!(
            player.handle(&mut engine, &touch(&path), first + Duration::from_millis(10)),
            Ok(KeytoneOutcome::TooQuick)
        ));
        assert!(matches!(
            player.handle(&mut engine, &touch(&path), first + Duration::from_millis(40)),
            Ok(KeytoneOutcome::Played(_))
        ));

        let played = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, PolicyEvent::KeytonePlayed { .. }))
            .count();
        assert_eq!(played, 2);
    }

    #[test]
    fn test_quick_non_touch_plays() {
        let dir = TempDir::new().unwrap();
        let path = tone_file(&dir);
        let (mut engine, _probe) = engine();

        let now = Instant::now();
        let mut player = KeytonePlayer::new(now);
        let record = KeytoneRecord::new(
            path.to_string_lossy(),
            VolumeConfig::new(VolumeType::Notification, GainType::Default),
        );
        assert!(matches!(
            player.handle(&mut engine, &record, now),
            Ok(KeytoneOutcome::Played(_))
        ));
    }

    #[test]
    fn test_touch_dropped_while_recording() {
        let dir = TempDir::new().unwrap();
        let path = tone_file(&dir);
        let (mut engine, _probe) = engine();
        engine
            .create_source_output(SourceOutputNewData::default())
            .unwrap();

        let start = Instant::now();
        let mut player = KeytonePlayer::new(start);
        assert!(matches!(
            player.handle(&mut engine, &touch(&path), start + Duration::from_secs(1)),
            Ok(KeytoneOutcome::Recording)
        ));
    }

    #[test]
    fn test_unknown_volume_type() {
        let (mut engine, _probe) = engine();
        let start = Instant::now();
        let mut player = KeytonePlayer::new(start);
        let record = KeytoneRecord::new("/tmp/x.wav", VolumeConfig(0x0030));
        assert!(matches!(
            player.handle(&mut engine, &record, start + Duration::from_secs(1)),
            Err(KeytoneError::VolumeType(0x30))
        ));
    }

    fn pipe_config(dir: &TempDir) -> KeytoneConfig {
        KeytoneConfig {
            enabled: true,
            pipe_path: dir.path().join("keytone"),
            group_id: 6526,
        }
    }

    #[tokio::test]
    async fn test_pipe_delivers_records() {
        let dir = TempDir::new().unwrap();
        let config = pipe_config(&dir);
        let receiver = open_pipe(&config).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reader = tokio::spawn(read_records(receiver, tx, shutdown_rx));

        let record = KeytoneRecord::new("/tmp/tap.wav", VolumeConfig(0x0200));
        let mut sender = pipe::OpenOptions::new()
            .open_sender(&config.pipe_path)
            .unwrap();
        let written = Instant::now();
        sender.write_all(&record.encode()).await.unwrap();

        let request = rx.recv().await.unwrap();
        assert_eq!(request.record, record);
        assert!(request.received_at >= written);
        shutdown_tx.send(true).unwrap();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_touch_interval_uses_read_time() {
        let dir = TempDir::new().unwrap();
        let path = tone_file(&dir);
        let config = pipe_config(&dir);
        let (mut engine, _probe) = engine();

        let mut player = KeytonePlayer::new(Instant::now());
        let receiver = open_pipe(&config).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reader = tokio::spawn(read_records(receiver, tx, shutdown_rx));

        let mut sender = pipe::OpenOptions::new()
            .open_sender(&config.pipe_path)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.write_all(&touch(&path).encode()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        sender.write_all(&touch(&path).encode()).await.unwrap();

        // Both taps are handled back to back, as when the engine was busy
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(second.received_at - first.received_at >= TOUCH_MIN_INTERVAL);
        for request in [first, second] {
            assert!(matches!(
                player.handle(&mut engine, &request.record, request.received_at),
                Ok(KeytoneOutcome::Played(_))
            ));
        }

        shutdown_tx.send(true).unwrap();
        reader.await.unwrap();
    }
}
