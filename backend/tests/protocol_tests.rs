//! Command socket and keytone pipe against a running daemon.

use audio_policy::config::{Config, KeytoneConfig, SamplesConfig, ServerConfig};
use audio_policy::events::EventBroadcaster;
use audio_policy::keytone::KeytoneRecord;
use audio_policy::protocol::server::{connect, request};
use audio_policy::protocol::{TagReader, TagWriter};
use audio_policy::Daemon;
use audio_policy_types::command::{COMMAND_ERROR, COMMAND_REPLY, ERR_PROTOCOL, EXT_VERSION};
use audio_policy_types::{
    DeviceIn, DeviceOut, GainType, PolicyEvent, Session, Subcommand, VolumeConfig, VolumeType,
    INVALID_INDEX,
};
use bytes::Bytes;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;

fn config(dir: &TempDir) -> Config {
    Config {
        server: ServerConfig {
            socket_path: dir.path().join("policy.sock"),
        },
        keytone: KeytoneConfig {
            enabled: true,
            pipe_path: dir.path().join("keytone"),
            group_id: 6526,
        },
        samples: SamplesConfig {
            booting_sound_path: dir.path().join("poweron.wav"),
            directory: None,
        },
        ..Config::default()
    }
}

fn frame(tag: u32, subcommand: Subcommand) -> TagWriter {
    let mut w = TagWriter::new();
    w.put_u32(tag).put_u32(subcommand.as_u32());
    w
}

/// Split a reply into command, tag and the u32 payload.
fn parse(reply: Bytes) -> (u32, u32, Vec<u32>) {
    let mut r = TagReader::new(reply);
    let command = r.get_u32().unwrap();
    let tag = r.get_u32().unwrap();
    let mut payload = Vec::new();
    while !r.is_eof() {
        payload.push(r.get_u32().unwrap());
    }
    (command, tag, payload)
}

/// Minimal 16-bit PCM WAV file.
fn wav(rate: u32, channels: u16, frames: u32) -> Vec<u8> {
    let data_len = frames * u32::from(channels) * 2;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&rate.to_le_bytes());
    out.extend_from_slice(&(rate * u32::from(channels) * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(out.len() + data_len as usize, 0);
    out
}

#[tokio::test]
async fn test_commands_over_socket() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let socket = config.server.socket_path.clone();
    let daemon = Daemon::start(config, EventBroadcaster::default())
        .await
        .unwrap();

    let mut client = connect(&socket).await.unwrap();

    let reply = request(&mut client, frame(1, Subcommand::Test).freeze())
        .await
        .unwrap();
    assert_eq!(parse(reply), (COMMAND_REPLY, 1, vec![EXT_VERSION]));

    let mut set = frame(2, Subcommand::SetVolumeLevel);
    set.put_u32(INVALID_INDEX)
        .put_u32(VolumeType::Media.as_u32())
        .put_u32(11);
    let reply = request(&mut client, set.freeze()).await.unwrap();
    assert_eq!(parse(reply), (COMMAND_REPLY, 2, vec![]));

    let mut get = frame(3, Subcommand::GetVolumeLevel);
    get.put_u32(INVALID_INDEX).put_u32(VolumeType::Media.as_u32());
    let reply = request(&mut client, get.freeze()).await.unwrap();
    assert_eq!(parse(reply), (COMMAND_REPLY, 3, vec![11]));

    // A broken request fails alone; the connection stays usable
    let mut bad = frame(4, Subcommand::SetSession);
    bad.put_u32(99).put_u32(1);
    let reply = request(&mut client, bad.freeze()).await.unwrap();
    assert_eq!(parse(reply), (COMMAND_ERROR, 4, vec![ERR_PROTOCOL]));

    let mut session = frame(5, Subcommand::SetSession);
    session.put_u32(Session::Voicecall.as_u32()).put_u32(1);
    let reply = request(&mut client, session.freeze()).await.unwrap();
    assert_eq!(parse(reply), (COMMAND_REPLY, 5, vec![]));

    let mut device = frame(6, Subcommand::SetActiveDevice);
    device
        .put_u32(DeviceIn::Mic.as_u32())
        .put_u32(DeviceOut::Receiver.as_u32());
    let reply = request(&mut client, device.freeze()).await.unwrap();
    assert_eq!(parse(reply), (COMMAND_REPLY, 6, vec![1]));

    drop(client);
    daemon.shutdown().await;
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_clients_share_engine() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let socket = config.server.socket_path.clone();
    let daemon = Daemon::start(config, EventBroadcaster::default())
        .await
        .unwrap();

    let mut first = connect(&socket).await.unwrap();
    let mut second = connect(&socket).await.unwrap();

    let mut set = frame(1, Subcommand::SetVolumeLevel);
    set.put_u32(INVALID_INDEX)
        .put_u32(VolumeType::Alarm.as_u32())
        .put_u32(4);
    request(&mut first, set.freeze()).await.unwrap();

    let mut get = frame(1, Subcommand::GetVolumeLevel);
    get.put_u32(INVALID_INDEX).put_u32(VolumeType::Alarm.as_u32());
    let reply = request(&mut second, get.freeze()).await.unwrap();
    assert_eq!(parse(reply), (COMMAND_REPLY, 1, vec![4]));

    drop(first);
    drop(second);
    daemon.shutdown().await;
}

#[tokio::test]
async fn test_keytone_record_plays() {
    let dir = TempDir::new().unwrap();
    let tone = dir.path().join("tap.wav");
    std::fs::write(&tone, wav(44100, 2, 441)).unwrap();

    let config = config(&dir);
    let pipe_path = config.keytone.pipe_path.clone();
    let daemon = Daemon::start(config, EventBroadcaster::default())
        .await
        .unwrap();
    let mut events = daemon.events().subscribe();

    let record = KeytoneRecord::new(
        tone.to_string_lossy(),
        VolumeConfig::new(VolumeType::Notification, GainType::Default),
    );
    let mut sender = pipe::OpenOptions::new().open_sender(&pipe_path).unwrap();
    sender.write_all(&record.encode()).await.unwrap();

    let played = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(PolicyEvent::KeytonePlayed { filename }) => break filename,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {}", e),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(played, tone.to_string_lossy());

    daemon.shutdown().await;
}
