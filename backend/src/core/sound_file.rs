//! WAV loading for the sample cache.

use super::{SampleFormat, SampleSpec};
use bytes::Bytes;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SoundFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a RIFF/WAVE file")]
    NotWave,
    #[error("Missing {0} chunk")]
    MissingChunk(&'static str),
    #[error("Unsupported encoding: format tag {format_tag}, {bits} bits")]
    Unsupported { format_tag: u16, bits: u16 },
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

/// Decoded PCM data and its format.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundChunk {
    pub spec: SampleSpec,
    pub data: Bytes,
}

impl SoundChunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playback duration of the whole chunk.
    pub fn duration(&self) -> std::time::Duration {
        self.spec.bytes_to_duration(self.data.len())
    }
}

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xfffe;

pub fn load(path: &Path) -> Result<SoundChunk, SoundFileError> {
    let raw = std::fs::read(path)?;
    parse(&raw)
}

/// Parse an in-memory WAV file.
pub fn parse(raw: &[u8]) -> Result<SoundChunk, SoundFileError> {
    if raw.len() < 12 || &raw[0..4] != b"RIFF" || &raw[8..12] != b"WAVE" {
        return Err(SoundFileError::NotWave);
    }

    let mut spec = None;
    let mut data = None;
    let mut pos = 12;

    while pos + 8 <= raw.len() {
        let id = &raw[pos..pos + 4];
        let size = u32::from_le_bytes([raw[pos + 4], raw[pos + 5], raw[pos + 6], raw[pos + 7]]) as usize;
        let body_start = pos + 8;
        let body_end = body_start.saturating_add(size).min(raw.len());
        let body = &raw[body_start..body_end];

        match id {
            b"fmt " => spec = Some(parse_fmt(body)?),
            b"data" => data = Some(Bytes::copy_from_slice(body)),
            _ => {}
        }

        // Chunks are word aligned
        pos = body_start.saturating_add(size + (size & 1));
    }

    let spec = spec.ok_or(SoundFileError::MissingChunk("fmt"))?;
    let data = data.ok_or(SoundFileError::MissingChunk("data"))?;

    let frame = spec.frame_size();
    let whole = data.len() - data.len() % frame;

    Ok(SoundChunk {
        spec,
        data: data.slice(..whole),
    })
}

fn parse_fmt(body: &[u8]) -> Result<SampleSpec, SoundFileError> {
    if body.len() < 16 {
        return Err(SoundFileError::InvalidHeader(format!(
            "fmt chunk too short ({} bytes)",
            body.len()
        )));
    }

    let format_tag = u16::from_le_bytes([body[0], body[1]]);
    let channels = u16::from_le_bytes([body[2], body[3]]);
    let rate = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    let bits = u16::from_le_bytes([body[14], body[15]]);

    if format_tag != WAVE_FORMAT_PCM && format_tag != WAVE_FORMAT_EXTENSIBLE {
        return Err(SoundFileError::Unsupported { format_tag, bits });
    }
    if channels == 0 || channels > 32 {
        return Err(SoundFileError::InvalidHeader(format!("{} channels", channels)));
    }
    if rate == 0 {
        return Err(SoundFileError::InvalidHeader("zero sample rate".to_string()));
    }

    let format = match bits {
        8 => SampleFormat::U8,
        16 => SampleFormat::S16Le,
        24 => SampleFormat::S24Le,
        32 => SampleFormat::S32Le,
        _ => return Err(SoundFileError::Unsupported { format_tag, bits }),
    };

    Ok(SampleSpec {
        format,
        rate,
        channels: channels as u8,
    })
}
