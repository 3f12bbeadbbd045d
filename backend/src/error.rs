//! Error taxonomy shared by the HAL and the policy engine.

use thiserror::Error;

/// Successful HAL outcomes.
///
/// `UseHwControl` tells the caller the hardware already applied the change,
/// so the software path must be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalStatus {
    Ok,
    UseHwControl,
}

impl HalStatus {
    /// 32-bit code of the status.
    pub fn code(self) -> u32 {
        match self {
            HalStatus::Ok => 0,
            HalStatus::UseHwControl => 0x4000_1000,
        }
    }

    pub fn is_hw_control(self) -> bool {
        self == HalStatus::UseHwControl
    }
}

/// HAL and policy failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("undefined error")]
    Undefined,
    #[error("resource unavailable")]
    Resource,
    #[error("invalid parameter")]
    Parameter,
    #[error("ioctl failed")]
    Ioctl,
    #[error("not implemented")]
    NotImplemented,
}

impl AudioError {
    /// 32-bit code of the error.
    pub fn code(self) -> u32 {
        match self {
            AudioError::Undefined => 0x8000_1000,
            AudioError::Resource => 0x8000_1001,
            AudioError::Parameter => 0x8000_1002,
            AudioError::Ioctl => 0x8000_1003,
            AudioError::NotImplemented => 0x8000_1004,
        }
    }
}

/// Result of a HAL or policy operation.
pub type AudioResult<T = HalStatus> = Result<T, AudioError>;

/// Treat an unimplemented HAL entry point as absent.
///
/// Returns `Ok(None)` for `NotImplemented` so callers can skip the feature
/// the same way they would skip a missing symbol.
pub fn bound<T>(result: AudioResult<T>) -> AudioResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(AudioError::NotImplemented) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Failures of the in-process audio-core model.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown module: {0}")]
    UnknownModule(String),
    #[error("Invalid module arguments: {0}")]
    BadModuleArgs(String),
    #[error("Name already registered: {0}")]
    DuplicateName(String),
    #[error("No such {kind}: {id}")]
    NoEntity { kind: &'static str, id: String },
    #[error("No sink available for the new stream")]
    NoSink,
    #[error("No source available for the new stream")]
    NoSource,
    #[error("Failed to load sample {name}: {source}")]
    SampleLoad {
        name: String,
        #[source]
        source: crate::core::sound_file::SoundFileError,
    },
}

impl CoreError {
    pub fn no_entity(kind: &'static str, id: impl ToString) -> Self {
        CoreError::NoEntity {
            kind,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(HalStatus::UseHwControl.code(), 0x40001000);
        assert_eq!(AudioError::Parameter.code(), 0x80001002);
        assert_eq!(AudioError::NotImplemented.code(), 0x80001004);
    }

    #[test]
    fn test_bound_hides_not_implemented() {
        assert_eq!(bound::<u32>(Err(AudioError::NotImplemented)), Ok(None));
        assert_eq!(bound(Ok(3u32)), Ok(Some(3)));
        assert_eq!(bound::<u32>(Err(AudioError::Ioctl)), Err(AudioError::Ioctl));
    }
}
