//! Audio policy daemon library.
//!
//! The [`policy::PolicyEngine`] decides routing, volume and session state on
//! top of an in-process audio-core model and a pluggable [`hal::AudioHal`].
//! The [`daemon`] module runs it behind the command socket and the keytone
//! pipe.

pub mod config;
pub mod core;
pub mod daemon;
pub mod error;
pub mod events;
pub mod hal;
pub mod keytone;
pub mod policy;
pub mod protocol;

pub use daemon::Daemon;
pub use error::{AudioError, AudioResult, HalStatus};
pub use policy::PolicyEngine;
