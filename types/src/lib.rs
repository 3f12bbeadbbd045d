//! Shared types for the audio policy daemon.
//!
//! This crate contains the session, device, route, volume and command
//! definitions shared between the policy engine and its clients, together
//! with their numeric wire values.

/// Index value meaning "no stream" / "all streams" on the wire.
pub const INVALID_INDEX: u32 = u32::MAX;

/// Default Unix socket path of the command server.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/audio-policy.sock";

/// Default path of the keytone FIFO.
pub const KEYTONE_PIPE_PATH: &str = "/tmp/keytone_stream_mgr";

/// Declares a fieldless enum with fixed `u32` wire values plus the
/// decode/encode/label helpers every wire enum needs.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal => $label:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[repr(u32)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value, )+
        }

        impl $name {
            /// Every value, in wire order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Decode a wire value.
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $( $value => Some($name::$variant), )+
                    _ => None,
                }
            }

            /// The wire value.
            pub fn as_u32(self) -> u32 {
                self as u32
            }

            /// Name used in log lines.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod command;
pub mod device;
pub mod events;
pub mod names;
pub mod policy;
pub mod route;
pub mod session;
pub mod volume;

// Re-export commonly used types
pub use command::Subcommand;
pub use device::{AudioDeviceInfo, DeviceApi, DeviceDetail, DeviceIn, DeviceOut, DeviceParam, Direction, DockType};
pub use events::PolicyEvent;
pub use policy::StreamPolicy;
pub use route::{BtBandwidth, CallNetworkType, RouteFlags};
pub use session::{Session, SessionCommand, Subsession, SubsessionOptions};
pub use volume::{
    AudioInfo, FadeDirection, GainType, PrimaryVolumeType, StreamInfo, VolumeConfig, VolumeType,
};
