//! Extension command protocol: tag-structure codec, dispatcher and socket
//! transport.

pub mod dispatch;
pub mod server;
pub mod tagstruct;

pub use dispatch::{handle_frame, DispatchError, Request};
pub use server::{CommandRequest, CommandServer};
pub use tagstruct::{TagError, TagReader, TagWriter};
