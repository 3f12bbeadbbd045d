//! Unix-socket transport for the extension protocol.
//!
//! Each connection carries length-prefixed frames. Frames are handed to the
//! engine thread one at a time and the reply is written back before the next
//! frame of that connection is read.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

/// One request frame on its way to the engine thread.
#[derive(Debug)]
pub struct CommandRequest {
    pub frame: Bytes,
    pub reply: oneshot::Sender<Bytes>,
}

/// Listening socket that removes its path when dropped.
pub struct CommandServer {
    listener: UnixListener,
    path: PathBuf,
}

impl CommandServer {
    /// Bind `path`, replacing a stale socket file.
    pub fn bind(path: &Path) -> io::Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        info!("Command socket listening on {}", path.display());
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` flips to true.
    pub async fn run(
        self,
        commands: mpsc::Sender<CommandRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let commands = commands.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_client(stream, commands).await {
                                    warn!("Command client error: {}", e);
                                }
                            });
                        }
                        Err(e) => error!("Failed to accept command client: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Command server stopped");
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    commands: mpsc::Sender<CommandRequest>,
) -> io::Result<()> {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    while let Some(frame) = framed.next().await {
        let frame = frame?.freeze();
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = CommandRequest {
            frame,
            reply: reply_tx,
        };
        if commands.send(request).await.is_err() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "engine thread is gone",
            ));
        }
        let reply = reply_rx.await.map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "engine dropped the request")
        })?;
        framed.send(reply).await?;
    }
    Ok(())
}

/// Send one request frame and wait for its reply.
pub async fn request(
    stream: &mut Framed<UnixStream, LengthDelimitedCodec>,
    frame: Bytes,
) -> io::Result<Bytes> {
    stream.send(frame).await?;
    match stream.next().await {
        Some(reply) => Ok(reply?.freeze()),
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before the reply",
        )),
    }
}

/// Connect a client to the command socket at `path`.
pub async fn connect(path: &Path) -> io::Result<Framed<UnixStream, LengthDelimitedCodec>> {
    let stream = UnixStream::connect(path).await?;
    Ok(Framed::new(stream, LengthDelimitedCodec::new()))
}
