//! Client side of the protocol.
//!
//! A background task turns the socket's read half into a stream of
//! [`Message`]s; the caller writes through the typed send methods and pulls
//! replies with [`Client::next_message`].

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::protocol::{FrameReader, Message, Payload, CAPABILITIES_QUERY};

pub struct Client {
    peer: SocketAddr,
    writer: OwnedWriteHalf,
    incoming: mpsc::UnboundedReceiver<Message>,
    receiver: JoinHandle<()>,
}

impl Client {
    /// Connect to the server named by `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("Cannot connect to {}:{}", config.host, config.port))?;
        let peer = stream.peer_addr().context("Connected socket has no peer")?;

        let (read_half, writer) = stream.into_split();
        let reader = FrameReader::new(read_half, config.read_chunk_size, config.max_frame_bytes);
        let (tx, incoming) = mpsc::unbounded_channel();
        let receiver = tokio::spawn(receive_loop(reader, tx));

        debug!(%peer, "Connected");
        Ok(Self {
            peer,
            writer,
            incoming,
            receiver,
        })
    }

    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send a chat message.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        let wire = Payload::text(text)?;
        self.send_raw(&wire).await
    }

    /// Ask the server which executors it can run.
    pub async fn request_capabilities(&mut self) -> Result<()> {
        self.send_text(CAPABILITIES_QUERY).await
    }

    /// Submit source text for execution.
    pub async fn submit_file(&mut self, file_name: &str, content: &str, executor: &str) -> Result<()> {
        let wire = Payload::file(file_name, content, executor)?;
        self.send_raw(&wire).await
    }

    /// Read a local file and submit it under its base name.
    pub async fn send_file(&mut self, path: &Path, executor: &str) -> Result<()> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            bail!("{} has no usable file name", path.display());
        };
        self.submit_file(file_name, &content, executor).await
    }

    /// Write pre-encoded wire text as-is.
    pub async fn send_raw(&mut self, wire: &str) -> Result<()> {
        self.writer
            .write_all(wire.as_bytes())
            .await
            .context("Failed to send message")
    }

    /// Next message from the server, or `None` once the connection closed.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.incoming.recv().await
    }

    /// Close the write side and stop receiving.
    pub async fn close(mut self) -> Result<()> {
        self.writer
            .shutdown()
            .await
            .context("Failed to close connection")
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn receive_loop(mut reader: FrameReader<OwnedReadHalf>, tx: mpsc::UnboundedSender<Message>) {
    loop {
        let metadata = match reader.next_frame().await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                debug!("Server closed the connection");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Receive failed");
                return;
            }
        };

        let message = match Message::from_metadata(&metadata) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed message");
                continue;
            }
        };

        if !message.validate_checksum() {
            warn!(kind = message.kind().as_str(), "Checksum mismatch on received message");
        }

        if tx.send(message).is_err() {
            return;
        }
    }
}
