//! Per-connection handling.
//!
//! Each accepted socket gets two tasks: a handler that reads frames and acts
//! on them, and a writer that drains the connection's outbound queue. The
//! handler unregisters the connection when the peer disconnects or the read
//! side fails; other connections are unaffected.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::dispatcher::Job;
use super::registry::{ConnectionId, ConnectionRegistry, Replier};
use crate::executor::ExecutorRegistry;
use crate::protocol::{
    ErrorReport, FrameReader, Gravity, Message, Metadata, Payload, ProtocolError,
    CAPABILITIES_QUERY,
};

pub const CHECKSUM_MISMATCH: &str = "Checksum mismatch, message discarded. Please resend.";

pub struct ConnectionHandler {
    id: ConnectionId,
    peer: SocketAddr,
    reader: FrameReader<OwnedReadHalf>,
    replier: Replier,
    jobs: mpsc::UnboundedSender<Job>,
    executors: Arc<ExecutorRegistry>,
    connections: Arc<ConnectionRegistry>,
}

impl ConnectionHandler {
    pub fn new(
        peer: SocketAddr,
        reader: FrameReader<OwnedReadHalf>,
        replier: Replier,
        jobs: mpsc::UnboundedSender<Job>,
        executors: Arc<ExecutorRegistry>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            id: replier.id(),
            peer,
            reader,
            replier,
            jobs,
            executors,
            connections,
        }
    }

    /// Read frames until the peer goes away, then unregister.
    pub async fn run(mut self) {
        loop {
            match self.reader.next_frame().await {
                Ok(Some(metadata)) => self.handle_frame(&metadata),
                Ok(None) => {
                    info!(connection = self.id, peer = %self.peer, "Client disconnected");
                    break;
                }
                Err(e) => {
                    warn!(connection = self.id, peer = %self.peer, error = %e, "Dropping connection");
                    break;
                }
            }
        }
        self.connections.unregister(self.id).await;
    }

    fn handle_frame(&self, metadata: &Metadata) {
        let message = match Message::from_metadata(metadata) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection = self.id, error = %e, "Rejected message");
                self.reply_error(Gravity::Error, &rejection_text(&e));
                return;
            }
        };

        if !message.validate_checksum() {
            warn!(
                connection = self.id,
                kind = message.kind().as_str(),
                declared = message.checksum(),
                "Checksum mismatch"
            );
            self.reply_error(Gravity::Warning, CHECKSUM_MISMATCH);
            return;
        }

        match message.into_payload() {
            Payload::File(file) => {
                debug!(connection = self.id, file = %file.file_name, "Queueing file");
                if self.jobs.send(Job::new(file, self.replier.clone())).is_err() {
                    self.reply_error(Gravity::Error, "Server is shutting down.");
                }
            }
            Payload::Text(text) if text == CAPABILITIES_QUERY => {
                let capabilities = self.executors.capabilities();
                debug!(connection = self.id, ?capabilities, "Advertising capabilities");
                self.reply(&Payload::Capabilities(capabilities));
            }
            Payload::Text(text) => {
                info!(connection = self.id, text = %text, "Chat message");
            }
            other => {
                debug!(connection = self.id, kind = other.kind().as_str(), "Ignoring message");
            }
        }
    }

    fn reply(&self, payload: &Payload) {
        match payload.encode() {
            Ok(wire) => {
                if !self.replier.send(wire) {
                    debug!(connection = self.id, "Writer closed, reply dropped");
                }
            }
            Err(e) => warn!(connection = self.id, error = %e, "Failed to encode reply"),
        }
    }

    fn reply_error(&self, gravity: Gravity, message: &str) {
        self.reply(&Payload::Error(ErrorReport::new(gravity, message)));
    }
}

fn rejection_text(error: &ProtocolError) -> String {
    match error {
        ProtocolError::UnknownMessageType(kind) => format!("Unknown message type: {kind}"),
        other => format!("Invalid message: {other}"),
    }
}

/// Forward queued frames to the socket until every sender is dropped or a
/// write fails.
pub async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(wire) = outbound.recv().await {
        if let Err(e) = writer.write_all(wire.as_bytes()).await {
            debug!(connection = id, error = %e, "Write failed, discarding replies");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
