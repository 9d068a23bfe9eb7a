//! TCP server for remote execution.
//!
//! The [`Server`] owns the listener, the executor registry and the
//! connection registry. `run` spawns one handler per accepted client and a
//! single [`JobDispatcher`] fed by an unbounded queue that every handler
//! can push to.

pub mod connection;
pub mod dispatcher;
pub mod registry;

pub use connection::ConnectionHandler;
pub use dispatcher::{DispatcherState, Job, JobDispatcher};
pub use registry::{ConnectionId, ConnectionRegistry, Replier};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::executor::ExecutorRegistry;
use crate::protocol::FrameReader;

pub struct Server {
    config: Config,
    listener: TcpListener,
    executors: Arc<ExecutorRegistry>,
    connections: Arc<ConnectionRegistry>,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(config: Config, executors: ExecutorRegistry) -> Result<Self> {
        anyhow::ensure!(!executors.is_empty(), "No executors registered");
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("Cannot listen on {}:{}", config.host, config.port))?;

        Ok(Self {
            config,
            listener,
            executors: Arc::new(executors),
            connections: Arc::new(ConnectionRegistry::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Listener has no local address")
    }

    /// Handle on the live connection set.
    pub fn connections(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.connections)
    }

    /// Accept clients until `shutdown` resolves.
    ///
    /// On shutdown the dispatcher finishes the job it is running (queued
    /// jobs are dropped) and every connection is closed.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.local_addr()?;
        let available: Vec<_> = self
            .executors
            .capabilities()
            .into_iter()
            .filter_map(|(name, available)| available.then_some(name))
            .collect();
        info!(
            %addr,
            registered = self.executors.len(),
            available = ?available,
            "Server listening"
        );

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let dispatcher = JobDispatcher::new(Arc::clone(&self.executors), job_rx, stop_rx);
        let dispatcher_task = tokio::spawn(dispatcher.run());

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.spawn_connection(&mut tasks, stream, peer, job_tx.clone()).await;
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                Some(finished) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "Connection task panicked");
                    }
                }
            }
        }

        let live = self.connections.clear().await;
        if live > 0 {
            info!(live, "Closing remaining connections");
        }
        tasks.abort_all();

        let _ = stop_tx.send(true);
        drop(job_tx);
        dispatcher_task
            .await
            .context("Job dispatcher task failed")?;

        info!("Server stopped");
        Ok(())
    }

    async fn spawn_connection(
        &self,
        tasks: &mut JoinSet<()>,
        stream: TcpStream,
        peer: SocketAddr,
        jobs: mpsc::UnboundedSender<Job>,
    ) {
        let id = self.connections.next_id();
        info!(connection = id, peer = %peer, "Client connected");

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let replier = Replier::new(id, outbound_tx);

        self.connections.register(peer, replier.clone()).await;

        let reader = FrameReader::new(
            read_half,
            self.config.read_chunk_size,
            self.config.max_frame_bytes,
        );
        let handler = ConnectionHandler::new(
            peer,
            reader,
            replier,
            jobs,
            Arc::clone(&self.executors),
            Arc::clone(&self.connections),
        );

        tasks.spawn(connection::write_loop(id, write_half, outbound_rx));
        tasks.spawn(handler.run());
        debug!(connection = id, "Spawned connection tasks");
    }
}
