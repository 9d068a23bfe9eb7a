//! Serialized execution of submitted files.
//!
//! One dispatcher runs per server. It takes jobs off the shared queue one at
//! a time and awaits each execution to the end before taking the next, so at
//! most one submitted program runs at any moment. Jobs that arrive meanwhile
//! wait in the queue.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::registry::{ConnectionId, Replier};
use crate::executor::ExecutorRegistry;
use crate::protocol::{ErrorReport, ExecutionLogs, FileSubmission, Gravity, Payload};

pub const NO_EXECUTOR: &str = "No executor found for this file type.";
pub const EXECUTOR_UNAVAILABLE: &str = "Executor not available. Missing required tool(s) on server.";

/// A file submission waiting for execution.
#[derive(Debug)]
pub struct Job {
    pub file: FileSubmission,
    pub reply: Replier,
}

impl Job {
    pub const fn new(file: FileSubmission, reply: Replier) -> Self {
        Self { file, reply }
    }

    pub const fn connection(&self) -> ConnectionId {
        self.reply.id()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Running {
        connection: ConnectionId,
        file_name: String,
    },
}

pub struct JobDispatcher {
    executors: Arc<ExecutorRegistry>,
    jobs: mpsc::UnboundedReceiver<Job>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<DispatcherState>,
}

impl JobDispatcher {
    pub fn new(
        executors: Arc<ExecutorRegistry>,
        jobs: mpsc::UnboundedReceiver<Job>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state, _) = watch::channel(DispatcherState::Idle);
        Self {
            executors,
            jobs,
            shutdown,
            state,
        }
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    /// Process jobs until shutdown is signalled or every producer is gone.
    pub async fn run(mut self) {
        info!("Job dispatcher started");
        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.wait_for(|stop| *stop) => {
                    debug!("Dispatcher received shutdown signal");
                    break;
                }
                job = self.jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let connection = job.connection();
            self.state.send_replace(DispatcherState::Running {
                connection,
                file_name: job.file.file_name.clone(),
            });

            let payload = self.handle_file(&job.file).await;
            match payload.encode() {
                Ok(wire) => {
                    if !job.reply.send(wire) {
                        debug!(connection, "Connection closed before reply");
                    }
                }
                Err(e) => error!(connection, error = %e, "Failed to encode reply"),
            }

            self.state.send_replace(DispatcherState::Idle);
        }
        info!("Job dispatcher stopped");
    }

    /// Pick an executor for `file`, run it and build the reply.
    ///
    /// A requested executor is tried by name first; the file suffix is the
    /// fallback either way.
    pub async fn handle_file(&self, file: &FileSubmission) -> Payload {
        let requested = (!file.is_auto()).then_some(file.executor.as_str());
        let suffixes: Vec<&str> = file.suffix().into_iter().collect();

        let selected = self
            .executors
            .select(requested, &suffixes)
            .unwrap_or_default();

        let Some(executor) = selected else {
            let known = requested.is_some_and(|name| self.executors.find(name).is_some());
            let message = if known { EXECUTOR_UNAVAILABLE } else { NO_EXECUTOR };
            info!(file = %file.file_name, executor = %file.executor, "{message}");
            return error_payload(message);
        };

        if !executor.is_available() {
            warn!(executor = executor.friendly_name(), "Selected executor became unavailable");
            return error_payload(EXECUTOR_UNAVAILABLE);
        }

        info!(
            file = %file.file_name,
            executor = executor.friendly_name(),
            code_len = file.content.len(),
            "Executing file"
        );

        match executor.execute(&file.file_name, &file.content).await {
            Ok(result) => Payload::Logs(ExecutionLogs {
                status: result.exit_code,
                output: result.output,
            }),
            Err(e) => {
                error!(error = %e, "Execution failed");
                error_payload(format!("Could not execute the file: {e:#}"))
            }
        }
    }
}

fn error_payload(message: impl Into<String>) -> Payload {
    Payload::Error(ErrorReport::new(Gravity::Error, message))
}
