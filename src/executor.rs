//! Language executors and their registry.
//!
//! An executor knows how to run one language family with a host tool. The
//! registry holds executors in a fixed registration order, probes their
//! availability on demand and picks one by friendly name or file suffix.

mod tool;

pub use tool::{find_executable, Strategy, ToolExecutor};

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::Capabilities;

/// Result of running a submitted file.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Exit code of the process (0 = success, -1 when killed by a signal).
    pub exit_code: i32,
    /// stdout and stderr interleaved in the order they were read.
    pub output: String,
}

/// A runner for one language family.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name shown to clients and used for explicit selection.
    fn friendly_name(&self) -> &str;

    /// File suffixes (without the dot) this executor accepts.
    fn suffixes(&self) -> &[&'static str];

    /// Whether the host has the tooling this executor needs.
    fn is_available(&self) -> bool;

    /// Run `content` as if it were the file `file_name`.
    async fn execute(&self, file_name: &str, content: &str) -> Result<ExecutionResult>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no selector given: a friendly name or at least one suffix is required")]
    NoSelector,
}

/// Ordered set of known executors.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: Vec<Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new(executors: Vec<Arc<dyn Executor>>) -> Self {
        Self { executors }
    }

    /// Registry with the built-in Python, Java, C++ and C executors.
    pub fn with_defaults() -> Self {
        Self::new(
            ToolExecutor::builtin()
                .into_iter()
                .map(|executor| Arc::new(executor) as Arc<dyn Executor>)
                .collect(),
        )
    }

    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.executors.push(executor);
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Whether the executor's tooling is present on the host.
    pub fn probe(executor: &dyn Executor) -> bool {
        executor.is_available()
    }

    /// Look up an executor by friendly name, available or not.
    pub fn find(&self, friendly_name: &str) -> Option<Arc<dyn Executor>> {
        self.executors
            .iter()
            .find(|executor| executor.friendly_name() == friendly_name)
            .cloned()
    }

    /// Pick an available executor.
    ///
    /// A friendly-name match wins over a suffix match. Among equals the
    /// first registered executor wins.
    pub fn select(
        &self,
        friendly_name: Option<&str>,
        suffixes: &[&str],
    ) -> Result<Option<Arc<dyn Executor>>, SelectError> {
        let friendly_name = friendly_name.filter(|name| !name.is_empty());
        if friendly_name.is_none() && suffixes.is_empty() {
            return Err(SelectError::NoSelector);
        }

        let available: Vec<&Arc<dyn Executor>> = self
            .executors
            .iter()
            .filter(|executor| Self::probe(executor.as_ref()))
            .collect();

        if let Some(name) = friendly_name {
            if let Some(executor) = available.iter().find(|e| e.friendly_name() == name) {
                return Ok(Some(Arc::clone(executor)));
            }
        }

        Ok(available
            .into_iter()
            .find(|executor| {
                executor
                    .suffixes()
                    .iter()
                    .any(|accepted| suffixes.contains(accepted))
            })
            .cloned())
    }

    /// Every registered executor with its current availability, in
    /// registration order.
    pub fn list_availability(&self) -> Vec<(Arc<dyn Executor>, bool)> {
        self.executors
            .iter()
            .map(|executor| (Arc::clone(executor), Self::probe(executor.as_ref())))
            .collect()
    }

    /// Availability keyed by friendly name, as advertised to clients.
    pub fn capabilities(&self) -> Capabilities {
        self.list_availability()
            .into_iter()
            .map(|(executor, available)| (executor.friendly_name().to_string(), available))
            .collect()
    }
}
