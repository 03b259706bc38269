//! Active-execution registry
//!
//! The set of in-flight suite and pipeline runs is owned by a single actor
//! task. Every mutation is a command on an mpsc channel and every answer
//! comes back on a oneshot, so there is exactly one writer.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExecutionError;
use crate::models::{ExecutionStatus, TestExecution};

const COMMAND_BUFFER: usize = 64;

enum Command {
    Register {
        execution: TestExecution,
        token: CancellationToken,
        reply: oneshot::Sender<()>,
    },
    Complete {
        id: String,
        status: ExecutionStatus,
        reply: oneshot::Sender<Result<TestExecution, ExecutionError>>,
    },
    Cancel {
        id: String,
        reply: oneshot::Sender<Result<(), ExecutionError>>,
    },
    CancelAll {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<TestExecution>>,
    },
}

struct Entry {
    execution: TestExecution,
    token: CancellationToken,
}

/// Handle to the registry actor; cheap to clone
#[derive(Clone, Debug)]
pub struct ExecutionRegistry {
    tx: mpsc::Sender<Command>,
}

impl ExecutionRegistry {
    /// Spawn the actor on the current runtime
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run_actor(rx));
        Self { tx }
    }

    /// Track a running execution and the token that cancels it
    pub async fn register(
        &self,
        execution: TestExecution,
        token: CancellationToken,
    ) -> Result<(), ExecutionError> {
        self.request(|reply| Command::Register {
            execution,
            token,
            reply,
        })
        .await
    }

    /// Record the terminal status and drop the execution from the active set
    pub async fn complete(
        &self,
        id: &str,
        status: ExecutionStatus,
    ) -> Result<TestExecution, ExecutionError> {
        self.request(|reply| Command::Complete {
            id: id.to_string(),
            status,
            reply,
        })
        .await?
    }

    /// Cancel one active execution
    pub async fn cancel(&self, id: &str) -> Result<(), ExecutionError> {
        self.request(|reply| Command::Cancel {
            id: id.to_string(),
            reply,
        })
        .await?
    }

    /// Cancel every active execution; returns how many were signalled
    pub async fn cancel_all(&self) -> Result<usize, ExecutionError> {
        self.request(|reply| Command::CancelAll { reply }).await
    }

    /// Read-only view of the active set
    pub async fn active(&self) -> Result<Vec<TestExecution>, ExecutionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ExecutionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| ExecutionError::RegistryClosed)?;
        rx.await.map_err(|_| ExecutionError::RegistryClosed)
    }
}

async fn run_actor(mut rx: mpsc::Receiver<Command>) {
    let mut active: HashMap<String, Entry> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Register {
                mut execution,
                token,
                reply,
            } => {
                execution.start();
                debug!("Registered execution {} ({})", execution.id, execution.name);
                active.insert(execution.id.clone(), Entry { execution, token });
                let _ = reply.send(());
            }
            Command::Complete { id, status, reply } => {
                let result = match active.remove(&id) {
                    Some(mut entry) => {
                        // a cancel request wins over whatever the owner reports
                        let status = if entry.token.is_cancelled() {
                            ExecutionStatus::Cancelled
                        } else {
                            status
                        };
                        entry.execution.finish(status).map(|_| {
                            debug!("Execution {} finished as {}", id, status);
                            entry.execution
                        })
                    }
                    None => Err(ExecutionError::NotFound(id)),
                };
                let _ = reply.send(result);
            }
            Command::Cancel { id, reply } => {
                let result = match active.get(&id) {
                    Some(entry) => {
                        info!("Cancelling execution {} ({})", id, entry.execution.name);
                        entry.token.cancel();
                        Ok(())
                    }
                    None => Err(ExecutionError::NotFound(id)),
                };
                let _ = reply.send(result);
            }
            Command::CancelAll { reply } => {
                for entry in active.values() {
                    entry.token.cancel();
                }
                if !active.is_empty() {
                    warn!("Cancelled {} active executions", active.len());
                }
                let _ = reply.send(active.len());
            }
            Command::Snapshot { reply } => {
                let mut executions: Vec<TestExecution> =
                    active.values().map(|e| e.execution.clone()).collect();
                executions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
                let _ = reply.send(executions);
            }
        }
    }

    debug!("Execution registry stopped");
}
