//! Task supervision and graceful shutdown
//!
//! The [`Supervisor`] owns every long-running task and the hidden device
//! nodes. It moves through three states:
//!
//! - `Running`: tasks are live; the first termination signal or task exit
//!   ends this state
//! - `Draining`: cancellation has been requested; tasks get a bounded grace
//!   period before the stragglers are aborted, then every hidden node is
//!   restored
//! - `Stopped`: nothing is left running, only the shutdown cause remains

use crate::device::{HiddenNode, RestoreOutcome};
use crate::pipeline::PipelineError;
use statum::{machine, state};
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Grace period for tasks to observe cancellation
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to register {signal} handler: {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Shut down after task fault: {0}")]
    TaskFault(String),
}

/// Why the daemon is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    Signal(&'static str),
    TaskFault(String),
}

impl Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownCause::Signal(name) => write!(f, "received {}", name),
            ShutdownCause::TaskFault(description) => write!(f, "task fault: {}", description),
        }
    }
}

type TaskOutput = (&'static str, Result<(), PipelineError>);

#[state]
#[derive(Debug, Clone)]
pub enum SupervisorState {
    Running,
    Draining(ShutdownCause),
    Stopped(ShutdownCause),
}

#[machine]
pub struct Supervisor<S: SupervisorState> {
    tasks: JoinSet<TaskOutput>,
    cancel: CancellationToken,
    nodes: Vec<Arc<HiddenNode>>,
    drain_timeout: Duration,
}

impl Supervisor<Running> {
    /// Takes ownership of the hidden nodes to restore on shutdown
    pub fn start(nodes: Vec<Arc<HiddenNode>>) -> Self {
        info!("Supervising {} hidden device node(s)", nodes.len());
        Self::new(JoinSet::new(), CancellationToken::new(), nodes, DRAIN_TIMEOUT)
    }

    /// Token every task must watch to stop when shutdown begins
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        debug!("Spawning {}", name);
        self.tasks.spawn(async move { (name, task.await) });
    }

    /// Runs until a termination signal arrives or a task exits.
    pub async fn wait_for_shutdown(self) -> Result<Supervisor<Draining>, LifecycleError> {
        let mut signals = TerminationSignals::register()?;
        Ok(self.run_until(async move { signals.recv().await }).await)
    }

    /// Runs until `shutdown` resolves with a signal name or a task exits.
    ///
    /// Any task exit counts as a fault: every task is meant to run for the
    /// life of the process.
    pub async fn run_until<F>(mut self, shutdown: F) -> Supervisor<Draining>
    where
        F: Future<Output = &'static str>,
    {
        info!("Running {} task(s)", self.tasks.len());

        let cause = tokio::select! {
            name = shutdown => {
                info!("Received {}, shutting down", name);
                ShutdownCause::Signal(name)
            }
            Some(joined) = self.tasks.join_next() => {
                let description = describe_exit(joined);
                error!("Unhandled task fault: {}", description);
                ShutdownCause::TaskFault(description)
            }
        };

        self.cancel.cancel();
        self.transition_with(cause)
    }
}

impl Supervisor<Draining> {
    /// Waits for tasks to wind down, aborts the stragglers and restores
    /// every hidden node, whatever the tasks returned.
    pub async fn drain(mut self) -> Supervisor<Stopped> {
        let cause = if let Some(cause) = self.get_state_data() {
            cause.clone()
        } else {
            warn!("Draining without a recorded cause");
            ShutdownCause::Signal("unknown")
        };
        info!("Draining tasks ({})", cause);

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                log_drained(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} task(s) still running after {:?}, aborting",
                self.tasks.len(),
                self.drain_timeout
            );
            self.tasks.abort_all();
            while let Some(joined) = self.tasks.join_next().await {
                log_drained(joined);
            }
        }

        self.restore_devices();
        self.transition_with(cause)
    }

    fn restore_devices(&self) {
        for node in &self.nodes {
            match node.restore() {
                RestoreOutcome::Restored => {}
                RestoreOutcome::AlreadyRestored | RestoreOutcome::NoOp => {
                    debug!("{} needed no restore", node.original().display());
                }
                RestoreOutcome::Failed => {
                    error!("{} could not be restored", node.original().display());
                }
            }
        }
    }
}

impl Supervisor<Stopped> {
    /// Signal shutdowns are clean; a task fault becomes an error so the
    /// process exits nonzero and the service manager restarts it.
    pub fn into_result(self) -> Result<(), LifecycleError> {
        match self.get_state_data() {
            Some(ShutdownCause::TaskFault(description)) => {
                Err(LifecycleError::TaskFault(description.clone()))
            }
            Some(ShutdownCause::Signal(name)) => {
                info!("Stopped cleanly after {}", name);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn describe_exit(joined: Result<TaskOutput, JoinError>) -> String {
    match joined {
        Ok((name, Ok(()))) => format!("{} exited unexpectedly", name),
        Ok((name, Err(e))) => format!("{} failed: {}", name, e),
        Err(e) => format!("task panicked: {}", e),
    }
}

fn log_drained(joined: Result<TaskOutput, JoinError>) {
    match joined {
        Ok((name, Ok(()))) => debug!("{} finished", name),
        Ok((name, Err(e))) => warn!("{} failed while stopping: {}", name, e),
        Err(e) if e.is_cancelled() => debug!("Task aborted"),
        Err(e) => error!("Task panicked while stopping: {}", e),
    }
}

/// Hang-up, terminate, interrupt and quit all take the same shutdown path
struct TerminationSignals {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
    quit: Signal,
}

impl TerminationSignals {
    fn register() -> Result<Self, LifecycleError> {
        let listen = |kind: SignalKind, name: &'static str| {
            signal(kind).map_err(|source| LifecycleError::Signal {
                signal: name,
                source,
            })
        };
        Ok(Self {
            hangup: listen(SignalKind::hangup(), "SIGHUP")?,
            terminate: listen(SignalKind::terminate(), "SIGTERM")?,
            interrupt: listen(SignalKind::interrupt(), "SIGINT")?,
            quit: listen(SignalKind::quit(), "SIGQUIT")?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.hangup.recv() => "SIGHUP",
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.quit.recv() => "SIGQUIT",
        }
    }
}
