//! # Supervised Task
//!
//! A cancellable, joinable background loop. The loop receives a
//! [`CancellationToken`] and is expected to check it at each of its
//! suspension points; stopping is cancel-and-join.

use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ElrsLinkError, Result};

/// Observable state of a supervised loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Running,
    Stopped,
    Failed(String),
}

/// Handle owning at most one running instance of a loop
#[derive(Debug)]
pub struct SupervisedTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<()>>>,
    state: Arc<Mutex<TaskState>>,
}

impl SupervisedTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            cancel: CancellationToken::new(),
            handle: None,
            state: Arc::new(Mutex::new(TaskState::NotStarted)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True while a spawned loop has not yet returned
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Current state. A loop that returned on its own reports its outcome
    /// as soon as it exits, before [`SupervisedTask::stop`] joins it.
    pub fn state(&self) -> TaskState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_state(state: &Mutex<TaskState>, next: TaskState) {
        *state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Spawn the loop built by `make`.
    ///
    /// Starting while a previous instance is still running is rejected with
    /// `AlreadyActive` and `make` is never called.
    pub fn start<F, Fut>(&mut self, make: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.is_running() {
            return Err(ElrsLinkError::AlreadyActive(self.name));
        }

        self.cancel = CancellationToken::new();
        let state = Arc::new(Mutex::new(TaskState::Running));
        self.state = Arc::clone(&state);

        let run = make(self.cancel.clone());
        self.handle = Some(tokio::spawn(async move {
            let result = run.await;
            let outcome = match &result {
                Ok(()) => TaskState::Stopped,
                Err(e) => TaskState::Failed(e.to_string()),
            };
            Self::set_state(&state, outcome);
            result
        }));
        debug!(task = self.name, "Task started");
        Ok(())
    }

    /// Signal the loop to stop and wait for it to exit.
    ///
    /// Returns the loop's terminal error, if it had one. Safe to call on a
    /// task that never started or already stopped.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                let error = ElrsLinkError::Port(format!("{} panicked: {}", self.name, e));
                Self::set_state(&self.state, TaskState::Failed(error.to_string()));
                Err(error)
            }
        };

        debug!(task = self.name, state = ?self.state(), "Task joined");
        result
    }
}

impl Drop for SupervisedTask {
    fn drop(&mut self) {
        // A detached loop would keep the port busy
        self.cancel.cancel();
    }
}
