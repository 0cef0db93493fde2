use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{inc, Metrics, Phase, TaskKey};

/// A spawned task plus the means to stop it.
pub struct TaskHandle {
    key: TaskKey,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    stop_timeout: Duration,
    started_at: Instant,
}

impl TaskHandle {
    /// Spawn `make(token)` on the runtime. The token is a child of `parent`,
    /// so cancelling the parent stops every task started under it.
    pub fn spawn<F, Fut>(
        key: TaskKey,
        parent: &CancellationToken,
        stop_timeout: Duration,
        make: F,
    ) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let join = tokio::spawn(make(cancel.clone()));
        TaskHandle {
            key,
            cancel,
            join,
            stop_timeout,
            started_at: Instant::now(),
        }
    }

    pub fn key(&self) -> &TaskKey {
        &self.key
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Ask the task to stop and wait for it, at most `stop_timeout`.
    /// Returns false if it had to be aborted.
    pub async fn stop(mut self) -> bool {
        self.cancel.cancel();
        match tokio::time::timeout(self.stop_timeout, &mut self.join).await {
            Ok(_) => {
                debug!(
                    "Task {} stopped after {:.1}s",
                    self.key,
                    self.started_at.elapsed().as_secs_f64()
                );
                true
            }
            Err(_) => {
                warn!(
                    "⚠️ Task {} did not stop cleanly within {:?}, aborting",
                    self.key, self.stop_timeout
                );
                self.join.abort();
                false
            }
        }
    }
}

/// Tracks every task a coordinator has started, so none is ever forgotten.
pub struct TaskRegistry {
    tasks: HashMap<TaskKey, TaskHandle>,
    metrics: Arc<Metrics>,
}

impl TaskRegistry {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        TaskRegistry {
            tasks: HashMap::new(),
            metrics,
        }
    }

    /// Register a freshly spawned task. Refused (and the new task stopped)
    /// while another task with the same key is still running.
    pub async fn start(&mut self, handle: TaskHandle) -> bool {
        let key = handle.key().clone();
        if self.is_active(&key) {
            warn!("Task {} already running, not starting a second one", key);
            handle.stop().await;
            return false;
        }
        info!("▶️ Started task {}", key);
        inc(&self.metrics.tasks_started);
        self.tasks.insert(key, handle);
        true
    }

    pub fn is_active(&self, key: &TaskKey) -> bool {
        self.tasks.get(key).is_some_and(|h| !h.is_finished())
    }

    /// Stop the task under `key`. `None` if there was none.
    pub async fn stop(&mut self, key: &TaskKey) -> Option<bool> {
        let handle = self.tasks.remove(key)?;
        let clean = handle.stop().await;
        if !clean {
            inc(&self.metrics.stop_timeouts);
        }
        info!("⏹️ Stopped task {}", key);
        Some(clean)
    }

    /// Forget tasks that have already run to completion.
    pub fn reap(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, h| !h.is_finished());
        before - self.tasks.len()
    }

    pub async fn stop_all(&mut self) {
        let keys: Vec<TaskKey> = self.tasks.keys().cloned().collect();
        for key in keys {
            self.stop(&key).await;
        }
    }

    pub fn active(&self) -> Vec<TaskKey> {
        let mut keys: Vec<TaskKey> = self
            .tasks
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.tasks
            .iter()
            .filter(|(k, h)| k.phase == phase && !h.is_finished())
            .count()
    }
}
