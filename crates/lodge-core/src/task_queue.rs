use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::Task;

/// Shared FIFO of tasks not yet taken by a worker.
///
/// Each task is handed out exactly once, either by [`pop`](Self::pop) to a
/// worker or by [`drain`](Self::drain) when the run is cancelled.
#[derive(Debug, Clone, Default)]
pub struct TaskQueue {
    inner: Arc<Mutex<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tasks.into_iter().collect())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes the oldest task.
    pub fn pop(&self) -> Option<Task> {
        self.lock().pop_front()
    }

    /// Removes every remaining task, oldest first.
    pub fn drain(&self) -> Vec<Task> {
        self.lock().drain(..).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
