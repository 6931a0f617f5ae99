use std::sync::{Mutex, PoisonError};

/// Sink for the single user-visible event of the engine: the rebuild of corrupted storage.
///
/// Called while the store is locked, so implementations must return quickly and must not call
/// back into the history.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        log::error!("{title}: {message}");
    }
}

/// Keeps notifications until a UI drains them.
#[derive(Debug, Default)]
pub struct QueuedNotifier {
    queue: Mutex<Vec<(String, String)>>,
}

impl QueuedNotifier {
    pub fn new() -> Self {
        QueuedNotifier::default()
    }

    pub fn drain(&self) -> Vec<(String, String)> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *queue)
    }

    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Notifier for QueuedNotifier {
    fn notify(&self, title: &str, message: &str) {
        log::warn!("{title}: {message}");
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((title.to_string(), message.to_string()));
    }
}
