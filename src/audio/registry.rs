use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use super::queue::PlaybackQueue;

/// Colas activas por canal de voz.
///
/// Una cola se quita sola del registro cuando se destruye.
#[derive(Clone, Default)]
pub struct QueueRegistry {
    queues: Arc<DashMap<String, PlaybackQueue>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<PlaybackQueue> {
        self.queues.get(id).map(|entry| entry.value().clone())
    }

    /// Registra `queue` bajo `id` y la quita cuando se destruya
    pub fn set(&self, id: impl Into<String>, queue: PlaybackQueue) -> PlaybackQueue {
        let id = id.into();
        self.queues.insert(id.clone(), queue.clone());

        let queues = Arc::downgrade(&self.queues);
        let registered = queue.downgrade();
        queue.set_destroy_callback(move || {
            let Some(queues) = queues.upgrade() else {
                return;
            };
            // Solo si la entrada sigue siendo esta misma cola
            if queues.remove_if(&id, |_, current| current.is_same(&registered)).is_some() {
                info!("🗑️ Cola {} eliminada del registro", id);
            }
        });

        queue
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
