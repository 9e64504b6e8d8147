use crate::event::{DatabaseEvent, EventPhase, EventType};
use crate::types::{EventCallback, EventProcessingError};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Handle returned when registering a callback, used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(Uuid);

struct Registration {
    id: CallbackId,
    /// `None` listens on every table
    table: Option<String>,
    event_type: EventType,
    phase: EventPhase,
    callback: EventCallback,
}

impl Registration {
    fn matches(&self, event: &DatabaseEvent) -> bool {
        self.event_type == event.event_type
            && self.phase == event.phase
            && self
                .table
                .as_deref()
                .is_none_or(|table| table == event.table_name)
    }
}

/// Signal manager for database event notifications
pub struct SignalManager {
    callbacks: std::sync::RwLock<Vec<Registration>>,
}

impl std::fmt::Debug for SignalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalManager")
            .field("callback_count", &self.callback_count())
            .finish()
    }
}

impl SignalManager {
    pub fn new() -> Self {
        Self {
            callbacks: std::sync::RwLock::new(Vec::new()),
        }
    }

    /// Add event callback
    pub fn add_callback(
        &self,
        table: Option<&str>,
        event_type: EventType,
        phase: EventPhase,
        callback: EventCallback,
    ) -> CallbackId {
        let id = CallbackId(Uuid::new_v4());
        if let Ok(mut callbacks) = self.callbacks.write() {
            callbacks.push(Registration {
                id,
                table: table.map(str::to_string),
                event_type,
                phase,
                callback,
            });
        }
        id
    }

    /// Register an async closure for one table, event type and phase
    pub fn on<F, Fut>(
        &self,
        table: &str,
        event_type: EventType,
        phase: EventPhase,
        callback: F,
    ) -> CallbackId
    where
        F: Fn(DatabaseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: EventCallback =
            Arc::new(move |event| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(callback(event))
            });
        self.add_callback(Some(table), event_type, phase, callback)
    }

    /// Emit event to all matching subscribers, in registration order.
    ///
    /// Stops at the first failing callback. The lock is released before any
    /// callback runs so callbacks may register further callbacks.
    pub async fn emit(&self, event: DatabaseEvent) -> Result<(), EventProcessingError> {
        let matching: Vec<EventCallback> = match self.callbacks.read() {
            Ok(callbacks) => callbacks
                .iter()
                .filter(|registration| registration.matches(&event))
                .map(|registration| registration.callback.clone())
                .collect(),
            Err(_) => Vec::new(),
        };

        for (callback_index, callback) in matching.into_iter().enumerate() {
            if let Err(error) = callback(event.clone()).await {
                return Err(EventProcessingError {
                    callback_index,
                    table_name: event.table_name.clone(),
                    event_type: event.event_type.to_string(),
                    phase: event.phase.to_string(),
                    error,
                });
            }
        }
        Ok(())
    }

    /// Whether any callback listens for this table, event type and phase
    pub fn has_listeners(&self, table: &str, event_type: EventType, phase: EventPhase) -> bool {
        let probe = DatabaseEvent::new(event_type, phase, table);
        self.callbacks
            .read()
            .map(|callbacks| callbacks.iter().any(|r| r.matches(&probe)))
            .unwrap_or(false)
    }

    /// Remove a previously registered callback
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        match self.callbacks.write() {
            Ok(mut callbacks) => {
                let before = callbacks.len();
                callbacks.retain(|registration| registration.id != id);
                callbacks.len() != before
            }
            Err(_) => false,
        }
    }

    /// Clear all callbacks
    pub fn clear_callbacks(&self) {
        if let Ok(mut callbacks) = self.callbacks.write() {
            callbacks.clear();
        }
    }

    /// Get number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.read().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for SignalManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_emit_only_reaches_matching_callbacks() {
        let manager = SignalManager::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        manager.on("person", EventType::Update, EventPhase::Before, move |event| {
            let counter = counter.clone();
            async move {
                assert_eq!(event.record_ids, vec![1, 2]);
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        manager
            .emit(DatabaseEvent::before(EventType::Update, "person").with_record_ids(vec![1, 2]))
            .await
            .unwrap();
        manager
            .emit(DatabaseEvent::before(EventType::Update, "post"))
            .await
            .unwrap();
        manager
            .emit(DatabaseEvent::after(EventType::Update, "person"))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_callback_stops_emit() {
        let manager = SignalManager::new();
        manager.on("person", EventType::Delete, EventPhase::Before, |_| async {
            Err(anyhow::anyhow!("refused"))
        });

        let err = manager
            .emit(DatabaseEvent::before(EventType::Delete, "person"))
            .await
            .unwrap_err();
        assert_eq!(err.table_name, "person");
        assert_eq!(err.callback_index, 0);
        assert!(err.to_string().contains("before delete"));
    }

    #[tokio::test]
    async fn test_global_callback_and_removal() {
        let manager = SignalManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = manager.add_callback(
            None,
            EventType::Insert,
            EventPhase::After,
            Arc::new(move |_: DatabaseEvent| -> BoxFuture<'static, anyhow::Result<()>> {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        assert!(manager.has_listeners("anything", EventType::Insert, EventPhase::After));
        manager
            .emit(DatabaseEvent::after(EventType::Insert, "tag"))
            .await
            .unwrap();
        assert!(manager.remove_callback(id));
        manager
            .emit(DatabaseEvent::after(EventType::Insert, "tag"))
            .await
            .unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(manager.callback_count(), 0);
    }
}
