// Stream registry: one mutex-guarded map from key to stream handle

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::log::Logger;

use super::{spawn_stream_actor, StreamEngineConfig, StreamHandle};

/// Process-wide registry of live streams, consulted only at
/// admission and removal, never on the packet hot path
pub struct StreamRegistry {
    config: StreamEngineConfig,
    logger: Arc<Logger>,
    streams: Mutex<HashMap<String, StreamHandle>>,
}

impl StreamRegistry {
    /// Creates an empty registry
    pub fn new(config: StreamEngineConfig, logger: Arc<Logger>) -> Arc<StreamRegistry> {
        Arc::new(StreamRegistry {
            config,
            logger,
            streams: Mutex::new(HashMap::new()),
        })
    }

    /// Engine configuration shared by all streams
    pub fn config(&self) -> &StreamEngineConfig {
        &self.config
    }

    /// Gets the stream for a key, creating its actor lazily
    pub async fn get_or_create(self: &Arc<Self>, key: &str) -> StreamHandle {
        let mut streams = self.streams.lock().await;

        if let Some(handle) = streams.get(key) {
            return handle.clone();
        }

        let registry = Arc::downgrade(self);

        let handle = spawn_stream_actor(
            key.to_string(),
            self.config.clone(),
            move |exited_key| {
                // Remove the stream once its actor stops
                if let Some(registry) = registry.upgrade() {
                    tokio::spawn(async move {
                        registry.remove(&exited_key).await;
                    });
                }
            },
            self.logger.make_child_logger("[STREAM] "),
        );

        streams.insert(key.to_string(), handle.clone());

        handle
    }

    /// Gets the stream for a key, if it exists
    pub async fn get(&self, key: &str) -> Option<StreamHandle> {
        let streams = self.streams.lock().await;

        streams.get(key).cloned()
    }

    /// Removes a stream by key
    pub async fn remove(&self, key: &str) {
        let mut streams = self.streams.lock().await;

        streams.remove(key);
    }

    /// Number of live streams
    pub async fn count(&self) -> usize {
        let streams = self.streams.lock().await;

        streams.len()
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = StreamRegistry::new(
            StreamEngineConfig::default(),
            Arc::new(Logger::new_disabled()),
        );

        let first = registry.get_or_create("live/cam1").await;
        let second = registry.get_or_create("live/cam1").await;

        assert_eq!(first.key, second.key);
        assert_eq!(registry.count().await, 1);

        registry.get_or_create("live/cam2").await;

        assert_eq!(registry.count().await, 2);

        registry.remove("live/cam1").await;

        assert_eq!(registry.count().await, 1);
        assert!(registry.get("live/cam1").await.is_none());
    }
}
