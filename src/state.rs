use crate::{
    config::Config,
    redis_client::RedisClient,
    services::{BatchStore, BatchingPolicy, ChatService, HistoryService},
    storage::BatchRepository,
    websocket::{pubsub::ListenerHealth, ConnectionRegistry, Fanout},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub history: HistoryService,
    pub registry: ConnectionRegistry,
    /// Shared with the `chat:*` listener task when Redis is configured
    pub fanout_listener: ListenerHealth,
}

impl AppState {
    /// Wire services over a storage backend and an optional Redis fan-out.
    pub fn new(
        config: &Config,
        repo: Arc<dyn BatchRepository>,
        redis: Option<RedisClient>,
    ) -> Self {
        let store = BatchStore::new(repo, BatchingPolicy::from(&config.batching), &config.storage);
        let registry = ConnectionRegistry::new();
        let fanout_listener = ListenerHealth::default();
        let fanout = match redis {
            Some(redis) => Fanout::with_remote(
                registry.clone(),
                Arc::new(redis),
                fanout_listener.clone(),
                config.fanout.publish_timeout(),
            ),
            None => Fanout::local(registry.clone()),
        };

        Self {
            chat: ChatService::new(store.clone(), fanout),
            history: HistoryService::new(store, config.listing.clone()),
            registry,
            fanout_listener,
        }
    }
}
