//! Datasource instances keyed by datasource uid.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::ConnectionConfig;
use crate::error::QueryResult;
use crate::store::{Datasource, DatasourceFactory};

/// Uid used when a request names no datasource
pub const DEFAULT_UID: &str = "default";

struct Instance<S> {
    fingerprint: String,
    source: Arc<S>,
}

/// Keeps one datasource per uid and rebuilds it when its settings change.
pub struct InstanceRegistry<F: DatasourceFactory> {
    factory: F,
    instances: Mutex<HashMap<String, Instance<F::Source>>>,
}

impl<F: DatasourceFactory> InstanceRegistry<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// The instance for `uid`, created or replaced to match `config`.
    ///
    /// The successor is visible as soon as it is inserted. The replaced
    /// instance is disposed after the lock is released.
    pub async fn get_or_create(
        &self,
        uid: &str,
        config: ConnectionConfig,
    ) -> QueryResult<Arc<F::Source>> {
        let fingerprint = config.fingerprint();

        let (source, previous) = {
            let mut instances = self.instances.lock().await;
            if let Some(existing) = instances.get(uid) {
                if existing.fingerprint == fingerprint {
                    return Ok(existing.source.clone());
                }
            }

            let source = Arc::new(self.factory.create(config)?);
            let previous = instances.insert(
                uid.to_string(),
                Instance {
                    fingerprint,
                    source: source.clone(),
                },
            );
            (source, previous)
        };

        if let Some(previous) = previous {
            info!("settings changed for datasource {}, replacing instance", uid);
            previous.source.dispose().await;
        }
        Ok(source)
    }

    /// The current instance for `uid`, if one was created
    pub async fn get(&self, uid: &str) -> Option<Arc<F::Source>> {
        self.instances
            .lock()
            .await
            .get(uid)
            .map(|instance| instance.source.clone())
    }

    /// Drop and dispose the instance for `uid`
    pub async fn remove(&self, uid: &str) -> bool {
        let previous = self.instances.lock().await.remove(uid);
        match previous {
            Some(instance) => {
                instance.source.dispose().await;
                true
            }
            None => false,
        }
    }

    /// Dispose every instance
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.instances.lock().await.drain().collect();
        for (uid, instance) in drained {
            info!("disposing datasource {}", uid);
            instance.source.dispose().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.instances.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;

    fn config(database: &str) -> ConnectionConfig {
        ConnectionConfig::from_json(&json!({
            "server": "localhost", "port": "5432", "role": "r",
            "database": database, "metatable": "ktlmeta"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn unchanged_settings_reuse_the_instance() {
        let store = MemoryStore::new();
        let registry = InstanceRegistry::new(store.clone());

        let a = registry.get_or_create("uid-1", config("d")).await.unwrap();
        let b = registry.get_or_create("uid-1", config("d")).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.created(), 1);
        assert_eq!(store.disposed(), 0);
    }

    #[tokio::test]
    async fn changed_settings_dispose_the_old_instance() {
        let store = MemoryStore::new();
        let registry = InstanceRegistry::new(store.clone());

        let a = registry.get_or_create("uid-1", config("d")).await.unwrap();
        let b = registry.get_or_create("uid-1", config("other")).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().database, "other");
        assert_eq!(store.created(), 2);
        assert_eq!(store.disposed(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn uids_are_independent() {
        let store = MemoryStore::new();
        let registry = InstanceRegistry::new(store.clone());

        registry.get_or_create("uid-1", config("d")).await.unwrap();
        registry.get_or_create("uid-2", config("d")).await.unwrap();
        assert_eq!(registry.len().await, 2);

        assert!(registry.remove("uid-1").await);
        assert!(!registry.remove("uid-1").await);
        registry.shutdown().await;

        assert!(registry.is_empty().await);
        assert_eq!(store.disposed(), 2);
    }

    #[tokio::test]
    async fn draining_a_replaced_instance_does_not_block_other_uids() {
        let store = MemoryStore::new();
        let registry = Arc::new(InstanceRegistry::new(store.clone()));

        let old = registry.get_or_create("ds1", config("d")).await.unwrap();
        let held = old.connect().await.unwrap();

        let replacing = tokio::spawn({
            let registry = registry.clone();
            async move { registry.get_or_create("ds1", config("other")).await.is_ok() }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let unrelated = tokio::time::timeout(
            Duration::from_secs(1),
            registry.get_or_create("ds2", config("d")),
        )
        .await;
        assert!(matches!(unrelated, Ok(Ok(_))));

        let current = registry.get("ds1").await.unwrap();
        assert_eq!(current.config().database, "other");
        assert!(!replacing.is_finished());
        assert_eq!(store.disposed(), 0);

        drop(held);
        assert!(replacing.await.unwrap());
        assert_eq!(store.disposed(), 1);
    }
}
