//! In-memory storage driver
//!
//! Records live in a process-local map; nothing survives a restart. This is
//! the default driver and the one used throughout the test suite.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Labels, ReleaseFilter, StorageDriver, release_labels};
use crate::error::{KubeError, Result};
use crate::release::Release;

/// In-memory storage driver
#[derive(Clone, Default)]
pub struct MemoryDriver {
    /// key -> record
    store: Arc<RwLock<BTreeMap<String, Release>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed, for test assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub lists: usize,
    pub queries: usize,
}

impl MemoryDriver {
    /// Create a new empty driver
    pub fn new() -> Self {
        Self::default()
    }

    /// Get operation counts
    pub async fn operation_counts(&self) -> OperationCounts {
        self.operations.read().await.clone()
    }

    /// Reset operation counts
    pub async fn reset_counts(&self) {
        *self.operations.write().await = OperationCounts::default();
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    async fn count(&self, op: impl FnOnce(&mut OperationCounts)) {
        op(&mut *self.operations.write().await);
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Release> {
        self.count(|ops| ops.gets += 1).await;

        self.store
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| KubeError::ReleaseNotFound {
                key: key.to_string(),
            })
    }

    async fn create(&self, key: &str, release: &Release) -> Result<()> {
        self.count(|ops| ops.creates += 1).await;

        let mut store = self.store.write().await;
        if store.contains_key(key) {
            return Err(KubeError::ReleaseAlreadyExists {
                key: key.to_string(),
            });
        }
        store.insert(key.to_string(), release.clone());
        Ok(())
    }

    async fn update(&self, key: &str, release: &Release) -> Result<()> {
        self.count(|ops| ops.updates += 1).await;

        let mut store = self.store.write().await;
        match store.get_mut(key) {
            Some(existing) => {
                *existing = release.clone();
                Ok(())
            }
            None => Err(KubeError::ReleaseNotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<Release> {
        self.count(|ops| ops.deletes += 1).await;

        self.store
            .write()
            .await
            .remove(key)
            .ok_or_else(|| KubeError::ReleaseNotFound {
                key: key.to_string(),
            })
    }

    async fn list(&self, filter: ReleaseFilter<'_>) -> Result<Vec<Release>> {
        self.count(|ops| ops.lists += 1).await;

        Ok(self
            .store
            .read()
            .await
            .values()
            .filter(|release| filter(release))
            .cloned()
            .collect())
    }

    async fn query(&self, labels: &Labels) -> Result<Vec<Release>> {
        self.count(|ops| ops.queries += 1).await;

        Ok(self
            .store
            .read()
            .await
            .values()
            .filter(|release| release_labels(release).matches(labels))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::Status;
    use crate::storage::{LABEL_NAME, LABEL_STATUS};
    use bosun_core::Chart;
    use semver::Version;

    fn release(name: &str, version: u32, status: Status) -> Release {
        let mut rls = Release::new(name, "default", version, Chart::new(name, Version::new(0, 1, 0)));
        rls.info.status = status;
        rls
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let driver = MemoryDriver::new();
        let rls = release("app", 1, Status::Deployed);

        driver.create("app.default.v1", &rls).await.unwrap();
        assert_eq!(driver.get("app.default.v1").await.unwrap(), rls);
        assert!(driver.get("app.default.v2").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_create_never_overwrites() {
        let driver = MemoryDriver::new();
        let first = release("app", 1, Status::Deployed);
        let second = release("app", 1, Status::Failed);

        driver.create("k", &first).await.unwrap();
        let err = driver.create("k", &second).await.unwrap_err();

        assert!(matches!(err, KubeError::ReleaseAlreadyExists { ref key } if key == "k"));
        assert_eq!(driver.get("k").await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let driver = MemoryDriver::new();
        let mut rls = release("app", 1, Status::Deployed);

        assert!(driver.update("k", &rls).await.unwrap_err().is_not_found());

        driver.create("k", &rls).await.unwrap();
        rls.mark_superseded();
        driver.update("k", &rls).await.unwrap();
        assert_eq!(driver.get("k").await.unwrap().status(), Status::Superseded);
    }

    #[tokio::test]
    async fn test_delete() {
        let driver = MemoryDriver::new();
        driver.create("k", &release("app", 1, Status::Deployed)).await.unwrap();

        let removed = driver.delete("k").await.unwrap();
        assert_eq!(removed.name, "app");
        assert!(driver.is_empty().await);
        assert!(driver.delete("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_and_query() {
        let driver = MemoryDriver::new();
        driver.create("a.v1", &release("a", 1, Status::Superseded)).await.unwrap();
        driver.create("a.v2", &release("a", 2, Status::Deployed)).await.unwrap();
        driver.create("b.v1", &release("b", 1, Status::Deployed)).await.unwrap();

        let deployed = driver.list(&|r: &Release| r.is_deployed()).await.unwrap();
        assert_eq!(deployed.len(), 2);

        let a = driver
            .query(&Labels::new().with(LABEL_NAME, "a").with(LABEL_STATUS, "DEPLOYED"))
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].version, 2);

        let none = driver.query(&Labels::new().with(LABEL_NAME, "zzz")).await.unwrap();
        assert!(none.is_empty());

        let counts = driver.operation_counts().await;
        assert_eq!(counts.creates, 3);
        assert_eq!(counts.lists, 1);
        assert_eq!(counts.queries, 2);
    }
}
