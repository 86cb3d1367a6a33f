//! Release store: the keying scheme and release-domain queries over a driver
//!
//! Release names may be qualified as `namespace/name`. A record is stored
//! under `<identity>.v<version>` where the identity is `name.namespace`, or
//! just `name` when the namespace is empty.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    LABEL_NAME, LABEL_NAMESPACE, LABEL_OWNER, LABEL_STATUS, Labels, OWNER, ReleaseFilter,
    StorageDriver,
};
use crate::error::{KubeError, Result};
use crate::release::{Release, Status, sort_by_revision, status_filter};

/// Split a possibly qualified release name into `(namespace, name)`
///
/// `"ns/web"` yields `("ns", "web")` and `"web"` yields `("", "web")`. With
/// more than one `/` only the last segment is kept, as the name, and the
/// namespace is empty.
pub fn split_name(name: &str) -> (&str, &str) {
    let parts: Vec<&str> = name.split('/').collect();
    match parts.as_slice() {
        [namespace, name] => (*namespace, *name),
        [.., last] => ("", *last),
        [] => ("", ""),
    }
}

/// Identity key for a release
fn key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", name, namespace)
    }
}

/// Full storage key for one revision
fn make_key(identity: &str, version: u32) -> String {
    format!("{}.v{}", identity, version)
}

/// Storage key of a record, using the record's own namespace
fn key_for_release(release: &Release) -> String {
    let (_, name) = split_name(&release.name);
    make_key(&key(&release.namespace, name), release.version)
}

/// The record as it should be persisted: name stripped of any qualifier
fn normalized(release: &Release) -> Cow<'_, Release> {
    let (_, name) = split_name(&release.name);
    if name == release.name {
        Cow::Borrowed(release)
    } else {
        let mut owned = release.clone();
        owned.name = name.to_string();
        Cow::Owned(owned)
    }
}

/// Release store
#[derive(Clone)]
pub struct Storage {
    driver: Arc<dyn StorageDriver>,
    /// Revisions kept per release; 0 keeps everything
    max_history: usize,
}

impl Storage {
    pub fn new(driver: impl StorageDriver + 'static) -> Self {
        Self::from_driver(Arc::new(driver))
    }

    pub fn from_driver(driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            driver,
            max_history: 0,
        }
    }

    /// Keep at most `max` revisions per release; older ones are pruned after
    /// each successful create
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    pub fn driver(&self) -> &dyn StorageDriver {
        self.driver.as_ref()
    }

    /// Fetch one revision of a (possibly qualified) release
    pub async fn get(&self, name: &str, version: u32) -> Result<Release> {
        let (namespace, name) = split_name(name);
        let key = make_key(&key(namespace, name), version);
        debug!(%key, driver = self.driver.name(), "getting release");
        self.driver.get(&key).await
    }

    /// Persist a new revision; a duplicate `(namespace, name, version)` fails
    /// with `ReleaseAlreadyExists`
    pub async fn create(&self, release: &Release) -> Result<()> {
        let key = key_for_release(release);
        debug!(%key, driver = self.driver.name(), "creating release");
        let record = normalized(release);
        self.driver.create(&key, &record).await?;

        if self.max_history > 0
            && let Err(e) = self.prune_history(&record).await
        {
            warn!(%key, error = %e, "failed to prune release history");
        }
        Ok(())
    }

    /// Replace an existing revision; fails with `ReleaseNotFound` if absent
    pub async fn update(&self, release: &Release) -> Result<()> {
        let key = key_for_release(release);
        debug!(%key, driver = self.driver.name(), "updating release");
        self.driver.update(&key, &normalized(release)).await
    }

    /// Remove one revision, returning it
    pub async fn delete(&self, name: &str, version: u32) -> Result<Release> {
        let (namespace, name) = split_name(name);
        let key = make_key(&key(namespace, name), version);
        debug!(%key, driver = self.driver.name(), "deleting release");
        self.driver.delete(&key).await
    }

    /// Every stored record
    pub async fn list_releases(&self) -> Result<Vec<Release>> {
        debug!("listing all releases in storage");
        self.driver.list(&|_: &Release| true).await
    }

    /// Records in `DELETED` status
    pub async fn list_deleted(&self) -> Result<Vec<Release>> {
        debug!("listing deleted releases in storage");
        self.driver.list(&status_filter(Status::Deleted)).await
    }

    /// Records in `DEPLOYED` status
    pub async fn list_deployed(&self) -> Result<Vec<Release>> {
        debug!("listing deployed releases in storage");
        self.driver.list(&status_filter(Status::Deployed)).await
    }

    /// Records matching every filter
    pub async fn list_filter_all(&self, filters: &[ReleaseFilter<'_>]) -> Result<Vec<Release>> {
        debug!(filters = filters.len(), "listing releases matching all filters");
        self.driver
            .list(&|release: &Release| filters.iter().all(|f| f(release)))
            .await
    }

    /// Records matching at least one filter
    pub async fn list_filter_any(&self, filters: &[ReleaseFilter<'_>]) -> Result<Vec<Release>> {
        debug!(filters = filters.len(), "listing releases matching any filter");
        self.driver
            .list(&|release: &Release| filters.iter().any(|f| f(release)))
            .await
    }

    /// The deployed revision of a release
    ///
    /// Several deployed revisions mean an interrupted upgrade. Rather than
    /// whichever record the driver lists first, the highest revision is
    /// returned, and the anomaly is logged.
    pub async fn deployed(&self, name: &str) -> Result<Release> {
        let (namespace, short) = split_name(name);
        debug!(key = %key(namespace, short), "getting deployed release from history");

        let query = identity_labels(namespace, short).with(LABEL_STATUS, Status::Deployed.as_str());
        let mut found = self.driver.query(&query).await?;

        if found.len() > 1 {
            let versions: Vec<u32> = found.iter().map(|r| r.version).collect();
            warn!(release = %key(namespace, short), ?versions, "multiple deployed revisions");
        }

        sort_by_revision(&mut found);
        found.pop().ok_or_else(|| KubeError::NoDeployedRelease {
            name: short.to_string(),
        })
    }

    /// Every stored revision of a release, oldest first
    pub async fn history(&self, name: &str) -> Result<Vec<Release>> {
        let (namespace, short) = split_name(name);
        debug!(key = %key(namespace, short), "getting release history");

        let mut history = self.driver.query(&identity_labels(namespace, short)).await?;
        sort_by_revision(&mut history);
        Ok(history)
    }

    /// The highest revision of a release, whatever its status
    pub async fn last(&self, name: &str) -> Result<Release> {
        let (namespace, short) = split_name(name);
        debug!(key = %key(namespace, short), "getting last revision");

        self.history(name)
            .await?
            .pop()
            .ok_or_else(|| KubeError::NoRevision {
                name: name.to_string(),
            })
    }

    /// Delete the oldest revisions beyond `max_history`
    ///
    /// The newest revision and any deployed revision are never removed.
    async fn prune_history(&self, release: &Release) -> Result<()> {
        let mut history = self
            .driver
            .query(&identity_labels(&release.namespace, &release.name))
            .await?;
        sort_by_revision(&mut history);

        let Some(newest) = history.last().map(|r| r.version) else {
            return Ok(());
        };

        let mut excess = history.len().saturating_sub(self.max_history);
        for old in &history {
            if excess == 0 {
                break;
            }
            if old.version == newest || old.is_deployed() {
                continue;
            }
            let key = make_key(&key(&old.namespace, &old.name), old.version);
            debug!(%key, "pruning release history");
            self.driver.delete(&key).await?;
            excess -= 1;
        }
        Ok(())
    }
}

fn identity_labels(namespace: &str, name: &str) -> Labels {
    Labels::new()
        .with(LABEL_NAME, name)
        .with(LABEL_NAMESPACE, namespace)
        .with(LABEL_OWNER, OWNER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDriver;
    use bosun_core::Chart;
    use semver::Version;

    fn release(name: &str, namespace: &str, version: u32, status: Status) -> Release {
        let mut rls = Release::new(name, namespace, version, Chart::new("app", Version::new(1, 0, 0)));
        rls.info.status = status;
        rls
    }

    fn storage() -> (Storage, MemoryDriver) {
        let driver = MemoryDriver::new();
        (Storage::new(driver.clone()), driver)
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("web"), ("", "web"));
        assert_eq!(split_name("prod/web"), ("prod", "web"));
        assert_eq!(split_name("a/b/c"), ("", "c"));
        assert_eq!(split_name(""), ("", ""));
    }

    #[test]
    fn test_keys() {
        assert_eq!(make_key(&key("", "web"), 3), "web.v3");
        assert_eq!(make_key(&key("prod", "web"), 3), "web.prod.v3");

        let rls = release("prod/web", "prod", 7, Status::Unknown);
        assert_eq!(key_for_release(&rls), "web.prod.v7");
    }

    #[test]
    fn test_keys_are_distinct() {
        let mut keys = std::collections::HashSet::new();
        for ns in ["", "prod", "dev"] {
            for name in ["web", "api", "web-2"] {
                for version in 1..=12 {
                    assert!(keys.insert(make_key(&key(ns, name), version)));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let (storage, driver) = storage();
        let rls = release("web", "prod", 1, Status::Deployed);

        storage.create(&rls).await.unwrap();
        assert_eq!(storage.get("prod/web", 1).await.unwrap(), rls);
        assert!(driver.get("web.prod.v1").await.is_ok());
    }

    #[tokio::test]
    async fn test_create_normalizes_qualified_name() {
        let (storage, driver) = storage();
        storage
            .create(&release("prod/web", "prod", 1, Status::Deployed))
            .await
            .unwrap();

        let stored = driver.get("web.prod.v1").await.unwrap();
        assert_eq!(stored.name, "web");
    }

    #[tokio::test]
    async fn test_duplicate_create_fails_without_mutation() {
        let (storage, _) = storage();
        let original = release("web", "", 1, Status::Deployed);
        storage.create(&original).await.unwrap();

        let err = storage
            .create(&release("web", "", 1, Status::Failed))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(storage.get("web", 1).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let (storage, _) = storage();
        let rls = release("web", "", 1, Status::Deployed);

        assert!(storage.update(&rls).await.unwrap_err().is_not_found());
        assert!(storage.delete("web", 1).await.unwrap_err().is_not_found());

        storage.create(&rls).await.unwrap();
        let removed = storage.delete("web", 1).await.unwrap();
        assert_eq!(removed, rls);
        assert!(storage.get("web", 1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_listings() {
        let (storage, _) = storage();
        storage.create(&release("a", "", 1, Status::Superseded)).await.unwrap();
        storage.create(&release("a", "", 2, Status::Deployed)).await.unwrap();
        storage.create(&release("b", "", 1, Status::Deleted)).await.unwrap();
        storage.create(&release("c", "", 1, Status::Failed)).await.unwrap();

        assert_eq!(storage.list_releases().await.unwrap().len(), 4);
        assert_eq!(storage.list_deployed().await.unwrap()[0].name, "a");
        assert_eq!(storage.list_deleted().await.unwrap()[0].name, "b");

        let named_a = |r: &Release| r.name == "a";
        let failed = status_filter(Status::Failed);
        let deployed = status_filter(Status::Deployed);

        let all = storage.list_filter_all(&[&named_a, &deployed]).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version, 2);

        let any = storage.list_filter_any(&[&failed, &deployed]).await.unwrap();
        let mut names: Vec<&str> = any.iter().map(|r| r.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_deployed() {
        let (storage, _) = storage();

        let err = storage.deployed("web").await.unwrap_err();
        assert!(matches!(err, KubeError::NoDeployedRelease { ref name } if name == "web"));

        storage.create(&release("web", "", 1, Status::Superseded)).await.unwrap();
        storage.create(&release("web", "", 2, Status::Deployed)).await.unwrap();
        storage.create(&release("web", "prod", 1, Status::Deployed)).await.unwrap();

        assert_eq!(storage.deployed("web").await.unwrap().version, 2);
        assert_eq!(storage.deployed("prod/web").await.unwrap().namespace, "prod");
    }

    #[tokio::test]
    async fn test_deployed_with_two_deployed_revisions() {
        let (storage, _) = storage();
        storage.create(&release("web", "", 1, Status::Deployed)).await.unwrap();
        storage.create(&release("web", "", 2, Status::Deployed)).await.unwrap();

        let deployed = storage.deployed("web").await.unwrap();
        assert_eq!(deployed.version, 2);
    }

    #[tokio::test]
    async fn test_history_and_last() {
        let (storage, _) = storage();
        assert!(storage.history("web").await.unwrap().is_empty());
        assert!(matches!(
            storage.last("web").await.unwrap_err(),
            KubeError::NoRevision { .. }
        ));

        for (version, status) in [(1, Status::Superseded), (3, Status::Failed), (2, Status::Deployed)] {
            storage.create(&release("web", "", version, status)).await.unwrap();
        }
        storage.create(&release("other", "", 9, Status::Deployed)).await.unwrap();

        let history = storage.history("web").await.unwrap();
        let versions: Vec<u32> = history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);

        let last = storage.last("web").await.unwrap();
        assert_eq!(last.version, 3);
        assert_eq!(last.status(), Status::Failed);
    }

    #[tokio::test]
    async fn test_max_history_prunes_oldest() {
        let driver = MemoryDriver::new();
        let storage = Storage::new(driver.clone()).with_max_history(2);

        storage.create(&release("web", "", 1, Status::Superseded)).await.unwrap();
        storage.create(&release("web", "", 2, Status::Deployed)).await.unwrap();
        storage.create(&release("web", "", 3, Status::Failed)).await.unwrap();
        storage.create(&release("web", "", 4, Status::Failed)).await.unwrap();

        let versions: Vec<u32> = storage
            .history("web")
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![2, 4]);
    }
}
