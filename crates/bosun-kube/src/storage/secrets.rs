//! Kubernetes Secrets storage driver
//!
//! Each record is one Secret named `bosun.release.v1.<key>` in the storage
//! namespace. The index labels are copied onto the Secret (lowercased) so
//! that queries become label selectors evaluated by the API server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use tracing::warn;

use super::{
    CompressionMethod, LABEL_OWNER, Labels, OWNER, ReleaseFilter, StorageDriver,
    decode_from_storage, encode_for_storage, release_labels,
};
use crate::error::{KubeError, Result};
use crate::release::Release;

/// Namespace holding release Secrets unless configured otherwise
pub const DEFAULT_STORAGE_NAMESPACE: &str = "kube-system";

const SECRET_PREFIX: &str = "bosun.release.v1.";
const SECRET_TYPE: &str = "bosun.io/release.v1";
const DATA_KEY: &str = "release";
const COMPRESSION_LABEL: &str = "bosun.io/compression";

/// Kubernetes Secrets storage driver
pub struct SecretsDriver {
    client: Client,
    namespace: String,
    compression: CompressionMethod,
}

impl SecretsDriver {
    /// Create a driver using the default kubeconfig
    pub async fn new(namespace: impl Into<String>, compression: CompressionMethod) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::with_client(client, namespace, compression))
    }

    /// Create with an existing client
    pub fn with_client(
        client: Client,
        namespace: impl Into<String>,
        compression: CompressionMethod,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            compression,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn select(&self, selector: &str) -> Result<Vec<Release>> {
        let secrets = self.api().list(&ListParams::default().labels(selector)).await?;

        let mut releases = Vec::with_capacity(secrets.items.len());
        for secret in &secrets.items {
            match parse_secret(secret) {
                Ok(release) => releases.push(release),
                Err(e) => warn!(
                    secret = secret.metadata.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "skipping unreadable release secret"
                ),
            }
        }
        Ok(releases)
    }
}

/// Secret name for a storage key
pub fn secret_name(key: &str) -> String {
    format!("{SECRET_PREFIX}{key}")
}

/// Label selector equivalent to an exact-match label query
pub fn label_selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k.to_ascii_lowercase(), v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the Secret persisting `release` under `key`
pub fn build_secret(
    key: &str,
    namespace: &str,
    release: &Release,
    compression: CompressionMethod,
) -> Result<Secret> {
    let encoded = encode_for_storage(release, compression)?;

    let mut labels: BTreeMap<String, String> = release_labels(release)
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();
    labels.insert(COMPRESSION_LABEL.to_string(), compression.as_str().to_string());

    let mut data = BTreeMap::new();
    data.insert(DATA_KEY.to_string(), ByteString(encoded.into_bytes()));

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(key)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE.to_string()),
        data: Some(data),
        ..Default::default()
    })
}

/// Decode the record held by a release Secret
pub fn parse_secret(secret: &Secret) -> Result<Release> {
    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(DATA_KEY))
        .ok_or_else(|| KubeError::Storage("Secret missing 'release' data".to_string()))?;

    let encoded = std::str::from_utf8(&data.0)
        .map_err(|e| KubeError::Storage(format!("Invalid UTF-8 in secret: {}", e)))?;

    // Records written before a compression change keep their own label
    let compression = secret
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(COMPRESSION_LABEL))
        .and_then(|c| CompressionMethod::from_name(c))
        .unwrap_or_default();

    decode_from_storage(encoded, compression)
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == code)
}

#[async_trait]
impl StorageDriver for SecretsDriver {
    fn name(&self) -> &'static str {
        "secrets"
    }

    async fn get(&self, key: &str) -> Result<Release> {
        match self.api().get(&secret_name(key)).await {
            Ok(secret) => parse_secret(&secret),
            Err(e) if is_status(&e, 404) => Err(KubeError::ReleaseNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self, key: &str, release: &Release) -> Result<()> {
        let secret = build_secret(key, &self.namespace, release, self.compression)?;

        // The API server rejects a duplicate name atomically
        match self.api().create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 409) => Err(KubeError::ReleaseAlreadyExists {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, key: &str, release: &Release) -> Result<()> {
        let secret = build_secret(key, &self.namespace, release, self.compression)?;

        match self
            .api()
            .replace(&secret_name(key), &PostParams::default(), &secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(KubeError::ReleaseNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<Release> {
        let release = self.get(key).await?;

        match self
            .api()
            .delete(&secret_name(key), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(release),
            Err(e) if is_status(&e, 404) => Err(KubeError::ReleaseNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, filter: ReleaseFilter<'_>) -> Result<Vec<Release>> {
        let owned = label_selector(&Labels::new().with(LABEL_OWNER, OWNER));
        let mut releases = self.select(&owned).await?;
        releases.retain(|release| filter(release));
        Ok(releases)
    }

    async fn query(&self, labels: &Labels) -> Result<Vec<Release>> {
        self.select(&label_selector(labels)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LABEL_NAME, LABEL_STATUS};
    use bosun_core::Chart;
    use semver::Version;

    fn release() -> Release {
        let mut rls = Release::new("web", "prod", 3, Chart::new("web", Version::new(1, 2, 0)));
        rls.manifest = "apiVersion: v1\nkind: Service\n".to_string();
        rls.mark_deployed("Upgrade complete");
        rls
    }

    #[test]
    fn test_secret_name() {
        assert_eq!(secret_name("web.prod.v3"), "bosun.release.v1.web.prod.v3");
    }

    #[test]
    fn test_label_selector() {
        let labels = Labels::new()
            .with(LABEL_NAME, "web")
            .with(LABEL_STATUS, "DEPLOYED")
            .with(LABEL_OWNER, OWNER);
        assert_eq!(label_selector(&labels), "name=web,owner=BOSUN,status=DEPLOYED");
        assert_eq!(label_selector(&Labels::new()), "");
    }

    #[test]
    fn test_build_secret() {
        let secret = build_secret("web.prod.v3", "kube-system", &release(), CompressionMethod::default()).unwrap();

        assert_eq!(secret.metadata.name.as_deref(), Some("bosun.release.v1.web.prod.v3"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("kube-system"));
        assert_eq!(secret.type_.as_deref(), Some(SECRET_TYPE));

        let labels = secret.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("name").map(String::as_str), Some("web"));
        assert_eq!(labels.get("namespace").map(String::as_str), Some("prod"));
        assert_eq!(labels.get("owner").map(String::as_str), Some("BOSUN"));
        assert_eq!(labels.get("status").map(String::as_str), Some("DEPLOYED"));
        assert_eq!(labels.get("version").map(String::as_str), Some("3"));
        assert_eq!(labels.get(COMPRESSION_LABEL).map(String::as_str), Some("zstd"));
    }

    #[test]
    fn test_parse_secret() {
        let rls = release();
        for method in [CompressionMethod::None, CompressionMethod::Gzip { level: 6 }] {
            let secret = build_secret("web.prod.v3", "kube-system", &rls, method).unwrap();
            assert_eq!(parse_secret(&secret).unwrap(), rls);
        }
    }

    #[test]
    fn test_parse_secret_without_data() {
        let err = parse_secret(&Secret::default()).unwrap_err();
        assert!(matches!(err, KubeError::Storage(_)));
    }
}
