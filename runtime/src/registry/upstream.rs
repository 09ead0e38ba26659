//! Upstream package sources. Cascading tries each configured upstream in
//! priority order until one returns at least one version (`spec.md` §4.5).

use futures::future::BoxFuture;
use serde::Deserialize;

use crate::error::{RuntimeError, RuntimeResult};
use super::version::Version;

#[derive(Debug, Clone)]
pub struct VersionListing {
    pub version: Version,
    pub checksum: Option<String>,
}

pub trait Upstream: Send + Sync {
    fn list_versions<'a>(&'a self, name: &'a str) -> BoxFuture<'a, RuntimeResult<Vec<VersionListing>>>;
    fn fetch<'a>(&'a self, name: &'a str, version: &'a Version) -> BoxFuture<'a, RuntimeResult<Vec<u8>>>;
}

/// An upstream backed entirely by in-memory data, for tests and for hosts
/// that embed a fixed package set.
#[derive(Default)]
pub struct InMemoryUpstream {
    packages: dashmap::DashMap<String, Vec<(VersionListing, Vec<u8>)>>,
}

impl InMemoryUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, name: &str, version: Version, checksum: Option<String>, tarball: Vec<u8>) {
        self.packages
            .entry(name.to_string())
            .or_default()
            .push((VersionListing { version, checksum }, tarball));
    }
}

impl Upstream for InMemoryUpstream {
    fn list_versions<'a>(&'a self, name: &'a str) -> BoxFuture<'a, RuntimeResult<Vec<VersionListing>>> {
        let result = self
            .packages
            .get(name)
            .map(|entries| entries.iter().map(|(listing, _)| listing.clone()).collect())
            .unwrap_or_default();
        Box::pin(async move { Ok(result) })
    }

    fn fetch<'a>(&'a self, name: &'a str, version: &'a Version) -> BoxFuture<'a, RuntimeResult<Vec<u8>>> {
        let found = self.packages.get(name).and_then(|entries| {
            entries
                .iter()
                .find(|(listing, _)| &listing.version == version)
                .map(|(_, bytes)| bytes.clone())
        });
        Box::pin(async move {
            found.ok_or_else(|| RuntimeError::registry(format!("package not found: {name}@{version}")))
        })
    }
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    version: String,
    #[serde(default)]
    checksum: Option<String>,
}

/// An HTTP upstream: lists versions from a JSON index endpoint and fetches
/// tarballs from a templated URL. `{name}`/`{version}` are substituted into
/// the configured templates (`SPEC_FULL.md` §4.5).
pub struct HttpUpstream {
    client: reqwest::Client,
    index_url_template: String,
    tarball_url_template: String,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, index_url_template: String, tarball_url_template: String) -> Self {
        Self { client, index_url_template, tarball_url_template }
    }

    fn index_url(&self, name: &str) -> String {
        self.index_url_template.replace("{name}", name)
    }

    fn tarball_url(&self, name: &str, version: &Version) -> String {
        self.tarball_url_template.replace("{name}", name).replace("{version}", &version.to_string())
    }
}

impl Upstream for HttpUpstream {
    fn list_versions<'a>(&'a self, name: &'a str) -> BoxFuture<'a, RuntimeResult<Vec<VersionListing>>> {
        Box::pin(async move {
            let url = self.index_url(name);
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| RuntimeError::transport(format!("upstream index fetch failed: {e}")))?;
            let entries: Vec<IndexEntry> = resp
                .json()
                .await
                .map_err(|e| RuntimeError::transport(format!("upstream index malformed: {e}")))?;
            entries
                .into_iter()
                .map(|e| Version::parse(&e.version).map(|version| VersionListing { version, checksum: e.checksum }))
                .collect::<Result<Vec<_>, String>>()
                .map_err(RuntimeError::registry)
        })
    }

    fn fetch<'a>(&'a self, name: &'a str, version: &'a Version) -> BoxFuture<'a, RuntimeResult<Vec<u8>>> {
        Box::pin(async move {
            let url = self.tarball_url(name, version);
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| RuntimeError::transport(format!("upstream tarball fetch failed: {e}")))?;
            resp.bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| RuntimeError::transport(format!("upstream tarball read failed: {e}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_upstream_lists_published_versions() {
        let upstream = InMemoryUpstream::new();
        upstream.publish("demo", Version::new(1, 0, 0), None, vec![1, 2, 3]);
        let listings = upstream.list_versions("demo").await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].version, Version::new(1, 0, 0));
    }

    #[tokio::test]
    async fn fetching_an_unpublished_version_is_a_registry_error() {
        let upstream = InMemoryUpstream::new();
        let err = upstream.fetch("demo", &Version::new(1, 0, 0)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Registry(_)));
    }
}
