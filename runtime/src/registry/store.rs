//! Local package storage: the "locally cached" side of `require`'s
//! resolution pipeline (`spec.md` §4.5), concretised as an on-disk
//! `packages/<name>/<version>/` layout (`SPEC_FULL.md` §4.5).

use std::collections::BTreeMap;
use std::path::PathBuf;

use dashmap::DashMap;

use super::package::{Package, PackageMeta};
use super::version::Version;
use crate::error::RuntimeResult;

pub trait PackageStore: Send + Sync {
    fn get(&self, name: &str, version: &Version) -> Option<Package>;
    fn put(&self, pkg: &Package) -> RuntimeResult<()>;
    fn list_versions(&self, name: &str) -> Vec<Version>;
}

#[derive(Default)]
pub struct InMemoryPackageStore {
    table: DashMap<(String, String), Package>,
}

impl InMemoryPackageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PackageStore for InMemoryPackageStore {
    fn get(&self, name: &str, version: &Version) -> Option<Package> {
        self.table.get(&(name.to_string(), version.to_string())).map(|e| e.value().clone())
    }

    fn put(&self, pkg: &Package) -> RuntimeResult<()> {
        let key = (pkg.meta.name.clone(), pkg.meta.version.to_string());
        self.table.insert(key, pkg.clone());
        Ok(())
    }

    fn list_versions(&self, name: &str) -> Vec<Version> {
        self.table
            .iter()
            .filter(|e| e.key().0 == name)
            .filter_map(|e| Version::parse(&e.key().1).ok())
            .collect()
    }
}

/// An on-disk store rooted at a configured directory. Each package version
/// is written as `<root>/<name>/<version>/pkg.json` plus its other files.
pub struct FsPackageStore {
    root: PathBuf,
}

impl FsPackageStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn dir_for(&self, name: &str, version: &Version) -> PathBuf {
        self.root.join(name).join(version.to_string())
    }
}

impl PackageStore for FsPackageStore {
    fn get(&self, name: &str, version: &Version) -> Option<Package> {
        let dir = self.dir_for(name, version);
        let pkg_json = std::fs::read(dir.join("pkg.json")).ok()?;
        let meta = PackageMeta::from_json(&pkg_json).ok()?;

        let mut files = BTreeMap::new();
        let mut stack = vec![dir.clone()];
        while let Some(current) = stack.pop() {
            let entries = std::fs::read_dir(&current).ok()?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&dir) {
                    let bytes = std::fs::read(&path).ok()?;
                    files.insert(rel.to_string_lossy().replace('\\', "/"), bytes);
                }
            }
        }

        let entry_bytes = files.get(&meta.entry)?;
        let entry_source = String::from_utf8(entry_bytes.clone()).ok()?;
        Some(Package { meta, entry_source, files })
    }

    fn put(&self, pkg: &Package) -> RuntimeResult<()> {
        let dir = self.dir_for(&pkg.meta.name, &pkg.meta.version);
        std::fs::create_dir_all(&dir)?;
        for (path, bytes) in &pkg.files {
            let dest = dir.join(path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(dest, bytes)?;
        }
        Ok(())
    }

    fn list_versions(&self, name: &str) -> Vec<Version> {
        let Ok(entries) = std::fs::read_dir(self.root.join(name)) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().and_then(|s| Version::parse(s).ok()))
            .collect()
    }
}
