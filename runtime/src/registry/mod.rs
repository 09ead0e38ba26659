//! Module registry and `require` (`spec.md` §4.5).
//!
//! The resolution pipeline: check the script-visible `__loaded` cache,
//! detect cycles via an in-progress set, check the bytecode cache, else
//! resolve a package (local store, else cascading upstreams), verify its
//! checksum, compile its entry source, and execute it. Nothing here is
//! process-global (`spec.md` §9) — one `ModuleRegistry` belongs to one
//! Runtime.

pub mod package;
pub mod store;
pub mod upstream;
pub mod version;

pub use package::{Package, PackageKind, PackageMeta};
pub use store::PackageStore;
pub use upstream::{Upstream, VersionListing};
pub use version::{Constraint, Version};

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use mlua::{Lua, MultiValue, Table};
use parking_lot::Mutex;

use crate::error::{RuntimeError, RuntimeResult};
use crate::vm::{self, OptLevel};

/// Split a module reference into `(name, constraint)` (`spec.md` §4.5):
/// trim, then split at the *last* `@` that isn't at position 0.
pub fn parse_ref(raw: &str) -> (String, String) {
    let trimmed = raw.trim();
    match trimmed.rfind('@') {
        Some(0) | None => (trimmed.to_string(), String::new()),
        Some(idx) => (trimmed[..idx].to_string(), trimmed[idx + 1..].to_string()),
    }
}

/// Path-safety: reject empty, absolute, or `..`-containing names.
pub fn validate_name(name: &str) -> RuntimeResult<()> {
    if name.is_empty() {
        return Err(RuntimeError::registry("module name must not be empty"));
    }
    if name.starts_with('/') {
        return Err(RuntimeError::registry("module name must not be absolute"));
    }
    if name.split('/').any(|c| c == "..") {
        return Err(RuntimeError::registry("module name must not contain .."));
    }
    Ok(())
}

/// RAII guard removing a name from the in-progress set on drop, guaranteeing
/// cleanup on every exit path (including errors and panics unwinding through
/// a Lua call) (`spec.md` §4.5 step 4).
struct InProgressGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> Drop for InProgressGuard<'a> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.name);
    }
}

pub struct ModuleRegistry {
    store: Arc<dyn PackageStore>,
    upstreams: Vec<Arc<dyn Upstream>>,
    bytecode_cache: DashMap<String, Vec<u8>>,
    in_progress: Mutex<HashSet<String>>,
}

impl ModuleRegistry {
    pub fn new(store: Arc<dyn PackageStore>, upstreams: Vec<Arc<dyn Upstream>>) -> Self {
        Self {
            store,
            upstreams,
            bytecode_cache: DashMap::new(),
            in_progress: Mutex::new(HashSet::new()),
        }
    }

    /// Resolve `name`/`constraint` to a stored package: local store first,
    /// then cascade through upstreams in priority order, accepting the
    /// first that returns at least one version (`spec.md` §4.5 step 5).
    async fn resolve_package(&self, name: &str, constraint_raw: &str) -> RuntimeResult<Package> {
        let constraint = Constraint::parse(constraint_raw).map_err(RuntimeError::registry)?;

        let mut local_versions = self.store.list_versions(name);
        local_versions.sort();
        if let Some(best) = local_versions.into_iter().filter(|v| constraint.matches(v)).next_back() {
            if let Some(pkg) = self.store.get(name, &best) {
                return Ok(pkg);
            }
        }

        for upstream in &self.upstreams {
            let listings = upstream.list_versions(name).await?;
            if listings.is_empty() {
                continue;
            }
            let mut candidates: Vec<&VersionListing> =
                listings.iter().filter(|l| constraint.matches(&l.version)).collect();
            candidates.sort_by(|a, b| a.version.cmp(&b.version));
            let Some(chosen) = candidates.into_iter().next_back() else {
                return Err(RuntimeError::registry(format!(
                    "no version of {name} satisfies constraint {constraint_raw}"
                )));
            };

            let tarball = upstream.fetch(name, &chosen.version).await?;
            package::verify_checksum(&tarball, chosen.checksum.as_deref())?;
            let pkg = package::parse_tarball(&tarball)?;
            self.store.put(&pkg)?;
            return Ok(pkg);
        }

        Err(RuntimeError::registry(format!("package not found: {name}")))
    }

    /// `require(ref)`, returning the two-tuple the script sees: `(value,
    /// nil)` on success, `(nil, message)` on failure. Never throws
    /// (`spec.md` §4.5 failure semantics).
    pub async fn require(&self, lua: &Lua, loaded: &Table, raw_ref: &str) -> (mlua::Value, Option<String>) {
        let (name, constraint) = parse_ref(raw_ref);

        if let Err(e) = validate_name(&name) {
            return (mlua::Value::Nil, Some(e.message()));
        }

        if let Ok(cached) = loaded.get::<_, mlua::Value>(name.as_str()) {
            if !matches!(cached, mlua::Value::Nil) {
                return (cached, None);
            }
        }

        {
            let mut in_progress = self.in_progress.lock();
            if in_progress.contains(&name) {
                return (mlua::Value::Nil, Some(format!("cyclic dependency detected: {name}")));
            }
            in_progress.insert(name.clone());
        }
        let _guard = InProgressGuard { set: &self.in_progress, name: name.clone() };

        let bytecode = if let Some(cached) = self.bytecode_cache.get(&name) {
            cached.clone()
        } else {
            let pkg = match self.resolve_package(&name, &constraint).await {
                Ok(pkg) => pkg,
                Err(e) => return (mlua::Value::Nil, Some(e.message())),
            };
            let bytes = vm::compile_bytes(&pkg.entry_source, OptLevel::O2);
            self.bytecode_cache.insert(name.clone(), bytes.clone());
            bytes
        };

        let func = match vm::load_bytecode(lua, &bytecode, &name) {
            Ok(f) => f,
            Err(e) => return (mlua::Value::Nil, Some(e.message())),
        };

        let result: Result<MultiValue, mlua::Error> = func.call(());
        let value = match result {
            Ok(values) => match values.into_iter().next() {
                Some(v) => v,
                None => match lua.create_table() {
                    Ok(t) => mlua::Value::Table(t),
                    Err(e) => return (mlua::Value::Nil, Some(e.to_string())),
                },
            },
            Err(e) => return (mlua::Value::Nil, Some(e.to_string())),
        };

        if let Err(e) = loaded.set(name.as_str(), value.clone()) {
            return (mlua::Value::Nil, Some(e.to_string()));
        }

        (value, None)
    }
}
