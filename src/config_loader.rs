//! Layered configuration loading: defaults → file → environment
//! (`SPEC_FULL.md` §11), following `knhk-config`'s split between a schema
//! (owned by `vesper_runtime::config`) and the loading code that populates
//! it.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use vesper_runtime::RuntimeConfig;

/// Build a [`RuntimeConfig`] from, in increasing priority: the type's own
/// `serde(default)`s, an optional config file, and `VESPER__`-prefixed
/// environment variables (double underscore separates nested keys, e.g.
/// `VESPER__HTTP_TIMEOUT_MS=5000`).
pub fn load(explicit_path: Option<&Path>) -> Result<RuntimeConfig> {
    let mut builder = config::Config::builder();

    match explicit_path {
        Some(path) => {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }
        None => {
            if let Some(default_path) = default_config_path() {
                builder = builder.add_source(config::File::from(default_path).required(false));
            }
        }
    }

    builder = builder.add_source(config::Environment::with_prefix("VESPER").separator("__"));

    let raw = builder.build().context("failed to assemble layered configuration")?;
    raw.try_deserialize().context("failed to parse runtime configuration")
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vesper").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_with_no_file_and_no_env_yields_defaults() {
        // Isolated from whatever VESPER__* variables the test host might
        // have set, and from any file at the default XDG config path.
        let config = load(Some(Path::new("/nonexistent/vesper-config-does-not-exist.toml")));
        // `required(true)` on an explicit nonexistent path is an error.
        assert!(config.is_err());
    }
}
