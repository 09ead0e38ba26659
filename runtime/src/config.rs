//! Runtime configuration schema (`SPEC_FULL.md` §11).
//!
//! Layering (defaults → file → env, via the `config` crate) happens at the
//! CLI boundary; this module only defines the shape a layered load
//! deserializes into, following `knhk-config`'s split between a schema
//! module and the loading code that populates it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::context::agent::{DEFAULT_IN_CAPACITY, DEFAULT_OUT_CAPACITY};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContextConfig {
    Tool,
    Agent {
        #[serde(default = "default_in_capacity")]
        in_capacity: usize,
        #[serde(default = "default_out_capacity")]
        out_capacity: usize,
    },
}

fn default_in_capacity() -> usize {
    DEFAULT_IN_CAPACITY
}

fn default_out_capacity() -> usize {
    DEFAULT_OUT_CAPACITY
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig::Tool
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub index_url_template: String,
    pub tarball_url_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Root of the on-disk `FsPackageStore`. `None` uses an in-memory store
    /// (suitable for a one-shot CLI invocation with no local cache).
    pub store_dir: Option<PathBuf>,
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            context: ContextConfig::default(),
            registry: RegistryConfig::default(),
            http_timeout_ms: default_http_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_a_tool_context_with_no_upstreams() {
        let config = RuntimeConfig::default();
        assert_eq!(config.context, ContextConfig::Tool);
        assert!(config.registry.upstreams.is_empty());
        assert_eq!(config.http_timeout_ms, 30_000);
    }

    #[test]
    fn agent_config_round_trips_through_json() {
        let config = RuntimeConfig {
            context: ContextConfig::Agent { in_capacity: 4, out_capacity: 32 },
            ..RuntimeConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
