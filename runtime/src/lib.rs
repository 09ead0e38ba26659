//! Cooperative Luau async runtime: promises, streams, module registry.
//!
//! This crate is the core subsystem described end to end in `SPEC_FULL.md`:
//! a coroutine-based event loop (`event_loop`) that drives one Luau VM
//! thread per script, a Promise registry (`promise`) bridging background
//! work back into that loop, the async primitives built on top of it
//! (`primitives`), a Stream/BiStream layer (`stream`), a module registry
//! implementing `require` with semver resolution and bytecode caching
//! (`registry`), and the two pluggable I/O shapes a host can attach
//! (`context`). `runtime` wires all of it into the single public entry
//! point, [`Runtime`].
//!
//! Nothing here is process-global: every registry is owned by exactly one
//! [`Runtime`] and dropped with it (`spec.md` §9).

pub mod builtins;
pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod event_loop;
pub mod primitives;
pub mod promise;
pub mod registry;
pub mod runtime;
pub mod stream;
pub mod timeout;
mod util;
pub mod vm;

pub use config::{ContextConfig, RuntimeConfig};
pub use context::{AgentHandle, Context};
pub use error::{RuntimeError, RuntimeResult};
pub use runtime::{ContextHandle, Runtime};
pub use stream::MessageChunk;
pub use vm::marshal::{json_to_value, value_to_json, Value};
