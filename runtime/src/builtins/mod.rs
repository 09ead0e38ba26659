//! The `__builtin` surface (`spec.md` §6): synchronous helpers plus the
//! stream-layer entry points. None of these suspend the calling thread —
//! only `:await()` on a Promise/Stream/Timeout handle does that.

pub mod cache;
pub mod env;
pub mod generation;
pub mod json;
pub mod kvs;
pub mod log;
pub mod time;
pub mod uuid;

pub use cache::Cache;
pub use kvs::Kvs;
