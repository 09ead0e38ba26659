//! Async primitives: `sleep`, `http`, `timeout`, and the `await_all`/
//! `await_any` combinators.
//!
//! Every primitive follows one contract (`spec.md` §4.3): allocate a
//! Promise, spawn background work, return the Promise (the caller — the
//! builtins layer — is the one that pushes it onto the Luau stack).

pub mod combinators;
pub mod http;
pub mod sleep;
pub mod timeout;

pub use combinators::{await_all, await_any};
pub use http::{http_request, HttpRequest, HttpResponse};
pub use sleep::sleep;
pub use timeout::timeout;
