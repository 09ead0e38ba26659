//! Panic containment for native worker tasks (`SPEC_FULL.md` §7: worker
//! panics convert to a `Runtime`/`Transport` rejection rather than leaving
//! the event loop waiting on a Promise that will never settle).

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::promise::Promise;

/// Spawn `fut` on the tokio runtime. `fut` is expected to resolve or reject
/// `guard` itself along every ordinary path; if it panics instead, `guard`
/// is rejected here so nothing is left pending forever.
pub fn spawn_settling<F>(guard: Arc<Promise>, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        // `reject` is a no-op once the promise already settled, so a panic
        // racing a real result never clobbers it.
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            guard.reject(format!("native worker panicked: {}", panic_message(&panic)));
        }
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::PromiseRegistry;

    #[tokio::test]
    async fn a_panicking_worker_rejects_the_guarded_promise() {
        let promises = PromiseRegistry::new();
        let promise = promises.new_promise();
        let guard = promise.clone();
        spawn_settling(guard, async move {
            panic!("boom");
        });

        for _ in 0..50 {
            if promise.is_ready() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(promise.is_ready());
        let result = promise.result().unwrap();
        assert!(result.error.as_deref().unwrap_or_default().contains("boom"));
    }

    #[tokio::test]
    async fn an_already_settled_promise_is_left_alone_on_panic() {
        // Resolving before the panic point (e.g. a panic in cleanup code
        // after the real result was already delivered) must not clobber it.
        let promises = PromiseRegistry::new();
        let promise = promises.new_promise();
        let guard = promise.clone();
        let resolver = promise.clone();
        spawn_settling(guard, async move {
            resolver.resolve(vec![crate::vm::marshal::Value::Int(1)]);
            panic!("boom after resolve");
        });

        for _ in 0..50 {
            if promise.is_ready() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let result = promise.result().unwrap();
        assert_eq!(result.values, vec![crate::vm::marshal::Value::Int(1)]);
        assert!(result.error.is_none());
    }
}
