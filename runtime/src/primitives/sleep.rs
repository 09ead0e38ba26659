use std::sync::Arc;
use std::time::Duration;

use crate::cancel::Scope;
use crate::promise::{Promise, PromiseRegistry};
use crate::vm::marshal::Value;

/// `sleep(ms)`: resolves with `nil` after `ms` milliseconds. Negative values
/// clamp to zero (`spec.md` §4.3, §8).
pub fn sleep(promises: &PromiseRegistry, scope: &Scope, ms: i64) -> Arc<Promise> {
    let promise = promises.new_promise();
    let clamped = ms.max(0) as u64;
    let p = promise.clone();
    let scope = scope.clone();
    crate::util::spawn_settling(promise.clone(), async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(clamped)) => {
                p.resolve(vec![Value::Nil]);
            }
            _ = scope.cancelled() => {
                p.reject("context cancelled".to_string());
            }
        }
    });
    promise
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn negative_sleep_clamps_to_zero() {
        let promises = PromiseRegistry::new();
        let scope = Scope::root();
        let p = sleep(&promises, &scope, -50);
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert!(p.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_resolves_after_duration() {
        let promises = PromiseRegistry::new();
        let scope = Scope::root();
        let p = sleep(&promises, &scope, 10);
        assert!(!p.is_ready());
        tokio::time::advance(Duration::from_millis(11)).await;
        tokio::task::yield_now().await;
        assert!(p.is_ready());
    }
}
