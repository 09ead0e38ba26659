use std::sync::Arc;
use std::time::Duration;

use crate::promise::{Promise, PromiseRegistry};
use crate::timeout::{TimeoutHandle, TimeoutRegistry};

/// `timeout(ms)`: the handle carries both `_id` (timeout) and
/// `_promise_id`. Firing races with `cancel()` inside [`TimeoutHandle`];
/// `timeout(0)` still resolves after the minimum scheduling delay
/// (`spec.md` §4.3, §8).
pub fn timeout(
    promises: &Arc<PromiseRegistry>,
    timeouts: &Arc<TimeoutRegistry>,
    ms: i64,
) -> (Arc<TimeoutHandle>, Arc<Promise>) {
    let promise = promises.new_promise();
    let handle = timeouts.new_timeout(promise.id());

    let clamped = ms.max(0) as u64;
    let timeouts = timeouts.clone();
    let guard = promise.clone();
    let promises_inner = promises.clone();
    let timeout_id = handle.id();
    crate::util::spawn_settling(guard, async move {
        tokio::time::sleep(Duration::from_millis(clamped)).await;
        timeouts.fire(timeout_id, &promises_inner);
    });

    (handle, promise)
}
