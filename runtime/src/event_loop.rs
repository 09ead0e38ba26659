//! The event loop: runs a script to completion while interleaving
//! resumptions of suspended threads (`spec.md` §4.2).
//!
//! Only this module calls [`mlua::Thread::resume`] — the rest of the
//! runtime only ever touches Promises, never the VM. Background work (on
//! however many native worker threads) resolves Promises; a small watcher
//! task per pending Promise bridges that resolution into the bounded
//! completion channel this loop drains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mlua::{Lua, MultiValue, Thread};
use tokio::sync::mpsc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::promise::{PromiseId, PromiseRegistry, PromiseResult};
use crate::vm::{self, marshal, marshal::Value, CoStatus};

const COMPLETION_CHANNEL_CAPACITY: usize = 256;
const MIN_BACKOFF: Duration = Duration::from_micros(100);
const MAX_BACKOFF: Duration = Duration::from_millis(5);
const MISSES_BEFORE_BACKOFF_GROWS: u32 = 3;

/// Run `entry` (already loaded as a function on `lua`) to completion.
pub async fn run(lua: &Lua, promises: &Arc<PromiseRegistry>, entry: mlua::Function) -> RuntimeResult<Vec<Value>> {
    let thread = vm::new_thread(lua, entry)?;
    let (tx, mut rx) = mpsc::channel::<PromiseId>(COMPLETION_CHANNEL_CAPACITY);
    let mut pending: HashMap<PromiseId, Thread> = HashMap::new();

    let (status, values) = vm::resume(&thread, MultiValue::new());
    match advance(status, values, &thread, promises, &mut pending, &tx)? {
        Advance::Done(result) => return Ok(result),
        Advance::Continue => {}
    }

    let mut misses: u32 = 0;
    let mut backoff = MIN_BACKOFF;

    loop {
        if pending.is_empty() {
            // Every outstanding operation has already been drained and
            // resumed without producing a further yield; nothing left to
            // wait on, and the initial resume already returned Continue
            // only when something was pending, so this is unreachable in
            // practice but kept as a defensive exit.
            return Err(RuntimeError::Runtime("event loop exited with no pending work and no result".into()));
        }

        match rx.try_recv() {
            Ok(promise_id) => {
                misses = 0;
                backoff = MIN_BACKOFF;

                let Some(thread) = pending.remove(&promise_id) else {
                    continue;
                };
                let result = promises.result(promise_id).unwrap_or_default();
                promises.remove(promise_id);

                let args = result_to_multi(lua, &result)?;
                let (status, values) = vm::resume(&thread, args);
                match advance(status, values, &thread, promises, &mut pending, &tx)? {
                    Advance::Done(result) => return Ok(result),
                    Advance::Continue => {}
                }
            }
            Err(mpsc::error::TryRecvError::Empty) => {
                misses += 1;
                if misses > MISSES_BEFORE_BACKOFF_GROWS {
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                tokio::time::sleep(backoff).await;
            }
            Err(mpsc::error::TryRecvError::Disconnected) => {
                return Err(RuntimeError::Runtime("completion channel closed unexpectedly".into()));
            }
        }
    }
}

enum Advance {
    Done(Vec<Value>),
    Continue,
}

/// Interpret one resume's outcome: terminal (Ok/Error) or another
/// suspension, in which case the thread is recorded against the
/// newly-yielded promise id and a watcher is spawned to bridge its
/// readiness into the completion channel.
fn advance(
    status: CoStatus,
    values: MultiValue,
    thread: &Thread,
    promises: &Arc<PromiseRegistry>,
    pending: &mut HashMap<PromiseId, Thread>,
    tx: &mpsc::Sender<PromiseId>,
) -> RuntimeResult<Advance> {
    match status {
        CoStatus::Error(e) => Err(RuntimeError::Runtime(e)),
        CoStatus::Ok => Ok(Advance::Done(multi_to_values(values)?)),
        CoStatus::Yield => {
            let promise_id = extract_promise_id(&values)?;
            pending.insert(promise_id, thread.clone());
            spawn_watcher(promises, promise_id, tx.clone());
            Ok(Advance::Continue)
        }
    }
}

fn spawn_watcher(promises: &Arc<PromiseRegistry>, id: PromiseId, tx: mpsc::Sender<PromiseId>) {
    let Some(promise) = promises.get(id) else { return };
    tokio::spawn(async move {
        promise.ready_notified().await;
        // The completion channel has a fixed capacity (spec.md §5); if it's
        // momentarily full the sender simply waits — back-pressure is the
        // intended behaviour, not a dropped resumption.
        let _ = tx.send(id).await;
    });
}

fn extract_promise_id(values: &MultiValue) -> RuntimeResult<PromiseId> {
    match values.iter().next() {
        Some(mlua::Value::Integer(n)) => Ok(PromiseId(*n as u64)),
        Some(mlua::Value::Number(n)) => Ok(PromiseId(*n as u64)),
        other => Err(RuntimeError::Runtime(format!(
            "script yielded a non-handle value: {other:?}"
        ))),
    }
}

fn multi_to_values(values: MultiValue) -> RuntimeResult<Vec<Value>> {
    values.iter().map(marshal::from_lua).collect()
}

fn result_to_multi(lua: &Lua, result: &PromiseResult) -> RuntimeResult<MultiValue> {
    if let Some(err) = &result.error {
        // A rejected Promise resumes the thread with `(nil, err)`, matching
        // the Lua convention used throughout the builtins surface.
        let mut multi = MultiValue::new();
        multi.push_back(mlua::Value::Nil);
        multi.push_back(mlua::Value::String(lua.create_string(err)?));
        return Ok(multi);
    }
    let mut multi = MultiValue::new();
    for v in &result.values {
        multi.push_back(marshal::to_lua(lua, v)?);
    }
    Ok(multi)
}
