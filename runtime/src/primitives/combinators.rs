use std::sync::Arc;

use futures::future::join_all;

use crate::promise::{Promise, PromiseRegistry};
use crate::vm::marshal::Value;

fn first_value(promise: &Promise) -> Value {
    promise
        .result()
        .and_then(|r| r.values.into_iter().next())
        .unwrap_or(Value::Nil)
}

/// `await_all(p...)`: resolves with a dense list of results; rejections
/// collapse to `{err}` entries, and the aggregate's secondary value is the
/// first error encountered, in input order (`spec.md` §4.3).
pub fn await_all(promises: &Arc<PromiseRegistry>, items: Vec<Arc<Promise>>) -> Arc<Promise> {
    let aggregate = promises.new_promise();
    if items.is_empty() {
        aggregate.resolve(vec![Value::Array(Vec::new()), Value::Nil]);
        return aggregate;
    }

    let agg = aggregate.clone();
    crate::util::spawn_settling(aggregate.clone(), async move {
        join_all(items.iter().map(|p| p.ready_notified())).await;

        let mut results = Vec::with_capacity(items.len());
        let mut first_error: Option<String> = None;
        for p in &items {
            let result = p.result().expect("ready_notified guarantees readiness");
            match result.error {
                Some(err) => {
                    if first_error.is_none() {
                        first_error = Some(err.clone());
                    }
                    let mut m = std::collections::BTreeMap::new();
                    m.insert("err".to_string(), Value::Str(err));
                    results.push(Value::Map(m));
                }
                None => results.push(first_value(p)),
            }
        }

        let secondary = match first_error {
            Some(e) => Value::Str(e),
            None => Value::Nil,
        };
        agg.resolve(vec![Value::Array(results), secondary]);
    });

    aggregate
}

/// `await_any(p...)`: the first resolution wins; subsequent resolutions are
/// discarded (`spec.md` §4.3). Zero arguments resolves immediately to nil.
pub fn await_any(promises: &Arc<PromiseRegistry>, items: Vec<Arc<Promise>>) -> Arc<Promise> {
    let aggregate = promises.new_promise();
    if items.is_empty() {
        aggregate.resolve(vec![Value::Nil]);
        return aggregate;
    }

    let agg = aggregate.clone();
    crate::util::spawn_settling(aggregate.clone(), async move {
        let futures = items.iter().map(|p| {
            let p = p.clone();
            Box::pin(async move {
                p.ready_notified().await;
                p
            })
        });
        let (winner, _idx, _rest) = futures::future::select_all(futures).await;
        let result = winner.result().expect("ready_notified guarantees readiness");
        match result.error {
            Some(err) => agg.reject(err),
            None => agg.resolve(result.values),
        }
    });

    aggregate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn await_all_with_zero_args_resolves_empty() {
        let promises = StdArc::new(PromiseRegistry::new());
        let agg = await_all(&promises, vec![]);
        assert!(agg.is_ready());
        let result = agg.result().unwrap();
        assert_eq!(result.values[0], Value::Array(vec![]));
        assert_eq!(result.values[1], Value::Nil);
    }

    #[tokio::test]
    async fn await_any_with_zero_args_resolves_nil() {
        let promises = StdArc::new(PromiseRegistry::new());
        let agg = await_any(&promises, vec![]);
        assert!(agg.is_ready());
        assert_eq!(agg.result().unwrap().values[0], Value::Nil);
    }

    #[tokio::test]
    async fn await_all_collapses_rejections_and_reports_first_error() {
        let promises = StdArc::new(PromiseRegistry::new());
        let p1 = promises.new_promise();
        let p2 = promises.new_promise();
        p1.resolve(vec![Value::Int(1)]);
        p2.reject("boom".to_string());

        let agg = await_all(&promises, vec![p1, p2]);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(agg.is_ready());
        let result = agg.result().unwrap();
        assert_eq!(result.values[1], Value::Str("boom".to_string()));
        if let Value::Array(arr) = &result.values[0] {
            assert_eq!(arr[0], Value::Int(1));
            assert!(matches!(&arr[1], Value::Map(_)));
        } else {
            panic!("expected array");
        }
    }

    #[tokio::test]
    async fn await_any_picks_first_resolution_and_discards_rest() {
        let promises = StdArc::new(PromiseRegistry::new());
        let p1 = promises.new_promise();
        let p2 = promises.new_promise();
        p1.resolve(vec![Value::Str("first".to_string())]);

        let agg = await_any(&promises, vec![p1, p2.clone()]);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(agg.is_ready());
        assert_eq!(agg.result().unwrap().values[0], Value::Str("first".to_string()));

        // A later resolution of the loser must not affect the aggregate.
        p2.resolve(vec![Value::Str("second".to_string())]);
        assert_eq!(agg.result().unwrap().values[0], Value::Str("first".to_string()));
    }
}
