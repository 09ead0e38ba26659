use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::Scope;
use crate::promise::{Promise, PromiseRegistry};
use crate::vm::marshal::Value;

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

/// Parse a script-provided request table. Returns `Err(message)` for the two
/// validation edge cases named in `spec.md` §4.3: missing `url`, or a
/// non-table argument.
pub fn parse_request(value: &Value) -> Result<HttpRequest, String> {
    let map = match value {
        Value::Map(m) => m,
        Value::Nil => return Err("request must be a table".to_string()),
        _ => return Err("request must be a table".to_string()),
    };

    let url = match map.get("url").and_then(Value::as_str) {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => return Err("url is required".to_string()),
    };

    let method = map
        .get("method")
        .and_then(Value::as_str)
        .map(|m| m.to_uppercase())
        .unwrap_or_else(|| "GET".to_string());

    let timeout_ms = match map.get("timeout") {
        Some(Value::Int(n)) => (*n).max(0) as u64,
        Some(Value::Float(n)) => (*n).max(0.0) as u64,
        _ => DEFAULT_TIMEOUT_MS,
    };

    let mut headers = BTreeMap::new();
    if let Some(Value::Map(h)) = map.get("headers") {
        for (k, v) in h {
            if let Some(s) = v.as_str() {
                headers.insert(k.clone(), s.to_string());
            }
        }
    }

    let body = match map.get("body") {
        Some(Value::Str(s)) => Some(s.clone().into_bytes()),
        Some(Value::Bytes(b)) => Some(b.clone()),
        _ => None,
    };

    Ok(HttpRequest { url, method, headers, body, timeout_ms })
}

fn error_result(promises: &PromiseRegistry, err: String) -> Arc<Promise> {
    let promise = promises.new_promise();
    let mut map = BTreeMap::new();
    map.insert("status".to_string(), Value::Int(0));
    map.insert("err".to_string(), Value::Str(err));
    promise.resolve(vec![Value::Map(map)]);
    promise
}

/// `http(req)`: validate, then execute on a worker bounded by `timeout` and
/// the parent cancellation scope. Validation failures resolve an
/// already-fulfilled Promise carrying `{status: 0, err}` — the script always
/// sees a Promise, never a thrown error (`spec.md` §4.3, Open Question).
pub fn http_request(client: reqwest::Client, promises: &PromiseRegistry, scope: &Scope, raw: &Value) -> Arc<Promise> {
    let req = match parse_request(raw) {
        Ok(r) => r,
        Err(e) => return error_result(promises, e),
    };

    let promise = promises.new_promise();
    let p = promise.clone();
    let child_scope = scope.child();

    crate::util::spawn_settling(promise.clone(), async move {
        let method = match req.method.parse::<reqwest::Method>() {
            Ok(m) => m,
            Err(_) => {
                let mut map = BTreeMap::new();
                map.insert("status".to_string(), Value::Int(0));
                map.insert("err".to_string(), Value::Str(format!("invalid method: {}", req.method)));
                p.resolve(vec![Value::Map(map)]);
                return;
            }
        };

        let mut builder = client.request(method, &req.url);
        for (k, v) in &req.headers {
            builder = builder.header(k, v);
        }
        if let Some(body) = req.body.clone() {
            builder = builder.body(body);
        }

        let fut = builder.send();
        let timeout_fut = tokio::time::sleep(Duration::from_millis(req.timeout_ms));

        tokio::select! {
            result = fut => {
                let mut map = BTreeMap::new();
                match result {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        let mut headers = BTreeMap::new();
                        for (k, v) in resp.headers().iter() {
                            if let Ok(value) = v.to_str() {
                                headers.insert(k.to_string(), value.to_string());
                            }
                        }
                        let body = resp.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
                        map.insert("status".to_string(), Value::Int(status as i64));
                        map.insert("body".to_string(), Value::Bytes(body));
                        let header_map = headers.into_iter().map(|(k, v)| (k, Value::Str(v))).collect();
                        map.insert("headers".to_string(), Value::Map(header_map));
                    }
                    Err(e) => {
                        map.insert("status".to_string(), Value::Int(0));
                        map.insert("err".to_string(), Value::Str(format!("transport error: {e}")));
                    }
                }
                p.resolve(vec![Value::Map(map)]);
            }
            _ = timeout_fut => {
                let mut map = BTreeMap::new();
                map.insert("status".to_string(), Value::Int(0));
                map.insert("err".to_string(), Value::Str("context deadline exceeded".to_string()));
                p.resolve(vec![Value::Map(map)]);
            }
            _ = child_scope.cancelled() => {
                let mut map = BTreeMap::new();
                map.insert("status".to_string(), Value::Int(0));
                map.insert("err".to_string(), Value::Str("context cancelled".to_string()));
                p.resolve(vec![Value::Map(map)]);
            }
        }
    });

    promise
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_url_is_a_validation_error() {
        let mut map = BTreeMap::new();
        map.insert("method".to_string(), Value::Str("GET".to_string()));
        let err = parse_request(&Value::Map(map)).unwrap_err();
        assert_eq!(err, "url is required");
    }

    #[test]
    fn non_table_argument_is_a_validation_error() {
        let err = parse_request(&Value::Str("http://x".to_string())).unwrap_err();
        assert_eq!(err, "request must be a table");
    }

    #[test]
    fn method_defaults_to_get_and_timeout_defaults_to_30s() {
        let mut map = BTreeMap::new();
        map.insert("url".to_string(), Value::Str("http://example.com".to_string()));
        let req = parse_request(&Value::Map(map)).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn http_without_url_resolves_immediately_with_err() {
        let promises = PromiseRegistry::new();
        let scope = Scope::root();
        let client = reqwest::Client::new();
        let mut map = BTreeMap::new();
        map.insert("method".to_string(), Value::Str("GET".to_string()));
        let promise = http_request(client, &promises, &scope, &Value::Map(map));
        assert!(promise.is_ready());
        let result = promise.result().unwrap();
        if let Value::Map(m) = &result.values[0] {
            assert_eq!(m.get("status"), Some(&Value::Int(0)));
            assert_eq!(m.get("err"), Some(&Value::Str("url is required".to_string())));
        } else {
            panic!("expected map");
        }
    }
}
