//! The `Runtime`: owns one Luau VM, every registry, and exactly one context
//! plug-in (`spec.md` §4, §4.6, §9 — nothing here is process-global).
//!
//! Construction installs the native global surface named in `spec.md` §6's
//! `__builtin` table onto a fresh `Lua` instance. `require` is the one
//! exception to the "every async primitive returns a Promise" rule: the
//! spec models it as a direct two-tuple return, so it is wired as a
//! synchronous-from-the-script native function that blocks the calling
//! native thread via `tokio::task::block_in_place` + `Handle::block_on`.
//! That requires the host's tokio runtime to be multi-threaded
//! (`rt-multi-thread`) — `block_in_place` panics on a current-thread runtime.

use std::sync::Arc;

use mlua::{Lua, Table, Variadic};
use tokio::runtime::Handle;

use crate::builtins::generation::{self, EchoGenerator, Generator, IdentityTransformer, Transformer};
use crate::builtins::{env, json, log, time, uuid};
use crate::builtins::{Cache, Kvs};
use crate::cancel::Scope;
use crate::config::{ContextConfig, RuntimeConfig};
use crate::context::{AgentHandle, Context, ToolContext};
use crate::error::{RuntimeError, RuntimeResult};
use crate::primitives;
use crate::promise::{Promise, PromiseId, PromiseRegistry};
use crate::registry::store::{FsPackageStore, InMemoryPackageStore, PackageStore};
use crate::registry::upstream::{HttpUpstream, Upstream};
use crate::registry::ModuleRegistry;
use crate::stream::{BiStream, MessageChunk, Stream, StreamRegistry};
use crate::timeout::TimeoutRegistry;
use crate::vm::{self, marshal, marshal::Value, OptLevel};

/// Host-side counterpart to the active [`Context`]: what the embedder holds
/// onto after constructing a Runtime.
pub enum ContextHandle {
    Tool(Arc<ToolContext>),
    Agent(AgentHandle),
}

pub struct Runtime {
    lua: Lua,
    promises: Arc<PromiseRegistry>,
    timeouts: Arc<TimeoutRegistry>,
    streams: Arc<StreamRegistry>,
    scope: Scope,
    kvs: Arc<Kvs>,
    cache: Arc<Cache>,
    registry: Arc<ModuleRegistry>,
    loaded: Table,
    handle_meta: Table,
    http_client: reqwest::Client,
    context: Context,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> RuntimeResult<(Runtime, ContextHandle)> {
        let lua = Lua::new();
        let handle_meta = vm::install_handle_metatable(&lua)?;
        let loaded = lua.create_table().map_err(RuntimeError::from)?;

        let store: Arc<dyn PackageStore> = match &config.registry.store_dir {
            Some(dir) => Arc::new(FsPackageStore::new(dir.clone())),
            None => Arc::new(InMemoryPackageStore::new()),
        };
        let upstreams: Vec<Arc<dyn Upstream>> = config
            .registry
            .upstreams
            .iter()
            .map(|u| {
                let client = reqwest::Client::new();
                Arc::new(HttpUpstream::new(client, u.index_url_template.clone(), u.tarball_url_template.clone()))
                    as Arc<dyn Upstream>
            })
            .collect();

        let (context, context_handle) = match &config.context {
            ContextConfig::Tool => {
                let (ctx, handle) = Context::tool();
                (ctx, ContextHandle::Tool(handle))
            }
            ContextConfig::Agent { in_capacity, out_capacity } => {
                let (ctx, handle) = Context::agent(*in_capacity, *out_capacity);
                (ctx, ContextHandle::Agent(handle))
            }
        };

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.http_timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let runtime = Runtime {
            lua,
            promises: Arc::new(PromiseRegistry::new()),
            timeouts: Arc::new(TimeoutRegistry::new()),
            streams: Arc::new(StreamRegistry::new()),
            scope: Scope::root(),
            kvs: Arc::new(Kvs::new()),
            cache: Arc::new(Cache::new()),
            registry: Arc::new(ModuleRegistry::new(store, upstreams)),
            loaded,
            handle_meta,
            http_client,
            context,
        };
        runtime.install_globals()?;
        Ok((runtime, context_handle))
    }

    /// Compile and run `source` to completion (`spec.md` §6 `Run`).
    pub async fn run(&self, source: &str, name: &str) -> RuntimeResult<Vec<Value>> {
        let entry = vm::compile(&self.lua, source, name, OptLevel::O2)?;
        crate::event_loop::run(&self.lua, &self.promises, entry).await
    }

    pub fn kvs(&self) -> &Arc<Kvs> {
        &self.kvs
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    fn install_globals(&self) -> RuntimeResult<()> {
        let globals = self.lua.globals();

        self.install_sleep(&globals)?;
        self.install_http(&globals)?;
        self.install_timeout(&globals)?;
        self.install_combinators(&globals)?;
        self.install_require(&globals)?;
        self.install_kvs(&globals)?;
        self.install_cache(&globals)?;
        self.install_scalar_builtins(&globals)?;
        self.install_generation(&globals)?;
        self.install_context(&globals)?;
        self.install_builtin_table_and_rt_mirror(&globals)?;

        globals.set("__loaded", self.loaded.clone()).map_err(RuntimeError::from)?;

        Ok(())
    }

    /// Build the `__builtin` table named in `spec.md` §6 from the globals
    /// just installed, then mirror every entry onto `rt` as a method that
    /// silently discards its receiver — so a script can call either
    /// `sleep(5)` or `rt:sleep(5)` for the same primitive. Must run after
    /// every other `install_*` call (the names below must already exist as
    /// globals) and after [`Runtime::install_context`] (which creates `rt`).
    fn install_builtin_table_and_rt_mirror(&self, globals: &Table) -> RuntimeResult<()> {
        const BUILTIN_NAMES: &[&str] = &[
            "http",
            "json_encode",
            "json_decode",
            "kvs_get",
            "kvs_set",
            "kvs_del",
            "cache_get",
            "cache_set",
            "cache_del",
            "log",
            "env",
            "time",
            "parse_time",
            "uuid",
            "generate",
            "transformer",
            "sleep",
            "timeout",
            "await_all",
            "await_any",
        ];

        let builtin = self.lua.create_table().map_err(RuntimeError::from)?;
        for name in BUILTIN_NAMES {
            let f: mlua::Function = globals.get(*name).map_err(RuntimeError::from)?;
            builtin.set(*name, f).map_err(RuntimeError::from)?;
        }
        globals.set("__builtin", builtin).map_err(RuntimeError::from)?;

        let rt: Table = globals.get("rt").map_err(RuntimeError::from)?;
        let method_wrap: mlua::Function = self
            .lua
            .load("return function(fn) return function(_, ...) return fn(...) end end")
            .set_name("=[method_wrap]")
            .eval()
            .map_err(RuntimeError::from)?;
        for name in BUILTIN_NAMES {
            let f: mlua::Function = globals.get(*name).map_err(RuntimeError::from)?;
            let wrapped: mlua::Function = method_wrap.call(f).map_err(RuntimeError::from)?;
            rt.set(*name, wrapped).map_err(RuntimeError::from)?;
        }
        Ok(())
    }

    fn install_sleep(&self, globals: &Table) -> RuntimeResult<()> {
        let promises = self.promises.clone();
        let scope = self.scope.clone();
        let meta = self.handle_meta.clone();
        let f = self
            .lua
            .create_function(move |lua, ms: i64| {
                let promise = primitives::sleep(&promises, &scope, ms);
                promise_handle(lua, &meta, &promise).map_err(mlua::Error::external)
            })
            .map_err(RuntimeError::from)?;
        globals.set("sleep", f).map_err(RuntimeError::from)
    }

    fn install_http(&self, globals: &Table) -> RuntimeResult<()> {
        let promises = self.promises.clone();
        let scope = self.scope.clone();
        let meta = self.handle_meta.clone();
        let client = self.http_client.clone();
        let f = self
            .lua
            .create_function(move |lua, req: mlua::Value| {
                let value = marshal::from_lua(&req)?;
                let promise = primitives::http_request(client.clone(), &promises, &scope, &value);
                promise_handle(lua, &meta, &promise).map_err(mlua::Error::external)
            })
            .map_err(RuntimeError::from)?;
        globals.set("http", f).map_err(RuntimeError::from)
    }

    fn install_timeout(&self, globals: &Table) -> RuntimeResult<()> {
        let promises = self.promises.clone();
        let timeouts = self.timeouts.clone();
        let meta = self.handle_meta.clone();
        let f = self
            .lua
            .create_function(move |lua, ms: i64| {
                let (handle, promise) = primitives::timeout(&promises, &timeouts, ms);
                let t = promise_handle(lua, &meta, &promise).map_err(mlua::Error::external)?;
                t.set("_id", handle.id().0 as i64)?;

                let promises_for_cancel = promises.clone();
                let cancel_fn = lua.create_function(move |_, ()| Ok(handle.cancel(&promises_for_cancel)))?;
                t.set("cancel", cancel_fn)?;
                Ok(t)
            })
            .map_err(RuntimeError::from)?;
        globals.set("timeout", f).map_err(RuntimeError::from)
    }

    fn install_combinators(&self, globals: &Table) -> RuntimeResult<()> {
        let promises = self.promises.clone();
        let meta = self.handle_meta.clone();
        let all_fn = self
            .lua
            .create_function(move |lua, handles: Variadic<Table>| {
                let items = promise_ids_from_variadic(&promises, handles)?;
                let aggregate = primitives::await_all(&promises, items);
                promise_handle(lua, &meta, &aggregate).map_err(mlua::Error::external)
            })
            .map_err(RuntimeError::from)?;
        globals.set("await_all", all_fn).map_err(RuntimeError::from)?;

        let promises = self.promises.clone();
        let meta = self.handle_meta.clone();
        let any_fn = self
            .lua
            .create_function(move |lua, handles: Variadic<Table>| {
                let items = promise_ids_from_variadic(&promises, handles)?;
                let aggregate = primitives::await_any(&promises, items);
                promise_handle(lua, &meta, &aggregate).map_err(mlua::Error::external)
            })
            .map_err(RuntimeError::from)?;
        globals.set("await_any", any_fn).map_err(RuntimeError::from)
    }

    /// `require(ref)`: blocks the calling native thread for the duration of
    /// resolution, then returns `(value, err)` directly — see the module
    /// doc comment for why this is not Promise-based.
    fn install_require(&self, globals: &Table) -> RuntimeResult<()> {
        let registry = self.registry.clone();
        let loaded = self.loaded.clone();
        let f = self
            .lua
            .create_function(move |lua, raw_ref: String| {
                let handle = Handle::current();
                let (value, err) =
                    tokio::task::block_in_place(|| handle.block_on(registry.require(lua, &loaded, &raw_ref)));
                Ok((value, err))
            })
            .map_err(RuntimeError::from)?;
        globals.set("require", f).map_err(RuntimeError::from)
    }

    fn install_kvs(&self, globals: &Table) -> RuntimeResult<()> {
        let table = self.lua.create_table().map_err(RuntimeError::from)?;

        let kvs = self.kvs.clone();
        let get_fn = self
            .lua
            .create_function(move |lua, key: String| marshal::to_lua(lua, &kvs.get(&key).unwrap_or(Value::Nil)))
            .map_err(RuntimeError::from)?;
        table.set("get", get_fn).map_err(RuntimeError::from)?;

        let kvs = self.kvs.clone();
        let set_fn = self
            .lua
            .create_function(move |_, (key, value): (String, mlua::Value)| {
                kvs.set(key, marshal::from_lua(&value)?);
                Ok(())
            })
            .map_err(RuntimeError::from)?;
        table.set("set", set_fn).map_err(RuntimeError::from)?;

        let kvs = self.kvs.clone();
        let del_fn = self
            .lua
            .create_function(move |lua, key: String| marshal::to_lua(lua, &kvs.del(&key).unwrap_or(Value::Nil)))
            .map_err(RuntimeError::from)?;
        table.set("del", del_fn.clone()).map_err(RuntimeError::from)?;

        // `spec.md` §6 names these flat as `kvs_{get,set,del}` in the
        // `__builtin` table; `kvs.get(...)` above is the same functions
        // reachable through the nested convenience table most scripts use.
        globals.set("kvs_get", table.get::<_, mlua::Function>("get").map_err(RuntimeError::from)?).map_err(RuntimeError::from)?;
        globals.set("kvs_set", table.get::<_, mlua::Function>("set").map_err(RuntimeError::from)?).map_err(RuntimeError::from)?;
        globals.set("kvs_del", del_fn).map_err(RuntimeError::from)?;

        globals.set("kvs", table).map_err(RuntimeError::from)
    }

    fn install_cache(&self, globals: &Table) -> RuntimeResult<()> {
        let table = self.lua.create_table().map_err(RuntimeError::from)?;

        let cache = self.cache.clone();
        let get_fn = self
            .lua
            .create_function(move |lua, key: String| marshal::to_lua(lua, &cache.get(&key).unwrap_or(Value::Nil)))
            .map_err(RuntimeError::from)?;
        table.set("get", get_fn).map_err(RuntimeError::from)?;

        let cache = self.cache.clone();
        let set_fn = self
            .lua
            .create_function(move |_, (key, value, ttl_ms): (String, mlua::Value, Option<u64>)| {
                cache.set(key, marshal::from_lua(&value)?, ttl_ms);
                Ok(())
            })
            .map_err(RuntimeError::from)?;
        table.set("set", set_fn).map_err(RuntimeError::from)?;

        let cache = self.cache.clone();
        let del_fn = self
            .lua
            .create_function(move |lua, key: String| marshal::to_lua(lua, &cache.del(&key).unwrap_or(Value::Nil)))
            .map_err(RuntimeError::from)?;
        table.set("del", del_fn.clone()).map_err(RuntimeError::from)?;

        // See the matching comment in `install_kvs`: `cache_{get,set,del}`
        // are the flat `__builtin` names from `spec.md` §6.
        globals.set("cache_get", table.get::<_, mlua::Function>("get").map_err(RuntimeError::from)?).map_err(RuntimeError::from)?;
        globals.set("cache_set", table.get::<_, mlua::Function>("set").map_err(RuntimeError::from)?).map_err(RuntimeError::from)?;
        globals.set("cache_del", del_fn).map_err(RuntimeError::from)?;

        globals.set("cache", table).map_err(RuntimeError::from)
    }

    fn install_scalar_builtins(&self, globals: &Table) -> RuntimeResult<()> {
        let lua = &self.lua;

        let json_encode = lua
            .create_function(|_, value: mlua::Value| Ok(json::json_encode(&marshal::from_lua(&value)?)))
            .map_err(RuntimeError::from)?;
        globals.set("json_encode", json_encode).map_err(RuntimeError::from)?;

        let json_decode = lua
            .create_function(|lua, text: String| {
                let value = json::json_decode(&text).map_err(mlua::Error::external)?;
                marshal::to_lua(lua, &value)
            })
            .map_err(RuntimeError::from)?;
        globals.set("json_decode", json_decode).map_err(RuntimeError::from)?;

        let env_fn = lua
            .create_function(|lua, name: String| marshal::to_lua(lua, &env::env(&name)))
            .map_err(RuntimeError::from)?;
        globals.set("env", env_fn).map_err(RuntimeError::from)?;

        let time_fn = lua.create_function(|lua, ()| marshal::to_lua(lua, &time::time())).map_err(RuntimeError::from)?;
        globals.set("time", time_fn).map_err(RuntimeError::from)?;

        let parse_time_fn = lua
            .create_function(|lua, text: String| {
                let value = time::parse_time(&text).map_err(mlua::Error::external)?;
                marshal::to_lua(lua, &value)
            })
            .map_err(RuntimeError::from)?;
        globals.set("parse_time", parse_time_fn).map_err(RuntimeError::from)?;

        let uuid_fn = lua.create_function(|lua, ()| marshal::to_lua(lua, &uuid::uuid())).map_err(RuntimeError::from)?;
        globals.set("uuid", uuid_fn).map_err(RuntimeError::from)?;

        let log_fn = lua
            .create_function(|_, (level, message): (String, String)| {
                log::log(&level, &message);
                Ok(())
            })
            .map_err(RuntimeError::from)?;
        globals.set("log", log_fn).map_err(RuntimeError::from)
    }

    /// `generate(prompt)` / `transformer()`: Stream/BiStream constructors
    /// (`spec.md` §6). Each call wires a fresh [`EchoGenerator`] /
    /// [`IdentityTransformer`] — the deterministic stand-ins named in
    /// `builtins::generation` — since the real model backend is a host
    /// collaborator out of scope here.
    fn install_generation(&self, globals: &Table) -> RuntimeResult<()> {
        let streams = self.streams.clone();
        let scope = self.scope.clone();
        let meta = self.handle_meta.clone();
        let promises = self.promises.clone();
        let generate_fn = self
            .lua
            .create_function(move |lua, prompt: mlua::Value| {
                let value = marshal::from_lua(&prompt)?;
                let generator: Arc<dyn Generator> = Arc::new(EchoGenerator);
                let stream = generation::generate(&streams, &scope, generator, value);
                stream_handle(lua, &meta, promises.clone(), streams.clone(), stream).map_err(mlua::Error::external)
            })
            .map_err(RuntimeError::from)?;
        globals.set("generate", generate_fn).map_err(RuntimeError::from)?;

        let streams = self.streams.clone();
        let scope = self.scope.clone();
        let meta = self.handle_meta.clone();
        let promises = self.promises.clone();
        let transformer_fn = self
            .lua
            .create_function(move |lua, ()| {
                let transformer_impl: Arc<dyn Transformer> = Arc::new(IdentityTransformer);
                let bistream = generation::transformer(&streams, &scope, transformer_impl);
                bistream_handle(lua, &meta, promises.clone(), streams.clone(), bistream).map_err(mlua::Error::external)
            })
            .map_err(RuntimeError::from)?;
        globals.set("transformer", transformer_fn).map_err(RuntimeError::from)
    }

    fn install_context(&self, globals: &Table) -> RuntimeResult<()> {
        let rt_table = self.lua.create_table().map_err(RuntimeError::from)?;

        match &self.context {
            Context::Tool(tool) => {
                let tool_in = Arc::clone(tool);
                let input_fn = self
                    .lua
                    .create_function(move |lua, ()| marshal::to_lua(lua, &tool_in.input()))
                    .map_err(RuntimeError::from)?;
                rt_table.set("input", input_fn).map_err(RuntimeError::from)?;

                let tool_out = Arc::clone(tool);
                let output_fn = self
                    .lua
                    .create_function(move |_, (value, err): (mlua::Value, Option<String>)| {
                        tool_out.set_output(marshal::from_lua(&value)?, err);
                        Ok(())
                    })
                    .map_err(RuntimeError::from)?;
                rt_table.set("output", output_fn).map_err(RuntimeError::from)?;
            }
            Context::Agent(agent) => {
                let promises = self.promises.clone();
                let meta = self.handle_meta.clone();
                let agent_recv = Arc::clone(agent);
                let recv_fn = self
                    .lua
                    .create_function(move |lua, ()| {
                        let promise = promises.new_promise();
                        let p = promise.clone();
                        let a = agent_recv.clone();
                        crate::util::spawn_settling(promise.clone(), async move {
                            match a.recv().await {
                                Some(chunk) => p.resolve(vec![chunk.to_value()]),
                                None => p.resolve(vec![Value::Nil]),
                            }
                        });
                        promise_handle(lua, &meta, &promise).map_err(mlua::Error::external)
                    })
                    .map_err(RuntimeError::from)?;
                rt_table.set("recv", recv_fn).map_err(RuntimeError::from)?;

                let promises = self.promises.clone();
                let meta = self.handle_meta.clone();
                let agent_emit = Arc::clone(agent);
                let emit_fn = self
                    .lua
                    .create_function(move |lua, chunk_value: mlua::Value| {
                        let chunk_host = marshal::from_lua(&chunk_value)?;
                        let chunk = MessageChunk::from_value(&chunk_host)
                            .ok_or_else(|| mlua::Error::RuntimeError("invalid chunk".to_string()))?;
                        let promise = promises.new_promise();
                        let p = promise.clone();
                        let a = agent_emit.clone();
                        crate::util::spawn_settling(promise.clone(), async move {
                            match a.emit(chunk).await {
                                Ok(()) => p.resolve(vec![Value::Nil]),
                                Err(e) => p.reject(e),
                            }
                        });
                        promise_handle(lua, &meta, &promise).map_err(mlua::Error::external)
                    })
                    .map_err(RuntimeError::from)?;
                rt_table.set("emit", emit_fn).map_err(RuntimeError::from)?;
            }
        }

        globals.set("rt", rt_table).map_err(RuntimeError::from)
    }
}

fn promise_handle(lua: &Lua, meta: &Table, promise: &Promise) -> RuntimeResult<Table> {
    let t = vm::make_handle_table(lua, meta)?;
    t.set("_promise_id", promise.id().0 as i64).map_err(RuntimeError::from)?;
    Ok(t)
}

fn promise_ids_from_variadic(promises: &PromiseRegistry, handles: Variadic<Table>) -> mlua::Result<Vec<Arc<Promise>>> {
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles.iter() {
        let raw: i64 = handle.get("_promise_id")?;
        let id = PromiseId(raw as u64);
        let promise = promises
            .get(id)
            .ok_or_else(|| mlua::Error::RuntimeError("unknown or already-consumed promise".to_string()))?;
        out.push(promise);
    }
    Ok(out)
}

/// Build a handle table for a `Stream`. `recv` is wired like every other
/// async primitive — spawn background work, resolve a fresh Promise, hand
/// back its handle — rather than blocking the native thread.
fn stream_handle(
    lua: &Lua,
    meta: &Table,
    promises: Arc<PromiseRegistry>,
    streams: Arc<StreamRegistry>,
    stream: Arc<Stream>,
) -> RuntimeResult<Table> {
    let t = vm::make_handle_table(lua, meta)?;
    t.set("_id", stream.id().0 as i64).map_err(RuntimeError::from)?;

    let promises_recv = promises.clone();
    let meta_recv = meta.clone();
    let recv_stream = stream.clone();
    let recv_fn = lua
        .create_function(move |lua, ()| {
            let promise = promises_recv.new_promise();
            let p = promise.clone();
            let s = recv_stream.clone();
            crate::util::spawn_settling(promise.clone(), async move {
                match s.recv().await {
                    Some(chunk) => p.resolve(vec![chunk.to_value()]),
                    None => p.resolve(vec![Value::Nil]),
                }
            });
            promise_handle(lua, &meta_recv, &promise).map_err(mlua::Error::external)
        })
        .map_err(RuntimeError::from)?;
    t.set("recv", recv_fn).map_err(RuntimeError::from)?;

    let close_stream = stream;
    let close_streams = streams;
    let close_fn = lua
        .create_function(move |_, ()| {
            close_stream.close();
            close_streams.remove_stream(close_stream.id());
            Ok(())
        })
        .map_err(RuntimeError::from)?;
    t.set("close", close_fn).map_err(RuntimeError::from)?;

    Ok(t)
}

/// Build a handle table for a `BiStream`: `recv`, `send`, `close_send`,
/// `close`, each a native method set directly on the instance table.
fn bistream_handle(
    lua: &Lua,
    meta: &Table,
    promises: Arc<PromiseRegistry>,
    streams: Arc<StreamRegistry>,
    bistream: Arc<BiStream>,
) -> RuntimeResult<Table> {
    let t = vm::make_handle_table(lua, meta)?;
    t.set("_id", bistream.id().0 as i64).map_err(RuntimeError::from)?;

    let promises_recv = promises.clone();
    let meta_recv = meta.clone();
    let recv_bi = bistream.clone();
    let recv_fn = lua
        .create_function(move |lua, ()| {
            let promise = promises_recv.new_promise();
            let p = promise.clone();
            let bi = recv_bi.clone();
            crate::util::spawn_settling(promise.clone(), async move {
                match bi.recv().await {
                    Some(chunk) => p.resolve(vec![chunk.to_value()]),
                    None => p.resolve(vec![Value::Nil]),
                }
            });
            promise_handle(lua, &meta_recv, &promise).map_err(mlua::Error::external)
        })
        .map_err(RuntimeError::from)?;
    t.set("recv", recv_fn).map_err(RuntimeError::from)?;

    let promises_send = promises.clone();
    let meta_send = meta.clone();
    let send_bi = bistream.clone();
    let send_fn = lua
        .create_function(move |lua, chunk_value: mlua::Value| {
            let chunk_host = marshal::from_lua(&chunk_value)?;
            let chunk = MessageChunk::from_value(&chunk_host)
                .ok_or_else(|| mlua::Error::RuntimeError("invalid chunk".to_string()))?;
            let promise = promises_send.new_promise();
            let p = promise.clone();
            let bi = send_bi.clone();
            crate::util::spawn_settling(promise.clone(), async move {
                match bi.send(chunk).await {
                    Ok(()) => p.resolve(vec![Value::Nil]),
                    Err(e) => p.reject(e),
                }
            });
            promise_handle(lua, &meta_send, &promise).map_err(mlua::Error::external)
        })
        .map_err(RuntimeError::from)?;
    t.set("send", send_fn).map_err(RuntimeError::from)?;

    let close_send_bi = bistream.clone();
    let close_send_fn = lua
        .create_function(move |_, ()| {
            close_send_bi.close_send();
            Ok(())
        })
        .map_err(RuntimeError::from)?;
    t.set("close_send", close_send_fn).map_err(RuntimeError::from)?;

    let close_bi = bistream;
    let close_streams = streams;
    let close_fn = lua
        .create_function(move |_, ()| {
            close_bi.close();
            close_streams.remove_bistream(close_bi.id());
            Ok(())
        })
        .map_err(RuntimeError::from)?;
    t.set("close", close_fn).map_err(RuntimeError::from)?;

    Ok(t)
}
