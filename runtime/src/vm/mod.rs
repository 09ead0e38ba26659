//! Thin capability shim over the Luau VM (`mlua`, `luau` feature).
//!
//! This is the only module that touches `mlua` directly; every other module
//! talks to Luau through [`crate::vm::marshal::Value`] and the helpers here.
//! The capability list matches `spec.md` §6 (compile, load, create thread,
//! resume, yield, register native function, stack ops) but is expressed
//! through `mlua`'s safe high-level API (tables/values) rather than raw stack
//! opcodes, which is the idiomatic way to embed Luau from Rust.

pub mod marshal;

use mlua::{Compiler, Lua, MultiValue, Table, Thread, ThreadStatus};

use crate::error::{RuntimeError, RuntimeResult};

/// Optimization level passed to the Luau bytecode compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    O0,
    O1,
    O2,
}

impl OptLevel {
    fn as_u8(self) -> u8 {
        match self {
            OptLevel::O0 => 0,
            OptLevel::O1 => 1,
            OptLevel::O2 => 2,
        }
    }
}

/// Observed status of a resumed thread.
#[derive(Debug, Clone)]
pub enum CoStatus {
    /// The thread finished (returned normally).
    Ok,
    /// The thread yielded and can be resumed again.
    Yield,
    /// The thread errored; the string is the VM's error message.
    Error(String),
}

/// Compile Luau source to bytecode and load it as a callable function.
///
/// Compile errors surface here rather than at resume time, matching the
/// spec's "Compile" error kind being reported synchronously from `Run` /
/// `require`.
pub fn compile(lua: &Lua, source: &str, chunk_name: &str, level: OptLevel) -> RuntimeResult<mlua::Function> {
    let compiler = Compiler::new().set_optimization_level(level.as_u8());
    let bytecode = compiler.compile(source);
    lua.load(&bytecode)
        .set_name(chunk_name)
        .into_function()
        .map_err(|e| RuntimeError::Compile(format!("{chunk_name}: {e}")))
}

/// Compile already-produced bytecode (the module registry's cache path).
pub fn load_bytecode(lua: &Lua, bytecode: &[u8], chunk_name: &str) -> RuntimeResult<mlua::Function> {
    lua.load(bytecode)
        .set_name(chunk_name)
        .into_function()
        .map_err(|e| RuntimeError::Compile(format!("{chunk_name}: {e}")))
}

/// Produce raw bytecode without loading it, for the module registry's cache.
pub fn compile_bytes(source: &str, level: OptLevel) -> Vec<u8> {
    Compiler::new().set_optimization_level(level.as_u8()).compile(source)
}

/// Create a fresh cooperative thread sharing globals with `lua`.
pub fn new_thread(lua: &Lua, func: mlua::Function) -> RuntimeResult<Thread> {
    lua.create_thread(func).map_err(RuntimeError::from)
}

/// Resume a thread with the given arguments, observing its terminal status.
///
/// `Ok`/`Error` are terminal: the thread must not be resumed again. `Yield`
/// means the thread called `coroutine.yield(...)` (directly, or indirectly
/// through the shared `await` method installed by
/// [`install_await_metatable`]) and is waiting for the event loop to push a
/// result and resume it.
pub fn resume(thread: &Thread, args: MultiValue) -> (CoStatus, MultiValue) {
    match thread.resume::<_, MultiValue>(args) {
        Ok(values) => match thread.status() {
            ThreadStatus::Resumable => (CoStatus::Yield, values),
            _ => (CoStatus::Ok, values),
        },
        Err(e) => (CoStatus::Error(e.to_string()), MultiValue::new()),
    }
}

/// Luau source for the shared `await` method. Every Promise/Stream/Timeout
/// handle table gets this installed as `__index.await` via a shared
/// metatable, so that `:await()` performs a plain Luau-level
/// `coroutine.yield`, matching Design Note 3 in `spec.md` §9 (no Rust stack
/// frame has to survive a `lua_yield`).
const AWAIT_PRELUDE: &str = r#"
return function(self)
    return coroutine.yield(self._promise_id or self._id)
end
"#;

/// Build (or fetch) the shared metatable installed on every handle table the
/// host returns to a script. `__index` falls back to per-instance fields
/// first (method entries like `cancel`/`send`/`recv`/`close` are set
/// directly on the instance table by the primitive that created it); `await`
/// lives only on the shared metatable to avoid re-creating a closure per
/// handle.
pub fn install_handle_metatable(lua: &Lua) -> RuntimeResult<Table> {
    let await_fn: mlua::Function = lua
        .load(AWAIT_PRELUDE)
        .set_name("=[await]")
        .eval()
        .map_err(RuntimeError::from)?;

    let index = lua.create_table().map_err(RuntimeError::from)?;
    index.set("await", await_fn).map_err(RuntimeError::from)?;

    let meta = lua.create_table().map_err(RuntimeError::from)?;
    meta.set("__index", index).map_err(RuntimeError::from)?;
    Ok(meta)
}

/// Attach the shared handle metatable to a freshly created table.
pub fn make_handle_table(lua: &Lua, meta: &Table) -> RuntimeResult<Table> {
    let t = lua.create_table().map_err(RuntimeError::from)?;
    t.set_metatable(Some(meta.clone()));
    Ok(t)
}
