//! Tool context: one-shot input/output (`spec.md` §4.6).

use parking_lot::Mutex;

use crate::vm::marshal::Value;

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub value: Value,
    pub err: Option<String>,
}

pub struct ToolContext {
    input: Mutex<Value>,
    output: Mutex<Option<ToolOutput>>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self { input: Mutex::new(Value::Nil), output: Mutex::new(None) }
    }

    /// Host side: set the script's input once, before `Run`.
    pub fn set_input(&self, value: Value) {
        *self.input.lock() = value;
    }

    /// Script side: `rt:input()`.
    pub fn input(&self) -> Value {
        self.input.lock().clone()
    }

    /// Script side: `rt:output(value, err)`.
    pub fn set_output(&self, value: Value, err: Option<String>) {
        *self.output.lock() = Some(ToolOutput { value, err });
    }

    /// Host side, after `Run` returns. `None` is the well-defined
    /// "no output" signal for a script that never called `output`.
    pub fn take_output(&self) -> Option<ToolOutput> {
        self.output.lock().clone()
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_defaults_to_nil() {
        let ctx = ToolContext::new();
        assert_eq!(ctx.input(), Value::Nil);
    }

    #[test]
    fn set_input_is_visible_to_the_script_side() {
        let ctx = ToolContext::new();
        ctx.set_input(Value::Str("hello".to_string()));
        assert_eq!(ctx.input(), Value::Str("hello".to_string()));
    }

    #[test]
    fn a_script_that_never_calls_output_yields_none() {
        let ctx = ToolContext::new();
        assert!(ctx.take_output().is_none());
    }

    #[test]
    fn set_output_is_visible_to_the_host_side() {
        let ctx = ToolContext::new();
        ctx.set_output(Value::Int(1), None);
        let out = ctx.take_output().unwrap();
        assert_eq!(out.value, Value::Int(1));
        assert!(out.err.is_none());
    }
}
