//! `env(name)`: read a process environment variable. Synchronous; missing
//! variables resolve to `nil`, never an error (`spec.md` §6 builtin list).

use crate::vm::marshal::Value;

pub fn env(name: &str) -> Value {
    match std::env::var(name) {
        Ok(v) => Value::Str(v),
        Err(_) => Value::Nil,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variable_is_nil() {
        assert_eq!(env("VESPER_DEFINITELY_UNSET_VARIABLE"), Value::Nil);
    }

    #[test]
    fn set_variable_round_trips() {
        std::env::set_var("VESPER_TEST_ENV_VAR", "hello");
        assert_eq!(env("VESPER_TEST_ENV_VAR"), Value::Str("hello".to_string()));
        std::env::remove_var("VESPER_TEST_ENV_VAR");
    }
}
