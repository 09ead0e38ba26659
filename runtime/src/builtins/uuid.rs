//! `uuid()`: a random v4 UUID as a string. Synchronous.

use crate::vm::marshal::Value;

pub fn uuid() -> Value {
    Value::Str(uuid::Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_calls_never_collide() {
        let a = uuid();
        let b = uuid();
        assert_ne!(a, b);
    }

    #[test]
    fn looks_like_a_uuid() {
        if let Value::Str(s) = uuid() {
            assert_eq!(s.len(), 36);
            assert_eq!(s.chars().filter(|&c| c == '-').count(), 4);
        } else {
            panic!("expected Str");
        }
    }
}
