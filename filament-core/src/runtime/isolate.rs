//! Callback isolation.
//!
//! User callbacks (path subscribers, update handlers, event listeners) run
//! behind `catch_unwind` so that one failing callback never prevents its
//! siblings from running. Failures are logged and swallowed.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Run `f`, catching a panic and logging it under `what`.
///
/// Returns `None` if the callback panicked.
pub(crate) fn isolate<T>(what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            tracing::error!(
                callback = what,
                panic = %panic_message(payload.as_ref()),
                "callback panicked; continuing with remaining callbacks"
            );
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolate_returns_value() {
        assert_eq!(isolate("ok", || 7), Some(7));
    }

    #[test]
    fn isolate_swallows_panic() {
        let result: Option<()> = isolate("boom", || panic!("boom"));
        assert!(result.is_none());
    }

    #[test]
    fn panic_message_extracts_strings() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }
}
