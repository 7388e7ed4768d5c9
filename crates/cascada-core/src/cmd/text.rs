//! The built-in `text` handler.
//!
//! Maintains a single string buffer. `_call(s)` appends — this is the path
//! plain `{{ expr }}` output and `print` script lines take, lowered by the
//! compiler into an `@text._call(expr)` expression-style command. A path +
//! `set`/`append` form addresses a string field inside the `data`-shaped
//! side of a render instead (rare; mostly used from scripts that want a
//! named string slot alongside the main text buffer).

use cascada_value::{Error as ValueError, Part, Value};
use parking_lot::Mutex;

use super::Handler;

pub struct TextHandler {
    buf: Mutex<String>,
}

impl Default for TextHandler {
    fn default() -> Self {
        TextHandler { buf: Mutex::new(String::new()) }
    }
}

impl TextHandler {
    pub fn new() -> TextHandler {
        TextHandler::default()
    }

    pub fn as_string(&self) -> String {
        self.buf.lock().clone()
    }
}

impl Handler for TextHandler {
    fn apply(&self, _path: &[Part], method: &str, args: &[Value]) -> Result<Value, ValueError> {
        match method {
            "_call" | "append" => {
                let s = args.first().map(|v| v.to_string()).unwrap_or_default();
                self.buf.lock().push_str(&s);
                Ok(Value::Undef)
            }
            "set" => {
                *self.buf.lock() = args.first().map(|v| v.to_string()).unwrap_or_default();
                Ok(Value::Undef)
            }
            other => Err(ValueError::custom(format!("unknown text handler method {other:?}"))),
        }
    }

    fn snapshot(&self) -> Value {
        Value::from(self.as_string())
    }

    fn restore(&self, snapshot: Value) {
        *self.buf.lock() = snapshot.to_string();
    }

    fn fresh(&self) -> std::sync::Arc<dyn Handler> {
        std::sync::Arc::new(TextHandler::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn call_appends_to_the_buffer() {
        let h = TextHandler::new();
        h.apply(&[], "_call", &[Value::from("a")]).unwrap();
        h.apply(&[], "_call", &[Value::from("b")]).unwrap();
        assert_eq!(h.as_string(), "ab");
    }

    #[test]
    fn restore_replaces_the_whole_buffer() {
        let h = TextHandler::new();
        h.apply(&[], "_call", &[Value::from("keep-me-gone")]).unwrap();
        h.restore(Value::from("reverted"));
        assert_eq!(h.as_string(), "reverted");
    }
}
