//! Scope: the read-only mapping of accumulated outputs visible to templates.
//!
//! Templates and conditional expressions see a nested JSON value with a fixed
//! set of top-level keys (`inputs`, `steps`, `tasks`, `branches`, `nodes`,
//! `rounds`, `last_response`, `iteration`, `evaluation`, `hitl`, `timestamp`,
//! `$TRACE`). Lookup is dotted-path over this concrete value, never reflection
//! over live objects, so the sandbox holds regardless of what the engine has
//! in memory.

use serde_json::{Map, Value};

/// Nested mapping of string → JSON value with dotted-path lookup.
///
/// Built incrementally by the pattern executors; handed by shared reference to
/// the template renderer and expression evaluator.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    root: Map<String, Value>,
}

impl Scope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self { root: Map::new() }
    }

    /// Sets a top-level key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.root.insert(key.into(), value);
    }

    /// Sets a nested path, creating intermediate objects as needed.
    ///
    /// `set_nested(&["tasks", "a", "response"], v)` produces
    /// `{"tasks": {"a": {"response": v}}}`. Non-object intermediates are
    /// replaced by objects.
    pub fn set_nested(&mut self, path: &[&str], value: Value) {
        if path.is_empty() {
            return;
        }
        let mut current = self
            .root
            .entry(path[0].to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if path.len() == 1 {
            *current = value;
            return;
        }
        for seg in &path[1..path.len() - 1] {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            current = current
                .as_object_mut()
                .expect("just ensured object")
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current
            .as_object_mut()
            .expect("just ensured object")
            .insert(path[path.len() - 1].to_string(), value);
    }

    /// Looks up a dotted path. Array elements are addressed by numeric segment.
    ///
    /// Returns `None` when any segment is missing; callers decide whether a
    /// missing value renders empty or is an error.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.root.get(first)?;
        for seg in segments {
            current = match current {
                Value::Object(map) => map.get(seg)?,
                Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// The whole scope as one JSON value.
    pub fn as_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// Returns the top-level map (for serialization into session records).
    pub fn root(&self) -> &Map<String, Value> {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: set + lookup of a top-level key.
    #[test]
    fn set_and_lookup_top_level() {
        let mut scope = Scope::new();
        scope.set("last_response", json!("hi"));
        assert_eq!(scope.lookup("last_response"), Some(&json!("hi")));
        assert_eq!(scope.lookup("missing"), None);
    }

    /// **Scenario**: set_nested creates intermediate objects; lookup follows dots.
    #[test]
    fn set_nested_and_dotted_lookup() {
        let mut scope = Scope::new();
        scope.set_nested(&["tasks", "a", "response"], json!("A-out"));
        scope.set_nested(&["tasks", "b", "response"], json!("B-out"));
        assert_eq!(scope.lookup("tasks.a.response"), Some(&json!("A-out")));
        assert_eq!(scope.lookup("tasks.b.response"), Some(&json!("B-out")));
        assert_eq!(scope.lookup("tasks.c.response"), None);
    }

    /// **Scenario**: numeric segments index into arrays.
    #[test]
    fn lookup_array_by_index() {
        let mut scope = Scope::new();
        scope.set("steps", json!([{"response": "first"}, {"response": "second"}]));
        assert_eq!(scope.lookup("steps.1.response"), Some(&json!("second")));
        assert_eq!(scope.lookup("steps.9.response"), None);
        assert_eq!(scope.lookup("steps.x.response"), None);
    }

    /// **Scenario**: set_nested single segment behaves like set.
    #[test]
    fn set_nested_single_segment() {
        let mut scope = Scope::new();
        scope.set_nested(&["iteration"], json!(3));
        assert_eq!(scope.lookup("iteration"), Some(&json!(3)));
    }
}
