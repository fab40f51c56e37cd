//! Value coercions shared by units and extensions.
//!
//! The model is stateless; every render context hands out the same instance.

use crate::value::Value;

#[derive(Debug)]
pub struct ObjectModel {
    _private: (),
}

static OBJECT_MODEL: ObjectModel = ObjectModel { _private: () };

impl ObjectModel {
    pub fn shared() -> &'static ObjectModel {
        &OBJECT_MODEL
    }

    pub fn to_bool(&self, value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0 && !x.is_nan(),
            Value::Str(s) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn to_string(&self, value: &Value) -> String {
        value.to_string()
    }

    pub fn to_number(&self, value: &Value) -> Option<f64> {
        match value {
            Value::Int(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Iteration view: lists as-is, map keys, nothing for null, otherwise a
    /// single element.
    pub fn to_collection(&self, value: &Value) -> Vec<Value> {
        match value {
            Value::Null => Vec::new(),
            Value::List(items) => items.clone(),
            Value::Map(map) => map.keys().map(|k| Value::Str(k.clone())).collect(),
            other => vec![other.clone()],
        }
    }

    pub fn resolve_property(&self, target: &Value, name: &str) -> Value {
        match target {
            Value::Map(map) => map.get(name).cloned().unwrap_or_default(),
            Value::List(items) => match name {
                "length" | "size" => Value::Int(items.len() as i64),
                _ => name
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            },
            Value::Str(s) if name == "length" => Value::Int(s.chars().count() as i64),
            _ => Value::Null,
        }
    }

    pub fn resolve_index(&self, target: &Value, index: &Value) -> Value {
        match (target, index) {
            (Value::List(items), _) => self
                .to_number(index)
                .filter(|n| *n >= 0.0)
                .and_then(|n| items.get(n as usize).cloned())
                .unwrap_or_default(),
            (_, Value::Str(name)) => self.resolve_property(target, name),
            (_, other) => self.resolve_property(target, &other.to_string()),
        }
    }

    pub fn equals(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Str(_), Value::Int(_) | Value::Float(_))
            | (Value::Int(_) | Value::Float(_), Value::Str(_)) => {
                match (self.to_number(left), self.to_number(right)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => left == right,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shared_instance() {
        assert!(std::ptr::eq(ObjectModel::shared(), ObjectModel::shared()));
    }

    #[test]
    fn test_truthiness() {
        let om = ObjectModel::shared();
        assert!(!om.to_bool(&Value::Null));
        assert!(!om.to_bool(&Value::from("")));
        assert!(!om.to_bool(&Value::from("false")));
        assert!(om.to_bool(&Value::from("no")));
        assert!(!om.to_bool(&Value::List(vec![])));
        assert!(om.to_bool(&Value::Int(3)));
        assert!(om.to_bool(&Value::object(1u8)));
    }

    #[test]
    fn test_property_resolution() {
        let om = ObjectModel::shared();
        let page = Value::from(json!({"title": "Home", "tags": ["a", "b", "c"]}));
        assert_eq!(om.resolve_property(&page, "title"), Value::from("Home"));
        assert_eq!(om.resolve_property(&page, "missing"), Value::Null);

        let tags = om.resolve_property(&page, "tags");
        assert_eq!(om.resolve_property(&tags, "length"), Value::Int(3));
        assert_eq!(om.resolve_property(&tags, "1"), Value::from("b"));
        assert_eq!(om.resolve_index(&tags, &Value::Int(2)), Value::from("c"));
        assert_eq!(om.resolve_index(&tags, &Value::Int(-1)), Value::Null);
        assert_eq!(om.resolve_index(&page, &Value::from("title")), Value::from("Home"));
    }

    #[test]
    fn test_collections_and_equality() {
        let om = ObjectModel::shared();
        let map = Value::from(json!({"a": 1, "b": 2}));
        assert_eq!(om.to_collection(&map), vec![Value::from("a"), Value::from("b")]);
        assert!(om.to_collection(&Value::Null).is_empty());
        assert_eq!(om.to_collection(&Value::Int(4)), vec![Value::Int(4)]);
        assert!(om.equals(&Value::from("2"), &Value::Int(2)));
        assert!(!om.equals(&Value::from("x"), &Value::Int(2)));
    }
}
