//! Typed field paths.
//!
//! A path like `profile.city` is a sequence of field selectors. Paths are
//! resolved against a collection schema once, when a query is built, and then
//! evaluated against many records.

use crate::{
    error::Result,
    schema::{CollectionSchema, FieldType},
    Error, Record,
};
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// A path resolved against a collection schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    raw: String,
    segments: Vec<String>,
    field_type: FieldType,
}

impl Path {
    /// Resolve `raw` against `schema`.
    ///
    /// The first segment must be `id`, `etag` or a declared field. Deeper
    /// segments are only allowed below `Json` fields, whose shape the schema
    /// does not describe.
    pub fn resolve(schema: &CollectionSchema, raw: &str) -> Result<Self> {
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(Error::UnknownPath(raw.to_string()));
        }

        let field_type = match segments[0].as_str() {
            "id" | "etag" if segments.len() == 1 => FieldType::String,
            "id" | "etag" => return Err(Error::UnknownPath(raw.to_string())),
            name => {
                let field = schema
                    .field(name)
                    .ok_or_else(|| Error::UnknownPath(raw.to_string()))?;
                match (segments.len(), field.field_type) {
                    (1, ty) => ty,
                    (_, FieldType::Json) => FieldType::Json,
                    _ => return Err(Error::UnknownPath(raw.to_string())),
                }
            }
        };

        Ok(Self {
            raw: raw.to_string(),
            segments,
            field_type,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Extract the value at this path, if present.
    pub fn get(&self, record: &Record) -> Option<Value> {
        let (first, rest) = self.segments.split_first()?;

        let mut current = match first.as_str() {
            "id" => return Some(Value::String(record.id.clone())),
            "etag" => return Some(Value::String(record.etag.clone())),
            name => record.payload.get(name)?,
        };

        for segment in rest {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        Some(current.clone())
    }

    /// Parse a filter operand given as text into this path's type.
    pub fn parse_value(&self, raw: &str) -> Result<Value> {
        let invalid = |reason: String| Error::InvalidFilterValue {
            path: self.raw.clone(),
            reason,
        };

        match self.field_type {
            FieldType::String => Ok(Value::String(raw.to_string())),
            FieldType::Int | FieldType::Timestamp => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| invalid(format!("expected {} ({})", self.field_type, e))),
            FieldType::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| invalid("expected Float".to_string())),
            FieldType::Bool => match raw {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(invalid("expected true or false".to_string())),
            },
            FieldType::Json => {
                Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
            }
        }
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order over optional JSON values.
///
/// Missing and null sort first, then bools, numbers, strings, arrays and
/// objects. Values of the same kind compare naturally.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => compare_numbers(x, y),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(l), Some(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            Value::Object(x.clone()).to_string().cmp(&Value::Object(y.clone()).to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    if let (Some(l), Some(r)) = (x.as_i64(), y.as_i64()) {
        return l.cmp(&r);
    }
    if let (Some(l), Some(r)) = (x.as_u64(), y.as_u64()) {
        return l.cmp(&r);
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::payload_from_value;
    use crate::schema::FieldDef;
    use serde_json::json;

    fn schema() -> CollectionSchema {
        CollectionSchema::new(
            "items",
            vec![
                FieldDef::optional("text", FieldType::String),
                FieldDef::optional("num", FieldType::Int),
                FieldDef::optional("ratio", FieldType::Float),
                FieldDef::optional("done", FieldType::Bool),
                FieldDef::optional("meta", FieldType::Json),
            ],
        )
    }

    fn record(value: Value) -> Record {
        Record::new("r1", payload_from_value(value).unwrap()).unwrap()
    }

    #[test]
    fn resolve_declared_and_reserved() {
        let schema = schema();
        assert_eq!(Path::resolve(&schema, "text").unwrap().field_type(), FieldType::String);
        assert_eq!(Path::resolve(&schema, "id").unwrap().field_type(), FieldType::String);
        assert_eq!(
            Path::resolve(&schema, "meta.owner.name").unwrap().field_type(),
            FieldType::Json
        );
    }

    #[test]
    fn resolve_unknown_fails() {
        let schema = schema();
        for raw in ["nope", "text.inner", "id.x", "", "meta..x"] {
            assert!(
                matches!(Path::resolve(&schema, raw), Err(Error::UnknownPath(_))),
                "expected UnknownPath for {:?}",
                raw
            );
        }
    }

    #[test]
    fn get_nested_values() {
        let schema = schema();
        let rec = record(json!({"text": "foo", "meta": {"tags": ["a", "b"], "owner": {"name": "x"}}}));

        assert_eq!(Path::resolve(&schema, "text").unwrap().get(&rec), Some(json!("foo")));
        assert_eq!(Path::resolve(&schema, "id").unwrap().get(&rec), Some(json!("r1")));
        assert_eq!(
            Path::resolve(&schema, "meta.owner.name").unwrap().get(&rec),
            Some(json!("x"))
        );
        assert_eq!(
            Path::resolve(&schema, "meta.tags.1").unwrap().get(&rec),
            Some(json!("b"))
        );
        assert_eq!(Path::resolve(&schema, "num").unwrap().get(&rec), None);
    }

    #[test]
    fn parse_typed_values() {
        let schema = schema();
        assert_eq!(Path::resolve(&schema, "num").unwrap().parse_value("42").unwrap(), json!(42));
        assert_eq!(
            Path::resolve(&schema, "ratio").unwrap().parse_value("0.5").unwrap(),
            json!(0.5)
        );
        assert_eq!(
            Path::resolve(&schema, "done").unwrap().parse_value("true").unwrap(),
            json!(true)
        );
        assert!(matches!(
            Path::resolve(&schema, "num").unwrap().parse_value("many"),
            Err(Error::InvalidFilterValue { .. })
        ));
        assert!(Path::resolve(&schema, "done").unwrap().parse_value("yes").is_err());
    }

    #[test]
    fn value_ordering() {
        assert_eq!(compare_values(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(null)), None), Ordering::Equal);
        assert_eq!(compare_values(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(1.5)), Some(&json!(1))), Ordering::Greater);
        assert_eq!(compare_values(Some(&json!("aaa")), Some(&json!("bar"))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(true)), Some(&json!(0))), Ordering::Less);
        assert_eq!(
            compare_values(Some(&json!([1, 2])), Some(&json!([1, 2, 0]))),
            Ordering::Less
        );
    }
}
