//! Tool parameter schema normalization.
//!
//! Tool declarations arrive with JSON-Schema-like parameter trees written
//! by hand or generated by other tooling, so casing and numeric fields are
//! unreliable: `"type": "INTEGER"` and `"minimum": "5"` both occur in the
//! wild. Backends reject them. This walk produces the strict form the
//! OpenAI-family wire expects.

use serde_json::{Map, Value};

/// Constraint fields coerced from string to number when parseable.
const NUMBER_FIELDS: [&str; 3] = ["minimum", "maximum", "multipleOf"];

/// Length/count fields coerced from string to integer when parseable.
const INTEGER_FIELDS: [&str; 4] = ["minLength", "maxLength", "minItems", "maxItems"];

/// Normalize a schema tree for the wire.
///
/// - `type` strings are lower-cased
/// - numeric-constraint fields given as strings become numbers
/// - length/count fields given as strings become integers
/// - objects and arrays are walked recursively; other values pass through
pub fn convert_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(convert_object(map)),
        Value::Array(items) => Value::Array(items.iter().map(convert_schema).collect()),
        other => other.clone(),
    }
}

fn convert_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        let converted = if key == "type" {
            lowercase_type(value)
        } else if NUMBER_FIELDS.contains(&key.as_str()) {
            coerce_number(value)
        } else if INTEGER_FIELDS.contains(&key.as_str()) {
            coerce_integer(value)
        } else {
            convert_schema(value)
        };
        out.insert(key.clone(), converted);
    }
    out
}

fn lowercase_type(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.to_lowercase()),
        // Union types: {"type": ["STRING", "NULL"]}
        Value::Array(items) => Value::Array(items.iter().map(lowercase_type).collect()),
        other => other.clone(),
    }
}

fn coerce_number(value: &Value) -> Value {
    match value {
        Value::String(s) => match s.trim().parse::<f64>() {
            // Whole values stay integers on the wire; "5" must become 5,
            // not 5.0.
            Ok(n) if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 => {
                Value::Number(serde_json::Number::from(n as i64))
            }
            Ok(n) => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or_else(|| value.clone()),
            Err(_) => value.clone(),
        },
        other => other.clone(),
    }
}

fn coerce_integer(value: &Value) -> Value {
    match value {
        Value::String(s) => match s.trim().parse::<u64>() {
            Ok(n) => Value::Number(n.into()),
            Err(_) => value.clone(),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_lowercased() {
        let schema = json!({"type": "INTEGER", "minimum": "5"});
        assert_eq!(
            convert_schema(&schema),
            json!({"type": "integer", "minimum": 5})
        );
    }

    #[test]
    fn test_number_and_integer_coercion() {
        let schema = json!({
            "type": "Number",
            "minimum": "1.5",
            "maximum": "10",
            "multipleOf": "0.5",
            "minLength": "2",
            "maxItems": "8"
        });
        let converted = convert_schema(&schema);
        assert_eq!(converted["type"], "number");
        assert_eq!(converted["minimum"], json!(1.5));
        assert_eq!(converted["maximum"], json!(10));
        assert_eq!(converted["multipleOf"], json!(0.5));
        assert_eq!(converted["minLength"], json!(2));
        assert_eq!(converted["maxItems"], json!(8));
    }

    #[test]
    fn test_unparseable_strings_pass_through() {
        let schema = json!({"minimum": "not a number", "minItems": "many"});
        let converted = convert_schema(&schema);
        assert_eq!(converted["minimum"], "not a number");
        assert_eq!(converted["minItems"], "many");
    }

    #[test]
    fn test_recursion_into_properties_and_items() {
        let schema = json!({
            "type": "OBJECT",
            "properties": {
                "count": {"type": "INTEGER", "minimum": "0"},
                "tags": {
                    "type": "ARRAY",
                    "items": {"type": "STRING", "maxLength": "64"}
                }
            }
        });
        let converted = convert_schema(&schema);
        assert_eq!(converted["type"], "object");
        assert_eq!(converted["properties"]["count"]["type"], "integer");
        assert_eq!(converted["properties"]["count"]["minimum"], json!(0));
        assert_eq!(converted["properties"]["tags"]["items"]["type"], "string");
        assert_eq!(
            converted["properties"]["tags"]["items"]["maxLength"],
            json!(64)
        );
    }

    #[test]
    fn test_union_type_array_lowercased() {
        let schema = json!({"type": ["STRING", "NULL"]});
        assert_eq!(convert_schema(&schema)["type"], json!(["string", "null"]));
    }

    #[test]
    fn test_already_numeric_untouched() {
        let schema = json!({"minimum": 3, "maxLength": 10});
        let converted = convert_schema(&schema);
        assert_eq!(converted["minimum"], json!(3));
        assert_eq!(converted["maxLength"], json!(10));
    }

    #[test]
    fn test_primitives_pass_through() {
        assert_eq!(convert_schema(&json!(true)), json!(true));
        assert_eq!(convert_schema(&json!("x")), json!("x"));
        assert_eq!(convert_schema(&json!(null)), json!(null));
    }

    #[test]
    fn test_enum_values_not_lowercased() {
        // Only the `type` keyword is case-normalized; enum members are data.
        let schema = json!({"type": "STRING", "enum": ["HIGH", "LOW"]});
        let converted = convert_schema(&schema);
        assert_eq!(converted["enum"], json!(["HIGH", "LOW"]));
    }
}
