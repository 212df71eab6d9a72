//! Repair of near-miss structured responses
//!
//! Models often wrap JSON in markdown fences or prose, return a one-element
//! array, stringify nested objects, or emit a scalar where a list was asked
//! for. These are repaired before validation.

use serde_json::{Map, Value};

use super::OutputSchema;

/// Turn raw model text into a JSON object shaped for `schema`.
pub fn sanitize(raw: &str, schema: &OutputSchema) -> Result<Value, String> {
    let mut value = parse_lenient(raw).ok_or_else(|| "response is not valid JSON".to_string())?;

    // Stringified documents.
    for _ in 0..2 {
        let inner = match &value {
            Value::String(s) => parse_lenient(s),
            _ => None,
        };
        match inner {
            Some(inner) => value = inner,
            None => break,
        }
    }

    if let Value::Array(mut items) = value {
        if items.len() == 1 && items[0].is_object() {
            value = items.remove(0);
        } else {
            return Err("expected a JSON object, got a list".to_string());
        }
    }

    let Value::Object(object) = value else {
        return Err("expected a JSON object".to_string());
    };

    let mut object = unstringify(object);
    coerce_fields(&mut object, schema);
    Ok(Value::Object(object))
}

fn parse_lenient(raw: &str) -> Option<Value> {
    let text = strip_fences(raw.trim());

    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

fn strip_fences(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    // Skip the language tag, if any.
    let body = match after.find('\n') {
        Some(nl) if !after[..nl].contains('{') && !after[..nl].contains('[') => &after[nl + 1..],
        _ => after,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

fn unstringify(object: Map<String, Value>) -> Map<String, Value> {
    object
        .into_iter()
        .map(|(key, value)| (key, unstringify_value(value)))
        .collect()
}

fn unstringify_value(value: Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
                || (trimmed.starts_with('[') && trimmed.ends_with(']'));
            if looks_structured {
                if let Ok(inner) = serde_json::from_str::<Value>(trimmed) {
                    return unstringify_value(inner);
                }
            }
            Value::String(s)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(unstringify_value).collect()),
        Value::Object(object) => Value::Object(unstringify(object)),
        other => other,
    }
}

fn coerce_fields(object: &mut Map<String, Value>, schema: &OutputSchema) {
    for key in schema.lists {
        match object.get(*key) {
            Some(Value::Null) => {
                object.remove(*key);
            }
            Some(Value::Array(_)) | None => {}
            Some(_) => {
                if let Some(scalar) = object.remove(*key) {
                    object.insert(key.to_string(), Value::Array(vec![scalar]));
                }
            }
        }
    }

    for key in schema.numbers {
        if let Some(Value::String(s)) = object.get(*key) {
            let s = s.trim();
            let number = s
                .parse::<i64>()
                .ok()
                .map(Value::from)
                .or_else(|| s.parse::<f64>().ok().map(Value::from));
            if let Some(number) = number {
                object.insert(key.to_string(), number);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: OutputSchema = OutputSchema {
        name: "test",
        required: &["name"],
        lists: &["tags"],
        numbers: &["year"],
    };

    #[test]
    fn test_strips_fences_and_prose() {
        let raw = "Sure! Here you go:\n```json\n{\"name\": \"a\"}\n```\nHope that helps.";
        assert_eq!(sanitize(raw, &SCHEMA).unwrap(), json!({"name": "a"}));

        let raw = "The answer is {\"name\": \"b\"} as requested";
        assert_eq!(sanitize(raw, &SCHEMA).unwrap(), json!({"name": "b"}));
    }

    #[test]
    fn test_unwraps_single_element_array() {
        let raw = r#"[{"name": "a"}]"#;
        assert_eq!(sanitize(raw, &SCHEMA).unwrap(), json!({"name": "a"}));
        assert!(sanitize(r#"[{"name": "a"}, {"name": "b"}]"#, &SCHEMA).is_err());
    }

    #[test]
    fn test_parses_stringified_json() {
        let raw = r#""{\"name\": \"a\", \"tags\": \"[\\\"x\\\"]\"}""#;
        assert_eq!(
            sanitize(raw, &SCHEMA).unwrap(),
            json!({"name": "a", "tags": ["x"]})
        );
    }

    #[test]
    fn test_list_and_number_coercion() {
        let raw = r#"{"name": "a", "tags": "solo", "year": "2026"}"#;
        assert_eq!(
            sanitize(raw, &SCHEMA).unwrap(),
            json!({"name": "a", "tags": ["solo"], "year": 2026})
        );

        let raw = r#"{"name": "a", "tags": null}"#;
        assert_eq!(sanitize(raw, &SCHEMA).unwrap(), json!({"name": "a"}));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(sanitize("no json here", &SCHEMA).is_err());
        assert!(sanitize("42", &SCHEMA).is_err());
    }
}
