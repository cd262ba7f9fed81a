//! Built-in pipeline stages.
//!
//! Each stage is declared in the registration body as a single-key object,
//! `{"remove": {"field": "ssn"}}`. Stages operate on top-level fields of
//! the input map.

use serde_json::Value;

use crate::error::{Result, SearchError};
use crate::node::Document;
use crate::pipeline::Stage;

/// Build one stage from its registration spec. Errors name the offending
/// path (`stages[i]...`).
pub fn build_stage(index: usize, spec: &Value) -> Result<Box<dyn Stage>> {
    let path = format!("stages[{index}]");
    let obj = spec.as_object().ok_or_else(|| {
        SearchError::bad_request(&path, "expected a single-key stage object")
    })?;
    if obj.len() != 1 {
        return Err(SearchError::bad_request(
            &path,
            format!("expected exactly one stage kind, got {}", obj.len()),
        ));
    }
    let (kind, body) = obj.iter().next().expect("non-empty object");
    let path = format!("{path}.{kind}");

    let field = |key: &str| -> Result<String> {
        body.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                SearchError::bad_request(format!("{path}.{key}"), "expected a string")
            })
    };

    match kind.as_str() {
        "set" => Ok(Box::new(SetStage {
            field: field("field")?,
            value: body.get("value").cloned().unwrap_or(Value::Null),
        })),
        "remove" => Ok(Box::new(RemoveStage {
            field: field("field")?,
        })),
        "rename" => Ok(Box::new(RenameStage {
            from: field("from")?,
            to: field("to")?,
        })),
        "lowercase" => Ok(Box::new(CaseStage {
            field: field("field")?,
            upper: false,
        })),
        "uppercase" => Ok(Box::new(CaseStage {
            field: field("field")?,
            upper: true,
        })),
        "trim" => Ok(Box::new(TrimStage {
            field: field("field")?,
        })),
        "fail" => Ok(Box::new(FailStage {
            message: body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("stage configured to fail")
                .to_string(),
        })),
        other => Err(SearchError::bad_request(
            path,
            format!("unknown stage kind '{other}'"),
        )),
    }
}

/// Set a field to a constant value.
#[derive(Debug)]
struct SetStage {
    field: String,
    value: Value,
}

impl Stage for SetStage {
    fn name(&self) -> &str {
        "set"
    }

    fn process(&self, mut input: Document) -> std::result::Result<Document, String> {
        input.insert(self.field.clone(), self.value.clone());
        Ok(input)
    }
}

/// Remove a field if present.
#[derive(Debug)]
struct RemoveStage {
    field: String,
}

impl Stage for RemoveStage {
    fn name(&self) -> &str {
        "remove"
    }

    fn process(&self, mut input: Document) -> std::result::Result<Document, String> {
        input.remove(&self.field);
        Ok(input)
    }
}

/// Move a value to a new key; no-op when the source is absent.
#[derive(Debug)]
struct RenameStage {
    from: String,
    to: String,
}

impl Stage for RenameStage {
    fn name(&self) -> &str {
        "rename"
    }

    fn process(&self, mut input: Document) -> std::result::Result<Document, String> {
        if let Some(value) = input.remove(&self.from) {
            input.insert(self.to.clone(), value);
        }
        Ok(input)
    }
}

/// Lower/uppercase a string field; errors on non-string values.
#[derive(Debug)]
struct CaseStage {
    field: String,
    upper: bool,
}

impl Stage for CaseStage {
    fn name(&self) -> &str {
        if self.upper {
            "uppercase"
        } else {
            "lowercase"
        }
    }

    fn process(&self, mut input: Document) -> std::result::Result<Document, String> {
        match input.get(&self.field) {
            None => Ok(input),
            Some(Value::String(s)) => {
                let converted = if self.upper {
                    s.to_uppercase()
                } else {
                    s.to_lowercase()
                };
                input.insert(self.field.clone(), Value::String(converted));
                Ok(input)
            }
            Some(other) => Err(format!(
                "field '{}' is not a string: {other}",
                self.field
            )),
        }
    }
}

/// Trim surrounding whitespace of a string field.
#[derive(Debug)]
struct TrimStage {
    field: String,
}

impl Stage for TrimStage {
    fn name(&self) -> &str {
        "trim"
    }

    fn process(&self, mut input: Document) -> std::result::Result<Document, String> {
        if let Some(Value::String(s)) = input.get(&self.field) {
            let trimmed = s.trim().to_string();
            input.insert(self.field.clone(), Value::String(trimmed));
        }
        Ok(input)
    }
}

/// Always fails; used to exercise the degradation path.
#[derive(Debug)]
struct FailStage {
    message: String,
}

impl Stage for FailStage {
    fn name(&self) -> &str {
        "fail"
    }

    fn process(&self, _input: Document) -> std::result::Result<Document, String> {
        Err(self.message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().expect("object").clone()
    }

    fn stage(spec: Value) -> Box<dyn Stage> {
        build_stage(0, &spec).expect("build stage")
    }

    #[test]
    fn test_set_and_remove() {
        let output = stage(json!({"set": {"field": "flag", "value": true}}))
            .process(doc(json!({})))
            .expect("process");
        assert_eq!(output.get("flag"), Some(&json!(true)));

        let output = stage(json!({"remove": {"field": "ssn"}}))
            .process(doc(json!({"name": "x", "ssn": "123"})))
            .expect("process");
        assert!(!output.contains_key("ssn"));
        assert_eq!(output.get("name"), Some(&json!("x")));
    }

    #[test]
    fn test_rename_missing_source_is_noop() {
        let input = doc(json!({"a": 1}));
        let output = stage(json!({"rename": {"from": "missing", "to": "b"}}))
            .process(input.clone())
            .expect("process");
        assert_eq!(output, input);
    }

    #[test]
    fn test_case_stages() {
        let output = stage(json!({"lowercase": {"field": "title"}}))
            .process(doc(json!({"title": "LapTop"})))
            .expect("process");
        assert_eq!(output.get("title"), Some(&json!("laptop")));

        let err = stage(json!({"uppercase": {"field": "price"}}))
            .process(doc(json!({"price": 10})))
            .expect_err("non-string");
        assert!(err.contains("price"));
    }

    #[test]
    fn test_trim() {
        let output = stage(json!({"trim": {"field": "name"}}))
            .process(doc(json!({"name": "  x  "})))
            .expect("process");
        assert_eq!(output.get("name"), Some(&json!("x")));
    }

    #[test]
    fn test_missing_required_key_names_path() {
        let err = build_stage(2, &json!({"remove": {}})).expect_err("missing field");
        assert!(err.to_string().contains("stages[2].remove.field"), "{err}");
    }
}
