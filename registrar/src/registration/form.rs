//! Registration form validation.
//!
//! An event's `form_schema` is a JSON array of field definitions:
//!
//! ```json
//! [
//!   {"name": "full_name", "type": "text", "required": true, "max_length": 120},
//!   {"name": "company", "type": "text"},
//!   {"name": "shirt_size", "type": "select", "required": true, "options": ["S", "M", "L"]},
//!   {"name": "newsletter", "type": "checkbox"}
//! ]
//! ```
//!
//! Submitted values are checked per field and the accepted answers are
//! returned as a new object; keys that are not in the schema are dropped.

use serde::Deserialize;
use serde_json::{Map, Value};

use super::errors::FieldError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Textarea,
    Email,
    Phone,
    Number,
    Select,
    Checkbox,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    pub max_length: Option<usize>,
}

/// Parse an event's form schema. A null schema means the event collects no answers.
pub fn parse_schema(schema: &Value) -> anyhow::Result<Vec<FormField>> {
    if schema.is_null() {
        return Ok(Vec::new());
    }
    let fields = serde_json::from_value(schema.clone())?;
    Ok(fields)
}

/// Validate `data` against `fields`, returning the cleaned answers or every field error.
pub fn validate(fields: &[FormField], data: &Value, max_field_length: usize) -> Result<Value, Vec<FieldError>> {
    let empty = Map::new();
    let submitted = match data {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => return Err(vec![FieldError::new("form_data", "must be an object")]),
    };

    let mut cleaned = Map::new();
    let mut errors = Vec::new();

    for field in fields {
        let value = submitted.get(&field.name).filter(|v| !is_blank(v));

        let Some(value) = value else {
            if field.required {
                errors.push(FieldError::new(&field.name, "is required"));
            }
            continue;
        };

        match check_value(field, value, max_field_length) {
            Ok(v) => {
                cleaned.insert(field.name.clone(), v);
            }
            Err(message) => errors.push(FieldError::new(&field.name, message)),
        }
    }

    if errors.is_empty() { Ok(Value::Object(cleaned)) } else { Err(errors) }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn check_value(field: &FormField, value: &Value, max_field_length: usize) -> Result<Value, String> {
    let limit = field.max_length.map_or(max_field_length, |l| l.min(max_field_length));

    match field.kind {
        FieldKind::Checkbox => match value {
            Value::Bool(b) => {
                if field.required && !b {
                    Err("must be checked".to_string())
                } else {
                    Ok(Value::Bool(*b))
                }
            }
            _ => Err("must be true or false".to_string()),
        },
        FieldKind::Number => match value {
            Value::Number(n) => Ok(Value::Number(n.clone())),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| "must be a number".to_string()),
            _ => Err("must be a number".to_string()),
        },
        _ => {
            let Value::String(s) = value else {
                return Err("must be a string".to_string());
            };
            let s = s.trim();
            if s.chars().count() > limit {
                return Err(format!("must be at most {limit} characters"));
            }
            match field.kind {
                FieldKind::Email if !looks_like_email(s) => Err("must be a valid email address".to_string()),
                FieldKind::Phone if !looks_like_phone(s) => Err("must be a valid phone number".to_string()),
                FieldKind::Select if !field.options.iter().any(|o| o == s) => Err("is not one of the allowed options".to_string()),
                _ => Ok(Value::String(s.to_string())),
            }
        }
    }
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'),
        None => false,
    }
}

fn looks_like_phone(s: &str) -> bool {
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
    (7..=15).contains(&digits) && s.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'))
}
