//! Action parameter model: typed metadata, string conversion, signature lines.
//!
//! External parameters arrive as strings (query or header values). Each
//! declared parameter converts its raw string into a JSON value of the
//! declared type before the action's typed argument struct is deserialized.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

// =============================================================================
// Parameter types
// =============================================================================

/// Parameter type for action inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    /// Comma-separated on the wire, or a JSON array.
    StringList,
    Enum(Vec<String>),
    /// Arbitrary JSON text.
    Json,
    Optional(Box<ParamType>),
}

impl ParamType {
    /// Convert a raw external value to this type.
    pub fn convert(&self, raw: &str) -> Result<Value, String> {
        match self {
            ParamType::String => Ok(Value::String(raw.to_string())),
            ParamType::Int => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("expected integer, got '{}'", raw)),
            ParamType::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected number, got '{}'", raw)),
            ParamType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
                _ => Err(format!("expected boolean, got '{}'", raw)),
            },
            ParamType::StringList => {
                let trimmed = raw.trim();
                if trimmed.starts_with('[') {
                    let value: Value = serde_json::from_str(trimmed)
                        .map_err(|e| format!("invalid list: {}", e))?;
                    self.validate(&value)?;
                    return Ok(value);
                }
                Ok(Value::Array(
                    trimmed
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| Value::String(s.to_string()))
                        .collect(),
                ))
            }
            ParamType::Enum(_) => {
                let value = Value::String(raw.to_string());
                self.validate(&value)?;
                Ok(value)
            }
            ParamType::Json => {
                serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {}", e))
            }
            ParamType::Optional(inner) => {
                if raw.is_empty() {
                    Ok(Value::Null)
                } else {
                    inner.convert(raw)
                }
            }
        }
    }

    /// Validate a JSON value against this parameter type.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self {
            ParamType::String => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(format!("expected string, got {}", value_type_name(value)))
                }
            }
            ParamType::Int => {
                if value.is_i64() || value.is_u64() {
                    Ok(())
                } else {
                    Err(format!("expected integer, got {}", value_type_name(value)))
                }
            }
            ParamType::Float => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(format!("expected number, got {}", value_type_name(value)))
                }
            }
            ParamType::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(format!("expected boolean, got {}", value_type_name(value)))
                }
            }
            ParamType::StringList => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| format!("expected array, got {}", value_type_name(value)))?;
                for (i, item) in arr.iter().enumerate() {
                    if !item.is_string() {
                        return Err(format!(
                            "expected string at index {}, got {}",
                            i,
                            value_type_name(item)
                        ));
                    }
                }
                Ok(())
            }
            ParamType::Enum(variants) => match value.as_str() {
                Some(s) if variants.iter().any(|v| v == s) => Ok(()),
                Some(s) => Err(format!(
                    "invalid enum value '{}', expected one of: {}",
                    s,
                    variants.join(", ")
                )),
                None => Err(format!(
                    "expected string for enum, got {}",
                    value_type_name(value)
                )),
            },
            ParamType::Json => Ok(()),
            ParamType::Optional(inner) => {
                if value.is_null() {
                    Ok(())
                } else {
                    inner.validate(value)
                }
            }
        }
    }

    /// Human-readable type name for metadata export.
    pub fn display_name(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Int => "integer".to_string(),
            ParamType::Float => "number".to_string(),
            ParamType::Bool => "boolean".to_string(),
            ParamType::StringList => "string[]".to_string(),
            ParamType::Enum(variants) => format!("enum({})", variants.join("|")),
            ParamType::Json => "json".to_string(),
            ParamType::Optional(inner) => format!("{}?", inner.display_name()),
        }
    }
}

fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Parameter definition
// =============================================================================

/// A single named parameter of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParamDef {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            default: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && !matches!(self.param_type, ParamType::Optional(_))
    }

    /// Resolve the argument value from an optional raw string.
    pub fn bind(&self, raw: Option<&str>) -> Result<Value, String> {
        match raw {
            Some(raw) => self.param_type.convert(raw),
            None => match &self.default {
                Some(default) => Ok(default.clone()),
                None if self.is_required() => Err("missing required parameter".to_string()),
                None => Ok(Value::Null),
            },
        }
    }

    /// `name: type`, with `?` after the name when the parameter may be omitted.
    pub fn signature(&self) -> String {
        let optional = if self.is_required() { "" } else { "?" };
        format!(
            "{}{}: {}",
            self.name,
            optional,
            self.param_type.display_name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_scalars() {
        assert_eq!(ParamType::Int.convert(" 42 ").unwrap(), json!(42));
        assert_eq!(ParamType::Float.convert("2.5").unwrap(), json!(2.5));
        assert_eq!(ParamType::Bool.convert("YES").unwrap(), json!(true));
        assert_eq!(ParamType::String.convert("a b").unwrap(), json!("a b"));
        assert!(ParamType::Int.convert("4.2").is_err());
        assert!(ParamType::Float.convert("NaN").is_err());
        assert!(ParamType::Bool.convert("maybe").is_err());
    }

    #[test]
    fn test_convert_string_list() {
        assert_eq!(
            ParamType::StringList.convert("a, b,,c").unwrap(),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            ParamType::StringList.convert(r#"["x","y"]"#).unwrap(),
            json!(["x", "y"])
        );
        assert!(ParamType::StringList.convert("[1,2]").is_err());
    }

    #[test]
    fn test_convert_enum_and_json() {
        let order = ParamType::Enum(vec!["asc".to_string(), "desc".to_string()]);
        assert_eq!(order.convert("desc").unwrap(), json!("desc"));
        assert!(order.convert("sideways").is_err());
        assert_eq!(
            ParamType::Json.convert(r#"{"a":1}"#).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_optional_empty_is_null() {
        let t = ParamType::Optional(Box::new(ParamType::Int));
        assert_eq!(t.convert("").unwrap(), Value::Null);
        assert_eq!(t.convert("7").unwrap(), json!(7));
        assert!(t.validate(&Value::Null).is_ok());
    }

    #[test]
    fn test_bind_uses_default_when_absent() {
        let p = ParamDef::new("limit", ParamType::Int).with_default(json!(10));
        assert!(!p.is_required());
        assert_eq!(p.bind(None).unwrap(), json!(10));
        assert_eq!(p.bind(Some("3")).unwrap(), json!(3));
    }

    #[test]
    fn test_bind_missing_required() {
        let p = ParamDef::new("target", ParamType::String);
        assert!(p.is_required());
        assert!(p.bind(None).is_err());
    }

    #[test]
    fn test_signature() {
        assert_eq!(ParamDef::new("q", ParamType::String).signature(), "q: string");
        let p = ParamDef::new("n", ParamType::Optional(Box::new(ParamType::Int)));
        assert_eq!(p.signature(), "n?: integer?");
    }
}
