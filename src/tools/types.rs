//! Tool descriptor and input schema types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::RegistryError;

/// Cross-handler sharing policy for a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSharing {
    /// Any handler may invoke the tool.
    Open,
    /// Only the owning handler may invoke the tool.
    OwnerOnly,
    /// The owner plus the listed handlers may invoke the tool.
    AllowList(Vec<String>),
}

impl ToolSharing {
    /// Whether `caller` may invoke a tool owned by `owner` under this policy.
    pub fn permits(&self, owner: &str, caller: &str) -> bool {
        if owner == caller {
            return true;
        }
        match self {
            ToolSharing::Open => true,
            ToolSharing::OwnerOnly => false,
            ToolSharing::AllowList(callers) => callers.iter().any(|c| c == caller),
        }
    }
}

impl std::str::FromStr for ToolSharing {
    type Err = String;

    /// Parses `open`, `owner`, or `allow:<handler>,<handler>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_lowercase().as_str() {
            "open" => Ok(ToolSharing::Open),
            "owner" | "owner_only" => Ok(ToolSharing::OwnerOnly),
            _ => match value.split_once(':') {
                Some((prefix, list)) if prefix.eq_ignore_ascii_case("allow") => {
                    Ok(ToolSharing::AllowList(
                        list.split(',')
                            .map(|h| h.trim().to_string())
                            .filter(|h| !h.is_empty())
                            .collect(),
                    ))
                }
                _ => Err(format!("Unknown tool sharing policy: {}", s)),
            },
        }
    }
}

/// JSON type expected for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        }
    }
}

/// Parameter specification for tool inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
}

impl ParamSpec {
    fn new(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            required: false,
            description: description.into(),
            default: None,
            min_length: None,
            minimum: None,
            allowed: Vec::new(),
        }
    }

    /// Optional string parameter
    pub fn string(description: impl Into<String>) -> Self {
        Self::new(ParamType::String, description)
    }

    /// Optional integer parameter
    pub fn integer(description: impl Into<String>) -> Self {
        Self::new(ParamType::Integer, description)
    }

    /// Mark the parameter as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value used when the caller omits the parameter
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Minimum string length, in characters
    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    /// Minimum integer value
    pub fn minimum(mut self, min: i64) -> Self {
        self.minimum = Some(min);
        self
    }

    /// Restrict a string parameter to a fixed set of values
    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| v.to_string()).collect();
        self
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        if !self.param_type.matches(value) {
            return Err(format!("expected {}", self.param_type.as_str()));
        }

        if let Some(s) = value.as_str() {
            let len = s.trim().chars().count();
            if let Some(min) = self.min_length {
                if len < min {
                    return Err(format!("must be at least {} characters", min));
                }
            }
            if !self.allowed.is_empty() && !self.allowed.iter().any(|a| a == s) {
                return Err(format!("must be one of: {}", self.allowed.join(", ")));
            }
        }

        if let (Some(min), Some(n)) = (self.minimum, value.as_i64()) {
            if n < min {
                return Err(format!("must be at least {}", min));
            }
        }

        Ok(())
    }
}

/// Static description of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique within the registry.
    pub name: String,
    pub description: String,
    pub input_schema: BTreeMap<String, ParamSpec>,
    /// Owning handler; filled in by the registry on registration.
    #[serde(default)]
    pub owner: String,
    /// Per-tool sharing override. `None` uses the registry default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sharing: Option<ToolSharing>,
}

impl ToolDescriptor {
    /// Create a descriptor with an empty input schema
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: BTreeMap::new(),
            owner: String::new(),
            sharing: None,
        }
    }

    /// Add a parameter to the input schema
    pub fn with_param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.input_schema.insert(name.into(), spec);
        self
    }

    /// Override the registry's sharing policy for this tool
    pub fn with_sharing(mut self, sharing: ToolSharing) -> Self {
        self.sharing = Some(sharing);
        self
    }

    /// Validate `input` against the schema and fill in defaults.
    ///
    /// A `null` input is treated as an empty object.
    pub fn prepare_input(&self, input: Value) -> Result<Value, RegistryError> {
        let invalid = |message: String| RegistryError::InvalidInput {
            tool: self.name.clone(),
            message,
        };

        let mut object = match input {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(invalid(format!(
                    "input must be an object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        if let Some(unknown) = object.keys().find(|k| !self.input_schema.contains_key(*k)) {
            return Err(invalid(format!("unexpected parameter '{}'", unknown)));
        }

        for (name, spec) in &self.input_schema {
            let missing = object.get(name).map_or(true, Value::is_null);
            if missing {
                if let Some(default) = &spec.default {
                    object.insert(name.clone(), default.clone());
                } else if spec.required {
                    return Err(invalid(format!("missing required parameter '{}'", name)));
                } else {
                    object.remove(name);
                }
            } else if let Some(value) = object.get(name) {
                spec.check(value)
                    .map_err(|e| invalid(format!("parameter '{}' {}", name, e)))?;
            }
        }

        Ok(Value::Object(object))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_descriptor() -> ToolDescriptor {
        ToolDescriptor::new("search_customers", "Search customers")
            .with_param(
                "query",
                ParamSpec::string("Name or email fragment")
                    .required()
                    .min_length(3),
            )
            .with_param(
                "limit",
                ParamSpec::integer("Maximum rows").minimum(1).with_default(20),
            )
    }

    #[test]
    fn test_tool_sharing_from_str() {
        assert_eq!("open".parse::<ToolSharing>().unwrap(), ToolSharing::Open);
        assert_eq!("OWNER".parse::<ToolSharing>().unwrap(), ToolSharing::OwnerOnly);
        assert_eq!(
            "allow:analytics, system".parse::<ToolSharing>().unwrap(),
            ToolSharing::AllowList(vec!["analytics".to_string(), "system".to_string()])
        );
        assert!("everyone".parse::<ToolSharing>().is_err());
    }

    #[test]
    fn test_tool_sharing_permits() {
        assert!(ToolSharing::Open.permits("sales", "analytics"));
        assert!(ToolSharing::OwnerOnly.permits("sales", "sales"));
        assert!(!ToolSharing::OwnerOnly.permits("sales", "analytics"));

        let list = ToolSharing::AllowList(vec!["system".to_string()]);
        assert!(list.permits("sales", "system"));
        assert!(list.permits("sales", "sales"));
        assert!(!list.permits("sales", "analytics"));
    }

    #[test]
    fn test_prepare_input_fills_defaults() {
        let input = search_descriptor()
            .prepare_input(json!({"query": "acme"}))
            .unwrap();
        assert_eq!(input, json!({"query": "acme", "limit": 20}));
    }

    #[test]
    fn test_prepare_input_rejects_missing_required() {
        let err = search_descriptor().prepare_input(Value::Null).unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidInput {
                tool: "search_customers".to_string(),
                message: "missing required parameter 'query'".to_string(),
            }
        );
    }

    #[test]
    fn test_prepare_input_checks_constraints() {
        let descriptor = search_descriptor();

        let err = descriptor.prepare_input(json!({"query": "ab"})).unwrap_err();
        assert!(err.to_string().contains("at least 3 characters"));

        let err = descriptor
            .prepare_input(json!({"query": "acme", "limit": 0}))
            .unwrap_err();
        assert!(err.to_string().contains("must be at least 1"));

        let err = descriptor.prepare_input(json!({"query": 42})).unwrap_err();
        assert!(err.to_string().contains("expected string"));

        let err = descriptor
            .prepare_input(json!({"query": "acme", "extra": true}))
            .unwrap_err();
        assert!(err.to_string().contains("unexpected parameter 'extra'"));

        let err = descriptor.prepare_input(json!(["acme"])).unwrap_err();
        assert!(err.to_string().contains("got array"));
    }

    #[test]
    fn test_prepare_input_allowed_values() {
        let descriptor = ToolDescriptor::new("update_lead_status", "Update a lead").with_param(
            "status",
            ParamSpec::string("New status")
                .required()
                .one_of(&["new", "contacted"]),
        );

        assert!(descriptor.prepare_input(json!({"status": "new"})).is_ok());
        let err = descriptor
            .prepare_input(json!({"status": "won"}))
            .unwrap_err();
        assert!(err.to_string().contains("must be one of: new, contacted"));
    }
}
