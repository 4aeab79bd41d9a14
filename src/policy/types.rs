//! Policy-facing types: processing modes, specs, definitions and errors.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

/// Free-form policy parameters, as delivered by configuration.
pub type Parameters = Map<String, Value>;

/// How a policy participates in one processing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    /// Policy does not run in this phase.
    #[default]
    Skip,
    /// Policy runs on headers only.
    Process,
    /// Policy needs the full payload buffered before it runs.
    Buffer,
    /// Policy consumes the payload as it streams.
    Stream,
}

impl PhaseMode {
    /// Whether this mode needs access to payload bytes.
    pub fn needs_body(self) -> bool {
        matches!(self, PhaseMode::Buffer | PhaseMode::Stream)
    }

    /// Whether the policy runs at all in this phase.
    pub fn is_active(self) -> bool {
        self != PhaseMode::Skip
    }
}

/// Declared processing mode of a policy across all four phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ProcessingMode {
    pub request_header: PhaseMode,
    pub request_body: PhaseMode,
    pub response_header: PhaseMode,
    pub response_body: PhaseMode,
}

impl ProcessingMode {
    /// Headers-only processing on the request path.
    pub const fn request_headers() -> Self {
        Self {
            request_header: PhaseMode::Process,
            request_body: PhaseMode::Skip,
            response_header: PhaseMode::Skip,
            response_body: PhaseMode::Skip,
        }
    }

    /// Headers-only processing on both paths.
    pub const fn headers() -> Self {
        Self {
            request_header: PhaseMode::Process,
            request_body: PhaseMode::Skip,
            response_header: PhaseMode::Process,
            response_body: PhaseMode::Skip,
        }
    }

    pub fn handles_request(&self) -> bool {
        self.request_header.is_active() || self.request_body.is_active()
    }

    pub fn handles_response(&self) -> bool {
        self.response_header.is_active() || self.response_body.is_active()
    }
}

/// Body handling the interception layer must apply for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BodyMode {
    #[default]
    Skip,
    Buffer,
}

impl From<bool> for BodyMode {
    fn from(required: bool) -> Self {
        if required {
            BodyMode::Buffer
        } else {
            BodyMode::Skip
        }
    }
}

/// Composite registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyKey {
    pub name: String,
    pub version: String,
}

impl PolicyKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Declared type of a policy parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParameterType {
    /// JSON Schema fragment for this type.
    pub fn json_schema(self) -> Value {
        let name = match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::Array => "array",
            ParameterType::Any => return json!({}),
        };
        json!({ "type": name })
    }
}

/// One declared parameter in a policy's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Extra JSON Schema constraints applied on top of `kind`.
    #[serde(default)]
    pub schema: Option<Value>,
}

impl ParameterDefinition {
    pub fn required(name: impl Into<String>, kind: ParameterType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
            schema: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParameterType, default: Option<Value>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Full schema a value of this parameter must satisfy.
    pub fn json_schema(&self) -> Value {
        match &self.schema {
            Some(extra) => json!({ "allOf": [self.kind.json_schema(), extra] }),
            None => self.kind.json_schema(),
        }
    }
}

/// Identity and parameter schema of a registered policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,
}

impl PolicyDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            parameters: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn key(&self) -> PolicyKey {
        PolicyKey::new(&self.name, &self.version)
    }
}

/// A single policy reference inside a route's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    pub version: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub execution_condition: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
}

fn default_enabled() -> bool {
    true
}

impl PolicySpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled: true,
            execution_condition: None,
            parameters: Parameters::new(),
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.execution_condition = Some(condition.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn key(&self) -> PolicyKey {
        PolicyKey::new(&self.name, &self.version)
    }
}

/// Errors reported by a policy while validating its parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{0}")]
    Invalid(String),
}
