//! Compiled parameter schemas.
//!
//! # Responsibilities
//! - Turn each declared parameter into a JSON Schema and compile it once,
//!   when the policy is registered
//! - Check route parameters against the compiled validators
//! - Merge declared defaults into the parameters a chain entry keeps
//!
//! # Design Decisions
//! - One validator per parameter so failures name the offending parameter
//! - Presence is checked before validation; a missing required parameter is
//!   `MissingParameter`, not a schema failure
//! - Undeclared parameters pass through untouched

use jsonschema::{Draft, Validator};
use serde_json::Value;
use thiserror::Error;

use crate::policy::types::{ParameterDefinition, Parameters, PolicyDefinition, PolicyError};

/// A parameter declaration that could not be compiled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("parameter '{parameter}': {reason}")]
pub struct SchemaError {
    pub parameter: String,
    pub reason: String,
}

struct CompiledParameter {
    name: String,
    required: bool,
    default: Option<Value>,
    validator: Validator,
}

/// Validators for every declared parameter of one policy version.
pub struct ParameterSchema {
    parameters: Vec<CompiledParameter>,
}

impl ParameterSchema {
    /// Compile the declarations of `definition`. Declared defaults must
    /// satisfy their own schema.
    pub fn compile(definition: &PolicyDefinition) -> Result<Self, SchemaError> {
        let parameters = definition
            .parameters
            .iter()
            .map(compile_parameter)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { parameters })
    }

    /// Check `params` and return them with defaults merged.
    pub fn resolve(&self, params: &Parameters) -> Result<Parameters, PolicyError> {
        let mut resolved = params.clone();
        for param in &self.parameters {
            match resolved.get(&param.name) {
                Some(value) => {
                    let errors: Vec<String> = param
                        .validator
                        .iter_errors(value)
                        .map(|err| err.to_string())
                        .collect();
                    if !errors.is_empty() {
                        return Err(PolicyError::InvalidParameter {
                            name: param.name.clone(),
                            reason: errors.join("; "),
                        });
                    }
                }
                None => match &param.default {
                    Some(default) => {
                        resolved.insert(param.name.clone(), default.clone());
                    }
                    None if param.required => {
                        return Err(PolicyError::MissingParameter(param.name.clone()));
                    }
                    None => {}
                },
            }
        }
        Ok(resolved)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl std::fmt::Debug for ParameterSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.parameters.iter().map(|p| p.name.as_str()).collect();
        f.debug_struct("ParameterSchema").field("parameters", &names).finish()
    }
}

fn compile_parameter(def: &ParameterDefinition) -> Result<CompiledParameter, SchemaError> {
    let schema_error = |reason: String| SchemaError {
        parameter: def.name.clone(),
        reason,
    };

    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&def.json_schema())
        .map_err(|err| schema_error(format!("invalid schema: {err}")))?;

    if let Some(default) = &def.default {
        let errors: Vec<String> = validator.iter_errors(default).map(|err| err.to_string()).collect();
        if !errors.is_empty() {
            return Err(schema_error(format!("default does not match schema: {}", errors.join("; "))));
        }
    }

    Ok(CompiledParameter {
        name: def.name.clone(),
        required: def.required,
        default: def.default.clone(),
        validator,
    })
}
