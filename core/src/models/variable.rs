//! Scalar values and variable identifiers.
//!
//! A variable is addressed as `"instanceName::variableName"`. Identifiers
//! are used as map keys and as connection/scenario endpoints, so they carry
//! a total order by `(instance_name, variable_name)`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between instance name and variable name.
pub const IDENTIFIER_SEPARATOR: &str = "::";

/// Error produced when parsing a malformed identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error parsing variable identifier '{input}': a '::' must be present")]
pub struct ParseError {
    /// The offending input string
    pub input: String,
}

/// Uniquely identifies a variable within a simulation.
///
/// # Example
/// ```
/// use cosim_core::models::variable::VariableIdentifier;
///
/// let id: VariableIdentifier = "chassis::wheel.speed".parse().unwrap();
/// assert_eq!(id.instance_name, "chassis");
/// assert_eq!(id.variable_name, "wheel.speed");
/// assert_eq!(id.to_string(), "chassis::wheel.speed");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableIdentifier {
    pub instance_name: String,
    pub variable_name: String,
}

impl VariableIdentifier {
    pub fn new(instance_name: impl Into<String>, variable_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            variable_name: variable_name.into(),
        }
    }
}

impl FromStr for VariableIdentifier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(IDENTIFIER_SEPARATOR) {
            Some((instance, variable)) => Ok(Self::new(instance, variable)),
            None => Err(ParseError {
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for VariableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.instance_name, IDENTIFIER_SEPARATOR, self.variable_name
        )
    }
}

/// Scalar kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Real,
    Integer,
    Boolean,
    String,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Real => "real",
            ScalarKind::Integer => "int",
            ScalarKind::Boolean => "bool",
            ScalarKind::String => "string",
        };
        f.write_str(name)
    }
}

/// Tagged scalar value used for parameter sets, scenario payloads and
/// generic property assignment.
///
/// Variant order matters for untagged deserialization: an integer literal
/// must resolve to `Integer` before `Real` gets a chance to claim it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Integer(i32),
    Real(f64),
    Boolean(bool),
    String(String),
}

impl ScalarValue {
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::Real(_) => ScalarKind::Real,
            ScalarValue::Integer(_) => ScalarKind::Integer,
            ScalarValue::Boolean(_) => ScalarKind::Boolean,
            ScalarValue::String(_) => ScalarKind::String,
        }
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Real(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Integer(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Boolean(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::String(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::String(v)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Real(v) => write!(f, "{v}"),
            ScalarValue::Integer(v) => write!(f, "{v}"),
            ScalarValue::Boolean(v) => write!(f, "{v}"),
            ScalarValue::String(v) => f.write_str(v),
        }
    }
}
