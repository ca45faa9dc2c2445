use crate::cel::{build_condition_context, ConditionInput};
use crate::domain::{DomainError, DomainResult};
use cel_interpreter::{Program, Value as CelValue};
use std::fmt;

/// A routing condition compiled once and evaluated many times.
pub struct CompiledCondition {
    source: String,
    program: Program,
}

impl fmt::Debug for CompiledCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCondition")
            .field("source", &self.source)
            .finish()
    }
}

impl CompiledCondition {
    /// Compile a CEL boolean expression.
    ///
    /// An empty condition is treated as `true`, so a catch-all rule can be
    /// stored without an expression.
    pub fn compile(rule_id: &str, expression: &str) -> DomainResult<Self> {
        let source = if expression.trim().is_empty() {
            "true".to_string()
        } else {
            expression.to_string()
        };

        let program = Program::compile(&source).map_err(|e| {
            DomainError::InvalidRuleCondition(rule_id.to_string(), e.to_string())
        })?;

        Ok(Self { source, program })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a parcel decision input.
    ///
    /// Returns an error when execution fails or the result is not a bool.
    pub fn evaluate(&self, input: &ConditionInput<'_>) -> Result<bool, String> {
        let context = build_condition_context(input);
        match self.program.execute(&context) {
            Ok(CelValue::Bool(matched)) => Ok(matched),
            Ok(other) => Err(format!("condition produced a non-bool value: {:?}", other)),
            Err(e) => Err(e.to_string()),
        }
    }
}
