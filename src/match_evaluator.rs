use regex::Regex;
use serde_json::Value;

use crate::models::MatchArg;

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("failed to parse match argument: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Toolset backing the `matches` projection function.
pub trait MatchEvaluator: Send + Sync {
    /// Compiles the `matches` argument into a regex.
    fn parse_arg(&self, arg: &MatchArg) -> Result<Regex, MatchError>;

    /// Checks whether the value matches the regex. Non-string values are
    /// tested against their default JSON rendering.
    fn match_value(&self, regex: &Regex, value: &Value) -> bool;
}

#[derive(Debug, Default, Clone)]
pub struct DefaultMatchEvaluator;

impl MatchEvaluator for DefaultMatchEvaluator {
    fn parse_arg(&self, arg: &MatchArg) -> Result<Regex, MatchError> {
        match arg {
            MatchArg::Compiled(regex) => Ok(regex.clone()),
            MatchArg::Pattern(source) => Ok(Regex::new(source)?),
        }
    }

    fn match_value(&self, regex: &Regex, value: &Value) -> bool {
        regex.is_match(&stringify(value))
    }
}

pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
