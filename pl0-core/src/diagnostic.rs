//! Non-fatal diagnostics reported alongside a stage's output.

use core::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
}

/// A message attached to a source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>, line: usize) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            line,
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Warning => "warning",
        };
        match self.code {
            Some(code) => write!(f, "{label}[{code}] line {}: {}", self.line, self.message),
            None => write!(f, "{label} line {}: {}", self.line, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_code_and_line() {
        let diag = Diagnostic::warning("unrecognized character '#'", 3).with_code("W0001");
        assert_eq!(
            diag.to_string(),
            "warning[W0001] line 3: unrecognized character '#'"
        );
    }
}
