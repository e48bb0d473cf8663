//! Request and response records exchanged with the caller

use crate::execution::ExecutionOutcome;
use serde::{Deserialize, Serialize};

/// Error text reported when the deadline expires
pub const TIMEOUT_MESSAGE: &str = "Code execution timed out";

/// One snippet to execute
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source code; a missing field is treated as empty
    #[serde(default)]
    pub code: String,
}

impl ExecutionRequest {
    /// Parse a request from its JSON payload
    pub fn from_json(payload: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Result of one execution, as reported to the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: String,
}

impl ExecutionResult {
    /// Failed execution with no output
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
        }
    }

    /// Serialize to a single-line JSON payload
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<ExecutionOutcome> for ExecutionResult {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            // Diagnostic output is reported but does not fail the run.
            ExecutionOutcome::Completed { stdout, stderr } => Self {
                success: true,
                output: stdout,
                error: stderr,
            },
            ExecutionOutcome::TimedOut => Self::failure(TIMEOUT_MESSAGE),
            ExecutionOutcome::Faulted { trace } => Self::failure(trace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses_code() {
        let request = ExecutionRequest::from_json(r#"{"code": "print(1+1)"}"#).unwrap();
        assert_eq!(request.code, "print(1+1)");
    }

    #[test]
    fn test_missing_code_is_empty() {
        let request = ExecutionRequest::from_json("{}").unwrap();
        assert_eq!(request.code, "");
    }

    #[test]
    fn test_malformed_request_is_rejected() {
        assert!(ExecutionRequest::from_json("not json").is_err());
        assert!(ExecutionRequest::from_json(r#"{"code": 1}"#).is_err());
    }

    #[test]
    fn test_completed_outcome() {
        let result = ExecutionResult::from(ExecutionOutcome::Completed {
            stdout: "2\n".to_string(),
            stderr: String::new(),
        });
        assert_eq!(
            result.to_json().unwrap(),
            r#"{"success":true,"output":"2\n","error":""}"#
        );
    }

    #[test]
    fn test_diagnostics_keep_success() {
        let result = ExecutionResult::from(ExecutionOutcome::Completed {
            stdout: "ok\n".to_string(),
            stderr: "warning\n".to_string(),
        });
        assert!(result.success);
        assert_eq!(result.output, "ok\n");
        assert_eq!(result.error, "warning\n");
    }

    #[test]
    fn test_timeout_outcome() {
        let result = ExecutionResult::from(ExecutionOutcome::TimedOut);
        assert_eq!(result, ExecutionResult::failure("Code execution timed out"));
    }

    #[test]
    fn test_fault_outcome_drops_output() {
        let result = ExecutionResult::from(ExecutionOutcome::Faulted {
            trace: "NameError: name 'open' is not defined\n".to_string(),
        });
        assert!(!result.success);
        assert!(result.output.is_empty());
        assert!(result.error.contains("NameError"));
    }

    #[test]
    fn test_result_round_trips_through_json() {
        let result = ExecutionResult::failure("boom");
        let parsed: ExecutionResult = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(parsed, result);
    }
}
