//! Docker push progress stream handling.
//!
//! The daemon answers an image push with `200 OK` and then streams JSON
//! status lines. A registry failure shows up as an error object on the final
//! line, so the HTTP status alone says nothing about the outcome.

use commit_agent_core::error::{AgentError, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct ErrorLine {
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorDetail")]
    error_detail: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Status line recording an error the SDK surfaced while decoding the stream.
pub fn error_line(message: &str) -> String {
    serde_json::json!({
        "error": message,
        "errorDetail": { "message": message },
    })
    .to_string()
}

/// Inspect every status line; fail if the last one is an error object.
pub fn check_push_response(lines: &[String]) -> Result<()> {
    for line in lines {
        tracing::debug!(status = %line, "Push progress");
    }

    let last = lines
        .last()
        .ok_or_else(|| AgentError::EmbeddedStream("empty push response stream".to_string()))?;

    let parsed: ErrorLine = serde_json::from_str(last)?;
    match parsed.error.filter(|e| !e.is_empty()) {
        Some(error) => {
            let message = parsed
                .error_detail
                .and_then(|d| d.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(error);
            Err(AgentError::EmbeddedStream(message))
        }
        None => Ok(()),
    }
}
