use reqwest::StatusCode;
use serde::Deserialize;
use std::error::Error as _;
use thiserror::Error;

/// Why a generation request produced no answer.
///
/// The `Display` text is what ends up in the transcript.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GenerateError {
    #[error("Cannot connect to Ollama at {base_url}. Please ensure Ollama is running with 'ollama serve'.")]
    Connectivity { base_url: String },

    #[error("Model '{model}' not found. Please install it with 'ollama pull {model}' or select a different model.")]
    ModelNotFound { model: String },

    #[error("Server error: {detail}")]
    Server { detail: String },

    #[error("Request timed out. The model might be taking too long to respond.")]
    Timeout,

    #[error("Please select a model first. Refresh the model list to load available models.")]
    NoModelSelected,

    #[error("Error: {0}")]
    Unclassified(String),
}

impl GenerateError {
    /// Only these failures say anything about the link to the server.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

#[derive(Deserialize)]
struct ServerErrorBody {
    error: Option<String>,
}

pub fn classify_transport(err: &reqwest::Error, base_url: &str) -> GenerateError {
    if err.is_timeout() {
        return GenerateError::Timeout;
    }

    let chain = error_chain_text(err);
    if err.is_connect() || is_connection_refused_error(&chain) {
        return GenerateError::Connectivity {
            base_url: base_url.to_string(),
        };
    }

    GenerateError::Unclassified(chain)
}

pub fn classify_status(status: StatusCode, body: &str, model: &str) -> GenerateError {
    if status == StatusCode::NOT_FOUND {
        return GenerateError::ModelNotFound {
            model: model.to_string(),
        };
    }

    if status.is_server_error() {
        let detail = serde_json::from_str::<ServerErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.error)
            .filter(|detail| !detail.trim().is_empty())
            .unwrap_or_else(|| "Internal server error".to_string());
        return GenerateError::Server { detail };
    }

    let body = body.trim();
    if body.is_empty() {
        GenerateError::Unclassified(format!("HTTP {status}"))
    } else {
        GenerateError::Unclassified(format!("HTTP {status}: {body}"))
    }
}

pub fn is_connection_refused_error(err: &str) -> bool {
    let lower = err.to_ascii_lowercase();
    lower.contains("os error 10061")
        || lower.contains("os error 111")
        || lower.contains("connection refused")
        || lower.contains("network is unreachable")
        || lower.contains("connect error")
}

fn error_chain_text(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_model() {
        let err = classify_status(StatusCode::NOT_FOUND, "", "llama3");

        assert_eq!(
            err,
            GenerateError::ModelNotFound {
                model: "llama3".to_string()
            }
        );
        assert!(err.to_string().contains("ollama pull llama3"));
    }

    #[test]
    fn server_error_surfaces_detail() {
        let err = classify_status(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":"model requires more system memory"}"#,
            "llama3",
        );

        assert_eq!(
            err.to_string(),
            "Server error: model requires more system memory"
        );
    }

    #[test]
    fn server_error_without_detail_is_generic() {
        let err = classify_status(StatusCode::BAD_GATEWAY, "<html>oops</html>", "llama3");

        assert_eq!(err.to_string(), "Server error: Internal server error");
    }

    #[test]
    fn other_status_is_unclassified_with_body() {
        let err = classify_status(StatusCode::BAD_REQUEST, "missing prompt\n", "llama3");

        assert_eq!(
            err,
            GenerateError::Unclassified("HTTP 400 Bad Request: missing prompt".to_string())
        );
    }

    #[test]
    fn only_connectivity_flips_connection() {
        assert!(GenerateError::Connectivity {
            base_url: "http://localhost:11434".to_string()
        }
        .is_connectivity());
        assert!(!GenerateError::Timeout.is_connectivity());
        assert!(!GenerateError::NoModelSelected.is_connectivity());
    }

    #[test]
    fn connection_refused_detection() {
        assert!(is_connection_refused_error(
            "error sending request: tcp connect error: Connection refused (os error 111)"
        ));
        assert!(is_connection_refused_error("os error 10061"));
        assert!(!is_connection_refused_error("invalid JSON at line 1"));
    }
}
