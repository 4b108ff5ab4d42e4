//! The JSON error body returned across the service's HTTP boundary — the
//! one place in this crate where `serde` derives actually cross a wire, mirroring the corpus's
//! `{error, detail}` shape for failed requests.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// One of the error-kind slugs (`message-malformed`, `signature-invalid`, `internal`, ...).
    pub error: String,
    /// Human-readable detail, safe to log and to return to a caller — never key material, CSR
    /// content, or challenge passwords.
    pub detail: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: detail.into(),
        }
    }
}
