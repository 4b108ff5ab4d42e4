//! The single SCEP entry point: resolves `operation`, extracts the message
//! bytes from either the GET `message` query parameter or the raw POST body, and converts the
//! dispatcher's response (or error) into an HTTP response.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;

use scepd_core::dispatcher::{dispatch_no_body, dispatch_pki_operation, ResponseContentType};
use scepd_core::error::{CoreError, ErrorKind};
use scepd_types::prelude::{ErrorBody, Operation};

use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScepQuery {
    pub operation: Option<String>,
    pub message: Option<String>,
}

pub async fn scep_handler(
    State(state): State<AppState>,
    method: Method,
    Query(query): Query<ScepQuery>,
    body: Bytes,
) -> Response {
    let Some(operation_str) = query.operation.as_deref() else {
        return error_response(
            StatusCode::NOT_FOUND,
            "unknown-operation",
            "missing operation query parameter",
        );
    };

    let operation: Operation = match operation_str.parse() {
        Ok(op) => op,
        Err(_) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "unknown-operation",
                format!("unrecognized operation `{operation_str}`"),
            )
        }
    };

    tracing::debug!(operation = %operation, "dispatching SCEP request");

    let result = match operation {
        Operation::GetCACert | Operation::GetCACaps => {
            dispatch_no_body(operation, &state.ca, &state.dispatcher_config)
        }
        Operation::PKIOperation => {
            let message_bytes = match extract_pki_message(&method, &query, &body) {
                Ok(bytes) => bytes,
                Err(response) => return response,
            };
            dispatch_pki_operation(
                &message_bytes,
                &state.ca,
                state.store.as_ref(),
                &state.dispatcher_config,
            )
        }
    };

    match result {
        Ok(response) => {
            let content_type = content_type_header(response.content_type);
            ([("content-type", content_type)], response.body).into_response()
        }
        Err(error) => core_error_response(&error),
    }
}

/// For GET, the message is base64 in the `message` query parameter, with the specific client
/// bug of literal `+` characters turning into spaces along the way — tolerated
/// by rewriting spaces back to `+` before decoding. For POST, the body is the raw message bytes,
/// already de-chunked by the HTTP layer regardless of `Transfer-Encoding`.
fn extract_pki_message(
    method: &Method,
    query: &ScepQuery,
    body: &Bytes,
) -> Result<Vec<u8>, Response> {
    if *method == Method::POST {
        return Ok(body.to_vec());
    }

    let Some(message) = query.message.as_deref() else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "transport-malformed",
            "missing message query parameter",
        ));
    };
    let fixed = message.replace(' ', "+");
    BASE64.decode(fixed).map_err(|_| {
        error_response(
            StatusCode::BAD_REQUEST,
            "transport-malformed",
            "message query parameter is not valid base64",
        )
    })
}

fn content_type_header(content_type: ResponseContentType) -> &'static str {
    match content_type {
        ResponseContentType::X509CaCert => "application/x-x509-ca-cert",
        ResponseContentType::X509CaRaCert => "application/x-x509-ca-ra-cert",
        ResponseContentType::PkiMessage => "application/x-pki-message",
        ResponseContentType::PlainText => "text/plain",
    }
}

fn core_error_response(error: &CoreError) -> Response {
    let kind = error.kind();
    let status = match kind {
        ErrorKind::TransportMalformed => StatusCode::BAD_REQUEST,
        ErrorKind::UnknownOperation => StatusCode::NOT_FOUND,
        ErrorKind::MessageMalformed => StatusCode::BAD_REQUEST,
        ErrorKind::SignatureInvalid => StatusCode::BAD_REQUEST,
        ErrorKind::EnvelopeFailure => StatusCode::BAD_REQUEST,
        ErrorKind::CsrInvalid => StatusCode::BAD_REQUEST,
        ErrorKind::ChallengeFailed => StatusCode::BAD_REQUEST,
        ErrorKind::PolicyDenied => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => {
            tracing::error!(error = %error, "internal error handling SCEP request");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, kind.as_str(), error.to_string())
}

/// Every failed request, whether rejected before dispatch or by the dispatcher itself, answers
/// with the same `{error, detail}` JSON shape.
fn error_response(status: StatusCode, error: &str, detail: impl Into<String>) -> Response {
    (status, Json(ErrorBody::new(error, detail))).into_response()
}
