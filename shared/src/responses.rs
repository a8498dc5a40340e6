use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::{de::DeserializeOwned, Serialize};

use crate::types::ErrorResponse;

/// JSON response with the CORS header every route sends.
pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<Body>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(body)?.into())
        .map_err(Box::new)?)
}

pub fn error(status: StatusCode, error: &str, message: &str) -> Result<Response<Body>, Error> {
    json(
        status,
        &ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        },
    )
}

pub fn method_not_allowed() -> Result<Response<Body>, Error> {
    error(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", "Method not allowed")
}

pub fn unauthorized() -> Result<Response<Body>, Error> {
    error(StatusCode::UNAUTHORIZED, "Unauthorized", "Please sign in again")
}

/// Decode a JSON request body.
pub fn parse_body<T: DeserializeOwned>(body: &Body) -> Result<T, String> {
    let body_str = match body {
        Body::Text(text) => text.as_str(),
        Body::Binary(bytes) => std::str::from_utf8(bytes).unwrap_or(""),
        Body::Empty => "",
    };
    serde_json::from_str(body_str).map_err(|e| {
        tracing::error!("Failed to parse request body: {}", e);
        format!("Invalid request body: {}", e)
    })
}

/// Bad request response for a body [`parse_body`] rejected.
pub fn invalid_request(message: &str) -> Result<Response<Body>, Error> {
    error(StatusCode::BAD_REQUEST, "InvalidRequest", message)
}
