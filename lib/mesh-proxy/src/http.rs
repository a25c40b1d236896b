//! Canned HTTP responses
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode};
use mesh_core::HandlerResponse;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Response with a status and no body.
pub fn empty_response(status: StatusCode) -> HandlerResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Plain text response.
pub fn text_response(status: StatusCode, body: impl Into<String>) -> HandlerResponse {
    let mut response = Response::new(Full::new(Bytes::from(body.into())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    response
}

/// JSON response; serialization failures become a 500.
pub fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> HandlerResponse {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => internal_error_response(&e.to_string()),
    }
}

/// Create a 404 Not Found response
pub fn not_found_response(reason: &str) -> HandlerResponse {
    text_response(StatusCode::NOT_FOUND, format!("Not Found: {}\n", reason))
}

/// Create a 405 response listing the verbs the path accepts
pub fn method_not_allowed_response(allowed: &[Method]) -> HandlerResponse {
    let allow = allowed
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n");
    if let Ok(value) = HeaderValue::from_str(&allow) {
        response.headers_mut().insert(ALLOW, value);
    }
    response
}

/// Create a 500 Internal Server Error response
pub fn internal_error_response(reason: &str) -> HandlerResponse {
    text_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Internal Server Error: {}\n", reason),
    )
}
