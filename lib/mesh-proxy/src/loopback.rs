//! Administrative routes every node serves

use crate::http::{empty_response, internal_error_response, text_response};
use crate::router::Router;
use futures::FutureExt;
use hyper::{Method, StatusCode};
use mesh_core::{HandlerFn, HandlerRequest, HandlerResponse, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const PING_PATH: &str = "/ping";
pub const HEARTBEAT_PATH: &str = "/__heartbeat__";
pub const ERROR_PATH: &str = "/__error__";

/// Payload carried to `/__error__` by a reverse proxy that rejected a request
/// before forwarding it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyError {
    #[serde(default)]
    pub status: i64,
    #[serde(default, rename = "msg")]
    pub message: String,
}

impl ProxyError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16() as i64,
            message: message.into(),
        }
    }
}

/// Register the liveness and error re-emission routes.
pub fn install(router: &Router) -> Result<()> {
    router.route(Method::GET, PING_PATH, ok_handler())?;
    router.route(Method::GET, HEARTBEAT_PATH, ok_handler())?;
    router.route(
        Method::POST,
        ERROR_PATH,
        Arc::new(|req: HandlerRequest| error_handler(req).boxed()),
    )?;
    Ok(())
}

fn ok_handler() -> HandlerFn {
    Arc::new(|_req: HandlerRequest| async { empty_response(StatusCode::OK) }.boxed())
}

/// Re-emit a `ProxyError` payload as the actual response.
pub async fn error_handler(request: HandlerRequest) -> HandlerResponse {
    let payload: ProxyError = match serde_json::from_slice(request.body()) {
        Ok(payload) => payload,
        Err(e) => {
            debug!(error = %e, "undecodable error payload");
            return internal_error_response(&e.to_string());
        }
    };

    if payload.status > 0 && payload.status != 200 {
        let status = u16::try_from(payload.status)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return text_response(status, payload.message);
    }
    empty_response(StatusCode::OK)
}
