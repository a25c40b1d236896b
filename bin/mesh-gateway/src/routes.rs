//! Public API routes backed by the greeter

use futures::FutureExt;
use greeter_service::{Greeter, Postcard};
use hyper::{Method, StatusCode};
use mesh_cluster::Client;
use mesh_core::{HandlerRequest, HandlerResponse, Result};
use mesh_proxy::http::{json_response, not_found_response};
use mesh_proxy::Router;
use std::sync::Arc;
use tracing::debug;

const GREET_PREFIX: &str = "/greeter/greet/";
const POSTCARD_PREFIX: &str = "/greeter/sendPostcard/";

/// Path segments after `prefix`, or `None` when the count doesn't match.
fn path_params<'a>(path: &'a str, prefix: &str, count: usize) -> Option<Vec<&'a str>> {
    let rest = path.strip_prefix(prefix)?;
    let params: Vec<&str> = rest.split('/').collect();
    if params.len() != count || params.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(params)
}

async fn greet(svc: Arc<dyn Greeter>, request: HandlerRequest) -> HandlerResponse {
    let Some(params) = path_params(request.uri().path(), GREET_PREFIX, 1) else {
        return not_found_response(request.uri().path());
    };
    match svc.greet(params[0]).await {
        Ok(message) => json_response(StatusCode::OK, &message),
        Err(e) => {
            debug!(error = %e, "greet failed");
            json_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

async fn send_postcard(svc: Arc<dyn Greeter>, request: HandlerRequest) -> HandlerResponse {
    let Some(params) = path_params(request.uri().path(), POSTCARD_PREFIX, 3) else {
        return not_found_response(request.uri().path());
    };
    let postcard = Postcard {
        recipient: params[0].to_string(),
        address: params[1].to_string(),
        message: params[2].to_string(),
        ..Default::default()
    };
    match svc.send_postcard(Some(&postcard)).await {
        Ok(()) => json_response(StatusCode::OK, &postcard),
        Err(e) => {
            debug!(error = %e, "sendPostcard failed");
            json_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// Register the public routes.
///
/// `check` and `greet_proxy` are reverse-proxy clients mounted as they are.
pub fn install(
    router: &Router,
    svc: Arc<dyn Greeter>,
    check: Client,
    greet_proxy: Client,
) -> Result<()> {
    let greet_svc = svc.clone();
    router.route(
        Method::GET,
        "/greeter/greet/*",
        Arc::new(move |request: HandlerRequest| greet(greet_svc.clone(), request).boxed()),
    )?;
    router.route(
        Method::POST,
        "/greeter/sendPostcard/*",
        Arc::new(move |request: HandlerRequest| send_postcard(svc.clone(), request).boxed()),
    )?;
    router.route(Method::GET, "/greeter/check", check.into_handler())?;
    router.route(Method::POST, "/greeter/greet", greet_proxy.into_handler())?;
    Ok(())
}
