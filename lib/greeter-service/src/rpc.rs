//! JSON handler spec exposing a `Greeter` over the mesh
//!
//! Every method takes a JSON request body and answers either the JSON
//! response or `{"error": "..."}` with a non-2xx status.

use crate::service::{Greeter, GreeterError, Postcard};
use hyper::StatusCode;
use mesh_core::{HandlerRequest, HandlerResponse, HandlerSpec, MethodSignature, Spec, SpecDecl};
use mesh_proxy::http::json_response;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const TYPE_NAME: &str = "RPCHandler";
pub const GREET: &str = "Greet";
pub const SEND_POSTCARD: &str = "SendPostcard";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetRequest {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetResponse {
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPostcardRequest {
    #[serde(default)]
    pub card: Option<Postcard>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPostcardResponse {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Declared method table of `RpcHandler`, for clients that only need to
/// address it.
pub fn rpc_spec() -> Spec {
    SpecDecl::new(TYPE_NAME)
        .handler(GREET)
        .handler(SEND_POSTCARD)
        .allow("*", &["POST"])
        .into()
}

pub struct RpcHandler {
    service: Arc<dyn Greeter>,
}

impl RpcHandler {
    pub fn new(service: Arc<dyn Greeter>) -> Self {
        Self { service }
    }

    async fn greet(&self, request: GreetRequest) -> Result<GreetResponse, GreeterError> {
        let message = self.service.greet(&request.name).await?;
        Ok(GreetResponse { message })
    }

    async fn send_postcard(
        &self,
        request: SendPostcardRequest,
    ) -> Result<SendPostcardResponse, GreeterError> {
        self.service.send_postcard(request.card.as_ref()).await?;
        Ok(SendPostcardResponse::default())
    }
}

fn decode<T: DeserializeOwned>(request: &HandlerRequest) -> Result<T, HandlerResponse> {
    serde_json::from_slice(request.body()).map_err(|e| {
        debug!(error = %e, "undecodable request body");
        error_response(StatusCode::BAD_REQUEST, e.to_string())
    })
}

fn error_response(status: StatusCode, error: String) -> HandlerResponse {
    json_response(status, &ErrorResponse { error })
}

fn reply<T: Serialize>(result: Result<T, GreeterError>) -> HandlerResponse {
    match result {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[async_trait::async_trait]
impl HandlerSpec for RpcHandler {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn methods(&self) -> Vec<MethodSignature> {
        vec![
            MethodSignature::handler(GREET),
            MethodSignature::handler(SEND_POSTCARD),
        ]
    }

    fn http_methods_map(&self) -> Option<HashMap<String, Vec<String>>> {
        Some(HashMap::from([("*".to_string(), vec!["POST".to_string()])]))
    }

    async fn call(&self, method: &str, request: HandlerRequest) -> HandlerResponse {
        match method {
            GREET => match decode(&request) {
                Ok(req) => reply(self.greet(req).await),
                Err(response) => response,
            },
            SEND_POSTCARD => match decode(&request) {
                Ok(req) => reply(self.send_postcard(req).await),
                Err(response) => response,
            },
            other => error_response(StatusCode::NOT_FOUND, format!("unknown method {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Service;
    use http_body_util::BodyExt;
    use hyper::body::Bytes;
    use hyper::Request;
    use mesh_core::reflect_endpoints;

    fn handler() -> RpcHandler {
        RpcHandler::new(Arc::new(Service::new()))
    }

    fn request(body: &str) -> HandlerRequest {
        Request::builder()
            .method("POST")
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: HandlerResponse) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_endpoints_are_post_only() {
        let endpoints = reflect_endpoints("greeter", &Spec::handler(handler())).unwrap();
        let paths: Vec<&str> = endpoints.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/RPCHandler/Greet", "/RPCHandler/SendPostcard"]);
        assert!(endpoints.iter().all(|e| e.methods == vec!["POST".to_string()]));
    }

    #[tokio::test]
    async fn test_greet() {
        let response = handler().call(GREET, request(r#"{"name":"Max"}"#)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["message"], "Hello, Max");
    }

    #[tokio::test]
    async fn test_send_postcard_errors() {
        let response = handler().call(SEND_POSTCARD, request("{}")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "no postcard");

        let response = handler()
            .call(SEND_POSTCARD, request(r#"{"card":{"address":"World"}}"#))
            .await;
        assert_eq!(json_body(response).await["error"], "no recipient");
    }

    #[tokio::test]
    async fn test_bad_json() {
        let response = handler().call(GREET, request("not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
    }
}
