//! Plain HTTP handler published next to the RPC handler

use hyper::StatusCode;
use mesh_core::{HandlerRequest, HandlerResponse, HandlerSpec, MethodSignature, Spec, SpecDecl};
use mesh_proxy::http::{json_response, text_response};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const TYPE_NAME: &str = "Handler";
pub const CHECK: &str = "Check";

const FINGERPRINT_LEN: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub fingerprint: String,
    pub timestamp: String,
    pub status: String,
}

/// Declared method table of `Handler`.
pub fn handler_spec() -> Spec {
    SpecDecl::new(TYPE_NAME)
        .handler(CHECK)
        .other("fingerprint")
        .allow(CHECK, &["GET"])
        .into()
}

/// Answers `Check` with a per-instance random fingerprint, so responses from
/// different replicas can be told apart.
pub struct Handler {
    fingerprint: String,
}

impl Handler {
    pub fn new() -> Self {
        let mut buf = [0u8; FINGERPRINT_LEN];
        rand::thread_rng().fill_bytes(&mut buf);
        Self {
            fingerprint: hex::encode(buf),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn check(&self) -> CheckResponse {
        CheckResponse {
            fingerprint: self.fingerprint.clone(),
            timestamp: chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            status: "ok".to_string(),
        }
    }
}

impl Default for Handler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HandlerSpec for Handler {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn methods(&self) -> Vec<MethodSignature> {
        vec![
            MethodSignature::handler(CHECK),
            MethodSignature::other("fingerprint"),
        ]
    }

    fn http_methods_map(&self) -> Option<HashMap<String, Vec<String>>> {
        Some(HashMap::from([(CHECK.to_string(), vec!["GET".to_string()])]))
    }

    async fn call(&self, method: &str, _request: HandlerRequest) -> HandlerResponse {
        match method {
            CHECK => json_response(StatusCode::OK, &self.check()),
            other => text_response(StatusCode::NOT_FOUND, format!("unknown method {}", other)),
        }
    }
}
