//! `Greeter` implementation backed by a mesh client

use crate::rpc::{
    ErrorResponse, GreetRequest, GreetResponse, SendPostcardRequest, SendPostcardResponse, GREET,
    SEND_POSTCARD,
};
use crate::service::{Greeter, GreeterError, Postcard};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::Request;
use mesh_cluster::{Client, MethodOverride};
use mesh_core::MeshError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Calls a remote greeter's `RPCHandler`.
#[derive(Clone)]
pub struct GreeterClient {
    client: Client,
}

impl GreeterClient {
    /// `client` must target the greeter's RPC handler spec.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn call<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp, GreeterError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(body)?;
        let mut request = Request::post("/")
            .header(CONTENT_TYPE, "application/json")
            .body(Bytes::from(body))
            .map_err(MeshError::from)?;
        request
            .extensions_mut()
            .insert(MethodOverride(method.to_string()));

        let response = self
            .client
            .do_request(request)
            .await?
            .ok_or(GreeterError::Unavailable)?;

        if !response.status().is_success() {
            let message = match serde_json::from_slice::<ErrorResponse>(response.body()) {
                Ok(envelope) => envelope.error,
                Err(_) => String::from_utf8_lossy(response.body()).trim().to_string(),
            };
            return Err(GreeterError::Remote(message));
        }
        Ok(serde_json::from_slice(response.body())?)
    }
}

#[async_trait::async_trait]
impl Greeter for GreeterClient {
    async fn greet(&self, name: &str) -> Result<String, GreeterError> {
        let request = GreetRequest {
            name: name.to_string(),
        };
        let response: GreetResponse = self.call(GREET, &request).await?;
        Ok(response.message)
    }

    async fn send_postcard(&self, card: Option<&Postcard>) -> Result<(), GreeterError> {
        let request = SendPostcardRequest {
            card: card.cloned(),
        };
        let _: SendPostcardResponse = self.call(SEND_POSTCARD, &request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_spec, Handler};
    use crate::rpc::{rpc_spec, RpcHandler};
    use crate::service::Service;
    use crate::SERVICE_NAME;
    use mesh_cluster::{MeshNode, NodeOptions};
    use mesh_transport::MemoryFabric;
    use std::sync::Arc;

    async fn cluster() -> (MeshNode, MeshNode) {
        let fabric = MemoryFabric::new();
        let options = NodeOptions::new().with_tags(["example"]);

        let greeter = MeshNode::in_memory(SERVICE_NAME, options.clone(), &fabric).unwrap();
        greeter
            .publish(Arc::new(RpcHandler::new(Arc::new(Service::new()))))
            .unwrap();
        greeter.publish(Arc::new(Handler::new())).unwrap();
        let addr = greeter.listen_and_serve("127.0.0.1:0").await.unwrap();

        let gateway = MeshNode::in_memory("gateway", options, &fabric).unwrap();
        gateway.listen_and_serve("127.0.0.1:0").await.unwrap();
        gateway.join(&[addr]).await.unwrap();
        (greeter, gateway)
    }

    #[tokio::test]
    async fn test_remote_greet() {
        let (_greeter, gateway) = cluster().await;
        let client = GreeterClient::new(gateway.new_client(SERVICE_NAME, rpc_spec(), ""));
        assert_eq!(client.greet("Max").await.unwrap(), "Hello, Max");
    }

    #[tokio::test]
    async fn test_remote_errors_are_decoded() {
        let (_greeter, gateway) = cluster().await;
        let client = GreeterClient::new(gateway.new_client(SERVICE_NAME, rpc_spec(), ""));

        let err = client.send_postcard(None).await.unwrap_err();
        assert_eq!(err.to_string(), "no postcard");

        let card = Postcard {
            address: "World".to_string(),
            ..Default::default()
        };
        let err = client.send_postcard(Some(&card)).await.unwrap_err();
        assert_eq!(err.to_string(), "no recipient");

        let card = Postcard {
            recipient: "Max".to_string(),
            ..card
        };
        client.send_postcard(Some(&card)).await.unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_client() {
        let client = GreeterClient::new(Client::default());
        assert!(matches!(
            client.greet("Max").await,
            Err(GreeterError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn test_check_through_proxy() {
        let (greeter, gateway) = cluster().await;
        let check = gateway
            .new_client(greeter.service_name(), handler_spec(), "")
            .use_method("Check");
        let request = Request::get("/greeter/check").body(Bytes::new()).unwrap();
        let response = check.proxy(request).await;
        assert_eq!(response.status(), hyper::StatusCode::OK);
    }
}
