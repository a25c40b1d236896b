use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use mesh_cluster::{Client, MeshNode, MethodOverride, NodeOptions, WaitContext};
use mesh_core::{
    HandlerRequest, HandlerResponse, HandlerSpec, MeshError, MethodSignature, Spec,
};
use mesh_proxy::http::text_response;
use mesh_transport::MemoryFabric;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct Echo;

#[async_trait::async_trait]
impl HandlerSpec for Echo {
    fn type_name(&self) -> &str {
        "Echo"
    }

    fn methods(&self) -> Vec<MethodSignature> {
        vec![
            MethodSignature::handler("Say"),
            MethodSignature::handler("Shout"),
            MethodSignature::handler("Check"),
            MethodSignature::other("fingerprint"),
        ]
    }

    fn http_methods_map(&self) -> Option<HashMap<String, Vec<String>>> {
        Some(HashMap::from([("Check".to_string(), vec!["GET".to_string()])]))
    }

    async fn call(&self, method: &str, request: HandlerRequest) -> HandlerResponse {
        let body = String::from_utf8_lossy(request.body()).to_string();
        let query = request.uri().query().unwrap_or_default().to_string();
        match method {
            "Say" => text_response(StatusCode::OK, format!("{}?{}", body, query)),
            "Shout" => text_response(StatusCode::OK, body.to_uppercase()),
            "Check" => text_response(StatusCode::OK, "ok"),
            _ => text_response(StatusCode::NOT_FOUND, "no such method"),
        }
    }
}

fn options() -> NodeOptions {
    NodeOptions::new().with_tags(["test"])
}

async fn start(fabric: &MemoryFabric, name: &str, addr: &str) -> (MeshNode, String) {
    let node = MeshNode::in_memory(name, options(), fabric).unwrap();
    let bound = node.listen_and_serve(addr).await.unwrap();
    (node, bound)
}

fn post(uri: &str, body: &'static str) -> Request<Bytes> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Bytes::from_static(body.as_bytes()))
        .unwrap()
}

async fn body_text(response: HandlerResponse) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_publish_and_call() {
    let fabric = MemoryFabric::new();
    let (echo, echo_addr) = start(&fabric, "echo", "127.0.0.1:0").await;
    echo.publish(Arc::new(Echo)).unwrap();

    let (caller, _) = start(&fabric, "caller", "127.0.0.1:0").await;
    caller.join(&[echo_addr]).await.unwrap();

    let client = caller.new_client("echo", Arc::new(Echo), "Say");
    let response = client
        .do_request(post("/anything?lang=en", "hello"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body().as_ref(), b"hello?lang=en");

    let mut request = post("/", "hello");
    request
        .extensions_mut()
        .insert(MethodOverride("Shout".to_string()));
    let response = client.do_request(request).await.unwrap().unwrap();
    assert_eq!(response.body().as_ref(), b"HELLO");
}

#[tokio::test]
async fn test_override_must_name_a_handler() {
    let fabric = MemoryFabric::new();
    let (caller, _) = start(&fabric, "caller", "127.0.0.1:0").await;
    let client = caller.new_client("echo", Arc::new(Echo), "Say");

    for name in ["fingerprint", "Missing"] {
        let mut request = post("/", "");
        request
            .extensions_mut()
            .insert(MethodOverride(name.to_string()));
        assert!(matches!(
            client.do_request(request).await,
            Err(MeshError::InvalidHandler(n)) if n == name
        ));
    }
}

#[tokio::test]
async fn test_bare_name_client_reaches_published_spec() {
    let fabric = MemoryFabric::new();
    let (echo, echo_addr) = start(&fabric, "echo", "127.0.0.1:0").await;
    echo.publish(Arc::new(Echo)).unwrap();
    let (caller, _) = start(&fabric, "caller", "127.0.0.1:0").await;
    caller.join(&[echo_addr]).await.unwrap();

    let client = caller.new_client("echo", "Echo", "Shout");
    let response = client.do_request(post("/", "quiet")).await.unwrap().unwrap();
    assert_eq!(response.body().as_ref(), b"QUIET");
}

#[tokio::test]
async fn test_reverse_proxy_reports_disallowed_verb() {
    let fabric = MemoryFabric::new();
    let (echo, echo_addr) = start(&fabric, "echo", "127.0.0.1:0").await;
    echo.publish(Arc::new(Echo)).unwrap();
    let (gateway, _) = start(&fabric, "gateway", "127.0.0.1:0").await;
    gateway.join(&[echo_addr]).await.unwrap();

    let check = gateway.new_client("echo", Arc::new(Echo), "Check");
    assert!(check.is_proxy());
    gateway
        .router()
        .route(Method::GET, "/echo/check", check.clone().into_handler())
        .unwrap();
    gateway
        .router()
        .route(Method::POST, "/echo/check", check.into_handler())
        .unwrap();

    let ok = Request::builder()
        .uri("/echo/check")
        .body(Bytes::new())
        .unwrap();
    let response = gateway.router().handle(ok).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");

    let response = gateway.router().handle(post("/echo/check", "")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_text(response).await,
        "method POST not allowed for /echo/check: must be GET"
    );
}

#[tokio::test]
async fn test_use_method_mounts_other_handler() {
    let fabric = MemoryFabric::new();
    let (echo, echo_addr) = start(&fabric, "echo", "127.0.0.1:0").await;
    echo.publish(Arc::new(Echo)).unwrap();
    let (gateway, _) = start(&fabric, "gateway", "127.0.0.1:0").await;
    gateway.join(&[echo_addr]).await.unwrap();

    let client = gateway.new_client("echo", Arc::new(Echo), "");
    assert!(!client.is_proxy());
    gateway
        .router()
        .route(Method::POST, "/echo/shout", client.use_method("Shout").into_handler())
        .unwrap();

    let response = gateway.router().handle(post("/echo/shout", "hey")).await;
    assert_eq!(body_text(response).await, "HEY");
    assert_eq!(client.endpoint().unwrap().path, "/Echo/");
}

#[tokio::test]
async fn test_unconfigured_client_returns_nothing() {
    let result = Client::default().do_request(post("/", "")).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_wait_names_exactly_the_missing_service() {
    let fabric = MemoryFabric::new();
    let (gateway, gateway_addr) = start(&fabric, "gateway", "127.0.0.1:0").await;
    let (a, _) = start(&fabric, "a", "127.0.0.1:0").await;
    let (b, _) = start(&fabric, "b", "127.0.0.1:0").await;
    a.join(&[gateway_addr.clone()]).await.unwrap();
    b.join(&[gateway_addr]).await.unwrap();

    let specs: HashMap<String, Spec> = ["a", "b", "c"]
        .into_iter()
        .map(|name| (name.to_string(), Spec::from(name)))
        .collect();
    let ctx = WaitContext::with_timeout(Duration::from_secs(2));
    match gateway.wait(&ctx, specs).await {
        Err(MeshError::WaitTimeout(names)) => assert_eq!(names, vec!["c".to_string()]),
        other => panic!("expected wait timeout, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn test_wait_succeeds_when_late_service_starts() {
    let fabric = MemoryFabric::new();
    let (gateway, gateway_addr) = start(&fabric, "gateway", "127.0.0.1:0").await;
    let (a, _) = start(&fabric, "a", "127.0.0.1:0").await;
    let (b, _) = start(&fabric, "b", "127.0.0.1:0").await;
    a.join(&[gateway_addr.clone()]).await.unwrap();
    b.join(&[gateway_addr.clone()]).await.unwrap();

    let late_fabric = fabric.clone();
    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let (c, _) = start(&late_fabric, "c", "127.0.0.1:0").await;
        c.join(&[gateway_addr]).await.unwrap();
        c
    });

    let specs: HashMap<String, Spec> = ["a", "b", "c"]
        .into_iter()
        .map(|name| (name.to_string(), Spec::from(name)))
        .collect();
    let ctx = WaitContext::with_timeout(Duration::from_secs(10));
    gateway.wait(&ctx, specs).await.unwrap();
    let _c = late.await.unwrap();
}

#[tokio::test]
async fn test_wait_cancelled() {
    let fabric = MemoryFabric::new();
    let (gateway, _) = start(&fabric, "gateway", "127.0.0.1:0").await;
    let ctx = WaitContext::new();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let specs = HashMap::from([("nobody".to_string(), Spec::from("nobody"))]);
    assert!(matches!(
        gateway.wait(&ctx, specs).await,
        Err(MeshError::WaitTimeout(names)) if names == vec!["nobody".to_string()]
    ));
}

#[tokio::test]
async fn test_join_reports_bad_address_and_keeps_good_one() {
    let fabric = MemoryFabric::new();
    let (good, _) = start(&fabric, "good", "good:11999").await;
    good.publish(Arc::new(Echo)).unwrap();
    let (caller, _) = start(&fabric, "caller", "127.0.0.1:0").await;

    match caller.join(&["bad:addr:1", "good"]).await {
        Err(MeshError::Join(failed)) => assert_eq!(failed, vec!["bad:addr:1".to_string()]),
        other => panic!("expected join error, got {:?}", other.err()),
    }

    let client = caller.new_client("good", Arc::new(Echo), "Shout");
    let response = client.do_request(post("/", "joined")).await.unwrap().unwrap();
    assert_eq!(response.body().as_ref(), b"JOINED");
}

#[tokio::test]
async fn test_wildcard_listen_is_dialable_via_localhost() {
    let fabric = MemoryFabric::new();
    let (server, bound) = start(&fabric, "server", "0.0.0.0:9000").await;
    assert_eq!(bound, "0.0.0.0:9000");
    server.publish(Arc::new(Echo)).unwrap();

    let (client_node, _) = start(&fabric, "client", "127.0.0.1:0").await;
    client_node.join(&["localhost:9000"]).await.unwrap();

    let specs = HashMap::from([("server".to_string(), Spec::from("server"))]);
    let ctx = WaitContext::with_timeout(Duration::from_secs(2));
    client_node.wait(&ctx, specs).await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_nodes_joined_in_background() {
    let fabric = MemoryFabric::new();
    let (echo, echo_addr) = start(&fabric, "echo", "127.0.0.1:0").await;
    echo.publish(Arc::new(Echo)).unwrap();

    let caller = MeshNode::in_memory("caller", options().with_nodes([echo_addr]), &fabric).unwrap();
    caller.listen_and_serve("127.0.0.1:0").await.unwrap();

    let specs = HashMap::from([("echo".to_string(), Spec::from("echo"))]);
    let ctx = WaitContext::with_timeout(Duration::from_secs(3));
    caller.wait(&ctx, specs).await.unwrap();
}

#[tokio::test]
async fn test_debug_http_proxy_reaches_own_routes() {
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpStream;

    let fabric = MemoryFabric::new();
    let (node, _) = start(&fabric, "echo", "127.0.0.1:0").await;
    node.publish(Arc::new(Echo)).unwrap();
    let addr = node.listen_and_serve_http("127.0.0.1:0").await.unwrap();

    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let request = Request::builder()
        .method("POST")
        .uri("/Echo/Shout")
        .header("host", addr.to_string())
        .body(http_body_util::Full::new(Bytes::from_static(b"debug")))
        .unwrap();
    let response = sender.send_request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"DEBUG");
}
