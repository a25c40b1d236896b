//! mesh-gateway: public HTTP API in front of mesh services.
//!
//! ```text
//! mesh-gateway --tag example --listen-addr 0.0.0.0:11999 -P 8282
//! curl http://localhost:8282/greeter/greet/Max
//! curl -X POST http://localhost:8282/greeter/sendPostcard/Max/World/Hello
//! curl http://localhost:8282/greeter/check
//! curl -d '{"name": "Max"}' http://localhost:8282/greeter/greet
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use greeter_service::handler::handler_spec;
use greeter_service::rpc::rpc_spec;
use greeter_service::{GreeterClient, SERVICE_NAME};
use mesh_cluster::{MeshNode, NodeOptions, WaitContext};
use mesh_core::addr::join_host_port;
use mesh_proxy::{router_handler, serve_tcp, LoggingMiddleware, MiddlewareChain, Router};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod routes;

const NODE_NAME: &str = "mesh_api";

#[derive(Parser, Debug)]
#[command(name = "mesh-gateway", about = "An example API gateway for a meshrpc cluster")]
struct Args {
    /// Cluster nodes to join for service discovery.
    #[arg(short = 'N', long, env = "MESHRPC_CLUSTER_NODES", value_delimiter = ',')]
    nodes: Vec<String>,

    /// Cluster tag name.
    #[arg(short = 'T', long, env = "MESHRPC_CLUSTER_TAGNAME", default_value = "example")]
    tag: String,

    /// Listen address for cluster discovery and private networking.
    #[arg(long, env = "MESHRPC_LISTEN_ADDR", default_value = "0.0.0.0:11999")]
    listen_addr: String,

    /// Listen HTTP host.
    #[arg(short = 'H', long, env = "APP_HTTP_HOST", default_value = "0.0.0.0")]
    http_host: String,

    /// Listen HTTP port.
    #[arg(short = 'P', long, env = "APP_HTTP_PORT", default_value = "8282")]
    http_port: String,

    /// Plain HTTP access to this node's mesh routes, for debugging.
    #[arg(long, env = "MESHRPC_DEBUG_ADDR")]
    debug_addr: Option<String>,

    /// Seconds to wait for dependencies before serving anyway.
    #[arg(long, default_value = "30")]
    wait_timeout: u64,

    /// Log level: error|warn|info|debug or 1-4.
    #[arg(long, env = "MESHRPC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "MESHRPC_LOG_JSON")]
    log_json: bool,

    /// Log every served mesh request at info level.
    #[arg(long, env = "MESHRPC_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    mesh_core::logging::init_tracing(&args.log_level, args.log_json);

    info!("Starting mesh-gateway...");

    let options = NodeOptions::new()
        .with_tags([args.tag.clone()])
        .with_nodes(args.nodes.clone())
        .with_debug(args.debug);
    let node = MeshNode::with_tcp(NODE_NAME, options).context("failed to create mesh node")?;
    let bound = node
        .listen_and_serve(&args.listen_addr)
        .await
        .context("failed to start mesh node")?;
    info!(addr = %bound, "mesh node listening");

    if let Some(debug_addr) = &args.debug_addr {
        let addr = node
            .listen_and_serve_http(debug_addr)
            .await
            .context("failed to start debug proxy")?;
        info!(addr = %addr, "debug proxy listening");
    }

    let ctx = WaitContext::with_timeout(Duration::from_secs(args.wait_timeout));
    let deps = HashMap::from([(SERVICE_NAME.to_string(), rpc_spec())]);
    if let Err(e) = node.wait(&ctx, deps).await {
        warn!(error = %e, "service await failure");
    }

    let greeter_client = node.new_client(SERVICE_NAME, rpc_spec(), "");
    let svc = Arc::new(GreeterClient::new(greeter_client.clone()));
    // the plain handler has its own verbs, so it gets its own client
    let check = node
        .new_client(SERVICE_NAME, handler_spec(), "")
        .use_method("Check");
    let greet_proxy = greeter_client.use_method("Greet");

    let router = Arc::new(Router::with_middleware(
        MiddlewareChain::new().add(LoggingMiddleware::new("mesh-gateway", true)),
    ));
    routes::install(&router, svc, check, greet_proxy).context("failed to install routes")?;
    for (method, path) in router.routes() {
        info!("  {} {}", method, path);
    }

    let http_addr = join_host_port(&args.http_host, &args.http_port);
    let listener = TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("failed to bind {}", http_addr))?;
    info!("HTTP server listening on {}", http_addr);

    tokio::select! {
        result = serve_tcp(listener, router_handler(router)) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down mesh-gateway"),
    }
    Ok(())
}
