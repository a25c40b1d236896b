//! greeter: publishes the Greeter service into the mesh.
//!
//! ```text
//! greeter --tag example --listen-addr 0.0.0.0:0 --nodes 10.0.0.5:11999
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use greeter_service::{Handler, RpcHandler, Service, SERVICE_NAME};
use mesh_cluster::{MeshNode, NodeOptions};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "greeter", about = "A Greeter service server for a meshrpc cluster")]
struct Args {
    /// Cluster nodes to join for service discovery.
    #[arg(short = 'N', long, env = "MESHRPC_CLUSTER_NODES", value_delimiter = ',')]
    nodes: Vec<String>,

    /// Cluster tag name.
    #[arg(short = 'T', long, env = "MESHRPC_CLUSTER_TAGNAME", default_value = "example")]
    tag: String,

    /// Listen address for cluster discovery and private networking.
    #[arg(long, env = "MESHRPC_LISTEN_ADDR", default_value = "0.0.0.0:0")]
    listen_addr: String,

    /// Log level: error|warn|info|debug or 1-4.
    #[arg(long, env = "MESHRPC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "MESHRPC_LOG_JSON")]
    log_json: bool,

    /// Log every served request at info level.
    #[arg(long, env = "MESHRPC_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    mesh_core::logging::init_tracing(&args.log_level, args.log_json);

    info!("Starting greeter...");

    let options = NodeOptions::new()
        .with_tags([args.tag.clone()])
        .with_nodes(args.nodes.clone())
        .with_debug(args.debug);
    let node = MeshNode::with_tcp(SERVICE_NAME, options).context("failed to create mesh node")?;

    let service = Arc::new(Service::new());
    node.publish(Arc::new(RpcHandler::new(service)))
        .context("failed to publish RPC handler")?;
    node.publish(Arc::new(Handler::new()))
        .context("failed to publish HTTP handler")?;

    let bound = node
        .listen_and_serve(&args.listen_addr)
        .await
        .context("failed to start mesh node")?;
    info!(addr = %bound, fqdn = %node.fqdn(), "greeter is serving");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down greeter");
    Ok(())
}
