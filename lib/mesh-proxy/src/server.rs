//! Accept loops serving HTTP over virtual listeners and real sockets

use crate::router::Router;
use futures::future::{BoxFuture, FutureExt};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use mesh_transport::VirtualListener;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Handler for raw inbound requests.
pub type IncomingHandler =
    Arc<dyn Fn(Request<Incoming>) -> BoxFuture<'static, Response<Full<Bytes>>> + Send + Sync>;

/// Wrap a router as an inbound handler.
pub fn router_handler(router: Arc<Router>) -> IncomingHandler {
    Arc::new(move |req: Request<Incoming>| {
        let router = router.clone();
        async move { router.serve(req).await }.boxed()
    })
}

/// Serve every stream accepted on a virtual listener until the transport
/// drops it.
pub async fn serve_virtual(mut listener: VirtualListener, handler: IncomingHandler) {
    let host = listener.host().to_string();
    debug!(host = %host, "serving virtual listener");
    while let Some(stream) = listener.accept().await {
        tokio::spawn(serve_connection(stream, handler.clone(), host.clone()));
    }
    debug!(host = %host, "virtual listener closed");
}

/// Accept HTTP connections on a real socket forever.
pub async fn serve_tcp(listener: TcpListener, handler: IncomingHandler) -> std::io::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                tokio::spawn(serve_connection(stream, handler.clone(), peer_addr.to_string()));
            }
            Err(e) => {
                warn!("Error accepting HTTP connection: {}", e);
            }
        }
    }
}

async fn serve_connection<S>(stream: S, handler: IncomingHandler, peer: String)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let handler = handler.clone();
        async move { Ok::<_, Infallible>(handler(req).await) }
    });

    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
        debug!("Error serving HTTP connection from {}: {}", peer, e);
    }
}
