//! Hooks run by the local router around every request

use anyhow::Result;
use hyper::{Method, Request};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, debug_span, Instrument};

/// What a hook gets to see of a request.
#[derive(Clone, Debug)]
pub struct MiddlewareContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    /// Target host, from the `host` header or an absolute URI.
    pub host: Option<String>,
    pub started: Instant,
}

impl MiddlewareContext {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let host = req
            .headers()
            .get(hyper::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().host().map(str::to_string));

        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            query: req.uri().query().map(str::to_string),
            host,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs before dispatch. An error short-circuits the request with a 500.
    async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
        Ok(())
    }

    /// Runs after dispatch with the response status.
    async fn on_response(&self, _context: &MiddlewareContext, _status: u16) -> Result<()> {
        Ok(())
    }
}

/// Ordered hooks; response hooks run innermost first.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    hooks: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.hooks.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        for hook in &self.hooks {
            hook.on_request(context)
                .instrument(debug_span!("middleware", name = hook.name()))
                .await?;
        }
        Ok(())
    }

    pub async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        for hook in self.hooks.iter().rev() {
            hook.on_response(context, status)
                .instrument(debug_span!("middleware", name = hook.name()))
                .await?;
        }
        Ok(())
    }
}

/// Access log line per answered request.
pub struct LoggingMiddleware {
    service: String,
    verbose: bool,
}

impl LoggingMiddleware {
    /// `verbose` logs at info instead of debug.
    pub fn new(service: impl Into<String>, verbose: bool) -> Self {
        Self {
            service: service.into(),
            verbose,
        }
    }
}

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        let elapsed_ms = context.elapsed().as_millis() as u64;
        let query = context.query.as_deref().unwrap_or("");
        if self.verbose {
            info!(service = %self.service, method = %context.method, path = %context.path,
                query, status, elapsed_ms, "request served");
        } else {
            debug!(service = %self.service, method = %context.method, path = %context.path,
                query, status, elapsed_ms, "request served");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records hook order into a shared log.
    struct Trace {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Middleware for Trace {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:req", self.label));
            Ok(())
        }

        async fn on_response(&self, _context: &MiddlewareContext, status: u16) -> Result<()> {
            self.log.lock().unwrap().push(format!("{}:{}", self.label, status));
            Ok(())
        }
    }

    fn context() -> MiddlewareContext {
        let req = Request::builder()
            .method("POST")
            .uri("http://meshrpc.greeter/RPCHandler/Greet?lang=en")
            .body(())
            .unwrap();
        MiddlewareContext::from_request(&req)
    }

    #[test]
    fn test_context_from_request() {
        let context = context();
        assert_eq!(context.method, Method::POST);
        assert_eq!(context.path, "/RPCHandler/Greet");
        assert_eq!(context.query.as_deref(), Some("lang=en"));
        assert_eq!(context.host.as_deref(), Some("meshrpc.greeter"));
    }

    #[tokio::test]
    async fn test_chain_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new()
            .add(LoggingMiddleware::new("greeter", false))
            .add(Trace { label: "outer", log: log.clone() })
            .add(Trace { label: "inner", log: log.clone() });
        assert_eq!(chain.len(), 3);

        let context = context();
        chain.on_request(&context).await.unwrap();
        chain.on_response(&context, 404).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:req", "inner:req", "inner:404", "outer:404"]
        );
    }
}
