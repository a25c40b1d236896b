//! Readiness coordination
//!
//! Each dependency gets its own poller that probes `GET /ping` on the
//! service's virtual host until it answers, the deadline passes or the
//! caller cancels.

use hyper::body::Bytes;
use hyper::{Request, StatusCode};
use mesh_core::{service_fqdn, MeshError, Result};
use mesh_proxy::loopback::PING_PATH;
use mesh_proxy::MeshHttpClient;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay between probes of a dependency that answered with an error.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Why a `WaitContext` is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextError {
    Cancelled,
    DeadlineExceeded,
}

/// Cancellation token plus an optional deadline.
#[derive(Clone, Debug, Default)]
pub struct WaitContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl WaitContext {
    /// Context that ends only when cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Same token, with a deadline `timeout` from now.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Reason the context is done, if it is. Cancellation wins over the
    /// deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => ContextError::Cancelled,
                _ = sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }
}

/// Outcome of one liveness probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Ready,
    Timeout,
    Cancelled,
    Error,
}

impl From<ContextError> for ServiceState {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => ServiceState::Cancelled,
            ContextError::DeadlineExceeded => ServiceState::Timeout,
        }
    }
}

/// Probe a service's `/ping` route once.
pub async fn ping_service(http: &MeshHttpClient, ctx: &WaitContext, service: &str) -> ServiceState {
    let url = format!("http://{}{}", service_fqdn(service), PING_PATH);
    let request = match Request::get(url).body(Bytes::new()) {
        Ok(request) => request,
        Err(e) => {
            warn!(service, error = %e, "cannot build ping request");
            return ServiceState::Error;
        }
    };

    let result = tokio::select! {
        biased;
        reason = ctx.done() => return reason.into(),
        result = http.request(request) => result,
    };

    match result {
        Err(e) => match ctx.err() {
            Some(reason) => reason.into(),
            None => {
                debug!(service, error = %e, "ping failed");
                ServiceState::Error
            }
        },
        Ok(response) => classify_status(response.status()),
    }
}

fn classify_status(status: StatusCode) -> ServiceState {
    match status {
        StatusCode::OK | StatusCode::NO_CONTENT => ServiceState::Ready,
        _ => ServiceState::Error,
    }
}

async fn poll_service(
    http: Arc<MeshHttpClient>,
    ctx: WaitContext,
    service: String,
    ready: Arc<RwLock<HashSet<String>>>,
) {
    loop {
        match ping_service(&http, &ctx, &service).await {
            ServiceState::Ready => {
                debug!(service = %service, "service is ready");
                ready.write().await.insert(service);
                return;
            }
            ServiceState::Timeout | ServiceState::Cancelled => return,
            ServiceState::Error => {
                tokio::select! {
                    biased;
                    _ = ctx.done() => return,
                    _ = sleep(RETRY_INTERVAL) => {}
                }
            }
        }
    }
}

/// Block until every named service answers its liveness probe, or fail with
/// the names that did not once `ctx` is done.
pub async fn wait_for<I, S>(http: Arc<MeshHttpClient>, ctx: &WaitContext, services: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let requested: BTreeSet<String> = services.into_iter().map(Into::into).collect();
    let ready = Arc::new(RwLock::new(HashSet::with_capacity(requested.len())));

    let mut pollers = JoinSet::new();
    for service in &requested {
        pollers.spawn(poll_service(
            http.clone(),
            ctx.clone(),
            service.clone(),
            ready.clone(),
        ));
    }

    tokio::select! {
        biased;
        reason = ctx.done() => debug!(?reason, "wait interrupted"),
        _ = async { while pollers.join_next().await.is_some() {} } => {}
    }
    pollers.abort_all();

    let ready = ready.read().await;
    let not_ready: Vec<String> = requested
        .iter()
        .filter(|name| !ready.contains(*name))
        .cloned()
        .collect();
    if not_ready.is_empty() {
        info!(services = ?requested, "all services are ready");
        return Ok(());
    }
    Err(MeshError::WaitTimeout(not_ready))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), ServiceState::Ready);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), ServiceState::Ready);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), ServiceState::Error);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), ServiceState::Error);
    }

    #[test]
    fn test_context_err() {
        let ctx = WaitContext::new();
        assert_eq!(ctx.err(), None);
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));

        let ctx = WaitContext::with_timeout(Duration::ZERO);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_done_on_cancel() {
        let ctx = WaitContext::with_timeout(Duration::from_secs(60));
        let handle = ctx.clone();
        tokio::spawn(async move { handle.cancel() });
        assert_eq!(ctx.done().await, ContextError::Cancelled);
    }

    #[tokio::test]
    async fn test_done_on_deadline() {
        let ctx = WaitContext::new().timeout(Duration::from_millis(20));
        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[test]
    fn test_state_from_context() {
        assert_eq!(ServiceState::from(ContextError::Cancelled), ServiceState::Cancelled);
        assert_eq!(
            ServiceState::from(ContextError::DeadlineExceeded),
            ServiceState::Timeout
        );
    }
}
