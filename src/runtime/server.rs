/*!
 * Invocation Server
 * Single-shot runtime API peer used to drive the host end to end
 *
 * The accept loop runs on its own thread with a current-thread tokio runtime. The
 * waiter blocks on the ledger's completion channel; the loop shuts down as soon as
 * a response is recorded or the wait bound elapses. Connections still open
 * [`DRAIN_GRACE`] after that are dropped with the runtime.
 */

use super::ledger::{InvocationLedger, PendingInvocation};
use super::types::{InvocationResult, DEADLINE_HEADER, REQUEST_ID_HEADER, RUNTIME_API_VERSION};
use crate::core::config::ServerConfig;
use crate::core::errors::{Result, StructuredError};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How long open connections may keep the loop alive once shutdown starts
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone)]
struct ServerState {
    ledger: Arc<InvocationLedger>,
    /// Flips to `true` once; every shutdown waiter subscribes to it
    stop: Arc<watch::Sender<bool>>,
}

impl ServerState {
    fn new(ledger: InvocationLedger) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            ledger: Arc::new(ledger),
            stop: Arc::new(stop),
        }
    }

    fn request_stop(&self) {
        self.stop.send_replace(true);
    }
}

/// How the wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOutcome {
    Responded(InvocationResult),
    TimedOut,
}

fn rejection_response(status: StatusCode, error_type: &str, message: String) -> Response {
    (
        status,
        Json(json!({ "errorMessage": message, "errorType": error_type })),
    )
        .into_response()
}

fn deadline_ms(deadline: Duration) -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|now| (now + deadline).as_millis())
        .unwrap_or_default()
}

async fn next_invocation(State(state): State<ServerState>) -> Response {
    match state.ledger.next() {
        Ok(pending) => {
            debug!(request_id = %pending.request_id, "Issuing invocation");
            (
                StatusCode::OK,
                [
                    (REQUEST_ID_HEADER, pending.request_id.clone()),
                    (DEADLINE_HEADER, deadline_ms(pending.deadline).to_string()),
                ],
                Json(pending.event),
            )
                .into_response()
        }
        Err(rejection) => {
            rejection_response(StatusCode::CONFLICT, rejection.error_type(), rejection.to_string())
        }
    }
}

async fn post_response(
    State(state): State<ServerState>,
    Path(request_id): Path<String>,
    body: Bytes,
) -> Response {
    let result: InvocationResult = match serde_json::from_slice(&body) {
        Ok(result) => result,
        Err(e) => {
            warn!(%request_id, error = %e, "Malformed response payload");
            return rejection_response(
                StatusCode::BAD_REQUEST,
                "Runtime.MalformedResponse",
                e.to_string(),
            );
        }
    };

    match state.ledger.respond(&request_id, result) {
        Ok(()) => {
            info!(%request_id, "Response recorded");
            state.request_stop();
            StatusCode::ACCEPTED.into_response()
        }
        Err(rejection) => {
            warn!(%request_id, %rejection, "Response rejected");
            rejection_response(StatusCode::CONFLICT, rejection.error_type(), rejection.to_string())
        }
    }
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/invocation/next", get(next_invocation))
        .route("/invocation/:request_id/response", post(post_response))
}

fn router(state: ServerState) -> Router {
    Router::new()
        .merge(routes())
        .nest(&format!("/{RUNTIME_API_VERSION}/runtime"), routes())
        .with_state(state)
}

/// Resolves once a stop is requested or `wait_timeout` elapses
async fn shutdown_signal(mut stop: watch::Receiver<bool>, wait_timeout: Duration) {
    tokio::select! {
        _ = stop.wait_for(|stopped| *stopped) => {}
        _ = tokio::time::sleep(wait_timeout) => {}
    }
}

fn serve_blocking(
    listener: std::net::TcpListener,
    state: ServerState,
    wait_timeout: Duration,
) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let stop = state.stop.clone();

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::from_std(listener)?;
        let serve = axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown_signal(stop.subscribe(), wait_timeout))
            .into_future();
        let drain_deadline = async {
            shutdown_signal(stop.subscribe(), wait_timeout).await;
            tokio::time::sleep(DRAIN_GRACE).await;
        };

        tokio::select! {
            result = serve => result,
            _ = drain_deadline => {
                warn!(
                    grace_ms = DRAIN_GRACE.as_millis() as u64,
                    "Dropping connections still open after shutdown"
                );
                Ok(())
            }
        }
    })
}

pub struct InvocationServer;

impl InvocationServer {
    /// Bind `127.0.0.1:<port>` and start serving the configured invocation
    pub fn start(config: ServerConfig) -> Result<RunningServer> {
        let listener = std::net::TcpListener::bind(("127.0.0.1", config.port)).map_err(|e| {
            StructuredError::configuration(format!("cannot bind 127.0.0.1:{}: {e}", config.port))
        })?;
        let local_addr = listener
            .local_addr()
            .and_then(|addr| listener.set_nonblocking(true).map(|_| addr))
            .map_err(|e| StructuredError::configuration(format!("listener setup failed: {e}")))?;

        let (ledger, completed) = InvocationLedger::new(PendingInvocation::from(&config));
        let state = ServerState::new(ledger);

        let thread_state = state.clone();
        let wait_timeout = config.wait_timeout;
        let thread = thread::Builder::new()
            .name("invocation-server".to_string())
            .spawn(move || {
                if let Err(e) = serve_blocking(listener, thread_state, wait_timeout) {
                    error!(error = %e, "Invocation server failed");
                }
            })
            .map_err(|e| StructuredError::configuration(format!("cannot spawn server thread: {e}")))?;

        info!(%local_addr, request_id = %config.request_id, "Invocation server listening");
        Ok(RunningServer {
            local_addr,
            state,
            completed,
            wait_timeout,
            thread: Some(thread),
        })
    }
}

/// Handle to a started server; stops it when dropped
pub struct RunningServer {
    local_addr: SocketAddr,
    state: ServerState,
    completed: flume::Receiver<InvocationResult>,
    wait_timeout: Duration,
    thread: Option<JoinHandle<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `host:port`, the form `AWS_LAMBDA_RUNTIME_API` takes
    pub fn endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.local_addr.port())
    }

    pub fn ledger(&self) -> &InvocationLedger {
        &self.state.ledger
    }

    /// Block until a response is recorded or the wait bound elapses. Returns at most
    /// [`DRAIN_GRACE`] later, however many clients are still mid-request.
    pub fn wait(mut self) -> ServeOutcome {
        let outcome = match self.completed.recv_timeout(self.wait_timeout) {
            Ok(result) => ServeOutcome::Responded(result),
            Err(_) => ServeOutcome::TimedOut,
        };
        self.stop();
        outcome
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.state.request_stop();
            if thread.join().is_err() {
                error!("Invocation server thread panicked");
            }
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state() -> ServerState {
        let (ledger, _completed) =
            InvocationLedger::new(PendingInvocation::from(&ServerConfig::default()));
        ServerState::new(ledger)
    }

    async fn post(state: &ServerState, payload: &'static str) -> Response {
        post_response(
            State(state.clone()),
            Path("test-request-123".to_string()),
            Bytes::from_static(payload.as_bytes()),
        )
        .await
    }

    #[tokio::test]
    async fn test_duplicate_response_is_conflict() {
        let state = state();
        let issued = next_invocation(State(state.clone())).await;
        assert_eq!(issued.status(), StatusCode::OK);

        let first = post(&state, r#"{"statusCode":200,"body":"a"}"#).await;
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        assert!(*state.stop.borrow());

        let second = post(&state, r#"{"statusCode":500,"body":"b"}"#).await;
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["errorType"], "Runtime.DuplicateResponse");

        let recorded = state.ledger.recorded().unwrap();
        assert_eq!((recorded.status_code, recorded.body.as_str()), (200, "a"));
    }

    #[tokio::test]
    async fn test_next_after_completion_is_closed() {
        let state = state();
        next_invocation(State(state.clone())).await;
        post(&state, r#"{"statusCode":200,"body":"a"}"#).await;

        let closed = next_invocation(State(state.clone())).await;
        assert_eq!(closed.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_shutdown_signal_fires_on_stop() {
        let state = state();
        let signal = shutdown_signal(state.stop.subscribe(), Duration::from_secs(60));
        state.request_stop();
        tokio::time::timeout(Duration::from_secs(5), signal)
            .await
            .unwrap();
    }
}
