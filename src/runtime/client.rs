/*!
 * Invocation Client
 * Host side of the runtime API: fetch, run under the interceptor, post
 */

use super::lambda::LambdaModule;
use super::types::{Invocation, InvocationResult, RUNTIME_API_VERSION};
use crate::core::errors::{Result, StructuredError};
use crate::engine::{ExecutionEngine, GuestInput};
use crate::monitoring::span_invocation;
use crate::signals::TrapInterceptor;
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::{debug, error, info};

/// Blocking HTTP client for the runtime API
#[derive(Debug, Clone)]
pub struct RuntimeApiClient {
    base: String,
    http: Client,
}

impl RuntimeApiClient {
    /// `endpoint` is `host:port`, optionally with a scheme
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/');
        let base = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            format!("{endpoint}/{RUNTIME_API_VERSION}/runtime")
        } else {
            format!("http://{endpoint}/{RUNTIME_API_VERSION}/runtime")
        };
        let http = Client::builder().timeout(timeout).build().map_err(|e| {
            StructuredError::configuration(format!("cannot build HTTP client: {e}"))
        })?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn next_invocation(&self) -> Result<Invocation> {
        let url = format!("{}/invocation/next", self.base);
        debug!(%url, "Fetching next invocation");
        let response = self.http.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(StructuredError::protocol(format!(
                "invocation/next returned {status}"
            )));
        }
        let headers = response.headers().clone();
        let payload = response.bytes()?;
        Invocation::from_reply(&headers, &payload)
    }

    pub fn post_response(&self, request_id: &str, result: &InvocationResult) -> Result<()> {
        let url = format!("{}/invocation/{request_id}/response", self.base);
        let response = self.http.post(&url).json(result).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(StructuredError::protocol(format!(
                "runtime API rejected response for {request_id}: {status}"
            )));
        }
        Ok(())
    }
}

/// Result of serving one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeStatus {
    Posted(InvocationResult),
    Failed(StructuredError),
}

impl ServeStatus {
    pub fn exit_code(&self) -> u8 {
        match self {
            ServeStatus::Posted(_) => 0,
            ServeStatus::Failed(error) => error.kind.exit_code(),
        }
    }
}

pub struct InvocationClient<E> {
    lambda: LambdaModule,
    interceptor: TrapInterceptor,
    engine: E,
}

impl<E: ExecutionEngine> InvocationClient<E> {
    pub fn new(lambda: LambdaModule, interceptor: TrapInterceptor, engine: E) -> Self {
        Self {
            lambda,
            interceptor,
            engine,
        }
    }

    /// Fetch one invocation, run it and post the result.
    ///
    /// Guest traps become non-2xx results and are still posted; only fetch or post
    /// failures end up in `ServeStatus::Failed`.
    pub fn serve_one(&mut self) -> ServeStatus {
        let invocation = match self.lambda.lambda_next() {
            Ok(invocation) => invocation,
            Err(e) => {
                error!(error = %e, "Could not fetch invocation");
                return ServeStatus::Failed(e);
            }
        };

        let result = self.handle(&invocation);
        match self.lambda.respond(&result) {
            Ok(()) => {
                info!(request_id = %invocation.request_id, status = result.status_code, "Response posted");
                ServeStatus::Posted(result)
            }
            Err(e) => {
                error!(request_id = %invocation.request_id, error = %e, "Could not post response");
                ServeStatus::Failed(e)
            }
        }
    }

    /// Run the engine on `invocation` and shape the outcome as a result
    pub fn handle(&mut self, invocation: &Invocation) -> InvocationResult {
        let span = span_invocation(&invocation.request_id);
        let _entered = span.enter();
        let input = GuestInput::from(invocation);
        let engine = &mut self.engine;

        let result = match self.interceptor.run_guarded(|_| engine.execute(&input)) {
            Ok(output) => InvocationResult::new(
                output.status_code.unwrap_or(200),
                String::from_utf8_lossy(&output.body),
            ),
            Err(error) => {
                span.record_error(&error);
                InvocationResult::new(error.kind.status_code(), error.to_string())
            }
        };
        span.record_status(result.status_code);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::deps::Backend;
    use crate::engine::{GuestOutput, MockExecutionEngine};
    use crate::runtime::types::InvocationHeaders;
    use crate::signals::{deliver_fault, TrapKind};
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    fn invocation(body: &str) -> Invocation {
        Invocation {
            request_id: "req-1".to_string(),
            deadline_ms: None,
            body: body.as_bytes().to_vec(),
            method: "POST".to_string(),
            headers: InvocationHeaders::default(),
        }
    }

    fn client(engine: MockExecutionEngine) -> InvocationClient<MockExecutionEngine> {
        InvocationClient::new(
            LambdaModule::new(Backend::Native, Duration::from_secs(1)),
            TrapInterceptor::default(),
            engine,
        )
    }

    #[test]
    #[serial]
    fn test_success_defaults_to_200() {
        let mut engine = MockExecutionEngine::new();
        engine
            .expect_execute()
            .times(1)
            .returning(|input| {
                Ok(GuestOutput {
                    status_code: None,
                    body: input.body.clone(),
                })
            });

        let result = client(engine).handle(&invocation("hello"));
        assert_eq!(result, InvocationResult::new(200, "hello"));
    }

    #[test]
    #[serial]
    fn test_trap_becomes_500_result() {
        let mut engine = MockExecutionEngine::new();
        engine
            .expect_execute()
            .returning(|_| Err(deliver_fault(TrapKind::IntegerDivision)));

        let result = client(engine).handle(&invocation(""));
        assert_eq!(result.status_code, 500);
        assert_eq!(result.body, "trap: integer divide by zero or overflow");
    }

    #[test]
    fn test_unreachable_endpoint_is_protocol_failure() {
        let mut lambda = LambdaModule::new(Backend::Native, Duration::from_millis(200));
        // port 9 (discard) is never served here
        lambda.lambda_init_with("127.0.0.1:9").unwrap();
        let status = InvocationClient::new(lambda, TrapInterceptor::default(), MockExecutionEngine::new())
            .serve_one();
        assert_eq!(status.exit_code(), 1);
    }

    #[test]
    fn test_base_url_normalization() {
        let client = RuntimeApiClient::new("127.0.0.1:9001/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9001/2018-06-01/runtime");
        let client = RuntimeApiClient::new("http://localhost:1", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:1/2018-06-01/runtime");
    }
}
