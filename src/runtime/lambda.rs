/*!
 * Lambda Module
 * Loop-style runtime API capability: init once, then next / response per invocation
 *
 * Only native builds provide it; an interpreted build reports UnsupportedOperation
 * from every entry point.
 */

use super::client::RuntimeApiClient;
use super::types::{Invocation, InvocationResult};
use crate::core::deps::Backend;
use crate::core::errors::{Result, StructuredError};
use std::env;
use std::time::Duration;
use tracing::info;

pub const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";

#[derive(Debug)]
pub struct LambdaModule {
    backend: Backend,
    request_timeout: Duration,
    client: Option<RuntimeApiClient>,
    /// Request id of the invocation awaiting its response
    current: Option<String>,
}

impl LambdaModule {
    pub fn new(backend: Backend, request_timeout: Duration) -> Self {
        Self {
            backend,
            request_timeout,
            client: None,
            current: None,
        }
    }

    fn require_native(&self, operation: &str) -> Result<()> {
        match self.backend {
            Backend::Native => Ok(()),
            Backend::Interpreted => Err(StructuredError::unsupported(format!(
                "{operation} is only available in native builds"
            ))),
        }
    }

    fn client(&self, operation: &str) -> Result<&RuntimeApiClient> {
        self.client.as_ref().ok_or_else(|| {
            StructuredError::configuration(format!("{operation} called before aws.lambda_init"))
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.client.is_some()
    }

    /// Connect to the runtime API named by `AWS_LAMBDA_RUNTIME_API`
    pub fn lambda_init(&mut self) -> Result<()> {
        self.require_native("aws.lambda_init")?;
        let endpoint = env::var(RUNTIME_API_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| StructuredError::configuration(format!("{RUNTIME_API_ENV} not set")))?;
        self.lambda_init_with(&endpoint)
    }

    pub fn lambda_init_with(&mut self, endpoint: &str) -> Result<()> {
        self.require_native("aws.lambda_init")?;
        self.client = Some(RuntimeApiClient::new(endpoint, self.request_timeout)?);
        info!(endpoint, "Runtime API client initialized");
        Ok(())
    }

    /// Fetch the next invocation
    pub fn lambda_next(&mut self) -> Result<Invocation> {
        self.require_native("aws.lambda_next")?;
        let invocation = self.client("aws.lambda_next")?.next_invocation()?;
        self.current = Some(invocation.request_id.clone());
        Ok(invocation)
    }

    /// Fetch the next invocation and return only its body
    pub fn lambda_next_body(&mut self) -> Result<String> {
        self.require_native("aws.lambda_next_body")?;
        let invocation = self.lambda_next()?;
        Ok(String::from_utf8_lossy(&invocation.body).into_owned())
    }

    /// Answer the current invocation
    pub fn response(&mut self, status_code: i32, body: &str) -> Result<()> {
        self.require_native("aws.response")?;
        self.respond(&InvocationResult::new(status_code, body))
    }

    pub fn respond(&mut self, result: &InvocationResult) -> Result<()> {
        self.require_native("aws.response")?;
        let client = self.client("aws.response")?;
        let request_id = self
            .current
            .as_deref()
            .ok_or_else(|| StructuredError::protocol("no invocation awaiting a response"))?;
        client.post_response(request_id, result)?;
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    fn interpreted() -> LambdaModule {
        LambdaModule::new(Backend::Interpreted, Duration::from_secs(1))
    }

    #[test]
    fn test_interpreted_build_rejects_every_entry_point() {
        let mut lambda = interpreted();
        let error = lambda.lambda_init().unwrap_err();
        assert_eq!(error.kind, ErrorKind::UnsupportedOperation);
        assert_eq!(error.message, "aws.lambda_init is only available in native builds");

        assert_eq!(
            lambda.lambda_next_body().unwrap_err().kind,
            ErrorKind::UnsupportedOperation
        );
        assert_eq!(
            lambda.response(200, "ok").unwrap_err().kind,
            ErrorKind::UnsupportedOperation
        );
    }

    #[test]
    #[serial]
    fn test_missing_runtime_api_is_configuration_error() {
        let saved = env::var(RUNTIME_API_ENV).ok();
        env::remove_var(RUNTIME_API_ENV);

        let mut lambda = LambdaModule::new(Backend::Native, Duration::from_secs(1));
        let error = lambda.lambda_init().unwrap_err();
        assert_eq!(error.kind, ErrorKind::Configuration);
        assert!(!lambda.is_initialized());

        if let Some(value) = saved {
            env::set_var(RUNTIME_API_ENV, value);
        }
    }

    #[test]
    fn test_use_before_init_is_configuration_error() {
        let mut lambda = LambdaModule::new(Backend::Native, Duration::from_secs(1));
        assert_eq!(lambda.lambda_next().unwrap_err().kind, ErrorKind::Configuration);
    }
}
