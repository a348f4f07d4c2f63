/*!
 * Trap Host - Main Entry Point
 *
 * Serves exactly one invocation from the runtime API named by
 * AWS_LAMBDA_RUNTIME_API, running the configured guest under the trap interceptor.
 */

use miette::Report;
use std::process::ExitCode;
use tracing::{error, info};

use trap_host::{
    ensure_deps, init_tracing, CrashReporterOrder, DiagnosticDumper, FaultFacility, HostConfig,
    InvocationClient, InvocationResult, LambdaModule, Result, ServeStatus, StackMachine,
    TrapInterceptor,
};

fn run() -> Result<InvocationResult> {
    let config = HostConfig::from_env()?;
    info!(
        guest = %config.guest,
        ownership = %config.ownership,
        backend = %config.build.backend,
        crash_reporter = ?config.crash_reporter,
        "Trap host starting"
    );

    if let Some(artifact) = ensure_deps(&config.build)? {
        info!(artifact = %artifact.display(), "Native dependencies ready");
    }

    let mut lambda = LambdaModule::new(config.build.backend, config.request_timeout);
    lambda.lambda_init()?;

    // Install order decides who owns the fault signals until the next re-claim
    let interceptor = TrapInterceptor::new(config.ownership);
    let dumper = DiagnosticDumper::new();
    if config.crash_reporter == CrashReporterOrder::BeforeInterceptor {
        dumper.install()?;
    }
    interceptor.install()?;
    if config.crash_reporter == CrashReporterOrder::AfterInterceptor {
        dumper.install()?;
    }

    let engine = StackMachine::new(config.guest.program()?);
    match InvocationClient::new(lambda, interceptor, engine).serve_one() {
        ServeStatus::Posted(result) => Ok(result),
        ServeStatus::Failed(error) => Err(error),
    }
}

fn main() -> ExitCode {
    init_tracing();

    match run() {
        Ok(result) => {
            info!(status = result.status_code, "Invocation complete");
            ExitCode::SUCCESS
        }
        Err(error) => {
            let code = error.kind.exit_code();
            error!(code = %error.kind.code(), error = %error, "Fatal error");
            eprintln!("{:?}", Report::new(error));
            ExitCode::from(code)
        }
    }
}
