/*!
 * Mock Runtime - single-shot runtime API peer
 *
 * Usage: mock-runtime [port]
 *
 * Serves one invocation, waits for the host's response and reports it on stdout.
 */

use miette::Report;
use std::process::ExitCode;
use tracing::error;

use trap_host::{init_tracing, InvocationServer, Result, ServeOutcome, ServerConfig, StructuredError};

fn parse_port() -> Result<Option<u16>> {
    std::env::args()
        .nth(1)
        .map(|arg| {
            arg.parse::<u16>()
                .map_err(|e| StructuredError::configuration(format!("invalid port '{arg}': {e}")))
        })
        .transpose()
}

fn run() -> Result<bool> {
    let mut config = ServerConfig::from_env()?;
    if let Some(port) = parse_port()? {
        config = config.with_port(port);
    }

    let server = InvocationServer::start(config)?;
    println!("Mock Lambda runtime on port {}", server.local_addr().port());

    match server.wait() {
        ServeOutcome::Responded(result) => {
            println!("Got response: {}", result.to_json()?);
            println!("Status: {}", result.status_code);
            println!("Body: {}", result.body);
            Ok(true)
        }
        ServeOutcome::TimedOut => {
            println!("Timed out waiting for response");
            Ok(false)
        }
    }
}

fn main() -> ExitCode {
    init_tracing();

    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            let code = error.kind.exit_code();
            error!(code = %error.kind.code(), error = %error, "Fatal error");
            eprintln!("{:?}", Report::new(error));
            ExitCode::from(code)
        }
    }
}
