use clap::Parser;

mod cli;
pub mod exit_codes;

use cli::args::Cli;
use cli::commands::dispatch;
use quorum_core::{PipelineError, StoreError};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    // Ignore a second init (tests may install their own subscriber).
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            fatal_code(&e)
        }
    };
    std::process::exit(code);
}

/// Store failures get their own code; anything else escaping `dispatch` is
/// an operator input problem.
fn fatal_code(err: &anyhow::Error) -> i32 {
    let store_failure = err.chain().any(|cause| {
        cause.is::<StoreError>()
            || matches!(
                cause.downcast_ref::<PipelineError>(),
                Some(PipelineError::Store(_))
            )
    });
    if store_failure {
        exit_codes::STORE_ERROR
    } else {
        exit_codes::CONFIG_ERROR
    }
}
