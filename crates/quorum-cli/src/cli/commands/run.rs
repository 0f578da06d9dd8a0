use super::{build_coordinator, load_or_report, open_run_store, print_run};
use crate::cli::args::{RunArgs, ShowArgs};
use crate::exit_codes;
use quorum_core::PipelineError;

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let config = match load_or_report(&args.config.config) {
        Ok(c) => c,
        Err(code) => return Ok(code),
    };
    let store = open_run_store(&args.store)?;
    let coordinator = build_coordinator(config.clone(), store, &args.provider)?;

    let run = coordinator
        .run_manual(&args.tool, &args.version, args.evidence.clone())
        .await?;
    print_run(&run, &config, args.json)
}

pub async fn resume(args: ShowArgs) -> anyhow::Result<i32> {
    let config = match load_or_report(&args.config.config) {
        Ok(c) => c,
        Err(code) => return Ok(code),
    };
    let store = open_run_store(&args.store)?;
    let coordinator = build_coordinator(config.clone(), store, &args.provider)?;

    match coordinator.resume(&args.run_id).await {
        Ok(run) => print_run(&run, &config, args.json),
        Err(PipelineError::RunNotFound(id)) => {
            eprintln!("run not found: {}", id);
            Ok(exit_codes::RUN_FAILED)
        }
        Err(e) => Err(e.into()),
    }
}
