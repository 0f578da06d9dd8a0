use super::{load_or_report, open_run_store, print_run};
use crate::cli::args::{ListArgs, ShowArgs};
use crate::exit_codes;
use quorum_core::report::console;

pub fn show(args: ShowArgs) -> anyhow::Result<i32> {
    let config = match load_or_report(&args.config.config) {
        Ok(c) => c,
        Err(code) => return Ok(code),
    };
    let store = open_run_store(&args.store)?;
    match store.load(&args.run_id)? {
        Some(run) => print_run(&run, &config, args.json),
        None => {
            eprintln!("run not found: {}", args.run_id);
            Ok(exit_codes::RUN_FAILED)
        }
    }
}

pub fn list(args: ListArgs) -> anyhow::Result<i32> {
    let store = open_run_store(&args.store)?;
    let runs = store.list()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else if runs.is_empty() {
        println!("no runs");
    } else {
        print!("{}", console::format_run_list(&runs));
    }
    Ok(exit_codes::SUCCESS)
}
