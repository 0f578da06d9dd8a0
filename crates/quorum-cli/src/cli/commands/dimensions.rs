use super::load_or_report;
use crate::cli::args::ConfigArgs;
use crate::exit_codes;
use quorum_core::report::console;

pub fn run(args: ConfigArgs) -> anyhow::Result<i32> {
    let config = match load_or_report(&args.config) {
        Ok(c) => c,
        Err(code) => return Ok(code),
    };
    print!("{}", console::format_dimensions(&config));
    Ok(exit_codes::SUCCESS)
}
