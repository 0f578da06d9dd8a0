use super::load_or_report;
use crate::cli::args::ConfigArgs;
use crate::exit_codes;

pub fn run(args: ConfigArgs) -> anyhow::Result<i32> {
    let config = match load_or_report(&args.config) {
        Ok(c) => c,
        Err(code) => return Ok(code),
    };
    println!(
        "OK: {} ({} dimensions, weight sum {:.4}, {} execution items, {} badges) {}",
        config.suite,
        config.dimensions.len(),
        config.weight_sum(),
        config.execution.len(),
        config.badges.len(),
        config.digest()
    );
    Ok(exit_codes::SUCCESS)
}
