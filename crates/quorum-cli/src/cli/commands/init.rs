use crate::cli::args::InitArgs;
use crate::exit_codes;

pub fn run(args: InitArgs) -> anyhow::Result<i32> {
    if args.config.exists() && !args.force {
        eprintln!(
            "{} already exists (use --force to overwrite)",
            args.config.display()
        );
        return Ok(exit_codes::CONFIG_ERROR);
    }
    if let Some(dir) = args.config.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    if let Err(e) = quorum_core::write_sample_config(&args.config) {
        eprintln!("config error: {}", e);
        return Ok(exit_codes::CONFIG_ERROR);
    }
    println!("Wrote sample configuration to {}", args.config.display());
    Ok(exit_codes::SUCCESS)
}
