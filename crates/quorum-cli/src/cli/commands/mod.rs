use super::args::*;
use crate::exit_codes;
use anyhow::Context;
use quorum_core::consensus::Rater;
use quorum_core::executor::ItemExecutor;
use quorum_core::model::{PipelineRun, RunStage};
use quorum_core::providers::{CommandExecutor, CommandRater, CommandSpec, FakeExecutor, FakeRater};
use quorum_core::report::console;
use quorum_core::storage::{open_store, RunStore};
use quorum_core::{load_config, BenchConfig, Coordinator, StoreError};
use std::path::Path;
use std::sync::Arc;

pub mod dimensions;
pub mod init;
pub mod run;
pub mod show;
pub mod signal;
pub mod validate;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => init::run(args),
        Command::Dimensions(args) => dimensions::run(args),
        Command::Validate(args) => validate::run(args),
        Command::Run(args) => run::run(args).await,
        Command::Signal(args) => signal::run(args).await,
        Command::Show(args) => show::show(args),
        Command::List(args) => show::list(args),
        Command::Resume(args) => run::resume(args).await,
    }
}

/// Load the configuration or report it and yield the config exit code.
pub(crate) fn load_or_report(path: &Path) -> Result<Arc<BenchConfig>, i32> {
    match load_config(path) {
        Ok(cfg) => Ok(Arc::new(cfg)),
        Err(e) => {
            eprintln!("config error: {}", e);
            Err(exit_codes::CONFIG_ERROR)
        }
    }
}

pub(crate) fn open_run_store(args: &StoreArgs) -> anyhow::Result<Arc<dyn RunStore>> {
    let is_dir_store = args.store.extension().is_none();
    let parent = if is_dir_store {
        Some(args.store.as_path())
    } else {
        args.store.parent()
    };
    if let Some(dir) = parent.filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
    }
    open_store(&args.store)
        .with_context(|| format!("failed to open run store {}", args.store.display()))
}

pub(crate) fn build_collaborators(
    args: &ProviderArgs,
    config: &BenchConfig,
) -> anyhow::Result<(Arc<dyn ItemExecutor>, Vec<Arc<dyn Rater>>)> {
    match args.provider {
        ProviderKind::Fake => {
            let raters = (0..config.settings.num_raters.max(1))
                .map(|i| Arc::new(FakeRater::new(format!("fake-{}", i))) as Arc<dyn Rater>)
                .collect();
            Ok((Arc::new(FakeExecutor::new()), raters))
        }
        ProviderKind::Command => {
            let exec = args
                .executor_cmd
                .as_deref()
                .context("--executor-cmd is required with --provider command")?;
            if args.rater_cmds.is_empty() {
                anyhow::bail!("at least one --rater-cmd is required with --provider command");
            }
            let executor = Arc::new(CommandExecutor::new(CommandSpec::parse(exec)?));
            let raters = args
                .rater_cmds
                .iter()
                .enumerate()
                .map(|(i, raw)| {
                    let spec = CommandSpec::parse(raw)?;
                    let name = format!("{}#{}", spec.program, i);
                    Ok(Arc::new(CommandRater::new(name, spec)) as Arc<dyn Rater>)
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok((executor, raters))
        }
    }
}

pub(crate) fn build_coordinator(
    config: Arc<BenchConfig>,
    store: Arc<dyn RunStore>,
    provider: &ProviderArgs,
) -> anyhow::Result<Coordinator> {
    let (executor, raters) = build_collaborators(provider, &config)?;
    tracing::debug!(
        executor = executor.name(),
        raters = raters.len(),
        "collaborators ready"
    );
    Ok(Coordinator::new(config, executor, raters, store))
}

/// Print a run and map its terminal stage to an exit code.
pub(crate) fn print_run(run: &PipelineRun, config: &BenchConfig, json: bool) -> anyhow::Result<i32> {
    if json {
        println!("{}", serde_json::to_string_pretty(run)?);
    } else {
        print!("{}", console::format_run_summary(run, config));
    }
    Ok(match run.stage {
        RunStage::Failed => exit_codes::RUN_FAILED,
        _ => exit_codes::SUCCESS,
    })
}
