use super::{build_coordinator, load_or_report, open_run_store, print_run};
use crate::cli::args::SignalArgs;
use crate::exit_codes;
use quorum_core::model::SourceKind;
use quorum_core::{PipelineError, SignalAccumulator, SignalDisposition, TriggeredPipeline};
use std::sync::Arc;

/// `kind=evidence`; a bare kind carries no evidence reference and is
/// rejected by the accumulator.
pub(crate) fn parse_source(raw: &str) -> anyhow::Result<(SourceKind, String)> {
    let (kind, evidence) = raw.split_once('=').unwrap_or((raw, ""));
    let kind = kind.parse::<SourceKind>().map_err(anyhow::Error::msg)?;
    Ok((kind, evidence.trim().to_string()))
}

pub async fn run(args: SignalArgs) -> anyhow::Result<i32> {
    let config = match load_or_report(&args.config.config) {
        Ok(c) => c,
        Err(code) => return Ok(code),
    };
    let sources = args
        .sources
        .iter()
        .map(|s| parse_source(s))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let store = open_run_store(&args.store)?;
    let coordinator = build_coordinator(config.clone(), store, &args.provider)?;
    let pipeline = TriggeredPipeline::new(
        Arc::new(SignalAccumulator::new(config.fusion.clone())),
        Arc::new(coordinator),
    );

    let mut code = exit_codes::SUCCESS;
    for (kind, evidence) in sources {
        let disposition = match pipeline.signal(&args.tool, &args.version, kind, &evidence).await {
            Ok(d) => d,
            Err(PipelineError::Rejected(e)) => {
                eprintln!("{}: signal rejected: {}", kind, e);
                return Ok(exit_codes::RUN_FAILED);
            }
            Err(e) => return Err(e.into()),
        };
        match disposition {
            SignalDisposition::Pending { seen, threshold } => {
                println!("{}: pending ({}/{} sources)", kind, seen, threshold);
            }
            SignalDisposition::Duplicate { source } => {
                println!("{}: duplicate source ignored", source);
            }
            SignalDisposition::Ran(run) => {
                println!("{}: fusion threshold reached", kind);
                code = print_run(&run, &config, args.json)?;
            }
        }
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kind_and_evidence() {
        let (kind, ev) = parse_source("rss=https://blog/feed").unwrap();
        assert_eq!(kind, SourceKind::Feed);
        assert_eq!(ev, "https://blog/feed");

        let (kind, ev) = parse_source("github").unwrap();
        assert_eq!(kind, SourceKind::Github);
        assert!(ev.is_empty());

        assert!(parse_source("pager=x").is_err());
    }
}
