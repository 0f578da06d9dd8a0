//! Process-backed collaborators. The request goes to the child's stdin, the
//! reply is read from its stdout. Children are killed when the call future
//! is dropped, which is what a per-call timeout does.

use crate::consensus::{Rater, RaterCall};
use crate::executor::{ExecutionContext, ItemExecutor};
use crate::model::{ExecutionOutput, WorkItem};
use anyhow::Context;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Program plus fixed arguments, parsed from a whitespace-separated string.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut parts = raw.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("command cannot be empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

async fn run_child(spec: &CommandSpec, env: &[(&str, &str)], stdin: &[u8]) -> anyhow::Result<String> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (k, v) in env {
        cmd.env(k, v);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn '{}'", spec.program))?;
    // Feed stdin concurrently with draining stdout; a chatty child would
    // otherwise block on a full pipe.
    let writer = child.stdin.take().map(|mut input| {
        let payload = stdin.to_vec();
        tokio::spawn(async move {
            let res = input.write_all(&payload).await;
            drop(input);
            res
        })
    });

    let out = child
        .wait_with_output()
        .await
        .context("failed to wait for child")?;
    if let Some(handle) = writer {
        if let Ok(Err(e)) = handle.await {
            // A child that exits without reading its input is not an error by itself.
            tracing::debug!(program = %spec.program, error = %e, "child stdin write failed");
        }
    }
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        anyhow::bail!(
            "'{}' exited with {}: {}",
            spec.program,
            out.status,
            stderr.trim()
        );
    }
    String::from_utf8(out.stdout).context("child stdout is not UTF-8")
}

/// Executes each item by running a command. The child receives a JSON
/// request on stdin and may answer with an [`ExecutionOutput`] JSON object
/// or with plain text, which becomes the output verbatim.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    spec: CommandSpec,
}

impl CommandExecutor {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl ItemExecutor for CommandExecutor {
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        item: &WorkItem,
    ) -> anyhow::Result<ExecutionOutput> {
        let request = serde_json::json!({
            "run_id": ctx.run_id,
            "tool_id": ctx.tool_id,
            "tool_version": ctx.tool_version,
            "site": ctx.site,
            "item": item,
        });
        let stdin = serde_json::to_vec(&request)?;
        let env = [
            ("QUORUM_RUN_ID", ctx.run_id.as_str()),
            ("QUORUM_ITEM_ID", item.id.as_str()),
            ("QUORUM_ITEM_KIND", item.kind.as_str()),
        ];
        let stdout = run_child(&self.spec, &env, &stdin).await?;
        Ok(decode_output(&stdout))
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

fn decode_output(stdout: &str) -> ExecutionOutput {
    let trimmed = stdout.trim();
    if trimmed.starts_with('{') {
        if let Ok(out) = serde_json::from_str::<ExecutionOutput>(trimmed) {
            return out;
        }
    }
    ExecutionOutput {
        output: trimmed.to_string(),
        ..ExecutionOutput::default()
    }
}

/// Rates by running a command with the rating instruction on stdin; stdout
/// is the raw reply.
#[derive(Debug, Clone)]
pub struct CommandRater {
    name: String,
    spec: CommandSpec,
}

impl CommandRater {
    pub fn new(name: impl Into<String>, spec: CommandSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

#[async_trait]
impl Rater for CommandRater {
    async fn rate(&self, call: &RaterCall<'_>) -> anyhow::Result<String> {
        let index = call.rater_index.to_string();
        let max = call.max_points.to_string();
        let env = [
            ("QUORUM_RUN_ID", call.run_id),
            ("QUORUM_ITEM_ID", call.item_id),
            ("QUORUM_DIMENSION", call.dimension_key),
            ("QUORUM_MAX_POINTS", max.as_str()),
            ("QUORUM_RATER_INDEX", index.as_str()),
        ];
        run_child(&self.spec, &env, call.prompt.as_bytes()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_spec() {
        let spec = CommandSpec::parse("  python3 rate.py --model x ").unwrap();
        assert_eq!(spec.program, "python3");
        assert_eq!(spec.args, vec!["rate.py", "--model", "x"]);
        assert!(CommandSpec::parse("   ").is_err());
    }

    #[test]
    fn structured_or_plain_stdout() {
        let structured = decode_output(r#"{"output": "hi", "evidence_refs": ["shot.png"], "cost_usd": 0.5}"#);
        assert_eq!(structured.output, "hi");
        assert_eq!(structured.evidence_refs, vec!["shot.png"]);
        assert_eq!(structured.cost_usd, Some(0.5));

        let plain = decode_output("just words\n");
        assert_eq!(plain.output, "just words");
        assert!(plain.evidence_refs.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rater_pipes_prompt_through_child() {
        let rater = CommandRater::new("cat", CommandSpec::parse("cat").unwrap());
        let call = RaterCall {
            run_id: "run",
            item_id: "t1",
            dimension_key: "x",
            max_points: 10.0,
            rater_index: 0,
            prompt: "{\"score\": 3, \"notes\": \"n\", \"evidence_flags\": []}",
        };
        let reply = rater.rate(&call).await.unwrap();
        assert_eq!(reply, call.prompt);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_child_is_an_error() {
        let exec = CommandExecutor::new(CommandSpec::parse("false").unwrap());
        let ctx = ExecutionContext {
            run_id: "run".into(),
            tool_id: "t".into(),
            tool_version: "1".into(),
            site: None,
        };
        let item = WorkItem {
            id: "a".into(),
            kind: crate::model::ItemKind::Probe,
            input: "hi".into(),
        };
        let err = exec.execute(&ctx, &item).await.unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }
}
