use super::prompts::render;
use super::{ContentGenerator, GenerationContext};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Runs an external CLI per call: prompt on stdin, answer on stdout.
///
/// Works with `claude --print`, `llm`, `ollama run <model>` and similar tools.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl ContentGenerator for CommandGenerator {
    async fn generate(&self, ctx: &GenerationContext) -> Result<String> {
        let prompt = render(ctx).combined();
        tracing::debug!(
            program = %self.program,
            mode = ctx.mode.as_str(),
            chars = prompt.len(),
            "Invoking generator command"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn generator command: {}", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to generator stdin")?;
            stdin
                .shutdown()
                .await
                .context("Failed to close generator stdin")?;
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for generator command")?,
            Err(_) => bail!(
                "Generator command timed out after {}s",
                self.timeout.as_secs()
            ),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Generator command exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            bail!("Generator command produced no output");
        }
        Ok(stdout)
    }
}
