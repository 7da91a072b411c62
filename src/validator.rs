//! Static validation of generated artifacts.
//!
//! [`ScriptValidator`] first checks for required symbols, then hands the
//! artifact on stdin to an external parser (by default Python's `ast` module).
//! Any non-zero exit is a syntax defect carrying the parser's stderr.

use crate::defects::Defect;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Accepts or rejects an artifact. An empty list means no known issues.
///
/// `Err` is reserved for the validator itself being unusable.
#[async_trait]
pub trait StaticValidator: Send + Sync {
    async fn validate(&self, artifact: &str) -> Result<Vec<Defect>>;
}

pub const DEFAULT_PARSE_SCRIPT: &str = "import ast,sys\n\
try:\n    ast.parse(sys.stdin.read())\n\
except SyntaxError as e:\n    print(f\"{e.msg} (line {e.lineno})\", file=sys.stderr)\n    sys.exit(1)";

#[derive(Debug, Clone)]
pub struct ScriptValidator {
    program: String,
    args: Vec<String>,
    required_symbols: Vec<String>,
    timeout: Duration,
}

impl ScriptValidator {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        required_symbols: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            required_symbols,
            timeout,
        }
    }

    /// `python3 -c <ast parse>` with the given required symbols.
    pub fn python(required_symbols: Vec<String>, timeout: Duration) -> Self {
        Self::new(
            "python3",
            vec!["-c".to_string(), DEFAULT_PARSE_SCRIPT.to_string()],
            required_symbols,
            timeout,
        )
    }

    fn missing_symbols(&self, artifact: &str) -> Vec<Defect> {
        self.required_symbols
            .iter()
            .filter(|sym| !artifact.contains(sym.as_str()))
            .map(|sym| Defect::syntax(format!("required definition `{}` not found", sym)))
            .collect()
    }
}

#[async_trait]
impl StaticValidator for ScriptValidator {
    async fn validate(&self, artifact: &str) -> Result<Vec<Defect>> {
        if artifact.trim().is_empty() {
            return Ok(vec![Defect::syntax("generated artifact is empty")]);
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn validator: {}", self.program))?;

        // A parser may exit before reading everything; the exit status still decides.
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(artifact.as_bytes()).await
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e).context("Failed to write artifact to validator stdin");
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for validator")?,
            Err(_) => {
                return Ok(vec![Defect::syntax(format!(
                    "validation timed out after {}s",
                    self.timeout.as_secs()
                ))]);
            }
        };

        let mut defects = Vec::new();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| format!("validator exited with code {}", output.status.code().unwrap_or(-1)));
            defects.push(Defect::syntax(message));
        }
        // Parse errors go first; missing symbols are only reported alongside them.
        defects.extend(self.missing_symbols(artifact));
        Ok(defects)
    }
}
