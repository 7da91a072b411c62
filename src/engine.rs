//! Execution engine: runs an artifact as a backtest.
//!
//! Each attempt gets its own directory `<work_root>/<session>/attempt-<n>`,
//! cleared before use, so concurrent sessions and retries never share files.

use crate::errors::EngineError;
use crate::metrics::extract_from_result_json;
use crate::util::tail_chars;
use async_trait::async_trait;
use refinery_common::MetricsRecord;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use tokio::process::Command;
use tokio::time::timeout;

const STDERR_TAIL_CHARS: usize = 4000;

/// One backtest attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub session_id: String,
    pub iteration: u32,
    pub artifact: String,
    pub timerange: String,
    pub pairs: Vec<String>,
    pub timeframe: Option<String>,
}

/// Raw engine output plus metrics read from a structured result file, if any.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub stdout: String,
    pub structured: Option<MetricsRecord>,
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport, EngineError>;
}

#[derive(Debug, Clone)]
pub struct BacktestSettings {
    pub program: String,
    /// Arguments placed before `backtesting`, e.g. for a container wrapper.
    pub leading_args: Vec<String>,
    pub config_path: PathBuf,
    /// Shared market data, passed as `--datadir` since each attempt has its own userdir.
    pub data_dir: Option<PathBuf>,
    pub strategy_name: String,
    pub work_root: PathBuf,
    pub timeout: Duration,
    pub keep_attempts: bool,
}

/// Freqtrade-style `backtesting` subprocess.
pub struct BacktestEngine {
    settings: BacktestSettings,
}

impl BacktestEngine {
    pub fn new(settings: BacktestSettings) -> Self {
        Self { settings }
    }

    pub fn attempt_dir(&self, session_id: &str, iteration: u32) -> PathBuf {
        self.settings
            .work_root
            .join(session_id)
            .join(format!("attempt-{}", iteration))
    }

    async fn prepare(&self, dir: &Path, artifact: &str) -> Result<PathBuf, EngineError> {
        let ws_err = |source| EngineError::Workspace {
            path: dir.to_path_buf(),
            source,
        };
        if tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(dir).await.map_err(ws_err)?;
        }
        let user_data = dir.join("user_data");
        let strategies = user_data.join("strategies");
        tokio::fs::create_dir_all(&strategies).await.map_err(ws_err)?;
        tokio::fs::create_dir_all(user_data.join("backtest_results"))
            .await
            .map_err(ws_err)?;
        tokio::fs::write(
            strategies.join(format!("{}.py", self.settings.strategy_name)),
            artifact,
        )
        .await
        .map_err(ws_err)?;
        Ok(user_data)
    }

    fn build_command(
        &self,
        request: &ExecutionRequest,
        config_path: &Path,
        dir: &Path,
        user_data: &Path,
    ) -> Command {
        let mut cmd = Command::new(&self.settings.program);
        cmd.args(&self.settings.leading_args)
            .arg("backtesting")
            .arg("--strategy")
            .arg(&self.settings.strategy_name)
            .arg("--config")
            .arg(config_path)
            .arg("--timerange")
            .arg(&request.timerange)
            .arg("--userdir")
            .arg(user_data);
        if let Some(data_dir) = &self.settings.data_dir {
            let data_dir = std::path::absolute(data_dir).unwrap_or_else(|_| data_dir.clone());
            cmd.arg("--datadir").arg(data_dir);
        }
        if !request.pairs.is_empty() {
            cmd.arg("--pairs").args(&request.pairs);
        }
        if let Some(tf) = &request.timeframe {
            cmd.arg("--timeframe").arg(tf);
        }
        cmd.current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn cleanup(&self, dir: &Path) {
        if self.settings.keep_attempts {
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            tracing::debug!(dir = %dir.display(), error = %e, "Failed to remove attempt directory");
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf, EngineError> {
    std::path::absolute(path).map_err(|source| EngineError::Workspace {
        path: path.to_path_buf(),
        source,
    })
}

/// Newest result document under `backtest_results`, skipping metadata files.
async fn newest_result(results_dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(results_dir).await.ok()?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".json") || name.starts_with('.') || name.ends_with(".meta.json") {
            continue;
        }
        let modified = entry
            .metadata()
            .await
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }
    newest.map(|(_, p)| p)
}

async fn read_structured(results_dir: &Path, strategy: &str) -> Option<MetricsRecord> {
    let path = newest_result(results_dir).await?;
    let text = tokio::fs::read_to_string(&path).await.ok()?;
    let doc: serde_json::Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Unreadable backtest result file");
            return None;
        }
    };
    extract_from_result_json(&doc, strategy)
}

#[async_trait]
impl ExecutionEngine for BacktestEngine {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport, EngineError> {
        if !self.settings.config_path.exists() {
            return Err(EngineError::MissingConfig {
                path: self.settings.config_path.clone(),
            });
        }

        // The child runs inside the attempt directory, so every path it gets must be absolute.
        let config_path = absolute(&self.settings.config_path)?;
        let dir = absolute(&self.attempt_dir(&request.session_id, request.iteration))?;
        let user_data = self.prepare(&dir, &request.artifact).await?;
        tracing::info!(
            session_id = %request.session_id,
            iteration = request.iteration,
            dir = %dir.display(),
            timerange = %request.timerange,
            "Starting backtest"
        );

        let child = self
            .build_command(request, &config_path, &dir, &user_data)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                command: self.settings.program.clone(),
                source,
            })?;

        let output = match timeout(self.settings.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                self.cleanup(&dir).await;
                return Err(EngineError::Workspace { path: dir, source });
            }
            Err(_) => {
                // Dropping the wait future drops the child, which kills it.
                self.cleanup(&dir).await;
                return Err(EngineError::Timeout {
                    secs: self.settings.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() { stdout.as_str() } else { stderr.as_ref() };
            self.cleanup(&dir).await;
            return Err(EngineError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: tail_chars(detail.trim(), STDERR_TAIL_CHARS),
            });
        }

        let structured = read_structured(
            &user_data.join("backtest_results"),
            &self.settings.strategy_name,
        )
        .await;
        self.cleanup(&dir).await;
        tracing::info!(
            session_id = %request.session_id,
            iteration = request.iteration,
            structured = structured.is_some(),
            "Backtest finished"
        );
        Ok(ExecutionReport { stdout, structured })
    }
}
