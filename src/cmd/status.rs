//! Stored session lookup — `refinery status`.

use anyhow::{Context, Result, bail};
use refinery::config::Config;
use refinery::store::{FileStore, SessionStore};

pub async fn cmd_status(config: &Config, session_id: &str) -> Result<()> {
    let Some(dir) = &config.run.state_dir else {
        bail!("Sessions are only kept across processes when [loop].state_dir is set");
    };
    let store = FileStore::new(dir.clone());
    let session = store
        .get(session_id)
        .await?
        .with_context(|| format!("No session '{}' in {}", session_id, dir.display()))?;

    let json = serde_json::to_string_pretty(&session.project()).context("Failed to serialize session")?;
    println!("{}", json);
    Ok(())
}
