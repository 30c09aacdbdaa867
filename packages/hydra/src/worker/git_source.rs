//! Git source fetch: clone a job's repository into a scratch directory
//! before execution. The checkout disappears with the returned guard when
//! the run completes.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tempfile::TempDir;
use tokio::process::Command;

use crate::models::SourceConfig;

pub struct SourceCheckout {
    /// Base directory for workdir resolution: the checkout root, or the
    /// source's `path` sub-directory inside it.
    pub base: PathBuf,
    _dir: TempDir,
}

async fn run_git(args: &[&str], cwd: Option<&PathBuf>) -> Result<()> {
    let mut command = Command::new("git");
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let output = command.output().await.context("failed to launch git")?;
    if !output.status.success() {
        bail!(
            "git {} exited with {}: {}",
            args.first().unwrap_or(&""),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Clone `source.url`, check out `source.ref`, and resolve the base path.
pub async fn fetch_git_source(source: &SourceConfig) -> Result<SourceCheckout> {
    let dir = TempDir::with_prefix("hydra-source-")
        .context("failed to create source scratch directory")?;
    let root = dir.path().to_path_buf();

    run_git(
        &["clone", "-q", &source.url, &root.to_string_lossy()],
        None,
    )
    .await?;
    if !source.git_ref.is_empty() {
        run_git(&["checkout", "-q", &source.git_ref], Some(&root)).await?;
    }

    let base = match &source.path {
        Some(path) => root.join(path),
        None => root,
    };

    Ok(SourceCheckout { base, _dir: dir })
}
