//! Git collaborator: clone a service's repository into its working
//! directory, or fast-forward an existing checkout.

use servio_core::{Error, Result};
use servio_utils::process;
use std::path::Path;
use tracing::info;

const URL_PREFIXES: &[&str] = &["git@", "https://", "http://", "ssh://", "git://"];

/// Whether the URL carries one of the supported git protocol prefixes.
pub fn is_valid_git_url(url: &str) -> bool {
    URL_PREFIXES.iter().any(|prefix| url.starts_with(prefix))
}

/// Clones `repo_url` into `target_dir`, or runs a fast-forward pull when
/// the directory is already a checkout. An empty URL is a no-op.
pub async fn clone_or_update(repo_url: &str, target_dir: &str) -> Result<()> {
    if repo_url.is_empty() {
        return Ok(());
    }

    if !is_valid_git_url(repo_url) {
        return Err(Error::Validation(format!(
            "invalid git repository URL: {repo_url}"
        )));
    }

    let target = Path::new(target_dir);
    if target.exists() {
        if target.join(".git").exists() {
            info!(dir = target_dir, "existing checkout, pulling");
            return pull(target_dir).await;
        }
        return Err(Error::Preflight(format!(
            "directory {target_dir} already exists and is not a git repository"
        )));
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::internal("failed to create parent directory", e))?;
    }

    info!(url = repo_url, dir = target_dir, "cloning repository");
    process::run_checked("git", &["clone", repo_url, target_dir]).await?;
    Ok(())
}

async fn pull(repo_dir: &str) -> Result<()> {
    process::run_checked("git", &["-C", repo_dir, "pull", "--ff-only"]).await?;
    Ok(())
}
