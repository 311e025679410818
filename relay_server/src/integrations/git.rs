//! Git backend: runs `git` against a local clone that tracks the remote.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use super::{classify_paths, run_command, VersionControlSystem};
use crate::config::ClassificationRules;
use crate::models::notice::ChangeClassification;

const DEFAULT_REMOTE: &str = "origin";

pub struct GitVcs {
    repository: PathBuf,
    remote: String,
    rules: ClassificationRules,
}

impl GitVcs {
    pub fn new(repository: &str, remote: Option<&str>, rules: ClassificationRules) -> Self {
        Self {
            repository: PathBuf::from(repository),
            remote: remote.unwrap_or(DEFAULT_REMOTE).to_string(),
            rules,
        }
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.repository);
        cmd
    }

    async fn has_commit(&self, change: &str) -> bool {
        let mut cmd = self.git();
        cmd.args(["cat-file", "-e", &format!("{change}^{{commit}}")]);
        run_command(cmd).await.is_ok()
    }

    /// Fetches from the remote when `change` is not in the local clone yet.
    /// A failed fetch is logged and the caller carries on with what it has.
    async fn ensure_commit(&self, change: &str) {
        if self.has_commit(change).await {
            return;
        }

        tracing::debug!(change, remote = %self.remote, "Commit not in local clone, fetching");
        let mut cmd = self.git();
        cmd.args(["fetch", "--quiet", &self.remote]);
        if let Err(e) = run_command(cmd).await {
            tracing::warn!(change, remote = %self.remote, "git fetch failed: {e:#}");
        }
    }
}

/// Picks the first remote branch from `git branch -r --contains` output,
/// without the remote prefix. Symbolic refs such as `origin/HEAD` are skipped.
fn parse_remote_branch(output: &str, remote: &str) -> Option<String> {
    let prefix = format!("{remote}/");
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains("->"))
        .filter_map(|line| line.strip_prefix(&prefix))
        .find(|branch| *branch != "HEAD")
        .map(str::to_string)
}

#[async_trait]
impl VersionControlSystem for GitVcs {
    async fn resolve_branch(&self, change: &str, _client: &str) -> Option<String> {
        self.ensure_commit(change).await;
        let mut cmd = self.git();
        cmd.args([
            "branch",
            "-r",
            "--contains",
            change,
            "--format=%(refname:short)",
        ]);
        match run_command(cmd).await {
            Ok(output) => parse_remote_branch(&output, &self.remote),
            Err(e) => {
                tracing::warn!(change, "Failed to resolve branch for commit: {e:#}");
                None
            }
        }
    }

    async fn commit_description(&self, change: &str) -> anyhow::Result<String> {
        self.ensure_commit(change).await;
        let mut cmd = self.git();
        cmd.args(["log", "-1", "--format=%B", change]);
        run_command(cmd).await
    }

    async fn classify_change(&self, change: &str) -> anyhow::Result<ChangeClassification> {
        self.ensure_commit(change).await;
        let mut cmd = self.git();
        cmd.args(["diff-tree", "--no-commit-id", "--name-only", "-r", change]);
        let output = run_command(cmd).await?;
        Ok(classify_paths(output.lines().map(str::trim), &self.rules))
    }
}
