//! External collaborators: version control, CI and chat backends.
//!
//! The dispatcher only sees the three traits below. Which implementation
//! backs each one is decided once at startup from the `system` tag in the
//! config file.

pub mod discord;
pub mod git;
pub mod jenkins;
pub mod perforce;
pub mod slack;
pub mod teamcity;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{ChatConfig, CiConfig, ClassificationRules, VcsConfig};
use crate::models::notice::{
    BuildStatusNotice, ChangeClassification, CommitNotice, NotificationHandle,
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait VersionControlSystem: Send + Sync {
    /// Stream/branch the change was submitted to, when it can be determined.
    async fn resolve_branch(&self, change: &str, client: &str) -> Option<String>;

    async fn commit_description(&self, change: &str) -> anyhow::Result<String>;

    async fn classify_change(&self, change: &str) -> anyhow::Result<ChangeClassification>;
}

#[async_trait]
pub trait ContinuousIntegrationSystem: Send + Sync {
    /// Queues `job` for `change`. Returns whether the CI accepted the request,
    /// not whether the build will pass.
    async fn start_job(
        &self,
        job: &str,
        change: &str,
        classification: ChangeClassification,
    ) -> bool;
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn post_commit_notice(
        &self,
        notice: &CommitNotice,
        target: &str,
    ) -> Option<NotificationHandle>;

    async fn post_build_status_notice(
        &self,
        notice: &BuildStatusNotice,
        target: &str,
    ) -> Option<NotificationHandle>;

    async fn delete_notice(&self, handle: &NotificationHandle, target: &str) -> bool;
}

pub fn vcs_from_config(config: &VcsConfig) -> Arc<dyn VersionControlSystem> {
    let rules = config.classification();
    match config {
        VcsConfig::Perforce {
            port,
            user,
            password,
            ..
        } => Arc::new(perforce::PerforceVcs::new(port, user, password.clone(), rules)),
        VcsConfig::Git {
            repository, remote, ..
        } => Arc::new(git::GitVcs::new(repository, remote.as_deref(), rules)),
    }
}

pub fn ci_from_config(config: &CiConfig) -> anyhow::Result<Arc<dyn ContinuousIntegrationSystem>> {
    Ok(match config {
        CiConfig::Jenkins {
            url,
            user,
            token,
            timeout_secs,
        } => Arc::new(jenkins::JenkinsCi::new(
            http_client(*timeout_secs)?,
            url,
            user,
            token,
        )),
        CiConfig::Teamcity {
            url,
            token,
            timeout_secs,
        } => Arc::new(teamcity::TeamCityCi::new(
            http_client(*timeout_secs)?,
            url,
            token,
        )),
    })
}

pub fn chat_from_config(config: &ChatConfig) -> anyhow::Result<Arc<dyn ChatClient>> {
    Ok(match config {
        ChatConfig::Discord {
            token,
            api_base,
            timeout_secs,
        } => Arc::new(discord::DiscordChat::new(
            http_client(*timeout_secs)?,
            api_base.as_deref().unwrap_or(discord::DEFAULT_API_BASE),
            token,
        )),
        ChatConfig::Slack {
            token,
            api_base,
            timeout_secs,
        } => Arc::new(slack::SlackChat::new(
            http_client(*timeout_secs)?,
            api_base.as_deref().unwrap_or(slack::DEFAULT_API_BASE),
            token,
        )),
    })
}

/// Shared HTTP client for the CI and chat backends.
pub(crate) fn http_client(timeout_secs: Option<u64>) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("commit-relay/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(
            timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1),
        ))
        .build()
        .context("failed to create http client")
}

/// Runs a VCS command line tool and returns its trimmed stdout.
pub(crate) async fn run_command(mut cmd: Command) -> anyhow::Result<String> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let output = cmd
        .output()
        .await
        .with_context(|| format!("failed to run {program}"))?;

    if !output.status.success() {
        bail!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Classifies a change from the paths it touched.
pub fn classify_paths<'a>(
    paths: impl IntoIterator<Item = &'a str>,
    rules: &ClassificationRules,
) -> ChangeClassification {
    let mut result = ChangeClassification::default();

    for path in paths {
        let path = path.to_lowercase();
        if !result.touches_code
            && rules
                .code_extensions
                .iter()
                .any(|ext| path.ends_with(&ext.to_lowercase()))
        {
            result.touches_code = true;
        }
        if !result.touches_content
            && rules
                .content_paths
                .iter()
                .any(|fragment| path.contains(&fragment.to_lowercase()))
        {
            result.touches_content = true;
        }
        if result.touches_code && result.touches_content {
            break;
        }
    }

    result
}
