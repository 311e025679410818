//! Perforce backend: shells out to the `p4` command line client.

use async_trait::async_trait;
use tokio::process::Command;

use super::{classify_paths, run_command, VersionControlSystem};
use crate::config::ClassificationRules;
use crate::models::notice::ChangeClassification;

pub struct PerforceVcs {
    port: String,
    user: String,
    password: Option<String>,
    rules: ClassificationRules,
}

impl PerforceVcs {
    pub fn new(port: &str, user: &str, password: Option<String>, rules: ClassificationRules) -> Self {
        Self {
            port: port.to_string(),
            user: user.to_string(),
            password,
            rules,
        }
    }

    /// `p4 -ztag -F <format>` with connection arguments applied.
    fn p4(&self, format: &str) -> Command {
        let mut cmd = Command::new("p4");
        cmd.args(["-p", &self.port, "-u", &self.user]);
        // Kept off argv.
        if let Some(password) = &self.password {
            cmd.env("P4PASSWD", password);
        }
        cmd.args(["-ztag", "-F", format]);
        cmd
    }

    async fn client_stream(&self, client: &str) -> anyhow::Result<String> {
        let mut cmd = self.p4("%Stream%");
        cmd.args(["client", "-o", client]);
        run_command(cmd).await
    }

    async fn changed_files(&self, change: &str) -> anyhow::Result<Vec<String>> {
        let mut cmd = self.p4("%depotFile%");
        cmd.args(["files", &format!("@={change}")]);
        let output = run_command(cmd).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[async_trait]
impl VersionControlSystem for PerforceVcs {
    async fn resolve_branch(&self, change: &str, client: &str) -> Option<String> {
        match self.client_stream(client).await {
            Ok(stream) if !stream.is_empty() => Some(stream),
            Ok(_) => {
                tracing::warn!(change, client, "Perforce client has no stream");
                None
            }
            Err(e) => {
                tracing::warn!(change, client, "Failed to look up client stream: {e:#}");
                None
            }
        }
    }

    async fn commit_description(&self, change: &str) -> anyhow::Result<String> {
        let mut cmd = self.p4("%desc%");
        cmd.args(["describe", "-s", change]);
        run_command(cmd).await
    }

    async fn classify_change(&self, change: &str) -> anyhow::Result<ChangeClassification> {
        let files = self.changed_files(change).await?;
        tracing::debug!(change, files = files.len(), "Classifying Perforce change");
        Ok(classify_paths(files.iter().map(String::as_str), &self.rules))
    }
}
