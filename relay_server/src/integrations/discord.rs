//! Discord backend: posts embeds to channels through the bot REST API.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::ChatClient;
use crate::models::notice::{BuildStatusNotice, CommitNotice, NotificationHandle};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

const COMMIT_COLOR: u32 = 0x7289da;
/// Discord rejects embed descriptions longer than this.
const MAX_DESCRIPTION: usize = 4096;

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
}

pub struct DiscordChat {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl DiscordChat {
    pub fn new(http: reqwest::Client, api_base: &str, token: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        }
    }

    async fn post_embed(&self, channel: &str, embed: Value) -> anyhow::Result<NotificationHandle> {
        let resp = self
            .http
            .post(format!("{}/channels/{channel}/messages", self.api_base))
            .header("Authorization", format!("Bot {}", self.token))
            .json(&json!({ "embeds": [embed] }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("discord returned {status}: {text}");
        }

        let message: DiscordMessage = resp
            .json()
            .await
            .context("discord message response was not valid json")?;
        Ok(NotificationHandle::new(message.id))
    }

    async fn delete_message(&self, channel: &str, message: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .delete(format!(
                "{}/channels/{channel}/messages/{message}",
                self.api_base
            ))
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("discord returned {}", resp.status());
        }
        Ok(())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn commit_embed(notice: &CommitNotice) -> Value {
    let build = if notice.build_worthy { "yes" } else { "no" };
    json!({
        "title": notice.title(),
        "description": truncate(&notice.description, MAX_DESCRIPTION),
        "color": COMMIT_COLOR,
        "fields": [
            { "name": "Stream", "value": notice.branch, "inline": true },
            { "name": "Client", "value": notice.client, "inline": true },
            { "name": "Build", "value": build, "inline": true },
        ],
        "timestamp": notice.timestamp.to_rfc3339(),
    })
}

fn build_status_embed(notice: &BuildStatusNotice) -> Value {
    json!({
        "title": notice.title(),
        "color": notice.status.color(),
        "fields": [
            { "name": "Change", "value": notice.change_id, "inline": true },
            { "name": "Build ID", "value": notice.build_id, "inline": true },
        ],
        "timestamp": notice.timestamp.to_rfc3339(),
    })
}

#[async_trait]
impl ChatClient for DiscordChat {
    async fn post_commit_notice(
        &self,
        notice: &CommitNotice,
        target: &str,
    ) -> Option<NotificationHandle> {
        match self.post_embed(target, commit_embed(notice)).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(channel = target, change = %notice.change, "Discord commit notice failed: {e:#}");
                None
            }
        }
    }

    async fn post_build_status_notice(
        &self,
        notice: &BuildStatusNotice,
        target: &str,
    ) -> Option<NotificationHandle> {
        match self.post_embed(target, build_status_embed(notice)).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(channel = target, job = %notice.job_name, "Discord build notice failed: {e:#}");
                None
            }
        }
    }

    async fn delete_notice(&self, handle: &NotificationHandle, target: &str) -> bool {
        match self.delete_message(target, handle.as_str()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(channel = target, notice = %handle, "Discord delete failed: {e:#}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build::{BuildStatus, BuildStatusUpdate};
    use crate::models::commit::Commit;
    use httpmock::prelude::*;

    fn status_notice() -> BuildStatusNotice {
        BuildStatusNotice::from(&BuildStatusUpdate {
            change_id: "1234".into(),
            job_name: "nightly".into(),
            build_number: "42".into(),
            build_id: "abc".into(),
            status: BuildStatus::Failed,
        })
    }

    #[test]
    fn commit_embed_lists_stream_and_build_flag() {
        let commit = Commit::new("1234", "ws", "alice", "//depot/main");
        let embed = commit_embed(&CommitNotice::new(&commit, "Fix crash", true));
        assert_eq!(embed["title"], "Change 1234 by alice");
        assert_eq!(embed["fields"][0]["value"], "//depot/main");
        assert_eq!(embed["fields"][2]["value"], "yes");
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let long = "x".repeat(5000);
        let out = truncate(&long, MAX_DESCRIPTION);
        assert_eq!(out.chars().count(), MAX_DESCRIPTION);
        assert!(out.ends_with('…'));
    }

    #[tokio::test]
    async fn post_returns_message_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/channels/1001/messages")
                    .header("authorization", "Bot bot-token")
                    .body_includes("nightly #42 FAILED");
                then.status(200).json_body(serde_json::json!({ "id": "555" }));
            })
            .await;

        let chat = DiscordChat::new(reqwest::Client::new(), &server.base_url(), "bot-token");
        let handle = chat.post_build_status_notice(&status_notice(), "1001").await;

        assert_eq!(handle, Some(NotificationHandle::new("555")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delete_hits_message_endpoint() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE).path("/channels/1001/messages/555");
                then.status(204);
            })
            .await;

        let chat = DiscordChat::new(reqwest::Client::new(), &server.base_url(), "bot-token");
        assert!(chat.delete_notice(&NotificationHandle::new("555"), "1001").await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_post_yields_no_handle() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(403).body("Missing Access");
            })
            .await;

        let chat = DiscordChat::new(reqwest::Client::new(), &server.base_url(), "bot-token");
        assert_eq!(chat.post_build_status_notice(&status_notice(), "1001").await, None);
    }
}
