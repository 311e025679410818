//! Slack backend: `chat.postMessage` / `chat.delete` over the Web API.

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::ChatClient;
use crate::models::notice::{BuildStatusNotice, CommitNotice, NotificationHandle};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    ts: Option<String>,
    error: Option<String>,
}

pub struct SlackChat {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl SlackChat {
    pub fn new(http: reqwest::Client, api_base: &str, token: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.trim().to_string(),
        }
    }

    async fn call(&self, method: &str, payload: &Value) -> anyhow::Result<SlackResponse> {
        let resp = self
            .http
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            bail!("slack {method} returned {}", resp.status());
        }

        let body: SlackResponse = resp
            .json()
            .await
            .with_context(|| format!("slack {method} response was not valid json"))?;
        if !body.ok {
            bail!(
                "slack {method} failed: {}",
                body.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(body)
    }

    async fn post_message(&self, channel: &str, text: String) -> anyhow::Result<NotificationHandle> {
        let payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        let body = self.call("chat.postMessage", &payload).await?;
        body.ts
            .filter(|ts| !ts.trim().is_empty())
            .map(NotificationHandle::new)
            .ok_or_else(|| anyhow!("slack chat.postMessage did not return ts"))
    }
}

fn commit_text(notice: &CommitNotice) -> String {
    format!(
        "*{}* on `{}` ({})\n{}{}",
        notice.title(),
        notice.branch,
        notice.client,
        notice.description,
        if notice.build_worthy {
            "\n_touches code/content_"
        } else {
            ""
        }
    )
}

fn build_status_text(notice: &BuildStatusNotice) -> String {
    format!(
        "*{}* (change {}, build {})",
        notice.title(),
        notice.change_id,
        notice.build_id
    )
}

#[async_trait]
impl ChatClient for SlackChat {
    async fn post_commit_notice(
        &self,
        notice: &CommitNotice,
        target: &str,
    ) -> Option<NotificationHandle> {
        match self.post_message(target, commit_text(notice)).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(channel = target, change = %notice.change, "Slack commit notice failed: {e:#}");
                None
            }
        }
    }

    async fn post_build_status_notice(
        &self,
        notice: &BuildStatusNotice,
        target: &str,
    ) -> Option<NotificationHandle> {
        match self.post_message(target, build_status_text(notice)).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(channel = target, job = %notice.job_name, "Slack build notice failed: {e:#}");
                None
            }
        }
    }

    async fn delete_notice(&self, handle: &NotificationHandle, target: &str) -> bool {
        let payload = json!({ "channel": target, "ts": handle.as_str() });
        match self.call("chat.delete", &payload).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(channel = target, notice = %handle, "Slack delete failed: {e:#}");
                false
            }
        }
    }
}
