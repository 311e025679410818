//! Jenkins backend: queues parameterized builds over the remote access API.

use async_trait::async_trait;

use super::ContinuousIntegrationSystem;
use crate::models::notice::ChangeClassification;

pub struct JenkinsCi {
    http: reqwest::Client,
    url: String,
    user: String,
    token: String,
}

impl JenkinsCi {
    pub fn new(http: reqwest::Client, url: &str, user: &str, token: &str) -> Self {
        Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            token: token.to_string(),
        }
    }

    /// `folder/job` → `{url}/job/folder/job/job/buildWithParameters`.
    fn build_url(&self, job: &str) -> String {
        let path = job
            .split('/')
            .filter(|part| !part.is_empty())
            .map(|part| format!("job/{part}"))
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}/buildWithParameters", self.url, path)
    }

    async fn queue_build(
        &self,
        job: &str,
        change: &str,
        classification: ChangeClassification,
    ) -> anyhow::Result<()> {
        let params = [
            ("change", change.to_string()),
            ("buildCode", classification.touches_code.to_string()),
            ("buildContent", classification.touches_content.to_string()),
        ];

        let resp = self
            .http
            .post(self.build_url(job))
            .basic_auth(&self.user, Some(&self.token))
            .form(&params)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("jenkins returned {status}: {text}");
        }

        Ok(())
    }
}

#[async_trait]
impl ContinuousIntegrationSystem for JenkinsCi {
    async fn start_job(
        &self,
        job: &str,
        change: &str,
        classification: ChangeClassification,
    ) -> bool {
        match self.queue_build(job, change, classification).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(job, change, "Jenkins build request failed: {e:#}");
                false
            }
        }
    }
}
