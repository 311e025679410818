//! TeamCity backend: adds builds to the queue through the REST API.

use async_trait::async_trait;
use serde_json::json;

use super::ContinuousIntegrationSystem;
use crate::models::notice::ChangeClassification;

pub struct TeamCityCi {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl TeamCityCi {
    pub fn new(http: reqwest::Client, url: &str, token: &str) -> Self {
        Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn queue_request(
        job: &str,
        change: &str,
        classification: ChangeClassification,
    ) -> serde_json::Value {
        json!({
            "buildType": { "id": job },
            "properties": {
                "property": [
                    { "name": "env.CHANGE", "value": change },
                    { "name": "env.BUILD_CODE", "value": classification.touches_code.to_string() },
                    { "name": "env.BUILD_CONTENT", "value": classification.touches_content.to_string() },
                ]
            }
        })
    }

    async fn queue_build(
        &self,
        job: &str,
        change: &str,
        classification: ChangeClassification,
    ) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(format!("{}/app/rest/buildQueue", self.url))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(&Self::queue_request(job, change, classification))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("teamcity returned {status}: {text}");
        }

        Ok(())
    }
}

#[async_trait]
impl ContinuousIntegrationSystem for TeamCityCi {
    async fn start_job(
        &self,
        job: &str,
        change: &str,
        classification: ChangeClassification,
    ) -> bool {
        match self.queue_build(job, change, classification).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(job, change, "TeamCity build request failed: {e:#}");
                false
            }
        }
    }
}
