//! Payloads handed to the chat backend and the handles it gives back.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::build::{BuildStatus, BuildStatusUpdate};
use super::commit::Commit;

/// Opaque id of a posted chat message (Discord snowflake, Slack `ts`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NotificationHandle(pub String);

impl NotificationHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a change touched, as reported by the VCS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeClassification {
    pub touches_code: bool,
    pub touches_content: bool,
}

impl ChangeClassification {
    pub fn is_build_worthy(&self) -> bool {
        self.touches_code || self.touches_content
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitNotice {
    pub change: String,
    pub user: String,
    pub branch: String,
    pub client: String,
    pub description: String,
    pub build_worthy: bool,
    pub timestamp: DateTime<Utc>,
}

impl CommitNotice {
    pub fn new(commit: &Commit, description: &str, build_worthy: bool) -> Self {
        Self {
            change: commit.change.clone(),
            user: commit.user.clone(),
            branch: commit.branch.clone(),
            client: commit.client.clone(),
            description: description.to_string(),
            build_worthy,
            timestamp: Utc::now(),
        }
    }

    pub fn title(&self) -> String {
        format!("Change {} by {}", self.change, self.user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildStatusNotice {
    pub change_id: String,
    pub job_name: String,
    pub build_number: String,
    pub build_id: String,
    pub status: BuildStatus,
    pub timestamp: DateTime<Utc>,
}

impl BuildStatusNotice {
    pub fn title(&self) -> String {
        format!(
            "{} #{} {}",
            self.job_name,
            self.build_number,
            self.status.as_str().to_uppercase()
        )
    }
}

impl From<&BuildStatusUpdate> for BuildStatusNotice {
    fn from(update: &BuildStatusUpdate) -> Self {
        Self {
            change_id: update.change_id.clone(),
            job_name: update.job_name.clone(),
            build_number: update.build_number.clone(),
            build_id: update.build_id.clone(),
            status: update.status,
            timestamp: Utc::now(),
        }
    }
}
