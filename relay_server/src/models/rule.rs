//! Commit response rules: which streams/branches are ignored and what the
//! others trigger.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMode {
    /// Commits on a matching branch are dropped before any other rule runs.
    Ignore,
    /// Commits on a matching branch post to a webhook and/or start a build.
    /// At least one of the two is always set.
    Respond {
        start_build: Option<String>,
        post_webhook: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResponseRule {
    /// Prefix matched against the commit branch. Empty matches everything.
    pub name: String,
    pub mode: RuleMode,
}

impl CommitResponseRule {
    pub fn ignore(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: RuleMode::Ignore,
        }
    }

    pub fn respond(
        name: impl Into<String>,
        start_build: Option<&str>,
        post_webhook: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            mode: RuleMode::Respond {
                start_build: start_build.map(str::to_string),
                post_webhook: post_webhook.map(str::to_string),
            },
        }
    }

    pub fn is_ignore(&self) -> bool {
        matches!(self.mode, RuleMode::Ignore)
    }

    pub fn matches(&self, branch: &str) -> bool {
        branch.starts_with(&self.name)
    }

    pub fn start_build(&self) -> Option<&str> {
        match &self.mode {
            RuleMode::Respond { start_build, .. } => start_build.as_deref(),
            RuleMode::Ignore => None,
        }
    }

    pub fn post_webhook(&self) -> Option<&str> {
        match &self.mode {
            RuleMode::Respond { post_webhook, .. } => post_webhook.as_deref(),
            RuleMode::Ignore => None,
        }
    }
}

impl fmt::Display for CommitResponseRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            RuleMode::Ignore => write!(f, "{:?} (ignore)", self.name),
            RuleMode::Respond {
                start_build,
                post_webhook,
            } => write!(
                f,
                "{:?} (start_build: {}, post_webhook: {})",
                self.name,
                start_build.as_deref().unwrap_or("-"),
                post_webhook.as_deref().unwrap_or("-")
            ),
        }
    }
}

/// A CI job whose status updates are posted to chat.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct BuildJob {
    pub name: String,
    #[serde(default)]
    pub post_channel: Option<String>,
}

/// Named chat target referenced by `post_webhook` in rules.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct NamedWebhook {
    pub name: String,
    pub id: String,
}
