//! A single version-control change delivered by the commit hook.

use std::fmt;

use serde::Deserialize;

/// Raw `/on-commit` parameters as posted by the VCS trigger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitParams {
    #[serde(default)]
    pub change: String,
    #[serde(default)]
    pub client: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub change: String,
    pub client: String,
    pub user: String,
    /// Stream or branch name. Perforce triggers cannot send the stream, so
    /// this may arrive empty and be resolved through the VCS afterwards.
    pub branch: String,
}

impl Commit {
    pub fn new(
        change: impl Into<String>,
        client: impl Into<String>,
        user: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            change: change.into(),
            client: client.into(),
            user: user.into(),
            branch: branch.into(),
        }
    }

    pub fn has_branch(&self) -> bool {
        !self.branch.is_empty()
    }

    /// Checks that every field is set, naming all the missing ones at once.
    pub fn validate(&self) -> Result<(), String> {
        let missing: Vec<&str> = [
            ("Change", &self.change),
            ("Client", &self.client),
            ("User", &self.user),
            ("Branch", &self.branch),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing
                .iter()
                .map(|name| format!("{name} unset"))
                .collect::<Vec<_>>()
                .join(", "))
        }
    }
}

impl From<CommitParams> for Commit {
    fn from(params: CommitParams) -> Self {
        Self::new(params.change, params.client, params.user, params.branch)
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn none_or(s: &str) -> &str {
            if s.is_empty() {
                "NONE"
            } else {
                s
            }
        }
        write!(
            f,
            "Change: {}, Client: {}, User: {}, Branch: {}",
            none_or(&self.change),
            none_or(&self.client),
            none_or(&self.user),
            none_or(&self.branch)
        )
    }
}
