//! Build executions reported by the CI backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome reported on `/build-status-update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Running,
    Succeeded,
    Failed,
    Unstable,
    Aborted,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Running => "running",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Unstable => "unstable",
            BuildStatus::Aborted => "aborted",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BuildStatus::Running)
    }

    /// Embed colour used by chat backends (RGB).
    pub fn color(&self) -> u32 {
        match self {
            BuildStatus::Running => 0x3498db,
            BuildStatus::Succeeded => 0x2ecc71,
            BuildStatus::Failed => 0xe74c3c,
            BuildStatus::Unstable => 0xf1c40f,
            BuildStatus::Aborted => 0x95a5a6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown build status: {0:?}")]
pub struct UnknownBuildStatus(pub String);

impl FromStr for BuildStatus {
    type Err = UnknownBuildStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(BuildStatus::Running),
            "succeeded" => Ok(BuildStatus::Succeeded),
            "failed" => Ok(BuildStatus::Failed),
            "unstable" => Ok(BuildStatus::Unstable),
            "aborted" => Ok(BuildStatus::Aborted),
            _ => Err(UnknownBuildStatus(s.to_string())),
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one build execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildKey {
    pub job_name: String,
    pub build_number: String,
    pub build_id: String,
}

impl BuildKey {
    pub fn new(
        job_name: impl Into<String>,
        build_number: impl Into<String>,
        build_id: impl Into<String>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            build_number: build_number.into(),
            build_id: build_id.into(),
        }
    }
}

impl fmt::Display for BuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{} ({})", self.job_name, self.build_number, self.build_id)
    }
}

/// Raw `/build-status-update` parameters. Names match what the CI jobs send.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildStatusParams {
    #[serde(default, rename = "changeID")]
    pub change_id: String,
    #[serde(default, rename = "jobName")]
    pub job_name: String,
    #[serde(default, rename = "buildNumber")]
    pub build_number: String,
    #[serde(default, rename = "buildID")]
    pub build_id: String,
    #[serde(default, rename = "buildStatus")]
    pub build_status: String,
}

/// A validated status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStatusUpdate {
    pub change_id: String,
    pub job_name: String,
    pub build_number: String,
    pub build_id: String,
    pub status: BuildStatus,
}

impl BuildStatusUpdate {
    /// Identity of the build this update belongs to.
    pub fn key(&self) -> BuildKey {
        BuildKey::new(&self.job_name, &self.build_number, &self.build_id)
    }
}

impl TryFrom<BuildStatusParams> for BuildStatusUpdate {
    type Error = String;

    fn try_from(params: BuildStatusParams) -> Result<Self, Self::Error> {
        let mut errors: Vec<String> = [
            ("changeID", &params.change_id),
            ("jobName", &params.job_name),
            ("buildNumber", &params.build_number),
            ("buildID", &params.build_id),
            ("buildStatus", &params.build_status),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| format!("{name} unset"))
        .collect();

        let status = if params.build_status.is_empty() {
            None
        } else {
            match params.build_status.parse::<BuildStatus>() {
                Ok(status) => Some(status),
                Err(e) => {
                    errors.push(e.to_string());
                    None
                }
            }
        };

        match status {
            Some(status) if errors.is_empty() => Ok(Self {
                change_id: params.change_id,
                job_name: params.job_name,
                build_number: params.build_number,
                build_id: params.build_id,
                status,
            }),
            _ => Err(errors.join(", ")),
        }
    }
}

impl fmt::Display for BuildStatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "change {}, job {}, build {} ({}), status {}",
            self.change_id, self.job_name, self.build_number, self.build_id, self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn params(status: &str) -> BuildStatusParams {
        BuildStatusParams {
            change_id: "1234".into(),
            job_name: "nightly".into(),
            build_number: "42".into(),
            build_id: "abc".into(),
            build_status: status.into(),
        }
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!("Running".parse::<BuildStatus>().unwrap(), BuildStatus::Running);
        assert_eq!("SUCCEEDED".parse::<BuildStatus>().unwrap(), BuildStatus::Succeeded);
        assert_eq!("aborted".parse::<BuildStatus>().unwrap(), BuildStatus::Aborted);
    }

    #[test]
    fn status_parse_rejects_unknown_values() {
        assert!("started".parse::<BuildStatus>().is_err());
        assert!("".parse::<BuildStatus>().is_err());
        assert!("success".parse::<BuildStatus>().is_err());
    }

    #[test]
    fn update_from_complete_params() {
        let update = BuildStatusUpdate::try_from(params("unstable")).unwrap();
        assert_eq!(update.status, BuildStatus::Unstable);
        assert_eq!(update.key(), BuildKey::new("nightly", "42", "abc"));
    }

    #[test]
    fn update_rejects_missing_fields_and_bad_status() {
        let mut p = params("exploded");
        p.build_id.clear();
        let err = BuildStatusUpdate::try_from(p).unwrap_err();
        assert!(err.contains("buildID unset"));
        assert!(err.contains("unknown build status"));
    }

    #[test]
    fn build_keys_compare_by_value() {
        let a = BuildKey::new("nightly", "42", "abc");
        let b = BuildKey::new(String::from("nightly"), "42", "abc");
        let c = BuildKey::new("nightly", "42", "abd");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
