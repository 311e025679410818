//! Relay configuration: loaded once at startup from a TOML file.
//!
//! Process-level settings (config path, port overrides) come from the CLI and
//! environment in `main.rs`; everything the relay acts on lives here.

use std::path::Path;

use serde::Deserialize;

use crate::models::rule::{BuildJob, CommitResponseRule, NamedWebhook, RuleMode};

const DEFAULT_ADDRESS: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 1199;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required config section [{0}]")]
    MissingSection(&'static str),
    #[error("commit responses use both `stream` and `branch` lists; only one is allowed")]
    AmbiguousResponses,
}

/// Settings as written in the file. Required sections are `Option` so a
/// missing one produces a named error instead of a serde message.
#[derive(Debug, Deserialize)]
struct RawConfig {
    webserver: Option<WebserverConfig>,
    vcs: Option<VcsConfig>,
    ci: Option<CiConfig>,
    chat: Option<ChatConfig>,
    commit_responses: Option<RawCommitResponses>,
    #[serde(default)]
    build_jobs: Vec<BuildJob>,
    #[serde(default)]
    webhooks: Vec<NamedWebhook>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebserverConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
    /// Shared secret expected in the `key` header. Empty or absent disables
    /// the check.
    pub key: Option<String>,
}

impl WebserverConfig {
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(DEFAULT_ADDRESS)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }
}

/// File extensions and path fragments that make a change build-worthy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationRules {
    pub code_extensions: Vec<String>,
    pub content_paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "system", rename_all = "lowercase")]
pub enum VcsConfig {
    Perforce {
        port: String,
        user: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        code_extensions: Vec<String>,
        #[serde(default)]
        content_paths: Vec<String>,
    },
    Git {
        repository: String,
        #[serde(default)]
        remote: Option<String>,
        #[serde(default)]
        code_extensions: Vec<String>,
        #[serde(default)]
        content_paths: Vec<String>,
    },
}

impl VcsConfig {
    pub fn classification(&self) -> ClassificationRules {
        let (code_extensions, content_paths) = match self {
            VcsConfig::Perforce {
                code_extensions,
                content_paths,
                ..
            }
            | VcsConfig::Git {
                code_extensions,
                content_paths,
                ..
            } => (code_extensions, content_paths),
        };
        ClassificationRules {
            code_extensions: code_extensions.clone(),
            content_paths: content_paths.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "system", rename_all = "lowercase")]
pub enum CiConfig {
    Jenkins {
        url: String,
        user: String,
        token: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Teamcity {
        url: String,
        token: String,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "system", rename_all = "lowercase")]
pub enum ChatConfig {
    Discord {
        token: String,
        #[serde(default)]
        api_base: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Slack {
        token: String,
        #[serde(default)]
        api_base: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Debug, Deserialize)]
struct RawCommitResponses {
    stream: Option<Vec<RawCommitResponse>>,
    branch: Option<Vec<RawCommitResponse>>,
}

#[derive(Debug, Deserialize)]
struct RawCommitResponse {
    name: String,
    #[serde(default)]
    ignore: bool,
    start_build: Option<String>,
    post_webhook: Option<String>,
}

/// Commit response rules split by mode, in file order.
#[derive(Debug, Clone, Default)]
pub struct CommitRules {
    pub ignore: Vec<CommitResponseRule>,
    pub respond: Vec<CommitResponseRule>,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub webserver: WebserverConfig,
    pub vcs: VcsConfig,
    pub ci: CiConfig,
    pub chat: ChatConfig,
    pub rules: CommitRules,
    pub build_jobs: Vec<BuildJob>,
    pub webhooks: Vec<NamedWebhook>,
}

impl RelayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;

        let webserver = raw
            .webserver
            .ok_or(ConfigError::MissingSection("webserver"))?;
        let vcs = raw.vcs.ok_or(ConfigError::MissingSection("vcs"))?;
        let ci = raw.ci.ok_or(ConfigError::MissingSection("ci"))?;
        let chat = raw.chat.ok_or(ConfigError::MissingSection("chat"))?;

        if webserver.address.is_none() {
            tracing::warn!(
                "Webserver address is not configured, listening on {}",
                DEFAULT_ADDRESS
            );
        }
        if webserver.port.is_none() {
            tracing::warn!("Webserver port is not configured, defaulting to {}", DEFAULT_PORT);
        }
        if webserver.key().is_none() {
            tracing::warn!("Webserver key not set -- requests will not be authenticated");
        }

        let rules = match raw.commit_responses {
            Some(responses) => load_rules(responses)?,
            None => {
                tracing::warn!("No commit responses found in config file");
                CommitRules::default()
            }
        };

        if rules.respond.is_empty() {
            tracing::error!("Found no commit responses");
        }
        if raw.build_jobs.is_empty() {
            tracing::error!("Found no build jobs");
        }
        if raw.webhooks.is_empty() {
            tracing::warn!("Found no named webhooks");
        }

        Ok(Self {
            webserver,
            vcs,
            ci,
            chat,
            rules,
            build_jobs: raw.build_jobs,
            webhooks: raw.webhooks,
        })
    }
}

fn load_rules(responses: RawCommitResponses) -> Result<CommitRules, ConfigError> {
    let entries = match (responses.stream, responses.branch) {
        (Some(_), Some(_)) => return Err(ConfigError::AmbiguousResponses),
        (Some(entries), None) | (None, Some(entries)) => entries,
        (None, None) => {
            tracing::warn!("Commit responses section has neither `stream` nor `branch` entries");
            Vec::new()
        }
    };

    let mut rules = CommitRules::default();

    for entry in entries {
        let has_action = entry.start_build.is_some() || entry.post_webhook.is_some();

        if entry.ignore && has_action {
            tracing::error!(
                rule = %entry.name,
                "Commit response is both ignore and start_build/post_webhook, skipping"
            );
            continue;
        }
        if !entry.ignore && !has_action {
            tracing::error!(rule = %entry.name, "Unconfigured commit response, skipping");
            continue;
        }
        if entry.name.is_empty() {
            tracing::warn!("Commit response with an empty name matches every branch");
        }

        let rule = CommitResponseRule {
            name: entry.name,
            mode: if entry.ignore {
                RuleMode::Ignore
            } else {
                RuleMode::Respond {
                    start_build: entry.start_build,
                    post_webhook: entry.post_webhook,
                }
            },
        };

        tracing::info!(%rule, "Commit response added");
        if rule.is_ignore() {
            rules.ignore.push(rule);
        } else {
            rules.respond.push(rule);
        }
    }

    Ok(rules)
}
