//! Event dispatcher: turns a parsed commit or build status update into rule
//! matching, tracker transitions and collaborator calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use super::build_tracker::{BuildTracker, TrackerError};
use super::dedup::DedupGuard;
use super::rule_matcher::{RuleMatch, RuleMatcher};
use crate::config::CommitRules;
use crate::errors::DispatchError;
use crate::integrations::{ChatClient, ContinuousIntegrationSystem, VersionControlSystem};
use crate::models::build::{BuildStatusParams, BuildStatusUpdate};
use crate::models::commit::Commit;
use crate::models::notice::{BuildStatusNotice, CommitNotice, NotificationHandle};
use crate::models::rule::{BuildJob, NamedWebhook};

const NO_DESCRIPTION: &str = "<No description>";

/// What happened to a commit that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Ignored {
        branch: String,
        rule: String,
    },
    NoMatch {
        branch: String,
    },
    Dispatched {
        change: String,
        rules: usize,
        notices: usize,
        builds_started: usize,
    },
}

impl fmt::Display for CommitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOutcome::Ignored { branch, rule } => {
                write!(f, "Commit on {branch} ignored by rule {rule:?}")
            }
            CommitOutcome::NoMatch { branch } => {
                write!(f, "No commit response rule matches {branch}")
            }
            CommitOutcome::Dispatched {
                change,
                rules,
                notices,
                builds_started,
            } => write!(
                f,
                "Change {change} matched {rules} rule(s): {notices} notice(s) posted, {builds_started} build(s) started"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStatusOutcome {
    pub update: BuildStatusUpdate,
    pub notice: NotificationHandle,
}

impl fmt::Display for BuildStatusOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Posted {} notice for {}",
            self.update.status,
            self.update.key()
        )
    }
}

pub struct Dispatcher {
    vcs: Arc<dyn VersionControlSystem>,
    ci: Arc<dyn ContinuousIntegrationSystem>,
    chat: Arc<dyn ChatClient>,
    matcher: RuleMatcher,
    build_jobs: Vec<BuildJob>,
    /// Webhook name -> chat target.
    webhooks: HashMap<String, String>,
    tracker: BuildTracker,
}

impl Dispatcher {
    pub fn new(
        vcs: Arc<dyn VersionControlSystem>,
        ci: Arc<dyn ContinuousIntegrationSystem>,
        chat: Arc<dyn ChatClient>,
        rules: CommitRules,
        build_jobs: Vec<BuildJob>,
        webhooks: Vec<NamedWebhook>,
    ) -> Self {
        let mut targets = HashMap::with_capacity(webhooks.len());
        for webhook in webhooks {
            if targets.contains_key(&webhook.name) {
                tracing::warn!(webhook = %webhook.name, "Duplicate webhook name, keeping the first entry");
                continue;
            }
            targets.insert(webhook.name, webhook.id);
        }

        Self {
            vcs,
            ci,
            chat,
            matcher: RuleMatcher::new(rules),
            build_jobs,
            webhooks: targets,
            tracker: BuildTracker::new(),
        }
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &BuildTracker {
        &self.tracker
    }

    /// Resolves, validates and matches `commit`, then posts notices and
    /// requests builds for every matched rule.
    pub async fn handle_commit(&self, commit: Commit) -> Result<CommitOutcome, DispatchError> {
        let span = tracing::info_span!(
            "commit",
            dispatch_id = %Uuid::new_v4(),
            change = %commit.change,
        );
        let result = self.dispatch_commit(commit).instrument(span).await;

        let outcome = match &result {
            Ok(CommitOutcome::Ignored { .. }) => "ignored",
            Ok(CommitOutcome::NoMatch { .. }) => "no_match",
            Ok(CommitOutcome::Dispatched { .. }) => "dispatched",
            Err(DispatchError::Validation(_)) => "invalid",
            Err(_) => "failed",
        };
        crate::metrics::commit_handled(outcome);
        result
    }

    async fn dispatch_commit(&self, mut commit: Commit) -> Result<CommitOutcome, DispatchError> {
        if !commit.has_branch() && !commit.change.is_empty() {
            if let Some(branch) = self.vcs.resolve_branch(&commit.change, &commit.client).await {
                tracing::debug!(branch = %branch, "Resolved commit branch through VCS");
                commit.branch = branch;
            }
        }

        if let Err(message) = commit.validate() {
            tracing::warn!(commit = %commit, "Rejecting commit: {message}");
            return Err(DispatchError::Validation(message));
        }

        let rules = match self.matcher.match_branch(&commit.branch) {
            RuleMatch::Ignored(rule) => {
                tracing::info!(branch = %commit.branch, rule = %rule, "Commit ignored");
                return Ok(CommitOutcome::Ignored {
                    branch: commit.branch,
                    rule: rule.name.clone(),
                });
            }
            RuleMatch::Matched(rules) if rules.is_empty() => {
                tracing::info!(branch = %commit.branch, "No commit response rule matched");
                return Ok(CommitOutcome::NoMatch {
                    branch: commit.branch,
                });
            }
            RuleMatch::Matched(rules) => rules,
        };

        let description = match self.vcs.commit_description(&commit.change).await {
            Ok(description) => description,
            Err(e) => {
                tracing::warn!("Failed to fetch commit description: {e:#}");
                NO_DESCRIPTION.to_string()
            }
        };

        let classification = self
            .vcs
            .classify_change(&commit.change)
            .await
            .map_err(|e| {
                tracing::error!("Failed to classify change: {e:#}");
                DispatchError::Collaborator(format!(
                    "failed to classify change {}: {e}",
                    commit.change
                ))
            })?;
        let build_worthy = classification.is_build_worthy();
        let notice = CommitNotice::new(&commit, &description, build_worthy);

        let mut guard = DedupGuard::new();
        let mut notices = 0;
        let mut builds_started = 0;

        for rule in &rules {
            if let Some(name) = rule.post_webhook() {
                if guard.should_post(name) {
                    match self.webhooks.get(name) {
                        Some(target) => {
                            let posted = self.chat.post_commit_notice(&notice, target).await;
                            crate::metrics::notice_sent("commit", posted.is_some());
                            match posted {
                                Some(handle) => {
                                    notices += 1;
                                    tracing::info!(webhook = name, channel = %target, notice = %handle, "Posted commit notice");
                                }
                                None => {
                                    tracing::warn!(webhook = name, channel = %target, "Commit notice was not posted");
                                }
                            }
                        }
                        None => {
                            tracing::error!(webhook = name, rule = %rule, "Rule names a webhook that is not configured");
                        }
                    }
                } else {
                    tracing::debug!(webhook = name, "Webhook already posted for this commit");
                }
            }

            if let Some(job) = rule.start_build() {
                if build_worthy {
                    let accepted = self
                        .ci
                        .start_job(job, &commit.change, classification)
                        .await;
                    crate::metrics::build_start_requested(accepted);
                    if accepted {
                        builds_started += 1;
                        tracing::info!(job, "Requested build");
                    } else {
                        tracing::warn!(job, "CI did not accept build request");
                    }
                } else {
                    tracing::info!(job, "Change touches neither code nor content, not starting build");
                }
            }
        }

        Ok(CommitOutcome::Dispatched {
            change: commit.change,
            rules: rules.len(),
            notices,
            builds_started,
        })
    }

    /// Validates a status report and moves the build through the tracker.
    pub async fn handle_build_status(
        &self,
        params: BuildStatusParams,
    ) -> Result<BuildStatusOutcome, DispatchError> {
        let span = tracing::info_span!(
            "build_status",
            dispatch_id = %Uuid::new_v4(),
            job = %params.job_name,
            build_number = %params.build_number,
            build_id = %params.build_id,
        );
        self.dispatch_build_status(params).instrument(span).await
    }

    async fn dispatch_build_status(
        &self,
        params: BuildStatusParams,
    ) -> Result<BuildStatusOutcome, DispatchError> {
        let update = BuildStatusUpdate::try_from(params).map_err(|message| {
            tracing::warn!("Rejecting build status update: {message}");
            DispatchError::Validation(message)
        })?;

        let channel = self.post_channel(&update.job_name)?;
        let notice = BuildStatusNotice::from(&update);
        let key = update.key();

        let result = if update.status.is_running() {
            self.tracker
                .on_running(&key, || {
                    self.chat.post_build_status_notice(&notice, channel)
                })
                .await
        } else {
            let chat = &self.chat;
            self.tracker
                .on_completion(
                    &key,
                    &update.job_name,
                    update.status,
                    || chat.post_build_status_notice(&notice, channel),
                    |handle: NotificationHandle| async move {
                        let deleted = chat.delete_notice(&handle, channel).await;
                        crate::metrics::notice_sent("delete", deleted);
                        deleted
                    },
                )
                .await
        };

        match result {
            Ok(handle) => {
                crate::metrics::notice_sent("build_status", true);
                tracing::info!(status = %update.status, notice = %handle, "Posted build status notice");
                Ok(BuildStatusOutcome {
                    update,
                    notice: handle,
                })
            }
            Err(e) => {
                crate::metrics::tracker_error(e.kind());
                match &e {
                    TrackerError::PostFailed(_) => {
                        crate::metrics::notice_sent("build_status", false);
                        tracing::error!(status = %update.status, "{e}");
                    }
                    TrackerError::DuplicateStart(_) | TrackerError::NoMatchingRun(_) => {
                        tracing::warn!(status = %update.status, "{e}");
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Chat target for a job's status notices. Exactly one build job entry
    /// with a post channel must exist for `job`.
    fn post_channel(&self, job: &str) -> Result<&str, DispatchError> {
        let mut matching = self.build_jobs.iter().filter(|j| j.name == job);
        let config = match (matching.next(), matching.next()) {
            (Some(config), None) => config,
            (None, _) => {
                tracing::error!(job, "No build job configured with this name");
                return Err(DispatchError::Configuration(format!(
                    "no build job configured for {job}"
                )));
            }
            (Some(_), Some(_)) => {
                tracing::error!(job, "Multiple build jobs configured with this name");
                return Err(DispatchError::Configuration(format!(
                    "multiple build jobs configured for {job}"
                )));
            }
        };

        config
            .post_channel
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                tracing::error!(job, "Build job has no post channel");
                DispatchError::Configuration(format!("build job {job} has no post_channel"))
            })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("matcher", &self.matcher)
            .field("build_jobs", &self.build_jobs)
            .field("webhooks", &self.webhooks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::notice::ChangeClassification;
    use crate::models::rule::CommitResponseRule;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub(crate) struct FakeVcs {
        pub branch: Option<String>,
        pub classification: ChangeClassification,
        pub fail_classify: bool,
        pub fail_description: bool,
    }

    impl Default for FakeVcs {
        fn default() -> Self {
            Self {
                branch: None,
                classification: ChangeClassification {
                    touches_code: true,
                    touches_content: false,
                },
                fail_classify: false,
                fail_description: false,
            }
        }
    }

    #[async_trait]
    impl VersionControlSystem for FakeVcs {
        async fn resolve_branch(&self, _change: &str, _client: &str) -> Option<String> {
            self.branch.clone()
        }

        async fn commit_description(&self, change: &str) -> anyhow::Result<String> {
            if self.fail_description {
                anyhow::bail!("describe failed");
            }
            Ok(format!("Description of {change}"))
        }

        async fn classify_change(&self, _change: &str) -> anyhow::Result<ChangeClassification> {
            if self.fail_classify {
                anyhow::bail!("files failed");
            }
            Ok(self.classification)
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeCi {
        pub started: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ContinuousIntegrationSystem for FakeCi {
        async fn start_job(
            &self,
            job: &str,
            change: &str,
            _classification: ChangeClassification,
        ) -> bool {
            self.started
                .lock()
                .unwrap()
                .push((job.to_string(), change.to_string()));
            true
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeChat {
        next: AtomicUsize,
        pub fail_posts: bool,
        pub commit_posts: Mutex<Vec<(String, String)>>,
        pub status_posts: Mutex<Vec<(String, String)>>,
        pub deleted: Mutex<Vec<(String, String)>>,
    }

    impl FakeChat {
        fn handle(&self) -> NotificationHandle {
            NotificationHandle::new(format!("m{}", self.next.fetch_add(1, Ordering::SeqCst)))
        }
    }

    #[async_trait]
    impl ChatClient for FakeChat {
        async fn post_commit_notice(
            &self,
            notice: &CommitNotice,
            target: &str,
        ) -> Option<NotificationHandle> {
            if self.fail_posts {
                return None;
            }
            self.commit_posts
                .lock()
                .unwrap()
                .push((target.to_string(), notice.change.clone()));
            Some(self.handle())
        }

        async fn post_build_status_notice(
            &self,
            notice: &BuildStatusNotice,
            target: &str,
        ) -> Option<NotificationHandle> {
            if self.fail_posts {
                return None;
            }
            self.status_posts
                .lock()
                .unwrap()
                .push((target.to_string(), notice.title()));
            Some(self.handle())
        }

        async fn delete_notice(&self, handle: &NotificationHandle, target: &str) -> bool {
            self.deleted
                .lock()
                .unwrap()
                .push((handle.to_string(), target.to_string()));
            true
        }
    }

    pub(crate) fn rules() -> CommitRules {
        CommitRules {
            ignore: vec![CommitResponseRule::ignore("//depot/main/ci")],
            respond: vec![
                CommitResponseRule::respond("//depot/main", Some("main-build"), Some("commits")),
                CommitResponseRule::respond("//depot/main/engine", Some("engine-build"), Some("commits")),
                CommitResponseRule::respond("//depot", None, Some("firehose")),
            ],
        }
    }

    pub(crate) fn build_jobs() -> Vec<BuildJob> {
        vec![
            BuildJob {
                name: "nightly".into(),
                post_channel: Some("builds".into()),
            },
            BuildJob {
                name: "silent".into(),
                post_channel: None,
            },
            BuildJob {
                name: "twice".into(),
                post_channel: Some("a".into()),
            },
            BuildJob {
                name: "twice".into(),
                post_channel: Some("b".into()),
            },
        ]
    }

    pub(crate) fn webhooks() -> Vec<NamedWebhook> {
        vec![
            NamedWebhook {
                name: "commits".into(),
                id: "chan-commits".into(),
            },
            NamedWebhook {
                name: "firehose".into(),
                id: "chan-firehose".into(),
            },
        ]
    }

    struct Harness {
        ci: Arc<FakeCi>,
        chat: Arc<FakeChat>,
        dispatcher: Dispatcher,
    }

    fn harness_with(vcs: FakeVcs, chat: FakeChat) -> Harness {
        let ci = Arc::new(FakeCi::default());
        let chat = Arc::new(chat);
        let dispatcher = Dispatcher::new(
            Arc::new(vcs),
            ci.clone(),
            chat.clone(),
            rules(),
            build_jobs(),
            webhooks(),
        );
        Harness {
            ci,
            chat,
            dispatcher,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeVcs::default(), FakeChat::default())
    }

    fn status(job: &str, number: &str, id: &str, status: &str) -> BuildStatusParams {
        BuildStatusParams {
            change_id: "1234".into(),
            job_name: job.into(),
            build_number: number.into(),
            build_id: id.into(),
            build_status: status.into(),
        }
    }

    #[tokio::test]
    async fn ignored_commit_has_no_side_effects() {
        let h = harness();
        let outcome = h
            .dispatcher
            .handle_commit(Commit::new("1", "ws", "alice", "//depot/main/ci/tools"))
            .await
            .unwrap();

        assert!(matches!(outcome, CommitOutcome::Ignored { .. }));
        assert!(outcome.to_string().contains("ignored"));
        assert!(h.chat.commit_posts.lock().unwrap().is_empty());
        assert!(h.ci.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_commit_has_no_side_effects() {
        let h = harness();
        let outcome = h
            .dispatcher
            .handle_commit(Commit::new("1", "ws", "alice", "//other/main"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CommitOutcome::NoMatch {
                branch: "//other/main".into()
            }
        );
        assert!(h.chat.commit_posts.lock().unwrap().is_empty());
        assert!(h.ci.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shared_webhook_target_is_posted_once() {
        let h = harness();
        let outcome = h
            .dispatcher
            .handle_commit(Commit::new("77", "ws", "alice", "//depot/main/engine/core"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CommitOutcome::Dispatched {
                change: "77".into(),
                rules: 3,
                notices: 2,
                builds_started: 2,
            }
        );
        let posts = h.chat.commit_posts.lock().unwrap().clone();
        assert_eq!(
            posts,
            vec![
                ("chan-commits".to_string(), "77".to_string()),
                ("chan-firehose".to_string(), "77".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn build_starts_are_not_deduplicated() {
        let h = harness();
        h.dispatcher
            .handle_commit(Commit::new("77", "ws", "alice", "//depot/main/engine/core"))
            .await
            .unwrap();

        let started = h.ci.started.lock().unwrap().clone();
        assert_eq!(
            started,
            vec![
                ("main-build".to_string(), "77".to_string()),
                ("engine-build".to_string(), "77".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn non_build_worthy_change_posts_but_does_not_build() {
        let vcs = FakeVcs {
            classification: ChangeClassification::default(),
            ..FakeVcs::default()
        };
        let h = harness_with(vcs, FakeChat::default());
        h.dispatcher
            .handle_commit(Commit::new("9", "ws", "bob", "//depot/main/docs"))
            .await
            .unwrap();

        assert!(h.ci.started.lock().unwrap().is_empty());
        assert_eq!(h.chat.commit_posts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_branch_is_resolved_through_vcs() {
        let vcs = FakeVcs {
            branch: Some("//depot/main".into()),
            ..FakeVcs::default()
        };
        let h = harness_with(vcs, FakeChat::default());
        let outcome = h
            .dispatcher
            .handle_commit(Commit::new("5", "ws", "bob", ""))
            .await
            .unwrap();

        assert!(matches!(outcome, CommitOutcome::Dispatched { rules: 2, .. }));
    }

    #[tokio::test]
    async fn invalid_commit_names_every_unset_field() {
        let h = harness();
        let err = h
            .dispatcher
            .handle_commit(Commit::new("", "ws", "", ""))
            .await
            .unwrap_err();

        match err {
            DispatchError::Validation(message) => {
                assert_eq!(message, "Change unset, User unset, Branch unset")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn classification_failure_is_a_collaborator_error() {
        let vcs = FakeVcs {
            fail_classify: true,
            ..FakeVcs::default()
        };
        let h = harness_with(vcs, FakeChat::default());
        let err = h
            .dispatcher
            .handle_commit(Commit::new("5", "ws", "bob", "//depot/main"))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Collaborator(_)));
        assert!(h.chat.commit_posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn description_failure_still_dispatches() {
        let vcs = FakeVcs {
            fail_description: true,
            ..FakeVcs::default()
        };
        let h = harness_with(vcs, FakeChat::default());
        let outcome = h
            .dispatcher
            .handle_commit(Commit::new("5", "ws", "bob", "//depot/main"))
            .await
            .unwrap();

        assert!(matches!(outcome, CommitOutcome::Dispatched { notices: 2, .. }));
    }

    #[tokio::test]
    async fn unknown_job_is_a_configuration_error() {
        let h = harness();
        let err = h
            .dispatcher
            .handle_build_status(status("missing", "1", "a", "running"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[tokio::test]
    async fn duplicate_job_config_is_a_configuration_error() {
        let h = harness();
        let err = h
            .dispatcher
            .handle_build_status(status("twice", "1", "a", "running"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
        assert!(h.chat.status_posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_without_channel_is_a_configuration_error() {
        let h = harness();
        let err = h
            .dispatcher
            .handle_build_status(status("silent", "1", "a", "running"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[tokio::test]
    async fn bad_status_is_rejected_before_tracking() {
        let h = harness();
        let err = h
            .dispatcher
            .handle_build_status(status("nightly", "1", "a", "exploded"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert!(h.chat.status_posts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn running_then_completion_replaces_notice() {
        let h = harness();
        let running = h
            .dispatcher
            .handle_build_status(status("nightly", "42", "abc", "RUNNING"))
            .await
            .unwrap();
        let key = running.update.key();
        assert_eq!(
            h.dispatcher.tracker().running_notice(&key).await,
            Some(running.notice.clone())
        );

        let done = h
            .dispatcher
            .handle_build_status(status("nightly", "42", "abc", "failed"))
            .await
            .unwrap();

        assert_eq!(h.dispatcher.tracker().running_notice(&key).await, None);
        assert_eq!(
            h.chat.deleted.lock().unwrap().clone(),
            vec![(running.notice.to_string(), "builds".to_string())]
        );
        assert_eq!(
            h.dispatcher.tracker().completion_history("nightly").await,
            vec![done.notice]
        );
    }

    #[tokio::test]
    async fn duplicate_running_is_rejected() {
        let h = harness();
        h.dispatcher
            .handle_build_status(status("nightly", "42", "abc", "running"))
            .await
            .unwrap();
        let err = h
            .dispatcher
            .handle_build_status(status("nightly", "42", "abc", "running"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Tracker(TrackerError::DuplicateStart(_))
        ));
        assert_eq!(h.chat.status_posts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completion_without_running_is_rejected() {
        let h = harness();
        let err = h
            .dispatcher
            .handle_build_status(status("nightly", "42", "abc", "succeeded"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Tracker(TrackerError::NoMatchingRun(_))
        ));
    }

    #[tokio::test]
    async fn failed_running_post_is_a_server_error() {
        let chat = FakeChat {
            fail_posts: true,
            ..FakeChat::default()
        };
        let h = harness_with(FakeVcs::default(), chat);
        let err = h
            .dispatcher
            .handle_build_status(status("nightly", "42", "abc", "running"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Tracker(TrackerError::PostFailed(_))
        ));
    }
}
