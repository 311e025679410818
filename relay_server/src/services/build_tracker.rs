//! Build lifecycle tracking: pairs each "running" notice with the completion
//! that replaces it, and keeps the trail of completion notices per job until
//! the next successful build retracts them.
//!
//! Both maps live behind one mutex. The lock is only held to read or mutate
//! the maps; posting and deleting notices happen after it is released, so a
//! slow chat backend never stalls updates for unrelated builds.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::Mutex;

use crate::models::build::{BuildKey, BuildStatus};
use crate::models::notice::NotificationHandle;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("received multiple start signals for {0}")]
    DuplicateStart(BuildKey),
    #[error("received a completion for {0} but there is no build in progress for it")]
    NoMatchingRun(BuildKey),
    #[error("failed to post build status notice for {0}")]
    PostFailed(BuildKey),
}

impl TrackerError {
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerError::DuplicateStart(_) => "duplicate_start",
            TrackerError::NoMatchingRun(_) => "no_matching_run",
            TrackerError::PostFailed(_) => "post_failed",
        }
    }
}

#[derive(Debug, Clone)]
enum RunningSlot {
    /// Key reserved; the running notice is being posted.
    Posting,
    Posted(NotificationHandle),
}

#[derive(Debug, Default)]
struct TrackerState {
    running: HashMap<BuildKey, RunningSlot>,
    /// Completion notices per job since its last success, oldest first.
    completions: HashMap<String, Vec<NotificationHandle>>,
}

impl TrackerState {
    /// Builds whose running notice is up. Reservations still posting are excluded.
    fn posted_builds(&self) -> usize {
        self.running
            .values()
            .filter(|slot| matches!(slot, RunningSlot::Posted(_)))
            .count()
    }

    fn report_running(&self) {
        crate::metrics::running_builds(self.posted_builds());
    }
}

#[derive(Debug, Default)]
pub struct BuildTracker {
    state: Mutex<TrackerState>,
}

impl BuildTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a build, posting its running notice via `post`.
    ///
    /// The key is reserved before `post` runs, so a concurrent second start
    /// for the same key fails with [`TrackerError::DuplicateStart`] instead of
    /// posting twice.
    pub async fn on_running<P, PF>(
        &self,
        key: &BuildKey,
        post: P,
    ) -> Result<NotificationHandle, TrackerError>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Option<NotificationHandle>>,
    {
        {
            let mut state = self.state.lock().await;
            if state.running.contains_key(key) {
                return Err(TrackerError::DuplicateStart(key.clone()));
            }
            state.running.insert(key.clone(), RunningSlot::Posting);
        }

        let posted = post().await;

        let mut state = self.state.lock().await;
        match posted {
            Some(handle) => {
                state
                    .running
                    .insert(key.clone(), RunningSlot::Posted(handle.clone()));
                state.report_running();
                tracing::debug!(build = %key, notice = %handle, "Build running notice recorded");
                Ok(handle)
            }
            None => {
                state.running.remove(key);
                state.report_running();
                Err(TrackerError::PostFailed(key.clone()))
            }
        }
    }

    /// Replaces the running notice for `key` with a completion notice.
    ///
    /// The running entry is removed before anything is posted and is not
    /// restored if posting fails: the build is no longer running either way.
    /// On [`BuildStatus::Succeeded`] every earlier completion notice for `job`
    /// is deleted before the new one is recorded.
    pub async fn on_completion<P, PF, D, DF>(
        &self,
        key: &BuildKey,
        job: &str,
        status: BuildStatus,
        post: P,
        delete: D,
    ) -> Result<NotificationHandle, TrackerError>
    where
        P: FnOnce() -> PF,
        PF: Future<Output = Option<NotificationHandle>>,
        D: Fn(NotificationHandle) -> DF,
        DF: Future<Output = bool>,
    {
        let running = {
            let mut state = self.state.lock().await;
            let handle = match state.running.remove(key) {
                Some(RunningSlot::Posted(handle)) => handle,
                Some(RunningSlot::Posting) => {
                    // Running notice not recorded yet; leave the reservation alone.
                    state.running.insert(key.clone(), RunningSlot::Posting);
                    return Err(TrackerError::NoMatchingRun(key.clone()));
                }
                None => return Err(TrackerError::NoMatchingRun(key.clone())),
            };
            state.report_running();
            handle
        };

        if !delete(running.clone()).await {
            tracing::warn!(build = %key, notice = %running, "Failed to delete running notice");
        }

        let handle = post()
            .await
            .ok_or_else(|| TrackerError::PostFailed(key.clone()))?;

        if status == BuildStatus::Succeeded {
            let superseded = {
                let mut state = self.state.lock().await;
                state
                    .completions
                    .get_mut(job)
                    .map(std::mem::take)
                    .unwrap_or_default()
            };

            for old in superseded {
                if !delete(old.clone()).await {
                    tracing::warn!(job, notice = %old, "Failed to retract superseded completion notice");
                }
            }
        }

        let mut state = self.state.lock().await;
        state
            .completions
            .entry(job.to_string())
            .or_default()
            .push(handle.clone());

        Ok(handle)
    }

    #[cfg(test)]
    pub async fn running_notice(&self, key: &BuildKey) -> Option<NotificationHandle> {
        match self.state.lock().await.running.get(key) {
            Some(RunningSlot::Posted(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    #[cfg(test)]
    pub async fn completion_history(&self, job: &str) -> Vec<NotificationHandle> {
        self.state
            .lock()
            .await
            .completions
            .get(job)
            .cloned()
            .unwrap_or_default()
    }
}
