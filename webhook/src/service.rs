//! The seam between parsed webhook payloads and the Coordinator's four
//! events. Generalizes the per-installation `Service` trait (one `Service`
//! per concern, e.g. try-builds vs project board sync) into a single sink
//! trait implemented once for any `Coordinator<G, S, V>`, since this
//! front-end only ever has one concern: translate and forward.

use async_trait::async_trait;
use coordinator::{Coordinator, Error as CoordinatorError};
use git_operator::{Committer, GitOperator};
use store::Store;
use vcs_host::VcsHostClient;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_pr_opened(
        &self,
        repo_url: &str,
        pr_number: u64,
        priority: i64,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<(), CoordinatorError>;

    async fn on_enqueue_request(
        &self,
        repo_url: &str,
        pr_number: u64,
        committer: Committer,
    ) -> Result<(), CoordinatorError>;

    async fn on_ci_created(
        &self,
        repo_url: &str,
        ci_number: u64,
        associated_commit: &str,
    ) -> Result<(), CoordinatorError>;

    async fn on_ci_finished(
        &self,
        repo_url: &str,
        ci_number: u64,
        success: bool,
    ) -> Result<(), CoordinatorError>;
}

#[async_trait]
impl<G, S, V> EventSink for Coordinator<G, S, V>
where
    G: GitOperator,
    S: Store,
    V: VcsHostClient,
{
    async fn on_pr_opened(
        &self,
        repo_url: &str,
        pr_number: u64,
        priority: i64,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<(), CoordinatorError> {
        Coordinator::on_pr_opened(self, repo_url, pr_number, priority, source_branch, target_branch).await
    }

    async fn on_enqueue_request(
        &self,
        repo_url: &str,
        pr_number: u64,
        committer: Committer,
    ) -> Result<(), CoordinatorError> {
        Coordinator::on_enqueue_request(self, repo_url, pr_number, committer).await
    }

    async fn on_ci_created(
        &self,
        repo_url: &str,
        ci_number: u64,
        associated_commit: &str,
    ) -> Result<(), CoordinatorError> {
        Coordinator::on_ci_created(self, repo_url, ci_number, associated_commit).await
    }

    async fn on_ci_finished(
        &self,
        repo_url: &str,
        ci_number: u64,
        success: bool,
    ) -> Result<(), CoordinatorError> {
        Coordinator::on_ci_finished(self, repo_url, ci_number, success).await
    }
}
