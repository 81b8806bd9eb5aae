pub mod gitlab;

use async_trait::async_trait;
use thiserror::Error;

pub type Result<T, E = VcsError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum VcsError {
    #[error("http error")]
    Http(#[from] reqwest::Error),
    #[error("'{0}' was not found on the host")]
    NotFound(String),
    #[error("unexpected response from host: {0}")]
    Protocol(String),
}

/// Terminal-or-pending status of a PR's (or a specific pipeline's) CI, as
/// seen by the Coordinator. Host-specific states are folded into this set:
/// cancelled maps to `Failed`, skipped maps to `Passed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CiStatus {
    Passed,
    Failed,
    NotFinished,
}

/// The VCS Host Client capability set: format a PR reference, fetch CI
/// status for a PR or a specific pipeline id, cancel a pipeline, and post a
/// PR comment. Implementations are provider-specific (GitLab here;
/// `Repo.kind` leaves room for others).
#[async_trait]
pub trait VcsHostClient: Send + Sync {
    /// Render a PR/MR number the way this host's commit trailers and UI do
    /// (`!N` for GitLab, `#N` for GitHub-style hosts).
    fn format_pr_number(&self, number: u64) -> String;

    /// The PR's own head-commit CI status, as reported by the host.
    async fn pr_ci_status(&self, repo_path: &str, pr_number: u64) -> Result<CiStatus>;

    /// The status of one specific pipeline/CI run by id.
    async fn ci_status(&self, repo_path: &str, ci_number: u64) -> Result<CiStatus>;

    /// Best-effort: cancel an in-flight pipeline. Callers must not treat
    /// failure here as fatal to the handler that requested it.
    async fn abort_ci(&self, repo_path: &str, ci_number: u64) -> Result<()>;

    async fn pr_send_comment(&self, repo_path: &str, pr_number: u64, body: &str) -> Result<()>;
}
