use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error taxonomy returned to callers of `on-enqueue-request`, plus the
/// fatal conditions a handler may abort on. `CIStillRunning`/`CIFailed`/
/// `MergeConflict`/`AlreadyEnqueued` are the only errors a caller should act
/// on; the rest indicate a collaborator failure the transaction rolls back
/// on.
#[derive(Error, Debug)]
pub enum Error {
    #[error("PR's own CI has not finished yet")]
    CIStillRunning,
    #[error("PR's own CI failed")]
    CIFailed,
    #[error("could not produce a speculative merge without conflict")]
    MergeConflict,
    #[error("PR already has an enqueue record")]
    AlreadyEnqueued,
    #[error("store error")]
    Store(#[from] store::StoreError),
    #[error("git operator error")]
    Git(#[from] git_operator::GitError),
    #[error("vcs host error")]
    VcsHost(#[from] vcs_host::VcsError),
    #[error("not found: {0}")]
    NotFound(String),
}
