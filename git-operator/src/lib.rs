mod oid;
pub mod shell;

pub use oid::{Oid, ParseOidError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T, E = GitError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("branch '{0}' does not exist on the local mirror")]
    MissingBranch(String),
    #[error("merge conflict")]
    Conflict,
    #[error("git command failed")]
    Command(#[from] anyhow::Error),
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("invalid commit id")]
    ParseOid(#[from] ParseOidError),
}

/// Identity used to author merge/rebase commits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

impl Committer {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// The message and authorship of an existing commit, used by the Coordinator's
/// rebuild subroutine to recover a PR's prior commit message/committer before
/// re-applying the speculative merge primitive.
#[derive(Clone, Debug)]
pub struct CommitInfo {
    pub message: String,
    pub committer: Committer,
}

/// How a PR's source branch is combined with the queue's working branch.
/// Mirrors `Repo.merge_style` in the persisted data model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStyle {
    /// Two-parent merge commit of `[working_tip, source_tip]`.
    Merge,
    /// Rebase the source onto the working branch; fast-forward-only result.
    Linear,
    /// Rebase, then wrap the rebased chain in a two-parent merge commit.
    SemiLinear,
}

#[derive(Error, Debug)]
#[error("'{0}' is not a valid merge style")]
pub struct ParseMergeStyleError(String);

impl std::str::FromStr for MergeStyle {
    type Err = ParseMergeStyleError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "merge" => Ok(MergeStyle::Merge),
            "linear" => Ok(MergeStyle::Linear),
            "semi-linear" | "semi_linear" | "semilinear" => Ok(MergeStyle::SemiLinear),
            _ => Err(ParseMergeStyleError(s.to_owned())),
        }
    }
}

impl std::fmt::Display for MergeStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MergeStyle::Merge => "merge",
            MergeStyle::Linear => "linear",
            MergeStyle::SemiLinear => "semi-linear",
        };
        f.write_str(s)
    }
}

/// Outcome of composing a speculative merge per [`MergeStyle`].
pub enum MergeOutcome<C> {
    Merged(C),
    Conflict,
}

/// Abstract capability set over a local bare mirror of a remote repository.
///
/// Implementations own concrete `Repo`/`Branch`/`CommitId` handle types; the
/// Coordinator is generic over this trait and never inspects handles beyond
/// passing them back to the operator or formatting a `CommitId` to a string
/// when it crosses the Store boundary.
#[async_trait]
pub trait GitOperator: Send + Sync {
    type Repo: Send + Sync + Clone;
    type Branch: Send + Sync + Clone;
    type CommitId: Send + Sync + Clone + PartialEq + ToString;

    /// Clone the repository into the local mirror if absent, else fetch all refs.
    async fn open_and_update(&self, url: &str) -> Result<Self::Repo>;

    async fn get_branch(&self, repo: &Self::Repo, name: &str) -> Result<Option<Self::Branch>>;

    async fn get_branch_tip(&self, repo: &Self::Repo, branch: &Self::Branch)
        -> Result<Self::CommitId>;

    /// Fails if a branch of this name exists and `overwrite` is false.
    async fn create_branch_at(
        &self,
        repo: &Self::Repo,
        name: &str,
        commit: &Self::CommitId,
        overwrite: bool,
    ) -> Result<Self::Branch>;

    async fn get_commit_info(&self, repo: &Self::Repo, commit: &Self::CommitId)
        -> Result<CommitInfo>;

    /// Ref update only; does not push.
    async fn reset_branch_to(
        &self,
        repo: &Self::Repo,
        branch: &Self::Branch,
        commit: &Self::CommitId,
    ) -> Result<()>;

    async fn remove_branch(&self, repo: &Self::Repo, branch: &Self::Branch) -> Result<()>;

    async fn can_merge_without_conflict(
        &self,
        repo: &Self::Repo,
        target: &Self::Branch,
        source: &Self::Branch,
    ) -> Result<bool>;

    /// `None` on conflict. `pr_number` names the scratch branch used as
    /// working space for the merge (`merge-<pr-number>`) so a crashed or
    /// concurrent operation's leftovers are traceable to the PR that caused
    /// them.
    async fn merge(
        &self,
        repo: &Self::Repo,
        target: &Self::Branch,
        source: &Self::Branch,
        message: &str,
        committer: &Committer,
        pr_number: u64,
    ) -> Result<Option<Self::CommitId>>;

    /// `None` on conflict. The returned commit id is the tip of `source`
    /// rebased onto `target`; `target` is not itself advanced. `pr_number`
    /// names the scratch branch (`merge-<pr-number>`) the same way `merge` does.
    async fn rebase(
        &self,
        repo: &Self::Repo,
        target: &Self::Branch,
        source: &Self::Branch,
        committer: &Committer,
        pr_number: u64,
    ) -> Result<Option<Self::CommitId>>;

    /// Force-push the local state of `branch` to origin.
    async fn force_push(&self, repo: &Self::Repo, branch: &Self::Branch) -> Result<()>;

    /// Fast-forward-push `branch` to `commit` on origin. Implementations must
    /// refuse (return `Err`) rather than silently force if the push is not a
    /// fast-forward, since target branches are only ever advanced this way.
    async fn fast_forward_push(
        &self,
        repo: &Self::Repo,
        branch: &Self::Branch,
        commit: &Self::CommitId,
    ) -> Result<()>;

    fn parse_commit_id(&self, s: &str) -> Result<Self::CommitId>;

    /// Compose the primitives above per `style` to produce "what the target
    /// branch would look like if `source` were merged into `target` now".
    /// `pr_number` names the ephemeral `merge-<pr-number>` scratch branch(es)
    /// this composes internally.
    async fn perform_merge(
        &self,
        repo: &Self::Repo,
        style: MergeStyle,
        target: &Self::Branch,
        source: &Self::Branch,
        message: &str,
        committer: &Committer,
        pr_number: u64,
    ) -> Result<MergeOutcome<Self::CommitId>> {
        match style {
            MergeStyle::Merge => {
                match self
                    .merge(repo, target, source, message, committer, pr_number)
                    .await?
                {
                    Some(commit) => Ok(MergeOutcome::Merged(commit)),
                    None => Ok(MergeOutcome::Conflict),
                }
            }
            MergeStyle::Linear => {
                match self.rebase(repo, target, source, committer, pr_number).await? {
                    Some(commit) => Ok(MergeOutcome::Merged(commit)),
                    None => Ok(MergeOutcome::Conflict),
                }
            }
            MergeStyle::SemiLinear => {
                let rebased = match self.rebase(repo, target, source, committer, pr_number).await?
                {
                    Some(commit) => commit,
                    None => return Ok(MergeOutcome::Conflict),
                };
                let rebased_branch = self
                    .create_branch_at(repo, &temp_rebase_branch_name(pr_number), &rebased, true)
                    .await?;
                let outcome = self
                    .merge(repo, target, &rebased_branch, message, committer, pr_number)
                    .await?;
                self.remove_branch(repo, &rebased_branch).await?;
                match outcome {
                    Some(commit) => Ok(MergeOutcome::Merged(commit)),
                    None => Ok(MergeOutcome::Conflict),
                }
            }
        }
    }
}

/// The ephemeral local branch spec names for an active enqueue's in-progress
/// merge: `merge-<pr-number>`, never pushed.
fn temp_rebase_branch_name(pr_number: u64) -> String {
    format!("merge-{}", pr_number)
}
