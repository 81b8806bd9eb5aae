//! Entity rows of the persisted schema. Identifiers are opaque newtypes
//! over `i64`, matching the `Priority`/`Repo` newtype style in
//! `bors::state`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Clone,
            Copy,
            Debug,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(RepoId);
id_newtype!(MergeQueueId);
id_newtype!(PullRequestId);
id_newtype!(CiNumber);

/// Sequence number of an [`EnqueueRecord`] within a [`MergeQueue`]'s
/// half-open `[head-seq, tail-seq)` window.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct Seq(pub i64);

impl Seq {
    pub fn succ(self) -> Seq {
        Seq(self.0 + 1)
    }

    pub fn pred(self) -> Option<Seq> {
        (self.0 > 0).then(|| Seq(self.0 - 1))
    }
}

impl std::fmt::Display for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An arbitrary, webhook-supplied merge priority: higher merges first.
/// Kept as a plain integer, not a closed enum, since ordering treats
/// priority as an arbitrary totally-ordered value.
pub type Priority = i64;

/// The repo `kind` discriminant. GitLab is the only host implemented here;
/// the variant set is left open for extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum RepoKind {
    GitLab,
}

impl FromStr for RepoKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gitlab" => Ok(RepoKind::GitLab),
            other => Err(format!("unknown repo kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for RepoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RepoKind::GitLab => "gitlab",
        };
        f.write_str(s)
    }
}

/// How a PR's source branch is combined with a queue's working branch.
/// Mirrors `git_operator::MergeStyle`; this crate stores it as text rather
/// than depending on `git-operator` directly, so the two newtypes stay in
/// sync by convention, not by a shared type (see DESIGN.md).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum MergeStyle {
    Merge,
    Linear,
    #[sqlx(rename = "semi-linear")]
    SemiLinear,
}

impl FromStr for MergeStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(MergeStyle::Merge),
            "linear" => Ok(MergeStyle::Linear),
            "semi-linear" | "semi_linear" | "semilinear" => Ok(MergeStyle::SemiLinear),
            other => Err(format!("unknown merge style '{}'", other)),
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

/// Immutable after creation; no lifecycle state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: RepoId,
    pub display_name: String,
    pub url: String,
    pub kind: RepoKind,
    pub access_token: Option<String>,
    pub merge_style: MergeStyle,
}

/// A not-yet-persisted repo; the store assigns the id on insertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRepo {
    pub display_name: String,
    pub url: String,
    pub kind: RepoKind,
    pub access_token: Option<String>,
    pub merge_style: MergeStyle,
}

/// One per (repo, target branch). `head_seq`/`tail_seq` bound the
/// half-open window of currently-live sequence numbers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeQueue {
    pub id: MergeQueueId,
    pub repo_id: RepoId,
    pub target_branch: String,
    pub working_branch: String,
    pub head_seq: Seq,
    pub tail_seq: Seq,
}

impl MergeQueue {
    pub fn is_empty(&self) -> bool {
        self.head_seq == self.tail_seq
    }
}

/// A not-yet-persisted merge queue; the store assigns the id and starts
/// both sequence counters at zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMergeQueue {
    pub repo_id: RepoId,
    pub target_branch: String,
    pub working_branch: String,
}

/// Created on `pr-opened`; mutated by enqueue/rebuild/dequeue; destroyed
/// only with the repo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: PullRequestId,
    pub repo_id: RepoId,
    pub merge_queue_id: MergeQueueId,
    pub number: i64,
    pub source_branch: String,
    pub target_branch: String,
    pub priority: Priority,
}

/// A not-yet-persisted PR; the store assigns the id on insertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub repo_id: RepoId,
    pub merge_queue_id: MergeQueueId,
    pub number: i64,
    pub source_branch: String,
    pub target_branch: String,
    pub priority: Priority,
}

/// One-to-one with an enqueued PR: presence of this row is the definition
/// of "PR is enqueued".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueRecord {
    pub pr_id: PullRequestId,
    pub seq: Seq,
    pub associated_branch: String,
    pub mq_commit: String,
    pub ci_number: Option<CiNumber>,
    pub finished: bool,
    pub passed: bool,
}

impl EnqueueRecord {
    pub fn new(pr_id: PullRequestId, seq: Seq, associated_branch: String, mq_commit: String) -> Self {
        Self {
            pr_id,
            seq,
            associated_branch,
            mq_commit,
            ci_number: None,
            finished: false,
            passed: false,
        }
    }
}
