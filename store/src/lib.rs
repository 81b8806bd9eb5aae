//! The Persistence Store: a relational store holding repos, merge queues,
//! pull requests, and per-PR enqueue records, exposed as a trait over
//! transactional sessions. `postgres` is the concrete backend, built
//! around the `sqlx::PgPool` idiom common to merge-queue implementations.

pub mod models;
pub mod postgres;

pub use models::{
    CiNumber, EnqueueRecord, MergeQueue, MergeQueueId, MergeStyle, NewMergeQueue, NewPullRequest,
    NewRepo, PullRequest, PullRequestId, Repo, RepoId, RepoKind, Seq,
};

use async_trait::async_trait;
use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error")]
    Db(#[from] sqlx::Error),
    #[error("no repo with url '{0}'")]
    NoSuchRepo(String),
    #[error("no merge queue {0}")]
    NoSuchMergeQueue(MergeQueueId),
    #[error("no pull request {0}")]
    NoSuchPullRequest(PullRequestId),
}

/// Entry point: acquires a transactional session. Every Coordinator event
/// runs within exactly one.
#[async_trait]
pub trait Store: Send + Sync {
    type Tx: StoreTransaction;

    async fn begin(&self) -> Result<Self::Tx>;
}

/// The per-event transactional session. All reads a Coordinator handler
/// performs must go through the same `StoreTransaction` so they observe a
/// consistent queue snapshot.
///
/// `commit`/`rollback` consume `self` behind a `Box` so the trait stays
/// object-safe for callers that hold a `Box<dyn StoreTransaction>`.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get_repo_by_url(&mut self, url: &str) -> Result<Option<Repo>>;

    /// Inserts a repo, returning the existing id without inserting a
    /// duplicate row if one with the same `url` already exists. Repos are
    /// immutable once created, so this is the only write path the
    /// process-wiring layer needs.
    async fn add_repo(&mut self, repo: NewRepo) -> Result<RepoId>;

    async fn get_merge_queue_by_repo_and_branch(
        &mut self,
        repo_id: RepoId,
        target_branch: &str,
    ) -> Result<Option<MergeQueue>>;

    async fn get_merge_queue_for_pr(&mut self, pr_id: PullRequestId) -> Result<Option<MergeQueue>>;

    /// Inserts a merge queue with both sequence counters at zero, returning
    /// the existing id without inserting a duplicate row if one for the
    /// same `(repo_id, target_branch)` already exists.
    async fn add_merge_queue(&mut self, mq: NewMergeQueue) -> Result<MergeQueueId>;

    async fn save_merge_queue(&mut self, mq: &MergeQueue) -> Result<()>;

    async fn get_pr(&mut self, repo_id: RepoId, number: i64) -> Result<Option<PullRequest>>;

    async fn get_pr_by_id(&mut self, id: PullRequestId) -> Result<Option<PullRequest>>;

    /// Returns the existing id without inserting a duplicate row if a PR
    /// with the same `(repo_id, number)` already exists (idempotent).
    async fn add_pr(&mut self, pr: NewPullRequest) -> Result<PullRequestId>;

    /// The PR with `seq = tail_seq - 1`, i.e. the current back of the queue.
    async fn get_tail_pr(&mut self, mq_id: MergeQueueId) -> Result<Option<PullRequest>>;

    /// All enqueued PRs, ordered by `seq` ascending.
    async fn get_enqueued_prs(&mut self, mq_id: MergeQueueId) -> Result<Vec<(PullRequest, EnqueueRecord)>>;

    async fn get_enqueue_record(&mut self, pr_id: PullRequestId) -> Result<Option<EnqueueRecord>>;

    /// Scoped by repo rather than queue: the webhook events that drive this
    /// lookup (`on-ci-created`/`on-ci-finished`) carry a repo url, not a
    /// queue id.
    async fn find_enqueue_record_by_mq_commit(
        &mut self,
        repo_id: RepoId,
        mq_commit: &str,
    ) -> Result<Option<EnqueueRecord>>;

    async fn find_enqueue_record_by_ci_number(
        &mut self,
        repo_id: RepoId,
        ci_number: CiNumber,
    ) -> Result<Option<EnqueueRecord>>;

    async fn add_enqueue_record(&mut self, record: &EnqueueRecord) -> Result<()>;

    async fn save_enqueue_record(&mut self, record: &EnqueueRecord) -> Result<()>;

    async fn remove_enqueue_record(&mut self, pr_id: PullRequestId) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
