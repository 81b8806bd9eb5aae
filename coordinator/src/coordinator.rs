//! The Queue Coordinator state machine. Holds no mutable state of its own
//! beyond a pair of in-process advisory lock registries; every public
//! method consumes one event end-to-end inside a single Store transaction,
//! driving the Git Operator and VCS Host Client collaborators as needed.
//! Shaped after `bors::queue::MergeQueue`, reworked from its single "auto"
//! branch, one-PR-at-a-time algorithm into a multi-PR speculative chain.

use git_operator::{Committer, GitError, GitOperator, MergeOutcome};
use log::{info, warn};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex};
use store::{
    CiNumber, EnqueueRecord, MergeQueue, MergeQueueId, MergeStyle as StoreMergeStyle,
    NewPullRequest, PullRequest, PullRequestId, Repo, RepoId, Store, StoreTransaction,
};
use vcs_host::{CiStatus, VcsHostClient};

use crate::error::{Error, Result};

fn to_git_style(style: StoreMergeStyle) -> git_operator::MergeStyle {
    match style {
        StoreMergeStyle::Merge => git_operator::MergeStyle::Merge,
        StoreMergeStyle::Linear => git_operator::MergeStyle::Linear,
        StoreMergeStyle::SemiLinear => git_operator::MergeStyle::SemiLinear,
    }
}

/// The path/identifier a `VcsHostClient` expects, derived from a repo's
/// clone url (`https://gitlab.example.com/group/project.git` -> `group/project`).
fn project_path(url: &str) -> String {
    let without_scheme = url.splitn(2, "://").last().unwrap_or(url);
    let path = without_scheme.splitn(2, '/').nth(1).unwrap_or(without_scheme);
    path.strip_suffix(".git").unwrap_or(path).to_owned()
}

/// A registry of `tokio::sync::Mutex`es keyed by an arbitrary id, handed
/// out as owned guards so they can be held across `.await` points for the
/// duration of one event: a per-queue lock over optimistic
/// serialisable-isolation retries.
struct LockRegistry<K> {
    locks: StdMutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> LockRegistry<K> {
    fn new() -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, key: K) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }
}

/// The Queue Coordinator, generic over its three collaborators. Safe to
/// construct fresh per event, or share across events — it carries no state
/// beyond the lock registries.
pub struct Coordinator<G, S, V> {
    pub(crate) git: G,
    pub(crate) store: S,
    pub(crate) vcs_host: V,
    queue_locks: LockRegistry<MergeQueueId>,
    repo_locks: LockRegistry<RepoId>,
}

impl<G, S, V> Coordinator<G, S, V>
where
    G: GitOperator,
    S: Store,
    V: VcsHostClient,
{
    pub fn new(git: G, store: S, vcs_host: V) -> Self {
        Self {
            git,
            store,
            vcs_host,
            queue_locks: LockRegistry::new(),
            repo_locks: LockRegistry::new(),
        }
    }

    async fn resolve_repo(&self, repo_url: &str) -> Result<Option<Repo>> {
        let mut tx = self.store.begin().await?;
        let repo = tx.get_repo_by_url(repo_url).await?;
        Box::new(tx).rollback().await?;
        Ok(repo)
    }

    async fn resolve_mq_for_pr(
        &self,
        repo_id: RepoId,
        pr_number: i64,
    ) -> Result<Option<(PullRequest, MergeQueue)>> {
        let mut tx = self.store.begin().await?;
        let found = match tx.get_pr(repo_id, pr_number).await? {
            Some(pr) => tx
                .get_merge_queue_for_pr(pr.id)
                .await?
                .map(|mq| (pr, mq)),
            None => None,
        };
        Box::new(tx).rollback().await?;
        Ok(found)
    }

    /// Inserts a PR with no enqueue-record; silently drops if the repo has
    /// no queue for this target branch. Idempotent by (repo, number).
    pub async fn on_pr_opened(
        &self,
        repo_url: &str,
        pr_number: u64,
        priority: i64,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<()> {
        let repo = match self.resolve_repo(repo_url).await? {
            Some(repo) => repo,
            None => {
                info!("on-pr-opened for unknown repo '{}', dropping", repo_url);
                return Ok(());
            }
        };

        let _repo_guard = self.repo_locks.lock(repo.id).await;

        let mut tx = self.store.begin().await?;

        let mq = match tx
            .get_merge_queue_by_repo_and_branch(repo.id, target_branch)
            .await?
        {
            Some(mq) => mq,
            None => {
                Box::new(tx).rollback().await?;
                info!(
                    "no merge queue for {}@{}, dropping pr-opened",
                    repo_url, target_branch
                );
                return Ok(());
            }
        };

        let new_pr = NewPullRequest {
            repo_id: repo.id,
            merge_queue_id: mq.id,
            number: pr_number as i64,
            source_branch: source_branch.to_owned(),
            target_branch: target_branch.to_owned(),
            priority,
        };
        tx.add_pr(new_pr).await?;

        Box::new(tx).commit().await?;
        Ok(())
    }

    /// Checks preconditions, then inserts via the fast or slow path.
    pub async fn on_enqueue_request(
        &self,
        repo_url: &str,
        pr_number: u64,
        committer: Committer,
    ) -> Result<()> {
        let repo = self
            .resolve_repo(repo_url)
            .await?
            .ok_or_else(|| Error::NotFound(repo_url.to_owned()))?;
        let (pr, _mq) = self
            .resolve_mq_for_pr(repo.id, pr_number as i64)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pr #{} on {}", pr_number, repo_url)))?;

        let _queue_guard = self.queue_locks.lock(pr.merge_queue_id).await;
        let _repo_guard = self.repo_locks.lock(repo.id).await;

        let git_repo = self.git.open_and_update(repo_url).await?;

        let mut tx = self.store.begin().await?;
        let outcome = self
            .try_enqueue(&mut tx, &git_repo, &repo, pr.id, &committer)
            .await;

        match outcome {
            Ok(EnqueueOutcome::Enqueued) => {
                Box::new(tx).commit().await?;
                Ok(())
            }
            Ok(EnqueueOutcome::Conflict) => {
                // Any rebuild mutations to *other* PRs are still valid and
                // must survive; only the caller's own request failed.
                Box::new(tx).commit().await?;
                Err(Error::MergeConflict)
            }
            Err(e) => {
                Box::new(tx).rollback().await?;
                Err(e)
            }
        }
    }

    async fn try_enqueue(
        &self,
        tx: &mut S::Tx,
        git_repo: &G::Repo,
        repo: &Repo,
        pr_id: PullRequestId,
        committer: &Committer,
    ) -> Result<EnqueueOutcome> {
        let pr = tx
            .get_pr_by_id(pr_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pr {}", pr_id)))?;

        if tx.get_enqueue_record(pr.id).await?.is_some() {
            return Err(Error::AlreadyEnqueued);
        }

        let repo_path = project_path(&repo.url);
        match self
            .vcs_host
            .pr_ci_status(&repo_path, pr.number as u64)
            .await?
        {
            CiStatus::Passed => {}
            CiStatus::Failed => return Err(Error::CIFailed),
            CiStatus::NotFinished => return Err(Error::CIStillRunning),
        }

        let mut mq = tx
            .get_merge_queue_for_pr(pr.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("merge queue for pr {}", pr_id)))?;

        let style = to_git_style(repo.merge_style);
        let tail_pr = tx.get_tail_pr(mq.id).await?;
        let fast_path = match &tail_pr {
            None => true,
            Some(tail) => tail.priority >= pr.priority,
        };

        if fast_path {
            let message = format!(
                "Merge {} into {} ({})",
                pr.source_branch,
                mq.working_branch,
                self.vcs_host.format_pr_number(pr.number as u64)
            );

            match self
                .speculative_merge(
                    git_repo,
                    style,
                    &mq.working_branch,
                    &pr.source_branch,
                    &message,
                    committer,
                    pr.number as u64,
                )
                .await?
            {
                Some(commit) => {
                    let seq = mq.tail_seq;
                    let record = EnqueueRecord::new(
                        pr.id,
                        seq,
                        mq.working_branch.clone(),
                        commit.to_string(),
                    );
                    tx.add_enqueue_record(&record).await?;
                    mq.tail_seq = seq.succ();
                    tx.save_merge_queue(&mq).await?;
                    Ok(EnqueueOutcome::Enqueued)
                }
                None => {
                    let _ = self
                        .vcs_host
                        .pr_send_comment(&repo_path, pr.number as u64, "Merge Conflict")
                        .await;
                    Ok(EnqueueOutcome::Conflict)
                }
            }
        } else {
            let enqueued = tx.get_enqueued_prs(mq.id).await?;
            let idx = enqueued.iter().position(|(p, _)| p.priority < pr.priority);

            let (anchor, suffix) = match idx {
                Some(0) => (None, enqueued),
                Some(i) => {
                    let anchor = enqueued[i - 1].1.clone();
                    (Some(anchor), enqueued[i..].to_vec())
                }
                None => (enqueued.last().map(|(_, r)| r.clone()), Vec::new()),
            };

            for (stale_pr, rec) in &suffix {
                if !rec.finished {
                    if let Some(stale_ci) = rec.ci_number {
                        if let Err(e) = self.vcs_host.abort_ci(&repo_path, stale_ci.0 as u64).await {
                            warn!(
                                "failed to abort stale pipeline {} for pr #{}: {}",
                                stale_ci.0, stale_pr.number, e
                            );
                        }
                    }
                }
            }

            let mut items: Vec<(PullRequest, Option<EnqueueRecord>)> =
                Vec::with_capacity(suffix.len() + 1);
            items.push((pr.clone(), None));
            items.extend(suffix.into_iter().map(|(p, r)| (p, Some(r))));

            let failed = self
                .rebuild(git_repo, repo, tx, &mut mq, anchor.as_ref(), items, committer)
                .await?;

            for p in &failed {
                if p.id != pr.id {
                    let _ = self
                        .vcs_host
                        .pr_send_comment(&repo_path, p.number as u64, "Merge Conflict during queue rebuild")
                        .await;
                }
            }

            if failed.iter().any(|p| p.id == pr.id) {
                Ok(EnqueueOutcome::Conflict)
            } else {
                Ok(EnqueueOutcome::Enqueued)
            }
        }
    }

    /// Idempotent by commit; unrelated commits are silently dropped.
    pub async fn on_ci_created(
        &self,
        repo_url: &str,
        ci_number: u64,
        associated_commit: &str,
    ) -> Result<()> {
        let repo = match self.resolve_repo(repo_url).await? {
            Some(repo) => repo,
            None => return Ok(()),
        };

        let _repo_guard = self.repo_locks.lock(repo.id).await;

        let mut tx = self.store.begin().await?;
        let mut record = match tx
            .find_enqueue_record_by_mq_commit(repo.id, associated_commit)
            .await?
        {
            Some(record) => record,
            None => {
                Box::new(tx).rollback().await?;
                return Ok(());
            }
        };

        record.ci_number = Some(CiNumber(ci_number as i64));
        record.finished = false;
        record.passed = false;
        tx.save_enqueue_record(&record).await?;

        Box::new(tx).commit().await?;
        Ok(())
    }

    /// Success triggers head-dequeue of the longest passing prefix; failure
    /// drops the record and rebuilds the remainder of the queue.
    pub async fn on_ci_finished(&self, repo_url: &str, ci_number: u64, success: bool) -> Result<()> {
        let repo = match self.resolve_repo(repo_url).await? {
            Some(repo) => repo,
            None => return Ok(()),
        };

        let _repo_guard = self.repo_locks.lock(repo.id).await;

        let git_repo = self.git.open_and_update(repo_url).await?;

        let mut tx = self.store.begin().await?;
        let result = self
            .handle_ci_finished(&mut tx, &git_repo, &repo, ci_number, success)
            .await;

        match result {
            Ok(()) => {
                Box::new(tx).commit().await?;
                Ok(())
            }
            Err(e) => {
                Box::new(tx).rollback().await?;
                Err(e)
            }
        }
    }

    async fn handle_ci_finished(
        &self,
        tx: &mut S::Tx,
        git_repo: &G::Repo,
        repo: &Repo,
        ci_number: u64,
        success: bool,
    ) -> Result<()> {
        let mut record = match tx
            .find_enqueue_record_by_ci_number(repo.id, CiNumber(ci_number as i64))
            .await?
        {
            Some(record) => record,
            None => return Ok(()),
        };

        let mut mq = tx
            .get_merge_queue_for_pr(record.pr_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("merge queue for pr {}", record.pr_id)))?;

        if success {
            record.finished = true;
            record.passed = true;
            tx.save_enqueue_record(&record).await?;

            let enqueued = tx.get_enqueued_prs(mq.id).await?;
            let mut dequeue_through: Option<EnqueueRecord> = None;
            for (_pr, rec) in &enqueued {
                if rec.finished && rec.passed {
                    dequeue_through = Some(rec.clone());
                } else {
                    break;
                }
            }

            if let Some(last) = dequeue_through {
                let target = self
                    .git
                    .get_branch(git_repo, &mq.target_branch)
                    .await?
                    .ok_or_else(|| Error::Git(GitError::MissingBranch(mq.target_branch.clone())))?;
                let commit = self.git.parse_commit_id(&last.mq_commit)?;
                self.git.fast_forward_push(git_repo, &target, &commit).await?;

                for (pr, rec) in &enqueued {
                    if rec.seq <= last.seq {
                        tx.remove_enqueue_record(pr.id).await?;
                    } else {
                        break;
                    }
                }

                mq.head_seq = last.seq.succ();
                tx.save_merge_queue(&mq).await?;
                info!(
                    "{}@{} advanced to {}",
                    repo.url, mq.target_branch, last.mq_commit
                );
            }

            Ok(())
        } else {
            record.finished = true;
            record.passed = false;

            let all_enqueued = tx.get_enqueued_prs(mq.id).await?;
            let idx = all_enqueued.iter().position(|(_, r)| r.seq == record.seq);

            let repo_path = project_path(&repo.url);
            if let Some(i) = idx {
                for (pr, rec) in &all_enqueued[i + 1..] {
                    if !rec.finished {
                        if let Some(stale_ci) = rec.ci_number {
                            if let Err(e) = self.vcs_host.abort_ci(&repo_path, stale_ci.0 as u64).await
                            {
                                warn!(
                                    "failed to abort stale pipeline {} for pr #{}: {}",
                                    stale_ci.0, pr.number, e
                                );
                            }
                        }
                    }
                }
            }

            tx.remove_enqueue_record(record.pr_id).await?;

            let failing_pr = tx
                .get_pr_by_id(record.pr_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("pr {}", record.pr_id)))?;
            let _ = self
                .vcs_host
                .pr_send_comment(&repo_path, failing_pr.number as u64, "CI Failed")
                .await;

            let (anchor, suffix) = match idx {
                Some(0) => (None, all_enqueued[1..].to_vec()),
                Some(i) => (
                    Some(all_enqueued[i - 1].1.clone()),
                    all_enqueued[i + 1..].to_vec(),
                ),
                None => (None, Vec::new()),
            };

            let items: Vec<(PullRequest, Option<EnqueueRecord>)> =
                suffix.into_iter().map(|(p, r)| (p, Some(r))).collect();

            let fallback_committer = Committer::new("merge-queue", "merge-queue@localhost");
            let failed = self
                .rebuild(git_repo, repo, tx, &mut mq, anchor.as_ref(), items, &fallback_committer)
                .await?;

            for p in &failed {
                let _ = self
                    .vcs_host
                    .pr_send_comment(&repo_path, p.number as u64, "Merge Conflict during queue rebuild")
                    .await;
            }

            Ok(())
        }
    }

    /// The speculative merge (append) primitive. Returns `None` on conflict
    /// rather than erroring, so callers can decide how to react (abort the
    /// triggering request, or collect into a rebuild's `failed` list).
    async fn speculative_merge(
        &self,
        git_repo: &G::Repo,
        style: git_operator::MergeStyle,
        working_branch: &str,
        source_branch: &str,
        message: &str,
        committer: &Committer,
        pr_number: u64,
    ) -> Result<Option<G::CommitId>> {
        let w = self
            .git
            .get_branch(git_repo, working_branch)
            .await?
            .ok_or_else(|| Error::Git(GitError::MissingBranch(working_branch.to_owned())))?;
        let s = self
            .git
            .get_branch(git_repo, source_branch)
            .await?
            .ok_or_else(|| Error::Git(GitError::MissingBranch(source_branch.to_owned())))?;

        if !self.git.can_merge_without_conflict(git_repo, &w, &s).await? {
            return Ok(None);
        }

        match self
            .git
            .perform_merge(git_repo, style, &w, &s, message, committer, pr_number)
            .await?
        {
            MergeOutcome::Merged(commit) => {
                self.git.reset_branch_to(git_repo, &w, &commit).await?;
                self.git.force_push(git_repo, &w).await?;
                Ok(Some(commit))
            }
            MergeOutcome::Conflict => Ok(None),
        }
    }

    /// Tears down and replays a suffix of the queue from `anchor` (or the
    /// target branch tip if none). `items` pairs each PR to re-enqueue with
    /// its prior enqueue-record, if it had one — the new PR being inserted
    /// on the slow path supplies `None`.
    async fn rebuild(
        &self,
        git_repo: &G::Repo,
        repo: &Repo,
        tx: &mut S::Tx,
        mq: &mut MergeQueue,
        anchor: Option<&EnqueueRecord>,
        items: Vec<(PullRequest, Option<EnqueueRecord>)>,
        fallback_committer: &Committer,
    ) -> Result<Vec<PullRequest>> {
        let style = to_git_style(repo.merge_style);

        let base_commit = match anchor {
            Some(a) => self.git.parse_commit_id(&a.mq_commit)?,
            None => {
                let target = self
                    .git
                    .get_branch(git_repo, &mq.target_branch)
                    .await?
                    .ok_or_else(|| Error::Git(GitError::MissingBranch(mq.target_branch.clone())))?;
                self.git.get_branch_tip(git_repo, &target).await?
            }
        };

        self.git
            .create_branch_at(git_repo, &mq.working_branch, &base_commit, true)
            .await?;

        let mut seq = anchor.map(|a| a.seq.succ()).unwrap_or(mq.head_seq);
        let mut failed = Vec::new();

        for (pr, prior_record) in items {
            if prior_record.is_some() {
                tx.remove_enqueue_record(pr.id).await?;
            }

            let (message, committer) = match &prior_record {
                Some(record) => {
                    let old_commit = self.git.parse_commit_id(&record.mq_commit)?;
                    let info = self.git.get_commit_info(git_repo, &old_commit).await?;
                    (info.message, info.committer)
                }
                None => (
                    format!(
                        "Merge {} into {} ({})",
                        pr.source_branch,
                        mq.working_branch,
                        self.vcs_host.format_pr_number(pr.number as u64)
                    ),
                    fallback_committer.clone(),
                ),
            };

            match self
                .speculative_merge(
                    git_repo,
                    style,
                    &mq.working_branch,
                    &pr.source_branch,
                    &message,
                    &committer,
                    pr.number as u64,
                )
                .await?
            {
                Some(commit) => {
                    let record = EnqueueRecord::new(
                        pr.id,
                        seq,
                        mq.working_branch.clone(),
                        commit.to_string(),
                    );
                    tx.add_enqueue_record(&record).await?;
                    seq = seq.succ();
                }
                None => failed.push(pr),
            }
        }

        mq.tail_seq = seq;
        tx.save_merge_queue(mq).await?;

        Ok(failed)
    }
}

enum EnqueueOutcome {
    Enqueued,
    Conflict,
}
