//! Hand-rolled in-memory fakes for `GitOperator`, `Store`, and
//! `VcsHostClient`, plus end-to-end Coordinator scenario tests. No mocking
//! crate is pulled in; small hand-written fixtures are favored over a
//! mocking framework here, the same way `queue.rs`'s `priority_sort` test
//! does it.

use async_trait::async_trait;
use git_operator::{Committer, CommitInfo, GitError, GitOperator, Result as GitResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use store::{
    CiNumber, EnqueueRecord, MergeQueue, MergeQueueId, NewMergeQueue, NewPullRequest, NewRepo,
    PullRequest, PullRequestId, Repo, RepoId, Seq, Store, StoreTransaction,
};
use vcs_host::{CiStatus, Result as VcsResult, VcsError, VcsHostClient};

#[derive(Clone, Debug)]
struct FakeCommit {
    message: String,
    committer: Committer,
}

/// A single global in-memory "bare mirror": branches map to commit ids,
/// commit ids map to their recorded message/committer. `Repo = ()` since
/// tests only ever exercise one repository.
pub struct FakeGitOperator {
    branches: StdMutex<HashMap<String, String>>,
    commits: StdMutex<HashMap<String, FakeCommit>>,
    conflicting_sources: StdMutex<HashSet<String>>,
    next_id: AtomicU64,
}

impl FakeGitOperator {
    pub fn new() -> Self {
        Self {
            branches: StdMutex::new(HashMap::new()),
            commits: StdMutex::new(HashMap::new()),
            conflicting_sources: StdMutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn seed_branch(&self, name: &str, commit: &str) {
        self.branches
            .lock()
            .unwrap()
            .insert(name.to_owned(), commit.to_owned());
        self.commits.lock().unwrap().entry(commit.to_owned()).or_insert(FakeCommit {
            message: format!("seed {}", commit),
            committer: Committer::new("seed", "seed@localhost"),
        });
    }

    pub fn branch_tip(&self, name: &str) -> Option<String> {
        self.branches.lock().unwrap().get(name).cloned()
    }

    pub fn mark_conflicting(&self, source_branch: &str) {
        self.conflicting_sources
            .lock()
            .unwrap()
            .insert(source_branch.to_owned());
    }

    fn fresh_commit(&self, message: &str, committer: &Committer) -> String {
        let id = format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.commits.lock().unwrap().insert(
            id.clone(),
            FakeCommit {
                message: message.to_owned(),
                committer: committer.clone(),
            },
        );
        id
    }
}

#[async_trait]
impl GitOperator for FakeGitOperator {
    type Repo = ();
    type Branch = String;
    type CommitId = String;

    async fn open_and_update(&self, _url: &str) -> GitResult<()> {
        Ok(())
    }

    async fn get_branch(&self, _repo: &(), name: &str) -> GitResult<Option<String>> {
        Ok(self
            .branches
            .lock()
            .unwrap()
            .contains_key(name)
            .then(|| name.to_owned()))
    }

    async fn get_branch_tip(&self, _repo: &(), branch: &String) -> GitResult<String> {
        self.branches
            .lock()
            .unwrap()
            .get(branch)
            .cloned()
            .ok_or_else(|| GitError::MissingBranch(branch.clone()))
    }

    async fn create_branch_at(
        &self,
        _repo: &(),
        name: &str,
        commit: &String,
        overwrite: bool,
    ) -> GitResult<String> {
        let mut branches = self.branches.lock().unwrap();
        if branches.contains_key(name) && !overwrite {
            return Err(GitError::Command(anyhow::anyhow!(
                "branch '{}' already exists",
                name
            )));
        }
        branches.insert(name.to_owned(), commit.clone());
        Ok(name.to_owned())
    }

    async fn get_commit_info(&self, _repo: &(), commit: &String) -> GitResult<CommitInfo> {
        self.commits
            .lock()
            .unwrap()
            .get(commit)
            .map(|c| CommitInfo {
                message: c.message.clone(),
                committer: c.committer.clone(),
            })
            .ok_or_else(|| GitError::Command(anyhow::anyhow!("no such commit '{}'", commit)))
    }

    async fn reset_branch_to(&self, _repo: &(), branch: &String, commit: &String) -> GitResult<()> {
        self.branches
            .lock()
            .unwrap()
            .insert(branch.clone(), commit.clone());
        Ok(())
    }

    async fn remove_branch(&self, _repo: &(), branch: &String) -> GitResult<()> {
        self.branches.lock().unwrap().remove(branch);
        Ok(())
    }

    async fn can_merge_without_conflict(
        &self,
        _repo: &(),
        _target: &String,
        source: &String,
    ) -> GitResult<bool> {
        Ok(!self.conflicting_sources.lock().unwrap().contains(source))
    }

    async fn merge(
        &self,
        _repo: &(),
        _target: &String,
        source: &String,
        message: &str,
        committer: &Committer,
        _pr_number: u64,
    ) -> GitResult<Option<String>> {
        if self.conflicting_sources.lock().unwrap().contains(source) {
            return Ok(None);
        }
        Ok(Some(self.fresh_commit(message, committer)))
    }

    async fn rebase(
        &self,
        _repo: &(),
        _target: &String,
        source: &String,
        committer: &Committer,
        _pr_number: u64,
    ) -> GitResult<Option<String>> {
        if self.conflicting_sources.lock().unwrap().contains(source) {
            return Ok(None);
        }
        Ok(Some(self.fresh_commit(&format!("rebase of {}", source), committer)))
    }

    async fn force_push(&self, _repo: &(), _branch: &String) -> GitResult<()> {
        Ok(())
    }

    async fn fast_forward_push(&self, _repo: &(), branch: &String, commit: &String) -> GitResult<()> {
        self.branches
            .lock()
            .unwrap()
            .insert(branch.clone(), commit.clone());
        Ok(())
    }

    fn parse_commit_id(&self, s: &str) -> GitResult<String> {
        Ok(s.to_owned())
    }
}

/// Host-side state a test can pre-arm (`pr_ci_status`/`ci_status` results)
/// and inspect afterwards (`comments`/`aborted`).
#[derive(Default)]
pub struct FakeVcsHostClient {
    pr_status: StdMutex<HashMap<(String, u64), CiStatus>>,
    pipeline_status: StdMutex<HashMap<(String, u64), CiStatus>>,
    pub comments: StdMutex<Vec<(String, u64, String)>>,
    pub aborted: StdMutex<Vec<(String, u64)>>,
}

impl FakeVcsHostClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pr_ci_status(&self, repo_path: &str, pr_number: u64, status: CiStatus) {
        self.pr_status
            .lock()
            .unwrap()
            .insert((repo_path.to_owned(), pr_number), status);
    }

    pub fn set_pipeline_status(&self, repo_path: &str, ci_number: u64, status: CiStatus) {
        self.pipeline_status
            .lock()
            .unwrap()
            .insert((repo_path.to_owned(), ci_number), status);
    }
}

#[async_trait]
impl VcsHostClient for FakeVcsHostClient {
    fn format_pr_number(&self, number: u64) -> String {
        format!("!{}", number)
    }

    async fn pr_ci_status(&self, repo_path: &str, pr_number: u64) -> VcsResult<CiStatus> {
        self.pr_status
            .lock()
            .unwrap()
            .get(&(repo_path.to_owned(), pr_number))
            .copied()
            .ok_or_else(|| VcsError::NotFound(format!("no ci status for pr {}", pr_number)))
    }

    async fn ci_status(&self, repo_path: &str, ci_number: u64) -> VcsResult<CiStatus> {
        self.pipeline_status
            .lock()
            .unwrap()
            .get(&(repo_path.to_owned(), ci_number))
            .copied()
            .ok_or_else(|| VcsError::NotFound(format!("no pipeline {}", ci_number)))
    }

    async fn abort_ci(&self, repo_path: &str, ci_number: u64) -> VcsResult<()> {
        self.aborted
            .lock()
            .unwrap()
            .push((repo_path.to_owned(), ci_number));
        Ok(())
    }

    async fn pr_send_comment(&self, repo_path: &str, pr_number: u64, body: &str) -> VcsResult<()> {
        self.comments
            .lock()
            .unwrap()
            .push((repo_path.to_owned(), pr_number, body.to_owned()));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Db {
    repos: HashMap<RepoId, Repo>,
    merge_queues: HashMap<MergeQueueId, MergeQueue>,
    pull_requests: HashMap<PullRequestId, PullRequest>,
    enqueue_records: HashMap<PullRequestId, EnqueueRecord>,
    next_pr_id: i64,
    next_repo_id: i64,
    next_merge_queue_id: i64,
}

/// An in-memory `Store`. `begin` snapshots the whole database into the
/// returned transaction; `commit` writes the snapshot back, `rollback`
/// discards it — approximating serializable isolation well enough for
/// single-threaded scenario tests.
pub struct FakeStore {
    db: Arc<StdMutex<Db>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            db: Arc::new(StdMutex::new(Db::default())),
        }
    }

    pub fn seed_repo(&self, repo: Repo) {
        self.db.lock().unwrap().repos.insert(repo.id, repo);
    }

    pub fn seed_merge_queue(&self, mq: MergeQueue) {
        self.db.lock().unwrap().merge_queues.insert(mq.id, mq);
    }

    pub fn merge_queue(&self, id: MergeQueueId) -> MergeQueue {
        self.db.lock().unwrap().merge_queues.get(&id).unwrap().clone()
    }

    pub fn pr_by_number(&self, repo_id: RepoId, number: i64) -> PullRequest {
        self.db
            .lock()
            .unwrap()
            .pull_requests
            .values()
            .find(|p| p.repo_id == repo_id && p.number == number)
            .unwrap()
            .clone()
    }

    pub fn enqueue_record(&self, pr_id: PullRequestId) -> Option<EnqueueRecord> {
        self.db.lock().unwrap().enqueue_records.get(&pr_id).cloned()
    }
}

pub struct FakeTx {
    shared: Arc<StdMutex<Db>>,
    local: Db,
}

#[async_trait]
impl Store for FakeStore {
    type Tx = FakeTx;

    async fn begin(&self) -> store::Result<FakeTx> {
        let local = self.db.lock().unwrap().clone();
        Ok(FakeTx {
            shared: self.db.clone(),
            local,
        })
    }
}

#[async_trait]
impl StoreTransaction for FakeTx {
    async fn get_repo_by_url(&mut self, url: &str) -> store::Result<Option<Repo>> {
        Ok(self.local.repos.values().find(|r| r.url == url).cloned())
    }

    async fn add_repo(&mut self, repo: NewRepo) -> store::Result<RepoId> {
        if let Some(existing) = self.local.repos.values().find(|r| r.url == repo.url) {
            return Ok(existing.id);
        }
        self.local.next_repo_id += 1;
        let id = RepoId(self.local.next_repo_id);
        self.local.repos.insert(
            id,
            Repo {
                id,
                display_name: repo.display_name,
                url: repo.url,
                kind: repo.kind,
                access_token: repo.access_token,
                merge_style: repo.merge_style,
            },
        );
        Ok(id)
    }

    async fn get_merge_queue_by_repo_and_branch(
        &mut self,
        repo_id: RepoId,
        target_branch: &str,
    ) -> store::Result<Option<MergeQueue>> {
        Ok(self
            .local
            .merge_queues
            .values()
            .find(|mq| mq.repo_id == repo_id && mq.target_branch == target_branch)
            .cloned())
    }

    async fn add_merge_queue(&mut self, mq: NewMergeQueue) -> store::Result<MergeQueueId> {
        if let Some(existing) = self
            .local
            .merge_queues
            .values()
            .find(|existing| existing.repo_id == mq.repo_id && existing.target_branch == mq.target_branch)
        {
            return Ok(existing.id);
        }
        self.local.next_merge_queue_id += 1;
        let id = MergeQueueId(self.local.next_merge_queue_id);
        self.local.merge_queues.insert(
            id,
            MergeQueue {
                id,
                repo_id: mq.repo_id,
                target_branch: mq.target_branch,
                working_branch: mq.working_branch,
                head_seq: Seq(0),
                tail_seq: Seq(0),
            },
        );
        Ok(id)
    }

    async fn get_merge_queue_for_pr(&mut self, pr_id: PullRequestId) -> store::Result<Option<MergeQueue>> {
        let mq_id = match self.local.pull_requests.get(&pr_id) {
            Some(pr) => pr.merge_queue_id,
            None => return Ok(None),
        };
        Ok(self.local.merge_queues.get(&mq_id).cloned())
    }

    async fn save_merge_queue(&mut self, mq: &MergeQueue) -> store::Result<()> {
        self.local.merge_queues.insert(mq.id, mq.clone());
        Ok(())
    }

    async fn get_pr(&mut self, repo_id: RepoId, number: i64) -> store::Result<Option<PullRequest>> {
        Ok(self
            .local
            .pull_requests
            .values()
            .find(|p| p.repo_id == repo_id && p.number == number)
            .cloned())
    }

    async fn get_pr_by_id(&mut self, id: PullRequestId) -> store::Result<Option<PullRequest>> {
        Ok(self.local.pull_requests.get(&id).cloned())
    }

    async fn add_pr(&mut self, pr: NewPullRequest) -> store::Result<PullRequestId> {
        if let Some(existing) = self
            .local
            .pull_requests
            .values()
            .find(|p| p.repo_id == pr.repo_id && p.number == pr.number)
        {
            return Ok(existing.id);
        }

        self.local.next_pr_id += 1;
        let id = PullRequestId(self.local.next_pr_id);
        self.local.pull_requests.insert(
            id,
            PullRequest {
                id,
                repo_id: pr.repo_id,
                merge_queue_id: pr.merge_queue_id,
                number: pr.number,
                source_branch: pr.source_branch,
                target_branch: pr.target_branch,
                priority: pr.priority,
            },
        );
        Ok(id)
    }

    async fn get_tail_pr(&mut self, mq_id: MergeQueueId) -> store::Result<Option<PullRequest>> {
        let mq = match self.local.merge_queues.get(&mq_id) {
            Some(mq) => mq.clone(),
            None => return Ok(None),
        };
        if mq.is_empty() {
            return Ok(None);
        }
        let tail_seq = mq.tail_seq.pred().unwrap();
        Ok(self
            .local
            .enqueue_records
            .values()
            .find(|r| r.seq == tail_seq)
            .and_then(|r| self.local.pull_requests.get(&r.pr_id))
            .cloned())
    }

    async fn get_enqueued_prs(
        &mut self,
        mq_id: MergeQueueId,
    ) -> store::Result<Vec<(PullRequest, EnqueueRecord)>> {
        let mut pairs: Vec<(PullRequest, EnqueueRecord)> = self
            .local
            .enqueue_records
            .values()
            .filter_map(|rec| {
                self.local
                    .pull_requests
                    .get(&rec.pr_id)
                    .filter(|pr| pr.merge_queue_id == mq_id)
                    .map(|pr| (pr.clone(), rec.clone()))
            })
            .collect();
        pairs.sort_by_key(|(_, rec)| rec.seq);
        Ok(pairs)
    }

    async fn get_enqueue_record(&mut self, pr_id: PullRequestId) -> store::Result<Option<EnqueueRecord>> {
        Ok(self.local.enqueue_records.get(&pr_id).cloned())
    }

    async fn find_enqueue_record_by_mq_commit(
        &mut self,
        repo_id: RepoId,
        mq_commit: &str,
    ) -> store::Result<Option<EnqueueRecord>> {
        Ok(self
            .local
            .enqueue_records
            .values()
            .find(|r| {
                r.mq_commit == mq_commit
                    && self
                        .local
                        .pull_requests
                        .get(&r.pr_id)
                        .map_or(false, |pr| pr.repo_id == repo_id)
            })
            .cloned())
    }

    async fn find_enqueue_record_by_ci_number(
        &mut self,
        repo_id: RepoId,
        ci_number: CiNumber,
    ) -> store::Result<Option<EnqueueRecord>> {
        Ok(self
            .local
            .enqueue_records
            .values()
            .find(|r| {
                r.ci_number == Some(ci_number)
                    && self
                        .local
                        .pull_requests
                        .get(&r.pr_id)
                        .map_or(false, |pr| pr.repo_id == repo_id)
            })
            .cloned())
    }

    async fn add_enqueue_record(&mut self, record: &EnqueueRecord) -> store::Result<()> {
        self.local.enqueue_records.insert(record.pr_id, record.clone());
        Ok(())
    }

    async fn save_enqueue_record(&mut self, record: &EnqueueRecord) -> store::Result<()> {
        self.local.enqueue_records.insert(record.pr_id, record.clone());
        Ok(())
    }

    async fn remove_enqueue_record(&mut self, pr_id: PullRequestId) -> store::Result<()> {
        self.local.enqueue_records.remove(&pr_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> store::Result<()> {
        *self.shared.lock().unwrap() = self.local;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> store::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coordinator;
    use crate::Error;
    use store::{MergeQueue, MergeStyle, PullRequestId, Repo, RepoId, RepoKind, Seq};

    const REPO_URL: &str = "https://gitlab.example.com/acme/widgets.git";
    const REPO_PATH: &str = "acme/widgets";

    fn fixture() -> (FakeStore, FakeGitOperator, FakeVcsHostClient, RepoId, MergeQueueId) {
        let store = FakeStore::new();
        let git = FakeGitOperator::new();
        let vcs = FakeVcsHostClient::new();

        let repo_id = RepoId(1);
        let mq_id = MergeQueueId(1);

        store.seed_repo(Repo {
            id: repo_id,
            display_name: "widgets".into(),
            url: REPO_URL.into(),
            kind: RepoKind::GitLab,
            access_token: None,
            merge_style: MergeStyle::Merge,
        });
        store.seed_merge_queue(MergeQueue {
            id: mq_id,
            repo_id,
            target_branch: "main".into(),
            working_branch: "mq-main".into(),
            head_seq: Seq(0),
            tail_seq: Seq(0),
        });

        git.seed_branch("main", "base");
        git.seed_branch("mq-main", "base");

        (store, git, vcs, repo_id, mq_id)
    }

    async fn open_pr(
        coordinator: &Coordinator<FakeGitOperator, FakeStore, FakeVcsHostClient>,
        number: u64,
        priority: i64,
        source_branch: &str,
    ) {
        coordinator
            .on_pr_opened(REPO_URL, number, priority, source_branch, "main")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn plain_merge_fast_forwards_target_on_ci_success() {
        let (store, git, vcs, repo_id, mq_id) = fixture();
        git.seed_branch("feature-1", "src1");
        vcs.set_pr_ci_status(REPO_PATH, 1, CiStatus::Passed);

        let coordinator = Coordinator::new(git, store, vcs);
        open_pr(&coordinator, 1, 0, "feature-1").await;

        coordinator
            .on_enqueue_request(REPO_URL, 1, Committer::new("alice", "alice@example.com"))
            .await
            .unwrap();

        let pr_id = PullRequestId(1);
        let record = coordinator.store.enqueue_record(pr_id).expect("enqueued");
        let mq_commit = record.mq_commit.clone();

        coordinator
            .on_ci_created(REPO_URL, 42, &mq_commit)
            .await
            .unwrap();
        coordinator.on_ci_finished(REPO_URL, 42, true).await.unwrap();

        assert_eq!(coordinator.git.branch_tip("main"), Some(mq_commit));
        assert!(coordinator.store.enqueue_record(pr_id).is_none());
        assert_eq!(coordinator.store.merge_queue(mq_id).head_seq, Seq(1));
    }

    #[tokio::test]
    async fn conflicting_merge_is_rejected_and_leaves_no_record() {
        let (store, git, vcs, _repo_id, _mq_id) = fixture();
        git.seed_branch("feature-1", "src1");
        git.mark_conflicting("feature-1");
        vcs.set_pr_ci_status(REPO_PATH, 1, CiStatus::Passed);

        let coordinator = Coordinator::new(git, store, vcs);
        open_pr(&coordinator, 1, 0, "feature-1").await;

        let err = coordinator
            .on_enqueue_request(REPO_URL, 1, Committer::new("alice", "alice@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MergeConflict));
        assert!(coordinator.store.enqueue_record(PullRequestId(1)).is_none());
        assert_eq!(coordinator.vcs_host.comments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn single_pr_ci_failure_resets_working_branch_to_target() {
        let (store, git, vcs, _repo_id, mq_id) = fixture();
        git.seed_branch("feature-1", "src1");
        vcs.set_pr_ci_status(REPO_PATH, 1, CiStatus::Passed);

        let coordinator = Coordinator::new(git, store, vcs);
        open_pr(&coordinator, 1, 0, "feature-1").await;
        coordinator
            .on_enqueue_request(REPO_URL, 1, Committer::new("alice", "alice@example.com"))
            .await
            .unwrap();

        let pr_id = PullRequestId(1);
        let record = coordinator.store.enqueue_record(pr_id).unwrap();
        coordinator
            .on_ci_created(REPO_URL, 7, &record.mq_commit)
            .await
            .unwrap();
        coordinator.on_ci_finished(REPO_URL, 7, false).await.unwrap();

        assert!(coordinator.store.enqueue_record(pr_id).is_none());
        assert_eq!(coordinator.git.branch_tip("mq-main"), Some("base".to_owned()));
        assert_eq!(coordinator.store.merge_queue(mq_id).tail_seq, Seq(0));
    }

    #[tokio::test]
    async fn failure_with_two_enqueued_rebuilds_the_remainder() {
        let (store, git, vcs, _repo_id, mq_id) = fixture();
        git.seed_branch("feature-1", "src1");
        git.seed_branch("feature-2", "src2");
        vcs.set_pr_ci_status(REPO_PATH, 1, CiStatus::Passed);
        vcs.set_pr_ci_status(REPO_PATH, 2, CiStatus::Passed);

        let coordinator = Coordinator::new(git, store, vcs);
        open_pr(&coordinator, 1, 0, "feature-1").await;
        open_pr(&coordinator, 2, 0, "feature-2").await;

        let committer = Committer::new("alice", "alice@example.com");
        coordinator.on_enqueue_request(REPO_URL, 1, committer.clone()).await.unwrap();
        coordinator.on_enqueue_request(REPO_URL, 2, committer).await.unwrap();

        let pr1 = PullRequestId(1);
        let pr2 = PullRequestId(2);
        let rec1 = coordinator.store.enqueue_record(pr1).unwrap();
        let rec2 = coordinator.store.enqueue_record(pr2).unwrap();
        coordinator.on_ci_created(REPO_URL, 1, &rec1.mq_commit).await.unwrap();
        coordinator.on_ci_created(REPO_URL, 2, &rec2.mq_commit).await.unwrap();

        coordinator.on_ci_finished(REPO_URL, 1, false).await.unwrap();

        assert!(coordinator.store.enqueue_record(pr1).is_none());
        let rebuilt = coordinator
            .store
            .enqueue_record(pr2)
            .expect("pr2 survives the rebuild");
        assert_ne!(rebuilt.mq_commit, rec2.mq_commit);
        assert_eq!(rebuilt.seq, Seq(0));
        assert_eq!(coordinator.store.merge_queue(mq_id).tail_seq, Seq(1));
    }

    #[tokio::test]
    async fn out_of_order_ci_success_waits_for_the_head_to_finish() {
        let (store, git, vcs, _repo_id, mq_id) = fixture();
        git.seed_branch("feature-1", "src1");
        git.seed_branch("feature-2", "src2");
        vcs.set_pr_ci_status(REPO_PATH, 1, CiStatus::Passed);
        vcs.set_pr_ci_status(REPO_PATH, 2, CiStatus::Passed);

        let coordinator = Coordinator::new(git, store, vcs);
        open_pr(&coordinator, 1, 0, "feature-1").await;
        open_pr(&coordinator, 2, 0, "feature-2").await;

        let committer = Committer::new("alice", "alice@example.com");
        coordinator.on_enqueue_request(REPO_URL, 1, committer.clone()).await.unwrap();
        coordinator.on_enqueue_request(REPO_URL, 2, committer).await.unwrap();

        let rec1 = coordinator.store.enqueue_record(PullRequestId(1)).unwrap();
        let rec2 = coordinator.store.enqueue_record(PullRequestId(2)).unwrap();
        coordinator.on_ci_created(REPO_URL, 100, &rec1.mq_commit).await.unwrap();
        coordinator.on_ci_created(REPO_URL, 101, &rec2.mq_commit).await.unwrap();

        coordinator.on_ci_finished(REPO_URL, 101, true).await.unwrap();

        // pr #1 (the head) never got its own ci-finished, so nothing dequeues yet.
        assert!(coordinator.store.enqueue_record(PullRequestId(1)).is_some());
        assert!(coordinator.store.enqueue_record(PullRequestId(2)).is_some());
        assert_eq!(coordinator.store.merge_queue(mq_id).head_seq, Seq(0));

        coordinator.on_ci_finished(REPO_URL, 100, true).await.unwrap();

        // pr #1 finishing last still unblocks the whole passing prefix in one step.
        assert_eq!(coordinator.git.branch_tip("main"), Some(rec2.mq_commit));
        assert!(coordinator.store.enqueue_record(PullRequestId(1)).is_none());
        assert!(coordinator.store.enqueue_record(PullRequestId(2)).is_none());
        let mq = coordinator.store.merge_queue(mq_id);
        assert_eq!(mq.head_seq, Seq(2));
        assert_eq!(mq.tail_seq, Seq(2));
    }

    #[tokio::test]
    async fn higher_priority_enqueue_rebuilds_ahead_of_the_existing_tail() {
        let (store, git, vcs, _repo_id, mq_id) = fixture();
        git.seed_branch("feature-low", "src-low");
        git.seed_branch("feature-high", "src-high");
        vcs.set_pr_ci_status(REPO_PATH, 1, CiStatus::Passed);
        vcs.set_pr_ci_status(REPO_PATH, 2, CiStatus::Passed);

        let coordinator = Coordinator::new(git, store, vcs);
        open_pr(&coordinator, 1, 0, "feature-low").await;
        open_pr(&coordinator, 2, 10, "feature-high").await;

        let committer = Committer::new("alice", "alice@example.com");
        coordinator.on_enqueue_request(REPO_URL, 1, committer.clone()).await.unwrap();
        coordinator.on_enqueue_request(REPO_URL, 2, committer).await.unwrap();

        let rec_high = coordinator.store.enqueue_record(PullRequestId(2)).unwrap();
        let rec_low = coordinator.store.enqueue_record(PullRequestId(1)).unwrap();
        assert_eq!(rec_high.seq, Seq(0));
        assert_eq!(rec_low.seq, Seq(1));
        assert_eq!(coordinator.store.merge_queue(mq_id).tail_seq, Seq(2));
    }
}
