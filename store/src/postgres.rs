//! PostgreSQL-backed [`Store`], grounded in the `sqlx::PgPool` store used by
//! `other_examples`'s merge-queue implementation (its `#[sqlx::test]`-backed
//! suite is the model for this crate's own tests).

use crate::models::{
    CiNumber, EnqueueRecord, MergeQueue, MergeQueueId, MergeStyle, NewMergeQueue, NewPullRequest,
    NewRepo, PullRequest, PullRequestId, Repo, RepoId, RepoKind, Seq,
};
use crate::{Result, Store, StoreError, StoreTransaction};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Db(sqlx::Error::Migrate(Box::new(e))))
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PgTransaction { tx })
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

fn repo_kind_of(s: &str) -> RepoKind {
    s.parse().unwrap_or(RepoKind::GitLab)
}

fn merge_style_of(s: &str) -> MergeStyle {
    s.parse().unwrap_or(MergeStyle::Merge)
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn get_repo_by_url(&mut self, url: &str) -> Result<Option<Repo>> {
        let row = sqlx::query(
            "SELECT id, display_name, url, kind, access_token, merge_style \
             FROM repos WHERE url = $1",
        )
        .bind(url)
        .fetch_optional(&mut self.tx)
        .await?;

        Ok(row.map(|row| Repo {
            id: RepoId(row.get("id")),
            display_name: row.get("display_name"),
            url: row.get("url"),
            kind: repo_kind_of(row.get::<String, _>("kind").as_str()),
            access_token: row.get("access_token"),
            merge_style: merge_style_of(row.get::<String, _>("merge_style").as_str()),
        }))
    }

    async fn add_repo(&mut self, repo: NewRepo) -> Result<RepoId> {
        let row = sqlx::query(
            "INSERT INTO repos (display_name, url, kind, access_token, merge_style) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (url) DO UPDATE SET url = EXCLUDED.url \
             RETURNING id",
        )
        .bind(&repo.display_name)
        .bind(&repo.url)
        .bind(repo.kind.to_string())
        .bind(&repo.access_token)
        .bind(repo.merge_style.to_string())
        .fetch_one(&mut self.tx)
        .await?;
        Ok(RepoId(row.get("id")))
    }

    async fn get_merge_queue_by_repo_and_branch(
        &mut self,
        repo_id: RepoId,
        target_branch: &str,
    ) -> Result<Option<MergeQueue>> {
        let row = sqlx::query(
            "SELECT id, repo_id, target_branch, working_branch, head_seq, tail_seq \
             FROM merge_queues WHERE repo_id = $1 AND target_branch = $2",
        )
        .bind(repo_id.0)
        .bind(target_branch)
        .fetch_optional(&mut self.tx)
        .await?;

        Ok(row.as_ref().map(row_to_merge_queue))
    }

    async fn get_merge_queue_for_pr(&mut self, pr_id: PullRequestId) -> Result<Option<MergeQueue>> {
        let row = sqlx::query(
            "SELECT mq.id, mq.repo_id, mq.target_branch, mq.working_branch, mq.head_seq, mq.tail_seq \
             FROM merge_queues mq JOIN pull_requests pr ON pr.merge_queue_id = mq.id \
             WHERE pr.id = $1",
        )
        .bind(pr_id.0)
        .fetch_optional(&mut self.tx)
        .await?;

        Ok(row.as_ref().map(row_to_merge_queue))
    }

    async fn add_merge_queue(&mut self, mq: NewMergeQueue) -> Result<MergeQueueId> {
        let row = sqlx::query(
            "INSERT INTO merge_queues (repo_id, target_branch, working_branch, head_seq, tail_seq) \
             VALUES ($1, $2, $3, 0, 0) \
             ON CONFLICT (repo_id, target_branch) \
             DO UPDATE SET target_branch = EXCLUDED.target_branch \
             RETURNING id",
        )
        .bind(mq.repo_id.0)
        .bind(&mq.target_branch)
        .bind(&mq.working_branch)
        .fetch_one(&mut self.tx)
        .await?;
        Ok(MergeQueueId(row.get("id")))
    }

    async fn save_merge_queue(&mut self, mq: &MergeQueue) -> Result<()> {
        sqlx::query(
            "UPDATE merge_queues SET target_branch = $2, working_branch = $3, \
             head_seq = $4, tail_seq = $5 WHERE id = $1",
        )
        .bind(mq.id.0)
        .bind(&mq.target_branch)
        .bind(&mq.working_branch)
        .bind(mq.head_seq.0)
        .bind(mq.tail_seq.0)
        .execute(&mut self.tx)
        .await?;
        Ok(())
    }

    async fn get_pr(&mut self, repo_id: RepoId, number: i64) -> Result<Option<PullRequest>> {
        let row = sqlx::query(
            "SELECT id, repo_id, merge_queue_id, number, source_branch, target_branch, priority \
             FROM pull_requests WHERE repo_id = $1 AND number = $2",
        )
        .bind(repo_id.0)
        .bind(number)
        .fetch_optional(&mut self.tx)
        .await?;

        Ok(row.as_ref().map(row_to_pull_request))
    }

    async fn get_pr_by_id(&mut self, id: PullRequestId) -> Result<Option<PullRequest>> {
        let row = sqlx::query(
            "SELECT id, repo_id, merge_queue_id, number, source_branch, target_branch, priority \
             FROM pull_requests WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&mut self.tx)
        .await?;

        Ok(row.as_ref().map(row_to_pull_request))
    }

    async fn add_pr(&mut self, pr: NewPullRequest) -> Result<PullRequestId> {
        let row = sqlx::query(
            "INSERT INTO pull_requests \
             (repo_id, merge_queue_id, number, source_branch, target_branch, priority) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (repo_id, number) DO UPDATE SET repo_id = EXCLUDED.repo_id \
             RETURNING id",
        )
        .bind(pr.repo_id.0)
        .bind(pr.merge_queue_id.0)
        .bind(pr.number)
        .bind(&pr.source_branch)
        .bind(&pr.target_branch)
        .bind(pr.priority)
        .fetch_one(&mut self.tx)
        .await?;
        Ok(PullRequestId(row.get("id")))
    }

    async fn get_tail_pr(&mut self, mq_id: MergeQueueId) -> Result<Option<PullRequest>> {
        let row = sqlx::query(
            "SELECT pr.id, pr.repo_id, pr.merge_queue_id, pr.number, pr.source_branch, \
                    pr.target_branch, pr.priority \
             FROM pull_requests pr \
             JOIN enqueue_records er ON er.pr_id = pr.id \
             JOIN merge_queues mq ON mq.id = pr.merge_queue_id \
             WHERE pr.merge_queue_id = $1 AND er.seq = mq.tail_seq - 1",
        )
        .bind(mq_id.0)
        .fetch_optional(&mut self.tx)
        .await?;

        Ok(row.as_ref().map(row_to_pull_request))
    }

    async fn get_enqueued_prs(
        &mut self,
        mq_id: MergeQueueId,
    ) -> Result<Vec<(PullRequest, EnqueueRecord)>> {
        let rows = sqlx::query(
            "SELECT pr.id, pr.repo_id, pr.merge_queue_id, pr.number, pr.source_branch, \
                    pr.target_branch, pr.priority, \
                    er.seq, er.associated_branch, er.mq_commit, er.ci_number, er.finished, er.passed \
             FROM pull_requests pr \
             JOIN enqueue_records er ON er.pr_id = pr.id \
             WHERE pr.merge_queue_id = $1 \
             ORDER BY er.seq ASC",
        )
        .bind(mq_id.0)
        .fetch_all(&mut self.tx)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row_to_pull_request(row), row_to_enqueue_record(row)))
            .collect())
    }

    async fn get_enqueue_record(&mut self, pr_id: PullRequestId) -> Result<Option<EnqueueRecord>> {
        let row = sqlx::query(
            "SELECT pr_id, seq, associated_branch, mq_commit, ci_number, finished, passed \
             FROM enqueue_records WHERE pr_id = $1",
        )
        .bind(pr_id.0)
        .fetch_optional(&mut self.tx)
        .await?;

        Ok(row.as_ref().map(row_to_enqueue_record))
    }

    async fn find_enqueue_record_by_mq_commit(
        &mut self,
        repo_id: RepoId,
        mq_commit: &str,
    ) -> Result<Option<EnqueueRecord>> {
        let row = sqlx::query(
            "SELECT er.pr_id, er.seq, er.associated_branch, er.mq_commit, er.ci_number, \
                    er.finished, er.passed \
             FROM enqueue_records er \
             JOIN pull_requests pr ON pr.id = er.pr_id \
             WHERE pr.repo_id = $1 AND er.mq_commit = $2",
        )
        .bind(repo_id.0)
        .bind(mq_commit)
        .fetch_optional(&mut self.tx)
        .await?;

        Ok(row.as_ref().map(row_to_enqueue_record))
    }

    async fn find_enqueue_record_by_ci_number(
        &mut self,
        repo_id: RepoId,
        ci_number: CiNumber,
    ) -> Result<Option<EnqueueRecord>> {
        let row = sqlx::query(
            "SELECT er.pr_id, er.seq, er.associated_branch, er.mq_commit, er.ci_number, \
                    er.finished, er.passed \
             FROM enqueue_records er \
             JOIN pull_requests pr ON pr.id = er.pr_id \
             WHERE pr.repo_id = $1 AND er.ci_number = $2",
        )
        .bind(repo_id.0)
        .bind(ci_number.0)
        .fetch_optional(&mut self.tx)
        .await?;

        Ok(row.as_ref().map(row_to_enqueue_record))
    }

    async fn add_enqueue_record(&mut self, record: &EnqueueRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO enqueue_records \
             (pr_id, seq, associated_branch, mq_commit, ci_number, finished, passed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.pr_id.0)
        .bind(record.seq.0)
        .bind(&record.associated_branch)
        .bind(&record.mq_commit)
        .bind(record.ci_number.map(|n| n.0))
        .bind(record.finished)
        .bind(record.passed)
        .execute(&mut self.tx)
        .await?;
        Ok(())
    }

    async fn save_enqueue_record(&mut self, record: &EnqueueRecord) -> Result<()> {
        sqlx::query(
            "UPDATE enqueue_records SET associated_branch = $2, mq_commit = $3, \
             ci_number = $4, finished = $5, passed = $6 WHERE pr_id = $1",
        )
        .bind(record.pr_id.0)
        .bind(&record.associated_branch)
        .bind(&record.mq_commit)
        .bind(record.ci_number.map(|n| n.0))
        .bind(record.finished)
        .bind(record.passed)
        .execute(&mut self.tx)
        .await?;
        Ok(())
    }

    async fn remove_enqueue_record(&mut self, pr_id: PullRequestId) -> Result<()> {
        sqlx::query("DELETE FROM enqueue_records WHERE pr_id = $1")
            .bind(pr_id.0)
            .execute(&mut self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn row_to_merge_queue(row: &sqlx::postgres::PgRow) -> MergeQueue {
    MergeQueue {
        id: MergeQueueId(row.get("id")),
        repo_id: RepoId(row.get("repo_id")),
        target_branch: row.get("target_branch"),
        working_branch: row.get("working_branch"),
        head_seq: Seq(row.get("head_seq")),
        tail_seq: Seq(row.get("tail_seq")),
    }
}

fn row_to_pull_request(row: &sqlx::postgres::PgRow) -> PullRequest {
    PullRequest {
        id: PullRequestId(row.get("id")),
        repo_id: RepoId(row.get("repo_id")),
        merge_queue_id: MergeQueueId(row.get("merge_queue_id")),
        number: row.get("number"),
        source_branch: row.get("source_branch"),
        target_branch: row.get("target_branch"),
        priority: row.get("priority"),
    }
}

fn row_to_enqueue_record(row: &sqlx::postgres::PgRow) -> EnqueueRecord {
    EnqueueRecord {
        pr_id: PullRequestId(row.get("pr_id")),
        seq: Seq(row.get("seq")),
        associated_branch: row.get("associated_branch"),
        mq_commit: row.get("mq_commit"),
        ci_number: row.get::<Option<i64>, _>("ci_number").map(CiNumber),
        finished: row.get("finished"),
        passed: row.get("passed"),
    }
}
