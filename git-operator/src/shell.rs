//! A [`GitOperator`] backed by shelling out to the system `git` binary
//! against a local (non-bare) clone, one directory per repository.
//!
//! Shaped after `bors::git::GitRepository`/`Git`'s command builder;
//! reworked to be async (`tokio::process::Command`) and to expose the full
//! `GitOperator` capability set rather than the single `fetch_and_rebase`
//! entry point a one-PR-at-a-time queue needed.

use crate::{CommitInfo, Committer, GitError, GitOperator, Oid, Result};
use async_trait::async_trait;
use log::info;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::process::Command;

#[derive(Clone, Debug)]
pub struct ShellRepo {
    directory: PathBuf,
    remote_url: String,
}

#[derive(Clone, Debug)]
pub struct ShellBranch(String);

impl ShellBranch {
    pub fn name(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug)]
pub struct GitIdentity {
    pub user: String,
    pub email: String,
    pub ssh_key_file: PathBuf,
}

/// Implements [`GitOperator`] by shelling out to `git`, one local mirror
/// per repository under `mirrors_root`.
pub struct ShellGitOperator {
    mirrors_root: PathBuf,
    identity: GitIdentity,
}

impl ShellGitOperator {
    pub fn new(mirrors_root: impl Into<PathBuf>, identity: GitIdentity) -> Self {
        Self {
            mirrors_root: mirrors_root.into(),
            identity,
        }
    }

    fn mirror_dir(&self, url: &str) -> PathBuf {
        // One directory per remote URL, keyed by a stable slug so repeated
        // `open_and_update` calls reuse the same on-disk mirror.
        let slug: String = url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.mirrors_root.join(slug)
    }

    fn git(&self, directory: &Path) -> Git {
        Git::new(directory)
            .with_user(&self.identity.user)
            .with_email(&self.identity.email)
            .with_ssh(&self.identity.ssh_key_file)
    }
}

#[async_trait]
impl GitOperator for ShellGitOperator {
    type Repo = ShellRepo;
    type Branch = ShellBranch;
    type CommitId = Oid;

    async fn open_and_update(&self, url: &str) -> Result<Self::Repo> {
        let directory = self.mirror_dir(url);

        if !self.git(&directory).is_git_repo().await? {
            info!("cloning '{}' to '{}'", url, directory.display());
            if let Some(parent) = directory.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            Git::new(&directory)
                .with_ssh(&self.identity.ssh_key_file)
                .clone(url, &directory)
                .await?;
            // Detach HEAD so every local branch ref is free for `fetch`/
            // `update-ref` to move without tripping git's checked-out-branch
            // protection; we never read the worktree, only use it as rebase
            // and merge scratch space.
            self.git(&directory).detach_head().await?;
        } else {
            info!("fetching all refs for existing mirror at {}", directory.display());
            self.git(&directory).fetch_all().await?;
        }

        Ok(ShellRepo {
            directory,
            remote_url: url.to_owned(),
        })
    }

    async fn get_branch(&self, repo: &Self::Repo, name: &str) -> Result<Option<Self::Branch>> {
        if self.git(&repo.directory).ref_exists(name).await? {
            Ok(Some(ShellBranch(name.to_owned())))
        } else {
            Ok(None)
        }
    }

    async fn get_branch_tip(
        &self,
        repo: &Self::Repo,
        branch: &Self::Branch,
    ) -> Result<Self::CommitId> {
        self.git(&repo.directory).ref_to_oid(branch.name()).await
    }

    async fn create_branch_at(
        &self,
        repo: &Self::Repo,
        name: &str,
        commit: &Self::CommitId,
        overwrite: bool,
    ) -> Result<Self::Branch> {
        if !overwrite && self.git(&repo.directory).ref_exists(name).await? {
            return Err(GitError::Command(anyhow::anyhow!(
                "branch '{}' already exists",
                name
            )));
        }
        self.git(&repo.directory)
            .create_or_reset_branch(name, commit)
            .await?;
        Ok(ShellBranch(name.to_owned()))
    }

    async fn get_commit_info(
        &self,
        repo: &Self::Repo,
        commit: &Self::CommitId,
    ) -> Result<CommitInfo> {
        self.git(&repo.directory).commit_info(commit).await
    }

    async fn reset_branch_to(
        &self,
        repo: &Self::Repo,
        branch: &Self::Branch,
        commit: &Self::CommitId,
    ) -> Result<()> {
        self.git(&repo.directory)
            .create_or_reset_branch(branch.name(), commit)
            .await
    }

    async fn remove_branch(&self, repo: &Self::Repo, branch: &Self::Branch) -> Result<()> {
        self.git(&repo.directory).delete_branch(branch.name()).await
    }

    async fn can_merge_without_conflict(
        &self,
        repo: &Self::Repo,
        target: &Self::Branch,
        source: &Self::Branch,
    ) -> Result<bool> {
        self.git(&repo.directory)
            .can_merge_without_conflict(target.name(), source.name())
            .await
    }

    async fn merge(
        &self,
        repo: &Self::Repo,
        target: &Self::Branch,
        source: &Self::Branch,
        message: &str,
        committer: &Committer,
        pr_number: u64,
    ) -> Result<Option<Self::CommitId>> {
        self.git(&repo.directory)
            .with_committer(committer)
            .merge_commit(target.name(), source.name(), message, pr_number)
            .await
    }

    async fn rebase(
        &self,
        repo: &Self::Repo,
        target: &Self::Branch,
        source: &Self::Branch,
        committer: &Committer,
        pr_number: u64,
    ) -> Result<Option<Self::CommitId>> {
        self.git(&repo.directory)
            .with_committer(committer)
            .rebase_onto(target.name(), source.name(), pr_number)
            .await
    }

    async fn force_push(&self, repo: &Self::Repo, branch: &Self::Branch) -> Result<()> {
        self.git(&repo.directory)
            .push(&repo.remote_url, branch.name(), true)
            .await
    }

    async fn fast_forward_push(
        &self,
        repo: &Self::Repo,
        branch: &Self::Branch,
        commit: &Self::CommitId,
    ) -> Result<()> {
        self.git(&repo.directory)
            .fast_forward_push(&repo.remote_url, branch.name(), commit)
            .await
    }

    fn parse_commit_id(&self, s: &str) -> Result<Self::CommitId> {
        Ok(Oid::from_str(s)?)
    }
}

/// A one-shot `git` invocation builder, analogous to the `Git` type in
/// `bors::git`.
struct Git {
    directory: PathBuf,
    user: Option<String>,
    email: Option<String>,
    ssh_key_file: Option<PathBuf>,
    committer: Option<Committer>,
}

impl Git {
    fn new(directory: &Path) -> Self {
        Self {
            directory: directory.to_owned(),
            user: None,
            email: None,
            ssh_key_file: None,
            committer: None,
        }
    }

    fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_owned());
        self
    }

    fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_owned());
        self
    }

    fn with_ssh(mut self, ssh_key_file: &Path) -> Self {
        self.ssh_key_file = Some(ssh_key_file.to_owned());
        self
    }

    fn with_committer(mut self, committer: &Committer) -> Self {
        self.committer = Some(committer.clone());
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.directory).args(args);
        cmd.env("GIT_EDITOR", "cat");

        if let Some(ssh_key_file) = &self.ssh_key_file {
            cmd.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i {} -o 'IdentitiesOnly true'",
                    ssh_key_file.display()
                ),
            );
        }

        let (author_name, author_email) = if let Some(committer) = &self.committer {
            (committer.name.clone(), committer.email.clone())
        } else {
            (
                self.user.clone().unwrap_or_default(),
                self.email.clone().unwrap_or_default(),
            )
        };
        cmd.env("GIT_AUTHOR_NAME", &author_name);
        cmd.env("GIT_AUTHOR_EMAIL", &author_email);
        cmd.env("GIT_COMMITTER_NAME", &author_name);
        cmd.env("GIT_COMMITTER_EMAIL", &author_email);

        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.command(args).output().await?;

        if !output.status.success() {
            return Err(GitError::Command(anyhow::anyhow!(
                "git {:?} failed:\n{}",
                args,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Succeeds (exit 0) whether or not the directory is a git repo; only
    /// the exit code is consulted, never a failure to spawn the process.
    async fn is_git_repo(&self) -> Result<bool> {
        if !self.directory.exists() {
            return Ok(false);
        }
        let output = self.command(&["rev-parse", "--git-dir"]).output().await?;
        Ok(output.status.success())
    }

    async fn clone(&self, url: &str, into: &Path) -> Result<()> {
        // A regular (non-bare) clone, matching the teacher: the worktree is
        // never read, only used as scratch space for `checkout`-based merges
        // and rebases, which bare repos can't do without a second worktree.
        let mut cmd = Command::new("git");
        cmd.env("GIT_EDITOR", "cat");
        if let Some(ssh_key_file) = &self.ssh_key_file {
            cmd.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i {} -o 'IdentitiesOnly true'",
                    ssh_key_file.display()
                ),
            );
        }
        let output = cmd.arg("clone").arg(url).arg(into).output().await?;
        if !output.status.success() {
            return Err(GitError::Command(anyhow::anyhow!(
                "git clone failed:\n{}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn detach_head(&self) -> Result<()> {
        self.run(&["checkout", "--detach", "HEAD"]).await?;
        Ok(())
    }

    async fn fetch_all(&self) -> Result<()> {
        self.run(&[
            "fetch",
            "--prune",
            "origin",
            "+refs/heads/*:refs/heads/*",
        ])
        .await?;
        Ok(())
    }

    async fn ref_exists(&self, name: &str) -> Result<bool> {
        let output = self
            .command(&["rev-parse", "--verify", "--quiet", name])
            .output()
            .await?;
        Ok(output.status.success())
    }

    async fn ref_to_oid(&self, name: &str) -> Result<Oid> {
        let out = self.run(&["rev-parse", name]).await?;
        Ok(Oid::from_str(out.trim())?)
    }

    async fn create_or_reset_branch(&self, name: &str, commit: &Oid) -> Result<()> {
        self.run(&["update-ref", &format!("refs/heads/{}", name), &commit.to_string()])
            .await?;
        Ok(())
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        // Tolerate a branch that's already gone; rebuilds may call this twice.
        let _ = self
            .command(&["update-ref", "-d", &format!("refs/heads/{}", name)])
            .output()
            .await?;
        Ok(())
    }

    async fn commit_info(&self, commit: &Oid) -> Result<CommitInfo> {
        let raw = self
            .run(&[
                "log",
                "-1",
                "--format=%an%n%ae%n%B",
                &commit.to_string(),
            ])
            .await?;
        let mut lines = raw.splitn(3, '\n');
        let name = lines.next().unwrap_or_default().to_owned();
        let email = lines.next().unwrap_or_default().to_owned();
        let message = lines.next().unwrap_or_default().trim_end().to_owned();
        Ok(CommitInfo {
            message,
            committer: Committer { name, email },
        })
    }

    async fn can_merge_without_conflict(&self, target: &str, source: &str) -> Result<bool> {
        let merge_base = self
            .run(&["merge-base", target, source])
            .await?
            .trim()
            .to_owned();
        let output = self
            .command(&[
                "merge-tree",
                &merge_base,
                target,
                source,
            ])
            .output()
            .await?;
        // `git merge-tree` (non-write-tree form) prints conflict markers to
        // stdout on a conflicting merge and nothing of the sort otherwise.
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(!stdout.contains("<<<<<<<"))
    }

    async fn merge_commit(
        &self,
        target: &str,
        source: &str,
        message: &str,
        pr_number: u64,
    ) -> Result<Option<Oid>> {
        if !self.can_merge_without_conflict(target, source).await? {
            return Ok(None);
        }

        let scratch = format!("merge-{}", pr_number);
        self.run(&["checkout", "-B", &scratch, target]).await?;
        let merge_result = self
            .command(&["merge", "--no-ff", "-m", message, source])
            .output()
            .await?;

        if !merge_result.status.success() {
            self.run(&["merge", "--abort"]).await.ok();
            self.run(&["checkout", "--detach", target]).await?;
            self.run(&["update-ref", "-d", &format!("refs/heads/{}", scratch)])
                .await
                .ok();
            return Ok(None);
        }

        let oid = self.ref_to_oid(&scratch).await?;
        self.run(&["update-ref", "-d", &format!("refs/heads/{}", scratch)])
            .await?;
        Ok(Some(oid))
    }

    async fn rebase_onto(&self, target: &str, source: &str, pr_number: u64) -> Result<Option<Oid>> {
        if !self.can_merge_without_conflict(target, source).await? {
            return Ok(None);
        }

        let scratch = format!("merge-{}", pr_number);
        self.run(&["checkout", "-B", &scratch, source]).await?;
        let rebase_result = self
            .command(&["rebase", "--force-rebase", target])
            .output()
            .await?;

        if !rebase_result.status.success() {
            self.run(&["rebase", "--abort"]).await.ok();
            self.run(&["checkout", "--detach", target]).await?;
            self.run(&["update-ref", "-d", &format!("refs/heads/{}", scratch)])
                .await
                .ok();
            return Ok(None);
        }

        let oid = self.ref_to_oid(&scratch).await?;
        self.run(&["update-ref", "-d", &format!("refs/heads/{}", scratch)])
            .await?;
        Ok(Some(oid))
    }

    async fn push(&self, remote_url: &str, branch: &str, force: bool) -> Result<()> {
        let mut args = vec!["push"];
        if force {
            args.push("--force");
        }
        args.push(remote_url);
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        args.push(&refspec);
        self.run(&args).await?;
        Ok(())
    }

    async fn fast_forward_push(&self, remote_url: &str, branch: &str, commit: &Oid) -> Result<()> {
        self.create_or_reset_branch(branch, commit).await?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        self.run(&["push", remote_url, &refspec]).await?;
        Ok(())
    }
}
