//! GitLab webhook payload shapes and the event discriminant carried in the
//! `X-Gitlab-Event` header. GitLab's webhook payloads are plain JSON (no
//! HMAC envelope the way GitHub's are); only the fields the Coordinator's
//! four events need are modeled here, everything else is ignored by serde's
//! default "extra fields are dropped" behavior.

use serde::Deserialize;
use std::str::FromStr;

/// Mirrors the `X-Gitlab-Event` header GitLab sends with every webhook
/// delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GitlabEventType {
    MergeRequest,
    Note,
    Pipeline,
}

#[derive(Debug)]
pub struct UnknownEventType(pub String);

impl FromStr for GitlabEventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Merge Request Hook" => Ok(GitlabEventType::MergeRequest),
            "Note Hook" => Ok(GitlabEventType::Note),
            "Pipeline Hook" => Ok(GitlabEventType::Pipeline),
            other => Err(UnknownEventType(other.to_owned())),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Project {
    pub path_with_namespace: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MergeRequestAttributes {
    pub iid: u64,
    pub source_branch: String,
    pub target_branch: String,
    /// "open", "reopen", "update", "close", "merge", ...
    pub action: Option<String>,
    #[serde(default)]
    pub last_commit: Option<LastCommit>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LastCommit {
    pub id: String,
}

/// `object_kind: "merge_request"`.
#[derive(Clone, Debug, Deserialize)]
pub struct MergeRequestHook {
    pub project: Project,
    pub user: User,
    pub object_attributes: MergeRequestAttributes,
    #[serde(default)]
    pub labels: Vec<Label>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Label {
    pub title: String,
}

/// `object_kind: "note"`. Comments posted on an MR are how an author
/// requests enqueue — a comment whose body matches an installation's
/// configured trigger phrase.
#[derive(Clone, Debug, Deserialize)]
pub struct NoteHook {
    pub project: Project,
    pub user: User,
    pub object_attributes: NoteAttributes,
    pub merge_request: Option<MergeRequestAttributes>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NoteAttributes {
    pub note: String,
}

/// `object_kind: "pipeline"`.
#[derive(Clone, Debug, Deserialize)]
pub struct PipelineHook {
    pub project: Project,
    pub object_attributes: PipelineAttributes,
    pub merge_request: Option<MergeRequestAttributes>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PipelineAttributes {
    pub id: u64,
    pub sha: String,
    /// "pending", "running", "success", "failed", "canceled", "skipped"
    pub status: String,
}

impl PipelineAttributes {
    /// `None` while still pending/running. GitLab does not distinguish
    /// "created" from "running" in a way the Coordinator cares about: both
    /// precede a terminal status, so `on-ci-created` fires on the first
    /// delivery for a `sha` the Coordinator doesn't yet know, regardless of
    /// which non-terminal status it carries.
    pub fn terminal(&self) -> Option<bool> {
        match self.status.as_str() {
            "success" | "skipped" => Some(true),
            "failed" | "canceled" | "cancelled" => Some(false),
            _ => None,
        }
    }
}
