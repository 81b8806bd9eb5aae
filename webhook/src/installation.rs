//! A repo this webhook front-end accepts deliveries for. Generalizes
//! `probot::Installation` (one GitHub repo + its services) to a single
//! GitLab project the Coordinator manages a queue for.

#[derive(Clone, Debug)]
pub struct Installation {
    /// GitLab's `path_with_namespace`, e.g. `acme/widgets`. Incoming
    /// deliveries are matched against this, not the clone URL, since that's
    /// the field every GitLab payload kind carries in `project`.
    project_path: String,
    /// The clone URL passed on to the Coordinator's events (must match the
    /// `url` column of the corresponding `repos` row).
    repo_url: String,
    /// Verified against the `X-Gitlab-Token` header. `None` accepts
    /// deliveries unconditionally — only appropriate behind a private
    /// network boundary.
    secret_token: Option<String>,
    /// Comment body (exact match, case-insensitive) on an MR that requests
    /// enqueue, e.g. `"bors r+"`.
    enqueue_trigger: String,
}

impl Installation {
    pub fn new(project_path: impl Into<String>, repo_url: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
            repo_url: repo_url.into(),
            secret_token: None,
            enqueue_trigger: "bors r+".to_owned(),
        }
    }

    pub fn with_secret_token(mut self, token: impl Into<String>) -> Self {
        self.secret_token = Some(token.into());
        self
    }

    pub fn with_enqueue_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.enqueue_trigger = trigger.into();
        self
    }

    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    pub fn enqueue_trigger(&self) -> &str {
        &self.enqueue_trigger
    }

    /// `true` if no secret is configured (accept-all) or the header matches.
    pub fn verify_token(&self, header: Option<&str>) -> bool {
        match &self.secret_token {
            None => true,
            Some(expected) => header.map_or(false, |h| h == expected),
        }
    }
}
