//! A [`VcsHostClient`] for GitLab, grounded on the reqwest-based `PRIVATE-TOKEN`
//! client idiom used elsewhere in this corpus for talking to GitLab's v4 API.

use crate::{CiStatus, Result, VcsError, VcsHostClient};
use async_trait::async_trait;
use log::debug;
use reqwest::Client as ReqwestClient;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Deserialize)]
struct Pipeline {
    id: u64,
    status: String,
}

#[derive(Deserialize)]
struct Note {
    id: u64,
}

pub struct GitLabClient {
    client: ReqwestClient,
    token: String,
    host: String,
}

impl GitLabClient {
    pub fn new(token: impl Into<String>, host: Option<String>) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            token: token.into(),
            host: host.unwrap_or_else(|| "gitlab.com".to_owned()),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("https://{}/api/v4{}", self.host, path)
    }

    fn encoded_project(&self, repo_path: &str) -> String {
        urlencoding::encode(repo_path).into_owned()
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else if response.status() == reqwest::StatusCode::NOT_FOUND {
            Err(VcsError::NotFound(response.url().to_string()))
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(VcsError::Protocol(format!("{}: {}", status, body)))
        }
    }

    fn map_pipeline_status(status: &str) -> CiStatus {
        match status {
            "success" => CiStatus::Passed,
            // GitLab's own terminology: skipped pipelines don't block.
            "skipped" => CiStatus::Passed,
            // Cancelled and failed pipelines both fail the PR's CI gate.
            "failed" | "canceled" | "cancelled" => CiStatus::Failed,
            _ => CiStatus::NotFinished,
        }
    }
}

#[async_trait]
impl VcsHostClient for GitLabClient {
    fn format_pr_number(&self, number: u64) -> String {
        format!("!{}", number)
    }

    async fn pr_ci_status(&self, repo_path: &str, pr_number: u64) -> Result<CiStatus> {
        debug!(
            "fetching pipelines for {} !{}",
            repo_path, pr_number
        );
        let url = self.api_url(&format!(
            "/projects/{}/merge_requests/{}/pipelines",
            self.encoded_project(repo_path),
            pr_number
        ));

        let response = self
            .check(
                self.client
                    .get(&url)
                    .header("PRIVATE-TOKEN", &self.token)
                    .send()
                    .await?,
            )
            .await?;

        let pipelines: Vec<Pipeline> = response.json().await?;

        // GitLab returns pipelines ordered most-recent-first.
        Ok(pipelines
            .first()
            .map(|p| Self::map_pipeline_status(&p.status))
            .unwrap_or(CiStatus::NotFinished))
    }

    async fn ci_status(&self, repo_path: &str, ci_number: u64) -> Result<CiStatus> {
        let url = self.api_url(&format!(
            "/projects/{}/pipelines/{}",
            self.encoded_project(repo_path),
            ci_number
        ));

        let response = self
            .check(
                self.client
                    .get(&url)
                    .header("PRIVATE-TOKEN", &self.token)
                    .send()
                    .await?,
            )
            .await?;

        let pipeline: Pipeline = response.json().await?;
        Ok(Self::map_pipeline_status(&pipeline.status))
    }

    async fn abort_ci(&self, repo_path: &str, ci_number: u64) -> Result<()> {
        let url = self.api_url(&format!(
            "/projects/{}/pipelines/{}/cancel",
            self.encoded_project(repo_path),
            ci_number
        ));

        self.check(
            self.client
                .post(&url)
                .header("PRIVATE-TOKEN", &self.token)
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }

    async fn pr_send_comment(&self, repo_path: &str, pr_number: u64, body: &str) -> Result<()> {
        let url = self.api_url(&format!(
            "/projects/{}/merge_requests/{}/notes",
            self.encoded_project(repo_path),
            pr_number
        ));

        let response = self
            .check(
                self.client
                    .post(&url)
                    .header("PRIVATE-TOKEN", &self.token)
                    .json(&serde_json::json!({ "body": body }))
                    .send()
                    .await?,
            )
            .await?;

        let note: Note = response.json().await?;
        debug!("posted note {} on {} !{}", note.id, repo_path, pr_number);
        Ok(())
    }
}
