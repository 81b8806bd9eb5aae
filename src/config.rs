//! Process configuration, loaded from TOML the way `bors::Config::from_file`
//! does (`toml::from_str` over a `fs::read_to_string`), extended to cover
//! the collaborators this system wires up: the database, the local git
//! mirror identity, the VCS host token, and one entry per managed repo.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};
use store::MergeStyle;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub git: GitConfig,
    pub vcs_host: VcsHostConfig,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(rename = "repo", default)]
    pub repos: Vec<RepoConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitConfig {
    pub mirrors_root: PathBuf,
    pub ssh_key_file: PathBuf,
    pub user: String,
    pub email: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VcsHostConfig {
    pub token: String,
    #[serde(default)]
    pub host: Option<String>,
}

/// One managed repository: its identity in the Store, how its webhook
/// deliveries are matched and authenticated, and the queue this process
/// should ensure exists for it.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RepoConfig {
    pub display_name: String,
    /// Clone URL; must match `project_path` as GitLab derives it.
    pub url: String,
    pub project_path: String,
    #[serde(default = "default_merge_style")]
    pub merge_style: MergeStyle,
    pub target_branch: String,
    pub working_branch: String,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_enqueue_trigger")]
    pub enqueue_trigger: String,
}

fn default_merge_style() -> MergeStyle {
    MergeStyle::Merge
}

fn default_enqueue_trigger() -> String {
    "bors r+".to_owned()
}
