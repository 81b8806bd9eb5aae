//! Process wiring: load config, set up logging, construct the three
//! collaborators (git-operator, store, vcs-host) plus the webhook
//! front-end, ensure each configured repo/queue exists, and serve.
//! Uses the same `Options`/`ServeOptions` via `structopt` and
//! `env_logger::from_env(...).default_filter_or("info")` idiom as the rest
//! of this workspace's binaries.

mod config;

use anyhow::{Context, Result};
use config::Config;
use coordinator::Coordinator;
use git_operator::shell::{GitIdentity, ShellGitOperator};
use log::info;
use std::path::PathBuf;
use store::postgres::PgStore;
use store::{NewMergeQueue, NewRepo, RepoKind, Store, StoreTransaction};
use structopt::StructOpt;
use vcs_host::gitlab::GitLabClient;
use webhook::{Installation, ServerBuilder};

#[derive(StructOpt)]
struct Options {
    #[structopt(short, long, parse(from_os_str), default_value = "merge-queue.toml")]
    /// config file to use
    config: PathBuf,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    #[structopt(name = "serve")]
    /// Run the webhook server and process events
    Serve(ServeOptions),
    #[structopt(name = "migrate")]
    /// Run pending database migrations and exit
    Migrate,
}

#[derive(StructOpt)]
struct ServeOptions {
    #[structopt(long, default_value = "3000")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Options::from_args();
    let config = Config::from_file(&opts.config).context("loading config")?;

    info!("connecting to store at configured database url");
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to store")?;
    store.run_migrations().await.context("running migrations")?;

    match opts.command {
        Command::Migrate => {
            info!("migrations applied, exiting");
            Ok(())
        }
        Command::Serve(serve_opts) => serve(config, store, serve_opts).await,
    }
}

async fn serve(config: Config, store: PgStore, serve_opts: ServeOptions) -> Result<()> {
    ensure_repos_and_queues(&store, &config).await?;

    let git = ShellGitOperator::new(
        config.git.mirrors_root.clone(),
        GitIdentity {
            user: config.git.user.clone(),
            email: config.git.email.clone(),
            ssh_key_file: config.git.ssh_key_file.clone(),
        },
    );
    let vcs_host = GitLabClient::new(config.vcs_host.token.clone(), config.vcs_host.host.clone())
        .context("constructing vcs host client")?;

    let coordinator = Coordinator::new(git, store, vcs_host);

    let mut builder = ServerBuilder::new(coordinator);
    for repo in &config.repos {
        let mut installation = Installation::new(repo.project_path.clone(), repo.url.clone())
            .with_enqueue_trigger(repo.enqueue_trigger.clone());
        if let Some(secret) = &repo.webhook_secret {
            installation = installation.with_secret_token(secret.clone());
        }
        builder = builder.add_installation(installation);
    }

    let port = config.listen_port.unwrap_or(serve_opts.port);
    let addr = ([0, 0, 0, 0], port).into();
    builder.serve(addr).await.context("serving webhook requests")
}

/// Idempotently seed the Store with each configured repo and its merge
/// queue. Repos and queues are immutable once created, so this only ever
/// inserts rows that are missing.
async fn ensure_repos_and_queues(store: &PgStore, config: &Config) -> Result<()> {
    for repo in &config.repos {
        let mut tx = store.begin().await.context("beginning setup transaction")?;

        let repo_id = tx
            .add_repo(NewRepo {
                display_name: repo.display_name.clone(),
                url: repo.url.clone(),
                kind: RepoKind::GitLab,
                access_token: None,
                merge_style: repo.merge_style,
            })
            .await?;

        let is_new_queue = tx
            .get_merge_queue_by_repo_and_branch(repo_id, &repo.target_branch)
            .await?
            .is_none();
        tx.add_merge_queue(NewMergeQueue {
            repo_id,
            target_branch: repo.target_branch.clone(),
            working_branch: repo.working_branch.clone(),
        })
        .await?;
        if is_new_queue {
            info!(
                "created merge queue for {}@{}",
                repo.url, repo.target_branch
            );
        }

        Box::new(tx).commit().await?;
    }

    Ok(())
}
