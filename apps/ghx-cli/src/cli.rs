use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use ghx_api::SecretString;
use ghx_core::{
    BatchReadOptions, CoreError, CredentialSupplier, EngineConfig, FetchTreeOptions,
    FileSessionStore, ListBranchesOptions, MessageRole, NewMessage, NewSession, Orchestrator,
    ReadFileOptions, RepositoryBinding, SessionPatch, SessionState, StaticCredentials,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "ghx",
    version,
    about = "Bounded GitHub repository reads and agent sessions"
)]
pub struct Cli {
    /// Directory holding config.yaml, sessions and logs
    #[arg(long, global = true, env = "GHX_STATE_DIR", default_value = ".ghx")]
    pub state_dir: PathBuf,

    /// GitHub token used for remote reads
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Owner of the sessions being managed
    #[arg(long, global = true, env = "GHX_USER", default_value = "local")]
    pub user: String,

    /// Override the API base URL from config.yaml
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Override the retry budget from config.yaml
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Override the per-request timeout (seconds) from config.yaml
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct RepoArgs {
    /// Repository owner
    pub owner: String,

    /// Repository name
    pub repo: String,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List one page of branches
    Branches {
        #[command(flatten)]
        repo: RepoArgs,

        /// Page size, capped at 100
        #[arg(long, default_value_t = 30)]
        per_page: u32,

        /// 1-based page number
        #[arg(long, default_value_t = 1)]
        page: u32,
    },

    /// Fetch a tree listing
    Tree {
        #[command(flatten)]
        repo: RepoArgs,

        /// Tree SHA or branch name (defaults to the default branch)
        #[arg(long)]
        sha: Option<String>,

        /// Include nested entries
        #[arg(short, long)]
        recursive: bool,

        /// Drop entries deeper than this many path segments (1-10)
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Print a single file
    Cat {
        #[command(flatten)]
        repo: RepoArgs,

        /// Path within the repository
        path: String,

        /// Branch, tag or commit
        #[arg(long = "ref")]
        reference: Option<String>,
    },

    /// Read several files under a byte budget
    Batch {
        #[command(flatten)]
        repo: RepoArgs,

        /// Paths within the repository
        #[arg(required = true)]
        paths: Vec<String>,

        /// Branch, tag or commit
        #[arg(long = "ref")]
        reference: Option<String>,

        /// Per-file byte cap
        #[arg(long)]
        max_bytes_per_file: Option<u64>,

        /// Cumulative byte budget
        #[arg(long)]
        max_total_bytes: Option<u64>,
    },

    /// Manage agent sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum SessionCommands {
    /// Create a session in the `created` state
    Start {
        #[arg(long)]
        name: String,

        #[arg(long)]
        goal: String,

        #[arg(long, default_value = "claude-sonnet-4-20250514")]
        model: String,

        /// Repository to bind, as owner/name
        #[arg(long)]
        repo: Option<String>,

        /// Branch the session reads from and targets
        #[arg(long, default_value = "main")]
        base_branch: String,
    },

    /// Print a session
    Show { id: Uuid },

    /// List sessions of the current user
    List,

    /// Move a session to another state
    Transition {
        id: Uuid,

        /// Target state, e.g. planning or failed
        state: SessionState,

        /// Preview identifier to attach
        #[arg(long)]
        preview_id: Option<String>,

        /// User message recorded with the transition
        #[arg(long)]
        message: Option<String>,
    },

    /// Append a conversational message
    Message {
        id: Uuid,

        content: String,

        #[arg(long, default_value = "user")]
        role: MessageRole,
    },

    /// Read files from the session's repository, recording each read as a step
    Read {
        id: Uuid,

        #[arg(required = true)]
        paths: Vec<String>,

        /// Branch, tag or commit (defaults to the session's base branch)
        #[arg(long = "ref")]
        reference: Option<String>,
    },
}

/// Credentials used when no token was given.
#[derive(Debug)]
struct MissingToken;

#[async_trait]
impl CredentialSupplier for MissingToken {
    async fn token_for(&self, _user_id: &str) -> Result<SecretString, CoreError> {
        Err(CoreError::Credentials(
            "pass --token or set GITHUB_TOKEN".to_owned(),
        ))
    }
}

impl Cli {
    /// Returns the state directory and, for commands that log to a file,
    /// the log subdirectory name.
    pub fn log_context(&self) -> (PathBuf, Option<&'static str>) {
        let command = match &self.command {
            Commands::Branches { .. } => Some("branches"),
            Commands::Tree { .. } => Some("tree"),
            Commands::Cat { .. } => Some("cat"),
            Commands::Batch { .. } => Some("batch"),
            Commands::Session {
                command: SessionCommands::Show { .. } | SessionCommands::List,
            } => None,
            Commands::Session { .. } => Some("session"),
        };
        (self.state_dir.clone(), command)
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig::builder()
            .state_dir(self.state_dir.clone())
            .base_url(self.base_url.clone())
            .max_retries(self.max_retries)
            .request_timeout_secs(self.timeout)
            .build()
    }

    pub async fn run(self) -> Result<()> {
        let engine = self.engine_config();
        let credentials: Arc<dyn CredentialSupplier> = match &self.token {
            Some(token) => Arc::new(StaticCredentials::new(token.clone())?),
            None => Arc::new(MissingToken),
        };
        let store = Arc::new(FileSessionStore::new(engine.sessions_dir()));
        let orchestrator = Orchestrator::from_config(&engine, store, Arc::clone(&credentials))
            .context("failed to set up orchestrator")?;

        let Cli { user, command, .. } = self;
        match command {
            Commands::Branches {
                repo,
                per_page,
                page,
            } => {
                let reader = orchestrator.reader(credentials.token_for(&user).await?);
                let options = ListBranchesOptions::builder()
                    .per_page(per_page)
                    .page(page)
                    .build();
                print_json(&reader.list_branches(&repo.owner, &repo.repo, &options).await?)
            }
            Commands::Tree {
                repo,
                sha,
                recursive,
                max_depth,
            } => {
                let reader = orchestrator.reader(credentials.token_for(&user).await?);
                let sha = match sha {
                    Some(sha) => sha,
                    None => {
                        reader
                            .resolve_default_branch(&repo.owner, &repo.repo)
                            .await?
                    }
                };
                let options = FetchTreeOptions {
                    recursive,
                    max_depth,
                };
                print_json(
                    &reader
                        .fetch_tree(&repo.owner, &repo.repo, &sha, &options)
                        .await?,
                )
            }
            Commands::Cat {
                repo,
                path,
                reference,
            } => {
                let reader = orchestrator.reader(credentials.token_for(&user).await?);
                let options = ReadFileOptions { reference };
                print_json(
                    &reader
                        .read_file_content(&repo.owner, &repo.repo, &path, &options)
                        .await?,
                )
            }
            Commands::Batch {
                repo,
                paths,
                reference,
                max_bytes_per_file,
                max_total_bytes,
            } => {
                let reader = orchestrator.reader(credentials.token_for(&user).await?);
                let options = BatchReadOptions {
                    reference,
                    max_bytes_per_file,
                    max_total_bytes,
                };
                print_json(
                    &reader
                        .batch_read_files(&repo.owner, &repo.repo, &paths, &options)
                        .await?,
                )
            }
            Commands::Session { command } => run_session(&orchestrator, &user, command).await,
        }
    }
}

async fn run_session(
    orchestrator: &Orchestrator,
    user: &str,
    command: SessionCommands,
) -> Result<()> {
    match command {
        SessionCommands::Start {
            name,
            goal,
            model,
            repo,
            base_branch,
        } => {
            let repo = repo
                .map(|spec| parse_binding(&spec, &base_branch))
                .transpose()?;
            let session = orchestrator
                .start_session(NewSession {
                    user_id: user.to_owned(),
                    name,
                    model,
                    goal,
                    repo,
                })
                .await?;
            print_json(&session)
        }
        SessionCommands::Show { id } => print_json(&orchestrator.get_session(user, id).await?),
        SessionCommands::List => print_json(&orchestrator.list_sessions(user).await?),
        SessionCommands::Transition {
            id,
            state,
            preview_id,
            message,
        } => {
            let patch = SessionPatch {
                preview_id,
                messages: message
                    .map(|content| vec![NewMessage::new(MessageRole::User, content)])
                    .unwrap_or_default(),
                ..SessionPatch::default()
            };
            print_json(&orchestrator.transition(user, id, state, patch).await?)
        }
        SessionCommands::Message { id, content, role } => print_json(
            &orchestrator
                .append_message(user, id, role, &content)
                .await?,
        ),
        SessionCommands::Read {
            id,
            paths,
            reference,
        } => {
            let mut run = orchestrator.open(user, id).await?;
            let options = BatchReadOptions {
                reference,
                ..BatchReadOptions::default()
            };
            let files = run.batch_read(&paths, options).await?;
            print_json(&files)
        }
    }
}

/// Parse `owner/name` into a binding on `base_branch`.
fn parse_binding(spec: &str, base_branch: &str) -> Result<RepositoryBinding> {
    let (owner, name) = spec
        .split_once('/')
        .filter(|(owner, name)| !owner.is_empty() && !name.is_empty() && !name.contains('/'))
        .with_context(|| format!("expected owner/name, got {spec:?}"))?;
    Ok(RepositoryBinding::new(owner, name, base_branch))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
