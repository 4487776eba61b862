//! Session orchestrator.
//!
//! The [`Orchestrator`] owns session lifecycle: it creates sessions, applies
//! transitions through the state machine and persists the result. Reader
//! work for a session goes through a [`SessionRun`], which records every
//! call as a step before and after it runs.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use ghx_api::{ApiClient, ClientConfig, ReqwestTransport, SecretString, Transport};
use tracing::{debug, info, instrument, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::config::{EngineConfig, ReadLimits, load_project_config};
use crate::credentials::CredentialSupplier;
use crate::error::CoreError;
use crate::reader::{
    BatchReadOptions, FetchTreeOptions, ListBranchesOptions, ReadFileOptions, RepoReader,
};
use crate::repo::{BranchInfo, FileContent, RepositoryBinding, TreeResult};
use crate::session::{AgentSession, MessageRole, NewSession, SessionState};
use crate::state_machine::{self, NewMessage, NewStep, SessionPatch, StepResolution};
use crate::store::SessionStore;

/// Entry point for session workflows.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ghx_core::{MemorySessionStore, Orchestrator, StaticCredentials};
///
/// # fn example(transport: Arc<dyn ghx_api::Transport>) -> Result<(), ghx_core::CoreError> {
/// let _orchestrator = Orchestrator::builder()
///     .store(Arc::new(MemorySessionStore::new()))
///     .credentials(Arc::new(StaticCredentials::new("ghp_example")?))
///     .transport(transport)
///     .build();
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct Orchestrator {
    store: Arc<dyn SessionStore>,
    credentials: Arc<dyn CredentialSupplier>,
    transport: Arc<dyn Transport>,

    #[builder(default)]
    client_config: ClientConfig,

    #[builder(default)]
    limits: ReadLimits,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("client_config", &self.client_config)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Assemble an orchestrator from `config.yaml` under the state directory,
    /// talking HTTP to the configured base URL.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if the configuration is invalid or the
    /// HTTP client cannot be built.
    #[instrument(skip_all)]
    pub fn from_config(
        engine: &EngineConfig,
        store: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialSupplier>,
    ) -> Result<Self, CoreError> {
        let project = load_project_config(&engine.config_path())?;
        let client_config = project.client_config(engine)?;
        let base_url = project.base_url(engine);
        let transport = ReqwestTransport::new(&base_url, &project.api.user_agent)
            .map_err(|e| CoreError::Config(format!("failed to build HTTP client: {e}")))?;
        info!(%base_url, "orchestrator configured");

        Ok(Self {
            store,
            credentials,
            transport: Arc::new(transport),
            client_config,
            limits: project.limits,
        })
    }

    /// Create and persist a session in the `created` state.
    #[instrument(skip_all, fields(user_id = %params.user_id))]
    pub async fn start_session(&self, params: NewSession) -> Result<AgentSession, CoreError> {
        let session = AgentSession::new(params);
        self.store.put(&session).await?;
        info!(id = %session.id(), "session started");
        Ok(session)
    }

    /// Load a session owned by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SessionNotFound` if there is no such session for
    /// this user.
    pub async fn get_session(&self, user_id: &str, id: Uuid) -> Result<AgentSession, CoreError> {
        self.store
            .get(user_id, id)
            .await?
            .ok_or(CoreError::SessionNotFound(id))
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<AgentSession>, CoreError> {
        self.store.list(user_id).await
    }

    /// Transition a stored session and persist the result.
    ///
    /// A rejected transition writes nothing.
    #[instrument(skip(self, patch))]
    pub async fn transition(
        &self,
        user_id: &str,
        id: Uuid,
        target: SessionState,
        patch: SessionPatch,
    ) -> Result<AgentSession, CoreError> {
        let session = self.get_session(user_id, id).await?;
        let next = state_machine::transition(&session, target, patch).inspect_err(|e| {
            warn!(error = %e, "transition rejected");
        })?;
        self.store.put(&next).await?;
        info!(from = %session.state(), to = %next.state(), "session transitioned");
        Ok(next)
    }

    /// Append a conversational message with a server-assigned timestamp.
    #[instrument(skip(self, content))]
    pub async fn append_message(
        &self,
        user_id: &str,
        id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<AgentSession, CoreError> {
        let session = self.get_session(user_id, id).await?;
        let patch = SessionPatch::builder()
            .messages(vec![NewMessage::new(role, content)])
            .build();
        let next = state_machine::amend(&session, patch)?;
        self.store.put(&next).await?;
        Ok(next)
    }

    /// A reader authenticated with `token`, outside any session.
    pub fn reader(&self, token: SecretString) -> RepoReader {
        let client = ApiClient::new(
            Arc::clone(&self.transport),
            token,
            self.client_config.clone(),
        );
        RepoReader::new(client, self.limits)
    }

    /// Take ownership of a session for one workflow.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SessionNotFound` for unknown sessions and
    /// `CoreError::Credentials` if no token is available for the user.
    #[instrument(skip(self))]
    pub async fn open(&self, user_id: &str, id: Uuid) -> Result<SessionRun, CoreError> {
        let session = self.get_session(user_id, id).await?;
        let token = self.credentials.token_for(user_id).await?;
        debug!(state = %session.state(), "session opened");

        Ok(SessionRun {
            recorder: StepRecorder {
                session,
                store: Arc::clone(&self.store),
            },
            reader: self.reader(token),
        })
    }
}

/// Persists a step around each call.
struct StepRecorder {
    session: AgentSession,
    store: Arc<dyn SessionStore>,
}

impl StepRecorder {
    async fn save(&mut self, patch: SessionPatch) -> Result<(), CoreError> {
        let next = state_machine::amend(&self.session, patch)?;
        self.store.put(&next).await?;
        self.session = next;
        Ok(())
    }

    /// Append a `started` step, run `call`, then resolve the step.
    ///
    /// `call` is not polled until the started step is stored.
    async fn record<T, F, S>(
        &mut self,
        name: String,
        call: F,
        summarize: S,
    ) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
        S: FnOnce(&T) -> String,
    {
        self.save(
            SessionPatch::builder()
                .steps(vec![NewStep::started(name.as_str())])
                .build(),
        )
        .await?;
        let index = self.session.steps().len() - 1;

        let outcome = call.await;
        let resolution = match &outcome {
            Ok(value) => StepResolution::succeeded(index, summarize(value)),
            Err(e) => {
                warn!(step = %name, error = %e, "step failed");
                StepResolution::failed(index, e.to_string())
            }
        };
        if let Err(e) = self
            .save(SessionPatch::builder().step_updates(vec![resolution]).build())
            .await
        {
            let result = if outcome.is_ok() { "succeeded" } else { "failed" };
            warn!(step = %name, result, error = %e, "failed to persist step outcome");
            return Err(e);
        }
        outcome
    }
}

/// One workflow over a session.
///
/// Every method takes `&mut self`, so calls are issued one at a time and the
/// step trail follows call order.
pub struct SessionRun {
    recorder: StepRecorder,
    reader: RepoReader,
}

impl fmt::Debug for SessionRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRun")
            .field("session", &self.recorder.session.id())
            .field("reader", &self.reader)
            .finish()
    }
}

impl SessionRun {
    pub fn session(&self) -> &AgentSession {
        &self.recorder.session
    }

    pub fn into_session(self) -> AgentSession {
        self.recorder.session
    }

    /// The repository this session reads from.
    pub fn binding(&self) -> Result<&RepositoryBinding, CoreError> {
        let session = &self.recorder.session;
        session
            .repo()
            .ok_or(CoreError::RepositoryNotBound(session.id()))
    }

    pub async fn resolve_default_branch(&mut self) -> Result<String, CoreError> {
        let repo = self.binding()?.clone();
        self.recorder
            .record(
                "resolve_default_branch".to_owned(),
                self.reader.resolve_default_branch(&repo.owner, &repo.name),
                String::clone,
            )
            .await
    }

    pub async fn list_branches(
        &mut self,
        options: &ListBranchesOptions,
    ) -> Result<Vec<BranchInfo>, CoreError> {
        let repo = self.binding()?.clone();
        self.recorder
            .record(
                "list_branches".to_owned(),
                self.reader.list_branches(&repo.owner, &repo.name, options),
                |branches| format!("{} branches", branches.len()),
            )
            .await
    }

    pub async fn fetch_tree(
        &mut self,
        tree_sha: &str,
        options: &FetchTreeOptions,
    ) -> Result<TreeResult, CoreError> {
        let repo = self.binding()?.clone();
        self.recorder
            .record(
                format!("fetch_tree {tree_sha}"),
                self.reader
                    .fetch_tree(&repo.owner, &repo.name, tree_sha, options),
                |tree| {
                    if tree.truncated {
                        format!("{} entries, truncated", tree.entries.len())
                    } else {
                        format!("{} entries", tree.entries.len())
                    }
                },
            )
            .await
    }

    /// Read one file; the reference defaults to the binding's base branch.
    pub async fn read_file(
        &mut self,
        path: &str,
        reference: Option<&str>,
    ) -> Result<FileContent, CoreError> {
        let repo = self.binding()?.clone();
        let options = ReadFileOptions::builder()
            .reference(reference.unwrap_or(&repo.base_branch))
            .build();
        self.recorder
            .record(
                format!("read_file {path}"),
                self.reader
                    .read_file_content(&repo.owner, &repo.name, path, &options),
                |file| format!("{} bytes", file.size),
            )
            .await
    }

    /// Read several files; the reference defaults to the binding's base
    /// branch.
    pub async fn batch_read(
        &mut self,
        paths: &[String],
        options: BatchReadOptions,
    ) -> Result<Vec<FileContent>, CoreError> {
        let repo = self.binding()?.clone();
        let options = match options.reference {
            Some(_) => options,
            None => BatchReadOptions {
                reference: Some(repo.base_branch.clone()),
                ..options
            },
        };
        self.recorder
            .record(
                format!("batch_read_files ({} paths)", paths.len()),
                self.reader
                    .batch_read_files(&repo.owner, &repo.name, paths, &options),
                |files| {
                    let bytes: u64 = files.iter().map(|f| f.size).sum();
                    format!("{} files, {bytes} bytes", files.len())
                },
            )
            .await
    }

    /// Transition the session owned by this run and persist it.
    pub async fn transition(
        &mut self,
        target: SessionState,
        patch: SessionPatch,
    ) -> Result<&AgentSession, CoreError> {
        let next = state_machine::transition(&self.recorder.session, target, patch)?;
        self.recorder.store.put(&next).await?;
        self.recorder.session = next;
        Ok(&self.recorder.session)
    }

    pub async fn append_message(
        &mut self,
        role: MessageRole,
        content: &str,
    ) -> Result<&AgentSession, CoreError> {
        self.recorder
            .save(
                SessionPatch::builder()
                    .messages(vec![NewMessage::new(role, content)])
                    .build(),
            )
            .await?;
        Ok(&self.recorder.session)
    }
}
