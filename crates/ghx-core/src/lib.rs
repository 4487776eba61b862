mod config;
mod credentials;
mod error;
mod orchestrator;
mod reader;
mod repo;
mod session;
pub mod state_machine;
mod store;

pub use config::{ApiSettings, EngineConfig, ProjectConfig, ReadLimits, load_project_config};
pub use credentials::{CredentialSupplier, StaticCredentials};
pub use error::CoreError;
pub use orchestrator::{Orchestrator, SessionRun};
pub use reader::{
    BatchReadOptions, DEFAULT_MAX_FILE_BYTES, DEFAULT_MAX_TOTAL_BYTES, FetchTreeOptions,
    ListBranchesOptions, MAX_PER_PAGE, MAX_TREE_DEPTH, MAX_TREE_ENTRIES, ReadFileOptions,
    RepoReader, effective_per_page,
};
pub use repo::{
    BranchCommit, BranchInfo, EntryKind, FileContent, RepositoryBinding, RepositoryInfo,
    TreeEntry, TreeResult,
};
pub use session::{
    AgentMessage, AgentSession, AgentSessionStep, MessageRole, NewSession, PullRequestInfo,
    SessionState, StepStatus,
};
pub use state_machine::{NewMessage, NewStep, SessionPatch, StepResolution};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
