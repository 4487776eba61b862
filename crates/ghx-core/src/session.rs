//! Agent session data model.
//!
//! An [`AgentSession`] is one unit of automation work against a bound
//! repository. Its fields are read through accessors; every mutation goes
//! through [`state_machine`](crate::state_machine).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::repo::RepositoryBinding;

/// Phase a session is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Planning,
    PreviewReady,
    AwaitingApproval,
    Applying,
    Applied,
    Failed,
}

impl SessionState {
    /// States reachable from this one in a single transition.
    pub fn allowed_transitions(self) -> &'static [SessionState] {
        use SessionState::{
            Applied, Applying, AwaitingApproval, Created, Failed, Planning, PreviewReady,
        };
        match self {
            Created => &[Planning, Failed],
            Planning => &[PreviewReady, Failed],
            PreviewReady => &[AwaitingApproval, Failed],
            AwaitingApproval => &[Applying, Failed],
            Applying => &[Applied, Failed],
            Applied | Failed => &[],
        }
    }

    /// Returns true if `target` is reachable from this state.
    pub fn can_transition_to(self, target: SessionState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// `applied` and `failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Planning => "planning",
            Self::PreviewReady => "preview_ready",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "planning" => Ok(Self::Planning),
            "preview_ready" => Ok(Self::PreviewReady),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "applying" => Ok(Self::Applying),
            "applied" => Ok(Self::Applied),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown session state: {other}")),
        }
    }
}

/// Author of a conversational message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// A message in the session conversation. The timestamp is server-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a recorded step.
///
/// A step left in `Started` has an unknown outcome; it is not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Started,
    Succeeded,
    Failed,
}

/// One entry in the session's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSessionStep {
    pub name: String,
    pub status: StepStatus,
    /// When the step was appended.
    pub timestamp: DateTime<Utc>,
    /// When the step left `Started`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Pull request opened for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: u64,
    pub url: String,
    pub head: String,
    pub base: String,
}

/// Parameters for a new session.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewSession {
    #[builder(setter(into))]
    pub user_id: String,

    #[builder(setter(into))]
    pub name: String,

    #[builder(default = String::from("claude-sonnet-4-20250514"), setter(into))]
    pub model: String,

    #[builder(setter(into))]
    pub goal: String,

    #[builder(default, setter(strip_option))]
    pub repo: Option<RepositoryBinding>,
}

/// A unit of automation work, owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    pub(crate) id: Uuid,
    pub(crate) user_id: String,
    pub(crate) name: String,
    pub(crate) model: String,
    pub(crate) goal: String,
    pub(crate) repo: Option<RepositoryBinding>,
    pub(crate) state: SessionState,
    pub(crate) messages: Vec<AgentMessage>,
    pub(crate) steps: Vec<AgentSessionStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) preview_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) pr: Option<PullRequestInfo>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl AgentSession {
    /// Create a session in the `created` state.
    pub fn new(params: NewSession) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            name: params.name,
            model: params.model,
            goal: params.goal,
            repo: params.repo,
            state: SessionState::Created,
            messages: Vec::new(),
            steps: Vec::new(),
            preview_id: None,
            pr: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn repo(&self) -> Option<&RepositoryBinding> {
        self.repo.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    pub fn steps(&self) -> &[AgentSessionStep] {
        &self.steps
    }

    pub fn preview_id(&self) -> Option<&str> {
        self.preview_id.as_deref()
    }

    pub fn pr(&self) -> Option<&PullRequestInfo> {
        self.pr.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Steps still waiting for an outcome.
    pub fn pending_steps(&self) -> impl Iterator<Item = &AgentSessionStep> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session() -> AgentSession {
        AgentSession::new(
            NewSession::builder()
                .user_id("user-1")
                .name("docs refresh")
                .goal("update the README")
                .build(),
        )
    }

    #[test]
    fn test_should_create_session_in_created_state() {
        let session = new_session();

        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(session.user_id(), "user-1");
        assert_eq!(session.model(), "claude-sonnet-4-20250514");
        assert!(session.messages().is_empty());
        assert!(session.steps().is_empty());
        assert!(session.repo().is_none());
        assert_eq!(session.created_at(), session.updated_at());
    }

    #[test]
    fn test_should_expose_transition_table() {
        assert_eq!(
            SessionState::Created.allowed_transitions(),
            &[SessionState::Planning, SessionState::Failed]
        );
        assert!(SessionState::Applying.can_transition_to(SessionState::Applied));
        assert!(!SessionState::Created.can_transition_to(SessionState::Applying));
        assert!(SessionState::Applied.allowed_transitions().is_empty());
        assert!(SessionState::Failed.allowed_transitions().is_empty());
    }

    #[test]
    fn test_should_reach_failed_from_every_non_terminal_state() {
        let states = [
            SessionState::Created,
            SessionState::Planning,
            SessionState::PreviewReady,
            SessionState::AwaitingApproval,
            SessionState::Applying,
        ];
        for state in states {
            assert!(!state.is_terminal());
            assert!(state.can_transition_to(SessionState::Failed), "{state}");
        }
    }

    #[test]
    fn test_should_round_trip_state_names() {
        for name in [
            "created",
            "planning",
            "preview_ready",
            "awaiting_approval",
            "applying",
            "applied",
            "failed",
        ] {
            let state: SessionState = name.parse().expect("should parse");
            assert_eq!(state.to_string(), name);
            assert_eq!(
                serde_json::to_value(state).expect("should serialize"),
                serde_json::json!(name)
            );
        }
        assert!("archived".parse::<SessionState>().is_err());
    }

    #[test]
    fn test_should_serialize_session_in_camel_case() {
        let session = new_session();
        let value = serde_json::to_value(&session).expect("should serialize");

        assert_eq!(value["userId"], "user-1");
        assert_eq!(value["state"], "created");
        assert!(value.get("previewId").is_none());
        assert!(value.get("createdAt").is_some());

        let back: AgentSession = serde_json::from_value(value).expect("should deserialize");
        assert_eq!(back, session);
    }
}
