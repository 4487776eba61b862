//! Session state machine.
//!
//! The only code that changes a session's `state`, appends to `messages` or
//! `steps`, or sets `preview_id`/`pr`/`repo`. Both entry points take the
//! current session by reference and return a new one, so a rejected call
//! leaves the caller's session untouched.
//!
//! - [`transition`] moves to a new state and applies a patch atomically.
//! - [`amend`] applies a patch within the current (non-terminal) state.

use chrono::Utc;
use typed_builder::TypedBuilder;

use crate::error::CoreError;
use crate::repo::RepositoryBinding;
use crate::session::{
    AgentMessage, AgentSession, AgentSessionStep, MessageRole, PullRequestInfo, SessionState,
    StepStatus,
};

/// Longest `details` string kept on a step.
pub const MAX_STEP_DETAILS_CHARS: usize = 200;

/// A message to append. The timestamp is assigned when the patch is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A step to append. The timestamp is assigned when the patch is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStep {
    pub name: String,
    pub status: StepStatus,
    pub details: Option<String>,
}

impl NewStep {
    pub fn new(name: impl Into<String>, status: StepStatus) -> Self {
        Self {
            name: name.into(),
            status,
            details: None,
        }
    }

    pub fn started(name: impl Into<String>) -> Self {
        Self::new(name, StepStatus::Started)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Resolves a `started` step to its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResolution {
    /// Position of the step in the session's step list.
    pub index: usize,
    pub status: StepStatus,
    pub details: Option<String>,
}

impl StepResolution {
    pub fn succeeded(index: usize, details: impl Into<String>) -> Self {
        Self {
            index,
            status: StepStatus::Succeeded,
            details: Some(details.into()),
        }
    }

    pub fn failed(index: usize, details: impl Into<String>) -> Self {
        Self {
            index,
            status: StepStatus::Failed,
            details: Some(details.into()),
        }
    }
}

/// Changes applied together with a transition or amendment.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct SessionPatch {
    #[builder(default)]
    pub messages: Vec<NewMessage>,

    #[builder(default)]
    pub steps: Vec<NewStep>,

    #[builder(default)]
    pub step_updates: Vec<StepResolution>,

    #[builder(default, setter(strip_option, into))]
    pub preview_id: Option<String>,

    #[builder(default, setter(strip_option))]
    pub pr: Option<PullRequestInfo>,

    /// Attach a repository. Allowed once; re-binding to a different
    /// repository is rejected.
    #[builder(default, setter(strip_option))]
    pub repo: Option<RepositoryBinding>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.steps.is_empty()
            && self.step_updates.is_empty()
            && self.preview_id.is_none()
            && self.pr.is_none()
            && self.repo.is_none()
    }
}

/// Move `session` to `target`, applying `patch` in the same step.
///
/// # Errors
///
/// Returns `CoreError::InvalidTransition` if `target` is not reachable from
/// the current state, and `CoreError::InvalidPatch` if any part of the patch
/// is invalid. In both cases nothing is applied.
pub fn transition(
    session: &AgentSession,
    target: SessionState,
    patch: SessionPatch,
) -> Result<AgentSession, CoreError> {
    if !session.state.can_transition_to(target) {
        return Err(CoreError::InvalidTransition {
            from: session.state,
            to: target,
        });
    }

    let mut next = apply_patch(session, patch)?;
    next.state = target;
    Ok(next)
}

/// Apply `patch` without changing state.
///
/// # Errors
///
/// Returns `CoreError::InvalidTransition` for sessions in a terminal state,
/// and `CoreError::InvalidPatch` if any part of the patch is invalid.
pub fn amend(session: &AgentSession, patch: SessionPatch) -> Result<AgentSession, CoreError> {
    if session.state.is_terminal() {
        return Err(CoreError::InvalidTransition {
            from: session.state,
            to: session.state,
        });
    }
    apply_patch(session, patch)
}

fn apply_patch(session: &AgentSession, patch: SessionPatch) -> Result<AgentSession, CoreError> {
    let now = Utc::now();
    let mut next = session.clone();

    if let Some(repo) = patch.repo {
        if let Some(bound) = &next.repo
            && *bound != repo
        {
            return Err(CoreError::InvalidPatch(format!(
                "session is bound to {}, cannot rebind to {}",
                bound.full_name(),
                repo.full_name()
            )));
        }
        next.repo = Some(repo);
    }

    for update in patch.step_updates {
        let step = next.steps.get_mut(update.index).ok_or_else(|| {
            CoreError::InvalidPatch(format!("no step at index {}", update.index))
        })?;
        if step.status != StepStatus::Started {
            return Err(CoreError::InvalidPatch(format!(
                "step {} ({}) is already resolved",
                update.index, step.name
            )));
        }
        if update.status == StepStatus::Started {
            return Err(CoreError::InvalidPatch(format!(
                "step {} can only be resolved to succeeded or failed",
                update.index
            )));
        }
        step.status = update.status;
        step.resolved_at = Some(now);
        if let Some(details) = update.details {
            step.details = Some(clip_details(&details));
        }
    }

    next.steps.extend(patch.steps.into_iter().map(|step| {
        let resolved_at = (step.status != StepStatus::Started).then_some(now);
        AgentSessionStep {
            name: step.name,
            status: step.status,
            timestamp: now,
            resolved_at,
            details: step.details.as_deref().map(clip_details),
        }
    }));

    next.messages
        .extend(patch.messages.into_iter().map(|message| AgentMessage {
            role: message.role,
            content: message.content,
            timestamp: now,
        }));

    if let Some(preview_id) = patch.preview_id {
        next.preview_id = Some(preview_id);
    }
    if let Some(pr) = patch.pr {
        next.pr = Some(pr);
    }

    // Keep the timeline monotonic even if the wall clock steps backwards.
    next.updated_at = now.max(session.updated_at);
    Ok(next)
}

fn clip_details(details: &str) -> String {
    if details.chars().count() <= MAX_STEP_DETAILS_CHARS {
        details.to_owned()
    } else {
        let clipped: String = details.chars().take(MAX_STEP_DETAILS_CHARS).collect();
        format!("{clipped}...")
    }
}
