use thiserror::Error;

use crate::types::TaskStatus;

/// Storage-layer failures underneath the task and agent repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid transition for task {task_id}: cannot {action} from {from}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        action: &'static str,
    },

    #[error("task {task_id} was modified concurrently")]
    Conflict { task_id: String },

    #[error("agent {agent_id} was modified concurrently")]
    AgentConflict { agent_id: String },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: String },

    #[error("invalid schedule: {message}")]
    ScheduleConfig { message: String },

    #[error("unknown timezone: {timezone}")]
    UnknownTimezone { timezone: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    ChronoParse(#[from] chrono::ParseError),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_transition(
        task_id: impl Into<String>,
        from: TaskStatus,
        action: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            task_id: task_id.into(),
            from,
            action,
        }
    }

    #[must_use]
    pub fn conflict(task_id: impl Into<String>) -> Self {
        Self::Conflict {
            task_id: task_id.into(),
        }
    }

    #[must_use]
    pub fn agent_conflict(agent_id: impl Into<String>) -> Self {
        Self::AgentConflict {
            agent_id: agent_id.into(),
        }
    }

    #[must_use]
    pub fn task_not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    #[must_use]
    pub fn agent_not_found(agent_id: impl Into<String>) -> Self {
        Self::AgentNotFound {
            agent_id: agent_id.into(),
        }
    }

    #[must_use]
    pub fn schedule_config(message: impl Into<String>) -> Self {
        Self::ScheduleConfig {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unknown_timezone(timezone: impl Into<String>) -> Self {
        Self::UnknownTimezone {
            timezone: timezone.into(),
        }
    }

    #[must_use]
    pub fn backend(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Repository(RepositoryError::Backend {
            context: context.into(),
            source: Box::new(source),
        })
    }

    /// True for failures of the underlying store rather than of the state machine.
    #[must_use]
    pub fn is_repository(&self) -> bool {
        matches!(self, Self::Repository(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Repository(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Repository(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Repository(err.into())
    }
}

impl autopilot_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

autopilot_common::impl_context!();
