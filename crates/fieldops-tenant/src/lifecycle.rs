//! Job status lifecycle
//!
//! ```text
//! pending ─► assigned ─► in_progress ─┬─► completed
//!    │          ▲  │                  ├─► unable_to_serve ─┐
//!    │          │  │                  └─► cancelled        │
//!    │          └──┼──────────────────────────────────────┘
//!    └─────────────┴─► cancelled
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    UnableToServe,
    Cancelled,
}

/// Statistics consequence of landing on a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsTrigger {
    Completed { successful: bool },
    Cancelled,
    /// `unable_to_serve -> assigned`: the job is open again
    Reopened,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("unknown job status: {0}")]
    UnknownStatus(String),
    #[error("illegal job transition {from:?} -> {to:?}")]
    Illegal { from: JobStatus, to: JobStatus },
}

impl JobStatus {
    pub fn parse(s: &str) -> Result<Self, TransitionError> {
        match s {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "unable_to_serve" => Ok(Self::UnableToServe),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TransitionError::UnknownStatus(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::UnableToServe => "unable_to_serve",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Cancelled)
                | (Assigned, InProgress)
                | (Assigned, Cancelled)
                | (InProgress, Completed)
                | (InProgress, UnableToServe)
                | (InProgress, Cancelled)
                | (UnableToServe, Assigned)
        )
    }

    /// Validate a transition and report whether it moves counters
    pub fn transition(self, next: JobStatus) -> Result<Option<StatsTrigger>, TransitionError> {
        if !self.can_transition_to(next) {
            return Err(TransitionError::Illegal { from: self, to: next });
        }
        Ok(match next {
            Self::Completed => Some(StatsTrigger::Completed { successful: true }),
            Self::UnableToServe => Some(StatsTrigger::Completed { successful: false }),
            Self::Cancelled => Some(StatsTrigger::Cancelled),
            Self::Assigned if self == Self::UnableToServe => Some(StatsTrigger::Reopened),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_triggers_only_on_completion() {
        assert_eq!(JobStatus::Pending.transition(JobStatus::Assigned), Ok(None));
        assert_eq!(JobStatus::Assigned.transition(JobStatus::InProgress), Ok(None));
        assert_eq!(
            JobStatus::InProgress.transition(JobStatus::Completed),
            Ok(Some(StatsTrigger::Completed { successful: true }))
        );
    }

    #[test]
    fn test_unable_to_serve_is_failure_and_reentrant() {
        assert_eq!(
            JobStatus::InProgress.transition(JobStatus::UnableToServe),
            Ok(Some(StatsTrigger::Completed { successful: false }))
        );
        assert_eq!(
            JobStatus::UnableToServe.transition(JobStatus::Assigned),
            Ok(Some(StatsTrigger::Reopened))
        );
        assert!(!JobStatus::UnableToServe.is_terminal());
    }

    #[test]
    fn test_only_retry_edge_reopens() {
        // first assignment leaves counters alone
        assert_eq!(JobStatus::Pending.transition(JobStatus::Assigned), Ok(None));
        assert!(JobStatus::UnableToServe.transition(JobStatus::InProgress).is_err());
        assert!(JobStatus::UnableToServe.transition(JobStatus::Completed).is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [JobStatus::Completed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                JobStatus::Pending,
                JobStatus::Assigned,
                JobStatus::InProgress,
                JobStatus::Completed,
                JobStatus::UnableToServe,
                JobStatus::Cancelled,
            ] {
                assert!(terminal.transition(next).is_err());
            }
        }
    }

    #[test]
    fn test_parse_round_trip() {
        assert_eq!(JobStatus::parse("in_progress"), Ok(JobStatus::InProgress));
        assert_eq!(
            JobStatus::parse(JobStatus::UnableToServe.as_str()),
            Ok(JobStatus::UnableToServe)
        );
        assert!(JobStatus::parse("served").is_err());
    }
}
