//! Run lifecycle.
//!
//! `pending -> running -> {finished | failed | interrupted}`. A run aborted
//! before the engine starts may jump from `pending` straight to `failed` or
//! `interrupted`. Terminal states are final.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Finished,
    Failed,
    Interrupted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
            RunStatus::Failed => "failed",
            RunStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Finished | RunStatus::Failed | RunStatus::Interrupted
        )
    }

    /// Validate and perform a transition to `next`.
    pub fn transition(self, next: RunStatus) -> CoreResult<RunStatus> {
        let allowed = match (self, next) {
            (RunStatus::Pending, RunStatus::Running) => true,
            (RunStatus::Pending, RunStatus::Failed | RunStatus::Interrupted) => true,
            (RunStatus::Running, next) => next.is_terminal(),
            _ => false,
        };

        if allowed {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
