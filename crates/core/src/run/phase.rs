//! Run phases and outcomes.

use serde::{Deserialize, Serialize};

use crate::step::FailureClass;

use super::Artifact;

/// Phase of a run's state machine.
///
/// ```text
/// Initializing -> SelectingTier -> ExecutingTier -> RecordingStatus -> Publishing -> Deciding
///                      ^   |                                                          |
///                      |   +-----------------------> Finalizing <---------------------+
///                      +------------------------------------------------------------- +
///
/// Finalizing -> Completed
///
/// Any non-terminal phase can transition to Failed or Cancelled.
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Initializing,
    SelectingTier,
    ExecutingTier,
    RecordingStatus,
    Publishing,
    Deciding,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub const ALL: [RunPhase; 10] = [
        RunPhase::Initializing,
        RunPhase::SelectingTier,
        RunPhase::ExecutingTier,
        RunPhase::RecordingStatus,
        RunPhase::Publishing,
        RunPhase::Deciding,
        RunPhase::Finalizing,
        RunPhase::Completed,
        RunPhase::Failed,
        RunPhase::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Initializing => "initializing",
            RunPhase::SelectingTier => "selecting_tier",
            RunPhase::ExecutingTier => "executing_tier",
            RunPhase::RecordingStatus => "recording_status",
            RunPhase::Publishing => "publishing",
            RunPhase::Deciding => "deciding",
            RunPhase::Finalizing => "finalizing",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled
        )
    }

    /// Whether `next` is a legal successor of this phase.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Initializing, SelectingTier)
                | (SelectingTier, ExecutingTier)
                | (SelectingTier, Finalizing)
                | (ExecutingTier, RecordingStatus)
                | (RecordingStatus, Publishing)
                | (Publishing, Deciding)
                | (Deciding, SelectingTier)
                | (Deciding, Finalizing)
                | (Finalizing, Completed)
        )
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal classification of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The finalizer produced an artifact.
    Completed {
        artifact: Artifact,
        /// Tiers that failed while the run kept going.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failed_tiers: Vec<String>,
    },
    /// A required collaborator failed for good.
    Failed {
        class: FailureClass,
        reason: String,
        /// Tier being processed when the failure occurred.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tier_id: Option<String>,
    },
    /// The run was cancelled.
    Cancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_recorded_tier: Option<String>,
    },
}

impl RunOutcome {
    /// Terminal phase matching this outcome.
    pub fn phase(&self) -> RunPhase {
        match self {
            RunOutcome::Completed { .. } => RunPhase::Completed,
            RunOutcome::Failed { .. } => RunPhase::Failed,
            RunOutcome::Cancelled { .. } => RunPhase::Cancelled,
        }
    }

    pub fn label(&self) -> &'static str {
        self.phase().as_str()
    }
}
