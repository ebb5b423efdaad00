//! Question cycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a question cycle currently is.
///
/// ```text
/// Idle → BuildingPrompt → AwaitingCompletion → Sanitizing
///   Sanitizing → RoutingUnanswerable → Explaining
///   Sanitizing → RoutingRefused      → Explaining
///   Sanitizing → Executing           → Explaining
/// Explaining → Done
/// (any non-terminal state) → Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    BuildingPrompt,
    AwaitingCompletion,
    Sanitizing,
    RoutingUnanswerable,
    RoutingRefused,
    Executing,
    Explaining,
    Done,
    Failed,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::BuildingPrompt => "building_prompt",
            Self::AwaitingCompletion => "awaiting_completion",
            Self::Sanitizing => "sanitizing",
            Self::RoutingUnanswerable => "routing_unanswerable",
            Self::RoutingRefused => "routing_refused",
            Self::Executing => "executing",
            Self::Explaining => "explaining",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// `Done` and `Failed` end a cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(&self, next: CycleState) -> bool {
        use CycleState::*;
        match (*self, next) {
            (Done | Failed, Idle) => true,
            (s, Failed) => !s.is_terminal(),
            (Idle, BuildingPrompt)
            | (BuildingPrompt, AwaitingCompletion)
            | (AwaitingCompletion, Sanitizing)
            | (Sanitizing, RoutingUnanswerable | RoutingRefused | Executing)
            | (RoutingUnanswerable | RoutingRefused | Executing, Explaining)
            | (Explaining, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
