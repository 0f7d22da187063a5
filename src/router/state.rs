use serde::{Deserialize, Serialize};

/// Stage of a request inside the router.
///
/// The normal path is `Idle -> Classifying -> Dispatching -> Executing ->
/// Recording -> Idle`. A cancelled or timed-out request jumps straight to
/// `Recording` from whichever stage it reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterState {
    Idle,
    Classifying,
    Dispatching,
    Executing,
    Recording,
}

impl RouterState {
    /// Get the state name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterState::Idle => "idle",
            RouterState::Classifying => "classifying",
            RouterState::Dispatching => "dispatching",
            RouterState::Executing => "executing",
            RouterState::Recording => "recording",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: RouterState) -> bool {
        use RouterState::*;
        matches!(
            (self, next),
            (Idle, Classifying)
                | (Classifying, Dispatching)
                | (Dispatching, Executing)
                | (Executing, Recording)
                | (Recording, Idle)
                | (Classifying, Recording)
                | (Dispatching, Recording)
        )
    }
}

impl std::fmt::Display for RouterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
