//! Orchestration loop state.

use serde::{Deserialize, Serialize};

/// Default number of model-call/tool-execution rounds before the loop gives up.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Assistant text emitted when the iteration cap is reached.
pub const FALLBACK_ANSWER: &str = "Can't generate answer";

/// Where one orchestration run currently is.
///
/// `Augmenting → Calling → (ExecutingTools → Calling)* → Done | IterationCapped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoopState {
    /// Retrieving knowledge and recording the user turn
    Augmenting,
    /// Waiting on the model for round `iteration`
    Calling { iteration: usize },
    /// Running the tools requested in round `iteration`
    ExecutingTools { iteration: usize },
    /// The last response carried no tool calls
    Done { iterations: usize },
    /// The cap was hit while the model still wanted tools
    IterationCapped { iterations: usize },
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Done { .. } | LoopState::IterationCapped { .. })
    }

    /// The state after a model response in round `iteration`.
    pub fn after_response(iteration: usize, wants_tools: bool) -> Self {
        if wants_tools {
            LoopState::ExecutingTools { iteration }
        } else {
            LoopState::Done {
                iterations: iteration + 1,
            }
        }
    }

    /// The state after tools ran in round `iteration`, given the cap.
    pub fn after_tools(iteration: usize, max_iterations: usize) -> Self {
        let next = iteration + 1;
        if next >= max_iterations {
            LoopState::IterationCapped { iterations: next }
        } else {
            LoopState::Calling { iteration: next }
        }
    }
}
