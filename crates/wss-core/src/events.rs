//! Asynchronous controller event types.
//!
//! Events are emitted by the device controller through a
//! [`tokio::sync::broadcast`] channel. Applications subscribe to follow the
//! setup sequence and streaming state without polling.

use crate::types::{ControllerState, Target};

/// An event emitted by the device controller.
///
/// Delivery is best-effort through a bounded broadcast channel; slow
/// consumers may miss events.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// The controller moved to a new lifecycle state.
    StateChanged {
        /// State before the transition.
        from: ControllerState,
        /// State after the transition.
        to: ControllerState,
    },

    /// A setup step finished successfully.
    SetupStepCompleted {
        /// Unit the step was sent to.
        target: Target,
        /// Short description of the step (e.g. `"create event 2"`).
        label: String,
    },

    /// A setup step failed and the queue was abandoned.
    SetupFailed {
        /// Unit the failing step was sent to.
        target: Target,
        /// Short description of the step.
        label: String,
        /// Rendered error.
        reason: String,
    },

    /// The streaming loop stopped so a configuration edit can run.
    StreamingPaused,

    /// The streaming loop restarted after a configuration edit.
    StreamingResumed,
}
