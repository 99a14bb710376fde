use std::fmt;

use serde::Serialize;

use crate::habit::{HabitState, LifecycleEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EngineError {
    /// The event's precondition does not hold for the habit's current state.
    /// Signals that the caller's view of the habit is out of date.
    InvalidTransition {
        event: LifecycleEvent,
        state: HabitState,
        reason: &'static str,
    },
    /// A stored or supplied calendar value could not be parsed or moved.
    InvalidDate(String),
    UnknownTimeZone(String),
    /// A stored record could not be decoded.
    Corrupt(String),
    /// The store collaborator failed.
    Store(String),
}

impl EngineError {
    /// True for errors caused by malformed data rather than business rules.
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidDate(_)
                | EngineError::UnknownTimeZone(_)
                | EngineError::Corrupt(_)
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidTransition {
                event,
                state,
                reason,
            } => write!(f, "invalid transition {event} from {state}: {reason}"),
            EngineError::InvalidDate(msg) => write!(f, "invalid date: {msg}"),
            EngineError::UnknownTimeZone(name) => write!(f, "unknown time zone: {name}"),
            EngineError::Corrupt(msg) => write!(f, "corrupt record: {msg}"),
            EngineError::Store(msg) => write!(f, "store failure: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

pub type Result<T> = std::result::Result<T, EngineError>;
