use std::fmt;

use crate::fragment::FragmentKind;

/// Lifecycle of a session.
///
/// ```text
/// Uninitialized --open--> AcceptingInput --start--> Generating
///                              ^                        |
///                              +------ done/stop -------+
/// any live state --close--> Closed      unrecoverable failure --> Error
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    AcceptingInput,
    Generating,
    Closed,
    Error,
}

/// Operations gated by the session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Open,
    AddText,
    AddImage,
    Append,
    StartGeneration,
    Step,
    StopGeneration,
    Close,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::AcceptingInput => "accepting input",
            SessionState::Generating => "generating",
            SessionState::Closed => "closed",
            SessionState::Error => "in error",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Open => "open the session",
            Operation::AddText => "add text",
            Operation::AddImage => "add an image",
            Operation::Append => "append a fragment",
            Operation::StartGeneration => "start generation",
            Operation::Step => "generate a token",
            Operation::StopGeneration => "stop generation",
            Operation::Close => "close the session",
        };
        f.write_str(name)
    }
}

/// Errors raised by the session state machine and its input queue.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("session state error: cannot {op} while the session is {state}")]
    InvalidState { op: Operation, state: SessionState },

    #[error("session closed error: cannot {op}, the session is {state}")]
    Closed { op: Operation, state: SessionState },

    #[error("invalid input: {0} fragments must not be empty")]
    EmptyFragment(FragmentKind),

    #[error("allocation error: failed to grow the input queue by {0} fragments")]
    Allocation(usize),
}

impl SessionState {
    /// Closed and errored sessions never come back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }

    /// Whether `op` is legal in this state.
    pub fn allows(&self, op: Operation) -> bool {
        use Operation::*;
        match self {
            SessionState::Uninitialized => matches!(op, Open | Close),
            SessionState::AcceptingInput => {
                matches!(op, AddText | AddImage | Append | StartGeneration | Close)
            }
            SessionState::Generating => matches!(op, Step | StopGeneration | Close),
            SessionState::Closed | SessionState::Error => false,
        }
    }

    /// Fail fast when `op` is not legal in this state.
    pub fn check(&self, op: Operation) -> Result<(), SessionError> {
        if self.allows(op) {
            Ok(())
        } else if self.is_terminal() {
            Err(SessionError::Closed { op, state: *self })
        } else {
            Err(SessionError::InvalidState { op, state: *self })
        }
    }
}
