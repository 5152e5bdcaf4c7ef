//! Error types shared by the scheduler, coroutines and promises
//!
//! A single error enum serves two roles: it is the ordinary `Result` error
//! of the library surface, and it is the "exception" that can be thrown
//! into a suspended routine (`Resume::Throw`) or carried by a process as
//! its final value (`Value::Error`). Routines observe scheduler failures
//! (a failed fork, an unknown kill target) as catchable values of this
//! type on their next step.

use crate::process::ProcessId;
use thiserror::Error;

/// Errors raised by the scheduler, the trampoline and the promise layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Application-defined failure raised inside a routine
    #[error("{0}")]
    Message(String),

    /// `fork` target was not found in the queue
    #[error("unable to fork process id: {0}")]
    Fork(ProcessId),

    /// `kill` target was not found in the queue
    #[error("invalid task id: {0}")]
    InvalidTaskId(ProcessId),

    /// Fork of a process built from a pre-instantiated routine
    #[error("only callable backed processes can be cloned")]
    NotCloneable,

    /// Socket wait syscall issued on a scheduler without a reactor
    #[error("scheduler has no io poll attached")]
    IoPollDisabled,

    /// Underlying socket or multiplexer failure
    #[error("io error: {0}")]
    Io(String),

    /// A coroutine was stepped again after raising
    #[error("coroutine already failed")]
    Poisoned,
}

impl Error {
    /// Build an application-level error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }
}

// std::io::Error is neither Clone nor PartialEq, so only its rendering is
// carried across coroutine frames.
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error.to_string())
    }
}
