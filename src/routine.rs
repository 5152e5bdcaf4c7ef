//! Resumable routines and the yield protocol
//!
//! A routine is an explicit state machine: each `resume` either suspends
//! with a [`Signal`] or completes with a final [`Value`]. The trampoline
//! ([`crate::coroutine::Coroutine`]) flattens nested routines into one
//! resumable sequence, and the scheduler drives that sequence one outward
//! suspension at a time.
//!
//! What a routine yields determines how the scheduler treats the
//! suspension:
//! - [`Signal::Syscall`] asks the scheduler to mutate its own state;
//! - [`Signal::Routine`] descends into a sub-coroutine;
//! - [`Signal::Return`] completes the current frame early with a value;
//! - [`Signal::Value`] passes through opaquely and merely reschedules.

use crate::error::Error;
use crate::syscall::SysCall;
use crate::value::Value;
use std::fmt;
use std::time::Duration;

/// What a suspended routine is resumed with.
#[derive(Debug)]
pub enum Resume {
    /// First activation; there is no suspension point to deliver to yet
    Start,

    /// A value sent into the suspension point
    Send(Value),

    /// An exception thrown at the suspension point
    Throw(Error),
}

impl Resume {
    /// Unwrap the delivered value, propagating a thrown exception.
    ///
    /// `Start` resumes with `Value::Null`, like an un-sent suspension.
    /// Routines that do not want to handle injected exceptions use `?`
    /// on this to re-raise them, which unwinds to the parent frame.
    pub fn into_value(self) -> Result<Value, Error> {
        match self {
            Resume::Start => Ok(Value::Null),
            Resume::Send(value) => Ok(value),
            Resume::Throw(error) => Err(error),
        }
    }
}

/// A suspension payload yielded by a routine.
pub enum Signal {
    /// Opaque value; the scheduler reschedules the process unchanged
    Value(Value),

    /// Descend into a nested routine; its completion value is sent back
    Routine(Box<dyn Routine>),

    /// Complete the current frame early with the given value
    Return(Value),

    /// Request a scheduler mutation (spawn, fork, kill, socket wait, ...)
    Syscall(SysCall),
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Signal::Routine(_) => f.write_str("Routine(..)"),
            Signal::Return(value) => f.debug_tuple("Return").field(value).finish(),
            Signal::Syscall(call) => f.debug_tuple("Syscall").field(&call.name()).finish(),
        }
    }
}

impl PartialEq for Signal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Signal::Value(a), Signal::Value(b)) => a == b,
            (Signal::Return(a), Signal::Return(b)) => a == b,
            // syscalls are opaque effects; compare by their request name,
            // mirroring how they are rendered in `Debug`
            (Signal::Syscall(a), Signal::Syscall(b)) => a.name() == b.name(),
            // routines carry no comparable identity
            _ => false,
        }
    }
}

/// The result of advancing a routine by one step.
#[derive(Debug)]
pub enum Step {
    /// The routine suspended with a signal
    Yield(Signal),

    /// The routine ran to completion with a final value
    Done(Value),
}

/// A resumable unit of cooperative execution.
///
/// Implementations advance to their next suspension point on every
/// `resume` call. Raising is returning `Err`: with a parent frame the
/// error is redirected into the parent, at the outermost frame it is
/// re-raised to whatever drives the step.
pub trait Routine {
    /// Advance to the next suspension point or to completion.
    fn resume(&mut self, input: Resume) -> Result<Step, Error>;
}

/// Routine built from a step closure.
///
/// The closure owns whatever state the routine needs (typically a phase
/// counter) and is called once per resumption:
///
/// ```rust,ignore
/// let mut phase = 0;
/// let routine = routine_fn(move |input| {
///     Ok(match phase {
///         0 => {
///             phase = 1;
///             Step::Yield(Signal::Syscall(syscall::process_id()))
///         }
///         _ => Step::Done(input.into_value()?),
///     })
/// });
/// ```
struct StepFn<F> {
    step: F,
}

impl<F> Routine for StepFn<F>
where
    F: FnMut(Resume) -> Result<Step, Error>,
{
    fn resume(&mut self, input: Resume) -> Result<Step, Error> {
        (self.step)(input)
    }
}

/// Box a step closure as a routine.
pub fn routine_fn<F>(step: F) -> Box<dyn Routine>
where
    F: FnMut(Resume) -> Result<Step, Error> + 'static,
{
    Box::new(StepFn { step })
}

/// Routine that blocks the current step for `duration`, suspends once,
/// then completes.
///
/// The sleep happens while advancing, so it occupies the whole scheduler
/// for its duration; the suspension after it is what gives other queued
/// processes their turn.
pub fn sleep(duration: Duration) -> Box<dyn Routine> {
    let mut slept = false;
    routine_fn(move |input| {
        input.into_value()?;
        if !slept {
            slept = true;
            std::thread::sleep(duration);
            return Ok(Step::Yield(Signal::Value(Value::Null)));
        }
        Ok(Step::Done(Value::Null))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_value_start_is_null() {
        assert_eq!(Resume::Start.into_value().unwrap(), Value::Null);
    }

    #[test]
    fn test_into_value_propagates_throw() {
        let result = Resume::Throw(Error::msg("boom")).into_value();
        assert_eq!(result.unwrap_err(), Error::msg("boom"));
    }

    #[test]
    fn test_step_fn_threads_state() {
        let mut count = 0;
        let mut routine = routine_fn(move |input| {
            input.into_value()?;
            count += 1;
            if count < 3 {
                Ok(Step::Yield(Signal::Value(Value::Int(count))))
            } else {
                Ok(Step::Done(Value::Int(count)))
            }
        });

        assert!(matches!(
            routine.resume(Resume::Start).unwrap(),
            Step::Yield(Signal::Value(Value::Int(1)))
        ));
        assert!(matches!(
            routine.resume(Resume::Send(Value::Null)).unwrap(),
            Step::Yield(Signal::Value(Value::Int(2)))
        ));
        assert!(matches!(
            routine.resume(Resume::Send(Value::Null)).unwrap(),
            Step::Done(Value::Int(3))
        ));
    }

    #[test]
    fn test_sleep_suspends_once() {
        let mut routine = sleep(Duration::from_millis(1));
        assert!(matches!(
            routine.resume(Resume::Start).unwrap(),
            Step::Yield(Signal::Value(Value::Null))
        ));
        assert!(matches!(
            routine.resume(Resume::Send(Value::Null)).unwrap(),
            Step::Done(Value::Null)
        ));
    }
}
