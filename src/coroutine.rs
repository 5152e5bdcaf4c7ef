//! Coroutine trampoline
//!
//! `Coroutine` drives a routine to its next outward suspension point while
//! flattening nested sub-routines into a single resumable sequence. It
//! keeps an explicit stack of suspended parent frames: yielding a routine
//! descends, completing a frame pops and feeds the parent, and an error
//! raised in a frame is redirected into the parent (or re-raised outward
//! when the stack is empty).
//!
//! Two completion forms exist at every level: natural exhaustion
//! (`Step::Done`) and the explicit `Signal::Return` marker. A nested frame
//! that exhausts naturally feeds `Value::Null` to its parent; only the
//! marker carries a value upward. At the outermost frame both complete the
//! coroutine, the marker with its unwrapped value.

use crate::error::Error;
use crate::routine::{Resume, Routine, Signal, Step};
use crate::value::Value;
use std::rc::Rc;

/// What a coroutine factory produces when invoked.
pub enum Sourced {
    /// A routine to drive
    Routine(Box<dyn Routine>),

    /// A plain value; it is wrapped in a routine that suspends once and
    /// then completes with the value
    Value(Value),
}

/// The source a coroutine (and the process wrapping it) is built from.
///
/// Only the `Callable` variant can be re-instantiated, which is what
/// `fork` requires; forking a process built from a pre-built routine
/// instance fails with [`Error::NotCloneable`].
pub enum CoroutineSource {
    /// Re-instantiable factory
    Callable(Rc<dyn Fn() -> Result<Sourced, Error>>),

    /// Pre-built routine instance
    Instance(Box<dyn Routine>),
}

impl std::fmt::Debug for CoroutineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoroutineSource::Callable(_) => f.write_str("Callable(..)"),
            CoroutineSource::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

impl CoroutineSource {
    /// Source from a factory that may produce a routine or a plain value,
    /// or fail outright (the failure is re-raised on the first step).
    pub fn callable<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Sourced, Error> + 'static,
    {
        CoroutineSource::Callable(Rc::new(factory))
    }

    /// Source from an infallible routine factory.
    pub fn factory<F>(make: F) -> Self
    where
        F: Fn() -> Box<dyn Routine> + 'static,
    {
        Self::callable(move || Ok(Sourced::Routine(make())))
    }

    /// Source from a pre-built routine instance. Not re-instantiable.
    pub fn instance(routine: Box<dyn Routine>) -> Self {
        CoroutineSource::Instance(routine)
    }
}

/// Wraps a plain value as a routine: one bare suspension, then done.
struct ValueRoutine {
    value: Option<Value>,
    yielded: bool,
}

impl ValueRoutine {
    fn new(value: Value) -> Self {
        Self {
            value: Some(value),
            yielded: false,
        }
    }
}

impl Routine for ValueRoutine {
    fn resume(&mut self, input: Resume) -> Result<Step, Error> {
        input.into_value()?;
        if !self.yielded {
            self.yielded = true;
            return Ok(Step::Yield(Signal::Value(Value::Null)));
        }
        Ok(Step::Done(self.value.take().unwrap_or_default()))
    }
}

/// Trampoline driver for one routine and its nested sub-routines.
pub struct Coroutine {
    /// The frame currently executing
    current: Box<dyn Routine>,

    /// Suspended parent frames; empty exactly when `current` is the
    /// outermost routine
    stack: Vec<Box<dyn Routine>>,

    /// Queued delivery for the next advance. Takes precedence over the
    /// external input: this is how factory failures and redirected
    /// exceptions are injected.
    inbound: Option<Resume>,

    /// Final value once the coroutine has completed
    result: Option<Value>,

    /// Set when an error escaped the outermost frame
    failed: bool,

    /// Count of outward suspensions so far
    key: u64,
}

impl Coroutine {
    /// Build the driver, invoking the factory for callable sources.
    ///
    /// A factory error is not raised here; it is stored and re-raised on
    /// the first `step`, where the external stepper can observe it.
    pub fn new(source: CoroutineSource) -> Self {
        let (current, pending): (Box<dyn Routine>, Option<Error>) = match source {
            CoroutineSource::Instance(routine) => (routine, None),
            CoroutineSource::Callable(factory) => match factory() {
                Ok(Sourced::Routine(routine)) => (routine, None),
                Ok(Sourced::Value(value)) => (Box::new(ValueRoutine::new(value)), None),
                Err(error) => (Box::new(ValueRoutine::new(Value::Null)), Some(error)),
            },
        };
        Self {
            current,
            stack: Vec::new(),
            inbound: pending.map(Resume::Throw),
            result: None,
            failed: false,
            key: 0,
        }
    }

    /// Advance to the next outward suspension point or to completion.
    ///
    /// Descents, pops and exception redirections loop internally without
    /// consuming an external step; only an ordinary suspension of the
    /// innermost frame, or completion of the outermost, returns.
    pub fn step(&mut self, input: Resume) -> Result<Step, Error> {
        if let Some(value) = &self.result {
            return Ok(Step::Done(value.clone()));
        }
        if self.failed {
            return Err(Error::Poisoned);
        }
        let mut next = self.inbound.take().unwrap_or(input);
        loop {
            match self.current.resume(next) {
                Err(error) => match self.stack.pop() {
                    Some(parent) => {
                        self.current = parent;
                        next = Resume::Throw(error);
                    }
                    None => {
                        self.failed = true;
                        return Err(error);
                    }
                },
                Ok(Step::Done(value)) => match self.stack.pop() {
                    Some(parent) => {
                        // natural exhaustion of a nested frame discards
                        // its value; only Signal::Return carries one up
                        self.current = parent;
                        next = Resume::Send(Value::Null);
                    }
                    None => {
                        self.result = Some(value.clone());
                        return Ok(Step::Done(value));
                    }
                },
                Ok(Step::Yield(signal)) => match signal {
                    Signal::Routine(routine) => {
                        let parent = std::mem::replace(&mut self.current, routine);
                        self.stack.push(parent);
                        next = Resume::Start;
                    }
                    Signal::Return(value) => match self.stack.pop() {
                        Some(parent) => {
                            self.current = parent;
                            next = Resume::Send(value);
                        }
                        None => {
                            self.result = Some(value.clone());
                            return Ok(Step::Done(value));
                        }
                    },
                    // a top-level routine signals failure by yielding an
                    // error: the coroutine completes with the error as
                    // its result rather than raising it
                    Signal::Value(Value::Error(error)) if self.stack.is_empty() => {
                        let value = Value::Error(error);
                        self.result = Some(value.clone());
                        return Ok(Step::Done(value));
                    }
                    suspended => {
                        self.key += 1;
                        return Ok(Step::Yield(suspended));
                    }
                },
            }
        }
    }

    /// True once the coroutine completed or an error escaped it.
    pub fn completed(&self) -> bool {
        self.result.is_some() || self.failed
    }

    /// The final value, once completed.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// The key of the current suspension (count of outward yields).
    pub fn key(&self) -> u64 {
        self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::routine_fn;

    fn drive_to_end(coroutine: &mut Coroutine) -> Result<Value, Error> {
        let mut input = Resume::Start;
        loop {
            match coroutine.step(input)? {
                Step::Done(value) => return Ok(value),
                Step::Yield(_) => input = Resume::Send(Value::Null),
            }
        }
    }

    fn counting(limit: i64) -> Box<dyn Routine> {
        let mut n = 0;
        routine_fn(move |input| {
            input.into_value()?;
            n += 1;
            if n < limit {
                Ok(Step::Yield(Signal::Value(Value::Int(n))))
            } else {
                Ok(Step::Done(Value::Int(n)))
            }
        })
    }

    #[test]
    fn test_plain_value_source_suspends_once() {
        let mut coroutine =
            Coroutine::new(CoroutineSource::callable(|| Ok(Sourced::Value(Value::Int(2)))));
        assert!(matches!(
            coroutine.step(Resume::Start).unwrap(),
            Step::Yield(Signal::Value(Value::Null))
        ));
        assert_eq!(
            drive_to_end(&mut coroutine).unwrap(),
            Value::Int(2)
        );
        assert!(coroutine.completed());
    }

    #[test]
    fn test_factory_error_raises_on_first_step() {
        let mut coroutine =
            Coroutine::new(CoroutineSource::callable(|| Err(Error::msg("no source"))));
        assert_eq!(
            coroutine.step(Resume::Start).unwrap_err(),
            Error::msg("no source")
        );
        assert!(coroutine.completed());
        assert_eq!(coroutine.step(Resume::Start).unwrap_err(), Error::Poisoned);
    }

    #[test]
    fn test_nested_routine_descends_without_outward_yield() {
        // parent yields a nested counting routine; the trampoline must
        // surface the nested routine's own suspensions
        let mut phase = 0;
        let parent = routine_fn(move |input| {
            input.into_value()?;
            phase += 1;
            match phase {
                1 => Ok(Step::Yield(Signal::Routine(counting(3)))),
                _ => Ok(Step::Done(Value::Int(100))),
            }
        });
        let mut coroutine = Coroutine::new(CoroutineSource::instance(parent));

        // two suspensions from the nested routine (1 and 2)
        assert!(matches!(
            coroutine.step(Resume::Start).unwrap(),
            Step::Yield(Signal::Value(Value::Int(1)))
        ));
        assert!(matches!(
            coroutine.step(Resume::Send(Value::Null)).unwrap(),
            Step::Yield(Signal::Value(Value::Int(2)))
        ));
        // nested frame completes; parent resumes and finishes
        assert!(matches!(
            coroutine.step(Resume::Send(Value::Null)).unwrap(),
            Step::Done(Value::Int(100))
        ));
    }

    #[test]
    fn test_nested_natural_return_feeds_null_to_parent() {
        let inner = || {
            routine_fn(|input| {
                input.into_value()?;
                Ok(Step::Done(Value::Int(42)))
            })
        };
        let mut phase = 0;
        let parent = routine_fn(move |input| {
            let received = input.into_value()?;
            phase += 1;
            match phase {
                1 => Ok(Step::Yield(Signal::Routine(inner()))),
                _ => Ok(Step::Done(received)),
            }
        });
        let mut coroutine = Coroutine::new(CoroutineSource::instance(parent));
        // the inner value is discarded: parent sees Null
        assert_eq!(drive_to_end(&mut coroutine).unwrap(), Value::Null);
    }

    #[test]
    fn test_return_marker_carries_value_to_parent() {
        let inner = || {
            routine_fn(|input| {
                input.into_value()?;
                Ok(Step::Yield(Signal::Return(Value::Int(42))))
            })
        };
        let mut phase = 0;
        let parent = routine_fn(move |input| {
            let received = input.into_value()?;
            phase += 1;
            match phase {
                1 => Ok(Step::Yield(Signal::Routine(inner()))),
                _ => Ok(Step::Done(received)),
            }
        });
        let mut coroutine = Coroutine::new(CoroutineSource::instance(parent));
        assert_eq!(drive_to_end(&mut coroutine).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_top_level_return_marker_unwraps() {
        let routine = routine_fn(|input| {
            input.into_value()?;
            Ok(Step::Yield(Signal::Return(Value::Str("early".into()))))
        });
        let mut coroutine = Coroutine::new(CoroutineSource::instance(routine));
        assert_eq!(
            drive_to_end(&mut coroutine).unwrap(),
            Value::Str("early".into())
        );
    }

    #[test]
    fn test_three_level_raise_surfaces_outward() {
        fn level3() -> Box<dyn Routine> {
            routine_fn(|_| Err(Error::msg("boom")))
        }
        fn level2() -> Box<dyn Routine> {
            let mut phase = 0;
            routine_fn(move |input| {
                input.into_value()?;
                phase += 1;
                match phase {
                    1 => Ok(Step::Yield(Signal::Routine(level3()))),
                    _ => Ok(Step::Done(Value::Null)),
                }
            })
        }
        let mut phase = 0;
        let level1 = routine_fn(move |input| {
            input.into_value()?;
            phase += 1;
            match phase {
                1 => Ok(Step::Yield(Signal::Routine(level2()))),
                _ => Ok(Step::Done(Value::Null)),
            }
        });
        let mut coroutine = Coroutine::new(CoroutineSource::instance(level1));
        assert_eq!(
            coroutine.step(Resume::Start).unwrap_err(),
            Error::msg("boom")
        );
    }

    #[test]
    fn test_parent_can_catch_nested_raise() {
        fn failing() -> Box<dyn Routine> {
            routine_fn(|_| Err(Error::msg("inner")))
        }
        let mut phase = 0;
        let parent = routine_fn(move |input| {
            phase += 1;
            match phase {
                1 => Ok(Step::Yield(Signal::Routine(failing()))),
                _ => match input {
                    Resume::Throw(error) => Ok(Step::Done(Value::Str(error.to_string()))),
                    other => {
                        other.into_value()?;
                        Ok(Step::Done(Value::Null))
                    }
                },
            }
        });
        let mut coroutine = Coroutine::new(CoroutineSource::instance(parent));
        assert_eq!(
            drive_to_end(&mut coroutine).unwrap(),
            Value::Str("inner".into())
        );
    }

    #[test]
    fn test_yielded_error_completes_top_level() {
        let routine = routine_fn(|input| {
            input.into_value()?;
            Ok(Step::Yield(Signal::Value(Value::Error(Error::msg("boom")))))
        });
        let mut coroutine = Coroutine::new(CoroutineSource::instance(routine));
        match coroutine.step(Resume::Start).unwrap() {
            Step::Done(Value::Error(error)) => assert_eq!(error, Error::msg("boom")),
            other => panic!("expected completion with error value, got {other:?}"),
        }
    }

    #[test]
    fn test_yielded_error_in_nested_frame_passes_through() {
        // with a non-empty stack an error value is an ordinary suspension
        let inner = || {
            let mut phase = 0;
            routine_fn(move |input| {
                input.into_value()?;
                phase += 1;
                match phase {
                    1 => Ok(Step::Yield(Signal::Value(Value::Error(Error::msg("hint"))))),
                    _ => Ok(Step::Yield(Signal::Return(Value::Int(5)))),
                }
            })
        };
        let mut phase = 0;
        let parent = routine_fn(move |input| {
            let received = input.into_value()?;
            phase += 1;
            match phase {
                1 => Ok(Step::Yield(Signal::Routine(inner()))),
                _ => Ok(Step::Done(received)),
            }
        });
        let mut coroutine = Coroutine::new(CoroutineSource::instance(parent));
        assert!(matches!(
            coroutine.step(Resume::Start).unwrap(),
            Step::Yield(Signal::Value(Value::Error(_)))
        ));
        assert_eq!(
            drive_to_end(&mut coroutine).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn test_key_counts_outward_suspensions() {
        let mut coroutine = Coroutine::new(CoroutineSource::factory(|| counting(3)));
        assert_eq!(coroutine.key(), 0);
        coroutine.step(Resume::Start).unwrap();
        coroutine.step(Resume::Send(Value::Null)).unwrap();
        assert_eq!(coroutine.key(), 2);
    }

    #[test]
    fn test_completed_result_is_stable() {
        let mut coroutine =
            Coroutine::new(CoroutineSource::callable(|| Ok(Sourced::Value(Value::Int(9)))));
        drive_to_end(&mut coroutine).unwrap();
        assert!(matches!(
            coroutine.step(Resume::Send(Value::Null)).unwrap(),
            Step::Done(Value::Int(9))
        ));
        assert_eq!(coroutine.result(), Some(&Value::Int(9)));
    }
}
