//! Process identity and the schedulable process wrapper
//!
//! A `Process` is one schedulable unit: a trampoline-driven coroutine plus
//! identity, inbound value/exception slots and completion state. The
//! scheduler steps it with `run`, feeds syscall replies with `send`, and
//! redirects syscall failures with `throw`.

use crate::coroutine::{Coroutine, CoroutineSource, Sourced};
use crate::error::Error;
use crate::routine::{Resume, Signal, Step};
use crate::value::Value;
use std::fmt;
use std::rc::Rc;

/// Opaque process identifier.
///
/// Root ids are rendered from a per-scheduler counter; children spawned or
/// forked under a parent are rendered as `"<parent>_<n>"`. Lineage lookups
/// split on the *last* underscore, so ids below the root level are not
/// purely numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessId(String);

impl ProcessId {
    /// Root id from the scheduler counter.
    pub(crate) fn root(n: u64) -> Self {
        ProcessId(n.to_string())
    }

    /// Child id under `parent` from the scheduler counter.
    pub(crate) fn child(parent: &ProcessId, n: u64) -> Self {
        ProcessId(format!("{}_{}", parent.0, n))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The parent id encoded in this id, if any (text before the last
    /// underscore).
    pub fn parent(&self) -> Option<ProcessId> {
        self.0
            .rfind('_')
            .map(|position| ProcessId(self.0[..position].to_string()))
    }

    /// True if this id lies under `parent` in the lineage encoding.
    ///
    /// `fork`'s parent resolution and `join`'s child detection both rely
    /// on this one convention.
    pub fn is_child_of(&self, parent: &ProcessId) -> bool {
        self.0.len() > parent.0.len() + 1
            && self.0.starts_with(parent.0.as_str())
            && self.0.as_bytes()[parent.0.len()] == b'_'
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        ProcessId(id.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(id: String) -> Self {
        ProcessId(id)
    }
}

/// One schedulable unit of cooperative execution.
pub struct Process {
    id: ProcessId,
    coroutine: Coroutine,

    /// The original factory, kept for `fork`; `None` for instance-built
    /// processes, which cannot be cloned
    factory: Option<Rc<dyn Fn() -> Result<Sourced, Error>>>,

    /// Whether the first step has been taken
    started: bool,

    /// Value to deliver at the next step
    value: Option<Value>,

    /// Exception to deliver at the next step; wins over `value`
    exception: Option<Error>,
}

impl Process {
    /// Wrap a coroutine source as a process under the given id.
    pub fn new(id: ProcessId, source: CoroutineSource) -> Self {
        let factory = match &source {
            CoroutineSource::Callable(factory) => Some(Rc::clone(factory)),
            CoroutineSource::Instance(_) => None,
        };
        Self {
            id,
            factory,
            coroutine: Coroutine::new(source),
            started: false,
            value: None,
            exception: None,
        }
    }

    /// The process id.
    pub fn id(&self) -> &ProcessId {
        &self.id
    }

    /// Store a value for the next step.
    pub fn send(&mut self, value: Value) {
        self.value = Some(value);
    }

    /// Store an exception for the next step.
    pub fn throw(&mut self, error: Error) {
        self.exception = Some(error);
    }

    /// Advance the coroutine by exactly one external step.
    ///
    /// The first call takes the initial suspension without delivering
    /// anything; later calls deliver the pending exception if one is
    /// stored, else the stored value (`Value::Null` when nothing was
    /// sent). Returns the suspension signal, or `None` on completion.
    /// An error that escapes the outermost frame is re-raised here.
    pub fn run(&mut self) -> Result<Option<Signal>, Error> {
        if self.completed() {
            return Ok(None);
        }
        let input = if !self.started {
            self.started = true;
            Resume::Start
        } else if let Some(error) = self.exception.take() {
            Resume::Throw(error)
        } else {
            Resume::Send(self.value.take().unwrap_or_default())
        };
        match self.coroutine.step(input)? {
            Step::Yield(signal) => Ok(Some(signal)),
            Step::Done(_) => Ok(None),
        }
    }

    /// True once the coroutine has run to completion.
    pub fn completed(&self) -> bool {
        self.coroutine.completed()
    }

    /// The coroutine's final value; `None` until completed.
    pub fn return_value(&self) -> Option<Value> {
        self.coroutine.result().cloned()
    }

    /// The re-instantiable source this process was built from.
    ///
    /// Fails with [`Error::NotCloneable`] when the process was built from
    /// a pre-built routine instance rather than a callable.
    pub fn coroutine_source(&self) -> Result<CoroutineSource, Error> {
        match &self.factory {
            Some(factory) => Ok(CoroutineSource::Callable(Rc::clone(factory))),
            None => Err(Error::NotCloneable),
        }
    }
}
