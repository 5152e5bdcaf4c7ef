//! Promises and the async combinators
//!
//! An A+-style single-assignment future: `pending` until `resolve` or
//! `reject` settles it (first call wins), with `then`/`catch` chains that
//! queue while pending and replay immediately once settled. A promise may
//! carry a deferred producer, invoked at most once by `wait`; that is how
//! the combinators below defer scheduler construction until somebody
//! actually waits.
//!
//! The combinators bridge coroutine completion into settlement: `run`
//! drives one source on a private reactor-enabled scheduler, `join` runs
//! several as children of one synthetic parent and resolves with their
//! results in spawn order, `await_on` forces a wait and hands back the
//! settled outcome, and `defer` registers the promise to be waited by the
//! host's shutdown call.

use crate::coroutine::CoroutineSource;
use crate::error::Error;
use crate::process::ProcessId;
use crate::routine::{routine_fn, Signal, Step};
use crate::scheduler::Scheduler;
use crate::syscall;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

// ============================================================================
// Promise
// ============================================================================

/// Settlement state of a promise.
#[derive(Clone)]
enum State {
    Pending,
    Resolved(Value),
    Rejected(Error),
}

/// What a `then`/`catch` handler produced.
pub enum ThenResult {
    /// Resolve the chained promise with this value
    Value(Value),

    /// Bridge this promise's eventual settlement into the chained one
    Promise(Promise),

    /// Reject the chained promise with this error
    Fault(Error),
}

impl From<Value> for ThenResult {
    fn from(value: Value) -> Self {
        ThenResult::Value(value)
    }
}

impl From<Promise> for ThenResult {
    fn from(promise: Promise) -> Self {
        ThenResult::Promise(promise)
    }
}

impl From<()> for ThenResult {
    fn from(_: ()) -> Self {
        ThenResult::Value(Value::Null)
    }
}

impl From<Result<Value, Error>> for ThenResult {
    fn from(result: Result<Value, Error>) -> Self {
        match result {
            Ok(value) => ThenResult::Value(value),
            Err(error) => ThenResult::Fault(error),
        }
    }
}

type FulfilledHandler = Box<dyn FnOnce(Value) -> ThenResult>;
type RejectedHandler = Box<dyn FnOnce(Error) -> ThenResult>;
type Producer = Box<dyn FnOnce(Resolver)>;

/// One queued `then` registration and its chained promise.
struct Handler {
    on_fulfilled: FulfilledHandler,
    on_rejected: RejectedHandler,
    downstream: Promise,
}

struct Inner {
    state: State,
    handlers: Vec<Handler>,
    producer: Option<Producer>,
}

/// A single-assignment future with chained continuation handlers.
#[derive(Clone)]
pub struct Promise {
    inner: Rc<RefCell<Inner>>,
}

/// Capability handle passed to producers: settle the promise, nothing
/// else.
#[derive(Clone)]
pub struct Resolver {
    promise: Promise,
}

impl Resolver {
    /// Settle the promise with a value.
    pub fn resolve(&self, value: Value) {
        self.promise.resolve(value);
    }

    /// Settle the promise with an error.
    pub fn reject(&self, error: Error) {
        self.promise.reject(error);
    }
}

impl Promise {
    /// A pending promise with no producer.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                handlers: Vec::new(),
                producer: None,
            })),
        }
    }

    /// A pending promise whose producer runs on the first `wait`.
    pub fn with_producer<F>(producer: F) -> Self
    where
        F: FnOnce(Resolver) + 'static,
    {
        let promise = Self::new();
        promise.inner.borrow_mut().producer = Some(Box::new(producer));
        promise
    }

    /// True while unsettled.
    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, State::Pending)
    }

    /// True once resolved.
    pub fn is_resolved(&self) -> bool {
        matches!(self.inner.borrow().state, State::Resolved(_))
    }

    /// True once rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.borrow().state, State::Rejected(_))
    }

    /// The resolved value, once resolved.
    pub fn value(&self) -> Option<Value> {
        match &self.inner.borrow().state {
            State::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection error, once rejected.
    pub fn error(&self) -> Option<Error> {
        match &self.inner.borrow().state {
            State::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// Settle with a value. A no-op after the first settlement.
    pub fn resolve(&self, value: Value) {
        self.settle(State::Resolved(value));
    }

    /// Settle with an error. A no-op after the first settlement.
    ///
    /// A rejection arriving while no handler is registered is reported on
    /// stderr so failures stay loud even when nobody chained a `catch`.
    pub fn reject(&self, error: Error) {
        self.settle(State::Rejected(error));
    }

    /// Chain a fulfillment handler; rejections propagate to the returned
    /// promise untouched.
    pub fn then<F, R>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> R + 'static,
        R: Into<ThenResult>,
    {
        self.attach(Box::new(move |value| on_fulfilled(value).into()), None)
    }

    /// Chain fulfillment and rejection handlers.
    pub fn then_catch<F, R, G, S>(&self, on_fulfilled: F, on_rejected: G) -> Promise
    where
        F: FnOnce(Value) -> R + 'static,
        R: Into<ThenResult>,
        G: FnOnce(Error) -> S + 'static,
        S: Into<ThenResult>,
    {
        self.attach(
            Box::new(move |value| on_fulfilled(value).into()),
            Some(Box::new(move |error| on_rejected(error).into())),
        )
    }

    /// Chain a rejection handler; the fulfillment side resolves the
    /// returned promise with `Value::Null`.
    pub fn catch<G, S>(&self, on_rejected: G) -> Promise
    where
        G: FnOnce(Error) -> S + 'static,
        S: Into<ThenResult>,
    {
        self.attach(
            Box::new(|_| ThenResult::Value(Value::Null)),
            Some(Box::new(move |error| on_rejected(error).into())),
        )
    }

    /// Run the stored producer if the promise is still unsettled.
    /// Idempotent: the producer runs at most once.
    pub fn wait(&self) {
        if !self.is_pending() {
            return;
        }
        let producer = self.inner.borrow_mut().producer.take();
        if let Some(run) = producer {
            run(Resolver {
                promise: self.clone(),
            });
        }
    }

    fn attach(&self, on_fulfilled: FulfilledHandler, on_rejected: Option<RejectedHandler>) -> Promise {
        let on_rejected =
            on_rejected.unwrap_or_else(|| Box::new(|error| ThenResult::Fault(error)));
        let downstream = Promise::new();
        let handler = Handler {
            on_fulfilled,
            on_rejected,
            downstream: downstream.clone(),
        };
        let settled = {
            let inner = self.inner.borrow();
            match &inner.state {
                State::Pending => None,
                state => Some(state.clone()),
            }
        };
        match settled {
            // queued for replay at settlement
            None => self.inner.borrow_mut().handlers.push(handler),
            // already settled: replay against the stored outcome now
            Some(state) => Self::run_handler(handler, &state),
        }
        downstream
    }

    fn settle(&self, state: State) {
        let handlers = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return;
            }
            inner.state = state.clone();
            std::mem::take(&mut inner.handlers)
        };
        if handlers.is_empty() {
            if let State::Rejected(error) = &state {
                eprintln!("tasklet: unhandled promise rejection: {error}");
            }
            return;
        }
        for handler in handlers {
            Self::run_handler(handler, &state);
        }
    }

    fn run_handler(handler: Handler, state: &State) {
        let Handler {
            on_fulfilled,
            on_rejected,
            downstream,
        } = handler;
        let result = match state {
            State::Resolved(value) => on_fulfilled(value.clone()),
            State::Rejected(error) => on_rejected(error.clone()),
            State::Pending => unreachable!("handlers only run against settled promises"),
        };
        match result {
            ThenResult::Value(value) => downstream.resolve(value),
            ThenResult::Fault(error) => downstream.reject(error),
            ThenResult::Promise(promise) => {
                let resolved = downstream.clone();
                let rejected = downstream;
                promise.then_catch(
                    move |value| resolved.resolve(value),
                    move |error| rejected.reject(error),
                );
            }
        }
    }
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

/// A promise already resolved with `value`.
pub fn fulfilled(value: Value) -> Promise {
    let promise = Promise::new();
    promise.inner.borrow_mut().state = State::Resolved(value);
    promise
}

/// A promise already rejected with `error`.
///
/// Settled directly, so constructing one does not trip the
/// unhandled-rejection report; chaining `catch` on it replays the error.
pub fn rejected(error: Error) -> Promise {
    let promise = Promise::new();
    promise.inner.borrow_mut().state = State::Rejected(error);
    promise
}

// ============================================================================
// Combinators
// ============================================================================

/// Anything `await_on` can force to completion.
pub trait IntoPromise {
    /// Convert into a promise, wrapping bare sources with [`run`].
    fn into_promise(self) -> Promise;
}

impl IntoPromise for Promise {
    fn into_promise(self) -> Promise {
        self
    }
}

impl IntoPromise for &Promise {
    fn into_promise(self) -> Promise {
        self.clone()
    }
}

impl IntoPromise for CoroutineSource {
    fn into_promise(self) -> Promise {
        run(self)
    }
}

/// Run `source` asynchronously: the returned promise, once waited, drives
/// it on a private reactor-enabled scheduler and settles with its result.
///
/// A completion value carrying an error (a routine that yielded one at
/// its outermost frame) rejects the promise, as does an exception that
/// escapes the routine outright.
pub fn run(source: CoroutineSource) -> Promise {
    Promise::with_producer(move |resolver| {
        let mut poll = Scheduler::with_io();
        let job = poll.add(source, None);
        let settle = resolver.clone();
        let outcome = poll.start(Some(Box::new(move |scheduler, id, result| {
            // the reactor's background task completes through here too;
            // only the tracked job settles the promise
            if *id != job {
                return;
            }
            match result {
                Value::Error(error) => settle.reject(error.clone()),
                value => settle.resolve(value.clone()),
            }
            scheduler.stop();
        })));
        if let Err(error) = outcome {
            resolver.reject(error);
        }
    })
}

/// Run every source as a child of one synthetic parent process and
/// resolve with their results in spawn order; the first child rejection
/// rejects the whole join.
pub fn join(sources: Vec<CoroutineSource>) -> Promise {
    Promise::with_producer(move |resolver| {
        if sources.is_empty() {
            resolver.resolve(Value::List(Vec::new()));
            return;
        }
        let mut poll = Scheduler::with_io();
        let total = sources.len();
        let outputs: Rc<RefCell<Vec<(ProcessId, Option<Value>)>>> =
            Rc::new(RefCell::new(Vec::with_capacity(total)));

        // the parent spawns each source, records the child id, and gives
        // up its slot between spawns
        let slots = Rc::clone(&outputs);
        let mut pending: VecDeque<CoroutineSource> = sources.into();
        let mut awaiting_id = false;
        let parent = routine_fn(move |input| {
            let received = input.into_value()?;
            if awaiting_id {
                awaiting_id = false;
                if let Value::Id(child) = received {
                    slots.borrow_mut().push((child, None));
                }
                return Ok(Step::Yield(Signal::Value(Value::Null)));
            }
            match pending.pop_front() {
                Some(source) => {
                    awaiting_id = true;
                    Ok(Step::Yield(Signal::Syscall(syscall::spawn(source))))
                }
                None => Ok(Step::Done(Value::Null)),
            }
        });

        let parent_id = poll.add(CoroutineSource::instance(parent), None);
        let settle = resolver.clone();
        let results = Rc::clone(&outputs);
        let outcome = poll.start(Some(Box::new(move |scheduler, id, result| {
            // only children of the synthetic parent count; the parent
            // itself and the reactor task pass through here as well
            if !id.is_child_of(&parent_id) {
                return;
            }
            if let Value::Error(error) = result {
                settle.reject(error.clone());
            }
            let done = {
                let mut results = results.borrow_mut();
                if let Some(slot) = results.iter_mut().find(|(child, _)| child == id) {
                    slot.1 = Some(result.clone());
                }
                results.len() == total && results.iter().all(|(_, value)| value.is_some())
            };
            if done {
                scheduler.stop();
            }
        })));
        match outcome {
            Ok(()) => {
                let values: Vec<Value> = outputs
                    .borrow()
                    .iter()
                    .map(|(_, value)| value.clone().unwrap_or_default())
                    .collect();
                // a no-op when a child rejection already settled it
                resolver.resolve(Value::List(values));
            }
            Err(error) => resolver.reject(error),
        }
    })
}

/// Force `awaitable` to completion and return the settled outcome.
///
/// Bare sources are wrapped with [`run`] first. `Err` is the re-raise of
/// the captured rejection; an unsettled promise yields `Value::Null`.
pub fn await_on<A: IntoPromise>(awaitable: A) -> Result<Value, Error> {
    let promise = awaitable.into_promise();
    let captured: Rc<RefCell<Option<Result<Value, Error>>>> = Rc::new(RefCell::new(None));
    let on_value = Rc::clone(&captured);
    let on_error = Rc::clone(&captured);
    promise.then_catch(
        move |value| {
            *on_value.borrow_mut() = Some(Ok(value));
        },
        move |error| {
            *on_error.borrow_mut() = Some(Err(error));
        },
    );
    promise.wait();
    let outcome = captured.borrow_mut().take();
    outcome.unwrap_or(Ok(Value::Null))
}

/// Wait on all sources and return their results in declaration order.
pub fn all(sources: Vec<CoroutineSource>) -> Result<Value, Error> {
    await_on(join(sources))
}

// ============================================================================
// Deferred promises
// ============================================================================

thread_local! {
    /// Promises registered to run at shutdown.
    static DEFERRED: RefCell<Vec<Promise>> = RefCell::new(Vec::new());
}

/// A producer-backed promise registered to run at shutdown.
///
/// There is no implicit end-of-process hook: the host must call
/// [`run_deferred`] before exiting, which waits every promise registered
/// here that nothing else waited earlier.
pub fn defer<F>(producer: F) -> Promise
where
    F: FnOnce(Resolver) + 'static,
{
    let promise = Promise::with_producer(producer);
    DEFERRED.with(|deferred| deferred.borrow_mut().push(promise.clone()));
    promise
}

/// Wait every deferred promise registered on this thread, draining the
/// registry. The safety net the host calls at shutdown.
pub fn run_deferred() {
    let pending: Vec<Promise> =
        DEFERRED.with(|deferred| deferred.borrow_mut().drain(..).collect());
    for promise in pending {
        promise.wait();
    }
}
