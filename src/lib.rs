//! Tasklet — cooperative multitasking on a single thread
//!
//! This crate provides user-space green threads driven by resumable
//! routines:
//! - **Coroutine trampoline** (`coroutine` module): flattens nested
//!   sub-routines into one resumable sequence and unifies exception
//!   propagation across frames
//! - **Processes and scheduler** (`process`, `queue`, `scheduler`):
//!   lightweight processes stepped round-robin by a single-threaded run
//!   loop, mutated through yielded syscalls (`syscall` module)
//! - **Reactor** (`io` module): a socket-readiness multiplexer running as
//!   a background process, waking processes parked on read/write interest
//! - **Promises** (`future` module): an A+-style future bridging
//!   coroutine completion into `then`/`catch` chains, with `run`, `join`,
//!   `await_on` and `defer` combinators
//!
//! # Example
//!
//! ```rust,ignore
//! use tasklet::future::{await_on, run};
//! use tasklet::{CoroutineSource, Sourced, Value};
//!
//! let promise = run(CoroutineSource::callable(|| {
//!     // runs on a private scheduler once the promise is waited
//!     Ok(Sourced::Value(Value::Int(2)))
//! }));
//! assert_eq!(await_on(promise).unwrap(), Value::Int(2));
//! ```
//!
//! Concurrency is interleaving, not parallelism: a routine runs
//! uninterrupted from one suspension point to the next, and suspension
//! points are exactly its yields. There is no preemption and no locking.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod coroutine;
pub mod error;
pub mod future;
pub mod io;
pub mod process;
pub mod queue;
pub mod routine;
pub mod scheduler;
pub mod syscall;
pub mod value;

pub use coroutine::{Coroutine, CoroutineSource, Sourced};
pub use error::Error;
pub use future::{Promise, Resolver, ThenResult};
pub use io::{Interest, IoPoll, Listener, Selector, Socket};
pub use process::{Process, ProcessId};
pub use queue::TaskQueue;
pub use routine::{routine_fn, sleep, Resume, Routine, Signal, Step};
pub use scheduler::{OnComplete, Scheduler};
pub use syscall::{SysCall, SysCallFault};
pub use value::Value;
