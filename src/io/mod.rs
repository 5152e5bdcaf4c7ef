//! Socket readiness reactor and coroutine socket operations

mod poll;
mod socket;

pub use poll::{Interest, IoPoll, PollSelector, Readiness, Selector};
pub use socket::{Listener, Socket};

pub(crate) use poll::reactor_routine;
