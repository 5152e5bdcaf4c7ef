//! Syscall requests
//!
//! A syscall is a value yielded by a routine that the scheduler interprets
//! as a request to mutate its own state rather than an ordinary
//! suspension. Each request is invoked with the calling process and the
//! scheduler handle, and is itself responsible for rescheduling the caller
//! on success: a request that parks the caller (socket waits) or drops it
//! (`close`) simply does not reschedule.
//!
//! A failing request hands the caller back together with the error; the
//! run loop throws the error into the process and reschedules it, so the
//! routine observes the failure as a catchable exception on its next step.

use crate::coroutine::CoroutineSource;
use crate::error::Error;
use crate::io::Interest;
use crate::process::{Process, ProcessId};
use crate::scheduler::Scheduler;
use crate::value::Value;
use std::fmt;
use std::os::unix::io::RawFd;

/// A failed syscall: the calling process handed back with the error to
/// throw into it.
pub struct SysCallFault {
    /// The process that issued the request
    pub process: Process,

    /// The failure to deliver at its next step
    pub error: Error,
}

type SysCallExec = Box<dyn FnOnce(Process, &mut Scheduler) -> Result<(), SysCallFault>>;

/// A scheduler request yielded by a routine.
pub struct SysCall {
    name: &'static str,
    exec: SysCallExec,
}

impl SysCall {
    /// Build a named request around its effect.
    pub fn new<F>(name: &'static str, exec: F) -> Self
    where
        F: FnOnce(Process, &mut Scheduler) -> Result<(), SysCallFault> + 'static,
    {
        Self {
            name,
            exec: Box::new(exec),
        }
    }

    /// The request name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Apply the request on behalf of `process`.
    pub fn invoke(self, process: Process, scheduler: &mut Scheduler) -> Result<(), SysCallFault> {
        (self.exec)(process, scheduler)
    }
}

impl fmt::Debug for SysCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SysCall").field(&self.name).finish()
    }
}

/// Reply with the caller's own process id.
pub fn process_id() -> SysCall {
    SysCall::new("process_id", |mut process, scheduler| {
        let id = Value::Id(process.id().clone());
        process.send(id);
        scheduler.schedule(process);
        Ok(())
    })
}

/// Add `source` as a child process of the caller; replies with the new id.
pub fn spawn(source: CoroutineSource) -> SysCall {
    SysCall::new("spawn", move |mut process, scheduler| {
        let parent = process.id().clone();
        let child = scheduler.add(source, Some(&parent));
        process.send(Value::Id(child));
        scheduler.schedule(process);
        Ok(())
    })
}

/// Clone the target's factory as a new process; replies with the new id.
///
/// Raises into the caller when the target is missing or was built from a
/// routine instance rather than a callable.
pub fn fork(pid: ProcessId) -> SysCall {
    SysCall::new("fork", move |mut process, scheduler| {
        match scheduler.fork(&pid) {
            Ok(forked) => {
                process.send(Value::Id(forked));
                scheduler.schedule(process);
                Ok(())
            }
            Err(error) => Err(SysCallFault { process, error }),
        }
    })
}

/// Remove the first queued process matching `pid`.
///
/// Raises [`Error::InvalidTaskId`] into the caller when no such process is
/// queued.
pub fn kill(pid: ProcessId) -> SysCall {
    SysCall::new("kill", move |process, scheduler| {
        if scheduler.kill(&pid) {
            scheduler.schedule(process);
            Ok(())
        } else {
            Err(SysCallFault {
                process,
                error: Error::InvalidTaskId(pid),
            })
        }
    })
}

/// Pause the whole scheduler; the caller resumes once it is resumed.
pub fn suspend() -> SysCall {
    SysCall::new("suspend", |process, scheduler| {
        scheduler.pause();
        scheduler.schedule(process);
        Ok(())
    })
}

/// Resume a paused scheduler.
pub fn resume() -> SysCall {
    SysCall::new("resume", |process, scheduler| {
        if let Err(error) = scheduler.resume() {
            return Err(SysCallFault { process, error });
        }
        scheduler.schedule(process);
        Ok(())
    })
}

/// Stop the scheduler. The caller is dropped with the rest of the queue
/// and never resumes.
pub fn close() -> SysCall {
    SysCall::new("close", |_process, scheduler| {
        scheduler.stop();
        Ok(())
    })
}

/// Park the caller until `socket` is ready for reading.
pub fn wait_for_read(socket: RawFd) -> SysCall {
    SysCall::new("wait_for_read", move |process, scheduler| {
        match scheduler.io_poll() {
            Some(io) => {
                io.borrow_mut().add_socket(socket, process, Interest::Read);
                Ok(())
            }
            None => Err(SysCallFault {
                process,
                error: Error::IoPollDisabled,
            }),
        }
    })
}

/// Park the caller until `socket` is ready for writing.
pub fn wait_for_write(socket: RawFd) -> SysCall {
    SysCall::new("wait_for_write", move |process, scheduler| {
        match scheduler.io_poll() {
            Some(io) => {
                io.borrow_mut().add_socket(socket, process, Interest::Write);
                Ok(())
            }
            None => Err(SysCallFault {
                process,
                error: Error::IoPollDisabled,
            }),
        }
    })
}
