//! Socket readiness reactor
//!
//! The reactor maps sockets to the processes waiting on them, in two
//! interest tables (read and write). `select` asks a [`Selector`] backend
//! which registered sockets are ready and reschedules every waiter on
//! them, clearing the registration so a socket wakes its waiters exactly
//! once per registration.
//!
//! Inside a scheduler the reactor runs as an ordinary self-rescheduling
//! background process: each tick performs one `select` — blocking when
//! the scheduler has nothing else to run, zero-timeout otherwise — so it
//! neither starves ready processes nor spins while alone.

use crate::error::Error;
use crate::process::Process;
use crate::routine::{routine_fn, Resume, Routine, Signal, Step};
use crate::scheduler::Scheduler;
use crate::syscall::{SysCall, SysCallFault};
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

/// Which readiness a process is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Wake when the socket becomes readable
    Read,

    /// Wake when the socket becomes writable
    Write,
}

/// Sockets a [`Selector`] reported ready.
#[derive(Debug, Default)]
pub struct Readiness {
    /// Sockets ready for reading, out of the registered read set
    pub read: Vec<RawFd>,

    /// Sockets ready for writing, out of the registered write set
    pub write: Vec<RawFd>,
}

/// Readiness backend the reactor polls through.
///
/// The default is [`PollSelector`] over `poll(2)`; tests inject scripted
/// selectors to drive the reactor deterministically.
pub trait Selector {
    /// Report which of the given sockets are ready, waiting at most
    /// `timeout` (`None` blocks indefinitely, zero polls).
    fn select(
        &mut self,
        read: &[RawFd],
        write: &[RawFd],
        timeout: Option<Duration>,
    ) -> Result<Readiness, Error>;
}

/// Readiness backend over `poll(2)`.
pub struct PollSelector;

impl Selector for PollSelector {
    fn select(
        &mut self,
        read: &[RawFd],
        write: &[RawFd],
        timeout: Option<Duration>,
    ) -> Result<Readiness, Error> {
        let mut entries: Vec<libc::pollfd> = Vec::with_capacity(read.len() + write.len());
        for &fd in read {
            entries.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }
        for &fd in write {
            entries.push(libc::pollfd {
                fd,
                events: libc::POLLOUT,
                revents: 0,
            });
        }
        if entries.is_empty() {
            return Ok(Readiness::default());
        }

        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(duration) => duration.as_millis().min(i32::MAX as u128) as libc::c_int,
        };
        let rc = unsafe {
            libc::poll(
                entries.as_mut_ptr(),
                entries.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        let mut ready = Readiness::default();
        if rc == 0 {
            return Ok(ready);
        }
        for (index, entry) in entries.iter().enumerate() {
            // hangup and error states count as ready so waiters get to
            // observe the failure from their own read/write
            let hit = entry.revents & (entry.events | libc::POLLHUP | libc::POLLERR) != 0;
            if !hit {
                continue;
            }
            if index < read.len() {
                ready.read.push(entry.fd);
            } else {
                ready.write.push(entry.fd);
            }
        }
        Ok(ready)
    }
}

/// Socket readiness reactor: interest tables plus a selector backend.
pub struct IoPoll {
    /// Inactive until its background process starts, and after `stop`
    stopped: bool,

    read: FxHashMap<RawFd, Vec<Process>>,
    write: FxHashMap<RawFd, Vec<Process>>,

    selector: Box<dyn Selector>,
}

impl IoPoll {
    /// Reactor over the platform default selector.
    pub fn new() -> Self {
        Self::with_selector(PollSelector)
    }

    /// Reactor over a custom selector backend.
    pub fn with_selector(selector: impl Selector + 'static) -> Self {
        Self {
            stopped: true,
            read: FxHashMap::default(),
            write: FxHashMap::default(),
            selector: Box::new(selector),
        }
    }

    /// Register `process` as a waiter on `socket` for `interest`.
    ///
    /// Multiple processes may wait on the same socket and interest; they
    /// are all rescheduled together when it becomes ready.
    pub fn add_socket(&mut self, socket: RawFd, process: Process, interest: Interest) {
        let table = match interest {
            Interest::Read => &mut self.read,
            Interest::Write => &mut self.write,
        };
        table.entry(socket).or_default().push(process);
    }

    /// Total number of parked waiters.
    pub fn waiter_count(&self) -> usize {
        self.read.values().map(Vec::len).sum::<usize>()
            + self.write.values().map(Vec::len).sum::<usize>()
    }

    /// Poll for readiness and reschedule the waiters of every ready
    /// socket, removing their registrations. A no-op while nothing is
    /// registered.
    pub fn select(
        &mut self,
        scheduler: &mut Scheduler,
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        if self.read.is_empty() && self.write.is_empty() {
            return Ok(());
        }
        let read: Vec<RawFd> = self.read.keys().copied().collect();
        let write: Vec<RawFd> = self.write.keys().copied().collect();
        let ready = self.selector.select(&read, &write, timeout)?;

        for socket in ready.read {
            if let Some(waiters) = self.read.remove(&socket) {
                for process in waiters {
                    scheduler.schedule(process);
                }
            }
        }
        for socket in ready.write {
            if let Some(waiters) = self.write.remove(&socket) {
                for process in waiters {
                    scheduler.schedule(process);
                }
            }
        }
        Ok(())
    }

    /// Mark the reactor inactive. Registrations are abandoned.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// True while the reactor is inactive.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub(crate) fn activate(&mut self) {
        self.stopped = false;
    }
}

impl Default for IoPoll {
    fn default() -> Self {
        Self::new()
    }
}

/// The reactor's background process routine.
///
/// Activates the reactor on its first step, then yields one tick syscall
/// per pass until the reactor is stopped, at which point it completes.
pub(crate) fn reactor_routine(io: Rc<RefCell<IoPoll>>) -> Box<dyn Routine> {
    let mut started = false;
    routine_fn(move |input| {
        if let Resume::Throw(error) = input {
            return Err(error);
        }
        if !started {
            started = true;
            io.borrow_mut().activate();
        }
        if io.borrow().is_stopped() {
            return Ok(Step::Done(Value::Null));
        }
        Ok(Step::Yield(Signal::Syscall(reactor_tick(Rc::clone(&io)))))
    })
}

/// One reactor pass: select with a blocking wait when the scheduler has
/// no other runnable work, zero timeout otherwise, then reschedule the
/// reactor process.
fn reactor_tick(io: Rc<RefCell<IoPoll>>) -> SysCall {
    SysCall::new("io_poll_tick", move |process, scheduler| {
        let timeout = if scheduler.queue().is_empty() {
            None
        } else {
            Some(Duration::ZERO)
        };
        if let Err(error) = io.borrow_mut().select(scheduler, timeout) {
            return Err(SysCallFault { process, error });
        }
        scheduler.schedule(process);
        Ok(())
    })
}
