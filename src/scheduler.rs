//! Single-threaded cooperative process loop
//!
//! The scheduler owns the task queue and, optionally, a socket readiness
//! reactor. `start` runs the dispatch loop: dequeue the front process,
//! advance it one step, interpret a yielded syscall, and either reschedule
//! the process at the tail (round-robin fairness, one step per pass) or
//! report its completion and drop it.
//!
//! Concurrency is interleaving only: a process runs uninterrupted from one
//! suspension point to the next, and the queue and reactor tables are
//! touched by nothing but this loop and the syscalls it invokes.

use crate::coroutine::CoroutineSource;
use crate::error::Error;
use crate::io::{reactor_routine, IoPoll};
use crate::process::{Process, ProcessId};
use crate::queue::TaskQueue;
use crate::routine::Signal;
use crate::syscall::SysCallFault;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Completion callback: invoked with the scheduler handle, the finished
/// process id and its return value.
///
/// The scheduler handle lets the callback stop or mutate the loop, which
/// is how `future::run` shuts its private scheduler down once the tracked
/// job finishes.
pub type OnComplete = Box<dyn FnMut(&mut Scheduler, &ProcessId, &Value)>;

/// Cooperative scheduler driving a queue of processes.
pub struct Scheduler {
    queue: TaskQueue,

    /// Monotonic id counter; unique among currently queued processes
    last_proc_id: u64,

    paused: bool,
    stopped: bool,

    /// Readiness reactor, when socket waits are enabled
    io_poll: Option<Rc<RefCell<IoPoll>>>,

    /// Completion callback carried across `pause`/`resume`
    on_complete: Option<OnComplete>,
}

impl Scheduler {
    /// Create a scheduler without a reactor; socket wait syscalls will
    /// fail with [`Error::IoPollDisabled`].
    pub fn new() -> Self {
        Self {
            queue: TaskQueue::new(),
            last_proc_id: 0,
            paused: false,
            stopped: false,
            io_poll: None,
            on_complete: None,
        }
    }

    /// Create a scheduler with the platform's default readiness reactor.
    ///
    /// With a reactor attached the loop never drains on its own: the
    /// reactor process keeps rescheduling itself, so callers must stop
    /// the scheduler explicitly (as the promise layer does).
    pub fn with_io() -> Self {
        Self::with_io_poll(IoPoll::new())
    }

    /// Create a scheduler around a specific reactor instance.
    pub fn with_io_poll(io_poll: IoPoll) -> Self {
        let mut scheduler = Self::new();
        scheduler.io_poll = Some(Rc::new(RefCell::new(io_poll)));
        scheduler
    }

    /// The reactor handle, if one is attached.
    pub fn io_poll(&self) -> Option<Rc<RefCell<IoPoll>>> {
        self.io_poll.clone()
    }

    /// The task queue.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// True while the scheduler is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// True once the scheduler has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Append a process at the queue tail.
    pub fn schedule(&mut self, process: Process) {
        self.queue.enqueue(process);
    }

    /// Allocate the next id (under `parent` when given), wrap `source` in
    /// a process, enqueue it, and return the id.
    pub fn add(&mut self, source: CoroutineSource, parent: Option<&ProcessId>) -> ProcessId {
        self.last_proc_id += 1;
        let id = match parent {
            None => ProcessId::root(self.last_proc_id),
            Some(parent) => ProcessId::child(parent, self.last_proc_id),
        };
        self.schedule(Process::new(id.clone(), source));
        id
    }

    /// Clone the queued process `pid` into a fresh process.
    ///
    /// The clone is parented at the target's own parent (derived from the
    /// target id), making it a sibling of the target. Fails when the id is
    /// not queued or the target is not re-instantiable.
    pub fn fork(&mut self, pid: &ProcessId) -> Result<ProcessId, Error> {
        let source = match self.queue.find(|process| process.id() == pid) {
            Some(process) => process.coroutine_source()?,
            None => return Err(Error::Fork(pid.clone())),
        };
        let parent = pid.parent();
        Ok(self.add(source, parent.as_ref()))
    }

    /// Remove the first queued process matching `pid`.
    ///
    /// Returns `false` when no such process is queued. A process parked
    /// in the reactor is not visible here; that race is a documented
    /// hazard of `kill`.
    pub fn kill(&mut self, pid: &ProcessId) -> bool {
        match self.queue.find_index(|process| process.id() == pid) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Run the dispatch loop until the queue drains, the scheduler is
    /// paused or stopped, or a process raises at its outermost frame.
    ///
    /// When a reactor is attached, its background process is (re)added
    /// first. The completion callback, when given, replaces the stored
    /// one and is kept for later `resume` calls.
    pub fn start(&mut self, on_complete: Option<OnComplete>) -> Result<(), Error> {
        let io_poll = self.io_poll.clone();
        if let Some(io) = io_poll {
            let routine = reactor_routine(io);
            self.add(CoroutineSource::instance(routine), None);
        }
        if let Some(callback) = on_complete {
            self.on_complete = Some(callback);
        }
        self.run_loop()
    }

    /// Pause the loop, stopping the reactor but keeping the queue intact
    /// for a later `resume`.
    pub fn pause(&mut self) {
        self.paused = true;
        self.stopped = false;
        self.stop_io();
    }

    /// Clear the paused state and re-enter the loop, unless stopped.
    pub fn resume(&mut self) -> Result<(), Error> {
        if !self.stopped {
            self.paused = false;
            self.start(None)?;
        }
        Ok(())
    }

    /// Stop the scheduler: the reactor is stopped and the entire queue is
    /// discarded without per-process cleanup. Terminal for this loop run;
    /// `resume` will not restart a stopped scheduler.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.stop_io();
        self.queue.clear();
    }

    fn stop_io(&self) {
        if let Some(io) = &self.io_poll {
            io.borrow_mut().stop();
        }
    }

    fn run_loop(&mut self) -> Result<(), Error> {
        while !self.queue.is_empty() {
            if self.paused || self.stopped {
                break;
            }
            let Some(mut process) = self.queue.dequeue() else {
                break;
            };
            match process.run()? {
                Some(Signal::Syscall(call)) => {
                    // the syscall reschedules the caller itself; on
                    // failure the error is thrown into the process so the
                    // routine can observe it
                    if let Err(SysCallFault {
                        process: mut faulted,
                        error,
                    }) = call.invoke(process, self)
                    {
                        faulted.throw(error);
                        self.schedule(faulted);
                    }
                }
                Some(_suspended) => {
                    self.schedule(process);
                }
                None => {
                    let id = process.id().clone();
                    let value = process.return_value().unwrap_or_default();
                    drop(process);
                    if let Some(mut callback) = self.on_complete.take() {
                        callback(self, &id, &value);
                        if self.on_complete.is_none() {
                            self.on_complete = Some(callback);
                        }
                    }
                    // idempotent: the process already left the queue
                    let _ = self.kill(&id);
                }
            }
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routine::{routine_fn, Resume, Routine, Step};
    use crate::syscall;

    fn value_source(value: Value) -> CoroutineSource {
        CoroutineSource::callable(move || Ok(crate::coroutine::Sourced::Value(value.clone())))
    }

    /// Routine yielding `label 1..ticks` into `log`, then completing.
    fn ticker(label: &str, ticks: usize, log: Rc<RefCell<Vec<String>>>) -> Box<dyn Routine> {
        let label = label.to_string();
        let mut count = 0;
        routine_fn(move |input| {
            input.into_value()?;
            count += 1;
            log.borrow_mut().push(format!("{label}{count}"));
            if count < ticks {
                Ok(Step::Yield(Signal::Value(Value::Null)))
            } else {
                Ok(Step::Done(Value::Str(label.clone())))
            }
        })
    }

    #[test]
    fn test_add_allocates_sequential_ids() {
        let mut scheduler = Scheduler::new();
        let first = scheduler.add(value_source(Value::Null), None);
        let second = scheduler.add(value_source(Value::Null), None);
        assert_eq!(first.as_str(), "1");
        assert_eq!(second.as_str(), "2");

        let child = scheduler.add(value_source(Value::Null), Some(&first));
        assert_eq!(child.as_str(), "1_3");
    }

    #[test]
    fn test_round_robin_one_step_per_pass() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut scheduler = Scheduler::new();
        let a = Rc::clone(&log);
        let b = Rc::clone(&log);
        scheduler.add(
            CoroutineSource::instance(ticker("a", 3, a)),
            None,
        );
        scheduler.add(
            CoroutineSource::instance(ticker("b", 3, b)),
            None,
        );
        scheduler.start(None).unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["a1", "b1", "a2", "b2", "a3", "b3"]
        );
    }

    #[test]
    fn test_completion_callback_reports_id_and_value() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut scheduler = Scheduler::new();
        scheduler.add(value_source(Value::Int(7)), None);
        scheduler
            .start(Some(Box::new(move |_, id, value| {
                sink.borrow_mut().push((id.as_str().to_string(), value.clone()));
            })))
            .unwrap();

        assert_eq!(*seen.borrow(), vec![("1".to_string(), Value::Int(7))]);
    }

    #[test]
    fn test_kill_mid_queue_preserves_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut scheduler = Scheduler::new();
        for label in ["a", "b", "c"] {
            scheduler.add(
                CoroutineSource::instance(ticker(label, 2, Rc::clone(&log))),
                None,
            );
        }
        assert!(scheduler.kill(&ProcessId::from("2")));
        assert!(!scheduler.kill(&ProcessId::from("9")));
        scheduler.start(None).unwrap();

        assert_eq!(*log.borrow(), vec!["a1", "c1", "a2", "c2"]);
    }

    #[test]
    fn test_spawn_syscall_replies_with_child_id() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut phase = 0;
        let parent = routine_fn(move |input| {
            let received = input.into_value()?;
            phase += 1;
            match phase {
                1 => Ok(Step::Yield(Signal::Syscall(syscall::spawn(value_source(
                    Value::Int(1),
                ))))),
                _ => Ok(Step::Done(received)),
            }
        });
        let mut scheduler = Scheduler::new();
        scheduler.add(CoroutineSource::instance(parent), None);
        scheduler
            .start(Some(Box::new(move |_, id, value| {
                sink.borrow_mut().push((id.as_str().to_string(), value.clone()));
            })))
            .unwrap();

        let seen = seen.borrow();
        // the caller resumes with the child id and finishes one pass
        // before the child's own completion
        assert_eq!(seen[0], ("1".to_string(), Value::Id(ProcessId::from("1_2"))));
        assert_eq!(seen[1], ("1_2".to_string(), Value::Int(1)));
    }

    #[test]
    fn test_fork_of_callable_process_creates_sibling() {
        let mut scheduler = Scheduler::new();
        let root = scheduler.add(value_source(Value::Null), None);
        let child = scheduler.add(value_source(Value::Int(4)), Some(&root));
        assert_eq!(child.as_str(), "1_2");

        let forked = scheduler.fork(&child).unwrap();
        assert_eq!(forked.as_str(), "1_3");
        assert_eq!(scheduler.queue().len(), 3);
    }

    #[test]
    fn test_fork_unknown_id_fails() {
        let mut scheduler = Scheduler::new();
        assert_eq!(
            scheduler.fork(&ProcessId::from("9")),
            Err(Error::Fork(ProcessId::from("9")))
        );
    }

    #[test]
    fn test_fork_instance_process_fails() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.add(
            CoroutineSource::instance(ticker("a", 2, Rc::new(RefCell::new(Vec::new())))),
            None,
        );
        assert_eq!(scheduler.fork(&id), Err(Error::NotCloneable));
    }

    #[test]
    fn test_failed_fork_syscall_is_thrown_into_caller() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut phase = 0;
        let caller = routine_fn(move |input| {
            phase += 1;
            match phase {
                1 => Ok(Step::Yield(Signal::Syscall(syscall::fork(
                    ProcessId::from("9"),
                )))),
                _ => match input {
                    Resume::Throw(error) => Ok(Step::Done(Value::Str(error.to_string()))),
                    other => {
                        other.into_value()?;
                        Ok(Step::Done(Value::Null))
                    }
                },
            }
        });
        let mut scheduler = Scheduler::new();
        scheduler.add(CoroutineSource::instance(caller), None);
        scheduler
            .start(Some(Box::new(move |_, _, value| {
                sink.borrow_mut().push(value.clone());
            })))
            .unwrap();

        assert_eq!(
            *seen.borrow(),
            vec![Value::Str("unable to fork process id: 9".into())]
        );
    }

    #[test]
    fn test_suspend_pauses_and_resume_finishes() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut phase = 0;
        let routine = routine_fn(move |input| {
            input.into_value()?;
            phase += 1;
            match phase {
                1 => Ok(Step::Yield(Signal::Syscall(syscall::suspend()))),
                _ => Ok(Step::Done(Value::Str("after resume".into()))),
            }
        });
        let mut scheduler = Scheduler::new();
        scheduler.add(CoroutineSource::instance(routine), None);
        scheduler
            .start(Some(Box::new(move |_, _, value| {
                sink.borrow_mut().push(value.clone());
            })))
            .unwrap();

        // paused with the caller still queued, nothing completed yet
        assert!(scheduler.is_paused());
        assert_eq!(scheduler.queue().len(), 1);
        assert!(seen.borrow().is_empty());

        scheduler.resume().unwrap();
        assert_eq!(*seen.borrow(), vec![Value::Str("after resume".into())]);
    }

    #[test]
    fn test_close_syscall_discards_queue() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let closer = routine_fn(|input| {
            input.into_value()?;
            Ok(Step::Yield(Signal::Syscall(syscall::close())))
        });
        let mut scheduler = Scheduler::new();
        scheduler.add(CoroutineSource::instance(closer), None);
        scheduler.add(
            CoroutineSource::instance(ticker("x", 5, Rc::clone(&log))),
            None,
        );
        scheduler.start(None).unwrap();

        assert!(scheduler.is_stopped());
        assert!(scheduler.queue().is_empty());
        // the bystander got at most its pre-close steps; nothing after
        assert!(log.borrow().len() <= 1);
        // a stopped scheduler does not resume
        scheduler.resume().unwrap();
        assert!(scheduler.is_stopped());
    }

    #[test]
    fn test_process_id_syscall() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut phase = 0;
        let routine = routine_fn(move |input| {
            let received = input.into_value()?;
            phase += 1;
            match phase {
                1 => Ok(Step::Yield(Signal::Syscall(syscall::process_id()))),
                _ => Ok(Step::Done(received)),
            }
        });
        let mut scheduler = Scheduler::new();
        scheduler.add(CoroutineSource::instance(routine), None);
        scheduler
            .start(Some(Box::new(move |_, _, value| {
                sink.borrow_mut().push(value.clone());
            })))
            .unwrap();

        assert_eq!(*seen.borrow(), vec![Value::Id(ProcessId::from("1"))]);
    }

    #[test]
    fn test_raise_at_outermost_frame_aborts_loop() {
        let mut scheduler = Scheduler::new();
        scheduler.add(
            CoroutineSource::instance(routine_fn(|_| Err(Error::msg("fatal")))),
            None,
        );
        assert_eq!(scheduler.start(None).unwrap_err(), Error::msg("fatal"));
    }
}
