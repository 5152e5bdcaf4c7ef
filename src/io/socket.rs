//! Coroutine socket operations
//!
//! Socket reads and writes are themselves routines: they yield the
//! matching wait syscall, suspend until the reactor reports readiness,
//! perform the byte-level operation, and complete through an explicit
//! `Signal::Return`. Composing code yields them as nested routines and
//! receives the operation result as the sent value.

use crate::error::Error;
use crate::routine::{routine_fn, Routine, Signal, Step};
use crate::syscall::{wait_for_read, wait_for_write};
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;

/// A connected socket whose reads and writes run as coroutines.
///
/// Cloning yields another handle to the same underlying stream; identity
/// (and equality) is the file descriptor the reactor keys on.
#[derive(Clone)]
pub struct Socket {
    stream: Rc<RefCell<TcpStream>>,
    eof: Rc<Cell<bool>>,
}

impl Socket {
    /// Wrap a connected stream.
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Rc::new(RefCell::new(stream)),
            eof: Rc::new(Cell::new(false)),
        }
    }

    /// The descriptor identifying this socket in the reactor.
    pub fn raw_fd(&self) -> RawFd {
        self.stream.borrow().as_raw_fd()
    }

    /// True once a read has observed end-of-stream.
    pub fn eof(&self) -> bool {
        self.eof.get()
    }

    /// Routine reading up to `len` bytes once the socket is readable.
    ///
    /// Completes with `Value::Bytes`; an empty result marks end-of-stream.
    pub fn read(&self, len: usize) -> Box<dyn Routine> {
        let socket = self.clone();
        let mut waited = false;
        routine_fn(move |input| {
            input.into_value()?;
            if !waited {
                waited = true;
                return Ok(Step::Yield(Signal::Syscall(wait_for_read(socket.raw_fd()))));
            }
            let mut buffer = vec![0u8; len];
            let count = socket.stream.borrow_mut().read(&mut buffer)?;
            if count == 0 {
                socket.eof.set(true);
            }
            buffer.truncate(count);
            Ok(Step::Yield(Signal::Return(Value::Bytes(buffer))))
        })
    }

    /// Routine writing `data` once the socket is writable.
    ///
    /// Completes with `Value::Int` carrying the byte count written.
    pub fn write(&self, data: Vec<u8>) -> Box<dyn Routine> {
        let socket = self.clone();
        let mut waited = false;
        routine_fn(move |input| {
            input.into_value()?;
            if !waited {
                waited = true;
                return Ok(Step::Yield(Signal::Syscall(wait_for_write(
                    socket.raw_fd(),
                ))));
            }
            let count = socket.stream.borrow_mut().write(&data)?;
            Ok(Step::Yield(Signal::Return(Value::Int(count as i64))))
        })
    }

    /// Routine shutting the socket down; completes with `Value::Bool`
    /// reporting success.
    pub fn close(&self) -> Box<dyn Routine> {
        let socket = self.clone();
        routine_fn(move |input| {
            input.into_value()?;
            let closed = socket.stream.borrow().shutdown(Shutdown::Both).is_ok();
            Ok(Step::Yield(Signal::Return(Value::Bool(closed))))
        })
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Socket").field(&self.raw_fd()).finish()
    }
}

impl PartialEq for Socket {
    fn eq(&self, other: &Self) -> bool {
        self.raw_fd() == other.raw_fd()
    }
}

/// A listening socket whose accept runs as a coroutine.
pub struct Listener {
    inner: Rc<TcpListener>,
}

impl Listener {
    /// Wrap a bound listener.
    pub fn new(listener: TcpListener) -> Self {
        Self {
            inner: Rc::new(listener),
        }
    }

    /// The descriptor identifying this listener in the reactor.
    pub fn raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }

    /// Routine accepting one connection once the listener is readable.
    ///
    /// Completes with `Value::Socket` wrapping the accepted stream.
    pub fn accept(&self) -> Box<dyn Routine> {
        let listener = Rc::clone(&self.inner);
        let mut waited = false;
        routine_fn(move |input| {
            input.into_value()?;
            if !waited {
                waited = true;
                return Ok(Step::Yield(Signal::Syscall(wait_for_read(
                    listener.as_raw_fd(),
                ))));
            }
            let (stream, _peer) = listener.accept().map_err(Error::from)?;
            Ok(Step::Yield(Signal::Return(Value::Socket(Socket::new(
                stream,
            )))))
        })
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.raw_fd()).finish()
    }
}
