//! Dynamic values exchanged with coroutines
//!
//! Routines yield and receive loosely typed values: a syscall reply may be
//! a process id, a socket read resumes with bytes, `join` collects a list.
//! `Value` is the small dynamic enum that flows through `Resume::Send`,
//! process return slots, completion callbacks and promise settlement.

use crate::error::Error;
use crate::io::Socket;
use crate::process::ProcessId;

/// A dynamically typed value passed through coroutines and promises.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absence of a value; also what a bare suspension resumes with
    #[default]
    Null,

    /// Boolean
    Bool(bool),

    /// Signed integer
    Int(i64),

    /// Floating point number
    Float(f64),

    /// UTF-8 string
    Str(String),

    /// Raw bytes, e.g. the result of a socket read
    Bytes(Vec<u8>),

    /// Ordered list, e.g. the result of `join`
    List(Vec<Value>),

    /// A process id, e.g. the reply to a `spawn` or `fork` syscall
    Id(ProcessId),

    /// An error carried as a value
    ///
    /// A routine that yields one of these at its outermost frame
    /// terminates with the error as its result instead of raising it;
    /// the promise layer turns such results into rejections.
    Error(Error),

    /// A socket handle, e.g. the result of an async accept
    Socket(Socket),
}

impl Value {
    /// True if this value carries an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// The integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The byte payload, if any.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The list payload, if any.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The process id payload, if any.
    pub fn as_id(&self) -> Option<&ProcessId> {
        match self {
            Value::Id(id) => Some(id),
            _ => None,
        }
    }

    /// The socket payload, if any.
    pub fn as_socket(&self) -> Option<&Socket> {
        match self {
            Value::Socket(socket) => Some(socket),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Id(a), Value::Id(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            // sockets compare by identity, not by stream state
            (Value::Socket(a), Value::Socket(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}
