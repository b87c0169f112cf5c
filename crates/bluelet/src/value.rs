// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Values exchanged between coroutines and the scheduler.
//!
//! Every resume carries a `Value`: the result of a fired I/O event, the
//! return value of a delegate, or `Null` for pure control events.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::net::Connection;

/// Dynamic payload sent into and returned from coroutines.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Bytes(Vec<u8>),
    Str(String),
    Connection(Connection),
    /// Anything else a coroutine wants to hand back to its delegator.
    Opaque(Rc<dyn Any>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "str",
            Value::Connection(_) => "connection",
            Value::Opaque(_) => "opaque",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Downcast an opaque payload.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(any) => any.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Wrap an arbitrary value.
    pub fn opaque<T: Any>(value: T) -> Self {
        Value::Opaque(Rc::new(value))
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Value::Bytes(b) => Ok(b),
            other => Err(other.mismatch("bytes")),
        }
    }

    pub fn into_int(self) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(n),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn into_connection(self) -> Result<Connection> {
        match self {
            Value::Connection(c) => Ok(c),
            other => Err(other.mismatch("connection")),
        }
    }

    fn mismatch(&self, expected: &'static str) -> Error {
        Error::UnexpectedValue {
            expected,
            found: self.type_name(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Bytes(b) => write!(f, "Bytes({:?})", String::from_utf8_lossy(b)),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Connection(c) => write!(f, "Connection({:?})", c.peer_addr()),
            Value::Opaque(_) => write!(f, "Opaque(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Connection(a), Value::Connection(b)) => a.same_socket(b),
            (Value::Opaque(a), Value::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Connection> for Value {
    fn from(c: Connection) -> Self {
        Value::Connection(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Value::from(()), Value::Null);
        assert_eq!(Value::from(7).as_int(), Some(7));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(&b"ab"[..]).as_bytes(), Some(&b"ab"[..]));
    }

    #[test]
    fn mismatch_reports_both_types() {
        let err = Value::Int(3).into_bytes().unwrap_err();
        assert_eq!(err.to_string(), "expected bytes value, got int");
    }

    #[test]
    fn opaque_downcast() {
        let v = Value::opaque(vec![1u32, 2, 3]);
        assert_eq!(v.downcast_ref::<Vec<u32>>().map(|v| v.len()), Some(3));
        assert!(v.downcast_ref::<String>().is_none());
        assert_eq!(v.clone(), v);
    }
}
