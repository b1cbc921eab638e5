//! Cooperative nonlocal exit with typed payloads.
//!
//! Most of the compiler reports problems by appending to an error list; this
//! layer exists only for helpers whose failure must interrupt the caller's
//! logic outright (for example, reflective parsing of memory-order strings)
//! and for programmer errors inside the compiler itself.
//!
//! A handler stack is kept per thread. [`throw`] transfers control to the
//! most recently installed handler, carrying the exception kind, a value
//! payload and a captured stack trace; with no handler installed it prints
//! the payload and aborts the process.

use std::backtrace::Backtrace;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::Arc;

use crate::value::Value;

/// The kind of an exception, determining how an uncaught one is described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// Exceptions thrown by user code via language-level `throw`.
    User,
    /// Programming errors, such as a failed string-to-integer conversion.
    Error,
    /// String format errors.
    Format,
    /// Errors inside the runtime or compiler itself.
    Internal,
    /// Cooperative interruption of a computation.
    Interrupt,
    /// Operations whose behaviour the language leaves undefined.
    UndefinedBehaviour,
}

impl ExceptionKind {
    /// Human description used when the exception reaches the top of a thread.
    #[must_use]
    pub fn uncaught_description(self) -> &'static str {
        match self {
            Self::User => "user exception",
            Self::Error => "programming error",
            Self::Format => "string format error",
            Self::Internal => "internal error",
            Self::Interrupt => "interruption",
            Self::UndefinedBehaviour => "undefined behaviour error",
        }
    }
}

/// The payload transferred by [`throw`].
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub value: Value,
    pub trace: Arc<Backtrace>,
}

impl Exception {
    #[must_use]
    pub fn new(kind: ExceptionKind, value: Value) -> Self {
        Self {
            kind,
            value,
            trace: Arc::new(Backtrace::capture()),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.uncaught_description(), self.value)
    }
}

thread_local! {
    static HANDLER_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Throws an exception to the innermost [`catch`] on this thread.
///
/// With no handler installed the exception is printed and the process
/// aborts, mirroring an uncaught exception reaching the top of a thread.
pub fn throw(kind: ExceptionKind, value: Value) -> ! {
    let exception = Exception::new(kind, value);
    if HANDLER_DEPTH.get() == 0 {
        eprintln!("panic: uncaught {exception}");
        eprintln!("{}", exception.trace);
        process::abort();
    }
    panic::panic_any(exception);
}

/// Convenience wrapper throwing a string-valued exception.
pub fn throw_str(kind: ExceptionKind, message: impl Into<String>) -> ! {
    throw(kind, Value::str(message.into()));
}

/// Runs `body` with an exception handler installed.
///
/// Exceptions thrown inside `body` on this thread unwind to this frame and
/// are returned as `Err`. Foreign panics are propagated untouched.
pub fn catch<T>(body: impl FnOnce() -> T) -> Result<T, Exception> {
    HANDLER_DEPTH.set(HANDLER_DEPTH.get() + 1);
    let result = panic::catch_unwind(AssertUnwindSafe(body));
    HANDLER_DEPTH.set(HANDLER_DEPTH.get() - 1);

    match result {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<Exception>() {
            Ok(exception) => Err(*exception),
            Err(other) => panic::resume_unwind(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catch_returns_body_value_when_nothing_is_thrown() {
        let result = catch(|| 42);
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn thrown_exception_reaches_the_innermost_handler() {
        let result: Result<(), _> = catch(|| {
            throw_str(ExceptionKind::Format, "not a memory order");
        });
        let exception = result.unwrap_err();
        assert_eq!(exception.kind, ExceptionKind::Format);
        assert_eq!(exception.value.to_string(), "not a memory order");
    }

    #[test]
    fn handlers_nest() {
        let outer: Result<Result<(), Exception>, Exception> = catch(|| {
            catch(|| throw_str(ExceptionKind::Error, "inner"))
        });
        let inner = outer.expect("outer handler must not trigger");
        assert_eq!(inner.unwrap_err().kind, ExceptionKind::Error);
    }

    #[test]
    fn foreign_panics_pass_through() {
        let result = panic::catch_unwind(|| {
            let _ = catch(|| panic!("plain panic"));
        });
        assert!(result.is_err());
    }
}
