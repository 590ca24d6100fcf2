//! Errors reported when chunk callbacks fail.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

/// A single fault captured from a chunk whose callback panicked.
///
/// The fault carries the panic's message. It never escapes as a panic;
/// workers convert it into this value and keep running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskError {
    message: String,
}

impl TaskError {
    /// Message extracted from the panic payload.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Convert a payload returned by [`std::panic::catch_unwind`] into a
    /// `TaskError`, extracting the message for string-like payloads.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> TaskError {
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "callback panicked".to_string()
        };
        TaskError { message }
    }
}

impl Display for TaskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for TaskError {}

/// Aggregate of the faults captured while one parallel operation ran.
///
/// Returned by [`ParIter::wait`](crate::ParIter::wait) when at least one
/// chunk faulted. Contains one entry per faulted chunk, in no particular
/// order. Displaying the error joins the fault messages with newlines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IterError {
    faults: Vec<TaskError>,
}

impl IterError {
    /// Build the aggregate result from captured faults. `Ok` if none were
    /// captured.
    pub(crate) fn from_faults(faults: Vec<TaskError>) -> Result<(), IterError> {
        if faults.is_empty() {
            Ok(())
        } else {
            Err(IterError { faults })
        }
    }

    /// The individual captured faults.
    pub fn faults(&self) -> &[TaskError] {
        &self.faults
    }
}

impl Display for IterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, fault) in self.faults.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", fault)?;
        }
        Ok(())
    }
}

impl Error for IterError {}
