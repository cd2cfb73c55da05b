/*!
Welcome to `seedling`

Seedling is a coverage-guided, generator-based fuzzing engine. It drives a
deterministic test procedure over and over, watching which control-flow edges
each run exercises, and keeps a corpus of interesting inputs from which new
inputs are bred by havoc mutation and splicing. Inputs are either flat byte
sequences or maps keyed by [`ei::ExecutionIndex`], so that a byte keeps its
identity across runs that follow the same program path.

The crate contains the guidance core only. The bytecode instrumentation that
emits [`events::TraceEvent`]s, the harness that turns a byte stream into a
typed input, and any command-line front-end are external collaborators wired
up through the interfaces in [`guidance`] and [`events`].
*/
#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![cfg_attr(
    not(test),
    warn(
        missing_debug_implementations,
        missing_docs,
        trivial_numeric_casts,
        unused_extern_crates,
        unused_import_braces,
        unused_qualifications,
    )
)]

use std::{fmt, io};

pub mod config;
pub mod corpus;
pub mod coverage;
pub mod ei;
pub mod events;
pub mod guidance;
pub mod inputs;
pub mod output;
pub mod rands;
pub mod stats;

pub use guidance::StdGuidance;

/// The purpose of this module is to alleviate imports of the main crate
/// components by adding a glob import.
pub mod prelude {
    pub use super::{
        config::*, corpus::*, coverage::*, ei::*, events::*, guidance::*, inputs::*, output::*,
        rands::*, stats::*, Error,
    };
}

#[cfg(feature = "errors_backtrace")]
/// Error backtrace, captured at the point the error was created
pub use std::backtrace::Backtrace as ErrorBacktrace;

#[cfg(not(feature = "errors_backtrace"))]
/// Empty error backtrace, used when the `errors_backtrace` feature is disabled
#[derive(Debug, Default)]
pub struct ErrorBacktrace {}

#[cfg(not(feature = "errors_backtrace"))]
impl ErrorBacktrace {
    /// Nop
    #[must_use]
    pub fn capture() -> Self {
        Self {}
    }
}

#[cfg(feature = "errors_backtrace")]
fn display_error_backtrace(f: &mut fmt::Formatter, err: &ErrorBacktrace) -> fmt::Result {
    write!(f, "\nBacktrace: {err:?}")
}
#[cfg(not(feature = "errors_backtrace"))]
#[allow(clippy::unnecessary_wraps)]
fn display_error_backtrace(_f: &mut fmt::Formatter, _err: &ErrorBacktrace) -> fmt::Result {
    fmt::Result::Ok(())
}

/// Main error struct for `seedling`
#[derive(Debug)]
pub enum Error {
    /// You're holding it wrong: an internal invariant was violated.
    /// These are fatal; the driver must abort the campaign.
    IllegalState(String, ErrorBacktrace),
    /// The argument passed to this method or function is not valid
    IllegalArgument(String, ErrorBacktrace),
    /// Key not in map
    KeyNotFound(String, ErrorBacktrace),
    /// No elements in the current item
    Empty(String, ErrorBacktrace),
    /// OS error, wrapping a [`io::Error`]
    OsError(io::Error, String, ErrorBacktrace),
    /// Error raised by the guidance itself (seed intake, corpus I/O, ...)
    Guidance(String, ErrorBacktrace),
    /// Something else happened
    Unknown(String, ErrorBacktrace),
}

impl Error {
    /// An internal invariant was violated
    #[must_use]
    pub fn illegal_state<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalState(arg.into(), ErrorBacktrace::capture())
    }

    /// The argument was not valid
    #[must_use]
    pub fn illegal_argument<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalArgument(arg.into(), ErrorBacktrace::capture())
    }

    /// Key not in map
    #[must_use]
    pub fn key_not_found<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::KeyNotFound(arg.into(), ErrorBacktrace::capture())
    }

    /// No elements in the current item
    #[must_use]
    pub fn empty<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Empty(arg.into(), ErrorBacktrace::capture())
    }

    /// OS error with additional context
    #[must_use]
    pub fn os_error<S>(err: io::Error, msg: S) -> Self
    where
        S: Into<String>,
    {
        Error::OsError(err, msg.into(), ErrorBacktrace::capture())
    }

    /// Error raised by the guidance itself
    #[must_use]
    pub fn guidance<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Guidance(arg.into(), ErrorBacktrace::capture())
    }

    /// Something else happened
    #[must_use]
    pub fn unknown<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Unknown(arg.into(), ErrorBacktrace::capture())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IllegalState(s, b) => {
                write!(f, "Illegal state: {s}")?;
                display_error_backtrace(f, b)
            }
            Self::IllegalArgument(s, b) => {
                write!(f, "Bad argument: {s}")?;
                display_error_backtrace(f, b)
            }
            Self::KeyNotFound(s, b) => {
                write!(f, "Key `{s}` not found")?;
                display_error_backtrace(f, b)
            }
            Self::Empty(s, b) => {
                write!(f, "No items in {s}")?;
                display_error_backtrace(f, b)
            }
            Self::OsError(err, s, b) => {
                write!(f, "OS error: {s}: {err}")?;
                display_error_backtrace(f, b)
            }
            Self::Guidance(s, b) => {
                write!(f, "Guidance error: {s}")?;
                display_error_backtrace(f, b)
            }
            Self::Unknown(s, b) => {
                write!(f, "Unknown error: {s}")?;
                display_error_backtrace(f, b)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::os_error(err, "io error")
    }
}
