/*!
`mutcheck` classifies mutants of per-instruction C semantics functions as
killed or surviving, by regression testing, symbolic equivalence checking and
fuzzing. This crate is the type-driven core: it synthesizes the C drivers for
the equivalence checker and the fuzzer from a declarative type signature,
owns the packed byte layout shared between the fuzz driver and the offline
decoder, decodes verifier counterexample traces into canonical witnesses, and
tracks per-mutant verdicts across rounds.

Invoking the external tools (verifier, fuzzer, compiled tests) lives in the
sibling `mutcheck_exec` crate.
*/
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::unreadable_literal,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]
#![cfg_attr(not(debug_assertions), deny(missing_docs))]
#![cfg_attr(debug_assertions, warn(missing_docs))]

use core::fmt;
use std::io;

pub mod codec;
pub mod harness;
pub mod insn;
pub mod mutants;
pub mod survivors;
pub mod types;
pub mod witness;
pub mod workdir;

/// Main error struct for `mutcheck` and its executors.
#[derive(Debug)]
pub enum Error {
    /// Serialization or deserialization of an artifact went wrong
    Serialize(String),
    /// File or I/O related error
    File(io::Error),
    /// Key not in map
    KeyNotFound(String),
    /// A type (or instruction) outside the supported set was requested.
    /// Fatal for the affected instruction only, the batch continues.
    UnsupportedType(String),
    /// An artifact a stage depends on is missing; rerun the producing stage
    MissingArtifact(String),
    /// An external tool exited unsuccessfully (distinguished from a timeout)
    ToolFailure(String),
    /// An external invocation hit its wall-clock deadline
    Timeout(String),
    /// Round totals failed to reconcile; indicates a pipeline defect
    ConsistencyViolation(String),
    /// The argument passed to this method or function is not valid
    IllegalArgument(String),
    /// You're holding it wrong
    IllegalState(String),
    /// Something else happened
    Unknown(String),
}

impl Error {
    /// Serialization error
    #[must_use]
    pub fn serialize<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Serialize(arg.into())
    }

    /// Key not in map
    #[must_use]
    pub fn key_not_found<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::KeyNotFound(arg.into())
    }

    /// A type outside the supported set
    #[must_use]
    pub fn unsupported_type<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::UnsupportedType(arg.into())
    }

    /// A required upstream artifact is missing
    #[must_use]
    pub fn missing_artifact<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::MissingArtifact(arg.into())
    }

    /// An external tool failed
    #[must_use]
    pub fn tool_failure<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::ToolFailure(arg.into())
    }

    /// An external invocation timed out
    #[must_use]
    pub fn timeout<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Timeout(arg.into())
    }

    /// Round totals failed to reconcile
    #[must_use]
    pub fn consistency_violation<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::ConsistencyViolation(arg.into())
    }

    /// The argument passed is not valid
    #[must_use]
    pub fn illegal_argument<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalArgument(arg.into())
    }

    /// Illegal state
    #[must_use]
    pub fn illegal_state<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalState(arg.into())
    }

    /// Something else happened
    #[must_use]
    pub fn unknown<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Unknown(arg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialize(s) => write!(f, "Error in serialization: {s}"),
            Self::File(err) => write!(f, "File IO failed: {err}"),
            Self::KeyNotFound(s) => write!(f, "Key `{s}` not found"),
            Self::UnsupportedType(s) => write!(f, "Unsupported type: {s}"),
            Self::MissingArtifact(s) => write!(f, "Missing artifact: {s}"),
            Self::ToolFailure(s) => write!(f, "Tool invocation failed: {s}"),
            Self::Timeout(s) => write!(f, "Timed out: {s}"),
            Self::ConsistencyViolation(s) => write!(f, "Consistency violation: {s}"),
            Self::IllegalArgument(s) => write!(f, "Illegal argument: {s}"),
            Self::IllegalState(s) => write!(f, "Illegal state: {s}"),
            Self::Unknown(s) => write!(f, "Unknown error: {s}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::File(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialize(format!("{err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn test_error_display() {
        let err = Error::unsupported_type("half");
        assert_eq!(format!("{err}"), "Unsupported type: half");
    }
}
