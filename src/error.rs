//! Error taxonomy shared by descriptor creation, dispatch and execution.
//!
//! Every fallible entry point returns [`Result`]. The C-style status codes
//! callers switch on are available through [`Error::status`] / [`status_of`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or contradictory input: absent required argument,
    /// inconsistent memory descriptors, unsupported engine pairing.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// Well-formed request that no registered implementation accepts.
    #[error("unimplemented: {0}")]
    Unimplemented(String),
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArguments(msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Error::Unimplemented(msg.into())
    }

    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        Error::OutOfMemory(msg.into())
    }

    /// Status code equivalent of this error.
    pub fn status(&self) -> Status {
        match self {
            Error::InvalidArguments(_) => Status::InvalidArguments,
            Error::Unimplemented(_) => Status::Unimplemented,
            Error::OutOfMemory(_) => Status::OutOfMemory,
            Error::Runtime(_) => Status::RuntimeError,
        }
    }
}

/// Stable status codes, numbered as in the C interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    OutOfMemory = 1,
    InvalidArguments = 2,
    Unimplemented = 3,
    RuntimeError = 5,
}

impl Status {
    pub fn name(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::OutOfMemory => "out_of_memory",
            Status::InvalidArguments => "invalid_arguments",
            Status::Unimplemented => "unimplemented",
            Status::RuntimeError => "runtime_error",
        }
    }
}

/// Collapse a result into its status code.
pub fn status_of<T>(result: &Result<T>) -> Status {
    match result {
        Ok(_) => Status::Success,
        Err(e) => e.status(),
    }
}

/// Reserve exactly `len` zeroed bytes, reporting allocation failure as
/// [`Error::OutOfMemory`] instead of aborting.
pub(crate) fn try_zeroed_bytes(len: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|e| Error::out_of_memory(format!("{what}: {len} bytes ({e})")))?;
    buf.resize(len, 0);
    Ok(buf)
}
