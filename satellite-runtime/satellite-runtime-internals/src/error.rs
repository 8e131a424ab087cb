use crate::bridge::LifecycleOp;
use anyhow::Error as AnyError;
use std::time::Duration;
use thiserror::Error;

/// Satellite runtime errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {}", _0)]
    InvalidArgument(&'static str),

    /// No runtime library could be selected from a
    /// [`RuntimeDescriptor`](../library/struct.RuntimeDescriptor.html).
    #[error("Cannot locate runtime library: {}", _0)]
    LocateFailure(String),

    /// Every step of the load ladder failed to link the runtime library.
    #[error("Cannot dynamically link to {}: {}", _0, _1)]
    LoadFailure(String, String),

    /// A required entry point is absent from the runtime library or from a function table.
    #[error("Missing entry point: {}", _0)]
    MissingEntryPoint(&'static str),

    /// The runtime refused to come up, or could not be attached to after enumeration.
    #[error("Runtime creation failed: {}", _0)]
    CreationFailure(String),

    /// The loader class could not be defined, or its factory raised a fault.
    #[error("Bootstrap failed: {}", _0)]
    BootstrapFailure(String),

    /// A lifecycle method is absent from the loader object.
    #[error("Cannot find loader \"{}\" entry point", _0.method_name())]
    ProtocolFailure(LifecycleOp),

    /// A lifecycle method returned false or raised a fault.
    #[error("{}", _0.failure_message())]
    InvocationFailure(LifecycleOp),

    /// The calling thread could not be associated with the runtime.
    #[error("Unable to attach the current thread: {}", _0)]
    NotAttached(String),

    /// The destroy call did not complete within the configured wait.
    #[error("Runtime teardown did not finish within {:?}", _0)]
    TeardownTimeout(Duration),

    /// A catch-all for internal errors that are likely unrecoverable by the host.
    #[error("Internal error: {}", _0)]
    InternalError(#[source] AnyError),
}

impl Error {
    /// Whether this error must abort host startup when it is observed before the daemon runs.
    pub fn is_fatal_to_startup(&self) -> bool {
        match self {
            Error::LocateFailure(_)
            | Error::LoadFailure(_, _)
            | Error::MissingEntryPoint(_)
            | Error::CreationFailure(_)
            | Error::BootstrapFailure(_)
            | Error::ProtocolFailure(_)
            | Error::NotAttached(_) => true,
            Error::InvocationFailure(op) => op.fatal_to_startup(),
            _ => false,
        }
    }
}

impl From<std::ffi::NulError> for Error {
    fn from(e: std::ffi::NulError) -> Error {
        Error::InternalError(e.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::InternalError(e.into())
    }
}

#[macro_export]
macro_rules! sat_bail {
    ($e:expr) => {
        return Err(sat_format_err!($e));
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err(sat_format_err!($fmt, $($arg)*));
    };
}

#[macro_export(local_inner_macros)]
macro_rules! sat_ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            sat_bail!($e);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            sat_bail!($fmt, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! sat_format_err {
    ($($arg:tt)*) => { $crate::error::Error::InternalError(anyhow::format_err!($($arg)*)) }
}

#[macro_export]
macro_rules! bail_bootstrap {
    ($($arg:tt)*) => { return Err($crate::error::Error::BootstrapFailure(format!($($arg)*))); }
}

#[macro_export]
macro_rules! bail_creation {
    ($($arg:tt)*) => { return Err($crate::error::Error::CreationFailure(format!($($arg)*))); }
}
