//! Utilities dealing with error handling in this crate.
//!
//! Every PAPI return code has a matching variant of [`Error`]. Errors that originate in other
//! crates are wrapped and map onto the closest PAPI code through [`Error::code`].

use failure::Fail;

/// Errors produced by this crate.
#[derive(Debug, Fail)]
pub enum Error {
    /// Invalid argument (`PAPI_EINVAL`).
    #[fail(display = "Invalid argument")]
    Invalid,
    /// Insufficient memory (`PAPI_ENOMEM`).
    #[fail(display = "Insufficient memory")]
    NoMemory,
    /// A system or C library call failed (`PAPI_ESYS`).
    #[fail(display = "A System/C library call failed")]
    Sys,
    /// Not supported by component (`PAPI_ECMP`).
    #[fail(display = "Not supported by component")]
    Component,
    /// Access to the counters was lost or interrupted (`PAPI_ECLOST`).
    #[fail(display = "Access to the counters was lost or interrupted")]
    Lost,
    /// Internal error (`PAPI_EBUG`).
    #[fail(display = "Internal error")]
    Bug,
    /// Event does not exist (`PAPI_ENOEVNT`).
    #[fail(display = "Event does not exist")]
    NoEvent,
    /// Event exists, but cannot be counted due to counter resource limitations (`PAPI_ECNFLCT`).
    #[fail(display = "Event exists, but cannot be counted due to counter resource limitations")]
    Conflict,
    /// EventSet is currently not running (`PAPI_ENOTRUN`).
    #[fail(display = "EventSet is currently not running")]
    NotRunning,
    /// EventSet is currently counting (`PAPI_EISRUN`).
    #[fail(display = "EventSet is currently counting")]
    IsRunning,
    /// No such EventSet available (`PAPI_ENOEVST`).
    #[fail(display = "No such EventSet Available")]
    NoEventSet,
    /// Event in argument is not a valid preset (`PAPI_ENOTPRESET`).
    #[fail(display = "Event in argument is not a valid preset")]
    NotPreset,
    /// Hardware does not support performance counters (`PAPI_ENOCNTR`).
    #[fail(display = "Hardware does not support performance counters")]
    NoCounters,
    /// Unknown error code (`PAPI_EMISC`).
    #[fail(display = "Unknown error code")]
    Misc,
    /// Permission level does not permit operation (`PAPI_EPERM`).
    #[fail(display = "Permission level does not permit operation")]
    Permission,
    /// PAPI hasn't been initialized yet (`PAPI_ENOINIT`).
    #[fail(display = "PAPI hasn't been initialized yet")]
    NotInitialized,
    /// Component index isn't set (`PAPI_ENOCMP`).
    #[fail(display = "Component Index isn't set")]
    NoComponent,
    /// Not supported (`PAPI_ENOSUPP`).
    #[fail(display = "Not supported")]
    NotSupported,
    /// Not implemented (`PAPI_ENOIMPL`).
    #[fail(display = "Not implemented")]
    NotImplemented,
    /// Buffer size exceeded (`PAPI_EBUF`).
    #[fail(display = "Buffer size exceeded")]
    Buffer,
    /// EventSet domain is not supported for the operation (`PAPI_EINVAL_DOM`).
    #[fail(display = "EventSet domain is not supported for the operation")]
    InvalidDomain,
    /// Invalid or missing event attributes (`PAPI_EATTR`).
    #[fail(display = "Invalid or missing event attributes")]
    Attribute,
    /// Too many events or attributes (`PAPI_ECOUNT`).
    #[fail(display = "Too many events or attributes")]
    Count,
    /// Bad combination of features (`PAPI_ECOMBO`).
    #[fail(display = "Bad combination of features")]
    Combo,
    /// Errors originating from calls to `std::io::*`.
    #[fail(display = "IO Error - {}", _0)]
    IO(#[cause] std::io::Error),
    /// Errors originating from calls to `std::env::*`.
    #[fail(display = "Env Error - {}", _0)]
    Env(#[cause] std::env::VarError),
    /// Errors originating from calls to `regex::*`.
    #[fail(display = "Regex Error - {}", _0)]
    Regex(#[cause] regex::Error),
    /// Errors parsing Glob patterns.
    #[fail(display = "Glob Error - {}", _0)]
    GlobPattern(#[cause] glob::PatternError),
    /// Errors interating over entries in a glob.
    #[fail(display = "Glob Error - {}", _0)]
    GlobIter(#[cause] glob::GlobError),
    /// Errors caused by parsing integers from strings.
    #[fail(display = "Parse Error - {}", _0)]
    ParseInt(#[cause] std::num::ParseIntError),
    /// Errors caused by parsing floats from strings.
    #[fail(display = "Parse Error - {}", _0)]
    ParseFloat(#[cause] std::num::ParseFloatError),
    /// Errors caused by malformed derived event formulas.
    #[fail(display = "Parse Error - {}", _0)]
    ParseFormula(#[cause] pest::error::Error<crate::events::Rule>),
    /// Errors in parsing PMU event JSON files.
    #[fail(display = "JSON Error - {}", _0)]
    Json(#[cause] serde_json::Error),
    /// Errors originating from calls to `libc` or other system utilties.
    #[fail(display = "System Error - {}", _0)]
    System(#[cause] nix::Error),
}

impl Error {
    /// Create a new instance of error from the `errno` variable.
    #[inline]
    pub fn from_errno() -> Self {
        Error::System(nix::Error::Sys(nix::errno::Errno::last()))
    }

    /// Integer PAPI return code corresponding to this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::Invalid => -1,
            Error::NoMemory => -2,
            Error::Sys => -3,
            Error::Component => -4,
            Error::Lost => -5,
            Error::Bug => -6,
            Error::NoEvent => -7,
            Error::Conflict => -8,
            Error::NotRunning => -9,
            Error::IsRunning => -10,
            Error::NoEventSet => -11,
            Error::NotPreset => -12,
            Error::NoCounters => -13,
            Error::Misc => -14,
            Error::Permission => -15,
            Error::NotInitialized => -16,
            Error::NoComponent => -17,
            Error::NotSupported => -18,
            Error::NotImplemented => -19,
            Error::Buffer => -20,
            Error::InvalidDomain => -21,
            Error::Attribute => -22,
            Error::Count => -23,
            Error::Combo => -24,
            Error::System(nix::Error::Sys(nix::errno::Errno::EPERM))
            | Error::System(nix::Error::Sys(nix::errno::Errno::EACCES)) => -15,
            Error::IO(e) if e.kind() == std::io::ErrorKind::PermissionDenied => -15,
            Error::IO(_) | Error::System(_) | Error::GlobIter(_) => -3,
            Error::Env(_)
            | Error::Regex(_)
            | Error::GlobPattern(_)
            | Error::ParseInt(_)
            | Error::ParseFloat(_)
            | Error::ParseFormula(_)
            | Error::Json(_) => -1,
        }
    }

    /// Build the error corresponding to a PAPI return code.
    ///
    /// Returns `None` for `PAPI_OK` and for codes outside the known range.
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            -1 => Error::Invalid,
            -2 => Error::NoMemory,
            -3 => Error::Sys,
            -4 => Error::Component,
            -5 => Error::Lost,
            -6 => Error::Bug,
            -7 => Error::NoEvent,
            -8 => Error::Conflict,
            -9 => Error::NotRunning,
            -10 => Error::IsRunning,
            -11 => Error::NoEventSet,
            -12 => Error::NotPreset,
            -13 => Error::NoCounters,
            -14 => Error::Misc,
            -15 => Error::Permission,
            -16 => Error::NotInitialized,
            -17 => Error::NoComponent,
            -18 => Error::NotSupported,
            -19 => Error::NotImplemented,
            -20 => Error::Buffer,
            -21 => Error::InvalidDomain,
            -22 => Error::Attribute,
            -23 => Error::Count,
            -24 => Error::Combo,
            _ => return None,
        };
        Some(err)
    }
}

/// Message describing a PAPI return code.
pub fn strerror(code: i32) -> &'static str {
    match code {
        0 => "No error",
        -1 => "Invalid argument",
        -2 => "Insufficient memory",
        -3 => "A System/C library call failed",
        -4 => "Not supported by component",
        -5 => "Access to the counters was lost or interrupted",
        -6 => "Internal error",
        -7 => "Event does not exist",
        -8 => "Event exists, but cannot be counted due to counter resource limitations",
        -9 => "EventSet is currently not running",
        -10 => "EventSet is currently counting",
        -11 => "No such EventSet Available",
        -12 => "Event in argument is not a valid preset",
        -13 => "Hardware does not support performance counters",
        -14 => "Unknown error code",
        -15 => "Permission level does not permit operation",
        -16 => "PAPI hasn't been initialized yet",
        -17 => "Component Index isn't set",
        -18 => "Not supported",
        -19 => "Not implemented",
        -20 => "Buffer size exceeded",
        -21 => "EventSet domain is not supported for the operation",
        -22 => "Invalid or missing event attributes",
        -23 => "Too many events or attributes",
        -24 => "Bad combination of features",
        _ => "Unknown error code",
    }
}

macro_rules! error_from {
    ($et: ty => $cet: expr) => {
        impl From<$et> for Error {
            #[inline]
            fn from(err: $et) -> Self {
                $cet(err)
            }
        }
    };
}

error_from!(std::io::Error => Error::IO);
error_from!(std::env::VarError => Error::Env);
error_from!(regex::Error => Error::Regex);
error_from!(glob::PatternError => Error::GlobPattern);
error_from!(glob::GlobError => Error::GlobIter);
error_from!(std::num::ParseIntError => Error::ParseInt);
error_from!(std::num::ParseFloatError => Error::ParseFloat);
error_from!(pest::error::Error<crate::events::Rule> => Error::ParseFormula);
error_from!(serde_json::Error => Error::Json);
error_from!(nix::Error => Error::System);

/// Result type used in this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip_through_messages() {
        for code in -24..0 {
            let err = Error::from_code(code).unwrap();
            assert_eq!(err.code(), code);
            assert_eq!(format!("{}", err), strerror(code));
        }
        assert!(Error::from_code(0).is_none());
        assert!(Error::from_code(-25).is_none());
        assert_eq!(strerror(-99), "Unknown error code");
    }

    #[test]
    fn test_wrapped_errors_map_to_papi_codes() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(Error::from(io).code(), -3);
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert_eq!(Error::from(denied).code(), -15);
        let parse = "x1".parse::<i64>().unwrap_err();
        assert_eq!(Error::from(parse).code(), -1);
    }
}
