use std::{fmt, io, result};

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

/// This is a specialized Result, similar to std::io::Result
pub type Result<T> = result::Result<T, Error>;

/// This roughly corresponds to "Return codes" in DDS spec 2.2.1.1 Format and
/// Conventions
///
/// Deviations from the DDS spec:
/// * `OK` is not included. It is not an error. Ok/Error should be distinguished
///   with the `Result` type.
/// * `Error` is too unspecific.
/// * `NoData` should be encoded as `Option<SomeData>`, not an error code.
#[derive(Debug)]
pub enum Error {
  /// Illegal parameter value.
  BadParameter { reason: String },
  /// Service ran out of the resources needed to complete the operation.
  /// Returned e.g. when a KEEP_ALL history is full.
  OutOfResources { reason: String },
  /// A pre-condition for the operation was not met.
  PreconditionNotMet { precondition: String },
  /// Operation invoked on an Entity that is not yet enabled.
  NotEnabled,
  /// The Entity, or the participant that owns it, has been deleted.
  AlreadyDeleted,
  /// A blocking operation did not complete in time.
  Timeout,

  // Additions beyond the DDS standard:
  /// Serialization or deserialization of a sample or discovery data failed.
  Serialization { reason: String },
  /// Network or other OS-level I/O failure.
  Io { inner: io::Error },
  /// Synchronization with another thread failed because the [other thread
  /// has exited while holding a lock.](https://doc.rust-lang.org/std/sync/struct.PoisonError.html)
  LockPoisoned,
  /// Something that should not go wrong went wrong anyway.
  /// This is usually a bug in this crate.
  Internal { reason: String },
}

impl Error {
  pub fn bad_parameter<T>(reason: &str) -> Result<T> {
    Err(Error::BadParameter {
      reason: reason.to_string(),
    })
  }

  pub fn precondition_not_met<T>(precondition: &str) -> Result<T> {
    Err(Error::PreconditionNotMet {
      precondition: precondition.to_string(),
    })
  }

  pub fn out_of_resources<T>(reason: &str) -> Result<T> {
    Err(Error::OutOfResources {
      reason: reason.to_string(),
    })
  }
}

#[doc(hidden)]
#[macro_export]
macro_rules! log_and_err_internal {
  ($($arg:tt)*) => (
      { error!($($arg)*);
        Err( $crate::dds::result::Error::Internal{ reason: format!($($arg)*) } )
      }
    )
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::BadParameter { reason } => write!(f, "bad parameter: {}", reason),
      Error::OutOfResources { reason } => write!(f, "out of resources: {}", reason),
      Error::PreconditionNotMet { precondition } => {
        write!(f, "precondition not met: {}", precondition)
      }
      Error::NotEnabled => write!(f, "entity not enabled"),
      Error::AlreadyDeleted => write!(f, "entity already deleted"),
      Error::Timeout => write!(f, "timeout"),
      Error::Serialization { reason } => write!(f, "serialization: {}", reason),
      Error::Io { inner } => write!(f, "I/O: {}", inner),
      Error::LockPoisoned => write!(f, "lock poisoned"),
      Error::Internal { reason } => write!(f, "internal error: {}", reason),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Error::Io { inner } => Some(inner),
      _ => None,
    }
  }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
  fn from(_e: std::sync::PoisonError<T>) -> Error {
    Error::LockPoisoned
  }
}

impl From<io::Error> for Error {
  fn from(e: io::Error) -> Error {
    Error::Io { inner: e }
  }
}

impl From<speedy::Error> for Error {
  fn from(e: speedy::Error) -> Error {
    Error::Serialization {
      reason: e.to_string(),
    }
  }
}
