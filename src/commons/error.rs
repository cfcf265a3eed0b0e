//! Defines all crld errors.

use std::{fmt, io};
use crate::api::IssuingPointHandle;
use crate::commons::crypto::SignerError;
use crate::commons::storage::KeyValueError;


//------------ CrlIoError ----------------------------------------------------

/// An IO error with a description of what we were trying to do.
#[derive(Debug)]
pub struct CrlIoError {
    context: String,
    cause: io::Error,
}

impl CrlIoError {
    pub fn new(context: String, cause: io::Error) -> Self {
        CrlIoError { context, cause }
    }
}

impl fmt::Display for CrlIoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "context: {}, underlying io::Error: {}", self.context, self.cause)
    }
}


//------------ ErrorKind -----------------------------------------------------

/// The broad class an error belongs to.
///
/// The update worker uses this to decide how to report a failed cycle.
/// Every kind other than `Config` is retried on a later cycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Config,
    TransientStore,
    Signing,
    Publish,
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "configuration"),
            ErrorKind::TransientStore => write!(f, "store"),
            ErrorKind::Signing => write!(f, "signing"),
            ErrorKind::Publish => write!(f, "publication"),
            ErrorKind::Unexpected => write!(f, "unexpected"),
        }
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // System Issues
    //-----------------------------------------------------------------
    IoError(CrlIoError),
    KeyValueError(KeyValueError),
    SignerError(SignerError),
    JsonError(serde_json::Error),

    //-----------------------------------------------------------------
    // Collaborator Issues
    //-----------------------------------------------------------------
    CertStoreUnavailable(String),
    RequestLogUnavailable(String),
    PublishFailed(String),
    CloneForwardFailed(String),

    //-----------------------------------------------------------------
    // Issuing Point Issues
    //-----------------------------------------------------------------
    IssuingPointUnknown(IssuingPointHandle),
    IssuingPointDuplicate(IssuingPointHandle),
    IssuingPointDisabled(IssuingPointHandle),
    IssuingPointShutDown(IssuingPointHandle),
    CrlEncoding(String),

    //-----------------------------------------------------------------
    // Configuration Issues
    //-----------------------------------------------------------------
    ConfigUnknownKey(String),
    ConfigInvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    FutureThisUpdateForbidden,

    //-----------------------------------------------------------------
    // If we really don't know any more..
    //-----------------------------------------------------------------
    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(e) => e.fmt(f),
            Error::KeyValueError(e) => write!(f, "Storage issue: {e}"),
            Error::SignerError(e) => write!(f, "Signing issue: {e}"),
            Error::JsonError(e) => write!(f, "Invalid JSON: {e}"),

            Error::CertStoreUnavailable(e) => {
                write!(f, "Certificate store unavailable: {e}")
            }
            Error::RequestLogUnavailable(e) => {
                write!(f, "Request log unavailable: {e}")
            }
            Error::PublishFailed(e) => write!(f, "Publication failed: {e}"),
            Error::CloneForwardFailed(e) => {
                write!(f, "Could not forward to clone: {e}")
            }

            Error::IssuingPointUnknown(ip) => {
                write!(f, "Issuing point '{ip}' is unknown")
            }
            Error::IssuingPointDuplicate(ip) => {
                write!(f, "Issuing point '{ip}' already exists")
            }
            Error::IssuingPointDisabled(ip) => {
                write!(f, "Issuing point '{ip}' is disabled")
            }
            Error::IssuingPointShutDown(ip) => {
                write!(f, "Issuing point '{ip}' was shut down")
            }
            Error::CrlEncoding(e) => write!(f, "Cannot encode CRL: {e}"),

            Error::ConfigUnknownKey(key) => {
                write!(f, "Unknown issuing point setting '{key}'")
            }
            Error::ConfigInvalidValue { key, value, reason } => {
                write!(
                    f, "Invalid value '{value}' for setting '{key}': {reason}"
                )
            }
            Error::FutureThisUpdateForbidden => {
                write!(f, "A future thisUpdate is not allowed by policy")
            }

            Error::Custom(s) => s.fmt(f),
        }
    }
}

impl Error {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Error::Custom(msg.to_string())
    }

    pub fn invalid_value(
        key: impl fmt::Display,
        value: impl fmt::Display,
        reason: impl fmt::Display,
    ) -> Self {
        Error::ConfigInvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn cert_store(e: impl fmt::Display) -> Self {
        Error::CertStoreUnavailable(e.to_string())
    }

    pub fn request_log(e: impl fmt::Display) -> Self {
        Error::RequestLogUnavailable(e.to_string())
    }

    pub fn publish(e: impl fmt::Display) -> Self {
        Error::PublishFailed(e.to_string())
    }

    /// Returns the broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigUnknownKey(_)
            | Error::ConfigInvalidValue { .. }
            | Error::FutureThisUpdateForbidden => ErrorKind::Config,

            Error::IoError(_)
            | Error::KeyValueError(_)
            | Error::CertStoreUnavailable(_)
            | Error::RequestLogUnavailable(_) => ErrorKind::TransientStore,

            Error::SignerError(_) | Error::CrlEncoding(_) => {
                ErrorKind::Signing
            }

            Error::PublishFailed(_) | Error::CloneForwardFailed(_) => {
                ErrorKind::Publish
            }

            _ => ErrorKind::Unexpected,
        }
    }

    /// Returns whether a later attempt may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientStore
    }
}

impl std::error::Error for Error {}

impl From<CrlIoError> for Error {
    fn from(e: CrlIoError) -> Self {
        Error::IoError(e)
    }
}

impl From<KeyValueError> for Error {
    fn from(e: KeyValueError) -> Self {
        Error::KeyValueError(e)
    }
}

impl From<SignerError> for Error {
    fn from(e: SignerError) -> Self {
        Error::SignerError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::JsonError(e)
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_follow_taxonomy() {
        assert_eq!(
            Error::invalid_value("update_schema", "0", "must be >= 1").kind(),
            ErrorKind::Config
        );
        assert!(Error::cert_store("connection refused").is_transient());
        assert!(Error::request_log("gone").is_transient());
        assert_eq!(
            Error::SignerError(SignerError::KeyNotFound).kind(),
            ErrorKind::Signing
        );
        assert_eq!(Error::publish("disk full").kind(), ErrorKind::Publish);
        assert_eq!(Error::custom("boom").kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn invalid_value_is_readable() {
        let e = Error::invalid_value("begin_serial", "-1", "negative");
        assert_eq!(
            e.to_string(),
            "Invalid value '-1' for setting 'begin_serial': negative"
        );
    }
}
