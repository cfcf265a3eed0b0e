//! Data structures exchanged with the issuing points.
//!
//! These are the types that callers hand to an issuing point (revoked
//! entries and their serials) and the status information they get back.

pub use self::revocation::{
    EntryExtension, RevocationReason, RevokedEntry, Serial,
};
pub use self::status::{IssuingPointStatus, PublishStatus, UpdateStatus};

pub mod revocation;
pub mod status;

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};


//------------ IssuingPointHandle --------------------------------------------

/// The name of an issuing point.
///
/// Handles are used as storage scopes and file names, so they are limited
/// to ASCII letters, digits, `-`, `_` and `.`, and may not start with `.`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct IssuingPointHandle(String);

impl IssuingPointHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for IssuingPointHandle {
    type Err = InvalidHandle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= 255
            && !s.starts_with('.')
            && s.chars().all(|c| {
                c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
            });
        if valid {
            Ok(IssuingPointHandle(s.to_string()))
        } else {
            Err(InvalidHandle(s.to_string()))
        }
    }
}

impl AsRef<str> for IssuingPointHandle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssuingPointHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for IssuingPointHandle {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for IssuingPointHandle {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        IssuingPointHandle::from_str(&s).map_err(serde::de::Error::custom)
    }
}


//------------ InvalidHandle -------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InvalidHandle(String);

impl fmt::Display for InvalidHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid issuing point name: '{}'", self.0)
    }
}

impl std::error::Error for InvalidHandle {}


//------------ Tests ---------------------------------------------------------
